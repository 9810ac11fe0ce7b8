use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use esearch::{cli_main, disable_color, init_logging, update_index, Settings, UpdateOptions, Verbosity};

/// Generate the esearch index from the Portage tree and its overlays.
#[derive(Parser, Debug)]
#[command(name = "eupdatedb", version)]
struct Cli {
    /// Print each category and the time spent on it.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Print only the summary.
    #[arg(short, long)]
    quiet: bool,

    /// Save the index in DIR, which must exist.
    #[arg(short = 'd', long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Don't use ANSI codes for colored output.
    #[arg(short, long)]
    nocolor: bool,
}

fn do_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(!cli.nocolor);

    let mut settings = Settings::load()?;
    if cli.nocolor || settings.nocolor {
        disable_color();
    }
    if let Some(dir) = cli.directory {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        settings.index_dir = dir;
    }

    let verbosity = match (cli.quiet, cli.verbose) {
        (true, _) => Verbosity::Quiet,
        (_, true) => Verbosity::Verbose,
        _ => Verbosity::Normal,
    };
    update_index(&settings, &UpdateOptions { verbosity }, &mut std::io::stdout().lock())?;
    Ok(())
}

fn main() -> std::process::ExitCode {
    cli_main(do_main)
}
