use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use esearch::{
    cli_main, disable_color, eerror, init_logging, search, Index, OutputMode, SearchOptions,
    Settings, INDEX_FILE_NAME,
};

/// Replacement for 'emerge --search' with a search index.
#[derive(Parser, Debug)]
#[command(name = "esearch", version)]
struct Cli {
    /// Regular expressions to search for. Invalid ones are matched literally.
    #[arg(required = true, value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Search also in package descriptions.
    #[arg(short = 'S', long)]
    searchdesc: bool,

    /// Match against category/package instead of the package name.
    #[arg(short = 'F', long)]
    fullname: bool,

    /// Only show installed packages.
    #[arg(short = 'I', long, conflicts_with = "notinst")]
    instonly: bool,

    /// Only show packages that are not installed.
    #[arg(short = 'N', long)]
    notinst: bool,

    /// Show one line per package.
    #[arg(short, long, group = "mode")]
    compact: bool,

    /// Also show the repository and every available version.
    #[arg(short, long, group = "mode")]
    verbose: bool,

    /// Show the ebuild of the latest version.
    #[arg(short, long, group = "mode")]
    ebuild: bool,

    /// Print each package with FORMAT (%n %c %p %v %i %s %h %d %l %r %m %%).
    #[arg(short, long, group = "mode", value_name = "FORMAT")]
    own: Option<String>,

    /// Use the index found in DIR.
    #[arg(short = 'd', long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Don't use ANSI codes for colored output.
    #[arg(short, long)]
    nocolor: bool,

    /// Exclude packages matching REGEX. May be repeated.
    #[arg(short = 'x', long, value_name = "REGEX")]
    exclude: Vec<String>,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        if let Some(format) = &self.own {
            OutputMode::Own(format.clone())
        } else if self.ebuild {
            OutputMode::Ebuilds
        } else if self.verbose {
            OutputMode::Verbose
        } else if self.compact {
            OutputMode::Compact
        } else {
            OutputMode::Normal
        }
    }
}

fn do_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(!cli.nocolor);

    let settings = Settings::load()?;
    if cli.nocolor || settings.nocolor {
        disable_color();
    }

    let index_dir = cli.directory.clone().unwrap_or(settings.index_dir);
    let index = Index::load(&index_dir.join(INDEX_FILE_NAME))?;

    let options = SearchOptions {
        output: cli.output_mode(),
        patterns: cli.patterns,
        search_desc: cli.searchdesc,
        fullname: cli.fullname,
        instonly: cli.instonly,
        notinst: cli.notinst,
        exclude: cli.exclude,
    };
    let found = search(&index, &options, &mut std::io::stdout().lock())?;
    if found == 0 {
        eerror(&mut std::io::stderr().lock(), "No packages found")?;
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    cli_main(do_main)
}
