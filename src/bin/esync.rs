use anyhow::Result;
use clap::Parser;
use esearch::{
    cli_main, disable_color, init_logging, sync, Settings, SyncOptions, SyncProgram, Verbosity,
};

/// Sync the Portage tree, rebuild the esearch index and show what changed.
#[derive(Parser, Debug)]
#[command(name = "esync", version)]
struct Cli {
    /// Use 'emerge-webrsync' instead of 'emerge --sync'.
    #[arg(short, long, group = "program")]
    webrsync: bool,

    /// Use 'emerge-delta-webrsync' instead of 'emerge --sync'.
    #[arg(short, long, group = "program")]
    delta_webrsync: bool,

    /// Use 'emerge --metadata' instead of 'emerge --sync'.
    #[arg(short, long, group = "program")]
    metadata: bool,

    /// Sync the overlays with layman first, then the main tree.
    #[arg(short, long)]
    layman_sync: bool,

    /// Don't use ANSI codes for colored output.
    #[arg(short, long)]
    nocolor: bool,

    /// Less output (implies --nospinner).
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Don't display the remaining index count.
    #[arg(short = 's', long)]
    nospinner: bool,
}

impl Cli {
    fn program(&self) -> SyncProgram {
        if self.webrsync {
            SyncProgram::WebRsync
        } else if self.delta_webrsync {
            SyncProgram::DeltaWebRsync
        } else if self.metadata {
            SyncProgram::Metadata
        } else {
            SyncProgram::Sync
        }
    }
}

fn do_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(!cli.nocolor);

    let settings = Settings::load()?;
    let nocolor = cli.nocolor || settings.nocolor;
    if nocolor {
        disable_color();
    }

    let options = SyncOptions {
        program: cli.program(),
        layman_sync: cli.layman_sync,
        verbosity: if cli.quiet {
            Verbosity::Quiet
        } else if cli.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        },
        nospinner: cli.nospinner || cli.quiet,
        show_titles: !nocolor && settings.show_titles(),
    };
    sync(&settings, &options, &mut std::io::stdout().lock())?;
    Ok(())
}

fn main() -> std::process::ExitCode {
    cli_main(do_main)
}
