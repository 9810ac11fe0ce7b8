use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::index::{Index, PackageRecord};
use crate::output;
use crate::search::write_compact;
use crate::update::{update_index, UpdateOptions, Verbosity};

/// The command that refreshes the main repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncProgram {
    /// `emerge --sync`
    #[default]
    Sync,
    /// `emerge-webrsync`
    WebRsync,
    /// `emerge-delta-webrsync -u`
    DeltaWebRsync,
    /// `emerge --metadata`
    Metadata,
}

impl SyncProgram {
    pub fn argv(&self) -> &'static [&'static str] {
        match self {
            SyncProgram::Sync => &["emerge", "--sync"],
            SyncProgram::WebRsync => &["emerge-webrsync"],
            SyncProgram::DeltaWebRsync => &["emerge-delta-webrsync", "-u"],
            SyncProgram::Metadata => &["emerge", "--metadata"],
        }
    }
}

impl fmt::Display for SyncProgram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

const LAYMAN_SYNC: &[&str] = &["layman", "-S"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub program: SyncProgram,
    /// Run `layman -S` before the sync program.
    pub layman_sync: bool,
    pub verbosity: Verbosity,
    /// Hide the countdown while the index is rebuilt.
    pub nospinner: bool,
    /// Mirror status messages in the terminal title.
    pub show_titles: bool,
}

/// Run `argv` with its output going to `log`.
///
/// With `tee`, standard output is also copied to `out` while standard
/// error stays on the terminal. `EMERGE_DEFAULT_OPTS` is cleared for the
/// child.
pub fn run_logged<W: Write>(argv: &[&str], log: &Path, tee: bool, out: &mut W) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let command_line = argv.join(" ");
    tracing::debug!("running {command_line:?}, logging to {}", log.display());

    let log_file = File::create(log).map_err(|e| Error::io(log, e))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .env("EMERGE_DEFAULT_OPTS", "")
        .stdin(Stdio::null());

    let status = if tee {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::io(*program, e))?;
        if let Some(stdout) = child.stdout.take() {
            copy_tee(stdout, log_file, out).map_err(|e| Error::io(log, e))?;
        }
        child.wait().map_err(|e| Error::io(*program, e))?
    } else {
        let stderr = log_file.try_clone().map_err(|e| Error::io(log, e))?;
        command
            .stdout(log_file)
            .stderr(stderr)
            .status()
            .map_err(|e| Error::io(*program, e))?
    };

    if status.success() {
        Ok(())
    } else {
        tracing::debug!("{command_line:?} exited with {status}");
        Err(Error::CommandFailed {
            command: command_line,
            log: log.to_path_buf(),
        })
    }
}

fn copy_tee<R: Read, L: Write, W: Write>(mut from: R, mut log: L, out: &mut W) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        log.write_all(&buf[..n])?;
        out.write_all(&buf[..n])?;
        out.flush()?;
    }
    log.flush()
}

/// Packages of `new` that are absent from `old` or whose available
/// version changed, sorted by `category/package`.
pub fn changed_packages<'a>(old: &Index, new: &'a Index) -> Vec<&'a PackageRecord> {
    let mut changed: Vec<&PackageRecord> = new
        .packages
        .iter()
        .filter(|p| old.get(&p.cpn).map_or(true, |o| o.version != p.version))
        .collect();
    changed.sort_by(|a, b| a.cpn.cmp(&b.cpn));
    changed
}

/// Sync the repositories, rebuild the index and print what changed.
///
/// Returns the changed packages.
pub fn sync<W: Write>(
    settings: &Settings,
    options: &SyncOptions,
    out: &mut W,
) -> Result<Vec<PackageRecord>> {
    sync_with(settings, options, out, |argv, log, tee, out| {
        run_logged(argv, log, tee, out)
    })
}

struct Reporter {
    quiet: bool,
    show_titles: bool,
}

impl Reporter {
    fn emsg<W: Write>(&self, out: &mut W, msg: &str) -> Result<()> {
        self.write_status(out, msg)
            .map_err(|e| Error::io("<stdout>", e))
    }

    fn write_status<W: Write>(&self, out: &mut W, msg: &str) -> io::Result<()> {
        if self.show_titles {
            output::xterm_title(out, msg)?;
        }
        if self.quiet {
            return Ok(());
        }
        output::emsg(out, msg)
    }

    fn blank<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(out).map_err(|e| Error::io("<stdout>", e))
    }
}

fn sync_with<W, F>(
    settings: &Settings,
    options: &SyncOptions,
    out: &mut W,
    mut run: F,
) -> Result<Vec<PackageRecord>>
where
    W: Write,
    F: FnMut(&[&str], &Path, bool, &mut W) -> Result<()>,
{
    let reporter = Reporter {
        quiet: options.verbosity == Verbosity::Quiet,
        show_titles: options.show_titles,
    };
    let verbose = options.verbosity == Verbosity::Verbose;
    let index_path = settings.index_path();

    reporter.emsg(out, "Importing old portage tree")?;
    let old = Index::load(&index_path)?;

    if options.layman_sync {
        reporter.emsg(out, &format!("Doing '{}' now", LAYMAN_SYNC.join(" ")))?;
        run(LAYMAN_SYNC, &settings.layman_log, verbose, out)?;
    }

    reporter.emsg(out, &format!("Doing '{}' now", options.program))?;
    run(options.program.argv(), &settings.sync_log, verbose, out)?;

    reporter.blank(out)?;
    reporter.emsg(out, "Doing 'eupdatedb' now")?;
    reporter.blank(out)?;
    let update = UpdateOptions {
        verbosity: if options.nospinner {
            Verbosity::Quiet
        } else {
            options.verbosity
        },
    };
    update_index(settings, &update, out)?;
    reporter.blank(out)?;

    reporter.emsg(out, "Preparing databases")?;
    let new = Index::load(&index_path)?;

    reporter.emsg(out, "Searching for changes")?;
    reporter.blank(out)?;
    let changed = changed_packages(&old, &new);
    if changed.is_empty() {
        reporter.emsg(out, "No updates found")?;
    }
    for package in &changed {
        write_compact(out, package).map_err(|e| Error::io("<stdout>", e))?;
    }
    Ok(changed.into_iter().cloned().collect())
}
