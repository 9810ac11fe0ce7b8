use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;

use crate::atom::{split_cpn, PackageVersion};
use crate::cache::CacheEntry;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::index::{Index, IndexWriter, PackageRecord, VersionRecord, NO_DIGEST};
use crate::keyword::AcceptKeywords;
use crate::manifest::Manifest;
use crate::output::{self, format_duration, format_size};
use crate::repository::{Ebuild, RepositorySet};
use crate::src_uri::SrcUriEntry;
use crate::vdb::InstalledDb;

/// How much `eupdatedb` prints while indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Only the summary.
    Quiet,
    /// A countdown of the packages left.
    #[default]
    Normal,
    /// Every category with the time spent on it.
    Verbose,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub verbosity: Verbosity,
}

/// What a completed rebuild produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    /// Packages considered.
    pub packages: usize,
    /// Records written.
    pub indexed: usize,
    /// Size of the index file in bytes.
    pub index_size: u64,
    pub elapsed: Duration,
}

/// Build the index record of `category/package`.
///
/// The record describes the best visible version; when nothing is visible
/// it describes the best version overall and is flagged masked. Returns
/// `None` when the package has no versions.
pub fn build_record(
    repos: &RepositorySet,
    installed: &InstalledDb,
    accept: &AcceptKeywords,
    cpn: &str,
) -> Option<PackageRecord> {
    let (_, name) = match split_cpn(cpn) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!("skipping {cpn}: {e}");
            return None;
        }
    };

    let mut candidates: Vec<(Ebuild, Option<CacheEntry>, bool)> = repos
        .ebuilds(cpn)
        .into_iter()
        .map(|ebuild| match ebuild.metadata() {
            Ok(entry) => {
                let visible = accept.accepts(&entry.metadata.keywords);
                (ebuild, Some(entry), visible)
            }
            Err(e) => {
                tracing::warn!("{cpn}-{}: {e}", ebuild.version.as_str());
                (ebuild, None, false)
            }
        })
        .collect();
    candidates.sort_by(|a, b| a.0.version.cmp(b.0.version));

    let best_visible = candidates.iter().rposition(|(_, _, visible)| *visible);
    let masked = best_visible.is_none();
    let best = best_visible.or(candidates.len().checked_sub(1))?;
    let (ebuild, entry, _) = &candidates[best];

    let (homepage, description, license, size) = match entry {
        Some(entry) => {
            let m = &entry.metadata;
            (
                m.homepage.join(" "),
                m.description.clone(),
                m.license.clone(),
                fetch_size(ebuild, &m.src_uri),
            )
        }
        None => (
            String::new(),
            String::new(),
            String::new(),
            NO_DIGEST.to_string(),
        ),
    };

    let versions = candidates
        .iter()
        .map(|(ebuild, entry, visible)| VersionRecord {
            version: ebuild.version.to_string(),
            slot: entry
                .as_ref()
                .map(|e| e.metadata.slot.to_string())
                .unwrap_or_default(),
            masked: !visible,
            repository: ebuild.repo.name().to_string(),
        })
        .collect();

    Some(PackageRecord {
        name,
        cpn: cpn.to_string(),
        masked,
        version: ebuild.version.to_string(),
        installed: installed.best_installed(cpn).map(PackageVersion::to_string),
        size,
        homepage,
        description,
        license,
        repository: ebuild.repo.name().to_string(),
        ebuild: ebuild.ebuild_path(),
        versions,
    })
}

/// Download size of the distfiles of `ebuild`, as listed in its Manifest.
fn fetch_size(ebuild: &Ebuild, src_uri: &[SrcUriEntry]) -> String {
    let distfiles = SrcUriEntry::distfiles(src_uri);
    if distfiles.is_empty() {
        return format_size(0);
    }
    match Manifest::load(&ebuild.package_dir()) {
        Ok(Some(manifest)) => manifest
            .distfiles_size(&distfiles)
            .map(format_size)
            .unwrap_or_else(|| NO_DIGEST.to_string()),
        Ok(None) => NO_DIGEST.to_string(),
        Err(e) => {
            tracing::debug!("{}: {e}", ebuild.cpn);
            NO_DIGEST.to_string()
        }
    }
}

/// Rebuild the index from the configured repositories.
///
/// Progress and the final summary go to `out`. SIGINT or SIGTERM stop the
/// rebuild with [`Error::Interrupted`], leaving the previous index and no
/// temporary file behind; a second signal exits at once.
pub fn update_index<W: Write>(
    settings: &Settings,
    options: &UpdateOptions,
    out: &mut W,
) -> Result<UpdateStats> {
    let interrupt = InterruptFlag::register()?;
    update_index_with(settings, options, out, &interrupt.flag)
}

/// Set while SIGINT or SIGTERM has been received. Handlers are removed on
/// drop.
struct InterruptFlag {
    flag: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl InterruptFlag {
    fn register() -> Result<Self> {
        let mut interrupt = InterruptFlag {
            flag: Arc::new(AtomicBool::new(false)),
            ids: Vec::new(),
        };
        for signal in [SIGINT, SIGTERM] {
            // Registered first, so it only fires once the flag is already set.
            let shutdown = signal_hook::flag::register_conditional_shutdown(
                signal,
                130,
                Arc::clone(&interrupt.flag),
            )
            .map_err(Error::SignalHandler)?;
            interrupt.ids.push(shutdown);
            let id = signal_hook::flag::register(signal, Arc::clone(&interrupt.flag))
                .map_err(Error::SignalHandler)?;
            interrupt.ids.push(id);
        }
        Ok(interrupt)
    }
}

impl Drop for InterruptFlag {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

fn update_index_with<W: Write>(
    settings: &Settings,
    options: &UpdateOptions,
    out: &mut W,
    interrupted: &AtomicBool,
) -> Result<UpdateStats> {
    let start = Instant::now();
    let io_err = |e| Error::io("<stdout>", e);

    std::fs::create_dir_all(&settings.index_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Error::NotWritable(settings.index_dir.clone()),
        _ => Error::io(&settings.index_dir, e),
    })?;

    if options.verbosity != Verbosity::Quiet && settings.accept_keywords_from_env {
        output::ewarn(
            out,
            "You have set ACCEPT_KEYWORDS in environment, this will result\n         in a modified index file",
        )
        .map_err(io_err)?;
    }

    let writer = IndexWriter::create(&settings.lock_path(), &settings.index_path())?;
    let repos = RepositorySet::load(&settings.repository_paths())?;
    let installed = InstalledDb::load(&settings.eroot())?;
    tracing::debug!(
        "indexing {} packages from {} repositories, {} installed",
        repos.len(),
        repos.repos().len(),
        installed.len()
    );

    let mut progress = Progress::new(options.verbosity, repos.len());
    progress.begin(out).map_err(io_err)?;

    let mut records = Vec::with_capacity(repos.len());
    for cpn in repos.cp_all() {
        if interrupted.load(Ordering::Relaxed) {
            tracing::debug!("interrupted before {cpn}");
            return Err(Error::Interrupted);
        }
        progress.step(out, cpn).map_err(io_err)?;
        if let Some(record) = build_record(&repos, &installed, &settings.accept_keywords, cpn) {
            records.push(record);
        }
    }
    progress.finish(out).map_err(io_err)?;

    let main_repository = repos.main().map(|r| r.name()).unwrap_or("gentoo");
    let indexed = records.len();
    let index_size = writer.commit(&Index::new(main_repository, records))?;

    let stats = UpdateStats {
        packages: repos.len(),
        indexed,
        index_size,
        elapsed: start.elapsed(),
    };
    print_summary(out, &stats).map_err(io_err)?;
    Ok(stats)
}

fn print_summary<W: Write>(out: &mut W, stats: &UpdateStats) -> std::io::Result<()> {
    output::emsg(
        out,
        &format!("esearch-index generated in {}", format_duration(stats.elapsed)),
    )?;
    output::emsg(
        out,
        &format!("indexed {} ebuilds", stats.packages.to_string().bold()),
    )?;
    output::emsg(
        out,
        &format!(
            "size of esearch-index: {}",
            format!("{} kB", stats.index_size / 1024).bold()
        ),
    )
}

/// Countdown or per-category progress reporting.
struct Progress {
    verbosity: Verbosity,
    remaining: usize,
    last_width: usize,
    category: Option<String>,
    category_start: Instant,
}

impl Progress {
    fn new(verbosity: Verbosity, total: usize) -> Self {
        Progress {
            verbosity,
            remaining: total,
            last_width: 0,
            category: None,
            category_start: Instant::now(),
        }
    }

    fn begin<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        if self.verbosity == Verbosity::Normal {
            write!(out, "{}indexing: ", " * ".green())?;
            out.flush()?;
        }
        Ok(())
    }

    fn step<W: Write>(&mut self, out: &mut W, cpn: &str) -> std::io::Result<()> {
        self.remaining = self.remaining.saturating_sub(1);
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            Verbosity::Normal => {
                let text = format!("{} ebuilds to go", self.remaining);
                write!(out, "{}{text}", "\x08 \x08".repeat(self.last_width))?;
                self.last_width = text.len();
                out.flush()
            }
            Verbosity::Verbose => {
                let category = cpn.split_once('/').map_or(cpn, |(c, _)| c);
                if self.category.as_deref() == Some(category) {
                    return Ok(());
                }
                self.end_category(out)?;
                write!(out, "{} ", format!(" * {category}:").bold())?;
                out.flush()?;
                self.category = Some(category.to_string());
                self.category_start = Instant::now();
                Ok(())
            }
        }
    }

    fn end_category<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        if self.category.take().is_some() {
            writeln!(out, "{}", format_duration(self.category_start.elapsed()))?;
        }
        Ok(())
    }

    fn finish<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            Verbosity::Normal => writeln!(out),
            Verbosity::Verbose => self.end_category(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::repository::tests::{add_cache_entry, set_repo_name};

    fn install(root: &Path, cpf: &str) {
        std::fs::create_dir_all(root.join("var/db/pkg").join(cpf)).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: Settings,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        set_repo_name(&repo, "gentoo");
        add_cache_entry(
            &repo,
            "app-editors/vim",
            "9.0.2167",
            "DESCRIPTION=Vim, an improved vi-style text editor\nSLOT=0\nKEYWORDS=amd64 x86\n\
             HOMEPAGE=https://www.vim.org\nLICENSE=vim\n\
             SRC_URI=https://github.com/vim/vim/archive/v9.0.2167.tar.gz -> vim-9.0.2167.tar.gz\n",
        );
        add_cache_entry(
            &repo,
            "app-editors/vim",
            "9.1.0",
            "DESCRIPTION=Vim, an improved vi-style text editor\nSLOT=0\nKEYWORDS=~amd64\n",
        );
        std::fs::write(
            repo.join("app-editors/vim/Manifest"),
            "DIST vim-9.0.2167.tar.gz 17489219 BLAKE2B 00 SHA512 00\n",
        )
        .unwrap();
        add_cache_entry(
            &repo,
            "dev-lang/rust",
            "1.77.0",
            "DESCRIPTION=Systems programming language\nSLOT=stable/1.77\nKEYWORDS=~amd64\n\
             SRC_URI=https://static.rust-lang.org/dist/rustc-1.77.0-src.tar.xz\n",
        );
        add_cache_entry(
            &repo,
            "dev-lang/rust",
            "1.76.0",
            "DESCRIPTION=Systems programming language\nSLOT=stable/1.76\nKEYWORDS=~amd64\n",
        );
        add_cache_entry(
            &repo,
            "virtual/editor",
            "0-r1",
            "DESCRIPTION=Virtual for editor\nSLOT=0\nKEYWORDS=amd64\n",
        );

        let root = dir.path().join("root");
        install(&root, "app-editors/vim-9.0.2167");
        install(&root, "virtual/editor-0-r1");

        let env = std::collections::HashMap::from([(
            "PORTAGE_CONFIGROOT".to_string(),
            dir.path().join("config").to_string_lossy().into_owned(),
        )]);
        let mut settings = Settings::load_with_env(&env).unwrap();
        settings.portdir = repo;
        settings.root = root;
        settings.index_dir = dir.path().join("edb");
        settings.accept_keywords = AcceptKeywords::new(["amd64"]);
        Fixture {
            _dir: dir,
            settings,
        }
    }

    #[test]
    fn records_follow_visibility() {
        let fx = fixture();
        let repos = RepositorySet::load(&fx.settings.repository_paths()).unwrap();
        let installed = InstalledDb::load(&fx.settings.root).unwrap();
        let accept = &fx.settings.accept_keywords;

        let vim = build_record(&repos, &installed, accept, "app-editors/vim").unwrap();
        assert_eq!(vim.name, "vim");
        assert!(!vim.masked);
        assert_eq!(vim.version, "9.0.2167");
        assert_eq!(vim.installed.as_deref(), Some("9.0.2167"));
        assert_eq!(vim.size, "17,079 kB");
        assert_eq!(vim.homepage, "https://www.vim.org");
        assert_eq!(vim.license, "vim");
        assert_eq!(vim.repository, "gentoo");
        assert!(vim.ebuild.ends_with("app-editors/vim/vim-9.0.2167.ebuild"));
        assert_eq!(vim.versions.len(), 2);
        assert!(vim.versions[1].masked);

        let rust = build_record(&repos, &installed, accept, "dev-lang/rust").unwrap();
        assert!(rust.masked);
        assert_eq!(rust.version, "1.77.0");
        assert_eq!(rust.installed, None);
        assert_eq!(rust.size, NO_DIGEST);
        assert_eq!(rust.versions[0].slot, "stable/1.76");

        let virt = build_record(&repos, &installed, accept, "virtual/editor").unwrap();
        assert_eq!(virt.version, "0-r1");
        assert_eq!(virt.size, "0 kB");

        assert!(build_record(&repos, &installed, accept, "app-misc/none").is_none());
    }

    #[test]
    fn update_writes_index() {
        colored::control::set_override(false);
        let fx = fixture();
        let mut out = Vec::new();
        let options = UpdateOptions {
            verbosity: Verbosity::Quiet,
        };
        let stats = update_index(&fx.settings, &options, &mut out).unwrap();
        assert_eq!(stats.packages, 3);
        assert_eq!(stats.indexed, 3);
        assert!(!fx.settings.lock_path().exists());

        let index = Index::load(&fx.settings.index_path()).unwrap();
        assert_eq!(index.main_repository, "gentoo");
        let names: Vec<_> = index.packages.iter().map(|p| p.cpn.as_str()).collect();
        assert_eq!(names, vec!["app-editors/vim", "dev-lang/rust", "virtual/editor"]);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(" * esearch-index generated in "));
        assert!(text.contains(" * indexed 3 ebuilds\n"));
    }

    #[test]
    fn verbose_lists_categories() {
        colored::control::set_override(false);
        let fx = fixture();
        let mut out = Vec::new();
        let options = UpdateOptions {
            verbosity: Verbosity::Verbose,
        };
        update_index(&fx.settings, &options, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(" * app-editors: 0 second(s)\n"));
        assert!(text.contains(" * virtual: 0 second(s)\n"));
    }

    #[test]
    fn installed_packages_under_eprefix() {
        let mut fx = fixture();
        let root = fx.settings.root.clone();
        fx.settings.eprefix = "/prefix".into();
        install(&root.join("prefix"), "dev-lang/rust-1.76.0");

        let quiet = UpdateOptions {
            verbosity: Verbosity::Quiet,
        };
        update_index(&fx.settings, &quiet, &mut Vec::new()).unwrap();
        let index = Index::load(&fx.settings.index_path()).unwrap();
        let installed = |cpn: &str| index.get(cpn).unwrap().installed.clone();
        assert_eq!(installed("dev-lang/rust").as_deref(), Some("1.76.0"));
        // Only present in ROOT, not in ROOT + EPREFIX.
        assert_eq!(installed("app-editors/vim"), None);
    }

    #[test]
    fn unreadable_entry_has_no_digest() {
        let fx = fixture();
        add_cache_entry(&fx.settings.portdir, "app-misc/broken", "1.0", "SLOT=0\n");
        let repos = RepositorySet::load(&fx.settings.repository_paths()).unwrap();
        let record = build_record(
            &repos,
            &InstalledDb::default(),
            &fx.settings.accept_keywords,
            "app-misc/broken",
        )
        .unwrap();
        assert!(record.masked);
        assert_eq!(record.version, "1.0");
        assert_eq!(record.size, NO_DIGEST);
        assert!(record.description.is_empty());
    }

    #[test]
    fn interrupted_run_leaves_no_lock() {
        let fx = fixture();
        let interrupted = AtomicBool::new(true);
        let err = update_index_with(
            &fx.settings,
            &UpdateOptions::default(),
            &mut Vec::new(),
            &interrupted,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert!(!fx.settings.lock_path().exists());
        assert!(!fx.settings.index_path().exists());
    }

    #[test]
    fn refuses_to_run_twice() {
        let fx = fixture();
        std::fs::create_dir_all(&fx.settings.index_dir).unwrap();
        std::fs::write(fx.settings.lock_path(), "").unwrap();
        let err = update_index(&fx.settings, &UpdateOptions::default(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::Locked(_)));
        assert!(fx.settings.lock_path().exists());
    }
}
