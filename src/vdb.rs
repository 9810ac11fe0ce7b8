use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::atom::{split_pf, PackageVersion};
use crate::error::{Error, Result};

/// Computes the installed package database directory under `root`.
pub fn get_vdb_root(root: &Path) -> PathBuf {
    root.join("var/db/pkg")
}

/// Versions of installed packages, read from the VDB.
#[derive(Debug, Default)]
pub struct InstalledDb {
    packages: BTreeMap<String, Vec<PackageVersion>>,
}

impl InstalledDb {
    /// Load `<root>/var/db/pkg`.
    ///
    /// A missing VDB is an empty one. Entries that are being merged
    /// (`-MERGING-` prefix) or whose names do not parse are ignored.
    pub fn load(root: &Path) -> Result<Self> {
        let vdb = get_vdb_root(root);
        let mut db = InstalledDb::default();
        if !vdb.is_dir() {
            tracing::debug!("no installed package database at {}", vdb.display());
            return Ok(db);
        }

        for entry in WalkDir::new(&vdb).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&vdb).to_path_buf();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let pf = entry.file_name().to_string_lossy();
            if pf.starts_with("-MERGING-") {
                continue;
            }
            let Some(category) = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|c| c.to_string_lossy().into_owned())
            else {
                continue;
            };
            let Some((package, version)) = split_pf(&pf) else {
                tracing::warn!("ignoring unexpected VDB entry {}", entry.path().display());
                continue;
            };
            db.insert(&format!("{category}/{package}"), version);
        }
        Ok(db)
    }

    fn insert(&mut self, cpn: &str, version: &str) {
        match PackageVersion::new(cpn, version) {
            Ok(version) => self
                .packages
                .entry(cpn.to_string())
                .or_default()
                .push(version),
            Err(e) => tracing::warn!("ignoring installed {cpn}-{version}: {e}"),
        }
    }

    /// Highest installed version of `category/package`.
    pub fn best_installed(&self, cpn: &str) -> Option<&PackageVersion> {
        PackageVersion::best(self.packages.get(cpn)?)
    }

    /// Whether any version of `category/package` is installed.
    pub fn is_installed(&self, cpn: &str) -> bool {
        self.packages.contains_key(cpn)
    }

    /// Number of installed packages (not versions).
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, cpf: &str) {
        let dir = get_vdb_root(root).join(cpf);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SLOT"), "0\n").unwrap();
    }

    #[test]
    fn missing_vdb_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let db = InstalledDb::load(root.path()).unwrap();
        assert!(db.is_empty());
        assert!(db.best_installed("app-editors/vim").is_none());
    }

    #[test]
    fn picks_highest_installed_slot() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "dev-lang/python-3.11.8");
        install(root.path(), "dev-lang/python-3.12.2_p1");
        install(root.path(), "app-editors/vim-9.0.2167-r1");

        let db = InstalledDb::load(root.path()).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(
            db.best_installed("dev-lang/python").unwrap().as_str(),
            "3.12.2_p1"
        );
        assert_eq!(
            db.best_installed("app-editors/vim").unwrap().to_string(),
            "9.0.2167-r1"
        );
        assert!(db.is_installed("app-editors/vim"));
        assert!(!db.is_installed("app-editors/emacs"));
    }

    #[test]
    fn merging_entries_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "app-misc/foo-1.0");
        install(root.path(), "app-misc/-MERGING-foo-1.1");
        let db = InstalledDb::load(root.path()).unwrap();
        assert_eq!(db.best_installed("app-misc/foo").unwrap().as_str(), "1.0");
    }
}
