use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::atom::{split_pf, PackageVersion};
use crate::cache::CacheEntry;
use crate::error::{Error, Result};

/// An ebuild repository with a generated metadata cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    name: String,
    path: PathBuf,
}

impl Repository {
    /// Open the repository rooted at `path`.
    ///
    /// The name comes from `profiles/repo_name`, falling back to the
    /// directory name.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name_file = path.join("profiles/repo_name");
        let name = match std::fs::read_to_string(&name_file) {
            Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
            Ok(_) => dir_name(&path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => dir_name(&path),
            Err(e) => return Err(Error::io(name_file, e)),
        };
        Ok(Repository { name, path })
    }

    /// The repository name, e.g. `gentoo`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The repository root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `metadata/md5-cache` under the repository root.
    pub fn cache_dir(&self) -> PathBuf {
        self.path.join("metadata/md5-cache")
    }

    /// Directory holding the ebuilds and Manifest of `category/package`.
    pub fn package_dir(&self, cpn: &str) -> PathBuf {
        self.path.join(cpn)
    }

    /// Path of the ebuild for `category/package-version`.
    pub fn ebuild_path(&self, cpn: &str, version: &str) -> PathBuf {
        let package = cpn.rsplit('/').next().unwrap_or(cpn);
        self.package_dir(cpn)
            .join(format!("{package}-{version}.ebuild"))
    }

    /// Read the cache entry of `category/package-version`.
    pub fn metadata(&self, cpn: &str, version: &str) -> Result<CacheEntry> {
        CacheEntry::load(&self.cache_dir().join(format!("{cpn}-{version}")))
    }

    /// Walk the metadata cache and collect the versions of every package.
    ///
    /// Cache files whose names do not carry a valid version are skipped
    /// with a warning.
    pub fn scan(&self) -> Result<BTreeMap<String, Vec<PackageVersion>>> {
        let dir = self.cache_dir();
        let mut packages: BTreeMap<String, Vec<PackageVersion>> = BTreeMap::new();
        for entry in WalkDir::new(&dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&dir).to_path_buf();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let pf = entry.file_name().to_string_lossy();
            let category = entry
                .path()
                .parent()
                .map(dir_name)
                .unwrap_or_default();
            let Some((package, version)) = split_pf(&pf) else {
                tracing::warn!("skipping {}: no version in cache file name", entry.path().display());
                continue;
            };
            let cpn = format!("{category}/{package}");
            match PackageVersion::new(&cpn, version) {
                Ok(version) => packages.entry(cpn).or_default().push(version),
                Err(e) => tracing::warn!("skipping {}: {e}", entry.path().display()),
            }
        }
        tracing::debug!(
            "repository {} has {} packages in its cache",
            self.name,
            packages.len()
        );
        Ok(packages)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One version of a package in a given repository.
#[derive(Debug, Clone, Copy)]
pub struct Ebuild<'a> {
    /// The repository providing this version.
    pub repo: &'a Repository,
    /// `category/package`.
    pub cpn: &'a str,
    pub version: &'a PackageVersion,
}

impl Ebuild<'_> {
    /// Read this version's md5-cache entry.
    pub fn metadata(&self) -> Result<CacheEntry> {
        self.repo.metadata(self.cpn, self.version.as_str())
    }

    /// Path of the `.ebuild` file.
    pub fn ebuild_path(&self) -> PathBuf {
        self.repo.ebuild_path(self.cpn, self.version.as_str())
    }

    /// Directory holding the ebuild and its `Manifest`.
    pub fn package_dir(&self) -> PathBuf {
        self.repo.package_dir(self.cpn)
    }
}

/// The main repository followed by its overlays.
///
/// When two repositories provide the same version of a package, the one
/// listed later wins, as Portage does for `PORTDIR_OVERLAY`.
#[derive(Debug, Default)]
pub struct RepositorySet {
    repos: Vec<Repository>,
    packages: BTreeMap<String, Vec<(usize, PackageVersion)>>,
}

impl RepositorySet {
    /// Open and scan the repositories at `paths`, the main one first.
    ///
    /// Repositories without a metadata cache are skipped with a warning
    /// because their ebuilds would have to be sourced.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut set = RepositorySet::default();
        for path in paths {
            let repo = Repository::open(path.as_ref())?;
            if !repo.cache_dir().is_dir() {
                tracing::warn!(
                    "repository {} at {} has no metadata cache, skipping it",
                    repo.name(),
                    repo.path().display()
                );
                continue;
            }
            set.add(repo)?;
        }
        Ok(set)
    }

    fn add(&mut self, repo: Repository) -> Result<()> {
        let index = self.repos.len();
        for (cpn, versions) in repo.scan()? {
            let known = self.packages.entry(cpn).or_default();
            for version in versions {
                known.retain(|(_, v)| v.as_str() != version.as_str());
                known.push((index, version));
            }
        }
        self.repos.push(repo);
        Ok(())
    }

    pub fn repos(&self) -> &[Repository] {
        &self.repos
    }

    /// The main repository, if it could be opened.
    pub fn main(&self) -> Option<&Repository> {
        self.repos.first()
    }

    /// Every `category/package`, sorted and unique.
    pub fn cp_all(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All known versions of `category/package`.
    pub fn ebuilds<'a>(&'a self, cpn: &str) -> Vec<Ebuild<'a>> {
        let Some((cpn, versions)) = self.packages.get_key_value(cpn) else {
            return Vec::new();
        };
        versions
            .iter()
            .map(|(repo, version)| Ebuild {
                repo: &self.repos[*repo],
                cpn: cpn.as_str(),
                version,
            })
            .collect()
    }
}
