use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format version of the index file. Older indexes must be regenerated.
pub const INDEX_VERSION: u32 = 64;

/// Shown instead of a size when the Manifest cannot account for the
/// package's distfiles.
pub const NO_DIGEST: &str = "[no/bad digest]";

/// One available version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub slot: String,
    pub masked: bool,
    pub repository: String,
}

/// Everything the index knows about one `category/package`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package name without category.
    pub name: String,
    /// `category/package`.
    pub cpn: String,
    /// No version is visible with the current `ACCEPT_KEYWORDS`.
    pub masked: bool,
    /// Best visible version, or best version overall when masked.
    pub version: String,
    /// Highest installed version.
    pub installed: Option<String>,
    /// Download size, e.g. `"1,234 kB"`, or [`NO_DIGEST`].
    pub size: String,
    pub homepage: String,
    pub description: String,
    pub license: String,
    /// Repository providing [`PackageRecord::version`].
    pub repository: String,
    /// Path of the ebuild providing [`PackageRecord::version`].
    pub ebuild: PathBuf,
    /// Every available version, lowest first.
    pub versions: Vec<VersionRecord>,
}

impl PackageRecord {
    /// The category half of [`PackageRecord::cpn`].
    pub fn category(&self) -> &str {
        self.cpn.split_once('/').map_or("", |(c, _)| c)
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_some()
    }

    /// Installed, but not at the version the index would pick.
    pub fn has_update(&self) -> bool {
        self.installed
            .as_deref()
            .is_some_and(|installed| installed != self.version)
    }

    /// Whether the record comes from an overlay rather than `main_repo`.
    pub fn from_overlay(&self, main_repo: &str) -> bool {
        self.repository != main_repo
    }
}

/// The whole index, sorted by `category/package`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub dbversion: u32,
    /// Name of the main repository when the index was built.
    pub main_repository: String,
    pub packages: Vec<PackageRecord>,
}

impl Index {
    pub fn new(main_repository: impl Into<String>, packages: Vec<PackageRecord>) -> Self {
        Index {
            dbversion: INDEX_VERSION,
            main_repository: main_repository.into(),
            packages,
        }
    }

    /// Read the index at `path`.
    ///
    /// Fails with [`Error::IndexMissing`] when there is no file and with
    /// [`Error::IndexOutOfDate`] when it was written by an older format.
    pub fn load(path: &Path) -> Result<Index> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::IndexMissing(path.to_path_buf()))
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        let value: serde_json::Value =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::IndexFormat {
                path: path.to_path_buf(),
                source,
            })?;

        let found = value
            .get("dbversion")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found < INDEX_VERSION {
            return Err(Error::IndexOutOfDate {
                found,
                needed: INDEX_VERSION,
            });
        }

        serde_json::from_value(value).map_err(|source| Error::IndexFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Look up a package by `category/package`.
    pub fn get(&self, cpn: &str) -> Option<&PackageRecord> {
        self.packages
            .binary_search_by(|p| p.cpn.as_str().cmp(cpn))
            .ok()
            .map(|i| &self.packages[i])
    }
}

/// Writes a new index next to the live one and swaps it in on commit.
///
/// Creating the writer fails with [`Error::Locked`] while another writer
/// holds the temporary file. An uncommitted writer removes it on drop.
pub struct IndexWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl IndexWriter {
    pub fn create(tmp_path: &Path, final_path: &Path) -> Result<IndexWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::Locked(tmp_path.to_path_buf()),
                ErrorKind::PermissionDenied => Error::NotWritable(
                    tmp_path.parent().unwrap_or(tmp_path).to_path_buf(),
                ),
                _ => Error::io(tmp_path, e),
            })?;
        Ok(IndexWriter {
            tmp_path: tmp_path.to_path_buf(),
            final_path: final_path.to_path_buf(),
            file: Some(BufWriter::new(file)),
        })
    }

    /// Serialise `index` and move it into place. Returns the size in bytes
    /// of the written file.
    pub fn commit(mut self, index: &Index) -> Result<u64> {
        let Some(mut file) = self.file.take() else {
            return Err(Error::Locked(self.tmp_path.clone()));
        };
        serde_json::to_writer(&mut file, index).map_err(|source| Error::IndexFormat {
            path: self.tmp_path.clone(),
            source,
        })?;
        file.flush().map_err(|e| Error::io(&self.tmp_path, e))?;
        drop(file);

        std::fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|e| Error::io(&self.final_path, e))?;
        let size = std::fs::metadata(&self.final_path)
            .map_err(|e| Error::io(&self.final_path, e))?
            .len();
        Ok(size)
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        // Still present unless commit() renamed it away.
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {e}", self.tmp_path.display());
            }
        }
    }
}
