use std::path::PathBuf;

/// Error type for index, search and sync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid keyword string.
    #[error("invalid keyword: {0}")]
    InvalidKeyword(String),

    /// Invalid SRC_URI expression.
    #[error("invalid SRC_URI: {0}")]
    InvalidSrcUri(String),

    /// Error parsing a metadata cache entry.
    #[error("invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    /// Malformed `DIST` line in a package Manifest.
    #[error("invalid Manifest: {0}")]
    InvalidManifest(String),

    /// Missing mandatory field in a cache entry.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Unparsable Portage configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A package or version name that does not follow the PMS grammar.
    #[error("invalid package name: {0}")]
    InvalidAtom(String),

    /// A search pattern that cannot be compiled even as a literal.
    #[error("invalid search pattern {0:?}: {1}")]
    InvalidPattern(String, #[source] regex::Error),

    /// Filesystem access failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The index file could not be read or written.
    #[error("malformed esearch index {}: {source}", path.display())]
    IndexFormat {
        /// Path of the index file.
        path: PathBuf,
        /// The underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },

    /// No index has been generated yet.
    #[error("could not find esearch index {}, please run eupdatedb as root first", .0.display())]
    IndexMissing(PathBuf),

    /// The index was written by an older format.
    #[error("the version of the esearch index is out of date (found {found}, need {needed}), please run eupdatedb")]
    IndexOutOfDate {
        /// Version stored in the file.
        found: u32,
        /// Version this build understands.
        needed: u32,
    },

    /// Another `eupdatedb` holds the temporary file.
    #[error("there is probably another eupdatedb running already, if you're sure there is no other process, remove {}", .0.display())]
    Locked(PathBuf),

    /// The index directory cannot be written.
    #[error("you do not have sufficient permissions to save the index file in {}", .0.display())]
    NotWritable(PathBuf),

    /// Indexing was stopped by SIGINT or SIGTERM.
    #[error("interrupted, the esearch index was not updated")]
    Interrupted,

    /// The SIGINT/SIGTERM handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] std::io::Error),

    /// An external command exited unsuccessfully.
    #[error("'{command}' failed, see {} for errors", log.display())]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Log file holding its output.
        log: PathBuf,
    },
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for esearch operations.
pub type Result<T> = std::result::Result<T, Error>;
