//! Search Gentoo packages through a flat-file index of the Portage tree.
//!
//! The index is built by reading the `md5-cache` of the main repository
//! and its overlays ([PMS]), the `DIST` entries of package Manifests and
//! the installed package database. Searching it is a linear scan, which
//! is much faster than asking Portage.
//!
//! [PMS]: https://projects.gentoo.org/pms/latest/pms.html
//!
//! # Overview
//!
//! * [`update_index`] rebuilds the index (`eupdatedb`).
//! * [`search`] matches packages against regular expressions and prints
//!   them (`esearch`).
//! * [`sync`] runs the sync program, rebuilds the index and reports what
//!   changed (`esync`).
//!
//! All three read their configuration through [`Settings`].
//!
//! # Examples
//!
//! Parse a cache entry:
//!
//! ```
//! use esearch::{AcceptKeywords, CacheEntry};
//!
//! let input = "\
//! EAPI=8
//! DESCRIPTION=Example package
//! SLOT=0
//! KEYWORDS=~amd64
//! ";
//! let entry = CacheEntry::parse(input).unwrap();
//! assert_eq!(entry.metadata.description, "Example package");
//!
//! let accept = AcceptKeywords::new(["amd64"]);
//! assert!(!accept.accepts(&entry.metadata.keywords));
//! ```

mod atom;
mod cache;
mod cli;
mod config;
mod error;
mod index;
mod keyword;
mod logging;
mod makeconf;
mod manifest;
mod metadata;
mod output;
mod repository;
mod search;
mod src_uri;
mod sync;
mod update;
mod vdb;

pub use atom::{display_version, split_cpn, split_pf, PackageVersion};
pub use cache::CacheEntry;
pub use cli::cli_main;
pub use config::{ReposConf, Settings, INDEX_FILE_NAME};
pub use error::{Error, Result};
pub use index::{Index, IndexWriter, PackageRecord, VersionRecord, INDEX_VERSION, NO_DIGEST};
pub use keyword::{AcceptKeywords, Keyword, Stability};
pub use logging::{init_logging, LOG_ENV};
pub use makeconf::{load_make_conf, merge_incremental_tokens, parse_make_conf};
pub use manifest::Manifest;
pub use metadata::EbuildMetadata;
pub use output::{disable_color, eerror, emsg, ewarn, format_duration, format_size, xterm_title};
pub use repository::{Ebuild, Repository, RepositorySet};
pub use search::{
    compile_pattern, find, search, write_compact, write_normal, OutputMode, OwnFormat,
    SearchOptions,
};
pub use src_uri::{Distfile, SrcUriEntry, UriRestriction};
pub use sync::{changed_packages, run_logged, sync, SyncOptions, SyncProgram};
pub use update::{build_record, update_index, UpdateOptions, UpdateStats, Verbosity};
pub use vdb::{get_vdb_root, InstalledDb};
