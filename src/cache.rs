use std::path::Path;

use portage_atom::Slot;

use crate::error::{Error, Result};
use crate::keyword::Keyword;
use crate::metadata::EbuildMetadata;
use crate::src_uri::SrcUriEntry;

/// A parsed md5-cache entry.
///
/// Represents a single file from `metadata/md5-cache/<category>/<package>-<version>`.
///
/// See [PMS 14.2](https://projects.gentoo.org/pms/9/pms.html#mddict-cache-file-format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The ebuild metadata.
    pub metadata: EbuildMetadata,

    /// MD5 checksum of the ebuild file (from `_md5_`).
    pub md5: Option<String>,
}

impl CacheEntry {
    /// Parse a md5-cache file's contents into a `CacheEntry`.
    ///
    /// Lines are `KEY=VALUE` pairs in arbitrary order. Keys the index has
    /// no use for (dependencies, IUSE, phases...) are skipped without being
    /// validated.
    ///
    /// # Examples
    ///
    /// ```
    /// use esearch::CacheEntry;
    ///
    /// let input = "\
    /// EAPI=8
    /// DESCRIPTION=Example package
    /// SLOT=0
    /// KEYWORDS=~amd64
    /// ";
    /// let entry = CacheEntry::parse(input).unwrap();
    /// assert_eq!(entry.metadata.description, "Example package");
    /// ```
    pub fn parse(input: &str) -> Result<CacheEntry> {
        let mut description = None;
        let mut slot = None;
        let mut homepage = "";
        let mut src_uri = "";
        let mut license = "";
        let mut keywords = "";
        let mut md5 = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::InvalidCacheEntry(format!(
                    "expected KEY=VALUE, got {line:?}"
                )));
            };
            match key {
                "DESCRIPTION" => description = Some(value),
                "SLOT" => slot = Some(value),
                "HOMEPAGE" => homepage = value,
                "SRC_URI" => src_uri = value,
                "LICENSE" => license = value,
                "KEYWORDS" => keywords = value,
                "_md5_" => md5 = Some(value.to_string()),
                _ => {}
            }
        }

        let description =
            description.ok_or_else(|| Error::MissingField("DESCRIPTION".to_string()))?;
        let slot = parse_slot(slot.unwrap_or_default())?;

        Ok(CacheEntry {
            metadata: EbuildMetadata {
                description: description.to_string(),
                slot,
                homepage: homepage.split_whitespace().map(str::to_string).collect(),
                src_uri: SrcUriEntry::parse(src_uri)?,
                license: license.to_string(),
                keywords: Keyword::parse_line(keywords)?,
            },
            md5,
        })
    }

    /// Read and parse the cache file at `path`.
    pub fn load(path: &Path) -> Result<CacheEntry> {
        let input = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        CacheEntry::parse(&input)
    }
}

/// Parse a SLOT value into a `Slot`.
fn parse_slot(s: &str) -> Result<Slot> {
    if s.is_empty() {
        return Err(Error::MissingField("SLOT".to_string()));
    }
    if let Some((slot, subslot)) = s.split_once('/') {
        Ok(Slot::with_subslot(slot, subslot))
    } else {
        Ok(Slot::new(s))
    }
}
