use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use portage_atom::{Cpn, Cpv, Version};
use regex::Regex;

use crate::error::{Error, Result};

/// PMS version grammar, anchored to the end of a `<package>-<version>` name.
///
/// See [PMS 3.2](https://projects.gentoo.org/pms/9/pms.html#version-specifications).
static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-([0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*(?:-r[0-9]+)?)$")
        .unwrap()
});

/// Split a `<package>-<version>` name (an md5-cache file or a VDB
/// directory) into its package and version parts.
///
/// # Examples
///
/// ```
/// use esearch::split_pf;
///
/// assert_eq!(split_pf("gtk+-3.24.41-r1"), Some(("gtk+", "3.24.41-r1")));
/// assert_eq!(split_pf("no-version"), None);
/// ```
pub fn split_pf(pf: &str) -> Option<(&str, &str)> {
    let caps = VERSION_SUFFIX_RE.captures(pf)?;
    let version = caps.get(1)?;
    let package = &pf[..version.start() - 1];
    if package.is_empty() {
        return None;
    }
    Some((package, version.as_str()))
}

/// Split `category/package` into its two halves.
pub fn split_cpn(cpn: &str) -> Result<(String, String)> {
    let parsed = Cpn::parse(cpn).map_err(|e| Error::InvalidAtom(format!("{cpn}: {e}")))?;
    Ok((parsed.category.to_string(), parsed.package.to_string()))
}

/// Drop a redundant `-r0` revision, as Portage prints versions.
pub fn display_version(version: &str) -> &str {
    version.strip_suffix("-r0").unwrap_or(version)
}

/// A version of a package as found on disk, ordered by PMS rules.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    raw: String,
    parsed: Version,
}

impl PackageVersion {
    /// Parse the version of `category/package-version`.
    pub fn new(cpn: &str, version: &str) -> Result<Self> {
        let cpv = format!("{cpn}-{version}");
        let parsed = Cpv::parse(&cpv)
            .map_err(|e| Error::InvalidAtom(format!("{cpv}: {e}")))?
            .version;
        Ok(PackageVersion {
            raw: version.to_string(),
            parsed,
        })
    }

    /// The version as written in the repository.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pick the highest version of `versions`.
    pub fn best<'a, I>(versions: I) -> Option<&'a PackageVersion>
    where
        I: IntoIterator<Item = &'a PackageVersion>,
    {
        versions.into_iter().max_by(|a, b| a.cmp(b))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed
            .partial_cmp(&other.parsed)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(display_version(&self.raw))
    }
}
