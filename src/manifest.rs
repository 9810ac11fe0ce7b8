use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};

/// The `DIST` entries of a package's `Manifest`.
///
/// Only distfile sizes are kept; checksums are not verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    dist: HashMap<String, u64>,
}

impl Manifest {
    /// Parse the text of a `Manifest` file.
    ///
    /// Lines look like `DIST <file> <size> <HASH> <value>...`; other entry
    /// types (`EBUILD`, `AUX`, `MISC`) are ignored.
    pub fn parse(input: &str) -> Result<Manifest> {
        let mut dist = HashMap::new();
        for line in input.lines() {
            let mut fields = line.split_whitespace();
            if fields.next() != Some("DIST") {
                continue;
            }
            let (Some(name), Some(size)) = (fields.next(), fields.next()) else {
                return Err(Error::InvalidManifest(format!(
                    "truncated Manifest line: {line:?}"
                )));
            };
            let size = size.parse::<u64>().map_err(|_| {
                Error::InvalidManifest(format!("bad distfile size in Manifest: {line:?}"))
            })?;
            dist.insert(name.to_string(), size);
        }
        Ok(Manifest { dist })
    }

    /// Load `<package_dir>/Manifest`, or `None` when the package has none.
    pub fn load(package_dir: &Path) -> Result<Option<Manifest>> {
        let path = package_dir.join("Manifest");
        match std::fs::read_to_string(&path) {
            Ok(input) => Manifest::parse(&input).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Size of one distfile in bytes.
    pub fn size_of(&self, distfile: &str) -> Option<u64> {
        self.dist.get(distfile).copied()
    }

    /// Total size of `distfiles`, or `None` if any of them is not listed.
    pub fn distfiles_size<S: AsRef<str>>(&self, distfiles: &[S]) -> Option<u64> {
        distfiles
            .iter()
            .map(|name| self.size_of(name.as_ref()))
            .sum()
    }
}
