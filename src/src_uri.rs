use winnow::ascii::{multispace0, multispace1};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, terminated};
use winnow::error::StrContext;
use winnow::prelude::*;
use winnow::token::take_while;

use crate::error::{Error, Result};

/// Selective restriction written in front of a URI (EAPI 8+).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriRestriction {
    /// `fetch+uri`
    Fetch,
    /// `mirror+uri`
    Mirror,
}

/// One file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distfile {
    /// Where to fetch the file from, without any restriction prefix.
    pub url: String,
    /// Name of the file in `DISTDIR`, which is what Manifests refer to.
    ///
    /// Either the `-> name` rename or everything after the last `/` of the
    /// URL, query string included.
    pub name: String,
    /// `fetch+` or `mirror+` written in front of the URL.
    pub restriction: Option<UriRestriction>,
}

impl Distfile {
    fn new(uri: &str, rename: Option<&str>) -> Distfile {
        let (restriction, url) = match uri.split_once('+') {
            Some(("fetch", url)) => (Some(UriRestriction::Fetch), url),
            Some(("mirror", url)) => (Some(UriRestriction::Mirror), url),
            _ => (None, uri),
        };
        let name = rename.unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url));
        Distfile {
            url: url.to_string(),
            name: name.to_string(),
            restriction,
        }
    }
}

/// A node of a `SRC_URI` expression.
///
/// See [PMS 7.3.2](https://projects.gentoo.org/pms/9/pms.html#srcuri).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrcUriEntry {
    /// `uri` or `uri -> name`.
    File(Distfile),
    /// `flag? ( ... )` or `!flag? ( ... )`.
    UseConditional {
        flag: String,
        negated: bool,
        entries: Vec<SrcUriEntry>,
    },
    /// `( ... )`
    Group(Vec<SrcUriEntry>),
}

impl SrcUriEntry {
    /// Parse a `SRC_URI` value.
    ///
    /// # Examples
    ///
    /// ```
    /// use esearch::SrcUriEntry;
    ///
    /// let entries = SrcUriEntry::parse(
    ///     "https://example.com/foo-1.0.tar.gz ssl? ( https://example.com/ssl.patch )"
    /// ).unwrap();
    /// assert_eq!(entries.len(), 2);
    /// ```
    pub fn parse(input: &str) -> Result<Vec<SrcUriEntry>> {
        terminated(entries, multispace0)
            .parse(input)
            .map_err(|e| Error::InvalidSrcUri(e.to_string()))
    }

    /// Every distfile name reachable from `entries`, whatever the USE
    /// conditionals evaluate to.
    ///
    /// Names are deduplicated and returned in first-seen order.
    ///
    /// # Examples
    ///
    /// ```
    /// use esearch::SrcUriEntry;
    ///
    /// let entries = SrcUriEntry::parse(
    ///     "https://example.com/foo-1.0.tar.gz doc? ( https://example.com/foo-doc.tar.xz )"
    /// ).unwrap();
    /// assert_eq!(
    ///     SrcUriEntry::distfiles(&entries),
    ///     vec!["foo-1.0.tar.gz", "foo-doc.tar.xz"],
    /// );
    /// ```
    pub fn distfiles(entries: &[SrcUriEntry]) -> Vec<String> {
        let mut names = Vec::new();
        collect_distfiles(entries, &mut names);
        names
    }
}

fn collect_distfiles(entries: &[SrcUriEntry], names: &mut Vec<String>) {
    for entry in entries {
        match entry {
            SrcUriEntry::File(file) => {
                if !names.contains(&file.name) {
                    names.push(file.name.clone());
                }
            }
            SrcUriEntry::UseConditional { entries, .. } | SrcUriEntry::Group(entries) => {
                collect_distfiles(entries, names)
            }
        }
    }
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '@')
}

/// Any run of characters up to whitespace or a parenthesis.
fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '(' && c != ')').parse_next(input)
}

fn entries(input: &mut &str) -> ModalResult<Vec<SrcUriEntry>> {
    repeat(0.., preceded(multispace0, entry)).parse_next(input)
}

fn entry(input: &mut &str) -> ModalResult<SrcUriEntry> {
    alt((group, use_conditional, distfile)).parse_next(input)
}

fn group(input: &mut &str) -> ModalResult<SrcUriEntry> {
    delimited(
        '(',
        entries,
        cut_err((multispace0, ')')).context(StrContext::Label("closing ')'")),
    )
    .map(SrcUriEntry::Group)
    .parse_next(input)
}

fn use_conditional(input: &mut &str) -> ModalResult<SrcUriEntry> {
    let negated = opt('!').parse_next(input)?.is_some();
    let flag = terminated(take_while(1.., is_flag_char), '?').parse_next(input)?;
    let entries = cut_err(preceded(
        multispace0,
        delimited('(', entries, (multispace0, ')')),
    ))
    .context(StrContext::Label("USE conditional group"))
    .parse_next(input)?;
    Ok(SrcUriEntry::UseConditional {
        flag: flag.to_string(),
        negated,
        entries,
    })
}

fn distfile(input: &mut &str) -> ModalResult<SrcUriEntry> {
    let uri = word.parse_next(input)?;
    let rename = opt(preceded(
        (multispace1, "->"),
        cut_err(preceded(multispace1, word)).context(StrContext::Label("file name after '->'")),
    ))
    .parse_next(input)?;
    Ok(SrcUriEntry::File(Distfile::new(uri, rename)))
}
