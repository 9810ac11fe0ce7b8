use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Stability level for an architecture keyword.
///
/// See [PMS 7.3.3](https://projects.gentoo.org/pms/9/pms.html#keywords).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stability {
    /// The package is stable on this architecture (e.g. `amd64`).
    Stable,
    /// The package is testing/unstable on this architecture (e.g. `~amd64`).
    Testing,
    /// The package is disabled on this architecture (e.g. `-amd64`).
    Disabled,
    /// All architectures are disabled (`-*`).
    DisabledAll,
}

/// A single architecture keyword entry from the `KEYWORDS` variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword {
    /// Architecture name (e.g. `amd64`, `arm64`, `x86`).
    pub arch: String,
    /// Stability classification.
    pub stability: Stability,
}

impl Keyword {
    /// Parse a space-separated `KEYWORDS` line into a list of keywords.
    ///
    /// # Examples
    ///
    /// ```
    /// use esearch::{Keyword, Stability};
    ///
    /// let kws = Keyword::parse_line("amd64 ~arm64 -x86 -*").unwrap();
    /// assert_eq!(kws.len(), 4);
    /// assert_eq!(kws[1].stability, Stability::Testing);
    /// ```
    pub fn parse_line(input: &str) -> Result<Vec<Keyword>> {
        input
            .split_whitespace()
            .map(|token| token.parse())
            .collect()
    }
}

impl FromStr for Keyword {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidKeyword("empty keyword".to_string()));
        }

        if s == "-*" {
            return Ok(Keyword {
                arch: "*".to_string(),
                stability: Stability::DisabledAll,
            });
        }

        let (arch, stability) = if let Some(arch) = s.strip_prefix('~') {
            (arch, Stability::Testing)
        } else if let Some(arch) = s.strip_prefix('-') {
            (arch, Stability::Disabled)
        } else {
            (s, Stability::Stable)
        };
        if arch.is_empty() {
            return Err(Error::InvalidKeyword(s.to_string()));
        }
        Ok(Keyword {
            arch: arch.to_string(),
            stability,
        })
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stability {
            Stability::Stable => write!(f, "{}", self.arch),
            Stability::Testing => write!(f, "~{}", self.arch),
            Stability::Disabled => write!(f, "-{}", self.arch),
            Stability::DisabledAll => write!(f, "-*"),
        }
    }
}

/// The effective `ACCEPT_KEYWORDS` of the system.
///
/// Decides whether an ebuild is visible based on its `KEYWORDS`. Package
/// masks are not consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptKeywords {
    tokens: Vec<String>,
}

impl AcceptKeywords {
    /// Build from already merged `ACCEPT_KEYWORDS` tokens.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AcceptKeywords {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether no keyword is accepted at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The accepted tokens, e.g. `["amd64", "~amd64"]`.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whether an ebuild carrying `keywords` is visible.
    ///
    /// # Examples
    ///
    /// ```
    /// use esearch::{AcceptKeywords, Keyword};
    ///
    /// let accept = AcceptKeywords::new(["amd64"]);
    /// assert!(accept.accepts(&Keyword::parse_line("amd64 ~x86").unwrap()));
    /// assert!(!accept.accepts(&Keyword::parse_line("~amd64").unwrap()));
    /// ```
    pub fn accepts(&self, keywords: &[Keyword]) -> bool {
        if keywords.is_empty() {
            return self.has("**");
        }
        keywords.iter().any(|kw| self.accepts_keyword(kw))
    }

    fn accepts_keyword(&self, kw: &Keyword) -> bool {
        match kw.stability {
            Stability::Stable => {
                self.has(&kw.arch)
                    || self.has(&format!("~{}", kw.arch))
                    || self.has("*")
                    || self.has("~*")
                    || self.has("**")
            }
            Stability::Testing => {
                self.has(&format!("~{}", kw.arch)) || self.has("~*") || self.has("**")
            }
            Stability::Disabled | Stability::DisabledAll => false,
        }
    }

    fn has(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }
}
