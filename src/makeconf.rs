use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use winnow::ascii::{space1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, terminated};
use winnow::error::{ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, take_till, take_while};

use crate::error::{Error, Result};

/// Variables treated as incremental across configuration files.
///
/// See [PMS 5.3.1](https://projects.gentoo.org/pms/9/pms.html#incremental-variables).
pub const INCREMENTAL_VARIABLES: &[&str] = &["ACCEPT_KEYWORDS", "FEATURES"];

/// Merges incremental variable tokens as defined in PMS.
///
/// `-token` removes a previously set token and `-*` clears everything.
/// Returned tokens are sorted.
pub fn merge_incremental_tokens<'s, I: IntoIterator<Item = &'s str>>(iter: I) -> Vec<String> {
    let mut values = HashSet::<&str>::new();
    for token in iter {
        if let Some(token) = token.strip_prefix('-') {
            if token == "*" {
                values.clear();
            } else {
                values.remove(token);
            }
        } else {
            values.insert(token);
        }
    }
    let mut values: Vec<String> = values.into_iter().map(str::to_string).collect();
    values.sort();
    values
}

/// Parse `make.conf`/`make.defaults` syntax.
///
/// Understands `#` comments, an optional `export` keyword, single and
/// double quoted values spanning several lines, backslash escapes and
/// `$VAR`/`${VAR}` references. References are resolved against `vars`,
/// which is updated with every assignment. The assignments made by this
/// input are returned in order.
///
/// Lines that are not assignments (such as `source`) are skipped.
pub fn parse_make_conf(
    input: &str,
    vars: &mut BTreeMap<String, String>,
) -> Result<Vec<(String, String)>> {
    let mut assignments = Vec::new();
    let mut rest = input.trim_start();
    while !rest.is_empty() {
        let mut next = rest;
        match statement(&mut next) {
            Ok(Some(assignment)) => {
                let value = assignment.expand(vars);
                vars.insert(assignment.name.to_string(), value.clone());
                assignments.push((assignment.name.to_string(), value));
            }
            Ok(None) => {}
            Err(e) => {
                let line = input[..input.len() - rest.len()].matches('\n').count() + 1;
                let reason = match e {
                    ErrMode::Backtrack(e) | ErrMode::Cut(e) => e.to_string(),
                    ErrMode::Incomplete(_) => "unexpected end of input".to_string(),
                };
                return Err(Error::InvalidConfig(format!("line {line}: {reason}")));
            }
        }
        rest = next.trim_start();
    }
    Ok(assignments)
}

/// Read and parse a file, or every file of a directory in name order.
///
/// A missing path yields no assignments.
pub fn load_make_conf(
    path: &Path,
    vars: &mut BTreeMap<String, String>,
) -> Result<Vec<(String, String)>> {
    if path.is_dir() {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| Error::io(path, e))? {
            names.push(entry.map_err(|e| Error::io(path, e))?.file_name());
        }
        names.sort();
        let mut assignments = Vec::new();
        for name in names {
            assignments.extend(load_make_conf(&path.join(name), vars)?);
        }
        return Ok(assignments);
    }

    let input = match std::fs::read_to_string(path) {
        Ok(input) => input,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(path, e)),
    };
    tracing::debug!("reading {}", path.display());
    parse_make_conf(&input, vars).map_err(|e| match e {
        Error::InvalidConfig(msg) => Error::InvalidConfig(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// One piece of an assignment's right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'s> {
    Text(&'s str),
    Char(char),
    /// An unknown escape inside double quotes, kept with its backslash.
    Escaped(char),
    /// `$NAME` or `${NAME}`; a lone `$` has an empty name.
    Var(&'s str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment<'s> {
    name: &'s str,
    value: Vec<Piece<'s>>,
}

impl Assignment<'_> {
    fn expand(&self, vars: &BTreeMap<String, String>) -> String {
        let mut value = String::new();
        for piece in &self.value {
            match piece {
                Piece::Text(text) => value.push_str(text),
                Piece::Char(c) => value.push(*c),
                Piece::Escaped(c) => {
                    value.push('\\');
                    value.push(*c);
                }
                Piece::Var("") => value.push('$'),
                Piece::Var(name) => {
                    if let Some(v) = vars.get(*name) {
                        value.push_str(v);
                    }
                }
            }
        }
        value
    }
}

fn statement<'s>(input: &mut &'s str) -> ModalResult<Option<Assignment<'s>>> {
    alt((
        preceded('#', till_line_ending).value(None),
        assignment.map(Some),
        take_till(1.., '\n').map(|line: &str| {
            tracing::debug!("ignoring non-assignment in make.conf: {line:?}");
            None
        }),
    ))
    .parse_next(input)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn assignment<'s>(input: &mut &'s str) -> ModalResult<Assignment<'s>> {
    let name = preceded(opt(("export", space1)), take_while(1.., is_name_char))
        .parse_next(input)?;
    '='.parse_next(input)?;
    let value = value.parse_next(input)?;
    // Anything after the value, usually a comment.
    till_line_ending.parse_next(input)?;
    Ok(Assignment { name, value })
}

fn value<'s>(input: &mut &'s str) -> ModalResult<Vec<Piece<'s>>> {
    repeat(
        0..,
        alt((
            double_quoted,
            single_quoted.map(|p| vec![p]),
            reference.map(|p| vec![p]),
            unquoted_escape.map(|p| vec![p]),
            take_while(1.., |c: char| {
                !c.is_whitespace() && !matches!(c, '"' | '\'' | '$' | '\\')
            })
            .map(|text| vec![Piece::Text(text)]),
        )),
    )
    .fold(Vec::new, |mut pieces: Vec<Piece<'s>>, part: Vec<Piece<'s>>| {
        pieces.extend(part);
        pieces
    })
    .parse_next(input)
}

fn double_quoted<'s>(input: &mut &'s str) -> ModalResult<Vec<Piece<'s>>> {
    preceded(
        '"',
        cut_err(terminated(repeat(0.., double_quoted_piece), '"'))
            .context(StrContext::Label("double quoted value")),
    )
    .parse_next(input)
}

fn double_quoted_piece<'s>(input: &mut &'s str) -> ModalResult<Piece<'s>> {
    alt((
        take_while(1.., |c: char| !matches!(c, '"' | '$' | '\\')).map(Piece::Text),
        reference,
        preceded('\\', any).map(|c| match c {
            '\n' => Piece::Text(""),
            '"' | '\\' | '$' | '`' => Piece::Char(c),
            c => Piece::Escaped(c),
        }),
    ))
    .parse_next(input)
}

fn single_quoted<'s>(input: &mut &'s str) -> ModalResult<Piece<'s>> {
    preceded(
        '\'',
        cut_err(terminated(take_till(0.., '\''), '\''))
            .context(StrContext::Label("single quoted value")),
    )
    .map(Piece::Text)
    .parse_next(input)
}

fn unquoted_escape<'s>(input: &mut &'s str) -> ModalResult<Piece<'s>> {
    preceded('\\', opt(any))
        .map(|c| match c {
            Some('\n') | None => Piece::Text(""),
            Some(c) => Piece::Char(c),
        })
        .parse_next(input)
}

/// A reference whose `$` is the next character.
fn reference<'s>(input: &mut &'s str) -> ModalResult<Piece<'s>> {
    preceded(
        '$',
        alt((
            delimited(
                '{',
                take_till(0.., '}'),
                cut_err('}').context(StrContext::Label("closing '}' of reference")),
            ),
            take_while(0.., is_name_char),
        )),
    )
    .map(Piece::Var)
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        parse_make_conf(input, &mut vars).unwrap();
        vars
    }

    #[test]
    fn plain_and_quoted_values() {
        let vars = parse(
            r#"
# comment
CHOST=x86_64-pc-linux-gnu
COMMON_FLAGS="-O2 -pipe"
export LC_MESSAGES='C.utf8'
"#,
        );
        assert_eq!(vars["CHOST"], "x86_64-pc-linux-gnu");
        assert_eq!(vars["COMMON_FLAGS"], "-O2 -pipe");
        assert_eq!(vars["LC_MESSAGES"], "C.utf8");
    }

    #[test]
    fn multi_line_value() {
        let vars = parse("USE=\"X\n  alsa\n  -gnome\"\nNEXT=1\n");
        assert_eq!(
            vars["USE"].split_whitespace().collect::<Vec<_>>(),
            vec!["X", "alsa", "-gnome"]
        );
        assert_eq!(vars["NEXT"], "1");
    }

    #[test]
    fn references_are_expanded() {
        let vars = parse(
            "COMMON_FLAGS=\"-O2\"\nCFLAGS=\"${COMMON_FLAGS} -g\"\nCXXFLAGS=$CFLAGS\nLIT='$CFLAGS'\n",
        );
        assert_eq!(vars["CFLAGS"], "-O2 -g");
        assert_eq!(vars["CXXFLAGS"], "-O2 -g");
        assert_eq!(vars["LIT"], "$CFLAGS");
    }

    #[test]
    fn trailing_comment_and_source_lines() {
        let vars = parse("source /var/lib/layman/make.conf\nDISTDIR=/srv/distfiles # shared\n");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["DISTDIR"], "/srv/distfiles");
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let mut vars = BTreeMap::new();
        let err = parse_make_conf("CHOST=x86_64\nUSE=\"X alsa\n", &mut vars).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "{msg}");
        assert!(msg.contains("double quoted value"), "{msg}");

        let err = parse_make_conf("LIT='abc\n", &mut vars).unwrap_err();
        assert!(err.to_string().contains("single quoted value"));
    }

    #[test]
    fn unterminated_reference_is_an_error() {
        let mut vars = BTreeMap::new();
        let err = parse_make_conf("CFLAGS=${COMMON_FLAGS\n", &mut vars).unwrap_err();
        assert!(err.to_string().contains("closing '}' of reference"));
    }

    #[test]
    fn escapes() {
        let vars = parse(
            "A=\"say \\\"hi\\\" \\$HOME \\q\"\nB=one\\ two\nC=\"x\\\ny\"\nD=$\nE=\"${}\"\n",
        );
        assert_eq!(vars["A"], "say \"hi\" $HOME \\q");
        assert_eq!(vars["B"], "one two");
        assert_eq!(vars["C"], "xy");
        assert_eq!(vars["D"], "$");
        assert_eq!(vars["E"], "$");
    }

    #[test]
    fn assignments_keep_order() {
        let mut vars = BTreeMap::new();
        let assignments =
            parse_make_conf("FEATURES=\"a\"\nFEATURES=\"${FEATURES} b\"\n", &mut vars).unwrap();
        assert_eq!(
            assignments,
            vec![
                ("FEATURES".to_string(), "a".to_string()),
                ("FEATURES".to_string(), "a b".to_string()),
            ]
        );
    }

    #[test]
    fn incremental_merge() {
        assert_eq!(
            merge_incremental_tokens(["amd64", "~amd64", "-~amd64", "x86"]),
            vec!["amd64", "x86"]
        );
        assert_eq!(
            merge_incremental_tokens(["amd64", "-*", "~arm64"]),
            vec!["~arm64"]
        );
    }

    #[test]
    fn directory_is_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("make.conf");
        std::fs::create_dir(&conf).unwrap();
        std::fs::write(conf.join("20-late"), "DISTDIR=/late\n").unwrap();
        std::fs::write(conf.join("10-early"), "DISTDIR=/early\nPKGDIR=/pkg\n").unwrap();
        let mut vars = BTreeMap::new();
        load_make_conf(&conf, &mut vars).unwrap();
        assert_eq!(vars["DISTDIR"], "/late");
        assert_eq!(vars["PKGDIR"], "/pkg");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = BTreeMap::new();
        let assignments = load_make_conf(&dir.path().join("nope"), &mut vars).unwrap();
        assert!(assignments.is_empty());
    }
}
