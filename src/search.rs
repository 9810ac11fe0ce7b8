use std::io::{self, Write};

use colored::Colorize;
use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::index::{Index, PackageRecord};

/// How matches are printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Normal,
    /// One line per package.
    Compact,
    /// Normal plus repository and every available version.
    Verbose,
    /// Path of the ebuild of the best version.
    Ebuilds,
    /// A user supplied format, see [`OwnFormat`].
    Own(String),
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub patterns: Vec<String>,
    /// Match descriptions as well as names.
    pub search_desc: bool,
    /// Match against `category/package` instead of the bare name.
    pub fullname: bool,
    /// Only installed packages.
    pub instonly: bool,
    /// Only packages that are not installed.
    pub notinst: bool,
    /// Drop packages whose name matches any of these.
    pub exclude: Vec<String>,
    pub output: OutputMode,
}

/// Compile `pattern` case-insensitively, matching it literally when it is
/// not a valid regular expression.
///
/// # Examples
///
/// ```
/// let re = esearch::compile_pattern("gtk+").unwrap();
/// assert!(re.is_match("GTK+"));
/// ```
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let build = |p: &str| RegexBuilder::new(p).case_insensitive(true).build();
    build(pattern).or_else(|e| {
        tracing::debug!("{pattern:?} is not a regular expression ({e}), matching literally");
        build(&regex::escape(pattern)).map_err(|e| Error::InvalidPattern(pattern.to_string(), e))
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_pattern(p)).collect()
}

/// Packages of `index` selected by `options`, in index order.
pub fn find<'a>(index: &'a Index, options: &SearchOptions) -> Result<Vec<&'a PackageRecord>> {
    let patterns = compile_all(&options.patterns)?;
    let excludes = compile_all(&options.exclude)?;

    let found = index
        .packages
        .iter()
        .filter(|p| {
            let target = if options.fullname { &p.cpn } else { &p.name };
            let matched = patterns.iter().any(|re| {
                re.is_match(target) || (options.search_desc && re.is_match(&p.description))
            });
            matched && !excludes.iter().any(|re| re.is_match(target))
        })
        .filter(|p| !options.instonly || p.is_installed())
        .filter(|p| !options.notinst || !p.is_installed())
        .collect();
    Ok(found)
}

/// Search `index` and print the matches to `out`.
///
/// Returns the number of packages printed. Nothing is printed when there
/// are none.
pub fn search<W: Write>(index: &Index, options: &SearchOptions, out: &mut W) -> Result<usize> {
    let found = find(index, options)?;
    if found.is_empty() {
        return Ok(0);
    }
    let io_err = |e| Error::io("<stdout>", e);

    match &options.output {
        OutputMode::Normal | OutputMode::Verbose => {
            writeln!(
                out,
                "[ Results for search key : {} ]",
                options.patterns.join(" ").bold()
            )
            .map_err(io_err)?;
            writeln!(
                out,
                "[ Applications found : {} ]\n",
                found.len().to_string().bold()
            )
            .map_err(io_err)?;
            let verbose = options.output == OutputMode::Verbose;
            for package in &found {
                write_normal(out, package, &index.main_repository, verbose).map_err(io_err)?;
            }
        }
        OutputMode::Compact => {
            for package in &found {
                write_compact(out, package).map_err(io_err)?;
            }
        }
        OutputMode::Ebuilds => {
            for package in &found {
                write_ebuild(out, package).map_err(io_err)?;
            }
        }
        OutputMode::Own(format) => {
            let format = OwnFormat::parse(format);
            for package in &found {
                format.write(out, package).map_err(io_err)?;
            }
        }
    }
    out.flush().map_err(io_err)?;
    Ok(found.len())
}

fn write_field<W: Write>(out: &mut W, label: &str, value: &str) -> io::Result<()> {
    writeln!(out, "      {} {value}", format!("{label:<25}").green())
}

fn write_header<W: Write>(out: &mut W, package: &PackageRecord, main_repo: &str) -> io::Result<()> {
    write!(out, "{}  {}", "*".green(), package.cpn.bold())?;
    if package.masked {
        write!(out, " {}", "[ Masked ]".red())?;
    }
    if package.from_overlay(main_repo) {
        write!(out, " {}", format!("[ Overlay: {} ]", package.repository).cyan())?;
    }
    writeln!(out)
}

/// Multi-line description of a package, as printed by the default mode.
pub fn write_normal<W: Write>(
    out: &mut W,
    package: &PackageRecord,
    main_repo: &str,
    verbose: bool,
) -> io::Result<()> {
    write_header(out, package, main_repo)?;
    write_field(out, "Latest version available:", &package.version)?;
    write_field(
        out,
        "Latest version installed:",
        package.installed.as_deref().unwrap_or("[ Not Installed ]"),
    )?;
    write_field(out, "Size of downloaded files:", &package.size)?;
    write_field(out, "Homepage:", &package.homepage)?;
    write_field(out, "Description:", &package.description)?;
    write_field(out, "License:", &package.license)?;
    if verbose {
        write_field(out, "Repository:", &package.repository)?;
        let versions: Vec<String> = package
            .versions
            .iter()
            .map(|v| {
                let mut text = String::new();
                if v.masked {
                    text.push_str("[M]");
                }
                text.push_str(&v.version);
                if !v.slot.is_empty() && v.slot != "0" {
                    text.push_str(&format!("({})", v.slot));
                }
                if v.repository != main_repo {
                    text.push_str("::");
                    text.push_str(&v.repository);
                }
                text
            })
            .collect();
        write_field(out, "Available versions:", &versions.join(" "))?;
    }
    writeln!(out)
}

/// One line `[S] category/package (version):  description`.
///
/// `S` is `I` when installed at the indexed version, `U` when installed at
/// another version and `N` when not installed, prefixed with `M` when the
/// package is masked.
pub fn write_compact<W: Write>(out: &mut W, package: &PackageRecord) -> io::Result<()> {
    let state = match (package.is_installed(), package.has_update()) {
        (true, true) => "U".cyan(),
        (true, false) => "I".green(),
        (false, _) => "N".normal(),
    };
    let masked = if package.masked { "M".red() } else { "".normal() };
    writeln!(
        out,
        "[{masked}{state}] {} ({}):  {}",
        package.cpn.bold(),
        package.version,
        package.description
    )
}

fn write_ebuild<W: Write>(out: &mut W, package: &PackageRecord) -> io::Result<()> {
    writeln!(out, "{}  {}", "*".green(), package.cpn.bold())?;
    writeln!(out, "      {}\n", package.ebuild.display())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(char),
}

/// A `--own` output format.
///
/// | Code | Value |
/// |------|-------|
/// | `%n` | package name |
/// | `%c` | category |
/// | `%p` | `category/package` |
/// | `%v` | latest available version |
/// | `%i` | installed version, empty when not installed |
/// | `%s` | download size |
/// | `%h` | homepage |
/// | `%d` | description |
/// | `%l` | license |
/// | `%r` | repository |
/// | `%m` | `M` when masked, empty otherwise |
/// | `%%` | a literal `%` |
///
/// `\n` and `\t` are turned into newline and tab. Unknown codes are
/// printed as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnFormat {
    segments: Vec<Segment>,
}

impl OwnFormat {
    pub fn parse(format: &str) -> OwnFormat {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek().copied()) {
                ('%', Some('%')) => {
                    chars.next();
                    literal.push('%');
                }
                ('%', Some(code @ ('n' | 'c' | 'p' | 'v' | 'i' | 's' | 'h' | 'd' | 'l' | 'r' | 'm'))) => {
                    chars.next();
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(code));
                }
                ('\\', Some('n')) => {
                    chars.next();
                    literal.push('\n');
                }
                ('\\', Some('t')) => {
                    chars.next();
                    literal.push('\t');
                }
                (c, _) => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        OwnFormat { segments }
    }

    /// Render `package` into a string.
    pub fn render(&self, package: &PackageRecord) -> String {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => text.push_str(s),
                Segment::Field(code) => text.push_str(field(package, *code)),
            }
        }
        text
    }

    pub fn write<W: Write>(&self, out: &mut W, package: &PackageRecord) -> io::Result<()> {
        out.write_all(self.render(package).as_bytes())
    }
}

fn field(package: &PackageRecord, code: char) -> &str {
    match code {
        'n' => &package.name,
        'c' => package.category(),
        'p' => &package.cpn,
        'v' => &package.version,
        'i' => package.installed.as_deref().unwrap_or(""),
        's' => &package.size,
        'h' => &package.homepage,
        'd' => &package.description,
        'l' => &package.license,
        'r' => &package.repository,
        'm' if package.masked => "M",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::record;
    use crate::index::VersionRecord;
    use crate::output::disable_color;
    use pretty_assertions::assert_eq;

    fn index() -> Index {
        let mut gtk = record("x11-libs/gtk+", "3.24.41", None);
        gtk.description = "Gimp ToolKit +".to_string();
        let mut rust = record("dev-lang/rust", "1.77.0", Some("1.76.0"));
        rust.masked = true;
        rust.description = "Language empowering everyone to build reliable software".to_string();
        let mut vim_core = record("app-editors/vim-core", "9.0.2167", None);
        vim_core.repository = "guru".to_string();
        vim_core.versions[0].repository = "guru".to_string();
        Index::new(
            "gentoo",
            vec![
                record("app-editors/gvim", "9.0.2167", None),
                record("app-editors/vim", "9.0.2167", Some("9.0.2167")),
                vim_core,
                rust,
                gtk,
            ],
        )
    }

    fn options(patterns: &[&str]) -> SearchOptions {
        SearchOptions {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn names(found: Vec<&PackageRecord>) -> Vec<&str> {
        found.into_iter().map(|p| p.cpn.as_str()).collect()
    }

    fn run(opts: &SearchOptions) -> String {
        disable_color();
        let mut out = Vec::new();
        search(&index(), opts, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn regex_and_literal_patterns() {
        let index = index();
        assert_eq!(
            names(find(&index, &options(&["^vim"])).unwrap()),
            vec!["app-editors/vim", "app-editors/vim-core"]
        );
        assert_eq!(
            names(find(&index, &options(&["GTK+"])).unwrap()),
            vec!["x11-libs/gtk+"]
        );
        assert!(find(&index, &options(&["emacs"])).unwrap().is_empty());
    }

    #[test]
    fn patterns_are_merged_in_index_order() {
        let index = index();
        assert_eq!(
            names(find(&index, &options(&["rust", "vim$", "gvim"])).unwrap()),
            vec!["app-editors/gvim", "app-editors/vim", "dev-lang/rust"]
        );
    }

    #[test]
    fn fullname_and_description() {
        let index = index();
        let mut opts = options(&["^app-editors/"]);
        assert!(find(&index, &opts).unwrap().is_empty());
        opts.fullname = true;
        assert_eq!(find(&index, &opts).unwrap().len(), 3);

        let mut opts = options(&["reliable"]);
        assert!(find(&index, &opts).unwrap().is_empty());
        opts.search_desc = true;
        assert_eq!(names(find(&index, &opts).unwrap()), vec!["dev-lang/rust"]);
    }

    #[test]
    fn install_filters_and_excludes() {
        let index = index();
        let mut opts = options(&["vim"]);
        opts.instonly = true;
        assert_eq!(names(find(&index, &opts).unwrap()), vec!["app-editors/vim"]);

        let mut opts = options(&["vim"]);
        opts.notinst = true;
        opts.exclude = vec!["core".to_string()];
        assert_eq!(names(find(&index, &opts).unwrap()), vec!["app-editors/gvim"]);
    }

    #[test]
    fn normal_output() {
        let text = run(&options(&["^rust$"]));
        assert_eq!(
            text,
            "[ Results for search key : ^rust$ ]\n\
             [ Applications found : 1 ]\n\n\
             *  dev-lang/rust [ Masked ]\n      \
             Latest version available: 1.77.0\n      \
             Latest version installed: 1.76.0\n      \
             Size of downloaded files: 1,024 kB\n      \
             Homepage:                 https://example.org/rust\n      \
             Description:              Language empowering everyone to build reliable software\n      \
             License:                  GPL-2\n\n"
        );
    }

    #[test]
    fn verbose_output_lists_versions() {
        let mut opts = options(&["vim-core"]);
        opts.output = OutputMode::Verbose;
        let mut index = index();
        index.packages[2].versions.push(VersionRecord {
            version: "9.1.0".to_string(),
            slot: "0".to_string(),
            masked: true,
            repository: "gentoo".to_string(),
        });
        disable_color();
        let mut out = Vec::new();
        search(&index, &opts, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("*  app-editors/vim-core [ Overlay: guru ]\n"));
        assert!(text.contains("Latest version installed: [ Not Installed ]\n"));
        assert!(text.contains("Repository:               guru\n"));
        assert!(text.contains("Available versions:       9.0.2167::guru [M]9.1.0\n"));
    }

    #[test]
    fn compact_output() {
        let mut opts = options(&["vim$", "rust", "gtk"]);
        opts.output = OutputMode::Compact;
        assert_eq!(
            run(&opts),
            "[N] app-editors/gvim (9.0.2167):  The gvim package\n\
             [I] app-editors/vim (9.0.2167):  The vim package\n\
             [MU] dev-lang/rust (1.77.0):  Language empowering everyone to build reliable software\n\
             [N] x11-libs/gtk+ (3.24.41):  Gimp ToolKit +\n"
        );
    }

    #[test]
    fn ebuild_output() {
        let mut opts = options(&["^vim$"]);
        opts.output = OutputMode::Ebuilds;
        assert_eq!(
            run(&opts),
            "*  app-editors/vim\n      /var/db/repos/gentoo/app-editors/vim/vim-9.0.2167.ebuild\n\n"
        );
    }

    #[test]
    fn own_format() {
        let mut opts = options(&["rust"]);
        opts.output = OutputMode::Own(r"%c|%n|%p %v/%i %m%% %x\t%r\n".to_string());
        assert_eq!(
            run(&opts),
            "dev-lang|rust|dev-lang/rust 1.77.0/1.76.0 M% %x\tgentoo\n"
        );
    }

    #[test]
    fn nothing_found_prints_nothing() {
        let mut out = Vec::new();
        assert_eq!(search(&index(), &options(&["emacs"]), &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
