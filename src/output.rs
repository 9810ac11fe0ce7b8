//! Terminal conventions shared by the three commands.

use std::io::Write;
use std::time::Duration;

use colored::Colorize;

/// Turn ANSI colours off for the rest of the process.
pub fn disable_color() {
    colored::control::set_override(false);
}

/// Print ` * msg`, the usual progress line.
pub fn emsg<W: Write>(out: &mut W, msg: &str) -> std::io::Result<()> {
    writeln!(out, "{} {}", " *".green(), msg)
}

/// Print ` * Error: msg` followed by a blank line.
pub fn eerror<W: Write>(out: &mut W, msg: &str) -> std::io::Result<()> {
    writeln!(out, "{} {}", " * Error:".red(), msg)?;
    writeln!(out)
}

/// Print `Warning: msg`.
pub fn ewarn<W: Write>(out: &mut W, msg: &str) -> std::io::Result<()> {
    writeln!(out, "{} {}", "Warning:".yellow(), msg)
}

/// Set the title of an xterm-compatible terminal.
pub fn xterm_title<W: Write>(out: &mut W, title: &str) -> std::io::Result<()> {
    write!(out, "\x1b]0;{title}\x07")?;
    out.flush()
}

/// Format a byte count the way Portage reports download sizes:
/// whole KiB with thousands separators.
///
/// # Examples
///
/// ```
/// assert_eq!(esearch::format_size(17_489_219), "17,079 kB");
/// assert_eq!(esearch::format_size(1000), "0 kB");
/// ```
pub fn format_size(bytes: u64) -> String {
    let digits = (bytes / 1024).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{grouped} kB")
}

/// Format an elapsed time, rounded to the second.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs() + u64::from(elapsed.subsec_millis() >= 500);
    if secs >= 60 {
        format!("{} minute(s) and {} second(s)", secs / 60, secs % 60)
    } else {
        format!("{secs} second(s)")
    }
}
