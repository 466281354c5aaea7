//! Shared CLI output: colors, status symbols, sections and JSON mode.
//!
//! Human-readable output goes to stderr; `--json` output goes to stdout.

use crate::domain::YearValues;
use std::io::IsTerminal;

/// Whether ANSI colors should be used on stderr.
pub fn color_enabled() -> bool {
    if std::env::var_os("NO_COLOR").is_some() || std::env::var_os("CAGR_NO_COLOR").is_some() {
        return false;
    }
    std::io::stderr().is_terminal()
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Colored string builder.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    pub fn ok_sym(&self) -> &str {
        if self.use_color {
            "\x1b[32m\u{2713}\x1b[0m"
        } else {
            "OK"
        }
    }

    pub fn fail_sym(&self) -> &str {
        if self.use_color {
            "\x1b[31m\u{2717}\x1b[0m"
        } else {
            "!!"
        }
    }

    pub fn warn_sym(&self) -> &str {
        if self.use_color {
            "\x1b[33m\u{26a0}\x1b[0m"
        } else {
            "??"
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint(GREEN, s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint(RED, s)
    }

    pub fn yellow(&self, s: &str) -> String {
        self.paint(YELLOW, s)
    }

    pub fn dim(&self, s: &str) -> String {
        self.paint(DIM, s)
    }

    pub fn bold(&self, s: &str) -> String {
        self.paint(BOLD, s)
    }
}

/// Branded header line.
pub fn print_header(s: &Styled) {
    eprintln!(
        "  {} {}",
        s.bold("CAGR Watch"),
        s.dim(&format!("v{}", env!("CARGO_PKG_VERSION")))
    );
    eprintln!();
}

pub fn print_section(s: &Styled, title: &str) {
    eprintln!("  {}", s.bold(title));
}

/// One check line: symbol, padded label, value.
pub fn print_check(symbol: &str, label: &str, value: &str) {
    eprintln!("    {symbol} {label:<16} {value}");
}

/// Indented hint under a check line.
pub fn print_detail(msg: &str) {
    eprintln!("                        {msg}");
}

pub fn print_status(s: &Styled, status: &str, msg: &str) {
    eprintln!();
    eprintln!("  {}: {status} ({msg})", s.bold("Status"));
}

/// Human-readable age, e.g. "3h 12m".
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}

/// `2024: 12.5%  2025: N/A` on one line.
pub fn format_values(values: &YearValues) -> String {
    values
        .iter()
        .map(|(year, value)| format!("{year}: {value}"))
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn is_quiet() -> bool {
    std::env::var_os("CAGR_QUIET").is_some()
}

pub fn is_verbose() -> bool {
    std::env::var_os("CAGR_VERBOSE").is_some()
}

pub fn is_json() -> bool {
    std::env::var_os("CAGR_JSON").is_some()
}

/// Pretty JSON to stdout.
pub fn print_json(value: &serde_json::Value) {
    if let Ok(s) = serde_json::to_string_pretty(value) {
        println!("{s}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::YearLabel;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3 * 3600 + 12 * 60), "3h 12m");
        assert_eq!(format_duration(2 * 86_400 + 3600), "2d 1h");
    }

    #[test]
    fn test_format_values_in_year_order() {
        let mut values = YearValues::new();
        values.insert(YearLabel::parse("2025").unwrap(), "N/A".to_string());
        values.insert(YearLabel::parse("2024").unwrap(), "12%".to_string());
        assert_eq!(format_values(&values), "2024: 12%  2025: N/A");
    }
}
