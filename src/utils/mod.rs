//! Text and timing helpers shared by the upstream shaping, the evaluation
//! parser and progress logging.

pub mod error;

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Collapse runs of whitespace to one space and trim the ends
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Comparison form of a person's name: trimmed, single-spaced, lowercase
pub fn name_key(name: &str) -> String {
    normalize_whitespace(name).to_lowercase()
}

/// Format elapsed time for progress lines
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  hello   world  "), "hello world");
        assert_eq!(normalize_whitespace("hello\n\nworld"), "hello world");
    }

    #[test]
    fn test_name_key() {
        assert_eq!(name_key("  Robert   SEDGEWICK "), "robert sedgewick");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
    }
}
