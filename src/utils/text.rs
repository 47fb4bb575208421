//! Text Utilities
//!
//! Character-boundary truncation and sensitive-substring masking shared by the
//! gateway and the prompt engine.

use std::sync::OnceLock;

use regex::Regex;

/// Truncate a string to at most `max_chars` characters, respecting char
/// boundaries. Returns the input unchanged when it already fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Count of Unicode scalar values in a string.
///
/// Input budgets are specified in characters, not bytes; Chinese prompt text
/// makes the distinction matter.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn secret_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(api[_-]?key|password|token|authorization)(\s*[=:]\s*)\S+")
            .expect("secret mask pattern is valid")
    })
}

/// Mask credential-looking substrings before the text reaches a log line.
pub fn mask_secrets(text: &str) -> String {
    secret_pattern().replace_all(text, "$1$2***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "发明专利草案";
        assert_eq!(truncate_chars(s, 3), "发明专");
        assert_eq!(truncate_chars(s, 100), s);
        assert_eq!(char_len(s), 6);
    }

    #[test]
    fn test_mask_secrets() {
        let masked = mask_secrets("request failed: api_key=sk-abc123 token: xyz");
        assert!(!masked.contains("sk-abc123"));
        assert!(!masked.contains("xyz"));
        assert!(masked.contains("api_key=***"));
    }

    #[test]
    fn test_mask_leaves_plain_text_alone() {
        let text = "权利要求书缺少从属权利要求";
        assert_eq!(mask_secrets(text), text);
    }
}
