//! ErrorDetails - error-details header に書く診断テキスト

use crate::ports::ErrorEntry;

/// Failure history of one message, rendered for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    entries: Vec<ErrorEntry>,
}

impl ErrorDetails {
    pub fn new(entries: Vec<ErrorEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    /// Full text: an attempt count line followed by one paragraph per failure.
    pub fn render(&self) -> String {
        let mut text = match self.entries.len() {
            1 => "1 failed attempt".to_string(),
            n => format!("{n} failed attempts"),
        };
        for entry in &self.entries {
            text.push_str("\n\n");
            text.push_str(&entry.at.to_rfc3339());
            text.push_str(": ");
            text.push_str(&entry.description);
        }
        text
    }

    /// Rendered text cut to at most `max_length` bytes. 0 means unlimited.
    pub fn render_truncated(&self, max_length: usize) -> String {
        truncate(self.render(), max_length)
    }
}

/// Cut `text` to at most `max_length` bytes without splitting a character.
pub fn truncate(mut text: String, max_length: usize) -> String {
    if max_length == 0 || text.len() <= max_length {
        return text;
    }
    let mut end = max_length;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn entry(description: &str) -> ErrorEntry {
        ErrorEntry {
            description: description.to_string(),
            at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn render_lists_every_attempt() {
        let details = ErrorDetails::new(vec![entry("first"), entry("second")]);
        let text = details.render();

        assert!(text.starts_with("2 failed attempts\n\n2024-03-01T12:00:00+00:00: first"));
        assert!(text.ends_with("second"));
    }

    #[rstest]
    #[case("abcdef", 0, "abcdef")]
    #[case("abcdef", 10, "abcdef")]
    #[case("abcdef", 3, "abc")]
    // "é" is two bytes; cutting inside it backs off
    #[case("aé", 2, "a")]
    fn truncate_respects_limit(#[case] text: &str, #[case] max: usize, #[case] expected: &str) {
        let truncated = truncate(text.to_string(), max);
        assert_eq!(truncated, expected);
        assert!(max == 0 || truncated.len() <= max);
    }
}
