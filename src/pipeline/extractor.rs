//! Deadline phrase extraction.
//!
//! Patterns run in a fixed order over the first 3000 characters of
//! `subject + " " + body`. Each pattern contributes at most two matches and
//! extraction stops at three distinct items, so earlier patterns win the cap.

use regex::Regex;

use crate::error::ConfigError;

/// Month name or abbreviation followed by a day number.
const MONTH_DAY: &str = r"\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+\d{1,2}\b";

/// Combined text is cut to this many characters before matching.
pub const TEXT_PREFIX_CHARS: usize = 3000;
/// Maximum items returned per message.
pub const MAX_ITEMS: usize = 3;
/// Maximum matches taken from a single pattern.
pub const MAX_MATCHES_PER_PATTERN: usize = 2;
/// Each item is truncated to this many characters.
pub const MAX_ITEM_CHARS: usize = 80;
/// Items of this length or shorter are dropped.
pub const MIN_ITEM_CHARS: usize = 10;

/// Pattern sources in priority order, before the month/day suffix.
fn default_anchors() -> [&'static str; 4] {
    [
        r"(?i)\b(?:submit|complete|send|accept|confirm|respond|upload|register|finish)\b[^.;!?]{0,60}?",
        r"(?i)\bdeadline\b[^.;!?]{0,40}?",
        r"(?i)\bdue\b[^.;!?]{0,40}?",
        r"(?i)\bby\s+",
    ]
}

/// Extracts short deadline phrases from message text.
#[derive(Debug, Clone)]
pub struct ActionItemExtractor {
    patterns: Vec<Regex>,
}

impl ActionItemExtractor {
    /// Build the extractor with the built-in pattern list.
    pub fn new() -> Result<Self, ConfigError> {
        let sources: Vec<String> = default_anchors()
            .iter()
            .map(|anchor| format!("{anchor}{MONTH_DAY}"))
            .collect();
        Self::with_patterns(&sources)
    }

    /// Build the extractor from explicit regex sources, in priority order.
    pub fn with_patterns<S: AsRef<str>>(sources: &[S]) -> Result<Self, ConfigError> {
        let patterns = sources
            .iter()
            .map(|src| {
                Regex::new(src.as_ref()).map_err(|source| ConfigError::Pattern {
                    pattern: src.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Extract up to three distinct deadline phrases.
    pub fn extract(&self, subject: &str, body: &str) -> Vec<String> {
        let text: String = format!("{subject} {body}")
            .chars()
            .take(TEXT_PREFIX_CHARS)
            .collect();

        let mut items: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            for m in pattern.find_iter(&text).take(MAX_MATCHES_PER_PATTERN) {
                if items.len() >= MAX_ITEMS {
                    return items;
                }
                let item = normalize(m.as_str());
                if item.chars().count() > MIN_ITEM_CHARS && !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        items.truncate(MAX_ITEMS);
        items
    }
}

/// Collapse whitespace runs and cut to `MAX_ITEM_CHARS`.
fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_ITEM_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ActionItemExtractor {
        ActionItemExtractor::new().unwrap()
    }

    #[test]
    fn tau_reminder_yields_march_15() {
        let items = extractor().extract(
            "Final Reminder: Submit TAU by March 15",
            "Your Transfer Academic Update is due by March 15.",
        );
        assert!(!items.is_empty());
        assert!(items.iter().any(|i| i.contains("March 15")));
        assert_eq!(items[0], "Submit TAU by March 15");
    }

    #[test]
    fn no_deadlines_yields_nothing() {
        let items = extractor().extract("Explore campus life", "Come visit us any time.");
        assert!(items.is_empty());
    }

    #[test]
    fn never_more_than_three_items() {
        let body = "Submit transcripts by April 1. Complete the form by April 2. \
                    Confirm housing by April 3. The deadline is May 1. \
                    Fees are due on June 5. Reply by July 9.";
        let items = extractor().extract("Several deadlines", body);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn earlier_patterns_take_priority() {
        let body = "The deadline is May 1. Submit transcripts by April 1. \
                    Complete the form by April 2. Confirm housing by April 3.";
        let items = extractor().extract("Deadlines", body);
        // Verb pattern runs first and contributes at most two matches.
        assert_eq!(items.len(), 3);
        assert!(items[0].starts_with("Submit"));
        assert!(items[1].starts_with("Complete"));
        assert!(items[2].starts_with("deadline"));
    }

    #[test]
    fn duplicates_are_dropped() {
        let items = extractor().extract(
            "Submit your SIR by May 1",
            "Submit your SIR by May 1",
        );
        let mut unique = items.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), items.len());
    }

    #[test]
    fn whitespace_is_normalized() {
        let items = extractor().extract("", "Please submit\n   the   form by   Nov 30");
        assert_eq!(items, vec!["submit the form by Nov 30".to_string()]);
    }

    #[test]
    fn short_matches_are_dropped() {
        // "by May 1" is only 8 characters.
        let items = extractor().extract("", "Reply by May 1");
        assert!(items.is_empty());
    }

    #[test]
    fn items_fit_length_cap() {
        let filler = "a ".repeat(29);
        let body = format!("Submit {filler}by December 31");
        let items = extractor().extract("", &body);
        assert!(!items.is_empty());
        assert!(items.iter().all(|i| i.chars().count() <= MAX_ITEM_CHARS));
    }

    #[test]
    fn normalize_truncates_long_phrases() {
        let long = "word ".repeat(40);
        assert_eq!(normalize(&long).chars().count(), MAX_ITEM_CHARS);
    }

    #[test]
    fn text_beyond_prefix_is_ignored() {
        let padding = "x".repeat(TEXT_PREFIX_CHARS);
        let items = extractor().extract("", &format!("{padding} Submit the form by May 20"));
        assert!(items.is_empty());
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let result = ActionItemExtractor::with_patterns(&["(unclosed"]);
        assert!(matches!(result, Err(ConfigError::Pattern { .. })));
    }
}
