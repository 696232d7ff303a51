//! Weighted keyword classifier.
//!
//! Scores lowercase subject/body text against each configured `KeywordRule`:
//! every subject keyword found adds `subject_weight`, every body keyword found
//! adds `body_weight`. The strictly highest score wins, so on a tie the rule
//! listed first keeps the lead. A winner must beat the informational baseline
//! and reach its own `min_score`; otherwise the message is `informational`.

use tracing::debug;

use crate::config::{ClassifierConfig, KeywordRule};
use crate::pipeline::types::{Category, Classification};

/// Pure keyword classifier over a fixed rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    /// Keywords are lowercased here so rules loaded from a file match the
    /// lowercased message text.
    pub fn new(mut config: ClassifierConfig) -> Self {
        for rule in &mut config.rules {
            for kw in rule
                .subject_keywords
                .iter_mut()
                .chain(rule.body_keywords.iter_mut())
            {
                *kw = kw.to_lowercase();
            }
        }
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one message.
    pub fn classify(&self, subject: &str, body: &str) -> Classification {
        let subject = subject.to_lowercase();
        let body: String = body
            .to_lowercase()
            .chars()
            .take(self.config.body_prefix_chars)
            .collect();

        let mut best: Option<(&KeywordRule, f64)> = None;
        for rule in &self.config.rules {
            let score = self.score(rule, &subject, &body);
            if score > 0.0 {
                debug!(category = %rule.category, score, "Keyword score");
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((rule, score));
            }
        }

        match best {
            Some((rule, score))
                if score > self.config.informational_baseline && score >= rule.min_score =>
            {
                Classification {
                    category: rule.category,
                    confidence: round2(score).min(self.config.max_confidence),
                }
            }
            _ => self.informational(),
        }
    }

    fn score(&self, rule: &KeywordRule, subject: &str, body: &str) -> f64 {
        let subject_hits = rule
            .subject_keywords
            .iter()
            .filter(|kw| subject.contains(kw.as_str()))
            .count();
        let body_hits = rule
            .body_keywords
            .iter()
            .filter(|kw| body.contains(kw.as_str()))
            .count();
        subject_hits as f64 * self.config.subject_weight + body_hits as f64 * self.config.body_weight
    }

    fn informational(&self) -> Classification {
        Classification {
            category: Category::Informational,
            confidence: self.config.informational_baseline,
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
