//! Per-school scanner.
//!
//! Searches one school's domain, classifies every message whose id has not
//! been seen, and picks at most one decision for the school. The id check is
//! the only dedup; message content is never compared.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::channels::mailbox::{MailMessage, MailQuery, Mailbox};
use crate::config::{ScanConfig, School};
use crate::error::MailboxError;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::extractor::ActionItemExtractor;
use crate::pipeline::types::{Classification, EmailRecord, SchoolDecision, SchoolScanResult};

/// Scans one school at a time. Holds no tracker state.
pub struct SchoolScanner {
    mailbox: Arc<dyn Mailbox>,
    classifier: Classifier,
    extractor: ActionItemExtractor,
    config: ScanConfig,
}

impl SchoolScanner {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Classifier,
        extractor: ActionItemExtractor,
        config: ScanConfig,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            extractor,
            config,
        }
    }

    /// Scan `school` for messages not in `seen`.
    ///
    /// Fails only when the search itself fails; unreadable messages are
    /// logged and skipped.
    pub async fn scan(
        &self,
        school: &School,
        seen: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<SchoolScanResult, MailboxError> {
        let query = MailQuery::recent(&school.domain, now, self.config.days_back);
        let threads = self.mailbox.search(&query, self.config.max_threads).await?;
        debug!(school = %school.key, query = %query, threads = threads.len(), "Mailbox search returned");

        let mut observed: HashSet<String> = HashSet::new();
        let mut records: Vec<(DateTime<Utc>, EmailRecord)> = Vec::new();
        let mut result = SchoolScanResult::default();

        for thread in threads {
            for fetched in thread.messages {
                let message = match fetched {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(school = %school.key, thread = %thread.id, error = %e, "Skipping unreadable message");
                        continue;
                    }
                };
                if message.id.is_empty()
                    || seen.contains(&message.id)
                    || !observed.insert(message.id.clone())
                {
                    continue;
                }

                let classification = self.classifier.classify(&message.subject, &message.body);
                debug!(
                    school = %school.key,
                    id = %message.id,
                    category = %classification.category,
                    confidence = classification.confidence,
                    "Classified message"
                );

                for item in self.extractor.extract(&message.subject, &message.body) {
                    if !result.action_items.contains(&item) {
                        result.action_items.push(item);
                    }
                }

                self.consider_decision(&mut result.decision, &message, classification);
                records.push((message.date, self.record(school, &message, classification)));
            }
        }

        // Newest first; stable so equal timestamps keep mailbox order.
        records.sort_by_key(|(date, _)| Reverse(*date));
        result.new_emails = records.into_iter().map(|(_, r)| r).collect();
        Ok(result)
    }

    /// Keep the higher-confidence decision. Only a strict improvement replaces
    /// the current one.
    fn consider_decision(
        &self,
        best: &mut Option<SchoolDecision>,
        message: &MailMessage,
        classification: Classification,
    ) {
        let Some(status) = classification.category.decision_status() else {
            return;
        };
        if classification.confidence < self.classifier.config().decision_threshold {
            return;
        }
        if best
            .as_ref()
            .is_some_and(|current| classification.confidence <= current.confidence)
        {
            return;
        }
        *best = Some(SchoolDecision {
            status,
            category: classification.category,
            confidence: classification.confidence,
            date: message.date.date_naive(),
            subject: message.subject.clone(),
        });
    }

    fn record(
        &self,
        school: &School,
        message: &MailMessage,
        classification: Classification,
    ) -> EmailRecord {
        EmailRecord {
            id: message.id.clone(),
            school: school.key.clone(),
            date: message.date.date_naive(),
            subject: message
                .subject
                .chars()
                .take(self.config.subject_max_chars)
                .collect(),
            category: classification.category,
            confidence: classification.confidence,
            from: message.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::channels::mailbox::MailThread;
    use crate::config::{ClassifierConfig, KeywordRule};
    use crate::pipeline::types::Category;
    use crate::store::document::SchoolStatus;

    /// In-memory mailbox: one thread per message, plus unreadable entries.
    struct StubMailbox {
        messages: Vec<MailMessage>,
        unreadable: usize,
        fail: bool,
    }

    #[async_trait]
    impl Mailbox for StubMailbox {
        fn name(&self) -> &str {
            "stub"
        }

        async fn search(
            &self,
            query: &MailQuery,
            max_results: usize,
        ) -> Result<Vec<MailThread>, MailboxError> {
            if self.fail {
                return Err(MailboxError::SearchFailed {
                    query: query.to_string(),
                    reason: "offline".into(),
                });
            }
            let mut threads: Vec<MailThread> = (0..self.unreadable)
                .map(|i| {
                    MailThread::new(
                        format!("bad-{i}"),
                        vec![Err(MailboxError::Unparseable { id: i.to_string() })],
                    )
                })
                .collect();
            threads.extend(
                self.messages
                    .iter()
                    .filter(|m| m.sender.ends_with(&query.domain))
                    .map(|m| MailThread::new(m.id.clone(), vec![Ok(m.clone())])),
            );
            threads.truncate(max_results);
            Ok(threads)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn msg(id: &str, day: u32, subject: &str, body: &str) -> MailMessage {
        MailMessage {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
            date: Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap(),
            sender: "admissions@berkeley.edu".into(),
        }
    }

    fn berkeley() -> School {
        School::new("berkeley", "berkeley.edu", "UC Berkeley", "UCB", "uc")
    }

    fn scanner_with(mailbox: StubMailbox, classifier: ClassifierConfig) -> SchoolScanner {
        SchoolScanner::new(
            Arc::new(mailbox),
            Classifier::new(classifier),
            ActionItemExtractor::new().unwrap(),
            ScanConfig::default(),
        )
    }

    fn scanner(messages: Vec<MailMessage>) -> SchoolScanner {
        scanner_with(
            StubMailbox {
                messages,
                unreadable: 0,
                fail: false,
            },
            ClassifierConfig::default(),
        )
    }

    /// Acceptance scores 0.6 per subject hit; rejection 0.5 per body hit.
    fn weighted_config() -> ClassifierConfig {
        ClassifierConfig {
            rules: vec![
                KeywordRule::new(Category::Acceptance, &["admitted"], &[], 0.4),
                KeywordRule::new(Category::Rejection, &[], &["sorry"], 0.4),
            ],
            subject_weight: 0.6,
            body_weight: 0.5,
            ..ClassifierConfig::default()
        }
    }

    #[tokio::test]
    async fn classifies_new_messages_and_finds_decision() {
        let scanner = scanner(vec![
            msg("m1", 18, "Explore campus life", "Come visit."),
            msg(
                "m2",
                19,
                "Congratulations! You have been admitted to UC Berkeley",
                "We are pleased to offer you admission. Submit your SIR by May 1.",
            ),
        ]);
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();

        assert_eq!(result.new_emails.len(), 2);
        assert_eq!(result.new_emails[0].id, "m2", "newest first");
        let decision = result.decision.unwrap();
        assert_eq!(decision.status, SchoolStatus::Accepted);
        assert_eq!(decision.confidence, 0.99);
        assert_eq!(decision.date.to_string(), "2026-03-19");
        assert_eq!(result.action_items, vec!["Submit your SIR by May 1"]);
    }

    #[tokio::test]
    async fn seen_ids_are_skipped() {
        let scanner = scanner(vec![msg("m1", 18, "Congratulations, admitted", "")]);
        let seen: HashSet<String> = ["m1".to_string()].into();
        let result = scanner.scan(&berkeley(), &seen, now()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_search_are_logged_once() {
        let scanner = scanner(vec![
            msg("m1", 18, "Hello", ""),
            msg("m1", 18, "Hello", ""),
        ]);
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        assert_eq!(result.new_emails.len(), 1);
    }

    #[tokio::test]
    async fn higher_first_decision_is_kept() {
        let scanner = scanner_with(
            StubMailbox {
                messages: vec![
                    msg("a", 18, "You are admitted", ""),
                    msg("b", 19, "Update", "We are sorry."),
                ],
                unreadable: 0,
                fail: false,
            },
            weighted_config(),
        );
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        let decision = result.decision.unwrap();
        assert_eq!(decision.confidence, 0.6);
        assert_eq!(decision.status, SchoolStatus::Accepted);
    }

    #[tokio::test]
    async fn later_decision_must_strictly_improve() {
        let scanner = scanner_with(
            StubMailbox {
                messages: vec![
                    msg("b", 18, "Update", "We are sorry."),
                    msg("c", 19, "Notice", "So sorry."),
                    msg("a", 20, "You are admitted", ""),
                ],
                unreadable: 0,
                fail: false,
            },
            weighted_config(),
        );
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        let decision = result.decision.unwrap();
        assert_eq!(decision.status, SchoolStatus::Accepted);

        // Two equal 0.5 rejections: the first one stays.
        let scanner = scanner_with(
            StubMailbox {
                messages: vec![
                    msg("b", 18, "Update", "We are sorry."),
                    msg("c", 19, "Notice", "So sorry."),
                ],
                unreadable: 0,
                fail: false,
            },
            weighted_config(),
        );
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        assert_eq!(result.decision.unwrap().subject, "Update");
    }

    #[tokio::test]
    async fn action_required_is_never_a_decision() {
        let scanner = scanner(vec![msg(
            "m1",
            18,
            "Final Reminder: Submit TAU by March 15",
            "Your Transfer Academic Update is due by March 15.",
        )]);
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        assert!(result.decision.is_none());
        assert_eq!(result.new_emails[0].category, Category::ActionRequired);
        assert!(result.action_items.iter().any(|i| i.contains("March 15")));
    }

    #[tokio::test]
    async fn unreadable_messages_are_dropped_not_fatal() {
        let scanner = scanner_with(
            StubMailbox {
                messages: vec![msg("m1", 18, "Hello", "")],
                unreadable: 2,
                fail: false,
            },
            ClassifierConfig::default(),
        );
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        assert_eq!(result.new_emails.len(), 1);
    }

    #[tokio::test]
    async fn search_failure_is_returned() {
        let scanner = scanner_with(
            StubMailbox {
                messages: vec![],
                unreadable: 0,
                fail: true,
            },
            ClassifierConfig::default(),
        );
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await;
        assert!(matches!(result, Err(MailboxError::SearchFailed { .. })));
    }

    #[tokio::test]
    async fn long_subjects_are_truncated_in_records() {
        let subject = "S".repeat(300);
        let scanner = scanner(vec![msg("m1", 18, &subject, "")]);
        let result = scanner.scan(&berkeley(), &HashSet::new(), now()).await.unwrap();
        assert_eq!(result.new_emails[0].subject.chars().count(), 100);
    }
}
