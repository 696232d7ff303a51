//! The persisted tracker document.
//!
//! Loaded at the start of a scan, merged in memory, and fully rewritten at the
//! end. Field names match the JSON layout stored in the remote file.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::School;
use crate::error::StoreError;
use crate::pipeline::types::{EmailRecord, SchoolDecision};

/// The email log keeps at most this many entries, newest first.
pub const MAX_EMAIL_LOG: usize = 100;
/// The scan history keeps at most this many entries, newest first.
pub const MAX_SCAN_HISTORY: usize = 50;
/// Ids trimmed from the email log are remembered up to this many, newest
/// first, so they are not logged again while still inside the search window.
pub const MAX_RETIRED_IDS: usize = 1000;

// ── School status ───────────────────────────────────────────────────

/// Admission status of one school.
///
/// Values written by other tools survive a round trip as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SchoolStatus {
    #[default]
    Unknown,
    Accepted,
    Rejected,
    Waitlisted,
    Other(String),
}

impl SchoolStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => "unknown",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Waitlisted => "waitlisted",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SchoolStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unknown" | "" => Self::Unknown,
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "waitlisted" => Self::Waitlisted,
            _ => Self::Other(value),
        }
    }
}

impl From<SchoolStatus> for String {
    fn from(value: SchoolStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SchoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Document parts ──────────────────────────────────────────────────

/// Per-school state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchoolState {
    pub status: SchoolStatus,
    pub decision_date: Option<NaiveDate>,
    pub confidence: Option<f64>,
    pub notes: String,
    /// Distinct action items in insertion order. Never pruned.
    pub action_items: Vec<String>,
}

impl SchoolState {
    /// Overwrite status, date, confidence and notes with a decision.
    pub fn apply_decision(&mut self, decision: &SchoolDecision) {
        self.status = decision.status.clone();
        self.decision_date = Some(decision.date);
        self.confidence = Some(decision.confidence);
        self.notes = decision.notes();
    }

    /// Append items not already present. Returns how many were added.
    pub fn add_action_items<'a, I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut added = 0;
        for item in items {
            if !self.action_items.contains(item) {
                self.action_items.push(item.clone());
                added += 1;
            }
        }
        added
    }
}

/// Run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub last_scan: Option<DateTime<Utc>>,
    pub total_scans: u64,
    pub total_emails_processed: u64,
}

/// One line of scan history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub scan_date: NaiveDate,
    pub scan_timestamp: DateTime<Utc>,
    pub emails_found: usize,
    pub new_decisions: usize,
    pub notes: String,
}

// ── Document ────────────────────────────────────────────────────────

/// The whole persisted artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerDocument {
    pub metadata: Metadata,
    pub schools: BTreeMap<String, SchoolState>,
    /// Newest first, no duplicate ids.
    pub email_log: Vec<EmailRecord>,
    /// Newest first.
    pub scan_history: Vec<ScanHistoryEntry>,
    /// Ids of records trimmed from `email_log`, newest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retired_ids: Vec<String>,
}

impl TrackerDocument {
    /// A fresh document with every configured school set to `unknown`.
    pub fn new_for(schools: &[School]) -> Self {
        let mut doc = Self::default();
        doc.ensure_schools(schools);
        doc
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, StoreError> {
        serde_json::from_value(value).map_err(|e| StoreError::InvalidDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Add an `unknown` entry for configured schools missing from the document.
    pub fn ensure_schools(&mut self, schools: &[School]) {
        for school in schools {
            self.schools.entry(school.key.clone()).or_default();
        }
    }

    /// Ids already processed: everything in the email log plus ids trimmed
    /// from it.
    pub fn seen_ids(&self) -> HashSet<String> {
        self.email_log
            .iter()
            .map(|r| r.id.clone())
            .chain(self.retired_ids.iter().cloned())
            .collect()
    }

    /// Prepend new records, skipping ids already seen. Returns how many
    /// were added.
    pub fn prepend_emails(&mut self, records: &[EmailRecord]) -> usize {
        let mut seen = self.seen_ids();
        let fresh: Vec<EmailRecord> = records
            .iter()
            .filter(|r| seen.insert(r.id.clone()))
            .cloned()
            .collect();
        let added = fresh.len();
        self.email_log.splice(0..0, fresh);
        added
    }

    /// Mutable state for `key`, created as `unknown` if absent.
    pub fn school_mut(&mut self, key: &str) -> &mut SchoolState {
        self.schools.entry(key.to_string()).or_default()
    }

    /// Close out a scan: trim the log, bump counters and prepend a history
    /// entry.
    pub fn record_scan(
        &mut self,
        now: DateTime<Utc>,
        emails_found: usize,
        new_decisions: usize,
        notes: String,
    ) {
        if self.email_log.len() > MAX_EMAIL_LOG {
            let trimmed: Vec<String> = self
                .email_log
                .drain(MAX_EMAIL_LOG..)
                .map(|r| r.id)
                .collect();
            self.retired_ids.splice(0..0, trimmed);
            self.retired_ids.truncate(MAX_RETIRED_IDS);
        }

        self.metadata.last_scan = Some(now);
        self.metadata.total_scans += 1;
        self.metadata.total_emails_processed += emails_found as u64;

        self.scan_history.insert(
            0,
            ScanHistoryEntry {
                scan_date: now.date_naive(),
                scan_timestamp: now,
                emails_found,
                new_decisions,
                notes,
            },
        );
        self.scan_history.truncate(MAX_SCAN_HISTORY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_schools;
    use crate::pipeline::types::Category;

    fn record(id: &str) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            school: "ucla".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            subject: "Hello".into(),
            category: Category::Informational,
            confidence: 0.25,
            from: "news@ucla.edu".into(),
        }
    }

    #[test]
    fn status_roundtrips_known_and_unknown_values() {
        for raw in ["unknown", "accepted", "rejected", "waitlisted", "deferred"] {
            let status: SchoolStatus = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(serde_json::to_value(&status).unwrap(), raw);
        }
        let status: SchoolStatus = serde_json::from_value(serde_json::json!("deferred")).unwrap();
        assert_eq!(status, SchoolStatus::Other("deferred".into()));
    }

    #[test]
    fn new_document_has_every_school_unknown() {
        let doc = TrackerDocument::new_for(&default_schools());
        assert_eq!(doc.schools.len(), 9);
        assert!(doc.schools.values().all(|s| s.status == SchoolStatus::Unknown));
    }

    #[test]
    fn parses_minimal_and_full_json() {
        let doc = TrackerDocument::from_json(serde_json::json!({})).unwrap();
        assert!(doc.email_log.is_empty());

        let doc = TrackerDocument::from_json(serde_json::json!({
            "metadata": {"last_scan": "2026-03-01T12:00:00Z", "total_scans": 4, "total_emails_processed": 9},
            "schools": {"ucla": {"status": "accepted", "decision_date": "2026-02-28",
                                  "confidence": 0.99, "notes": "", "action_items": ["Submit SIR by May 1"]}},
            "email_log": [{"id": "m1", "school": "ucla", "date": "2026-02-28", "subject": "Welcome",
                           "category": "acceptance", "confidence": 0.99, "from": "a@ucla.edu"}],
            "scan_history": [{"scan_date": "2026-03-01", "scan_timestamp": "2026-03-01T12:00:00Z",
                              "emails_found": 1, "new_decisions": 1, "notes": "ok"}]
        }))
        .unwrap();
        assert_eq!(doc.metadata.total_scans, 4);
        assert_eq!(doc.schools["ucla"].status, SchoolStatus::Accepted);
        assert_eq!(doc.email_log[0].category, Category::Acceptance);
    }

    #[test]
    fn rejects_wrong_shape() {
        let result = TrackerDocument::from_json(serde_json::json!({"email_log": "nope"}));
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));
    }

    #[test]
    fn prepend_keeps_newest_first_and_skips_duplicates() {
        let mut doc = TrackerDocument::default();
        doc.prepend_emails(&[record("a")]);
        let added = doc.prepend_emails(&[record("b"), record("a"), record("b")]);
        assert_eq!(added, 1);
        let ids: Vec<_> = doc.email_log.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn trimmed_ids_are_not_logged_again() {
        let mut doc = TrackerDocument::default();
        let records: Vec<_> = (0..120).map(|i| record(&format!("m{i}"))).collect();
        doc.prepend_emails(&records);
        doc.record_scan(Utc::now(), 120, 0, "scan".into());

        assert_eq!(doc.prepend_emails(&[record("m110"), record("m5")]), 0);
        assert_eq!(doc.email_log.len(), MAX_EMAIL_LOG);
    }

    #[test]
    fn retired_ids_are_capped_and_optional_in_json() {
        let mut doc = TrackerDocument::default();
        let json = doc.to_json().unwrap();
        assert!(json.get("retired_ids").is_none());

        doc.retired_ids = (0..MAX_RETIRED_IDS).map(|i| format!("old{i}")).collect();
        let records: Vec<_> = (0..105).map(|i| record(&format!("m{i}"))).collect();
        doc.prepend_emails(&records);
        doc.record_scan(Utc::now(), 105, 0, "scan".into());
        assert_eq!(doc.retired_ids.len(), MAX_RETIRED_IDS);
        assert_eq!(doc.retired_ids[0], "m100");

        let back = TrackerDocument::from_json(doc.to_json().unwrap()).unwrap();
        assert_eq!(back.retired_ids, doc.retired_ids);
    }

    #[test]
    fn action_items_union_preserves_order() {
        let mut state = SchoolState {
            action_items: vec!["one thing by May 1".into()],
            ..SchoolState::default()
        };
        let added = state.add_action_items(&[
            "two things by May 2".to_string(),
            "one thing by May 1".to_string(),
        ]);
        assert_eq!(added, 1);
        assert_eq!(
            state.action_items,
            vec!["one thing by May 1", "two things by May 2"]
        );
    }

    #[test]
    fn record_scan_caps_log_and_history() {
        let mut doc = TrackerDocument::default();
        let records: Vec<_> = (0..150).map(|i| record(&format!("m{i}"))).collect();
        doc.prepend_emails(&records);
        let now = Utc::now();
        for _ in 0..60 {
            doc.record_scan(now, 1, 0, "scan".into());
        }
        assert_eq!(doc.email_log.len(), MAX_EMAIL_LOG);
        assert_eq!(doc.email_log[0].id, "m0");
        assert_eq!(doc.retired_ids.len(), 50);
        assert_eq!(doc.retired_ids[0], "m100");
        assert!(doc.seen_ids().contains("m149"));
        assert_eq!(doc.scan_history.len(), MAX_SCAN_HISTORY);
        assert_eq!(doc.metadata.total_scans, 60);
        assert_eq!(doc.metadata.total_emails_processed, 60);
        assert_eq!(doc.metadata.last_scan, Some(now));
    }
}
