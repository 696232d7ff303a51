//! Shared types for the classification pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::document::SchoolStatus;

// ── Category ────────────────────────────────────────────────────────

/// Classification outcome for a single message.
///
/// Only the first three are decisions; they map onto a `SchoolStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Acceptance,
    Rejection,
    Waitlist,
    ActionRequired,
    Informational,
}

impl Category {
    /// Short label for logging and the persisted email log.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acceptance => "acceptance",
            Self::Rejection => "rejection",
            Self::Waitlist => "waitlist",
            Self::ActionRequired => "action_required",
            Self::Informational => "informational",
        }
    }

    /// Status a school moves to when this category is detected, if any.
    pub fn decision_status(&self) -> Option<SchoolStatus> {
        match self {
            Self::Acceptance => Some(SchoolStatus::Accepted),
            Self::Rejection => Some(SchoolStatus::Rejected),
            Self::Waitlist => Some(SchoolStatus::Waitlisted),
            Self::ActionRequired | Self::Informational => None,
        }
    }

    pub fn is_decision(&self) -> bool {
        self.decision_status().is_some()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Category plus a heuristic confidence in `[0, 0.99]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
}

// ── Records ─────────────────────────────────────────────────────────

/// One newly observed message, as written to the email log.
///
/// Created once per message id and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Mailbox-assigned message id (dedup key).
    pub id: String,
    /// Key of the school whose domain matched.
    pub school: String,
    /// Calendar day the message was sent.
    pub date: NaiveDate,
    /// Subject line, truncated.
    pub subject: String,
    pub category: Category,
    pub confidence: f64,
    /// Sender address.
    pub from: String,
}

/// The winning decision for one school in one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolDecision {
    pub status: SchoolStatus,
    pub category: Category,
    pub confidence: f64,
    pub date: NaiveDate,
    /// Subject line of the message the decision came from.
    pub subject: String,
}

impl SchoolDecision {
    /// Free-text note stored on the school when this decision is merged.
    pub fn notes(&self) -> String {
        format!(
            "{} detected ({:.0}% confidence) from \"{}\"",
            self.category,
            self.confidence * 100.0,
            self.subject
        )
    }
}

/// Everything one school contributed to a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolScanResult {
    pub new_emails: Vec<EmailRecord>,
    pub decision: Option<SchoolDecision>,
    pub action_items: Vec<String>,
}

impl SchoolScanResult {
    pub fn is_empty(&self) -> bool {
        self.new_emails.is_empty() && self.decision.is_none() && self.action_items.is_empty()
    }
}
