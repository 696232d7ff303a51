//! Mailbox collaborator: search-only access to the owner's inbox.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::MailboxError;

/// A single retrieved message.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    /// Mailbox-assigned unique id.
    pub id: String,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
    /// Sender address.
    pub sender: String,
}

/// A conversation thread.
///
/// A message that could not be fetched or parsed appears as an `Err` entry so
/// the rest of the thread is still usable.
#[derive(Debug)]
pub struct MailThread {
    pub id: String,
    pub messages: Vec<Result<MailMessage, MailboxError>>,
}

impl MailThread {
    pub fn new(id: impl Into<String>, messages: Vec<Result<MailMessage, MailboxError>>) -> Self {
        Self {
            id: id.into(),
            messages,
        }
    }
}

/// `from:<domain> after:<yyyy/mm/dd>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailQuery {
    pub domain: String,
    /// Messages dated on or after this day match.
    pub after: NaiveDate,
}

impl MailQuery {
    /// Query for a domain covering the last `days_back` days.
    pub fn recent(domain: &str, now: DateTime<Utc>, days_back: i64) -> Self {
        Self {
            domain: domain.to_string(),
            after: (now - Duration::days(days_back)).date_naive(),
        }
    }

    /// IMAP `SEARCH` arguments for this query.
    pub fn to_imap_search(&self) -> String {
        format!(
            "FROM {} SINCE {}",
            imap_quote(&self.domain),
            self.after.format("%d-%b-%Y")
        )
    }
}

impl std::fmt::Display for MailQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "from:{} after:{}", self.domain, self.after.format("%Y/%m/%d"))
    }
}

impl FromStr for MailQuery {
    type Err = MailboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut domain = None;
        let mut after = None;
        for term in s.split_whitespace() {
            if let Some(d) = term.strip_prefix("from:") {
                domain = Some(d.to_string());
            } else if let Some(raw) = term.strip_prefix("after:") {
                after = Some(
                    NaiveDate::parse_from_str(raw, "%Y/%m/%d")
                        .map_err(|e| MailboxError::InvalidQuery(format!("{raw}: {e}")))?,
                );
            } else {
                return Err(MailboxError::InvalidQuery(format!("unknown term '{term}'")));
            }
        }
        match (domain, after) {
            (Some(domain), Some(after)) if !domain.is_empty() => Ok(Self { domain, after }),
            _ => Err(MailboxError::InvalidQuery(format!(
                "expected 'from:<domain> after:<yyyy/mm/dd>', got '{s}'"
            ))),
        }
    }
}

/// Quote a string for an IMAP command.
pub fn imap_quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Search-only mailbox access.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logging.
    fn name(&self) -> &str;

    /// Threads matching `query`, newest first, at most `max_results`.
    async fn search(
        &self,
        query: &MailQuery,
        max_results: usize,
    ) -> Result<Vec<MailThread>, MailboxError>;
}
