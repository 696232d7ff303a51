//! Error types for the admissions tracker.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox search/retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox connection failed: {0}")]
    Connection(String),

    #[error("Mailbox authentication failed")]
    AuthFailed,

    #[error("Search failed for query {query}: {reason}")]
    SearchFailed { query: String, reason: String },

    #[error("Message {id} could not be parsed")]
    Unparseable { id: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Persistence adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found at {path}@{git_ref}")]
    NotFound { path: String, git_ref: String },

    #[error("Version conflict saving {path}: token is stale")]
    Conflict { path: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Send to {recipient} failed: {reason}")]
    SendFailed { recipient: String, reason: String },
}

/// Failures raised while running a scan.
///
/// Only `LoadFailure` aborts a run. The others are collected into the
/// run summary so operators can tell lost results from skipped schools.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Failed to load tracker document: {0}")]
    LoadFailure(String),

    #[error("Scan of {school} failed: {reason}")]
    SchoolScanFailure { school: String, reason: String },

    #[error("Merged results were not persisted: {0}")]
    SaveFailure(String),

    #[error("Decision alert was not delivered: {0}")]
    NotifyFailure(String),
}

impl ScanError {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LoadFailure(_) => "load_failure",
            Self::SchoolScanFailure { .. } => "school_scan_failure",
            Self::SaveFailure(_) => "save_failure",
            Self::NotifyFailure(_) => "notify_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn scan_error_labels_are_distinct() {
        let errors = [
            ScanError::LoadFailure("x".into()),
            ScanError::SchoolScanFailure {
                school: "ucla".into(),
                reason: "x".into(),
            },
            ScanError::SaveFailure("x".into()),
            ScanError::NotifyFailure("x".into()),
        ];
        let labels: HashSet<_> = errors.iter().map(ScanError::label).collect();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn conflict_mentions_stale_token() {
        let err = StoreError::Conflict {
            path: "data/tracker.json".into(),
        };
        assert!(err.to_string().contains("data/tracker.json"));
        assert!(err.to_string().contains("stale"));
    }
}
