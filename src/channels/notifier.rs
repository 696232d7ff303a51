//! Notifier collaborator: fire-and-forget outbound alerts.

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

/// Delivers an alert. No delivery confirmation beyond the call succeeding.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name for logging.
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of sending them. Used when no SMTP
/// transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(recipient, subject, "Alert (not sent, no SMTP transport)\n{body}");
        Ok(())
    }
}
