//! External collaborators: mailbox search and outbound alerts.

pub mod email;
pub mod mailbox;
pub mod notifier;

pub use email::{EmailConfig, ImapMailbox, SmtpNotifier, alert_notifier};
pub use mailbox::{MailMessage, MailQuery, MailThread, Mailbox};
pub use notifier::{LogNotifier, Notifier};
