//! Email transport: IMAP search for inbound, SMTP via lettre for alerts.
//!
//! IMAP runs over raw TLS (rustls) on a blocking task. The mailbox is opened
//! with `EXAMINE` and bodies are fetched with `BODY.PEEK[]`, so scanning never
//! changes `\Seen` flags.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::mailbox::{MailMessage, MailQuery, MailThread, Mailbox, imap_quote};
use crate::channels::notifier::{LogNotifier, Notifier};
use crate::error::{MailboxError, NotifyError};

// ── Configuration ───────────────────────────────────────────────────

/// Mail transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    /// Alerts go out over SMTP only when this is set.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// IMAP folder searched for admissions mail.
    pub folder: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host = std::env::var("EMAIL_SMTP_HOST")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let folder = std::env::var("EMAIL_IMAP_FOLDER").unwrap_or_else(|_| "INBOX".to_string());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            folder,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP-backed mailbox. IMAP has no threads, so every message is returned
/// as its own single-message thread.
pub struct ImapMailbox {
    config: EmailConfig,
}

impl ImapMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn search(
        &self,
        query: &MailQuery,
        max_results: usize,
    ) -> Result<Vec<MailThread>, MailboxError> {
        let cfg = self.config.clone();
        let q = query.clone();
        tokio::task::spawn_blocking(move || search_imap(&cfg, &q, max_results))
            .await
            .map_err(|e| MailboxError::Connection(format!("IMAP task panicked: {e}")))?
    }
}

// ── Notifier ────────────────────────────────────────────────────────

/// Sends alerts over SMTP.
pub struct SmtpNotifier {
    config: EmailConfig,
}

impl SmtpNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

/// Send an email via SMTP (blocking).
fn send_email(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| NotifyError::InvalidAddress {
                    address: config.from_address.clone(),
                    reason: format!("{e}"),
                })?,
        )
        .to(to.parse().map_err(|e| NotifyError::InvalidAddress {
            address: to.into(),
            reason: format!("{e}"),
        })?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| NotifyError::SendFailed {
            recipient: to.into(),
            reason: format!("Failed to build email: {e}"),
        })?;

    let Some(smtp_host) = config.smtp_host.as_deref() else {
        return Err(NotifyError::SendFailed {
            recipient: to.into(),
            reason: "no SMTP host configured".into(),
        });
    };
    let transport = SmtpTransport::relay(smtp_host)
        .map_err(|e| NotifyError::SendFailed {
            recipient: to.into(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport.send(&email).map_err(|e| NotifyError::SendFailed {
        recipient: to.into(),
        reason: format!("SMTP send failed: {e}"),
    })?;

    info!("Alert sent to {to}");
    Ok(())
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let cfg = self.config.clone();
        let (to, subject, body) = (recipient.to_string(), subject.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || send_email(&cfg, &to, &subject, &body))
            .await
            .map_err(|e| NotifyError::SendFailed {
                recipient: recipient.into(),
                reason: format!("SMTP task panicked: {e}"),
            })?
    }
}

/// Notifier for decision and operator alerts: SMTP when a host is
/// configured, otherwise the log.
pub fn alert_notifier(config: &EmailConfig) -> Arc<dyn Notifier> {
    match &config.smtp_host {
        Some(_) => Arc::new(SmtpNotifier::new(config.clone())),
        None => Arc::new(LogNotifier),
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Extract readable text from a parsed email. Attachments are ignored.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Sent date of a parsed email in UTC, or `None` when the header is
/// missing/invalid. The header's zone offset is applied.
fn extract_date(parsed: &mail_parser::Message) -> Option<DateTime<Utc>> {
    let d = parsed.date()?;
    DateTime::from_timestamp(d.to_timestamp(), 0)
}

/// Turn a raw RFC 822 message into a `MailMessage`.
pub fn parse_message(raw: &[u8], fallback_id: &str) -> Result<MailMessage, MailboxError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailboxError::Unparseable {
            id: fallback_id.to_string(),
        })?;

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    Ok(MailMessage {
        id,
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: extract_text(&parsed),
        date: extract_date(&parsed).unwrap_or_else(Utc::now),
        sender: extract_sender(&parsed),
    })
}

/// Sequence numbers from `* SEARCH` response lines.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            ids.extend(line.split_whitespace().skip(2).map(str::to_string));
        }
    }
    ids
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn read_line(tls: &mut TlsStream) -> Result<String, MailboxError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(MailboxError::Connection("IMAP connection closed".into())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(MailboxError::Connection(e.to_string())),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, MailboxError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes()).map_err(|e| MailboxError::Connection(e.to_string()))?;
    IoWrite::flush(tls).map_err(|e| MailboxError::Connection(e.to_string()))?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

fn tagged_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains("OK"))
}

fn connect(config: &EmailConfig) -> Result<TlsStream, MailboxError> {
    let conn_err = |e: &dyn std::fmt::Display| MailboxError::Connection(e.to_string());

    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(|e| conn_err(&e))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| conn_err(&e))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(|e| conn_err(&e))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| conn_err(&e))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Run one IMAP search session (blocking, run in spawn_blocking).
fn search_imap(
    config: &EmailConfig,
    query: &MailQuery,
    max_results: usize,
) -> Result<Vec<MailThread>, MailboxError> {
    let mut tls = connect(config)?;

    // Read greeting
    let _greeting = read_line(&mut tls)?;

    let login = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ),
    )?;
    if !tagged_ok(&login) {
        return Err(MailboxError::AuthFailed);
    }

    let examine = send_cmd(&mut tls, "A2", &format!("EXAMINE {}", imap_quote(&config.folder)))?;
    if !tagged_ok(&examine) {
        return Err(MailboxError::SearchFailed {
            query: query.to_string(),
            reason: format!("cannot open folder {}", config.folder),
        });
    }

    let search = send_cmd(&mut tls, "A3", &format!("SEARCH {}", query.to_imap_search()))?;
    if !tagged_ok(&search) {
        return Err(MailboxError::SearchFailed {
            query: query.to_string(),
            reason: search.last().cloned().unwrap_or_default().trim().to_string(),
        });
    }

    // Sequence numbers ascend with arrival; newest first.
    let mut seqs = parse_search_response(&search);
    seqs.reverse();
    seqs.truncate(max_results);
    debug!(query = %query, matches = seqs.len(), "IMAP search complete");

    let mut threads = Vec::with_capacity(seqs.len());
    let mut tag_counter = 4_u32;

    for seq in &seqs {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;

        let message = match send_cmd(&mut tls, &fetch_tag, &format!("FETCH {seq} BODY.PEEK[]")) {
            Ok(resp) if tagged_ok(&resp) => {
                let raw: String = resp
                    .iter()
                    .skip(1)
                    .take(resp.len().saturating_sub(2))
                    .cloned()
                    .collect();
                parse_message(raw.as_bytes(), seq)
            }
            Ok(_) => Err(MailboxError::Unparseable { id: seq.clone() }),
            Err(e) => {
                warn!(seq = %seq, error = %e, "IMAP fetch failed, ending session early");
                threads.push(MailThread::new(seq.clone(), vec![Err(e)]));
                return Ok(threads);
            }
        };
        threads.push(MailThread::new(seq.clone(), vec![message]));
    }

    // Logout
    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(threads)
}

// ── Tests ───────────────────────────────────────────────────────────
