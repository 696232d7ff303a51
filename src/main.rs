use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use admissions_tracker::channels::{EmailConfig, ImapMailbox, Mailbox, Notifier, alert_notifier};
use admissions_tracker::config::{StoreBackend, TrackerConfig};
use admissions_tracker::pipeline::orchestrator::{self, OrchestratorDeps, ScanOrchestrator};
use admissions_tracker::scheduler::{Cadence, spawn_scan_scheduler};
use admissions_tracker::store::{DocumentStore, FileStore, GitHubStore};

/// Subcommand, taken from the first CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// One scan, then exit.
    Scan,
    /// Scan without saving or alerting and print what would change.
    DryRun,
    /// Create the tracker document.
    Init,
    /// Scan on a schedule until Ctrl+C.
    Serve,
}

impl Command {
    fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg {
            None | Some("serve") => Ok(Self::Serve),
            Some("scan") => Ok(Self::Scan),
            Some("dry-run") => Ok(Self::DryRun),
            Some("init") => Ok(Self::Init),
            Some(other) => bail!("unknown command '{other}' (expected scan, dry-run, init or serve)"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    // Keep the guard alive so the file writer flushes on exit.
    let _log_guard = init_tracing()?;

    let arg = std::env::args().nth(1);
    let command = Command::parse(arg.as_deref())?;
    let config = TrackerConfig::from_env().context("loading configuration")?;

    eprintln!("🎓 Admissions Tracker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Schools: {}", config.schools.len());
    eprintln!("   Document: {}", config.store.location);

    let store: Arc<dyn DocumentStore> = match &config.store.backend {
        StoreBackend::GitHub { repo, token } => {
            eprintln!("   Store: github ({repo})");
            Arc::new(GitHubStore::new(repo.clone(), token.clone()))
        }
        StoreBackend::File => {
            let root = std::env::var("ADMISSIONS_DATA_DIR").unwrap_or_else(|_| ".".to_string());
            eprintln!("   Store: file ({root})");
            Arc::new(FileStore::new(root))
        }
    };

    if command == Command::Init {
        let version =
            orchestrator::init_document(store.as_ref(), &config.store.location, &config.schools)
                .await
                .context("creating tracker document")?;
        eprintln!("   Created {} (version {version})", config.store.location);
        return Ok(());
    }

    let Some(email_config) = EmailConfig::from_env() else {
        bail!("EMAIL_IMAP_HOST is required to scan (with EMAIL_USERNAME and EMAIL_PASSWORD)");
    };
    eprintln!("   Mailbox: {} ({})", email_config.imap_host, email_config.folder);

    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(email_config.clone()));
    match &email_config.smtp_host {
        Some(host) => eprintln!("   Alerts: smtp ({host})"),
        None => eprintln!("   Alerts: log only (EMAIL_SMTP_HOST not set)"),
    }
    let notifier: Arc<dyn Notifier> = alert_notifier(&email_config);

    let orchestrator = Arc::new(
        ScanOrchestrator::new(
            &config,
            OrchestratorDeps {
                mailbox,
                store,
                notifier,
            },
        )
        .context("building scan pipeline")?,
    );

    match command {
        Command::Scan => {
            let summary = orchestrator.run_scan().await?;
            eprintln!(
                "   {} new email(s), {} decision(s), {} school failure(s)",
                summary.new_email_count,
                summary.decision_count,
                summary.school_failures.len()
            );
            if let Some(failure) = summary.save_failure {
                bail!(failure);
            }
        }
        Command::DryRun => {
            let report = orchestrator.dry_run().await?;
            println!("{}", report.render());
        }
        Command::Serve => {
            let cadence = Cadence::from_config(&config.schedule)?;
            eprintln!("   Schedule: {cadence}\n");
            let (handle, shutdown) = spawn_scan_scheduler(Arc::clone(&orchestrator), cadence);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Ctrl+C received, shutting down...");
            shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
            handle.abort();
        }
        Command::Init => {}
    }

    Ok(())
}

/// Stderr logging filtered by `RUST_LOG`, plus a daily file when
/// `ADMISSIONS_LOG_DIR` is set.
fn init_tracing() -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("ADMISSIONS_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "admissions-tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .try_init()
                .context("installing tracing subscriber")?;
            Ok(Some(guard))
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .try_init()
                .context("installing tracing subscriber")?;
            Ok(None)
        }
    }
}
