//! Recurring scan trigger.
//!
//! Runs one scan at a time: the next fire time is computed only after the
//! previous run returns, so runs never overlap.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::ConfigError;
use crate::pipeline::orchestrator::ScanOrchestrator;

/// When scans fire.
#[derive(Debug, Clone)]
pub enum Cadence {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Cadence {
    /// A cron expression wins over the fixed interval.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        match &config.cron {
            Some(expr) => {
                let schedule = cron::Schedule::from_str(expr).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "ADMISSIONS_SCHEDULE".into(),
                        message: format!("invalid cron '{expr}': {e}"),
                    }
                })?;
                Ok(Self::Cron(Box::new(schedule)))
            }
            None if config.interval.is_zero() => Err(ConfigError::InvalidValue {
                key: "ADMISSIONS_SCAN_INTERVAL_SECS".into(),
                message: "interval must be positive".into(),
            }),
            None => Ok(Self::Every(config.interval)),
        }
    }

    /// How long to wait from `now` until the next scan.
    ///
    /// `None` when a cron schedule has no future fire time.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Every(interval) => Some(*interval),
            Self::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cron(schedule) => write!(f, "cron '{schedule}'"),
            Self::Every(interval) => write!(f, "every {}s", interval.as_secs()),
        }
    }
}

/// Spawn the background scan loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop after the
/// current wait or run.
pub fn spawn_scan_scheduler(
    orchestrator: Arc<ScanOrchestrator>,
    cadence: Cadence,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(%cadence, schools = orchestrator.schools().len(), "Scan scheduler started");

        loop {
            let Some(delay) = cadence.delay_from(Utc::now()) else {
                warn!(%cadence, "Schedule has no future fire time, scheduler stopping");
                return;
            };
            tokio::time::sleep(delay).await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Scan scheduler shutting down");
                return;
            }

            match orchestrator.run_scan().await {
                Ok(summary) if !summary.is_clean() => warn!(
                    school_failures = summary.school_failures.len(),
                    save_failed = !summary.persisted(),
                    notify_failed = summary.notify_failure.is_some(),
                    "Scheduled scan finished with failures"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Scheduled scan aborted"),
            }
        }
    });

    (handle, shutdown_flag)
}
