//! Scan orchestrator.
//!
//! One run walks a fixed sequence of stages:
//!
//! ```text
//! Loading -> Scanning -> Merging -> Saving -> Notifying -> Done
//!    |
//!    +-> Aborted (document could not be loaded)
//! ```
//!
//! A failure scanning one school is collected and the run continues. A save
//! or notify failure is reported in the summary; the run still completes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::channels::mailbox::Mailbox;
use crate::channels::notifier::Notifier;
use crate::config::{NotifyConfig, School, TrackerConfig};
use crate::error::{ConfigError, ScanError, StoreError};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::extractor::ActionItemExtractor;
use crate::pipeline::scanner::SchoolScanner;
use crate::pipeline::types::{SchoolDecision, SchoolScanResult};
use crate::store::document::TrackerDocument;
use crate::store::traits::{DocumentLocation, DocumentStore, VersionToken};

/// External collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub mailbox: Arc<dyn Mailbox>,
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Stage of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    Loading,
    Scanning,
    Merging,
    Saving,
    Notifying,
    Done,
    Aborted,
}

impl ScanStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Scanning => "scanning",
            Self::Merging => "merging",
            Self::Saving => "saving",
            Self::Notifying => "notifying",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for ScanStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a completed (not aborted) run.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Email records added to the log this run.
    pub new_email_count: usize,
    /// Schools whose status was set by this run.
    pub decision_count: usize,
    /// One entry per school whose search failed.
    pub school_failures: Vec<ScanError>,
    /// Set when the merged document was not persisted.
    pub save_failure: Option<ScanError>,
    /// Set when the decision alert was not delivered.
    pub notify_failure: Option<ScanError>,
    /// Version token of the saved document.
    pub version: Option<VersionToken>,
}

impl ScanSummary {
    pub fn persisted(&self) -> bool {
        self.save_failure.is_none()
    }

    /// True when nothing went wrong anywhere in the run.
    pub fn is_clean(&self) -> bool {
        self.school_failures.is_empty()
            && self.save_failure.is_none()
            && self.notify_failure.is_none()
    }
}

/// One school's contribution to a run.
#[derive(Debug)]
pub struct SchoolOutcome {
    pub school: School,
    pub result: Result<SchoolScanResult, ScanError>,
}

/// What a merge changed.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub new_email_count: usize,
    /// Decisions applied, in school order.
    pub decisions: Vec<(School, SchoolDecision)>,
    pub action_items_added: usize,
}

/// Read-only preview of what a scan would record.
#[derive(Debug)]
pub struct DryRunReport {
    pub generated_at: DateTime<Utc>,
    pub schools: Vec<(School, SchoolScanResult)>,
    pub failures: Vec<ScanError>,
}

impl DryRunReport {
    pub fn new_email_count(&self) -> usize {
        self.schools.iter().map(|(_, r)| r.new_emails.len()).sum()
    }

    pub fn decision_count(&self) -> usize {
        self.schools
            .iter()
            .filter(|(_, r)| r.decision.is_some())
            .count()
    }

    /// Plain-text rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Dry run at {}: {} new email(s), {} decision(s)\n",
            self.generated_at.format("%Y-%m-%d %H:%M UTC"),
            self.new_email_count(),
            self.decision_count()
        );
        for (school, result) in &self.schools {
            if result.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{} ({})\n", school.name, school.key));
            for record in &result.new_emails {
                out.push_str(&format!(
                    "  {} [{} {:.2}] {}\n",
                    record.date, record.category, record.confidence, record.subject
                ));
            }
            if let Some(decision) = &result.decision {
                out.push_str(&format!(
                    "  => {} ({:.0}%)\n",
                    decision.status.as_str().to_uppercase(),
                    decision.confidence * 100.0
                ));
            }
            for item in &result.action_items {
                out.push_str(&format!("  - {item}\n"));
            }
        }
        for failure in &self.failures {
            out.push_str(&format!("\n! {failure}\n"));
        }
        out
    }
}

/// Drives a full scan across every configured school.
pub struct ScanOrchestrator {
    schools: Vec<School>,
    scanner: SchoolScanner,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    location: DocumentLocation,
    notify: NotifyConfig,
}

impl ScanOrchestrator {
    pub fn new(config: &TrackerConfig, deps: OrchestratorDeps) -> Result<Self, ConfigError> {
        let scanner = SchoolScanner::new(
            deps.mailbox,
            Classifier::new(config.classifier.clone()),
            ActionItemExtractor::new()?,
            config.scan.clone(),
        );
        Ok(Self {
            schools: config.schools.clone(),
            scanner,
            store: deps.store,
            notifier: deps.notifier,
            location: config.store.location.clone(),
            notify: config.notify.clone(),
        })
    }

    pub fn schools(&self) -> &[School] {
        &self.schools
    }

    fn enter(&self, stage: ScanStage) {
        info!(stage = %stage, document = %self.location, "Scan stage");
    }

    /// Run a scan now.
    pub async fn run_scan(&self) -> Result<ScanSummary, ScanError> {
        self.run_scan_at(Utc::now()).await
    }

    /// Run a scan as of `now`.
    ///
    /// Returns `Err` only when the document cannot be loaded; nothing is
    /// written in that case.
    pub async fn run_scan_at(&self, now: DateTime<Utc>) -> Result<ScanSummary, ScanError> {
        self.enter(ScanStage::Loading);
        let (mut doc, version) = match self.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.enter(ScanStage::Aborted);
                error!(error = %e, "Scan aborted");
                self.alert_operator(&e).await;
                return Err(e);
            }
        };
        doc.ensure_schools(&self.schools);

        self.enter(ScanStage::Scanning);
        let outcomes = self.scan_all(doc.seen_ids(), now).await;

        self.enter(ScanStage::Merging);
        let mut summary = ScanSummary::default();
        let report = merge_outcomes(&mut doc, outcomes, now, &mut summary.school_failures);
        summary.new_email_count = report.new_email_count;
        summary.decision_count = report.decisions.len();

        self.enter(ScanStage::Saving);
        let message = commit_message(now, summary.new_email_count, summary.decision_count);
        match self.save(&doc, &version, &message).await {
            Ok(token) => summary.version = Some(token),
            Err(e) => {
                error!(error = %e, "Scan results were not persisted");
                summary.save_failure = Some(e);
            }
        }

        self.enter(ScanStage::Notifying);
        if let Err(e) = self.alert_decisions(&report.decisions).await {
            warn!(error = %e, "Decision alert failed");
            summary.notify_failure = Some(e);
        }

        self.enter(ScanStage::Done);
        info!(
            new_emails = summary.new_email_count,
            decisions = summary.decision_count,
            school_failures = summary.school_failures.len(),
            persisted = summary.persisted(),
            "Scan complete"
        );
        Ok(summary)
    }

    /// Scan every school without saving or notifying.
    ///
    /// Reads the document so previously logged ids are still skipped.
    pub async fn dry_run(&self) -> Result<DryRunReport, ScanError> {
        self.dry_run_at(Utc::now()).await
    }

    pub async fn dry_run_at(&self, now: DateTime<Utc>) -> Result<DryRunReport, ScanError> {
        let (doc, _) = self.load().await?;
        let mut report = DryRunReport {
            generated_at: now,
            schools: Vec::new(),
            failures: Vec::new(),
        };
        for outcome in self.scan_all(doc.seen_ids(), now).await {
            match outcome.result {
                Ok(result) => report.schools.push((outcome.school, result)),
                Err(e) => report.failures.push(e),
            }
        }
        Ok(report)
    }

    /// Write a fresh document with every configured school `unknown`.
    pub async fn init_document(&self) -> Result<VersionToken, StoreError> {
        init_document(self.store.as_ref(), &self.location, &self.schools).await
    }

    async fn load(&self) -> Result<(TrackerDocument, VersionToken), ScanError> {
        let loaded = self
            .store
            .load(&self.location)
            .await
            .map_err(|e| ScanError::LoadFailure(e.to_string()))?;
        let doc = TrackerDocument::from_json(loaded.document)
            .map_err(|e| ScanError::LoadFailure(e.to_string()))?;
        Ok((doc, loaded.version))
    }

    /// Scan schools in configured order. Ids logged by earlier schools are
    /// skipped by later ones.
    async fn scan_all(&self, mut seen: HashSet<String>, now: DateTime<Utc>) -> Vec<SchoolOutcome> {
        let mut outcomes = Vec::with_capacity(self.schools.len());
        for school in &self.schools {
            let result = match self.scanner.scan(school, &seen, now).await {
                Ok(result) => {
                    info!(
                        school = %school.key,
                        new_emails = result.new_emails.len(),
                        decision = result.decision.as_ref().map(|d| d.status.as_str()).unwrap_or("none"),
                        "School scanned"
                    );
                    seen.extend(result.new_emails.iter().map(|r| r.id.clone()));
                    Ok(result)
                }
                Err(e) => {
                    warn!(school = %school.key, error = %e, "School scan failed");
                    Err(ScanError::SchoolScanFailure {
                        school: school.key.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            outcomes.push(SchoolOutcome {
                school: school.clone(),
                result,
            });
        }
        outcomes
    }

    async fn save(
        &self,
        doc: &TrackerDocument,
        version: &VersionToken,
        message: &str,
    ) -> Result<VersionToken, ScanError> {
        let json = doc
            .to_json()
            .map_err(|e| ScanError::SaveFailure(e.to_string()))?;
        self.store
            .save(&self.location, &json, Some(version), message)
            .await
            .map_err(|e| ScanError::SaveFailure(e.to_string()))
    }

    async fn alert_decisions(&self, decisions: &[(School, SchoolDecision)]) -> Result<(), ScanError> {
        if decisions.is_empty() {
            return Ok(());
        }
        let Some(recipient) = &self.notify.recipient else {
            warn!(
                decisions = decisions.len(),
                "No alert recipient configured, decision alert skipped"
            );
            return Ok(());
        };
        let (subject, body) = decision_alert(decisions);
        self.notifier
            .send(recipient, &subject, &body)
            .await
            .map_err(|e| ScanError::NotifyFailure(e.to_string()))?;
        info!(notifier = self.notifier.name(), %subject, "Decision alert sent");
        Ok(())
    }

    async fn alert_operator(&self, failure: &ScanError) {
        let Some(operator) = &self.notify.operator else {
            return;
        };
        let body = format!(
            "The admissions scan could not start.\n\nDocument: {}\nError: {failure}\n\nNothing was written.",
            self.location
        );
        if let Err(e) = self
            .notifier
            .send(operator, "Admissions tracker: scan aborted", &body)
            .await
        {
            error!(error = %e, "Operator alert failed");
        }
    }
}

/// Write a fresh document with every school `unknown`.
///
/// Refuses to overwrite: the save carries no version token, so an existing
/// document produces a conflict.
pub async fn init_document(
    store: &dyn DocumentStore,
    location: &DocumentLocation,
    schools: &[School],
) -> Result<VersionToken, StoreError> {
    let doc = TrackerDocument::new_for(schools);
    let token = store
        .save(location, &doc.to_json()?, None, "Initialize admissions tracker")
        .await?;
    info!(document = %location, version = %token, "Tracker document created");
    Ok(token)
}

/// Fold per-school outcomes into the document and close out the scan.
///
/// Failed schools are moved into `failures` and leave the document untouched.
pub fn merge_outcomes(
    doc: &mut TrackerDocument,
    outcomes: Vec<SchoolOutcome>,
    now: DateTime<Utc>,
    failures: &mut Vec<ScanError>,
) -> MergeReport {
    let mut report = MergeReport::default();
    for SchoolOutcome { school, result } in outcomes {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                failures.push(e);
                continue;
            }
        };
        report.new_email_count += doc.prepend_emails(&result.new_emails);

        let state = doc.school_mut(&school.key);
        if let Some(decision) = result.decision {
            state.apply_decision(&decision);
            report.decisions.push((school.clone(), decision));
        }
        report.action_items_added += state.add_action_items(&result.action_items);
    }

    let notes = scan_notes(&report, failures);
    doc.record_scan(now, report.new_email_count, report.decisions.len(), notes);
    report
}

/// Human-readable line for the scan history.
fn scan_notes(report: &MergeReport, failures: &[ScanError]) -> String {
    let mut notes = if report.new_email_count == 0 {
        "No new emails".to_string()
    } else {
        format!("{} new email(s)", report.new_email_count)
    };
    if !report.decisions.is_empty() {
        let decided: Vec<String> = report
            .decisions
            .iter()
            .map(|(school, d)| format!("{} {}", school.short_name, d.status))
            .collect();
        notes.push_str(&format!("; decisions: {}", decided.join(", ")));
    }
    if report.action_items_added > 0 {
        notes.push_str(&format!("; {} new action item(s)", report.action_items_added));
    }
    if !failures.is_empty() {
        let failed: Vec<String> = failures
            .iter()
            .map(|f| match f {
                ScanError::SchoolScanFailure { school, .. } => school.clone(),
                other => other.label().to_string(),
            })
            .collect();
        notes.push_str(&format!("; failed: {}", failed.join(", ")));
    }
    notes
}

fn commit_message(now: DateTime<Utc>, new_emails: usize, decisions: usize) -> String {
    format!(
        "Admissions scan {}: {new_emails} new email(s), {decisions} decision(s)",
        now.format("%Y-%m-%d %H:%M UTC")
    )
}

/// One consolidated alert covering every decision in a run.
pub fn decision_alert(decisions: &[(School, SchoolDecision)]) -> (String, String) {
    let names: Vec<&str> = decisions
        .iter()
        .map(|(school, _)| school.short_name.as_str())
        .collect();
    let subject = format!("Admissions decision: {}", names.join(", "));

    let mut body = String::new();
    for (school, decision) in decisions {
        body.push_str(&format!(
            "{}: {} ({})\n  Subject: {}\n  Confidence: {:.0}%\n\n",
            school.name,
            decision.status.as_str().to_uppercase(),
            decision.date,
            decision.subject,
            decision.confidence * 100.0
        ));
    }
    (subject, body.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use crate::config::default_schools;
    use crate::error::MailboxError;
    use crate::pipeline::types::{Category, EmailRecord};
    use crate::store::document::SchoolStatus;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn school(key: &str) -> School {
        default_schools()
            .into_iter()
            .find(|s| s.key == key)
            .unwrap()
    }

    fn record(id: &str, school: &str) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            school: school.into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 19).unwrap(),
            subject: "Hello".into(),
            category: Category::Informational,
            confidence: 0.25,
            from: format!("news@{school}.edu"),
        }
    }

    fn accepted() -> SchoolDecision {
        SchoolDecision {
            status: SchoolStatus::Accepted,
            category: Category::Acceptance,
            confidence: 0.99,
            date: NaiveDate::from_ymd_opt(2026, 3, 19).unwrap(),
            subject: "Congratulations!".into(),
        }
    }

    #[test]
    fn merge_applies_decisions_and_items() {
        let mut doc = TrackerDocument::new_for(&default_schools());
        doc.school_mut("ucla").action_items = vec!["Submit SIR by May 1".into()];
        let outcomes = vec![SchoolOutcome {
            school: school("ucla"),
            result: Ok(SchoolScanResult {
                new_emails: vec![record("m1", "ucla")],
                decision: Some(accepted()),
                action_items: vec!["Submit SIR by May 1".into(), "Confirm housing by May 15".into()],
            }),
        }];
        let mut failures = Vec::new();
        let report = merge_outcomes(&mut doc, outcomes, now(), &mut failures);

        assert_eq!(report.new_email_count, 1);
        assert_eq!(report.decisions.len(), 1);
        let ucla = &doc.schools["ucla"];
        assert_eq!(ucla.status, SchoolStatus::Accepted);
        assert_eq!(ucla.decision_date, NaiveDate::from_ymd_opt(2026, 3, 19));
        assert_eq!(ucla.action_items.len(), 2);
        assert_eq!(doc.metadata.total_scans, 1);
        assert_eq!(doc.scan_history[0].new_decisions, 1);
        assert!(doc.scan_history[0].notes.contains("UCLA accepted"));
    }

    #[test]
    fn merge_leaves_failed_school_untouched() {
        let mut doc = TrackerDocument::new_for(&default_schools());
        doc.school_mut("ucsd").status = SchoolStatus::Waitlisted;
        let outcomes = vec![
            SchoolOutcome {
                school: school("ucsd"),
                result: Err(ScanError::SchoolScanFailure {
                    school: "ucsd".into(),
                    reason: MailboxError::AuthFailed.to_string(),
                }),
            },
            SchoolOutcome {
                school: school("uci"),
                result: Ok(SchoolScanResult {
                    new_emails: vec![record("m2", "uci")],
                    ..SchoolScanResult::default()
                }),
            },
        ];
        let mut failures = Vec::new();
        let report = merge_outcomes(&mut doc, outcomes, now(), &mut failures);

        assert_eq!(failures.len(), 1);
        assert_eq!(report.new_email_count, 1);
        assert_eq!(doc.schools["ucsd"].status, SchoolStatus::Waitlisted);
        assert!(doc.scan_history[0].notes.contains("failed: ucsd"));
    }

    #[test]
    fn empty_merge_still_records_scan() {
        let mut doc = TrackerDocument::new_for(&default_schools());
        let report = merge_outcomes(&mut doc, Vec::new(), now(), &mut Vec::new());
        assert_eq!(report.new_email_count, 0);
        assert_eq!(doc.metadata.total_scans, 1);
        assert_eq!(doc.metadata.last_scan, Some(now()));
        assert_eq!(doc.scan_history[0].notes, "No new emails");
    }

    #[test]
    fn alert_lists_every_decided_school() {
        let mut waitlisted = accepted();
        waitlisted.status = SchoolStatus::Waitlisted;
        waitlisted.category = Category::Waitlist;
        let (subject, body) =
            decision_alert(&[(school("berkeley"), accepted()), (school("ucsb"), waitlisted)]);
        assert_eq!(subject, "Admissions decision: UCB, UCSB");
        assert!(body.contains("UC Berkeley: ACCEPTED (2026-03-19)"));
        assert!(body.contains("WAITLISTED"));
        assert!(body.contains("Confidence: 99%"));
    }

    #[test]
    fn stage_labels() {
        assert_eq!(ScanStage::Loading.to_string(), "loading");
        assert_eq!(ScanStage::Aborted.to_string(), "aborted");
    }

    #[test]
    fn dry_run_report_renders_decisions() {
        let report = DryRunReport {
            generated_at: now(),
            schools: vec![(
                school("berkeley"),
                SchoolScanResult {
                    new_emails: vec![record("m1", "berkeley")],
                    decision: Some(accepted()),
                    action_items: vec!["Submit SIR by May 1".into()],
                },
            )],
            failures: vec![ScanError::SchoolScanFailure {
                school: "ucr".into(),
                reason: "timeout".into(),
            }],
        };
        assert_eq!(report.new_email_count(), 1);
        assert_eq!(report.decision_count(), 1);
        let text = report.render();
        assert!(text.contains("UC Berkeley (berkeley)"));
        assert!(text.contains("=> ACCEPTED (99%)"));
        assert!(text.contains("- Submit SIR by May 1"));
        assert!(text.contains("Scan of ucr failed"));
    }
}
