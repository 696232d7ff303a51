//! Admissions mail pipeline.
//!
//! Every scan flows through:
//! 1. `SchoolScanner::scan()`: mailbox search per school domain
//! 2. `Classifier::classify()`: weighted keyword scoring (no network)
//! 3. `ActionItemExtractor::extract()`: deadline phrases
//! 4. `ScanOrchestrator`: merge into the tracker document, save, alert
//!
//! Classification is deterministic. The same subject and body always produce
//! the same category and confidence.

pub mod classifier;
pub mod extractor;
pub mod orchestrator;
pub mod scanner;
pub mod types;

pub use classifier::Classifier;
pub use extractor::ActionItemExtractor;
pub use orchestrator::{
    DryRunReport, OrchestratorDeps, ScanOrchestrator, ScanStage, ScanSummary,
};
pub use scanner::SchoolScanner;
pub use types::{Category, Classification, EmailRecord, SchoolDecision, SchoolScanResult};
