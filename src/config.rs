//! Configuration types.
//!
//! Schools and keyword rules are plain data, passed into each component's
//! constructor. The built-in tables can be replaced with JSON files named by
//! `ADMISSIONS_SCHOOLS_FILE` and `ADMISSIONS_RULES_FILE`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::pipeline::types::Category;
use crate::store::traits::DocumentLocation;

// ── Schools ─────────────────────────────────────────────────────────

/// A school whose mail domain is scanned. Static, never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    /// Stable identifier, used as the key in the tracker document.
    pub key: String,
    /// Mail domain used as the search filter.
    pub domain: String,
    pub name: String,
    pub short_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl School {
    pub fn new(key: &str, domain: &str, name: &str, short_name: &str, kind: &str) -> Self {
        Self {
            key: key.into(),
            domain: domain.into(),
            name: name.into(),
            short_name: short_name.into(),
            kind: kind.into(),
        }
    }
}

/// The nine UC undergraduate campuses.
pub fn default_schools() -> Vec<School> {
    vec![
        School::new("berkeley", "berkeley.edu", "UC Berkeley", "UCB", "uc"),
        School::new("ucla", "ucla.edu", "UCLA", "UCLA", "uc"),
        School::new("ucsd", "ucsd.edu", "UC San Diego", "UCSD", "uc"),
        School::new("ucdavis", "ucdavis.edu", "UC Davis", "UCD", "uc"),
        School::new("uci", "uci.edu", "UC Irvine", "UCI", "uc"),
        School::new("ucsb", "ucsb.edu", "UC Santa Barbara", "UCSB", "uc"),
        School::new("ucsc", "ucsc.edu", "UC Santa Cruz", "UCSC", "uc"),
        School::new("ucr", "ucr.edu", "UC Riverside", "UCR", "uc"),
        School::new("ucmerced", "ucmerced.edu", "UC Merced", "UCM", "uc"),
    ]
}

// ── Classifier policy ───────────────────────────────────────────────

/// Keyword set for one category. Keywords are matched as lowercase substrings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub category: Category,
    #[serde(default)]
    pub subject_keywords: Vec<String>,
    #[serde(default)]
    pub body_keywords: Vec<String>,
    /// Minimum score this category needs to win.
    pub min_score: f64,
}

impl KeywordRule {
    pub fn new(category: Category, subject: &[&str], body: &[&str], min_score: f64) -> Self {
        Self {
            category,
            subject_keywords: subject.iter().map(|s| s.to_string()).collect(),
            body_keywords: body.iter().map(|s| s.to_string()).collect(),
            min_score,
        }
    }

    /// Built-in rules. Order matters: equal top scores go to the earlier rule.
    ///
    /// Negated acceptance phrases ("not been admitted") contain an acceptance
    /// keyword, so each one is listed with its stem and matches at least two
    /// rejection keywords.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                Category::Acceptance,
                &[
                    "congratulations",
                    "admitted",
                    "accepted",
                    "welcome to",
                    "offer of admission",
                    "admission offer",
                ],
                &[
                    "pleased to inform",
                    "pleased to offer",
                    "offer you admission",
                    "offer of admission",
                    "congratulations",
                    "welcome to the class",
                    "statement of intent to register",
                ],
                0.4,
            ),
            Self::new(
                Category::Rejection,
                &[
                    "regret",
                    "unable to offer",
                    "not able to offer",
                    "not been admitted",
                    "not been admit",
                    "not been accepted",
                    "not been accept",
                    "not admitted",
                    "not admit",
                    "not accepted",
                    "not accept",
                    "unsuccessful",
                ],
                &[
                    "regret to inform",
                    "unable to offer",
                    "unable to offer you",
                    "not able to offer",
                    "not able to offer you",
                    "not been selected",
                    "unfortunately",
                    "highly competitive applicant pool",
                ],
                0.4,
            ),
            Self::new(
                Category::Waitlist,
                &["waitlist", "wait list", "waiting list", "alternate list"],
                &[
                    "waitlist",
                    "wait list",
                    "waiting list",
                    "opt in",
                    "remain interested",
                ],
                0.4,
            ),
            Self::new(
                Category::ActionRequired,
                &[
                    "action required",
                    "action needed",
                    "reminder",
                    "deadline",
                    "submit",
                    "complete your",
                    "missing",
                ],
                &[
                    "due by",
                    "deadline",
                    "please submit",
                    "must be submitted",
                    "transfer academic update",
                    "action required",
                    "complete the",
                ],
                0.3,
            ),
        ]
    }
}

fn default_subject_weight() -> f64 {
    0.5
}
fn default_body_weight() -> f64 {
    0.25
}
fn default_baseline() -> f64 {
    0.25
}
fn default_decision_threshold() -> f64 {
    0.5
}
fn default_body_prefix_chars() -> usize {
    2000
}
fn default_max_confidence() -> f64 {
    0.99
}

/// Scoring policy for the classifier. These are tunable heuristics, not
/// probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "KeywordRule::defaults")]
    pub rules: Vec<KeywordRule>,
    /// Added per subject keyword hit.
    #[serde(default = "default_subject_weight")]
    pub subject_weight: f64,
    /// Added per body keyword hit.
    #[serde(default = "default_body_weight")]
    pub body_weight: f64,
    /// Score a category must exceed to beat `informational`; also the
    /// confidence reported for informational messages.
    #[serde(default = "default_baseline")]
    pub informational_baseline: f64,
    /// Minimum confidence for a decision category to count as a decision.
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
    /// Only this many leading body characters are scored.
    #[serde(default = "default_body_prefix_chars")]
    pub body_prefix_chars: usize,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: KeywordRule::defaults(),
            subject_weight: default_subject_weight(),
            body_weight: default_body_weight(),
            informational_baseline: default_baseline(),
            decision_threshold: default_decision_threshold(),
            body_prefix_chars: default_body_prefix_chars(),
            max_confidence: default_max_confidence(),
        }
    }
}

// ── Scan / notify / store / schedule ────────────────────────────────

/// Mailbox search bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Only messages dated on/after `now - days_back` are requested.
    pub days_back: i64,
    /// Maximum threads requested per school.
    pub max_threads: usize,
    /// Subject lines in the email log are truncated to this many characters.
    pub subject_max_chars: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            days_back: 7,
            max_threads: 20,
            subject_max_chars: 100,
        }
    }
}

/// Who receives alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Recipient of decision alerts. Alerts are skipped when unset.
    pub recipient: Option<String>,
    /// Recipient of aborted-run alerts.
    pub operator: Option<String>,
}

/// Which persistence backend holds the tracker document.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// GitHub contents API, `owner/repo`.
    GitHub { repo: String, token: SecretString },
    /// Local JSON file (path relative to the working directory).
    File,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub location: DocumentLocation,
}

/// When the scheduler fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Cron expression (seconds field first, as the `cron` crate expects).
    pub cron: Option<String>,
    /// Fixed interval used when no cron expression is set.
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: None,
            interval: Duration::from_secs(3600),
        }
    }
}

/// Top-level tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub schools: Vec<School>,
    pub classifier: ClassifierConfig,
    pub scan: ScanConfig,
    pub notify: NotifyConfig,
    pub store: StoreConfig,
    pub schedule: ScheduleConfig,
}

impl TrackerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let schools = match std::env::var("ADMISSIONS_SCHOOLS_FILE") {
            Ok(path) => read_json_file(Path::new(&path))?,
            Err(_) => default_schools(),
        };
        if schools.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ADMISSIONS_SCHOOLS_FILE".into(),
                message: "no schools configured".into(),
            });
        }

        let classifier = match std::env::var("ADMISSIONS_RULES_FILE") {
            Ok(path) => read_json_file(Path::new(&path))?,
            Err(_) => ClassifierConfig::default(),
        };

        let scan = ScanConfig {
            days_back: env_parse("ADMISSIONS_DAYS_BACK", 7)?,
            max_threads: env_parse("ADMISSIONS_MAX_THREADS", 20)?,
            ..ScanConfig::default()
        };

        let recipient = env_opt("ADMISSIONS_NOTIFY_TO");
        let operator = env_opt("ADMISSIONS_OPERATOR_TO").or_else(|| recipient.clone());

        let location = DocumentLocation {
            path: env_opt("ADMISSIONS_DOC_PATH").unwrap_or_else(|| "data/tracker.json".into()),
            git_ref: env_opt("ADMISSIONS_DOC_REF").unwrap_or_else(|| "main".into()),
        };
        let backend = match env_opt("ADMISSIONS_STORE").as_deref() {
            None | Some("github") => StoreBackend::GitHub {
                repo: env_opt("ADMISSIONS_GITHUB_REPO")
                    .ok_or_else(|| ConfigError::MissingEnvVar("ADMISSIONS_GITHUB_REPO".into()))?,
                token: env_opt("ADMISSIONS_GITHUB_TOKEN")
                    .map(SecretString::from)
                    .ok_or_else(|| ConfigError::MissingEnvVar("ADMISSIONS_GITHUB_TOKEN".into()))?,
            },
            Some("file") => StoreBackend::File,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ADMISSIONS_STORE".into(),
                    message: format!("unknown backend '{other}' (expected github or file)"),
                });
            }
        };

        let schedule = ScheduleConfig {
            cron: env_opt("ADMISSIONS_SCHEDULE"),
            interval: Duration::from_secs(env_parse("ADMISSIONS_SCAN_INTERVAL_SECS", 3600)?),
        };

        Ok(Self {
            schools,
            classifier,
            scan,
            notify: NotifyConfig {
                recipient,
                operator,
            },
            store: StoreConfig { backend, location },
            schedule,
        })
    }
}

/// Read a non-empty environment variable.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schools_have_unique_keys() {
        let schools = default_schools();
        let mut keys: Vec<_> = schools.iter().map(|s| s.key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), schools.len());
    }

    #[test]
    fn default_rules_order_is_fixed() {
        let order: Vec<_> = KeywordRule::defaults()
            .iter()
            .map(|r| r.category)
            .collect();
        assert_eq!(
            order,
            vec![
                Category::Acceptance,
                Category::Rejection,
                Category::Waitlist,
                Category::ActionRequired,
            ]
        );
    }

    #[test]
    fn default_keywords_are_lowercase() {
        for rule in KeywordRule::defaults() {
            for kw in rule.subject_keywords.iter().chain(&rule.body_keywords) {
                assert_eq!(kw, &kw.to_lowercase(), "keyword {kw} must be lowercase");
            }
        }
    }

    #[test]
    fn classifier_config_partial_json_uses_defaults() {
        let cfg: ClassifierConfig = serde_json::from_str(r#"{"decision_threshold": 0.6}"#).unwrap();
        assert_eq!(cfg.decision_threshold, 0.6);
        assert_eq!(cfg.subject_weight, 0.5);
        assert_eq!(cfg.rules.len(), 4);
    }

    #[test]
    fn school_type_field_renamed() {
        let json = r#"{"key":"usc","domain":"usc.edu","name":"USC","short_name":"USC","type":"private"}"#;
        let school: School = serde_json::from_str(json).unwrap();
        assert_eq!(school.kind, "private");
    }

    #[test]
    fn schools_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schools.json");
        std::fs::write(
            &path,
            r#"[{"key":"stanford","domain":"stanford.edu","name":"Stanford","short_name":"SU","type":"private"}]"#,
        )
        .unwrap();
        let schools: Vec<School> = read_json_file(&path).unwrap();
        assert_eq!(schools.len(), 1);
        assert_eq!(schools[0].domain, "stanford.edu");
    }

    #[test]
    fn malformed_json_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();
        let result: Result<ClassifierConfig, _> = read_json_file(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // SAFETY: This test owns this variable name; no other test reads it.
        unsafe { std::env::set_var("ADMISSIONS_TEST_PARSE_GARBAGE", "seven") };
        let result: Result<i64, _> = env_parse("ADMISSIONS_TEST_PARSE_GARBAGE", 7);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("ADMISSIONS_TEST_PARSE_GARBAGE") };
    }

    #[test]
    fn env_parse_defaults_when_unset() {
        let days: i64 = env_parse("ADMISSIONS_TEST_PARSE_UNSET", 7).unwrap();
        assert_eq!(days, 7);
    }
}
