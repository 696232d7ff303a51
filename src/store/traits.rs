//! `DocumentStore` trait: load/save the tracker document with an
//! optimistic-concurrency token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Where the document lives: a path at a git ref (branch, tag or sha).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub path: String,
    pub git_ref: String,
}

impl DocumentLocation {
    pub fn new(path: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            git_ref: git_ref.into(),
        }
    }
}

impl std::fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.git_ref)
    }
}

/// Opaque version token returned by `load` and required by `save`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(pub String);

impl VersionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loaded document and the token to save it back with.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: serde_json::Value,
    pub version: VersionToken,
}

/// Backend-agnostic persistence for the tracker document.
///
/// No retries and no locking: a stale token on `save` surfaces as
/// `StoreError::Conflict`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Read the document and its current version token.
    async fn load(&self, location: &DocumentLocation) -> Result<LoadedDocument, StoreError>;

    /// Write the document. `version` must be the token from the last load;
    /// `None` creates a document that does not exist yet. Returns the new token.
    async fn save(
        &self,
        location: &DocumentLocation,
        document: &serde_json::Value,
        version: Option<&VersionToken>,
        commit_message: &str,
    ) -> Result<VersionToken, StoreError>;
}
