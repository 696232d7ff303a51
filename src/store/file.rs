//! Local file backend. The version token is a hash of the file contents.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::StoreError;
use crate::store::traits::{DocumentLocation, DocumentStore, LoadedDocument, VersionToken};

/// Stores the document as pretty JSON under `root/<location.path>`.
///
/// `git_ref` is ignored; commit messages are only logged.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &DocumentLocation) -> PathBuf {
        self.root.join(&location.path)
    }

    async fn current_token(path: &Path) -> Result<Option<VersionToken>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(content_token(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Content hash used as the version token.
pub fn content_token(bytes: &[u8]) -> VersionToken {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    VersionToken(format!("{:016x}", hasher.finish()))
}

#[async_trait]
impl DocumentStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, location: &DocumentLocation) -> Result<LoadedDocument, StoreError> {
        let path = self.resolve(location);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    path: location.path.clone(),
                    git_ref: location.git_ref.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_slice(&bytes)?;
        Ok(LoadedDocument {
            document,
            version: content_token(&bytes),
        })
    }

    async fn save(
        &self,
        location: &DocumentLocation,
        document: &serde_json::Value,
        version: Option<&VersionToken>,
        commit_message: &str,
    ) -> Result<VersionToken, StoreError> {
        let path = self.resolve(location);
        let current = Self::current_token(&path).await?;
        if current.as_ref() != version {
            return Err(StoreError::Conflict {
                path: location.path.clone(),
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');
        fs::write(&path, &bytes).await?;

        debug!(path = %path.display(), message = commit_message, "Saved tracker document");
        Ok(content_token(&bytes))
    }
}
