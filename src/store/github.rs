//! GitHub contents API backend.
//!
//! The document is a file in a repository. The blob `sha` returned on read is
//! the version token; GitHub rejects a write whose `sha` is not the current one.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::traits::{DocumentLocation, DocumentStore, LoadedDocument, VersionToken};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("admissions-tracker/", env!("CARGO_PKG_VERSION"));

/// `GET /repos/{owner}/{repo}/contents/{path}` response (the fields we use).
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContentsFile,
}

#[derive(Debug, Deserialize)]
struct PutContentsFile {
    sha: String,
}

/// Reads and writes the tracker document in a GitHub repository.
pub struct GitHubStore {
    client: reqwest::Client,
    api_base: String,
    /// `owner/repo`.
    repo: String,
    token: SecretString,
}

impl GitHubStore {
    pub fn new(repo: impl Into<String>, token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            repo: repo.into(),
            token,
        }
    }

    /// Point at a different API host (GitHub Enterprise).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

/// Decode the base64 `content` field (GitHub wraps it at 60 columns).
pub fn decode_content(encoded: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| StoreError::InvalidDocument(format!("bad base64 content: {e}")))
}

/// Serialize and base64-encode a document for upload.
pub fn encode_content(document: &serde_json::Value) -> Result<String, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');
    Ok(STANDARD.encode(bytes))
}

async fn unexpected(resp: reqwest::Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::UnexpectedResponse {
        status,
        body: body.chars().take(300).collect(),
    }
}

#[async_trait]
impl DocumentStore for GitHubStore {
    fn name(&self) -> &str {
        "github"
    }

    async fn load(&self, location: &DocumentLocation) -> Result<LoadedDocument, StoreError> {
        let url = self.contents_url(&location.path);
        debug!(url = %url, git_ref = %location.git_ref, "Loading tracker document");

        let resp = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", location.git_ref.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreError::NotFound {
                    path: location.path.clone(),
                    git_ref: location.git_ref.clone(),
                });
            }
            _ => return Err(unexpected(resp).await),
        }

        let body: ContentsResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        let bytes = decode_content(&body.content)?;
        let document = serde_json::from_slice(&bytes)?;

        Ok(LoadedDocument {
            document,
            version: VersionToken(body.sha),
        })
    }

    async fn save(
        &self,
        location: &DocumentLocation,
        document: &serde_json::Value,
        version: Option<&VersionToken>,
        commit_message: &str,
    ) -> Result<VersionToken, StoreError> {
        let url = self.contents_url(&location.path);
        let payload = PutContentsRequest {
            message: commit_message,
            content: encode_content(document)?,
            branch: &location.git_ref,
            sha: version.map(VersionToken::as_str),
        };

        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(StoreError::Conflict {
                    path: location.path.clone(),
                });
            }
            _ => return Err(unexpected(resp).await),
        }

        let body: PutContentsResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        info!(path = %location, sha = %body.content.sha, "Committed tracker document");
        Ok(VersionToken(body.content.sha))
    }
}
