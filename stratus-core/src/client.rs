use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{InspectReader, ReaderStream};
use url::Url;

const ROOT_FILTER: &str = "isRoot:true";

/// Transfer progress callback: `(bytes_transferred, total_bytes)`.
/// `total_bytes` is zero when the remote does not report a length.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid upload metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("node already exists: {body}")]
    Conflict { body: String },
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DriveError::Conflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DriveError::Request(_))
            || matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Lists nodes matching a server-side filter expression.
    pub async fn list_nodes(&self, filter: Option<&str>) -> Result<NodeList, DriveError> {
        let mut url = self.endpoint("/nodes")?;
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            url.query_pairs_mut().append_pair("filters", filter);
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_root_nodes(&self) -> Result<NodeList, DriveError> {
        self.list_nodes(Some(ROOT_FILTER)).await
    }

    /// Fetches one page of a node's children. Passing the `next_token` of the
    /// previous page continues the listing; a response without a token is the
    /// last page.
    pub async fn list_children(
        &self,
        parent_id: &str,
        start_token: Option<&str>,
    ) -> Result<NodeList, DriveError> {
        let mut url = self.endpoint(&format!("/nodes/{parent_id}/children"))?;
        if let Some(token) = start_token {
            url.query_pairs_mut().append_pair("startToken", token);
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Uploads a local file as a new node. The content is streamed; `progress`
    /// observes bytes handed to the transport. An HTTP 409 from the remote
    /// maps to [`DriveError::Conflict`].
    pub async fn upload_file(
        &self,
        request: &UploadRequest,
        source: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<Node, DriveError> {
        let mut url = self.endpoint("/nodes")?;
        if request.suppress_dedup {
            url.query_pairs_mut().append_pair("suppress", "deduplication");
        }

        let file = tokio::fs::File::open(source).await?;
        let total = file.metadata().await?.len();
        let mut transferred = 0u64;
        let inspect = InspectReader::new(file, move |chunk: &[u8]| {
            transferred += chunk.len() as u64;
            if let Some(report) = progress.as_ref() {
                report(transferred, total);
            }
        });
        let body = reqwest::Body::wrap_stream(ReaderStream::new(inspect));

        let metadata = serde_json::to_string(&UploadMetadata {
            name: &request.name,
            kind: NodeKind::File.as_str(),
            parents: &request.parents,
        })?;
        let content = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(request.name.clone());
        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata)
            .part("content", content);

        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .multipart(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Streams a node's content into `target`, writing through a `.partial`
    /// sibling so an aborted transfer never leaves a truncated file behind.
    pub async fn download_to_path(
        &self,
        node_id: &str,
        target: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<(), DriveError> {
        let url = self.endpoint(&format!("/nodes/{node_id}/content"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let total = response.content_length().unwrap_or(0);
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut transferred = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            transferred += chunk.len() as u64;
            if let Some(report) = progress.as_ref() {
                report(transferred, total);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT {
                Err(DriveError::Conflict { body })
            } else {
                Err(DriveError::Api { status, body })
            }
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub parents: Vec<String>,
    pub suppress_dedup: bool,
}

#[derive(Serialize)]
struct UploadMetadata<'a> {
    name: &'a str,
    kind: &'a str,
    parents: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    File,
    Folder,
    Asset,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Folder => "FOLDER",
            NodeKind::Asset => "ASSET",
            NodeKind::Other(value) => value,
        }
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "FILE" => NodeKind::File,
            "FOLDER" => NodeKind::Folder,
            "ASSET" => NodeKind::Asset,
            _ => NodeKind::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(value: NodeKind) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    Available,
    Trash,
    Purged,
    Other(String),
}

impl NodeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            NodeStatus::Available => "AVAILABLE",
            NodeStatus::Trash => "TRASH",
            NodeStatus::Purged => "PURGED",
            NodeStatus::Other(value) => value,
        }
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Available
    }
}

impl From<String> for NodeStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AVAILABLE" => NodeStatus::Available,
            "TRASH" => NodeStatus::Trash,
            "PURGED" => NodeStatus::Purged,
            _ => NodeStatus::Other(value),
        }
    }
}

impl From<NodeStatus> for String {
    fn from(value: NodeStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: NodeKind,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub modified_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub exclusively_trashed: bool,
    #[serde(default)]
    pub recursively_trashed: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next_token: Option<String>,
    #[serde(default)]
    pub data: Vec<Node>,
}
