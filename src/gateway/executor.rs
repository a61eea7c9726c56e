//! Seam between the files proxy and whatever holds upstream credentials.

use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilesAction {
    Upload,
    List,
    Get { name: String },
    Delete { name: String },
}

impl FilesAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "files.upload",
            Self::List => "files.list",
            Self::Get { .. } => "files.get",
            Self::Delete { .. } => "files.delete",
        }
    }
}

pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Can only be sent once; never retried against another credential.
    Stream(ByteStream),
}

impl RequestBody {
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Stream(_))
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct FilesRequest {
    pub action: FilesAction,
    pub body: RequestBody,
    pub content_length: Option<u64>,
}

impl FilesRequest {
    pub fn new(action: FilesAction) -> Self {
        Self {
            action,
            body: RequestBody::Empty,
            content_length: None,
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Already filtered; credentials are injected by the executor.
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Use exactly this credential.
    pub force_credential: Option<String>,
    pub no_retry: bool,
    /// Absolute upstream URL for resumable follow-ups.
    pub upload_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FilesResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Credential that served the call.
    pub credential_id: String,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("upstream returned {status}")]
    Status {
        status: StatusCode,
        body: Bytes,
        headers: HeaderMap,
    },
    #[error("no credential available for provider {provider}")]
    NoCredential { provider: String },
    #[error("credential not found: {id}")]
    CredentialNotFound { id: String },
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: String },
    #[error("upstream request failed: {message}")]
    Transport { message: String },
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl ExecutorError {
    /// Explicit upstream status wins; pool failures map to 503/400; the rest is 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::NoCredential { .. } | Self::CredentialNotFound { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ProviderNotFound { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } | Self::Unsupported { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[async_trait]
pub trait CredentialExecutor: Send + Sync {
    /// Id of the credential normal selection would use next.
    async fn pick_credential(&self, provider: &str) -> Result<String, ExecutorError>;

    async fn execute(
        &self,
        provider: &str,
        request: FilesRequest,
        options: ExecuteOptions,
    ) -> Result<FilesResponse, ExecutorError>;
}
