use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::StreamExt;

use super::config::{CredentialConfig, UpstreamConfig};
use super::executor::{
    CredentialExecutor, ExecuteOptions, ExecutorError, FilesAction, FilesRequest, FilesResponse,
    RequestBody,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Clone)]
enum CredentialAuth {
    ApiKey(HeaderValue),
    Bearer(HeaderValue),
}

#[derive(Clone)]
struct PoolCredential {
    id: String,
    base_url: String,
    auth: CredentialAuth,
}

impl std::fmt::Debug for PoolCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCredential")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("auth", &"<redacted>")
            .finish()
    }
}

/// Round-robin pool of upstream Gemini credentials that performs the Files API
/// calls itself.
#[derive(Debug)]
pub struct CredentialPool {
    provider: String,
    api_version: String,
    client: reqwest::Client,
    credentials: Vec<PoolCredential>,
    cursor: AtomicUsize,
    request_timeout: Option<Duration>,
    max_attempts: usize,
}

impl CredentialPool {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| ExecutorError::Transport {
                message: format!("upstream http client error: {err}"),
            })?;

        let credentials = config
            .credentials
            .iter()
            .map(|credential| parse_credential(credential, &config.base_url))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            provider: config.provider.trim().to_string(),
            api_version: config.api_version.trim().trim_matches('/').to_string(),
            client,
            credentials,
            cursor: AtomicUsize::new(0),
            request_timeout: config
                .request_timeout_seconds
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn credential_ids(&self) -> Vec<&str> {
        self.credentials.iter().map(|credential| credential.id.as_str()).collect()
    }

    fn ensure_provider(&self, provider: &str) -> Result<(), ExecutorError> {
        if provider.trim().eq_ignore_ascii_case(&self.provider) {
            return Ok(());
        }
        Err(ExecutorError::ProviderNotFound {
            provider: provider.to_string(),
        })
    }

    fn next_index(&self) -> Result<usize, ExecutorError> {
        if self.credentials.is_empty() {
            return Err(ExecutorError::NoCredential {
                provider: self.provider.clone(),
            });
        }
        Ok(self.cursor.fetch_add(1, Ordering::Relaxed) % self.credentials.len())
    }

    fn find(&self, id: &str) -> Result<&PoolCredential, ExecutorError> {
        self.credentials
            .iter()
            .find(|credential| credential.id == id)
            .ok_or_else(|| ExecutorError::CredentialNotFound { id: id.to_string() })
    }

    fn build_url(
        &self,
        credential: &PoolCredential,
        action: &FilesAction,
        options: &ExecuteOptions,
    ) -> Result<reqwest::Url, ExecutorError> {
        if let (FilesAction::Upload, Some(upload_url)) = (action, options.upload_url.as_deref()) {
            let upload_url = upload_url.trim();
            if !upload_url.is_empty() {
                return reqwest::Url::parse(upload_url).map_err(|err| ExecutorError::Unsupported {
                    message: format!("invalid upload url: {err}"),
                });
            }
        }

        let version = self.api_version.as_str();
        let path = match action {
            FilesAction::Upload => format!("upload/{version}/files"),
            FilesAction::List => format!("{version}/files"),
            FilesAction::Get { name } | FilesAction::Delete { name } => {
                format!("{version}/{}", normalize_file_name(name))
            }
        };
        let raw = join_base_url(&credential.base_url, &path);
        let mut url = reqwest::Url::parse(&raw).map_err(|err| ExecutorError::Unsupported {
            message: format!("invalid upstream url {raw}: {err}"),
        })?;
        if !options.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &options.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send_once(
        &self,
        credential: &PoolCredential,
        action: &FilesAction,
        body: Option<reqwest::Body>,
        content_length: Option<u64>,
        options: &ExecuteOptions,
    ) -> Result<FilesResponse, ExecutorError> {
        let url = self.build_url(credential, action, options)?;
        let method = match action {
            FilesAction::Upload => reqwest::Method::POST,
            FilesAction::List | FilesAction::Get { .. } => reqwest::Method::GET,
            FilesAction::Delete { .. } => reqwest::Method::DELETE,
        };

        let mut headers = options.headers.clone();
        headers.remove("authorization");
        headers.remove("x-goog-api-key");
        headers.remove("host");
        headers.remove("content-length");
        match &credential.auth {
            CredentialAuth::ApiKey(value) => {
                headers.insert("x-goog-api-key", value.clone());
            }
            CredentialAuth::Bearer(value) => {
                headers.insert("authorization", value.clone());
            }
        }
        if let Some(content_length) = content_length {
            headers.insert("content-length", HeaderValue::from(content_length));
        }

        let mut req = self.client.request(method, url).headers(headers);
        if let Some(timeout) = self.request_timeout {
            req = req.timeout(timeout);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req.send().await.map_err(|err| ExecutorError::Transport {
            message: format!("{} via {}: {err}", action.as_str(), credential.id),
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = read_reqwest_body_bytes_bounded(response, MAX_RESPONSE_BYTES)
            .await
            .map_err(|err| ExecutorError::Transport {
                message: format!("failed to read upstream response: {err}"),
            })?;

        if !status.is_success() {
            return Err(ExecutorError::Status {
                status,
                body,
                headers,
            });
        }
        Ok(FilesResponse {
            status,
            headers,
            body,
            credential_id: credential.id.clone(),
        })
    }
}

#[async_trait]
impl CredentialExecutor for CredentialPool {
    async fn pick_credential(&self, provider: &str) -> Result<String, ExecutorError> {
        self.ensure_provider(provider)?;
        let index = self.next_index()?;
        Ok(self.credentials[index].id.clone())
    }

    async fn execute(
        &self,
        provider: &str,
        request: FilesRequest,
        options: ExecuteOptions,
    ) -> Result<FilesResponse, ExecutorError> {
        self.ensure_provider(provider)?;
        let FilesRequest {
            action,
            body,
            content_length,
        } = request;

        if let Some(forced) = options.force_credential.as_deref() {
            let credential = self.find(forced)?;
            let body = into_reqwest_body(body);
            return self
                .send_once(credential, &action, body, content_length, &options)
                .await;
        }

        let start = self.next_index()?;
        let replayable = body.is_replayable() && !options.no_retry;
        if !replayable {
            let credential = &self.credentials[start];
            return self
                .send_once(credential, &action, into_reqwest_body(body), content_length, &options)
                .await;
        }

        let payload = match body {
            RequestBody::Bytes(bytes) => Some(bytes),
            _ => None,
        };
        let attempts = self.max_attempts.min(self.credentials.len()).max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            let credential = &self.credentials[(start + attempt) % self.credentials.len()];
            let body = payload.clone().map(reqwest::Body::from);
            match self
                .send_once(credential, &action, body, content_length, &options)
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if is_retryable(&err) && attempt + 1 < attempts => {
                    tracing::warn!(
                        credential = %credential.id,
                        action = action.as_str(),
                        error = %err,
                        "gemini files upstream call failed; trying next credential"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ExecutorError::NoCredential {
            provider: self.provider.clone(),
        }))
    }
}

fn parse_credential(
    credential: &CredentialConfig,
    default_base_url: &str,
) -> Result<PoolCredential, ExecutorError> {
    let id = credential.id.trim().to_string();
    let invalid = |what: &str| ExecutorError::Unsupported {
        message: format!("invalid {what} for credential {id}"),
    };

    let api_key = credential
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let bearer = credential
        .bearer_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let auth = match (api_key, bearer) {
        (Some(api_key), _) => {
            let mut value = HeaderValue::from_str(api_key).map_err(|_| invalid("api_key"))?;
            value.set_sensitive(true);
            CredentialAuth::ApiKey(value)
        }
        (None, Some(token)) => {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| invalid("bearer_token"))?;
            value.set_sensitive(true);
            CredentialAuth::Bearer(value)
        }
        (None, None) => return Err(invalid("secret")),
    };

    let base_url = credential
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_base_url)
        .to_string();

    Ok(PoolCredential { id, base_url, auth })
}

fn into_reqwest_body(body: RequestBody) -> Option<reqwest::Body> {
    match body {
        RequestBody::Empty => None,
        RequestBody::Bytes(bytes) => Some(reqwest::Body::from(bytes)),
        RequestBody::Stream(stream) => Some(reqwest::Body::wrap_stream(stream)),
    }
}

fn is_retryable(err: &ExecutorError) -> bool {
    match err {
        ExecutorError::Status { status, .. } => {
            status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
        }
        ExecutorError::Transport { .. } => true,
        _ => false,
    }
}

/// `files/<name>` regardless of how the caller spelled it.
fn normalize_file_name(name: &str) -> String {
    let name = name.trim().trim_start_matches('/');
    if name.starts_with("files/") {
        return name.to_string();
    }
    format!("files/{name}")
}

fn join_base_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut out = String::with_capacity(base.len() + 1 + path.len());
    out.push_str(base);
    out.push('/');
    out.push_str(path);
    out
}

async fn read_reqwest_body_bytes_bounded(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<Bytes, std::io::Error> {
    let content_length = response
        .content_length()
        .and_then(|len| usize::try_from(len).ok());
    if content_length.is_some_and(|len| len > max_bytes) {
        return Err(std::io::Error::other(format!(
            "content-length={content_length:?} exceeds max bytes ({max_bytes})"
        )));
    }

    let mut stream = response.bytes_stream();
    let mut buffered = bytes::BytesMut::new();
    while let Some(next) = stream.next().await {
        let chunk = next.map_err(std::io::Error::other)?;
        if buffered.len().saturating_add(chunk.len()) > max_bytes {
            return Err(std::io::Error::other(format!(
                "response exceeded max bytes ({max_bytes})"
            )));
        }
        buffered.extend_from_slice(chunk.as_ref());
    }
    Ok(buffered.freeze())
}
