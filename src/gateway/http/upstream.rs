//! Files API surface forwarded to the upstream provider through a
//! [`CredentialExecutor`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::bounded_body::{
    MAX_METADATA_BYTES, MAX_UPLOAD_BYTES, bounded_byte_stream, declared_content_length,
    ensure_content_length_within,
};
use super::envelope::{GoogleStatus, google_error, invalid_argument, normalize_upstream_error_payload};
use super::headers::{
    QueryPairs, UPLOAD_CONTROL_URL, UPLOAD_STATUS, UPLOAD_URL, UploadCommand,
    api_version_from_path, caller_key, continuation_url, extract_header,
    forwardable_request_headers, insert_header, is_resumable, relayable_response_headers,
};
use crate::clock::{Clock, SystemClock};
use crate::gateway::config::DEFAULT_UPSTREAM_PROVIDER;
use crate::gateway::executor::{
    CredentialExecutor, ExecuteOptions, ExecutorError, FilesAction, FilesRequest, FilesResponse,
    RequestBody,
};
use crate::gateway::sessions::{UploadSession, UploadSessions};

pub struct UpstreamFileProxy {
    executor: Option<Arc<dyn CredentialExecutor>>,
    provider: String,
    sessions: UploadSessions,
}

impl std::fmt::Debug for UpstreamFileProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamFileProxy")
            .field("configured", &self.executor.is_some())
            .field("provider", &self.provider)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl UpstreamFileProxy {
    pub fn new(executor: Option<Arc<dyn CredentialExecutor>>) -> Self {
        Self::with_clock(executor, Arc::new(SystemClock))
    }

    /// Session TTLs are measured against `clock`.
    pub fn with_clock(executor: Option<Arc<dyn CredentialExecutor>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor,
            provider: DEFAULT_UPSTREAM_PROVIDER.to_string(),
            sessions: UploadSessions::new(clock),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.executor.is_some()
    }

    pub fn sessions(&self) -> &UploadSessions {
        &self.sessions
    }

    fn executor(&self) -> Result<&Arc<dyn CredentialExecutor>, Box<Response>> {
        self.executor.as_ref().ok_or_else(|| {
            Box::new(
                google_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    GoogleStatus::Unavailable,
                    "gemini files upstream is not configured",
                )
                .into_response(),
            )
        })
    }

    #[tracing::instrument(name = "gemini_files", skip_all, fields(action = "files.upload", mode = "upstream", credential))]
    pub async fn upload(&self, request: Request) -> Response {
        let executor = match self.executor() {
            Ok(executor) => Arc::clone(executor),
            Err(response) => return *response,
        };
        let query = QueryPairs::from_uri(request.uri());
        if !is_resumable(request.headers(), &query) {
            return self.simple_upload(executor.as_ref(), request, &query).await;
        }
        if let Some(token) = query.get("upload_id").map(str::to_string) {
            return self
                .resumable_follow_up(executor.as_ref(), request, &query, &token)
                .await;
        }
        match UploadCommand::from_headers(request.headers()) {
            UploadCommand::Start => self.resumable_start(executor.as_ref(), request, &query).await,
            UploadCommand::Unknown(command) if !command.is_empty() => {
                invalid_argument(format!("unsupported resumable command: {command}"))
            }
            _ => invalid_argument("missing upload_id parameter"),
        }
    }

    async fn simple_upload(
        &self,
        executor: &dyn CredentialExecutor,
        request: Request,
        query: &QueryPairs,
    ) -> Response {
        let (parts, body) = request.into_parts();
        if let Err(err) = ensure_content_length_within(&parts.headers, MAX_UPLOAD_BYTES) {
            return google_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                GoogleStatus::ResourceExhausted,
                err.to_string(),
            )
            .into_response();
        }

        // A streamed body can only be sent once, so the credential is pinned up front.
        let credential = match executor.pick_credential(&self.provider).await {
            Ok(credential) => credential,
            Err(err) => return executor_error(err),
        };
        tracing::Span::current().record("credential", credential.as_str());

        let request = FilesRequest::new(FilesAction::Upload)
            .with_body(RequestBody::Stream(bounded_byte_stream(body, MAX_UPLOAD_BYTES)))
            .with_content_length(declared_content_length(&parts.headers));
        let options = ExecuteOptions {
            headers: forwardable_request_headers(&parts.headers),
            query: query.forwardable(&[]),
            force_credential: Some(credential),
            no_retry: true,
            upload_url: None,
        };
        match executor.execute(&self.provider, request, options).await {
            Ok(response) => relay(response),
            Err(err) => executor_error(err),
        }
    }

    async fn resumable_start(
        &self,
        executor: &dyn CredentialExecutor,
        request: Request,
        query: &QueryPairs,
    ) -> Response {
        let (parts, body) = request.into_parts();
        let metadata = match axum::body::to_bytes(body, MAX_METADATA_BYTES).await {
            Ok(metadata) => metadata,
            Err(err) => return invalid_argument(format!("invalid metadata: {err}")),
        };
        let content_length = Some(metadata.len() as u64);
        let request = FilesRequest::new(FilesAction::Upload)
            .with_body(RequestBody::Bytes(metadata))
            .with_content_length(content_length);
        let options = ExecuteOptions {
            headers: forwardable_request_headers(&parts.headers),
            query: query.forwardable(&[]),
            ..ExecuteOptions::default()
        };

        let response = match executor.execute(&self.provider, request, options).await {
            Ok(response) => response,
            Err(err) => return executor_error(err),
        };
        let Some(upstream_upload_url) = extract_header(&response.headers, UPLOAD_URL) else {
            tracing::warn!(
                credential = %response.credential_id,
                "gemini files: upstream start response carried no upload url"
            );
            return google_error(
                StatusCode::BAD_GATEWAY,
                GoogleStatus::Unavailable,
                "upstream did not return an upload url",
            )
            .into_response();
        };

        let token = self.sessions.bind(UploadSession {
            credential_id: response.credential_id.clone(),
            upstream_upload_url,
        });
        tracing::info!(
            credential = %response.credential_id,
            "gemini files: resumable upload session bound"
        );

        let owner_key = caller_key(&parts.headers, query);
        let url = continuation_url(
            &parts.headers,
            api_version_from_path(parts.uri.path()),
            &[("upload_id", token.as_str()), ("key", owner_key.as_str())],
        );
        let mut response = relay(response);
        let headers = response.headers_mut();
        headers.remove(UPLOAD_URL);
        let had_control_url = headers.remove(UPLOAD_CONTROL_URL).is_some();
        insert_header(headers, UPLOAD_URL, &url);
        if had_control_url {
            insert_header(headers, UPLOAD_CONTROL_URL, &url);
        }
        response
    }

    async fn resumable_follow_up(
        &self,
        executor: &dyn CredentialExecutor,
        request: Request,
        query: &QueryPairs,
        token: &str,
    ) -> Response {
        let Some(session) = self.sessions.lookup(token) else {
            return invalid_argument("missing or expired upload_id");
        };
        let (parts, body) = request.into_parts();
        let command = UploadCommand::from_headers(&parts.headers);
        let body = match &command {
            UploadCommand::Query => RequestBody::Empty,
            UploadCommand::Upload | UploadCommand::Finalize => {
                if let Err(err) = ensure_content_length_within(&parts.headers, MAX_UPLOAD_BYTES) {
                    return google_error(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        GoogleStatus::ResourceExhausted,
                        err.to_string(),
                    )
                    .into_response();
                }
                RequestBody::Stream(bounded_byte_stream(body, MAX_UPLOAD_BYTES))
            }
            UploadCommand::Start => {
                return invalid_argument("upload session already started");
            }
            UploadCommand::Unknown(command) => {
                return invalid_argument(format!("unsupported resumable command: {command}"));
            }
        };
        tracing::Span::current().record("credential", session.credential_id.as_str());

        let request = FilesRequest::new(FilesAction::Upload)
            .with_body(body)
            .with_content_length(declared_content_length(&parts.headers));
        let options = ExecuteOptions {
            headers: forwardable_request_headers(&parts.headers),
            query: query.forwardable(&["upload_id"]),
            force_credential: Some(session.credential_id.clone()),
            no_retry: true,
            upload_url: Some(session.upstream_upload_url.clone()),
        };

        match executor.execute(&self.provider, request, options).await {
            Ok(response) => {
                let finished = command == UploadCommand::Finalize
                    || extract_header(&response.headers, UPLOAD_STATUS)
                        .is_some_and(|status| status.eq_ignore_ascii_case("final"));
                if finished {
                    self.sessions.drop_session(token);
                }
                let mut response = relay(response);
                response.headers_mut().remove(UPLOAD_CONTROL_URL);
                response.headers_mut().remove(UPLOAD_URL);
                response
            }
            Err(err) => executor_error(err),
        }
    }

    #[tracing::instrument(name = "gemini_files", skip_all, fields(action = "files.list", mode = "upstream"))]
    pub async fn list(&self, headers: &HeaderMap, query: &QueryPairs) -> Response {
        self.metadata_call(FilesAction::List, headers, query).await
    }

    #[tracing::instrument(name = "gemini_files", skip_all, fields(action = "files.get", mode = "upstream", file_id))]
    pub async fn get(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        let Some(name) = normalize_file_id(file_id) else {
            return invalid_argument("missing fileId parameter");
        };
        tracing::Span::current().record("file_id", name.as_str());
        self.metadata_call(FilesAction::Get { name }, headers, query).await
    }

    #[tracing::instrument(name = "gemini_files", skip_all, fields(action = "files.delete", mode = "upstream", file_id))]
    pub async fn delete(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        let Some(name) = normalize_file_id(file_id) else {
            return invalid_argument("missing fileId parameter");
        };
        tracing::Span::current().record("file_id", name.as_str());
        self.metadata_call(FilesAction::Delete { name }, headers, query).await
    }

    async fn metadata_call(&self, action: FilesAction, headers: &HeaderMap, query: &QueryPairs) -> Response {
        let executor = match self.executor() {
            Ok(executor) => executor,
            Err(response) => return *response,
        };
        let options = ExecuteOptions {
            headers: forwardable_request_headers(headers),
            query: query.forwardable(&[]),
            ..ExecuteOptions::default()
        };
        match executor
            .execute(&self.provider, FilesRequest::new(action), options)
            .await
        {
            Ok(response) => relay(response),
            Err(err) => executor_error(err),
        }
    }
}

fn normalize_file_id(raw: &str) -> Option<String> {
    let file_id = raw.trim().trim_start_matches('/');
    let file_id = file_id.strip_prefix("files/").unwrap_or(file_id);
    (!file_id.is_empty()).then(|| file_id.to_string())
}

/// Upstream status, curated headers and the body as received.
fn relay(response: FilesResponse) -> Response {
    let mut headers = relayable_response_headers(&response.headers);
    if !headers.contains_key("content-type") && !response.body.is_empty() {
        headers.insert("content-type", sniff_content_type(&response.body));
    }
    (response.status, headers, Body::from(response.body)).into_response()
}

fn executor_error(err: ExecutorError) -> Response {
    match err {
        ExecutorError::Status {
            status,
            body,
            headers,
        } => {
            tracing::warn!(status = status.as_u16(), "gemini files: upstream returned an error");
            let mut headers = relayable_response_headers(&headers);
            headers.insert("content-type", HeaderValue::from_static("application/json"));
            let payload = normalize_upstream_error_payload(&body, status);
            (status, headers, Body::from(payload)).into_response()
        }
        other => {
            let status = other.status_code();
            tracing::warn!(status = status.as_u16(), error = %other, "gemini files: upstream call failed");
            google_error(status, GoogleStatus::from_http(status), other.to_string()).into_response()
        }
    }
}

fn sniff_content_type(body: &[u8]) -> HeaderValue {
    match body.trim_ascii_start().first() {
        Some(b'{') | Some(b'[') => HeaderValue::from_static("application/json"),
        _ => HeaderValue::from_static("application/octet-stream"),
    }
}
