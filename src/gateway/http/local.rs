//! Files API surface served from the local [`FileStore`].

use axum::Json;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;

use super::bounded_body::{
    BodyTooLarge, MAX_METADATA_BYTES, MAX_UPLOAD_BYTES, bounded_reader, ensure_content_length_within,
    is_body_too_large,
};
use super::envelope::{
    FileList, FileResource, GoogleStatus, UploadedFile, files_error, google_error, invalid_argument,
};
use super::headers::{
    CHUNK_GRANULARITY_BYTES, QueryPairs, UPLOAD_CHUNK_GRANULARITY, UPLOAD_HEADER_CONTENT_TYPE,
    UPLOAD_PROTOCOL, UPLOAD_SIZE_RECEIVED, UPLOAD_STATUS, UPLOAD_URL, UploadCommand,
    api_version_from_path, caller_key, continuation_url, extract_header, insert_header,
    is_resumable,
};
use crate::error::{ErrorKind, FilesError};
use crate::filestore::{FileStore, generate_file_id};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default, Deserialize)]
struct StartMetadata {
    #[serde(default)]
    file: StartFileMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct StartFileMetadata {
    #[serde(default, alias = "display_name")]
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default, alias = "mime_type")]
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LocalFileHandler {
    store: FileStore,
}

impl LocalFileHandler {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub async fn upload(&self, request: Request) -> Response {
        let query = QueryPairs::from_uri(request.uri());
        if is_resumable(request.headers(), &query) {
            return self.resumable(request, query).await;
        }
        let protocol = extract_header(request.headers(), UPLOAD_PROTOCOL).unwrap_or_default();
        if !protocol.is_empty() && !protocol.eq_ignore_ascii_case("multipart") {
            return invalid_argument(format!("unsupported upload protocol: {protocol}"));
        }
        self.multipart(request, query).await
    }

    async fn multipart(&self, request: Request, query: QueryPairs) -> Response {
        if let Err(err) = ensure_content_length_within(request.headers(), MAX_UPLOAD_BYTES) {
            return too_large(&err);
        }
        let owner_key = caller_key(request.headers(), &query);
        let mut multipart = match Multipart::from_request(request, &()).await {
            Ok(multipart) => multipart,
            Err(rejection) => {
                return invalid_argument(format!("failed to parse multipart form: {}", rejection.body_text()));
            }
        };

        let mut display_name: Option<String> = None;
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                    return too_large(&BodyTooLarge {
                        limit: MAX_UPLOAD_BYTES,
                    });
                }
                Err(err) => {
                    return invalid_argument(format!("failed to parse multipart form: {}", err.body_text()));
                }
            };

            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "metadata" => {
                    let raw = match field.bytes().await {
                        Ok(raw) => raw,
                        Err(err) => return invalid_argument(format!("invalid metadata: {}", err.body_text())),
                    };
                    match serde_json::from_slice::<StartMetadata>(&raw) {
                        Ok(metadata) => {
                            if let Some(name) = non_empty(metadata.file.display_name) {
                                display_name = Some(name);
                            }
                        }
                        Err(err) => return invalid_argument(format!("invalid metadata: {err}")),
                    }
                }
                "display_name" => {
                    if let Ok(text) = field.text().await {
                        display_name = non_empty(Some(text)).or(display_name);
                    }
                }
                "file" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let mime_type = field
                        .content_type()
                        .map(str::to_string)
                        .and_then(|mime| non_empty(Some(mime)))
                        .unwrap_or_else(|| detect_mime_type(&file_name));
                    let display_name = display_name.take().unwrap_or_else(|| file_name.clone());

                    let reader = StreamReader::new(Box::pin(field.map_err(std::io::Error::other)));
                    return match self
                        .store
                        .save_file(reader, &file_name, &mime_type, &display_name, &owner_key)
                        .await
                    {
                        Ok(record) => Json(UploadedFile {
                            file: FileResource::from(&record),
                        })
                        .into_response(),
                        Err(err) => upload_failure(&err),
                    };
                }
                _ => {}
            }
        }

        invalid_argument("missing or invalid 'file' field in multipart form")
    }

    async fn resumable(&self, request: Request, query: QueryPairs) -> Response {
        match UploadCommand::from_headers(request.headers()) {
            UploadCommand::Start => self.resumable_start(request, query).await,
            UploadCommand::Finalize => self.resumable_finalize(request, query).await,
            UploadCommand::Query => resumable_query(&query),
            UploadCommand::Upload => invalid_argument(
                "unsupported resumable command: upload (send the whole file with \"upload, finalize\")",
            ),
            UploadCommand::Unknown(command) => {
                invalid_argument(format!("unsupported resumable command: {command}"))
            }
        }
    }

    async fn resumable_start(&self, request: Request, query: QueryPairs) -> Response {
        let (parts, body) = request.into_parts();
        let raw = match axum::body::to_bytes(body, MAX_METADATA_BYTES).await {
            Ok(raw) => raw,
            Err(err) => return invalid_argument(format!("invalid metadata: {err}")),
        };
        let metadata = if raw.iter().all(u8::is_ascii_whitespace) {
            StartMetadata::default()
        } else {
            match serde_json::from_slice::<StartMetadata>(&raw) {
                Ok(metadata) => metadata,
                Err(err) => return invalid_argument(format!("invalid metadata: {err}")),
            }
        };

        let upload_id = generate_file_id();
        let owner_key = caller_key(&parts.headers, &query);
        let display_name = non_empty(metadata.file.display_name).unwrap_or_default();
        let mime_type = extract_header(&parts.headers, UPLOAD_HEADER_CONTENT_TYPE)
            .or_else(|| non_empty(metadata.file.mime_type))
            .unwrap_or_default();
        let url = continuation_url(
            &parts.headers,
            api_version_from_path(parts.uri.path()),
            &[
                ("upload_id", upload_id.as_str()),
                ("key", owner_key.as_str()),
                ("display_name", display_name.as_str()),
                ("mime_type", mime_type.as_str()),
            ],
        );

        tracing::debug!(upload_id = %upload_id, "gemini files: resumable upload started");

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, UPLOAD_URL, &url);
        insert_header(&mut headers, UPLOAD_STATUS, "active");
        insert_header(
            &mut headers,
            UPLOAD_CHUNK_GRANULARITY,
            &CHUNK_GRANULARITY_BYTES.to_string(),
        );
        (StatusCode::OK, headers).into_response()
    }

    async fn resumable_finalize(&self, request: Request, query: QueryPairs) -> Response {
        let Some(upload_id) = query.get("upload_id").map(str::to_string) else {
            return invalid_argument("missing upload_id parameter");
        };
        let (parts, body) = request.into_parts();
        let owner_key = caller_key(&parts.headers, &query);
        let mime_type = extract_header(&parts.headers, UPLOAD_HEADER_CONTENT_TYPE)
            .or_else(|| query.get("mime_type").map(str::to_string))
            .or_else(|| extract_header(&parts.headers, "content-type"))
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let display_name = query
            .get("display_name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("upload-{}", upload_id.chars().take(8).collect::<String>()));

        let result = match ensure_content_length_within(&parts.headers, MAX_UPLOAD_BYTES) {
            Ok(()) => {
                self.store
                    .save_file(
                        bounded_reader(body, MAX_UPLOAD_BYTES),
                        &upload_id,
                        &mime_type,
                        &display_name,
                        &owner_key,
                    )
                    .await
            }
            Err(err) => Err(FilesError::from(std::io::Error::other(err))),
        };

        let mut headers = HeaderMap::new();
        match result {
            Ok(record) => {
                insert_header(&mut headers, UPLOAD_STATUS, "final");
                (
                    headers,
                    Json(UploadedFile {
                        file: FileResource::from(&record),
                    }),
                )
                    .into_response()
            }
            Err(err) => {
                insert_header(&mut headers, UPLOAD_STATUS, "failed");
                if is_body_too_large(&err) {
                    return (headers, too_large(&BodyTooLarge { limit: MAX_UPLOAD_BYTES }))
                        .into_response();
                }
                if err.kind() == ErrorKind::TooLarge {
                    return (headers, files_error(&err, "failed to save file")).into_response();
                }
                tracing::error!(upload_id = %upload_id, error = %err, "gemini files: failed to save resumable upload");
                (
                    headers,
                    google_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        GoogleStatus::Internal,
                        "failed to save file",
                    ),
                )
                    .into_response()
            }
        }
    }

    pub async fn get(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        let file_id = match normalize_file_id(file_id) {
            Ok(file_id) => file_id,
            Err(response) => return *response,
        };
        let owner_key = caller_key(headers, query);
        match self.store.get_file_for_owner(file_id, &owner_key).await {
            Ok(record) => Json(FileResource::from(&record)).into_response(),
            Err(err) => not_found_or(&err, file_id, "failed to get file"),
        }
    }

    pub async fn list(&self, headers: &HeaderMap, query: &QueryPairs) -> Response {
        let owner_key = caller_key(headers, query);
        match self.store.list_files_for_owner(&owner_key).await {
            Ok(records) => Json(FileList {
                files: records.iter().map(FileResource::from).collect(),
            })
            .into_response(),
            Err(err) => {
                tracing::error!(error = %err, "gemini files: failed to list files");
                files_error(&err, "failed to list files")
            }
        }
    }

    pub async fn delete(&self, headers: &HeaderMap, query: &QueryPairs, file_id: &str) -> Response {
        let file_id = match normalize_file_id(file_id) {
            Ok(file_id) => file_id,
            Err(response) => return *response,
        };
        let owner_key = caller_key(headers, query);
        match self.store.delete_file_for_owner(file_id, &owner_key).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => not_found_or(&err, file_id, "failed to delete file"),
        }
    }
}

fn resumable_query(query: &QueryPairs) -> Response {
    if query.get("upload_id").is_none() {
        return invalid_argument("missing upload_id parameter");
    }
    // Partial progress is not tracked.
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, UPLOAD_STATUS, "active");
    insert_header(&mut headers, UPLOAD_SIZE_RECEIVED, "0");
    (StatusCode::OK, headers).into_response()
}

/// Accepts `abc` and `files/abc`.
fn normalize_file_id(raw: &str) -> Result<&str, Box<Response>> {
    let file_id = raw.trim().trim_start_matches('/');
    let file_id = file_id.strip_prefix("files/").unwrap_or(file_id);
    if file_id.is_empty() {
        return Err(Box::new(invalid_argument("missing fileId parameter")));
    }
    Ok(file_id)
}

fn not_found_or(err: &FilesError, file_id: &str, fallback_message: &str) -> Response {
    if err.is_not_found() {
        return google_error(
            StatusCode::NOT_FOUND,
            GoogleStatus::NotFound,
            format!("file not found: {file_id}"),
        )
        .into_response();
    }
    tracing::error!(file_id, error = %err, "gemini files: {fallback_message}");
    files_error(err, fallback_message)
}

fn upload_failure(err: &FilesError) -> Response {
    if is_body_too_large(err) {
        return too_large(&BodyTooLarge {
            limit: MAX_UPLOAD_BYTES,
        });
    }
    tracing::error!(error = %err, "gemini files: failed to save uploaded file");
    files_error(err, "failed to save file")
}

fn too_large(err: &BodyTooLarge) -> Response {
    google_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        GoogleStatus::ResourceExhausted,
        err.to_string(),
    )
    .into_response()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn detect_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_detection_falls_back_to_octet_stream() {
        assert_eq!(detect_mime_type("photo.PNG"), "image/png");
        assert_eq!(detect_mime_type("notes.txt"), "text/plain");
        assert_eq!(detect_mime_type("blob"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn start_metadata_accepts_both_spellings() {
        let camel: StartMetadata =
            serde_json::from_str(r#"{"file":{"displayName":"a","mimeType":"text/plain"}}"#).expect("json");
        assert_eq!(camel.file.display_name.as_deref(), Some("a"));
        assert_eq!(camel.file.mime_type.as_deref(), Some("text/plain"));

        let snake: StartMetadata = serde_json::from_str(r#"{"file":{"display_name":"b"}}"#).expect("json");
        assert_eq!(snake.file.display_name.as_deref(), Some("b"));

        let empty: StartMetadata = serde_json::from_str("{}").expect("json");
        assert!(empty.file.display_name.is_none());
    }

    #[test]
    fn file_ids_accept_handle_prefix() {
        assert_eq!(normalize_file_id("files/abc").ok(), Some("abc"));
        assert_eq!(normalize_file_id("abc").ok(), Some("abc"));
        assert!(normalize_file_id("files/").is_err());
    }
}
