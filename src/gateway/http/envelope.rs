use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{ErrorKind, FilesError};
use crate::filestore::FileRecord;

/// Symbolic status vocabulary of Google API error envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoogleStatus {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    ResourceExhausted,
    DeadlineExceeded,
    Unavailable,
    Internal,
    Unknown,
}

impl GoogleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_http(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::InvalidArgument,
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::FORBIDDEN => Self::PermissionDenied,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYLOAD_TOO_LARGE => {
                Self::ResourceExhausted
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::DeadlineExceeded,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => Self::Unavailable,
            status if status.is_server_error() => Self::Internal,
            _ => Self::Unknown,
        }
    }

    /// Accepts symbolic names (`NOT_FOUND`) and HTTP reason phrases (`Not Found`).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|ch| match ch {
                ' ' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        let status = match normalized.as_str() {
            "INVALID_ARGUMENT" | "BAD_REQUEST" => Self::InvalidArgument,
            "UNAUTHENTICATED" | "UNAUTHORIZED" => Self::Unauthenticated,
            "PERMISSION_DENIED" | "FORBIDDEN" => Self::PermissionDenied,
            "NOT_FOUND" => Self::NotFound,
            "RESOURCE_EXHAUSTED" | "TOO_MANY_REQUESTS" | "PAYLOAD_TOO_LARGE" => {
                Self::ResourceExhausted
            }
            "DEADLINE_EXCEEDED" | "REQUEST_TIMEOUT" | "GATEWAY_TIMEOUT" => Self::DeadlineExceeded,
            "UNAVAILABLE" | "SERVICE_UNAVAILABLE" | "BAD_GATEWAY" => Self::Unavailable,
            "INTERNAL" | "INTERNAL_SERVER_ERROR" => Self::Internal,
            "UNKNOWN" => Self::Unknown,
            _ => return None,
        };
        Some(status)
    }
}

#[derive(Debug, Serialize)]
pub struct GoogleApiErrorDetail {
    pub code: u16,
    pub message: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct GoogleApiErrorResponse {
    pub error: GoogleApiErrorDetail,
}

pub fn google_error(
    status: StatusCode,
    google_status: GoogleStatus,
    message: impl Into<String>,
) -> (StatusCode, Json<GoogleApiErrorResponse>) {
    (
        status,
        Json(GoogleApiErrorResponse {
            error: GoogleApiErrorDetail {
                code: status.as_u16(),
                message: message.into(),
                status: google_status.as_str(),
            },
        }),
    )
}

pub fn invalid_argument(message: impl Into<String>) -> Response {
    google_error(StatusCode::BAD_REQUEST, GoogleStatus::InvalidArgument, message).into_response()
}

pub fn status_for_kind(kind: ErrorKind) -> (StatusCode, GoogleStatus) {
    match kind {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, GoogleStatus::NotFound),
        ErrorKind::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, GoogleStatus::ResourceExhausted),
        ErrorKind::InvalidArgument => (StatusCode::BAD_REQUEST, GoogleStatus::InvalidArgument),
        ErrorKind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, GoogleStatus::Unavailable),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, GoogleStatus::Internal),
    }
}

/// Renders a store failure. Internal details stay in the log; the client only
/// sees `fallback_message`.
pub fn files_error(err: &FilesError, fallback_message: &str) -> Response {
    let kind = err.kind();
    let (status, google_status) = status_for_kind(kind);
    let message = match kind {
        ErrorKind::Internal => fallback_message.to_string(),
        _ => err.to_string(),
    };
    google_error(status, google_status, message).into_response()
}

/// Rewrites an upstream error body into `{error:{code,message,status}}`.
///
/// The message falls back to a top-level `message` when the nested one is empty,
/// and reason phrases such as `Bad Gateway` become symbolic statuses.
pub fn normalize_upstream_error_payload(body: &[u8], status: StatusCode) -> Bytes {
    let trimmed = body.trim_ascii();
    let parsed = serde_json::from_slice::<Value>(trimmed).ok();

    let Some(Value::Object(mut root)) = parsed else {
        let message = String::from_utf8_lossy(trimmed).trim().to_string();
        let message = if message.is_empty() {
            status.canonical_reason().unwrap_or("upstream error").to_string()
        } else {
            message
        };
        return envelope_bytes(status, GoogleStatus::from_http(status), message);
    };

    let top_level_message = root
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string);

    let mut error = match root.remove("error") {
        Some(Value::Object(error)) => error,
        Some(Value::String(message)) => {
            let mut error = Map::new();
            error.insert("message".to_string(), Value::String(message));
            error
        }
        _ => Map::new(),
    };

    let message_missing = error
        .get("message")
        .and_then(Value::as_str)
        .is_none_or(|message| message.trim().is_empty());
    if message_missing {
        let message = top_level_message
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "upstream error".to_string());
        error.insert("message".to_string(), Value::String(message));
    }

    let google_status = error
        .get("status")
        .and_then(Value::as_str)
        .and_then(GoogleStatus::parse)
        .unwrap_or_else(|| GoogleStatus::from_http(status));
    error.insert(
        "status".to_string(),
        Value::String(google_status.as_str().to_string()),
    );

    if !error.get("code").is_some_and(Value::is_u64) {
        error.insert("code".to_string(), Value::from(status.as_u16()));
    }

    root.insert("error".to_string(), Value::Object(error));
    Bytes::from(serde_json::to_vec(&Value::Object(root)).unwrap_or_default())
}

fn envelope_bytes(status: StatusCode, google_status: GoogleStatus, message: String) -> Bytes {
    let envelope = GoogleApiErrorResponse {
        error: GoogleApiErrorDetail {
            code: status.as_u16(),
            message,
            status: google_status.as_str(),
        },
    };
    Bytes::from(serde_json::to_vec(&envelope).unwrap_or_default())
}

/// RFC 3339 in UTC with exactly six fractional digits.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Files API resource representation of a stored record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    pub name: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: String,
    pub create_time: String,
    pub update_time: String,
    pub expiration_time: String,
    pub sha256_hash: String,
    pub uri: String,
    pub state: &'static str,
}

impl From<&FileRecord> for FileResource {
    fn from(record: &FileRecord) -> Self {
        let created = format_timestamp(record.created_at);
        Self {
            name: record.handle.clone(),
            display_name: record.display_name.clone(),
            mime_type: record.mime_type.clone(),
            size_bytes: record.size_bytes.to_string(),
            update_time: created.clone(),
            create_time: created,
            expiration_time: format_timestamp(record.expires_at),
            sha256_hash: record.content_hash.clone(),
            uri: record.handle.clone(),
            state: record.state.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub file: FileResource,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub files: Vec<FileResource>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_symbolic_names_and_reason_phrases() {
        assert_eq!(GoogleStatus::parse("Bad Gateway"), Some(GoogleStatus::Unavailable));
        assert_eq!(GoogleStatus::parse("not_found"), Some(GoogleStatus::NotFound));
        assert_eq!(
            GoogleStatus::parse("RESOURCE_EXHAUSTED"),
            Some(GoogleStatus::ResourceExhausted)
        );
        assert_eq!(GoogleStatus::parse("Internal Server Error"), Some(GoogleStatus::Internal));
        assert_eq!(GoogleStatus::parse("teapot"), None);
    }

    #[test]
    fn fills_empty_message_and_maps_reason_phrase() {
        let payload = br#"{"error":{"message":"","status":"Bad Gateway"},"message":"upstream failed"}"#;
        let out = normalize_upstream_error_payload(payload, StatusCode::BAD_GATEWAY);
        let value: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["error"]["message"], "upstream failed");
        assert_eq!(value["error"]["status"], "UNAVAILABLE");
        assert_eq!(value["error"]["code"], 502);
    }

    #[test]
    fn keeps_well_formed_upstream_errors() {
        let payload = br#"{"error":{"code":404,"message":"File abc not found","status":"NOT_FOUND"}}"#;
        let out = normalize_upstream_error_payload(payload, StatusCode::NOT_FOUND);
        let value: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"error":{"code":404,"message":"File abc not found","status":"NOT_FOUND"}})
        );
    }

    #[test]
    fn wraps_non_json_bodies() {
        let out = normalize_upstream_error_payload(b"  quota exceeded\n", StatusCode::TOO_MANY_REQUESTS);
        let value: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["error"]["message"], "quota exceeded");
        assert_eq!(value["error"]["status"], "RESOURCE_EXHAUSTED");
        assert_eq!(value["error"]["code"], 429);

        let out = normalize_upstream_error_payload(b"", StatusCode::SERVICE_UNAVAILABLE);
        let value: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["error"]["message"], "Service Unavailable");
    }

    #[test]
    fn timestamps_have_microsecond_precision() {
        let at = datetime!(2026-03-01 12:34:56.123456789 UTC);
        assert_eq!(format_timestamp(at), "2026-03-01T12:34:56.123456Z");
        let offset = datetime!(2026-03-01 14:00:00 +02:00);
        assert_eq!(format_timestamp(offset), "2026-03-01T12:00:00.000000Z");
    }
}
