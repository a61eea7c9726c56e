use axum::body::Body;
use axum::http::HeaderMap;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::FilesError;
use crate::gateway::executor::ByteStream;

/// Upper bound for a single uploaded file.
pub const MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;
/// Resumable "start" bodies only carry a small metadata document.
pub const MAX_METADATA_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("request body exceeded max bytes ({limit})")]
pub struct BodyTooLarge {
    pub limit: u64,
}

pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("content-length")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Rejects up front when the declared length is already over `max_bytes`.
pub fn ensure_content_length_within(headers: &HeaderMap, max_bytes: u64) -> Result<(), BodyTooLarge> {
    match declared_content_length(headers) {
        Some(len) if len > max_bytes => Err(BodyTooLarge { limit: max_bytes }),
        _ => Ok(()),
    }
}

/// Body as a byte stream that fails once more than `max_bytes` have passed through.
pub fn bounded_byte_stream(body: Body, max_bytes: u64) -> ByteStream {
    let mut seen: u64 = 0;
    let stream = body.into_data_stream().map(move |chunk| {
        let chunk = chunk.map_err(std::io::Error::other)?;
        seen = seen.saturating_add(chunk.len() as u64);
        if seen > max_bytes {
            return Err(std::io::Error::other(BodyTooLarge { limit: max_bytes }));
        }
        Ok(chunk)
    });
    Box::pin(stream)
}

pub fn bounded_reader(body: Body, max_bytes: u64) -> impl AsyncRead + Unpin + Send {
    StreamReader::new(bounded_byte_stream(body, max_bytes))
}

/// True when a save failed because the client sent more than allowed.
pub fn is_body_too_large(err: &FilesError) -> bool {
    let FilesError::Io(io) = err else {
        return false;
    };
    let Some(inner) = io.get_ref() else {
        return false;
    };
    if inner.is::<BodyTooLarge>() {
        return true;
    }
    inner
        .downcast_ref::<axum::extract::multipart::MultipartError>()
        .is_some_and(|err| err.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE)
}
