//! axum surface for the Gemini Files API.

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;

pub mod bounded_body;
pub mod envelope;
pub mod headers;
pub mod local;
pub mod upstream;

pub use envelope::{FileList, FileResource, GoogleStatus, UploadedFile};
pub use headers::{QueryPairs, caller_key};
pub use local::LocalFileHandler;
pub use upstream::UpstreamFileProxy;

use super::FilesGateway;
use bounded_body::MAX_UPLOAD_BYTES;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
}

/// Both `v1beta` and `v1` are served; the version is echoed back in
/// continuation URLs.
pub fn router(gateway: Arc<FilesGateway>) -> Router {
    let body_limit = usize::try_from(MAX_UPLOAD_BYTES).unwrap_or(usize::MAX);
    Router::new()
        .route("/health", get(health))
        .route("/upload/v1beta/files", post(upload_file))
        .route("/upload/v1/files", post(upload_file))
        .route("/v1beta/files", get(list_files))
        .route("/v1/files", get(list_files))
        .route("/v1beta/files/*file_id", get(get_file).delete(delete_file))
        .route("/v1/files/*file_id", get(get_file).delete(delete_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(gateway)
}

async fn health(State(gateway): State<Arc<FilesGateway>>) -> Response {
    axum::Json(HealthResponse {
        status: "ok",
        mode: gateway.mode().as_str(),
    })
    .into_response()
}

async fn upload_file(State(gateway): State<Arc<FilesGateway>>, request: Request) -> Response {
    gateway.upload(request).await
}

async fn list_files(State(gateway): State<Arc<FilesGateway>>, headers: HeaderMap, uri: Uri) -> Response {
    let query = QueryPairs::from_uri(&uri);
    gateway.list(&headers, &query).await
}

async fn get_file(
    State(gateway): State<Arc<FilesGateway>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let query = QueryPairs::from_uri(&uri);
    gateway.get(&headers, &query, &file_id).await
}

async fn delete_file(
    State(gateway): State<Arc<FilesGateway>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let query = QueryPairs::from_uri(&uri);
    gateway.delete(&headers, &query, &file_id).await
}
