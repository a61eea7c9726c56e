#![cfg(feature = "gateway")]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use ditto_files::filestore::{FileStore, FileStoreConfig};
use ditto_files::error::ErrorKind;
use ditto_files::gateway::{FilesGateway, QueryPairs, router};
use serde_json::Value;
use tower::util::ServiceExt;

const BOUNDARY: &str = "ditto-files-boundary";
const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

async fn local_app(dir: &std::path::Path) -> (Router, Arc<FilesGateway>) {
    let store = FileStore::open(FileStoreConfig::new(dir.join("gemini-files")))
        .await
        .expect("open store");
    let gateway = Arc::new(FilesGateway::local(store));
    (router(Arc::clone(&gateway)), gateway)
}

fn multipart_body(display_name: Option<&str>, file: Option<(&str, &str, &str)>) -> Body {
    let mut body = String::new();
    if let Some(display_name) = display_name {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\nContent-Type: application/json\r\n\r\n{{\"file\":{{\"displayName\":\"{display_name}\"}}}}\r\n"
        ));
    }
    if let Some((file_name, content_type, content)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn multipart_upload(key: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload/v1beta/files")
        .header("x-goog-upload-protocol", "multipart")
        .header("x-goog-api-key", key)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .expect("request")
}

fn get_request(method: &str, uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-goog-api-key", key)
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn upload_hello(app: &Router, key: &str) -> String {
    let response = app
        .clone()
        .oneshot(multipart_upload(
            key,
            multipart_body(Some("greeting"), Some(("hello.txt", "text/plain", "hello"))),
        ))
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    body["file"]["name"].as_str().expect("name").to_string()
}

#[tokio::test]
async fn multipart_upload_renders_file_resource() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;

    let response = app
        .clone()
        .oneshot(multipart_upload(
            "key-a",
            multipart_body(Some("greeting"), Some(("hello.txt", "text/plain", "hello"))),
        ))
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let file = &body["file"];

    let name = file["name"].as_str().expect("name");
    let id = name.strip_prefix("files/").expect("handle prefix");
    assert_eq!(id.len(), 32);
    assert_eq!(file["uri"], name);
    assert_eq!(file["displayName"], "greeting");
    assert_eq!(file["mimeType"], "text/plain");
    assert_eq!(file["sizeBytes"], "5");
    assert_eq!(file["sha256Hash"], HELLO_SHA256);
    assert_eq!(file["state"], "ACTIVE");
    assert_eq!(file["createTime"], file["updateTime"]);
    let create_time = file["createTime"].as_str().expect("createTime");
    assert!(create_time.ends_with('Z'));
    assert_eq!(create_time.split('.').nth(1).map(str::len), Some(7));
}

#[tokio::test]
async fn display_name_falls_back_to_file_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;

    let response = app
        .clone()
        .oneshot(multipart_upload(
            "key-a",
            multipart_body(None, Some(("report.pdf", "application/pdf", "%PDF"))),
        ))
        .await
        .expect("upload");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file"]["displayName"], "report.pdf");
    assert_eq!(body["file"]["mimeType"], "application/pdf");
}

#[tokio::test]
async fn get_list_delete_are_scoped_to_the_caller_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;
    let name = upload_hello(&app, "key-a").await;
    let id = name.trim_start_matches("files/").to_string();

    let owned = app
        .clone()
        .oneshot(get_request("GET", &format!("/v1beta/files/{id}"), "key-a"))
        .await
        .expect("get");
    assert_eq!(owned.status(), StatusCode::OK);
    assert_eq!(json_body(owned).await["name"], name.as_str());

    let prefixed = app
        .clone()
        .oneshot(get_request("GET", &format!("/v1beta/files/{name}"), "key-a"))
        .await
        .expect("get prefixed");
    assert_eq!(prefixed.status(), StatusCode::OK);

    let foreign = app
        .clone()
        .oneshot(get_request("GET", &format!("/v1beta/files/{id}"), "key-b"))
        .await
        .expect("get foreign");
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
    let body = json_body(foreign).await;
    assert_eq!(body["error"]["status"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], format!("file not found: {id}"));

    let list_a = app
        .clone()
        .oneshot(get_request("GET", "/v1beta/files", "key-a"))
        .await
        .expect("list a");
    assert_eq!(list_a.status(), StatusCode::OK);
    assert_eq!(json_body(list_a).await["files"].as_array().map(Vec::len), Some(1));

    let list_b = app
        .clone()
        .oneshot(get_request("GET", "/v1/files", "key-b"))
        .await
        .expect("list b");
    assert_eq!(json_body(list_b).await["files"].as_array().map(Vec::len), Some(0));

    let foreign_delete = app
        .clone()
        .oneshot(get_request("DELETE", &format!("/v1beta/files/{id}"), "key-b"))
        .await
        .expect("delete foreign");
    assert_eq!(foreign_delete.status(), StatusCode::NOT_FOUND);

    let delete = app
        .clone()
        .oneshot(get_request("DELETE", &format!("/v1beta/files/{id}"), "key-a"))
        .await
        .expect("delete");
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);

    let gone = app
        .clone()
        .oneshot(get_request("GET", &format!("/v1beta/files/{id}"), "key-a"))
        .await
        .expect("get after delete");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bearer_token_and_query_key_identify_the_same_owner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;
    let name = upload_hello(&app, "key-a").await;

    let via_bearer = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1beta/{name}"))
                .header("authorization", "Bearer key-a")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("get");
    assert_eq!(via_bearer.status(), StatusCode::OK);

    let via_query = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1beta/{name}?key=key-a"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("get");
    assert_eq!(via_query.status(), StatusCode::OK);
}

#[tokio::test]
async fn resumable_start_finalize_and_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;

    let start = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload/v1beta/files")
                .header("host", "gw.local")
                .header("x-goog-api-key", "key-a")
                .header("x-goog-upload-protocol", "resumable")
                .header("x-goog-upload-command", "start")
                .header("x-goog-upload-header-content-type", "text/plain")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"file":{"display_name":"notes"}}"#))
                .expect("request"),
        )
        .await
        .expect("start");
    assert_eq!(start.status(), StatusCode::OK);
    assert_eq!(start.headers()["x-goog-upload-status"], "active");
    assert_eq!(start.headers()["x-goog-upload-chunk-granularity"], "262144");
    let upload_url = start.headers()["x-goog-upload-url"]
        .to_str()
        .expect("upload url")
        .to_string();
    let continuation = upload_url
        .strip_prefix("http://gw.local")
        .expect("absolute url on the public host")
        .to_string();
    assert!(continuation.starts_with("/upload/v1beta/files?upload_id="));
    assert!(continuation.contains("key=key-a"));

    let query = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&continuation)
                .header("x-goog-upload-command", "query")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("query");
    assert_eq!(query.status(), StatusCode::OK);
    assert_eq!(query.headers()["x-goog-upload-status"], "active");
    assert_eq!(query.headers()["x-goog-upload-size-received"], "0");

    let finalize = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(&continuation)
                .header("x-goog-upload-command", "upload, finalize")
                .header("x-goog-upload-offset", "0")
                .body(Body::from("hello"))
                .expect("request"),
        )
        .await
        .expect("finalize");
    assert_eq!(finalize.status(), StatusCode::OK);
    assert_eq!(finalize.headers()["x-goog-upload-status"], "final");
    let body = json_body(finalize).await;
    assert_eq!(body["file"]["displayName"], "notes");
    assert_eq!(body["file"]["mimeType"], "text/plain");
    assert_eq!(body["file"]["sha256Hash"], HELLO_SHA256);

    let name = body["file"]["name"].as_str().expect("name");
    let owned = app
        .clone()
        .oneshot(get_request("GET", &format!("/v1beta/{name}"), "key-a"))
        .await
        .expect("get");
    assert_eq!(owned.status(), StatusCode::OK);
}

#[tokio::test]
async fn finalize_without_display_name_uses_upload_id_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;

    let upload_id = "abcdef0123456789abcdef0123456789";
    let finalize = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/upload/v1beta/files?upload_id={upload_id}&key=key-a"))
                .header("x-goog-upload-command", "upload, finalize")
                .header("content-type", "application/octet-stream")
                .body(Body::from("raw"))
                .expect("request"),
        )
        .await
        .expect("finalize");
    assert_eq!(finalize.status(), StatusCode::OK);
    let body = json_body(finalize).await;
    assert_eq!(body["file"]["displayName"], "upload-abcdef01");
    assert_eq!(body["file"]["mimeType"], "application/octet-stream");
}

#[tokio::test]
async fn malformed_upload_requests_are_invalid_arguments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;

    let cases = [
        (
            Request::builder()
                .method("POST")
                .uri("/upload/v1beta/files")
                .header("x-goog-upload-protocol", "grpc")
                .body(Body::empty())
                .expect("request"),
            "unsupported upload protocol: grpc",
        ),
        (
            Request::builder()
                .method("POST")
                .uri("/upload/v1beta/files")
                .header("x-goog-upload-command", "finalize")
                .body(Body::from("x"))
                .expect("request"),
            "missing upload_id parameter",
        ),
        (
            Request::builder()
                .method("POST")
                .uri("/upload/v1beta/files?upload_id=abc")
                .header("x-goog-upload-command", "cancel")
                .body(Body::empty())
                .expect("request"),
            "unsupported resumable command: cancel",
        ),
        (
            multipart_upload("key-a", multipart_body(Some("only metadata"), None)),
            "missing or invalid 'file' field in multipart form",
        ),
    ];

    for (request, message) in cases {
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{message}");
        let body = json_body(response).await;
        assert_eq!(body["error"]["status"], "INVALID_ARGUMENT");
        assert_eq!(body["error"]["message"], message);
    }
}

#[tokio::test]
async fn path_escaping_ids_are_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, _gateway) = local_app(dir.path()).await;
    upload_hello(&app, "key-a").await;

    for uri in [
        "/v1beta/files/..%2F..%2Fmetadata",
        "/v1beta/files/%5c..%5c..%5csecret",
        "/v1beta/files/ABCDEF0123456789ABCDEF0123456789",
        "/v1beta/files/..",
    ] {
        let response = app
            .clone()
            .oneshot(get_request("GET", uri, "key-a"))
            .await
            .expect("get");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn health_reports_the_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, gateway) = local_app(dir.path()).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["mode"], "local");
    gateway.close();
}

#[tokio::test]
async fn generate_requests_inline_files_owned_by_the_caller() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (app, gateway) = local_app(dir.path()).await;
    let name = upload_hello(&app, "key-a").await;

    let original = serde_json::json!({
        "contents": [{"parts": [{"fileData": {"fileUri": name}}]}]
    });
    let query = QueryPairs::default();

    let mut foreign = axum::http::HeaderMap::new();
    foreign.insert("x-goog-api-key", "key-b".parse().expect("header"));
    let mut payload = original.clone();
    let err = gateway
        .rewrite_generate_request(&foreign, &query, &mut payload)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(payload, original);

    let mut owner = axum::http::HeaderMap::new();
    owner.insert("authorization", "Bearer key-a".parse().expect("header"));
    let rewritten = gateway
        .rewrite_generate_request(&owner, &query, &mut payload)
        .await
        .expect("rewrite");
    assert_eq!(rewritten, 1);
    let part = &payload["contents"][0]["parts"][0];
    assert!(part.get("fileData").is_none());
    assert_eq!(part["inlineData"]["mimeType"], "text/plain");
    assert_eq!(part["inlineData"]["data"], "aGVsbG8=");
    gateway.close();
}

#[tokio::test]
async fn finalize_over_quota_is_resource_exhausted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(
        FileStoreConfig::new(dir.path().join("gemini-files")).with_max_total_size_mb(1),
    )
    .await
    .expect("open store");
    let gateway = Arc::new(FilesGateway::local(store));
    let app = router(Arc::clone(&gateway));

    let finalize = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload/v1beta/files?upload_id=abcdef0123456789abcdef0123456789&key=key-a")
                .header("x-goog-upload-command", "upload, finalize")
                .body(Body::from(vec![1u8; 1024 * 1024 + 1]))
                .expect("request"),
        )
        .await
        .expect("finalize");
    assert_eq!(finalize.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(finalize.headers()["x-goog-upload-status"], "failed");
    let body = json_body(finalize).await;
    assert_eq!(body["error"]["status"], "RESOURCE_EXHAUSTED");
    assert_eq!(gateway.store().expect("local store").total_bytes(), 0);
    gateway.close();
}
