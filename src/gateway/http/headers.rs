use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const UPLOAD_PROTOCOL: &str = "x-goog-upload-protocol";
pub const UPLOAD_COMMAND: &str = "x-goog-upload-command";
pub const UPLOAD_URL: &str = "x-goog-upload-url";
pub const UPLOAD_CONTROL_URL: &str = "x-goog-upload-control-url";
pub const UPLOAD_STATUS: &str = "x-goog-upload-status";
pub const UPLOAD_CHUNK_GRANULARITY: &str = "x-goog-upload-chunk-granularity";
pub const UPLOAD_SIZE_RECEIVED: &str = "x-goog-upload-size-received";
pub const UPLOAD_HEADER_CONTENT_TYPE: &str = "x-goog-upload-header-content-type";
pub const API_KEY_HEADER: &str = "x-goog-api-key";

pub const CHUNK_GRANULARITY_BYTES: u64 = 256 * 1024;

/// Query parameters that carry client credentials and are never forwarded upstream.
const CLIENT_AUTH_QUERY_PARAMS: &[&str] = &["key", "auth_token"];

/// Decoded query string, order preserved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryPairs(pub Vec<(String, String)>);

impl QueryPairs {
    pub fn from_uri(uri: &axum::http::Uri) -> Self {
        axum::extract::Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|query| Self(query.0))
            .unwrap_or_default()
    }

    /// First non-empty value for `name`, trimmed.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .find(|value| !value.is_empty())
    }

    /// Copy without client credentials or any of `also_drop`.
    pub fn forwardable(&self, also_drop: &[&str]) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter(|(key, _)| {
                !CLIENT_AUTH_QUERY_PARAMS
                    .iter()
                    .chain(also_drop.iter())
                    .any(|dropped| key.eq_ignore_ascii_case(dropped))
            })
            .cloned()
            .collect()
    }
}

pub fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim()
        .to_string();
    let rest = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let token = rest.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Caller key in precedence order: bearer token, `x-goog-api-key`, `?key=`.
/// Empty for anonymous callers.
pub fn caller_key(headers: &HeaderMap, query: &QueryPairs) -> String {
    extract_bearer(headers)
        .or_else(|| extract_header(headers, API_KEY_HEADER))
        .or_else(|| query.get("key").map(str::to_string))
        .unwrap_or_default()
}

pub fn is_resumable(headers: &HeaderMap, query: &QueryPairs) -> bool {
    if extract_header(headers, UPLOAD_PROTOCOL)
        .is_some_and(|protocol| protocol.eq_ignore_ascii_case("resumable"))
    {
        return true;
    }
    extract_header(headers, UPLOAD_COMMAND).is_some() || query.get("upload_id").is_some()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadCommand {
    Start,
    /// A chunk without finalize.
    Upload,
    Finalize,
    Query,
    Unknown(String),
}

impl UploadCommand {
    /// Accepts the comma-separated command list clients send, e.g. `upload, finalize`.
    pub fn parse(raw: &str) -> Self {
        let words: Vec<String> = raw
            .split(',')
            .map(|word| word.trim().to_ascii_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        let has = |name: &str| words.iter().any(|word| word == name);
        if words.is_empty() {
            return Self::Unknown(String::new());
        }
        if words.iter().any(|word| !matches!(word.as_str(), "start" | "upload" | "finalize" | "query")) {
            return Self::Unknown(raw.trim().to_string());
        }
        if has("start") {
            Self::Start
        } else if has("query") {
            Self::Query
        } else if has("finalize") {
            Self::Finalize
        } else {
            Self::Upload
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::parse(&extract_header(headers, UPLOAD_COMMAND).unwrap_or_default())
    }
}

/// Request headers that may travel upstream: upload-protocol and content
/// negotiation only.
pub fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        if lower.starts_with("x-goog-upload-") || lower == "content-type" || lower == "accept" {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Upstream response headers minus hop-by-hop and framing headers, and the
/// upload server's own session id.
pub fn relayable_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-connection",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "content-length",
        "alt-svc",
        "x-guploader-uploadid",
    ] {
        out.remove(name);
    }
    out
}

/// Absolute when the public host is known, otherwise relative.
pub fn continuation_url(headers: &HeaderMap, version: &str, params: &[(&str, &str)]) -> String {
    let scheme = extract_header(headers, "x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = extract_header(headers, "x-forwarded-host").or_else(|| extract_header(headers, "host"));
    let path = format!("/upload/{version}/files");

    let base = match host.as_deref() {
        Some(host) => format!("{scheme}://{host}{path}"),
        None => format!("http://localhost{path}"),
    };
    let Ok(mut url) = reqwest::Url::parse(&base) else {
        return path;
    };
    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            if !value.is_empty() {
                pairs.append_pair(name, value);
            }
        }
    }
    if host.is_some() {
        return url.to_string();
    }
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// `v1beta` for `/upload/v1beta/files` and `/v1beta/files/...`.
pub fn api_version_from_path(path: &str) -> &str {
    let mut segments = path.trim_start_matches('/').split('/');
    let first = segments.next().unwrap_or_default();
    let version = if first == "upload" {
        segments.next().unwrap_or_default()
    } else {
        first
    };
    if version.is_empty() { "v1beta" } else { version }
}

pub fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
