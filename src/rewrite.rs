//! Inlines locally cached files into outbound `generateContent` payloads.
//!
//! Parts that reference a cached handle (`files/<id>`) through `file_data` or
//! `fileData` are replaced with `inline_data`/`inlineData` carrying the base64
//! bytes. Every reference is loaded before the payload is touched, so a failed
//! lookup leaves the payload exactly as it was.

use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::filestore::{FileStore, HANDLE_PREFIX, is_valid_file_id};

/// Ceiling on bytes inlined per referenced file.
pub const DEFAULT_MAX_INLINE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldSpelling {
    Snake,
    Camel,
}

impl FieldSpelling {
    fn reference_field(self) -> &'static str {
        match self {
            Self::Snake => "file_data",
            Self::Camel => "fileData",
        }
    }

    fn uri_field(self) -> &'static str {
        match self {
            Self::Snake => "file_uri",
            Self::Camel => "fileUri",
        }
    }

    fn mime_field(self) -> &'static str {
        match self {
            Self::Snake => "mime_type",
            Self::Camel => "mimeType",
        }
    }

    fn inline_field(self) -> &'static str {
        match self {
            Self::Snake => "inline_data",
            Self::Camel => "inlineData",
        }
    }
}

#[derive(Debug)]
struct FilePartReference {
    content_index: usize,
    part_index: usize,
    file_id: String,
    declared_mime_type: Option<String>,
    spelling: FieldSpelling,
}

#[derive(Clone, Debug)]
pub struct PayloadRewriter {
    store: Option<FileStore>,
    max_inline_bytes: u64,
}

impl PayloadRewriter {
    /// Without a store every call is a no-op.
    pub fn new(store: Option<FileStore>) -> Self {
        Self {
            store,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
        }
    }

    pub fn with_max_inline_bytes(mut self, max_inline_bytes: u64) -> Self {
        self.max_inline_bytes = max_inline_bytes;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Replaces every owned local file reference in `payload` with inline data.
    /// Returns how many parts were rewritten.
    pub async fn inline_local_files(&self, payload: &mut Value, owner_key: &str) -> Result<usize> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };

        let references = find_local_references(payload);
        if references.is_empty() {
            return Ok(0);
        }

        let mut loaded = Vec::with_capacity(references.len());
        for reference in references {
            let (data, record) = store
                .read_bytes_for_owner(&reference.file_id, owner_key, self.max_inline_bytes)
                .await?;
            let mime_type = reference
                .declared_mime_type
                .clone()
                .unwrap_or(record.mime_type);
            loaded.push((reference, mime_type, data));
        }

        let rewritten = loaded.len();
        for (reference, mime_type, data) in loaded {
            if let Some(part) = part_mut(payload, reference.content_index, reference.part_index) {
                apply_inline_data(part, reference.spelling, mime_type, &data);
            }
        }

        tracing::debug!(parts = rewritten, "inlined local gemini files into payload");
        Ok(rewritten)
    }
}

/// Extracts the store id from a local handle; anything else is an upstream handle.
pub fn local_file_id(handle: &str) -> Option<&str> {
    let file_id = handle.strip_prefix(HANDLE_PREFIX)?;
    is_valid_file_id(file_id).then_some(file_id)
}

fn find_local_references(payload: &Value) -> Vec<FilePartReference> {
    let Some(contents) = payload.get("contents").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (content_index, content) in contents.iter().enumerate() {
        let Some(parts) = content.get("parts").and_then(Value::as_array) else {
            continue;
        };
        for (part_index, part) in parts.iter().enumerate() {
            let Some(part) = part.as_object() else {
                continue;
            };
            if let Some(reference) = parse_reference(content_index, part_index, part) {
                out.push(reference);
            }
        }
    }
    out
}

fn parse_reference(
    content_index: usize,
    part_index: usize,
    part: &Map<String, Value>,
) -> Option<FilePartReference> {
    let (spelling, file_data) = [FieldSpelling::Snake, FieldSpelling::Camel]
        .into_iter()
        .find_map(|spelling| {
            part.get(spelling.reference_field())
                .and_then(Value::as_object)
                .filter(|obj| string_field(obj, spelling.uri_field()).is_some())
                .map(|obj| (spelling, obj))
        })?;

    let uri = string_field(file_data, spelling.uri_field())?;
    let file_id = local_file_id(uri)?;
    let declared_mime_type = string_field(file_data, spelling.mime_field()).map(str::to_string);

    Some(FilePartReference {
        content_index,
        part_index,
        file_id: file_id.to_string(),
        declared_mime_type,
        spelling,
    })
}

fn string_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn part_mut(payload: &mut Value, content_index: usize, part_index: usize) -> Option<&mut Map<String, Value>> {
    payload
        .get_mut("contents")?
        .get_mut(content_index)?
        .get_mut("parts")?
        .get_mut(part_index)?
        .as_object_mut()
}

fn apply_inline_data(
    part: &mut Map<String, Value>,
    spelling: FieldSpelling,
    mime_type: String,
    data: &[u8],
) {
    let mut inline = Map::new();
    inline.insert(spelling.mime_field().to_string(), Value::String(mime_type));
    inline.insert(
        "data".to_string(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(data)),
    );
    part.insert(spelling.inline_field().to_string(), Value::Object(inline));
    part.remove(FieldSpelling::Snake.reference_field());
    part.remove(FieldSpelling::Camel.reference_field());
}
