use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const HANDLE_PREFIX: &str = "files/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

impl FileState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
        }
    }
}

/// Metadata sidecar persisted next to every cached file. Never mutated once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(rename = "fileId")]
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(rename = "sha256Hash")]
    pub content_hash: String,
    #[serde(rename = "uri")]
    pub handle: String,
    pub state: FileState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub upload_source: String,
    #[serde(rename = "apiKey", default)]
    pub owner_key_hash: String,
}

impl FileRecord {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn is_owned_by_hash(&self, owner_key_hash: &str) -> bool {
        self.owner_key_hash == owner_key_hash
    }
}

pub fn handle_for(id: &str) -> String {
    format!("{HANDLE_PREFIX}{id}")
}
