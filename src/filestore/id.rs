use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

static FILE_ID_SEQ: AtomicU64 = AtomicU64::new(0);

pub const FILE_ID_LEN: usize = 32;

/// Fresh 32-character lowercase hex identifier.
pub fn generate_file_id() -> String {
    let mut bytes = [0u8; FILE_ID_LEN / 2];
    if getrandom::fill(&mut bytes).is_err() {
        let ts_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let seq = FILE_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(format!("{ts_nanos}-{seq}").as_bytes());
        bytes.copy_from_slice(&digest[..FILE_ID_LEN / 2]);
    }
    hex_lower(&bytes)
}

/// Only ids of exactly 32 hex digits may ever be joined onto a store path.
pub fn is_valid_file_id(file_id: &str) -> bool {
    file_id.len() == FILE_ID_LEN && file_id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// One-way owner partition key: first 8 bytes of sha256, hex encoded.
/// The anonymous caller (empty key) maps to the empty hash.
pub fn hash_owner_key(owner_key: &str) -> String {
    if owner_key.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(owner_key.as_bytes());
    hex_lower(&digest[..8])
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
