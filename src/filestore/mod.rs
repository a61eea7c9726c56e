//! Local Gemini file cache: raw content plus a JSON metadata sidecar per file.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/files/<id>               raw content
//! <base>/metadata/<id>.meta.json  pretty-printed FileRecord
//! ```
//!
//! Writes (save, delete, sweep) hold the store lock exclusively; reads share it.
//! The byte counter only changes under the write lock but is read without it.
//! All filesystem work runs on the blocking pool so that a cancelled request
//! never leaves a half-committed save behind.

mod id;
mod record;
mod sweep;

#[cfg(test)]
mod tests;

use std::fs;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::clock::{Clock, SystemClock};
use crate::error::{FilesError, Result};
use crate::utils::task::AbortOnDrop;

pub use id::{FILE_ID_LEN, generate_file_id, hash_owner_key, is_valid_file_id};
pub use record::{FileRecord, FileState, HANDLE_PREFIX, handle_for};

/// Matches the upstream Files API retention window.
pub const DEFAULT_EXPIRATION_HOURS: u32 = 48;
/// One hundred years; longer windows overflow record timestamps.
pub const MAX_EXPIRATION_HOURS: u32 = 24 * 365 * 100;
pub const METADATA_FILE_EXTENSION: &str = ".meta.json";
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

const TEMP_FILE_EXTENSION: &str = ".tmp";
const COPY_BUFFER_BYTES: usize = 64 * 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Empty resolves to `<cwd>/gemini-files`.
    pub base_dir: PathBuf,
    /// Zero falls back to [`DEFAULT_EXPIRATION_HOURS`].
    pub expiration_hours: u32,
    /// Zero means unlimited.
    pub max_total_size_mb: u64,
    pub sweep_interval: Duration,
}

impl FileStoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            expiration_hours: DEFAULT_EXPIRATION_HOURS,
            max_total_size_mb: 0,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_expiration_hours(mut self, hours: u32) -> Self {
        self.expiration_hours = hours;
        self
    }

    pub fn with_max_total_size_mb(mut self, max_mb: u64) -> Self {
        self.max_total_size_mb = max_mb;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Validated store identifier. Only values of this type are ever joined onto a path.
#[derive(Clone, Debug, PartialEq, Eq)]
struct FileId(String);

impl FileId {
    fn parse(raw: &str) -> Result<Self> {
        if is_valid_file_id(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(FilesError::NotFound)
        }
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

struct StoreInner {
    base_dir: PathBuf,
    files_dir: PathBuf,
    metadata_dir: PathBuf,
    expiration: time::Duration,
    max_total_bytes: u64,
    clock: Arc<dyn Clock>,
    lock: RwLock<()>,
    total_bytes: AtomicU64,
}

/// Handle to the on-disk cache. Cheap to clone; all clones share one store lock
/// and one sweep task.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<StoreInner>,
    sweeper: Arc<Mutex<Option<AbortOnDrop>>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("base_dir", &self.inner.base_dir)
            .field("max_total_bytes", &self.inner.max_total_bytes)
            .field("expiration", &self.inner.expiration)
            .finish()
    }
}

impl FileStore {
    pub async fn open(config: FileStoreConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: FileStoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let base_dir = resolve_base_dir(&config.base_dir)?;
        let expiration_hours = if config.expiration_hours == 0 {
            DEFAULT_EXPIRATION_HOURS
        } else {
            config.expiration_hours
        };
        if expiration_hours > MAX_EXPIRATION_HOURS {
            return Err(FilesError::invalid_argument(format!(
                "expiration_hours {expiration_hours} exceeds the maximum of {MAX_EXPIRATION_HOURS}"
            )));
        }

        let inner = Arc::new(StoreInner {
            files_dir: base_dir.join("files"),
            metadata_dir: base_dir.join("metadata"),
            base_dir,
            expiration: time::Duration::hours(i64::from(expiration_hours)),
            max_total_bytes: config.max_total_size_mb.saturating_mul(BYTES_PER_MB),
            clock,
            lock: RwLock::new(()),
            total_bytes: AtomicU64::new(0),
        });

        let init = inner.clone();
        tokio::task::spawn_blocking(move || init.initialize()).await??;

        let sweeper = sweep::spawn_sweeper(inner.clone(), config.sweep_interval);

        tracing::info!(
            base_dir = %inner.base_dir.display(),
            expiration_hours,
            max_total_size_mb = config.max_total_size_mb,
            total_bytes = inner.total_bytes(),
            "gemini file store initialized"
        );

        Ok(Self {
            inner,
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    /// Bytes of committed content currently on disk.
    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes()
    }

    /// Streams `content` into the cache and commits it under a fresh id.
    ///
    /// Content is hashed while it is written to a temporary file, so the payload
    /// is never held in memory. The quota is checked before the content becomes
    /// visible under its final name; any failure after that point removes the
    /// content again and restores the byte counter.
    pub async fn save_file<R>(
        &self,
        content: R,
        name: &str,
        mime_type: &str,
        display_name: &str,
        owner_key: &str,
    ) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin + Send,
    {
        let file_id = FileId(generate_file_id());
        let temp_path = self
            .inner
            .files_dir
            .join(format!("{}{TEMP_FILE_EXTENSION}", file_id.as_str()));
        let temp = TempFileGuard::new(temp_path);

        let (written, content_hash) = self.write_temp(content, temp.path()).await?;

        let pending = PendingRecord {
            file_id,
            name: name.to_string(),
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: written,
            content_hash,
            owner_key_hash: hash_owner_key(owner_key),
        };
        let inner = self.inner.clone();
        let record = tokio::task::spawn_blocking(move || inner.commit(temp, pending)).await??;

        tracing::info!(
            file_id = %record.id,
            size_bytes = record.size_bytes,
            expires_at = %record.expires_at,
            "gemini file store: saved file"
        );
        Ok(record)
    }

    async fn write_temp<R>(&self, mut content: R, temp_path: &Path) -> Result<(u64, String)>
    where
        R: AsyncRead + Unpin + Send,
    {
        let budget = self.inner.remaining_quota();

        let mut file = open_private_temp(temp_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut written: u64 = 0;

        loop {
            let n = content.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written = written.saturating_add(n as u64);
            if budget.is_some_and(|budget| written > budget) {
                return Err(self.inner.quota_error());
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        Ok((written, id::hex_lower(&hasher.finalize())))
    }

    /// Metadata lookup; expired records are reported as missing.
    pub async fn get_file(&self, file_id: &str) -> Result<FileRecord> {
        let file_id = FileId::parse(file_id)?;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            inner.load_live_record(&file_id)
        })
        .await?
    }

    /// Like [`FileStore::get_file`], but a record owned by another key is
    /// indistinguishable from a missing one.
    pub async fn get_file_for_owner(&self, file_id: &str, owner_key: &str) -> Result<FileRecord> {
        let file_id = FileId::parse(file_id)?;
        let owner_hash = hash_owner_key(owner_key);
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            inner.load_owned_record(&file_id, &owner_hash)
        })
        .await?
    }

    /// Opens the content for streaming.
    pub async fn get_content(&self, file_id: &str) -> Result<(tokio::fs::File, FileRecord)> {
        let file_id = FileId::parse(file_id)?;
        let inner = self.inner.clone();
        let (file, record) = tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            let record = inner.load_live_record(&file_id)?;
            let file = inner.open_content(&file_id)?;
            Ok::<_, FilesError>((file, record))
        })
        .await??;
        Ok((tokio::fs::File::from_std(file), record))
    }

    pub async fn get_content_for_owner(
        &self,
        file_id: &str,
        owner_key: &str,
    ) -> Result<(tokio::fs::File, FileRecord)> {
        let file_id = FileId::parse(file_id)?;
        let owner_hash = hash_owner_key(owner_key);
        let inner = self.inner.clone();
        let (file, record) = tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            let record = inner.load_owned_record(&file_id, &owner_hash)?;
            let file = inner.open_content(&file_id)?;
            Ok::<_, FilesError>((file, record))
        })
        .await??;
        Ok((tokio::fs::File::from_std(file), record))
    }

    /// Reads the whole file into memory. Fails with `TooLarge` instead of
    /// truncating when either the recorded size or the bytes actually read
    /// exceed `max_bytes`; zero disables the ceiling.
    pub async fn read_bytes_for_owner(
        &self,
        file_id: &str,
        owner_key: &str,
        max_bytes: u64,
    ) -> Result<(Vec<u8>, FileRecord)> {
        let file_id = FileId::parse(file_id)?;
        let owner_hash = hash_owner_key(owner_key);
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            let record = inner.load_owned_record(&file_id, &owner_hash)?;
            ensure_size_allowed(&record, max_bytes)?;
            let file = inner.open_content(&file_id)?;
            let data = read_all_within_limit(file, max_bytes)?;
            Ok((data, record))
        })
        .await?
    }

    /// All non-expired records, oldest first.
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = inner.read_lock();
            inner.list_live_records()
        })
        .await?
    }

    pub async fn list_files_for_owner(&self, owner_key: &str) -> Result<Vec<FileRecord>> {
        let owner_hash = hash_owner_key(owner_key);
        let records = self.list_files().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.is_owned_by_hash(&owner_hash))
            .collect())
    }

    /// Removes content and metadata. Missing files on disk are not an error.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let file_id = FileId::parse(file_id)?;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner.write_lock();
            inner.delete_unlocked(&guard, &file_id)
        })
        .await?
    }

    /// Ownership and expiry are checked under the same exclusive lock as the delete.
    pub async fn delete_file_for_owner(&self, file_id: &str, owner_key: &str) -> Result<()> {
        let file_id = FileId::parse(file_id)?;
        let owner_hash = hash_owner_key(owner_key);
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner.write_lock();
            inner.load_owned_record(&file_id, &owner_hash)?;
            inner.delete_unlocked(&guard, &file_id)
        })
        .await?
    }

    /// Deletes every expired record now. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.sweep_expired()).await?
    }

    /// Stops the periodic sweep. Idempotent.
    pub fn close(&self) {
        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if sweeper.take().is_some() {
            tracing::debug!(base_dir = %self.inner.base_dir.display(), "gemini file store closed");
        }
    }
}

struct PendingRecord {
    file_id: FileId,
    name: String,
    display_name: String,
    mime_type: String,
    size_bytes: u64,
    content_hash: String,
    owner_key_hash: String,
}

impl StoreInner {
    fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    fn set_total_bytes(&self, _guard: &RwLockWriteGuard<'_, ()>, total: u64) {
        self.total_bytes.store(total, Ordering::Release);
    }

    fn initialize(&self) -> Result<()> {
        for dir in [&self.files_dir, &self.metadata_dir] {
            create_private_dir(dir).map_err(|err| {
                FilesError::internal(format!("failed to create directory {}", dir.display()), err)
            })?;
        }

        let guard = self.write_lock();
        match self.scan_content_bytes() {
            Ok(total) => self.set_total_bytes(&guard, total),
            Err(err) => {
                tracing::warn!(error = %err, "gemini file store: failed to calculate initial storage size");
            }
        }
        Ok(())
    }

    /// Sums committed content sizes; leftovers of interrupted saves are removed.
    fn scan_content_bytes(&self) -> std::io::Result<u64> {
        let mut total: u64 = 0;
        for entry in fs::read_dir(&self.files_dir)? {
            let entry = entry?;
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TEMP_FILE_EXTENSION) {
                if let Err(err) = fs::remove_file(entry.path()) {
                    tracing::warn!(path = %entry.path().display(), error = %err, "gemini file store: failed to remove stale temp file");
                }
                continue;
            }
            total = total.saturating_add(meta.len());
        }
        Ok(total)
    }

    fn remaining_quota(&self) -> Option<u64> {
        if self.max_total_bytes == 0 {
            return None;
        }
        Some(self.max_total_bytes.saturating_sub(self.total_bytes()))
    }

    fn quota_error(&self) -> FilesError {
        FilesError::QuotaExceeded {
            current_mb: self.total_bytes() / BYTES_PER_MB,
            limit_mb: self.max_total_bytes / BYTES_PER_MB,
        }
    }

    fn content_path(&self, file_id: &FileId) -> PathBuf {
        self.files_dir.join(file_id.as_str())
    }

    fn metadata_path(&self, file_id: &FileId) -> PathBuf {
        self.metadata_dir
            .join(format!("{}{METADATA_FILE_EXTENSION}", file_id.as_str()))
    }

    fn commit(&self, mut temp: TempFileGuard, pending: PendingRecord) -> Result<FileRecord> {
        let guard = self.write_lock();
        let total = self.total_bytes();

        if self.max_total_bytes > 0
            && total.saturating_add(pending.size_bytes) > self.max_total_bytes
        {
            return Err(self.quota_error());
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add(self.expiration)
            .ok_or_else(|| FilesError::Internal {
                message: "file expiry is out of range".to_string(),
                source: None,
            })?;

        let final_path = self.content_path(&pending.file_id);
        fs::rename(temp.path(), &final_path)
            .map_err(|err| FilesError::internal("failed to finalize file", err))?;
        temp.disarm();
        self.set_total_bytes(&guard, total.saturating_add(pending.size_bytes));

        let record = FileRecord {
            handle: handle_for(pending.file_id.as_str()),
            id: pending.file_id.as_str().to_string(),
            name: pending.name,
            display_name: pending.display_name,
            mime_type: pending.mime_type,
            size_bytes: pending.size_bytes,
            content_hash: pending.content_hash,
            state: FileState::Active,
            created_at: now,
            expires_at,
            upload_source: "local".to_string(),
            owner_key_hash: pending.owner_key_hash,
        };

        if let Err(err) = self.write_metadata(&pending.file_id, &record) {
            // An orphaned content file is never reclaimed by the sweep, which only
            // walks metadata sidecars.
            if let Err(cleanup_err) = fs::remove_file(&final_path) {
                tracing::warn!(
                    file_id = %record.id,
                    error = %cleanup_err,
                    "gemini file store: failed to remove content after metadata failure"
                );
            }
            self.set_total_bytes(&guard, total);
            return Err(FilesError::internal("failed to save metadata", err));
        }

        Ok(record)
    }

    fn write_metadata(&self, file_id: &FileId, record: &FileRecord) -> Result<()> {
        let payload = serde_json::to_vec_pretty(record)?;
        let path = self.metadata_path(file_id);
        let tmp_path = path.with_extension("json.tmp");
        write_private_file(&tmp_path, &payload)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }

    fn load_record(&self, file_id: &FileId) -> Result<FileRecord> {
        let raw = match fs::read(self.metadata_path(file_id)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Err(FilesError::NotFound),
            Err(err) => return Err(FilesError::internal("failed to read metadata", err)),
        };
        serde_json::from_slice(&raw)
            .map_err(|err| FilesError::internal("failed to unmarshal metadata", err))
    }

    fn load_live_record(&self, file_id: &FileId) -> Result<FileRecord> {
        let record = self.load_record(file_id)?;
        if record.is_expired(self.clock.now()) {
            return Err(FilesError::NotFound);
        }
        Ok(record)
    }

    fn load_owned_record(&self, file_id: &FileId, owner_hash: &str) -> Result<FileRecord> {
        let record = self.load_live_record(file_id)?;
        if !record.is_owned_by_hash(owner_hash) {
            return Err(FilesError::NotFound);
        }
        Ok(record)
    }

    fn open_content(&self, file_id: &FileId) -> Result<fs::File> {
        match fs::File::open(self.content_path(file_id)) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == IoErrorKind::NotFound => Err(FilesError::NotFound),
            Err(err) => Err(FilesError::internal("failed to open file", err)),
        }
    }

    /// Ids of every metadata sidecar currently on disk.
    fn metadata_ids(&self) -> Result<Vec<FileId>> {
        let entries = fs::read_dir(&self.metadata_dir)
            .map_err(|err| FilesError::internal("failed to read metadata directory", err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type().map(|ty| ty.is_dir()).unwrap_or(true) {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(raw_id) = name.strip_suffix(METADATA_FILE_EXTENSION) else {
                continue;
            };
            match FileId::parse(raw_id) {
                Ok(file_id) => ids.push(file_id),
                Err(_) => {
                    tracing::debug!(entry = %name, "gemini file store: ignoring foreign metadata entry");
                }
            }
        }
        Ok(ids)
    }

    fn list_live_records(&self) -> Result<Vec<FileRecord>> {
        let now = self.clock.now();
        let mut records = Vec::new();
        for file_id in self.metadata_ids()? {
            match self.load_record(&file_id) {
                Ok(record) if !record.is_expired(now) => records.push(record),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(file_id = file_id.as_str(), error = %err, "gemini file store: failed to load metadata");
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    fn delete_unlocked(&self, guard: &RwLockWriteGuard<'_, ()>, file_id: &FileId) -> Result<()> {
        let content_path = self.content_path(file_id);
        let metadata_path = self.metadata_path(file_id);

        let size = fs::metadata(&content_path).map(|meta| meta.len()).ok();

        match fs::remove_file(&content_path) {
            Ok(()) => {
                if let Some(size) = size {
                    self.set_total_bytes(guard, self.total_bytes().saturating_sub(size));
                }
            }
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => return Err(FilesError::internal("failed to remove file", err)),
        }

        match fs::remove_file(&metadata_path) {
            Ok(()) => {}
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => return Err(FilesError::internal("failed to remove metadata", err)),
        }

        tracing::debug!(file_id = file_id.as_str(), "gemini file store: deleted file");
        Ok(())
    }
}

fn resolve_base_dir(base_dir: &Path) -> Result<PathBuf> {
    let base_dir = if base_dir.as_os_str().is_empty() {
        std::env::current_dir()?.join("gemini-files")
    } else {
        base_dir.to_path_buf()
    };
    if base_dir.is_absolute() {
        return Ok(base_dir);
    }
    Ok(std::env::current_dir()?.join(base_dir))
}

fn ensure_size_allowed(record: &FileRecord, max_bytes: u64) -> Result<()> {
    if max_bytes == 0 || record.size_bytes <= max_bytes {
        return Ok(());
    }
    Err(FilesError::TooLarge {
        size: record.size_bytes,
        limit: max_bytes,
    })
}

fn read_all_within_limit(reader: impl Read, max_bytes: u64) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    if max_bytes == 0 {
        let mut reader = reader;
        reader.read_to_end(&mut data)?;
        return Ok(data);
    }
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut data)?;
    if data.len() as u64 > max_bytes {
        return Err(FilesError::TooLarge {
            size: data.len() as u64,
            limit: max_bytes,
        });
    }
    Ok(data)
}

/// Removes a temporary file on drop unless it has been published.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != IoErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "gemini file store: failed to remove temp file");
            }
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_private_file(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

async fn open_private_temp(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}
