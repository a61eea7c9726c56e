use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::ReadBuf;

use super::*;
use crate::clock::ManualClock;

fn config(dir: &Path) -> FileStoreConfig {
    FileStoreConfig::new(dir.join("store"))
}

fn content_entries(store: &FileStore) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(&store.inner.files_dir)
        .expect("read files dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Yields one chunk, then never completes.
struct StallingReader {
    sent: bool,
}

impl AsyncRead for StallingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.sent {
            return Poll::Pending;
        }
        self.sent = true;
        buf.put_slice(b"partial upload");
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn open_discards_stale_temp_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files_dir = dir.path().join("store").join("files");
    fs::create_dir_all(&files_dir).expect("mkdir");
    fs::write(files_dir.join("0123456789abcdef0123456789abcdef.tmp"), b"half").expect("write tmp");
    fs::write(files_dir.join("0123456789abcdef0123456789abcdee"), b"kept").expect("write content");

    let store = FileStore::open(config(dir.path())).await.expect("open");

    assert_eq!(store.total_bytes(), 4);
    assert_eq!(content_entries(&store), vec!["0123456789abcdef0123456789abcdee"]);
    store.close();
}

#[tokio::test]
async fn metadata_failure_rolls_back_content_and_counter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(config(dir.path())).await.expect("open");

    fs::remove_dir_all(&store.inner.metadata_dir).expect("remove metadata dir");
    fs::write(&store.inner.metadata_dir, b"not a directory").expect("block metadata dir");

    let err = store
        .save_file(&b"hello"[..], "a.txt", "text/plain", "a", "key-a")
        .await
        .expect_err("metadata write must fail");

    assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    assert_eq!(store.total_bytes(), 0);
    assert!(content_entries(&store).is_empty());
    store.close();
}

#[tokio::test]
async fn cancelled_save_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(config(dir.path())).await.expect("open");

    let save = store.save_file(StallingReader { sent: false }, "a.bin", "", "a", "key-a");
    let outcome = tokio::time::timeout(Duration::from_millis(50), save).await;
    assert!(outcome.is_err(), "save should still be waiting for input");

    assert!(content_entries(&store).is_empty());
    assert_eq!(store.total_bytes(), 0);
    assert!(store.list_files().await.expect("list").is_empty());
    store.close();
}

#[tokio::test]
async fn streaming_stops_once_quota_is_exhausted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(config(dir.path()).with_max_total_size_mb(1))
        .await
        .expect("open");

    let oversized = vec![7u8; (BYTES_PER_MB + 1) as usize];
    let err = store
        .save_file(&oversized[..], "big.bin", "", "big", "key-a")
        .await
        .expect_err("quota");

    assert!(matches!(err, FilesError::QuotaExceeded { limit_mb: 1, .. }), "{err:?}");
    assert!(content_entries(&store).is_empty());
    store.close();
}

#[tokio::test]
async fn sweep_skips_unreadable_sidecars() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::default());
    let store = FileStore::open_with_clock(config(dir.path()).with_expiration_hours(1), clock.clone())
        .await
        .expect("open");

    let record = store
        .save_file(&b"bytes"[..], "a.txt", "text/plain", "a", "")
        .await
        .expect("save");
    let corrupt_id = "ffffffffffffffffffffffffffffffff";
    fs::write(
        store.inner.metadata_dir.join(format!("{corrupt_id}{METADATA_FILE_EXTENSION}")),
        b"{not json",
    )
    .expect("write corrupt sidecar");

    clock.advance(time::Duration::hours(2));
    let removed = store.sweep_expired().await.expect("sweep");

    assert_eq!(removed, 1);
    assert!(store.get_file(&record.id).await.expect_err("gone").is_not_found());
    assert!(
        store
            .inner
            .metadata_dir
            .join(format!("{corrupt_id}{METADATA_FILE_EXTENSION}"))
            .exists()
    );
    assert_eq!(store.total_bytes(), 0);
    store.close();
}

#[tokio::test]
async fn close_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(config(dir.path())).await.expect("open");
    let clone = store.clone();
    store.close();
    clone.close();
    assert!(store.sweeper.lock().expect("lock").is_none());
}

#[tokio::test]
async fn retention_beyond_the_supported_range_is_rejected_at_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = FileStore::open(config(dir.path()).with_expiration_hours(100_000_000))
        .await
        .expect_err("oversized retention");
    assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn expiry_overflow_fails_before_content_is_published() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(time::Date::MAX.midnight().assume_utc()));
    let store = FileStore::open_with_clock(config(dir.path()), clock)
        .await
        .expect("open");

    let err = store
        .save_file(&b"hello"[..], "a.txt", "text/plain", "a", "key-a")
        .await
        .expect_err("expiry out of range");

    assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    assert_eq!(store.total_bytes(), 0);
    assert!(content_entries(&store).is_empty());
    store.close();
}

#[tokio::test]
async fn concurrent_saves_keep_the_counter_within_quota() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(config(dir.path()).with_max_total_size_mb(1))
        .await
        .expect("open");

    let payload = vec![3u8; 100_000];
    let saves = (0..40).map(|i| {
        let store = store.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            store
                .save_file(&payload[..], &format!("part-{i}.bin"), "", "part", "key-a")
                .await
        })
    });
    let outcomes = futures_util::future::join_all(saves).await;

    let mut saved = 0u64;
    for outcome in outcomes {
        match outcome.expect("task") {
            Ok(_) => saved += 1,
            Err(err) => assert_eq!(err.kind(), crate::error::ErrorKind::TooLarge, "{err:?}"),
        }
    }

    let on_disk: u64 = content_entries(&store)
        .iter()
        .map(|name| {
            fs::metadata(store.inner.files_dir.join(name))
                .expect("content metadata")
                .len()
        })
        .sum();
    assert_eq!(saved, 10);
    assert_eq!(store.total_bytes(), saved * 100_000);
    assert_eq!(on_disk, store.total_bytes());
    assert!(store.total_bytes() <= BYTES_PER_MB);
    assert_eq!(store.list_files().await.expect("list").len(), 10);
    store.close();
}
