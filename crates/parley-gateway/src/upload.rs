use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::error::ChatError;
use parley_types::models::MediaKind;

/// Hard ceiling on a single declared upload.
pub const MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// On-disk content store for binary media. Only the stored name ends up on
/// the message row; the blob itself never enters the database.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating media dir {}", dir.display()))?;
        info!("Media store directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path_for(&self, stored_name: &str) -> PathBuf {
        self.dir.join(stored_name)
    }
}

/// Result of a completed transfer: what gets persisted on the message row.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    /// Name inside the media store; this is the message payload.
    pub stored_name: String,
    pub size: i64,
    pub sha256: String,
}

/// One in-flight chunked transfer. Owned by a single connection task; a
/// partial transfer never produces a message row.
pub struct ActiveUpload {
    transfer_id: Uuid,
    media: MediaKind,
    receiver_id: i64,
    declared: u64,
    received: u64,
    file: fs::File,
    path: PathBuf,
    stored_name: String,
    hasher: Sha256,
}

impl ActiveUpload {
    pub async fn begin(
        store: &MediaStore,
        filename: &str,
        media: MediaKind,
        declared: u64,
        receiver_id: i64,
    ) -> Result<Self, ChatError> {
        if !media.is_binary() {
            return Err(ChatError::Validation(format!(
                "media kind '{}' does not take an upload",
                media.as_str()
            )));
        }
        if declared == 0 || declared > MAX_UPLOAD_BYTES {
            return Err(ChatError::Validation(format!(
                "declared size {declared} out of range"
            )));
        }

        let transfer_id = Uuid::new_v4();
        let stored_name = match sanitized_extension(filename) {
            Some(ext) => format!("{transfer_id}.{ext}"),
            None => transfer_id.to_string(),
        };
        let path = store.path_for(&stored_name);
        let file = fs::File::create(&path)
            .await
            .map_err(|e| ChatError::Store(anyhow::anyhow!("creating {}: {e}", path.display())))?;

        Ok(Self {
            transfer_id,
            media,
            receiver_id,
            declared,
            received: 0,
            file,
            path,
            stored_name,
            hasher: Sha256::new(),
        })
    }

    /// Append one chunk. Returns true once the declared byte count has
    /// fully arrived (the implicit completion of the sub-protocol).
    pub async fn push(&mut self, data: &[u8]) -> Result<bool, ChatError> {
        let new_total = self.received + data.len() as u64;
        if new_total > self.declared {
            return Err(ChatError::Validation(format!(
                "transfer {} exceeded declared size ({} > {})",
                self.transfer_id, new_total, self.declared
            )));
        }
        self.file
            .write_all(data)
            .await
            .map_err(|e| ChatError::Store(anyhow::anyhow!("writing chunk: {e}")))?;
        self.hasher.update(data);
        self.received = new_total;
        Ok(self.received == self.declared)
    }

    pub async fn finalize(mut self) -> Result<StoredMedia, ChatError> {
        self.file
            .flush()
            .await
            .map_err(|e| ChatError::Store(anyhow::anyhow!("flushing transfer: {e}")))?;
        let sha256 = hex::encode(self.hasher.finalize());
        info!(
            "Transfer {} complete: {} ({} bytes, sha256 {})",
            self.transfer_id, self.stored_name, self.received, sha256
        );
        Ok(StoredMedia {
            stored_name: self.stored_name,
            size: self.received as i64,
            sha256,
        })
    }

    /// Drop a partial transfer and its on-disk remains.
    pub async fn abort(self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => info!("Aborted transfer {}, removed partial file", self.transfer_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Aborted transfer {} but could not remove file: {e}", self.transfer_id),
        }
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn receiver_id(&self) -> i64 {
        self.receiver_id
    }
}

fn sanitized_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    if ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempdir::TempDirGuard, MediaStore) {
        let dir = std::env::temp_dir().join(format!("parley-media-test-{}", Uuid::new_v4()));
        let store = MediaStore::new(dir.clone()).await.unwrap();
        (tempdir::TempDirGuard(dir), store)
    }

    /// Minimal scope guard so test directories do not pile up.
    mod tempdir {
        pub struct TempDirGuard(pub std::path::PathBuf);
        impl Drop for TempDirGuard {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[tokio::test]
    async fn completes_exactly_at_declared_size() {
        let (_guard, store) = store().await;
        let mut upload = ActiveUpload::begin(&store, "photo.PNG", MediaKind::Image, 6, 2)
            .await
            .unwrap();

        assert!(!upload.push(b"abc").await.unwrap());
        assert!(upload.push(b"def").await.unwrap());

        let stored = upload.finalize().await.unwrap();
        assert!(stored.stored_name.ends_with(".png"));
        assert_eq!(stored.size, 6);
        let on_disk = tokio::fs::read(store.path_for(&stored.stored_name)).await.unwrap();
        assert_eq!(on_disk, b"abcdef");
    }

    #[tokio::test]
    async fn overflow_and_bad_media_are_validation_errors() {
        let (_guard, store) = store().await;
        assert!(matches!(
            ActiveUpload::begin(&store, "x.txt", MediaKind::Text, 4, 2).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            ActiveUpload::begin(&store, "x.bin", MediaKind::File, 0, 2).await,
            Err(ChatError::Validation(_))
        ));

        let mut upload = ActiveUpload::begin(&store, "x.bin", MediaKind::File, 4, 2)
            .await
            .unwrap();
        assert!(matches!(
            upload.push(b"too many bytes").await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn abort_removes_partial_file() {
        let (_guard, store) = store().await;
        let mut upload = ActiveUpload::begin(&store, "clip.mp4", MediaKind::Video, 10, 2)
            .await
            .unwrap();
        upload.push(b"12345").await.unwrap();
        let path = store.path_for(&upload.stored_name.clone());
        assert!(tokio::fs::metadata(&path).await.is_ok());

        upload.abort().await;
        assert!(tokio::fs::metadata(&path).await.is_err());
    }
}
