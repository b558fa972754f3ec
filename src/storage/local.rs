use super::{converted_key, Storage};
use crate::error::{Result, WorkerError};
use crate::scratch::{ScratchDirs, ScratchFile};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Directory-backed storage variant with the same contract as the object
/// store: useful on single-host deployments and as the integration seam in
/// tests.
pub struct LocalStorage {
    dir: PathBuf,
    scratch: ScratchDirs,
}

impl LocalStorage {
    pub fn new(dir: PathBuf, scratch: ScratchDirs) -> Self {
        Self { dir, scratch }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn download(&self, id: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        let source = self.dir.join(id);
        let target = ScratchFile::new(self.scratch.original_path(id));
        debug!(source = %source.display(), "Copying original from local storage");

        tokio::fs::copy(&source, target.path())
            .await
            .map_err(|e| WorkerError::Download(format!("{}: {}", source.display(), e)))?;
        Ok(target.into_path())
    }

    async fn upload(
        &self,
        original_id: &str,
        mut file: File,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        let key = converted_key(original_id);
        let destination = self.dir.join(&key);

        let mut target = File::create(&destination)
            .await
            .map_err(|e| WorkerError::Upload(format!("{}: {}", destination.display(), e)))?;
        tokio::io::copy(&mut file, &mut target)
            .await
            .map_err(|e| WorkerError::Upload(format!("{}: {}", destination.display(), e)))?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _root: tempfile::TempDir,
        storage: LocalStorage,
        scratch: ScratchDirs,
        bucket: PathBuf,
    }

    async fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let bucket = root.path().join("bucket");
        std::fs::create_dir(&bucket).expect("bucket dir");
        let scratch = ScratchDirs::new(root.path());
        scratch.ensure().await.expect("scratch dirs");
        Fixture {
            storage: LocalStorage::new(bucket.clone(), scratch.clone()),
            scratch,
            bucket,
            _root: root,
        }
    }

    #[tokio::test]
    async fn download_copies_into_originals_dir() {
        let fixture = fixture().await;
        std::fs::write(fixture.bucket.join("clip.mp4"), b"video").expect("seed");

        let path = fixture
            .storage
            .download("clip.mp4", &CancellationToken::new())
            .await
            .expect("download");
        assert_eq!(path, fixture.scratch.original_path("clip.mp4"));
        assert_eq!(std::fs::read(&path).expect("read"), b"video");
    }

    #[tokio::test]
    async fn download_overwrites_previous_copy() {
        let fixture = fixture().await;
        std::fs::write(fixture.bucket.join("clip.mp4"), b"new").expect("seed");
        std::fs::write(fixture.scratch.original_path("clip.mp4"), b"stale").expect("stale");

        let path = fixture
            .storage
            .download("clip.mp4", &CancellationToken::new())
            .await
            .expect("download");
        assert_eq!(std::fs::read(&path).expect("read"), b"new");
    }

    #[tokio::test]
    async fn download_of_unknown_id_fails() {
        let fixture = fixture().await;
        let result = fixture
            .storage
            .download("missing.mp4", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WorkerError::Download(_))));
        assert!(!fixture.scratch.original_path("missing.mp4").exists());
    }

    #[tokio::test]
    async fn upload_mints_converted_key_and_stores_bytes() {
        let fixture = fixture().await;
        let converted = fixture.scratch.converted_path("clip.mp4");
        std::fs::write(&converted, b"converted bytes").expect("seed");

        let file = File::open(&converted).await.expect("open");
        let key = fixture
            .storage
            .upload("clip.mp4", file, &CancellationToken::new())
            .await
            .expect("upload");
        assert!(key.starts_with("converted_"));
        assert!(key.ends_with("_clip.mp4"));
        assert_eq!(
            std::fs::read(fixture.bucket.join(&key)).expect("read"),
            b"converted bytes"
        );
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let fixture = fixture().await;
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            fixture.storage.download("clip.mp4", &token).await,
            Err(WorkerError::Cancelled)
        ));
    }
}
