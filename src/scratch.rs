use crate::error::Result;
use std::path::{Path, PathBuf};

/// Layout of the transient file tree under the scratch root. Downloads land
/// in the originals directory, engine candidates and single-shot outputs in
/// the converted directory.
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    originals: PathBuf,
    converted: PathBuf,
}

impl ScratchDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            originals: root.join("tmp").join("original_video"),
            converted: root.join("tmp").join("converted_video"),
        }
    }

    /// Create both directories. Called once at startup.
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.originals).await?;
        tokio::fs::create_dir_all(&self.converted).await?;
        Ok(())
    }

    pub fn original_dir(&self) -> &Path {
        &self.originals
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted
    }

    pub fn original_path(&self, id: &str) -> PathBuf {
        self.originals.join(id)
    }

    pub fn converted_path(&self, name: &str) -> PathBuf {
        self.converted.join(name)
    }

    /// Candidate path for one convergence step: `v{step}_{basename}`.
    pub fn candidate_path(&self, step: u32, basename: &str) -> PathBuf {
        self.converted.join(format!("v{}_{}", step, basename))
    }
}

/// Owning handle to a transient file. Dropping the handle deletes the file
/// unless ownership was transferred out with [`into_path`](Self::into_path),
/// so cleanup holds on every exit path, early returns and panics included.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    owned: bool,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, owned: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transfer ownership of the file to the caller; it will no longer be
    /// deleted on drop.
    pub fn into_path(mut self) -> PathBuf {
        self.owned = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.owned {
            // The file may never have been created (e.g. the encoder failed
            // before producing output); a missing file is not an error.
            std::fs::remove_file(&self.path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn scratch_layout_under_root() {
        let dirs = ScratchDirs::new(Path::new("/srv/recast"));
        assert_eq!(
            dirs.original_path("clip.mp4"),
            Path::new("/srv/recast/tmp/original_video/clip.mp4")
        );
        assert_eq!(
            dirs.converted_path("clip.mp4"),
            Path::new("/srv/recast/tmp/converted_video/clip.mp4")
        );
        assert_eq!(
            dirs.candidate_path(3, "clip.mp4"),
            Path::new("/srv/recast/tmp/converted_video/v3_clip.mp4")
        );
    }

    #[test]
    fn dropping_handle_deletes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v1_clip.mp4");
        std::fs::write(&path, b"data").expect("write");

        drop(ScratchFile::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn into_path_keeps_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("v1_clip.mp4");
        std::fs::write(&path, b"data").expect("write");

        let kept = ScratchFile::new(path.clone()).into_path();
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[test]
    fn dropping_handle_for_missing_file_is_harmless() {
        let dir = tempfile::tempdir().expect("tempdir");
        drop(ScratchFile::new(dir.path().join("never_created.mp4")));
    }
}
