//! Blob storage adapters. The object key of the original doubles as the
//! downloaded file name, so downstream scratch names derive from it.

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch object `id` into the scratch originals directory, overwriting
    /// any previous download of the same object. Returns the local path;
    /// ownership of the file passes to the caller.
    async fn download(&self, id: &str, cancel: &CancellationToken) -> Result<PathBuf>;

    /// Store the handle's bytes under a newly minted key derived from the
    /// original object id; returns that key.
    async fn upload(
        &self,
        original_id: &str,
        file: File,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Every upload mints a fresh key, so re-processing a job never clobbers an
/// earlier outcome.
fn converted_key(original_id: &str) -> String {
    format!("converted_{}_{}", Uuid::new_v4(), original_id)
}
