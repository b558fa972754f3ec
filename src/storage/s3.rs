use super::{converted_key, Storage};
use crate::config::StorageConfig;
use crate::error::{Result, WorkerError};
use crate::scratch::{ScratchDirs, ScratchFile};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Object storage backed by an S3 bucket with static credentials.
pub struct S3Storage {
    client: Client,
    bucket: String,
    scratch: ScratchDirs,
}

impl S3Storage {
    pub async fn new(config: &StorageConfig, scratch: ScratchDirs) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "recast-static",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        Self {
            client: Client::new(&sdk_config),
            bucket: config.bucket.clone(),
            scratch,
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn download(&self, id: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        // Guard the partial file so a failed transfer leaves no residue.
        let target = ScratchFile::new(self.scratch.original_path(id));
        debug!(bucket = %self.bucket, key = id, "Downloading original");

        let object = tokio::select! {
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            result = self.client.get_object().bucket(&self.bucket).key(id).send() => {
                result.map_err(|e| {
                    WorkerError::Download(format!("{}", DisplayErrorContext(e)))
                })?
            }
        };

        let mut file = File::create(target.path()).await?;
        let mut body = object.body;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
                chunk = body.try_next() => chunk.map_err(|e| {
                    WorkerError::Download(format!("{}", DisplayErrorContext(e)))
                })?,
            };
            match chunk {
                Some(bytes) => file.write_all(&bytes).await?,
                None => break,
            }
        }
        file.flush().await?;

        Ok(target.into_path())
    }

    async fn upload(
        &self,
        original_id: &str,
        file: File,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let key = converted_key(original_id);
        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .map_err(|e| WorkerError::Upload(format!("{}", DisplayErrorContext(e))))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            result = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send() =>
            {
                result.map_err(|e| {
                    WorkerError::Upload(format!("{}", DisplayErrorContext(e)))
                })?;
                info!(bucket = %self.bucket, key = %key, "Uploaded converted video");
                Ok(key)
            }
        }
    }
}
