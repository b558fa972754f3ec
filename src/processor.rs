//! Pipeline orchestrator: download, probe, transcode, upload, probe again,
//! assemble. Every file created here is guard-owned and gone by the time a
//! response leaves, whatever path the job took.

use crate::analyzer;
use crate::converge::Converger;
use crate::error::{Result, WorkerError};
use crate::ffmpeg::{Encoder, TranscodeOptions};
use crate::model::{ConvertedVideo, OriginalVideo, Request, Response};
use crate::scratch::{ScratchDirs, ScratchFile};
use crate::storage::Storage;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// User-visible error strings; the closed set a response may carry.
pub const DOWNLOAD_ERROR: &str = "Can't download original video from cloud";
pub const CONVERT_ERROR: &str = "Error occurred when converting video";
pub const OPEN_CONVERTED_ERROR: &str = "error occurred when reading converted video";
pub const UPLOAD_ERROR: &str = "error occurred when uploading converted video";
pub const CONVERTED_STATS_ERROR: &str = "error occurred when getting stats converted video";

pub struct Processor {
    storage: Arc<dyn Storage>,
    encoder: Arc<dyn Encoder>,
    scratch: ScratchDirs,
}

impl Processor {
    pub fn new(storage: Arc<dyn Storage>, encoder: Arc<dyn Encoder>, scratch: ScratchDirs) -> Self {
        Self {
            storage,
            encoder,
            scratch,
        }
    }

    /// Run one job to completion. Failures become a response carrying one of
    /// the literal error strings; only cancellation surfaces as `Err`.
    pub async fn process(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        info!(
            request_id = request.request_id,
            video = %request.video_service_id,
            bitrate = request.bitrate,
            "Processing job"
        );

        let original = match self
            .storage
            .download(&request.video_service_id, cancel)
            .await
        {
            Ok(path) => ScratchFile::new(path),
            Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
            Err(e) => {
                error!(request_id = request.request_id, "Download failed: {}", e);
                return Ok(Response::failure(request.request_id, DOWNLOAD_ERROR));
            }
        };

        let mut response = Response::new(request.request_id);
        // Original metadata is best-effort; the job carries on without it.
        match analyzer::video_meta(self.encoder.as_ref(), original.path()).await {
            Ok(meta) => {
                response.original_video = Some(OriginalVideo {
                    id: request.video_id,
                    meta,
                });
            }
            Err(e) => {
                warn!(
                    request_id = request.request_id,
                    "Could not read original video stats: {}", e
                );
            }
        }

        let converted = match self.transcode(request, original.path(), cancel).await {
            Ok(file) => file,
            Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
            Err(e) => {
                error!(request_id = request.request_id, "Conversion failed: {}", e);
                return Ok(Response::failure(request.request_id, CONVERT_ERROR));
            }
        };

        let file = match tokio::fs::File::open(converted.path()).await {
            Ok(file) => file,
            Err(e) => {
                error!(
                    request_id = request.request_id,
                    "Cannot open converted video: {}", e
                );
                return Ok(Response::failure(request.request_id, OPEN_CONVERTED_ERROR));
            }
        };

        let stored_id = match self
            .storage
            .upload(&request.video_service_id, file, cancel)
            .await
        {
            Ok(id) => id,
            Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
            Err(e) => {
                error!(request_id = request.request_id, "Upload failed: {}", e);
                return Ok(Response::failure(request.request_id, UPLOAD_ERROR));
            }
        };

        let meta = match analyzer::video_meta(self.encoder.as_ref(), converted.path()).await {
            Ok(meta) => meta,
            Err(e) => {
                error!(
                    request_id = request.request_id,
                    "Cannot read converted video stats: {}", e
                );
                return Ok(Response::failure(request.request_id, CONVERTED_STATS_ERROR));
            }
        };

        let size = match tokio::fs::metadata(converted.path()).await {
            Ok(stat) => stat.len() as i64,
            Err(e) => {
                warn!(
                    request_id = request.request_id,
                    "Cannot stat converted video: {}", e
                );
                0
            }
        };

        response.converted_video = Some(ConvertedVideo {
            service_id: stored_id.clone(),
            size,
            name: stored_id,
            user_id: request.user_id,
            meta,
        });
        info!(request_id = request.request_id, "Job finished");
        Ok(response)
    }

    /// Single-shot transcode when no bitrate is requested; convergence run
    /// otherwise. Returns the owning handle of the produced file.
    async fn transcode(
        &self,
        request: &Request,
        original: &Path,
        cancel: &CancellationToken,
    ) -> Result<ScratchFile> {
        let options = TranscodeOptions::from_request(request);
        if request.bitrate == 0 {
            let basename = original
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    WorkerError::Encoder(format!(
                        "input path has no usable file name: {}",
                        original.display()
                    ))
                })?;
            let output = ScratchFile::new(self.scratch.converted_path(basename));
            self.encoder
                .transcode(original, output.path(), &options, cancel)
                .await?;
            return Ok(output);
        }

        let converger = Converger::new(self.encoder.as_ref(), &self.scratch);
        let path = converger
            .converge(original, &options, request.bitrate, cancel)
            .await?;
        Ok(ScratchFile::new(path))
    }
}
