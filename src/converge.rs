//! Bitrate-convergence engine. The encoder's achieved bitrate is a noisy,
//! non-linear function of its buffer-size parameter, so the engine treats it
//! as a black box: transcode, measure, adjust, repeat. Multiplicative steps
//! (×2 up, ×0.6 down) bias toward overshoot-and-correct; the ±accuracy band
//! stops the oscillation.

use crate::error::{Result, WorkerError};
use crate::ffmpeg::{Encoder, TranscodeOptions};
use crate::scratch::{ScratchDirs, ScratchFile};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Acceptance band around the target, bits/sec.
pub const BITRATE_ACCURACY: i64 = 1000;

const INCREASE_FACTOR: i64 = 2;
const DECREASE_FACTOR: f64 = 0.6;

/// Bound on convergence steps. On exhaustion the parameters of the closest
/// probed step are re-encoded once; without the cap a pathological encoder
/// would wedge the worker.
const MAX_STEPS: u32 = 30;

struct Candidate {
    file: ScratchFile,
    bitrate: i64,
}

/// Parameters of the closest probed step, kept so the cap fallback can
/// reproduce it. Only numbers are retained; the file itself is deleted as
/// soon as the next step supersedes it.
struct BestStep {
    step: u32,
    buffer_size: i64,
    bitrate: i64,
}

/// Drives the encoder toward a target bitrate over a series of candidate
/// files. Each candidate is deleted as soon as its successor probes, so no
/// more than one survivor accumulates; all of them are gone on any exit
/// path, cancellation included, except the one returned.
pub struct Converger<'a> {
    encoder: &'a dyn Encoder,
    scratch: &'a ScratchDirs,
}

impl<'a> Converger<'a> {
    pub fn new(encoder: &'a dyn Encoder, scratch: &'a ScratchDirs) -> Self {
        Self { encoder, scratch }
    }

    /// Produce a file whose measured bitrate lies within
    /// `target ± BITRATE_ACCURACY`, or the closest achievable one if the
    /// step cap runs out. Returns the path of the surviving candidate;
    /// ownership of that file passes to the caller.
    pub async fn converge(
        &self,
        original: &Path,
        options: &TranscodeOptions,
        target: i64,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let basename = original
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                WorkerError::Encoder(format!(
                    "input path has no usable file name: {}",
                    original.display()
                ))
            })?;

        let mut options = options.clone();
        let mut buffer_size = target;
        // candidate of the previous step, still on disk
        let mut prev: Option<Candidate> = None;
        // closest probed step so far, parameters only
        let mut best: Option<BestStep> = None;

        for step in 1..=MAX_STEPS {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }

            let candidate = ScratchFile::new(self.scratch.candidate_path(step, basename));
            options.buffer_size = Some(buffer_size);
            self.encoder
                .transcode(original, candidate.path(), &options, cancel)
                .await?;

            let measured = match self.measure(candidate.path()).await {
                Ok(bitrate) => bitrate,
                Err(probe_err) => {
                    // The candidate is unreadable; fall back to the previous
                    // step's file if that one still probes.
                    drop(candidate);
                    if let Some(previous) = prev.take() {
                        if self.measure(previous.file.path()).await.is_ok() {
                            debug!(step, "Returning previous candidate after probe failure");
                            return Ok(previous.file.into_path());
                        }
                    }
                    return Err(probe_err);
                }
            };

            debug!(step, buffer_size, measured, target, "Convergence step");

            // The new candidate probed; its predecessor is superseded and
            // leaves the disk now.
            prev = None;

            if best
                .as_ref()
                .map_or(true, |b| distance(measured, target) < distance(b.bitrate, target))
            {
                best = Some(BestStep {
                    step,
                    buffer_size,
                    bitrate: measured,
                });
            }

            if measured <= target {
                if target - BITRATE_ACCURACY <= measured {
                    return Ok(candidate.into_path());
                }
                buffer_size = buffer_size.saturating_mul(INCREASE_FACTOR);
            } else {
                if target + BITRATE_ACCURACY >= measured {
                    return Ok(candidate.into_path());
                }
                buffer_size = (buffer_size as f64 * DECREASE_FACTOR) as i64;
            }

            prev = Some(Candidate {
                file: candidate,
                bitrate: measured,
            });
        }

        warn!(
            target,
            "No convergence within {} steps, settling for the closest probed step", MAX_STEPS
        );
        match (prev, best) {
            (Some(last), Some(best))
                if distance(best.bitrate, target) < distance(last.bitrate, target) =>
            {
                // The closest step was already superseded; re-encode once
                // with its recorded parameters so exactly one file survives.
                drop(last);
                debug!(
                    step = best.step,
                    buffer_size = best.buffer_size,
                    "Re-encoding closest step"
                );
                let revived = ScratchFile::new(self.scratch.candidate_path(best.step, basename));
                options.buffer_size = Some(best.buffer_size);
                self.encoder
                    .transcode(original, revived.path(), &options, cancel)
                    .await?;
                Ok(revived.into_path())
            }
            (Some(last), _) => Ok(last.file.into_path()),
            (None, _) => Err(WorkerError::Encoder(
                "convergence ended with no probed candidate".into(),
            )),
        }
    }

    async fn measure(&self, path: &Path) -> Result<i64> {
        let report = self.encoder.probe(path).await?;
        report.format_bitrate()
    }
}

fn distance(bitrate: i64, target: i64) -> i64 {
    (bitrate - target).abs()
}
