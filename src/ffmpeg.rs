//! Driver for the external encoder binary and its probe companion.
//! Runs one transcode with a requested parameter set and extracts
//! format-level metadata from produced files. Neither operation deletes
//! any file; side effects are bounded to the named paths.

use crate::config::EncoderConfig;
use crate::error::{Result, WorkerError};
use crate::model::Request;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Closed set of encoder parameters; any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// `W:H`
    pub resolution: Option<String>,
    /// `X:Y`
    pub aspect: Option<String>,
    /// Rate-control buffer size, bits/sec. The convergence engine varies
    /// this between steps.
    pub buffer_size: Option<i64>,
    /// Requested video bitrate, bits/sec.
    pub video_bitrate: Option<i64>,
}

impl TranscodeOptions {
    /// Map job fields onto encoder parameters. Empty strings and a zero
    /// bitrate mean "not requested".
    pub fn from_request(request: &Request) -> Self {
        let mut options = Self::default();
        if !request.resolution.is_empty() {
            options.resolution = Some(request.resolution.clone());
        }
        if !request.ratio.is_empty() {
            options.aspect = Some(request.ratio.clone());
        }
        if request.bitrate != 0 {
            options.buffer_size = Some(request.bitrate);
            options.video_bitrate = Some(request.bitrate);
        }
        options
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref resolution) = self.resolution {
            args.push("-s".into());
            args.push(resolution.clone());
        }
        if let Some(ref aspect) = self.aspect {
            args.push("-aspect".into());
            args.push(aspect.clone());
        }
        if let Some(bitrate) = self.video_bitrate {
            args.push("-b:v".into());
            args.push(bitrate.to_string());
        }
        if let Some(buffer_size) = self.buffer_size {
            args.push("-bufsize".into());
            args.push(buffer_size.to_string());
        }
        args
    }
}

/// Raw probe output: format-level bitrate plus per-stream geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: ProbeFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub codec_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub display_aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub bit_rate: Option<String>,
}

impl ProbeReport {
    /// Format-level bitrate as a signed 64-bit integer. A missing or
    /// non-numeric value is a probe failure.
    pub fn format_bitrate(&self) -> Result<i64> {
        let raw = self
            .format
            .bit_rate
            .as_deref()
            .ok_or_else(|| WorkerError::Probe("format reports no bit_rate".into()))?;
        raw.parse::<i64>()
            .map_err(|e| WorkerError::Probe(format!("unparseable bit_rate {:?}: {}", raw, e)))
    }

    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run one transcode of `input` into `output` with the given params.
    /// Kills the child process and returns `Cancelled` when the token fires.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &TranscodeOptions,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Extract format metadata from a produced file.
    async fn probe(&self, path: &Path) -> Result<ProbeReport>;
}

/// Encoder backed by ffmpeg/ffprobe binaries at configured paths.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    /// Run the encoder once to confirm the binary is usable; returns the
    /// version line. Startup fails when this does.
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                WorkerError::Config(format!("cannot run {}: {}", self.ffmpeg.display(), e))
            })?;
        if !output.status.success() {
            return Err(WorkerError::Config(format!(
                "{} -version exited with {}",
                self.ffmpeg.display(),
                output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &TranscodeOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(options.to_args())
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("Executing encoder command: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| WorkerError::Encoder(format!("failed to spawn encoder: {}", e)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Encoder("failed to capture encoder stderr".into()))?;

        let mut reader = BufReader::new(stderr).lines();
        let mut last_lines = VecDeque::with_capacity(10);
        let mut killed = false;

        loop {
            tokio::select! {
                line = reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            last_lines.push_back(line);
                            if last_lines.len() > 10 {
                                last_lines.pop_front();
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Error reading encoder stderr: {}", e);
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    warn!("Cancellation requested, killing encoder process");
                    let _ = child.kill().await;
                    killed = true;
                    break;
                }
            }
        }

        let status = child.wait().await?;

        if killed {
            return Err(WorkerError::Cancelled);
        }

        if !status.success() {
            let detail = last_lines.make_contiguous().join("\n");
            return Err(WorkerError::Encoder(format!(
                "encoder exited with {}. Last output:\n{}",
                status, detail
            )));
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(WorkerError::Encoder(format!(
                "encoder produced no output at {}",
                output.display()
            )));
        }
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| WorkerError::Probe(format!("failed to spawn probe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Probe(format!(
                "probe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| WorkerError::Probe(format!("unparseable probe output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(bitrate: i64, resolution: &str, ratio: &str) -> Request {
        Request {
            request_id: 1,
            bitrate,
            resolution: resolution.into(),
            ratio: ratio.into(),
            video_id: 1,
            video_service_id: "clip.mp4".into(),
            user_id: 1,
        }
    }

    #[test]
    fn options_from_full_request() {
        let options = TranscodeOptions::from_request(&request(64000, "800:600", "4:3"));
        assert_eq!(options.resolution.as_deref(), Some("800:600"));
        assert_eq!(options.aspect.as_deref(), Some("4:3"));
        assert_eq!(options.buffer_size, Some(64000));
        assert_eq!(options.video_bitrate, Some(64000));
    }

    #[test]
    fn zero_bitrate_and_empty_strings_request_nothing() {
        let options = TranscodeOptions::from_request(&request(0, "", ""));
        assert_eq!(options, TranscodeOptions::default());
        assert!(options.to_args().is_empty());
    }

    #[test]
    fn args_order_and_decimal_bitrate() {
        let options = TranscodeOptions {
            resolution: Some("800:600".into()),
            aspect: Some("4:3".into()),
            buffer_size: Some(128000),
            video_bitrate: Some(64000),
        };
        assert_eq!(
            options.to_args(),
            vec!["-s", "800:600", "-aspect", "4:3", "-b:v", "64000", "-bufsize", "128000"]
        );
    }

    #[test]
    fn probe_report_parses_ffprobe_json() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1280, "height": 720,
                 "display_aspect_ratio": "16:9"}
            ],
            "format": {"bit_rate": "484201"}
        }"#;
        let report: ProbeReport = serde_json::from_str(json).expect("decode");
        assert_eq!(report.format_bitrate().expect("bitrate"), 484201);
        let stream = report.video_stream().expect("video stream");
        assert_eq!(stream.width, Some(1280));
        assert_eq!(stream.display_aspect_ratio.as_deref(), Some("16:9"));
    }

    #[test]
    fn missing_or_bad_bitrate_is_probe_failure() {
        let report: ProbeReport =
            serde_json::from_str(r#"{"streams": [], "format": {}}"#).expect("decode");
        assert!(matches!(report.format_bitrate(), Err(WorkerError::Probe(_))));

        let report: ProbeReport =
            serde_json::from_str(r#"{"streams": [], "format": {"bit_rate": "N/A"}}"#)
                .expect("decode");
        assert!(matches!(report.format_bitrate(), Err(WorkerError::Probe(_))));
    }
}
