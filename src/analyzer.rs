//! Video info probe: reads bitrate, resolution and display aspect ratio
//! from a file through the encoder driver.

use crate::error::{Result, WorkerError};
use crate::ffmpeg::{Encoder, ProbeReport};
use crate::model::VideoMeta;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub async fn video_meta<E: Encoder + ?Sized>(encoder: &E, path: &Path) -> Result<VideoMeta> {
    let report = encoder.probe(path).await?;
    meta_from_report(&report)
}

fn meta_from_report(report: &ProbeReport) -> Result<VideoMeta> {
    let bitrate = report.format_bitrate()?;
    let stream = report
        .video_stream()
        .ok_or_else(|| WorkerError::Probe("no video stream in probe report".into()))?;
    let aspect = stream
        .display_aspect_ratio
        .as_deref()
        .ok_or_else(|| WorkerError::Probe("stream reports no display aspect ratio".into()))?;
    let (aspect_x, aspect_y) = parse_aspect(aspect)?;

    Ok(VideoMeta {
        bitrate,
        resolution_x: stream.width.unwrap_or(0),
        resolution_y: stream.height.unwrap_or(0),
        aspect_x,
        aspect_y,
    })
}

/// The aspect ratio is taken as the first two integer runs in the string,
/// whatever separates them.
fn parse_aspect(raw: &str) -> Result<(i32, i32)> {
    static INTEGER_RUNS: OnceLock<Regex> = OnceLock::new();
    let re = INTEGER_RUNS.get_or_init(|| Regex::new("[0-9]+").expect("valid pattern"));

    let mut runs = re.find_iter(raw);
    let x = runs
        .next()
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .ok_or_else(|| WorkerError::Probe(format!("no aspect numbers in {:?}", raw)))?;
    let y = runs
        .next()
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .ok_or_else(|| WorkerError::Probe(format!("single aspect number in {:?}", raw)))?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::{ProbeFormat, ProbeStream};

    fn report(bitrate: &str, aspect: Option<&str>) -> ProbeReport {
        ProbeReport {
            streams: vec![
                ProbeStream {
                    codec_type: "audio".into(),
                    ..Default::default()
                },
                ProbeStream {
                    codec_type: "video".into(),
                    width: Some(1280),
                    height: Some(720),
                    display_aspect_ratio: aspect.map(String::from),
                },
            ],
            format: ProbeFormat {
                bit_rate: Some(bitrate.into()),
            },
        }
    }

    #[test]
    fn meta_from_full_report() {
        let meta = meta_from_report(&report("484201", Some("16:9"))).expect("meta");
        assert_eq!(meta.bitrate, 484201);
        assert_eq!(meta.resolution_x, 1280);
        assert_eq!(meta.resolution_y, 720);
        assert_eq!(meta.aspect_x, 16);
        assert_eq!(meta.aspect_y, 9);
    }

    #[test]
    fn aspect_takes_first_two_integer_runs() {
        assert_eq!(parse_aspect("16:9").expect("parse"), (16, 9));
        assert_eq!(parse_aspect("4/3").expect("parse"), (4, 3));
        assert_eq!(parse_aspect("about 21 by 9, roughly").expect("parse"), (21, 9));
    }

    #[test]
    fn aspect_without_two_runs_is_probe_failure() {
        assert!(matches!(parse_aspect(""), Err(WorkerError::Probe(_))));
        assert!(matches!(parse_aspect("wide"), Err(WorkerError::Probe(_))));
        assert!(matches!(parse_aspect("16"), Err(WorkerError::Probe(_))));
    }

    #[test]
    fn missing_video_stream_is_probe_failure() {
        let report = ProbeReport {
            streams: vec![ProbeStream {
                codec_type: "audio".into(),
                ..Default::default()
            }],
            format: ProbeFormat {
                bit_rate: Some("128000".into()),
            },
        };
        assert!(matches!(
            meta_from_report(&report),
            Err(WorkerError::Probe(_))
        ));
    }

    #[test]
    fn missing_aspect_is_probe_failure() {
        assert!(matches!(
            meta_from_report(&report("484201", None)),
            Err(WorkerError::Probe(_))
        ));
    }
}
