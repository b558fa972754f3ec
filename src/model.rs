use serde::{Deserialize, Serialize};

/// Inbound job descriptor, decoded from the broker message body.
/// Fields absent in the payload decode to their zero values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub request_id: i64,
    /// Target bitrate in bits/sec; 0 means bitrate is not a convergence target.
    #[serde(default)]
    pub bitrate: i64,
    /// `W:H` or empty.
    #[serde(default)]
    pub resolution: String,
    /// `X:Y` or empty.
    #[serde(default)]
    pub ratio: String,
    #[serde(default)]
    pub video_id: i64,
    /// Object key in blob storage; doubles as the downloaded file name.
    #[serde(default)]
    pub video_service_id: String,
    #[serde(default)]
    pub user_id: i64,
}

/// Observed properties of a video file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub bitrate: i64,
    pub resolution_x: i32,
    pub resolution_y: i32,
    #[serde(rename = "ratio_x")]
    pub aspect_x: i32,
    #[serde(rename = "ratio_y")]
    pub aspect_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalVideo {
    pub id: i64,
    #[serde(flatten)]
    pub meta: VideoMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedVideo {
    pub service_id: String,
    pub size: i64,
    pub name: String,
    pub user_id: i64,
    #[serde(flatten)]
    pub meta: VideoMeta,
}

/// Outcome published for a processed job. Exactly one of the optional
/// sections is absent depending on success/failure; absent fields are
/// omitted from the JSON, not serialized as null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_video: Option<OriginalVideo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_video: Option<ConvertedVideo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn new(request_id: i64) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }

    pub fn failure(request_id: i64, error: &str) -> Self {
        Self {
            request_id,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}
