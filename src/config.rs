use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker configuration, assembled once at startup from the environment and
/// passed into the services that need it. No component reads the environment
/// at call sites.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub encoder: EncoderConfig,
    /// Root under which all transient job files live (`{root}/tmp/...`).
    pub scratch_root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub queue_in: String,
    pub queue_out: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum StorageKind {
    #[default]
    S3,
    Local,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Directory acting as the bucket for the local storage variant.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Config {
    /// Build the configuration from environment variables. Missing required
    /// variables are a fatal startup error.
    pub fn from_env() -> Result<Self> {
        let kind = match std::env::var("STORAGE_KIND").ok().as_deref() {
            None | Some("s3") => StorageKind::S3,
            Some("local") => StorageKind::Local,
            Some(other) => bail!("unsupported STORAGE_KIND {:?} (expected s3 or local)", other),
        };

        let storage = match kind {
            StorageKind::S3 => StorageConfig {
                kind,
                bucket: require("AWS_BUCKET_NAME")?,
                region: require("AWS_REGION")?,
                access_key: require("AWS_ACCESS_KEY")?,
                secret_key: require("AWS_SECRET_KEY")?,
                local_dir: None,
            },
            StorageKind::Local => StorageConfig {
                kind,
                bucket: String::new(),
                region: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                local_dir: Some(PathBuf::from(require("LOCAL_STORAGE_DIR")?)),
            },
        };

        let config = Self {
            broker: BrokerConfig {
                url: require("RABBIT_URL")?,
                queue_in: require("QUEUE_IN")?,
                queue_out: require("QUEUE_OUT")?,
            },
            storage,
            encoder: EncoderConfig {
                ffmpeg_path: optional("FFMPEG_PATH", "ffmpeg"),
                ffprobe_path: optional("FFPROBE_PATH", "ffprobe"),
            },
            scratch_root: PathBuf::from(require("ROOT")?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.broker.queue_in.is_empty() || self.broker.queue_out.is_empty() {
            bail!("queue names must not be empty");
        }
        if self.broker.queue_in == self.broker.queue_out {
            bail!(
                "inbound and outbound queues must differ, both are {:?}",
                self.broker.queue_in
            );
        }
        if self.scratch_root.as_os_str().is_empty() {
            bail!("ROOT must not be empty");
        }
        match self.storage.kind {
            StorageKind::S3 => {
                if self.storage.bucket.is_empty() {
                    bail!("AWS_BUCKET_NAME must not be empty");
                }
                if self.storage.region.is_empty() {
                    bail!("AWS_REGION must not be empty");
                }
            }
            StorageKind::Local => {
                if self.storage.local_dir.is_none() {
                    bail!("LOCAL_STORAGE_DIR is required for local storage");
                }
            }
        }
        Ok(())
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing environment variable {}", name))
}

fn optional(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            broker: BrokerConfig {
                url: "amqp://localhost:5672".into(),
                queue_in: "video.convert".into(),
                queue_out: "video.converted".into(),
            },
            storage: StorageConfig {
                kind: StorageKind::S3,
                bucket: "videos".into(),
                region: "eu-central-1".into(),
                access_key: "key".into(),
                secret_key: "secret".into(),
                local_dir: None,
            },
            encoder: EncoderConfig {
                ffmpeg_path: "ffmpeg".into(),
                ffprobe_path: "ffprobe".into(),
            },
            scratch_root: "/var/recast".into(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn same_queue_both_ways_rejected() {
        let mut config = test_config();
        config.broker.queue_out = config.broker.queue_in.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn s3_requires_bucket() {
        let mut config = test_config();
        config.storage.bucket.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn local_requires_directory() {
        let mut config = test_config();
        config.storage.kind = StorageKind::Local;
        config.storage.local_dir = None;
        assert!(config.validate().is_err());
    }
}
