pub mod analyzer;
pub mod broker;
pub mod config;
pub mod converge;
pub mod error;
pub mod ffmpeg;
pub mod model;
pub mod processor;
pub mod scratch;
pub mod storage;
pub mod worker;

pub use broker::Broker;
pub use config::Config;
pub use converge::Converger;
pub use error::{Result, WorkerError};
pub use ffmpeg::{Encoder, FfmpegEncoder};
pub use processor::Processor;
pub use storage::{LocalStorage, S3Storage, Storage};
pub use worker::Worker;
