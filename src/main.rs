use anyhow::Context;
use recast::config::StorageKind;
use recast::scratch::ScratchDirs;
use recast::{Broker, Config, FfmpegEncoder, LocalStorage, Processor, S3Storage, Storage, Worker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!("Configuration:");
    info!("  Inbound queue:  {}", config.broker.queue_in);
    info!("  Outbound queue: {}", config.broker.queue_out);
    info!("  Storage:        {}", config.storage.kind);
    info!("  Scratch root:   {}", config.scratch_root.display());

    let scratch = ScratchDirs::new(&config.scratch_root);
    scratch.ensure().await.context("creating scratch directories")?;

    let encoder = FfmpegEncoder::new(&config.encoder);
    let version = encoder.verify().await.context("verifying encoder binary")?;
    info!("Encoder: {}", version);

    let storage: Arc<dyn Storage> = match config.storage.kind {
        StorageKind::S3 => Arc::new(S3Storage::new(&config.storage, scratch.clone()).await),
        StorageKind::Local => {
            let dir = config
                .storage
                .local_dir
                .clone()
                .context("local storage directory not configured")?;
            Arc::new(LocalStorage::new(dir, scratch.clone()))
        }
    };

    let broker = Broker::connect(&config.broker.url)
        .await
        .context("connecting to message broker")?;
    broker
        .declare_queue(&config.broker.queue_in)
        .await
        .context("declaring inbound queue")?;
    broker
        .declare_queue(&config.broker.queue_out)
        .await
        .context("declaring outbound queue")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown requested, finishing up");
                shutdown.cancel();
            }
        }
    });

    let processor = Processor::new(storage, Arc::new(encoder), scratch);
    let worker = Worker::new(
        broker,
        config.broker.queue_in.clone(),
        config.broker.queue_out.clone(),
        processor,
        shutdown,
    );
    worker.run().await.context("running worker loop")?;
    Ok(())
}
