//! Consume-process-publish loop. Exactly one acknowledgement per delivery,
//! after all processing, whatever the outcome; a failed job is a result to
//! report, not a reason for redelivery.

use crate::broker::Broker;
use crate::error::{Result, WorkerError};
use crate::model::Request;
use crate::processor::Processor;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Worker {
    broker: Broker,
    queue_in: String,
    queue_out: String,
    processor: Processor,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        broker: Broker,
        queue_in: String,
        queue_out: String,
        processor: Processor,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            queue_in,
            queue_out,
            processor,
            shutdown,
        }
    }

    /// Run until the consume channel closes or shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        let mut consumer = self.broker.consumer(&self.queue_in, "recast-worker").await?;
        info!(queue = %self.queue_in, "Waiting for jobs");

        loop {
            let delivery = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = consumer.next() => match next {
                    Some(delivery) => delivery?,
                    None => {
                        warn!("Consume channel closed");
                        break;
                    }
                },
            };
            self.handle(delivery).await;
        }

        info!("Worker stopped");
        Ok(())
    }

    async fn handle(&self, delivery: Delivery) {
        let request = match serde_json::from_slice::<Request>(&delivery.data) {
            Ok(request) => request,
            Err(e) => {
                error!("Discarding malformed job payload: {}", e);
                self.ack(&delivery).await;
                return;
            }
        };

        let job_cancel = self.shutdown.child_token();
        let response = match self.processor.process(&request, &job_cancel).await {
            Ok(response) => response,
            Err(WorkerError::Cancelled) => {
                // Acknowledged like every other outcome; no response goes out.
                warn!(request_id = request.request_id, "Job cancelled mid-flight");
                self.ack(&delivery).await;
                return;
            }
            Err(e) => {
                error!(request_id = request.request_id, "Job failed unexpectedly: {}", e);
                self.ack(&delivery).await;
                return;
            }
        };

        match serde_json::to_vec(&response) {
            Err(e) => error!(
                request_id = response.request_id,
                "Failed to serialize response: {}", e
            ),
            Ok(body) => {
                // The inbound message is acknowledged even when this fails;
                // the log line is the only trace of the lost outcome.
                if let Err(e) = self.broker.publish(&self.queue_out, &body).await {
                    error!(
                        request_id = response.request_id,
                        "Failed to publish outcome: {}", e
                    );
                }
            }
        }

        self.ack(&delivery).await;
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Failed to acknowledge message: {}", e);
        }
    }
}
