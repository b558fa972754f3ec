//! RabbitMQ adapter: durable queues, manual acknowledgement, persistent
//! JSON publishes.

use crate::error::Result;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::info;

const PERSISTENT: u8 = 2;

pub struct Broker {
    _connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect and open a channel limited to one unacknowledged delivery,
    /// so the broker hands this worker a single job at a time.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        info!("Connected to message broker");
        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Declare a durable queue; messages survive a broker restart.
    pub async fn declare_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Consume with explicit acknowledgement; the caller acks each delivery.
    pub async fn consumer(&self, queue: &str, tag: &str) -> Result<Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    pub async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }
}
