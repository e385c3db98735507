use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer, options::*, types::FieldTable,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{JobQueue, QueueMessage};

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    conn: Arc<Mutex<Connection>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> Result<Connection> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("✅ Connected to RabbitMQ");
        Ok(conn)
    }

    pub async fn new(url: &str) -> Result<Self> {
        let conn = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn reconnect(&self) -> Result<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let conn = Self::connect(&self.url).await?;
        *self.conn.lock().await = conn;
        Ok(())
    }

    async fn open_channel(&self) -> Result<Channel> {
        let conn = self.conn.lock().await;
        conn.create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))
    }

    async fn consume_internal(&self, queue: &str, tag: &str) -> Result<Consumer> {
        let channel = self.open_channel().await?;

        // One unacked delivery per consumer.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch: {}", e))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue: {}", e))?;

        channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to start consumer: {}", e))
    }

    /// Opens a fresh channel and starts consuming `queue` on it.
    pub async fn consume(&self, queue: &str, tag: &str) -> Result<Consumer> {
        match self.consume_internal(queue, tag).await {
            Ok(consumer) => Ok(consumer),
            Err(e) => {
                warn!("RabbitMQ consume failed: {}. Retrying after reconnect.", e);
                self.reconnect().await?;
                self.consume_internal(queue, tag).await
            }
        }
    }
}

/// A consumer on its own channel. The consumer is opened lazily and dropped
/// whenever the stream fails, so the next poll reconnects.
pub struct RabbitMqJobQueue {
    service: RabbitMqService,
    queue: String,
    tag: String,
    consumer: Mutex<Option<Consumer>>,
}

impl RabbitMqJobQueue {
    pub fn new(service: RabbitMqService, queue: &str, tag: &str) -> Self {
        Self {
            service,
            queue: queue.to_string(),
            tag: tag.to_string(),
            consumer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl JobQueue for RabbitMqJobQueue {
    async fn next(&self, wait: Duration) -> Result<Option<QueueMessage>> {
        let mut slot = self.consumer.lock().await;
        if slot.is_none() {
            *slot = Some(self.service.consume(&self.queue, &self.tag).await?);
            info!(queue = %self.queue, tag = %self.tag, "🎧 Consumer attached");
        }
        let Some(consumer) = slot.as_mut() else {
            return Ok(None);
        };

        match tokio::time::timeout(wait, consumer.next()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(delivery))) => Ok(Some(QueueMessage::from_delivery(delivery))),
            Ok(Some(Err(e))) => {
                *slot = None;
                Err(anyhow!("Consumer error: {}", e))
            }
            Ok(None) => {
                *slot = None;
                Err(anyhow!("Consumer stream closed"))
            }
        }
    }

    async fn settle(&self, message: QueueMessage) -> Result<()> {
        if let Some(delivery) = message.delivery {
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| anyhow!("Failed to ack delivery: {}", e))?;
        }
        Ok(())
    }
}
