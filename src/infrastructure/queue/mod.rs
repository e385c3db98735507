use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::message::Delivery;

use crate::config::settings::{AppConfig, QueueConfig};
use crate::infrastructure::redis::client::RedisService;

pub mod rabbitmq;
pub mod redis_list;

/// A raw job payload plus whatever the broker needs to settle it.
pub struct QueueMessage {
    pub payload: Vec<u8>,
    delivery: Option<Delivery>,
}

impl QueueMessage {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delivery: None,
        }
    }

    fn from_delivery(delivery: Delivery) -> Self {
        Self {
            payload: delivery.data.clone(),
            delivery: Some(delivery),
        }
    }
}

/// Shared job queue as seen by one consumer.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Waits at most `wait` for the next message.
    async fn next(&self, wait: Duration) -> anyhow::Result<Option<QueueMessage>>;

    /// Called once per message after processing, whatever the outcome.
    async fn settle(&self, message: QueueMessage) -> anyhow::Result<()>;
}

/// One queue handle per consumer task.
pub async fn connect_consumers(config: &AppConfig) -> anyhow::Result<Vec<Arc<dyn JobQueue>>> {
    let count = config.worker_concurrency;
    let mut queues: Vec<Arc<dyn JobQueue>> = Vec::with_capacity(count);

    match &config.queue {
        QueueConfig::Redis { url } => {
            let redis = RedisService::new(url).await?;
            // BRPOP holds the connection for the whole wait window.
            let response_timeout = config.poll_timeout + Duration::from_secs(5);
            for _ in 0..count {
                let conn = redis.get_blocking_conn(response_timeout).await?;
                queues.push(Arc::new(redis_list::RedisJobQueue::new(conn, &config.queue_name)));
            }
        }
        QueueConfig::RabbitMq { url } => {
            let service = rabbitmq::RabbitMqService::new(url).await?;
            for i in 0..count {
                queues.push(Arc::new(rabbitmq::RabbitMqJobQueue::new(
                    service.clone(),
                    &config.queue_name,
                    &format!("acquisition_worker_{i}"),
                )));
            }
        }
    }

    Ok(queues)
}
