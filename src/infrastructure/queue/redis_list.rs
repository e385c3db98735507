use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{JobQueue, QueueMessage};

/// Producers `LPUSH`, consumers `BRPOP`: a FIFO list.
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    list: String,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection, list: &str) -> Self {
        Self {
            conn,
            list: list.to_string(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn next(&self, wait: Duration) -> anyhow::Result<Option<QueueMessage>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(&self.list)
            .arg(wait.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        Ok(popped.map(|(_, payload)| QueueMessage::new(payload)))
    }

    // BRPOP already removed the message.
    async fn settle(&self, _message: QueueMessage) -> anyhow::Result<()> {
        Ok(())
    }
}
