//! Redis-backed queues.
//!
//! Non-blocking commands share one `ConnectionManager`. `BLPOP` parks the
//! connection it runs on, so blocking pops check out a dedicated multiplexed
//! connection from a small idle pool instead.

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;

use super::{DeadLetterQueue, DelayStore, IntakeQueue, QueueError};

/// Intake list: `RPUSH` to append, `BLPOP` to remove (FIFO).
pub struct RedisIntakeQueue {
    key: String,
    client: Client,
    conn: ConnectionManager,
    idle_blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisIntakeQueue {
    pub fn new(key: impl Into<String>, client: Client, conn: ConnectionManager) -> Self {
        Self {
            key: key.into(),
            client,
            conn,
            idle_blocking: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, QueueError> {
        if let Some(conn) = self.idle_blocking.lock().await.pop() {
            return Ok(conn);
        }
        tracing::debug!(queue = %self.key, "Opening dedicated connection for blocking pops");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl IntakeQueue for RedisIntakeQueue {
    async fn push(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(raw)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.checkout_blocking().await?;

        // BLPOP key timeout → nil on timeout, [key, value] otherwise
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        // Only healthy connections go back to the pool; a failed one is dropped by `?` above.
        self.idle_blocking.lock().await.push(conn);

        Ok(popped.map(|(_, raw)| raw))
    }
}

/// Delay store as a sorted set scored by due epoch second.
pub struct RedisDelayStore {
    key: String,
    conn: ConnectionManager,
}

impl RedisDelayStore {
    pub fn new(key: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            key: key.into(),
            conn,
        }
    }
}

#[async_trait]
impl DelayStore for RedisDelayStore {
    async fn add(&self, member: &str, score: i64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn range_by_score(
        &self,
        min: i64,
        max: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg(min)
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn remove(&self, members: &[String]) -> Result<u64, QueueError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("ZREM")
            .arg(&self.key)
            .arg(members)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

/// Terminal list for messages that exhausted their retries.
pub struct RedisDeadLetterQueue {
    key: String,
    conn: ConnectionManager,
}

impl RedisDeadLetterQueue {
    pub fn new(key: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            key: key.into(),
            conn,
        }
    }
}

#[async_trait]
impl DeadLetterQueue for RedisDeadLetterQueue {
    async fn push(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(raw)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
