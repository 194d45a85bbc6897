//! Durable queue abstractions.
//!
//! Three stores hold every message that is not currently in a worker's hands:
//! - the intake queue (list, producers append, dispatchers pop),
//! - the delay store (sorted set scored by the epoch second a retry becomes due),
//! - the dead-letter queue (append-only terminal list).
//!
//! Entries are the serialized [`QueuedMessage`](crate::types::QueuedMessage)
//! strings; the stores never interpret them.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryDeadLetterQueue, MemoryDelayStore, MemoryIntakeQueue};
pub use self::redis::{RedisDeadLetterQueue, RedisDelayStore, RedisIntakeQueue};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IntakeQueue: Send + Sync {
    /// Append an entry at the tail.
    async fn push(&self, raw: &str) -> Result<(), QueueError>;

    /// Remove the head entry, waiting up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` means the wait elapsed with the queue empty.
    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;
}

#[async_trait]
pub trait DelayStore: Send + Sync {
    /// Insert (or rescore) `member` to become due at epoch second `score`.
    async fn add(&self, member: &str, score: i64) -> Result<(), QueueError>;

    /// Up to `limit` members with `min <= score <= max`, lowest score first.
    async fn range_by_score(
        &self,
        min: i64,
        max: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError>;

    /// Remove the given members, returning how many were present.
    async fn remove(&self, members: &[String]) -> Result<u64, QueueError>;
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn push(&self, raw: &str) -> Result<(), QueueError>;
}
