//! Worker pool: one message per iteration, end to end.
//!
//! ```text
//! channel -> rate limiter -> parse -> policy -> resolve -> send
//!                                                  |          |
//!                                                  +-- fail --+--> delay store (retry_count <= max)
//!                                                             +--> dead-letter queue (retry_count > max)
//! ```
//!
//! Only the resolve and send steps drive the retry transition. Stat writes are
//! best-effort and never change where a message ends up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use beacon_common::policy::TargetPolicy;
use beacon_common::queue::{DeadLetterQueue, DelayStore, IntakeQueue};
use beacon_common::types::QueuedMessage;

use crate::config::NotifierConfig;
use crate::error::DeliveryError;
use crate::gateway::{PushGateway, TemplateMessage};
use crate::limiter::RateLimiter;
use crate::resolver::IdentityResolver;
use crate::stat_store::StatStore;
use crate::stats::StatAggregator;

/// Receiving half of the dispatch channel, shared by every worker.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<String>>>;

/// Where a message ended up after one pass through a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    /// Unparseable payload, dropped.
    Malformed,
    /// Target denied by policy, dropped without counting a failure.
    Blocked,
    /// Inserted into the delay store.
    Retrying { retry_count: u32, due_at: i64 },
    DeadLettered { retry_count: u32 },
    /// Returned to the intake queue untouched (limiter wait cancelled).
    Requeued,
    /// The durable write that should have held the message failed.
    Unpersisted,
}

/// Shared services every worker uses.
pub struct WorkerContext {
    pub config: NotifierConfig,
    pub policy: TargetPolicy,
    pub limiter: Arc<RateLimiter>,
    pub stats: Arc<StatAggregator>,
    pub intake: Arc<dyn IntakeQueue>,
    pub delay: Arc<dyn DelayStore>,
    pub dead_letter: Arc<dyn DeadLetterQueue>,
    pub gateway: Arc<dyn PushGateway>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub stat_store: Arc<dyn StatStore>,
}

pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Consume the channel until it closes or `cancel` fires. A message already
    /// received is always carried to an outcome.
    pub async fn run(self, rx: SharedReceiver, cancel: CancellationToken) {
        tracing::debug!(worker_id = self.id, "Worker started");
        loop {
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    raw = rx.recv() => raw,
                }
            };
            let Some(raw) = next else { break };
            self.handle(raw, &cancel).await;
        }
        tracing::debug!(worker_id = self.id, "Worker stopped");
    }

    /// Wait for a send slot, then process. A cancelled wait returns the entry
    /// to the intake queue as it was received.
    pub async fn handle(&self, raw: String, cancel: &CancellationToken) -> Outcome {
        if let Err(e) = self.ctx.limiter.acquire(cancel).await {
            tracing::warn!(worker_id = self.id, error = %e, "Rate limiter wait aborted, requeueing");
            return match self.ctx.intake.push(&raw).await {
                Ok(()) => Outcome::Requeued,
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, payload = %raw, "Failed to requeue message");
                    Outcome::Unpersisted
                }
            };
        }
        self.process_message(&raw, Utc::now()).await
    }

    pub async fn process_message(&self, raw: &str, now: DateTime<Utc>) -> Outcome {
        let msg = match QueuedMessage::from_raw(raw) {
            Ok(msg) => msg,
            Err(e) => {
                let err = DeliveryError::from(e);
                tracing::error!(worker_id = self.id, error = %err, payload = %raw, "Dropping malformed message");
                if let Some(reason) = err.reason() {
                    self.ctx.stats.record_failure(&reason, None);
                }
                return Outcome::Malformed;
            }
        };

        if !self.ctx.policy.permits(&msg.target_key) {
            let err = DeliveryError::PolicyBlocked(msg.target_key.clone());
            tracing::warn!(worker_id = self.id, error = %err, "Dropping message");
            return Outcome::Blocked;
        }

        match self.deliver(&msg, now).await {
            Ok(()) => Outcome::Delivered,
            Err(err) => self.retry_or_dead_letter(msg, &err, now).await,
        }
    }

    async fn deliver(&self, msg: &QueuedMessage, now: DateTime<Utc>) -> Result<(), DeliveryError> {
        let opaque_id = match self.ctx.resolver.resolve(&msg.target_key).await {
            Ok(id) => id,
            Err(e) => {
                let err = DeliveryError::from(e);
                tracing::warn!(
                    worker_id = self.id,
                    target_key = %msg.target_key,
                    retry_count = msg.retry_count,
                    error = %err,
                    "Identity resolution failed"
                );
                self.record_attempt_failure(msg, &err, None, now).await;
                return Err(err);
            }
        };

        let outbound = TemplateMessage::build(msg, opaque_id.as_str());
        match self.ctx.gateway.send(&outbound).await {
            Ok(()) => {
                tracing::info!(
                    worker_id = self.id,
                    target_key = %msg.target_key,
                    template_id = %msg.template_id,
                    retry_count = msg.retry_count,
                    "Message delivered"
                );
                self.record_success(msg, &opaque_id, now).await;
                Ok(())
            }
            Err(e) => {
                let err = DeliveryError::from(e);
                tracing::error!(
                    worker_id = self.id,
                    target_key = %msg.target_key,
                    retry_count = msg.retry_count,
                    error = %err,
                    "Gateway send failed"
                );
                self.record_attempt_failure(msg, &err, Some(&opaque_id), now).await;
                Err(err)
            }
        }
    }

    async fn record_success(&self, msg: &QueuedMessage, opaque_id: &str, now: DateTime<Utc>) {
        let store = &self.ctx.stat_store;
        let tenant = msg.tenant();
        self.ctx.stats.record_success();

        if let Err(e) = store.upsert_minute_stat(now, 1, 0, tenant).await {
            tracing::warn!(error = %e, "Failed to persist minute stat");
        }
        if let Err(e) = store
            .upsert_identity_stat(&msg.target_key, Some(opaque_id), true, tenant)
            .await
        {
            tracing::warn!(error = %e, "Failed to persist identity stat");
        }
        if let Err(e) = store
            .update_cached_identity(&msg.target_key, opaque_id, tenant)
            .await
        {
            tracing::warn!(error = %e, "Failed to update cached identity");
        }
    }

    /// Failure stats are counted on a message's first attempt only, so each
    /// message contributes at most one reason increment however often it retries.
    async fn record_attempt_failure(
        &self,
        msg: &QueuedMessage,
        err: &DeliveryError,
        opaque_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        if msg.retry_count != 0 {
            return;
        }
        let Some(reason) = err.reason() else { return };
        let store = &self.ctx.stat_store;
        let tenant = msg.tenant();
        self.ctx.stats.record_failure(&reason, tenant);

        if let Err(e) = store.upsert_minute_stat(now, 0, 1, tenant).await {
            tracing::warn!(error = %e, "Failed to persist minute stat");
        }
        if let Err(e) = store
            .upsert_identity_stat(&msg.target_key, opaque_id, false, tenant)
            .await
        {
            tracing::warn!(error = %e, "Failed to persist identity stat");
        }
    }

    async fn retry_or_dead_letter(
        &self,
        mut msg: QueuedMessage,
        err: &DeliveryError,
        now: DateTime<Utc>,
    ) -> Outcome {
        debug_assert!(err.is_retryable());
        // Saturates so a producer-supplied maximum still dead-letters.
        msg.retry_count = msg.retry_count.saturating_add(1);
        let retry_count = msg.retry_count;

        let raw = match msg.to_raw() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Failed to serialize message for retry");
                return Outcome::Unpersisted;
            }
        };

        if retry_count > self.ctx.config.max_retry_count {
            return match self.ctx.dead_letter.push(&raw).await {
                Ok(()) => {
                    tracing::warn!(
                        worker_id = self.id,
                        target_key = %msg.target_key,
                        retry_count,
                        "Retries exhausted, message dead-lettered"
                    );
                    Outcome::DeadLettered { retry_count }
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, payload = %raw, "Failed to dead-letter message");
                    Outcome::Unpersisted
                }
            };
        }

        let due_at = self.ctx.config.retry_due_at(now.timestamp(), retry_count);
        match self.ctx.delay.add(&raw, due_at).await {
            Ok(()) => {
                tracing::info!(
                    worker_id = self.id,
                    target_key = %msg.target_key,
                    retry_count,
                    due_at,
                    "Message scheduled for retry"
                );
                Outcome::Retrying { retry_count, due_at }
            }
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, payload = %raw, "Failed to schedule retry");
                Outcome::Unpersisted
            }
        }
    }
}
