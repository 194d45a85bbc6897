//! In-process queue backends with the same semantics as the Redis ones.
//!
//! Used by tests and for running the pipeline without Redis. State does not
//! survive the process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{DeadLetterQueue, DelayStore, IntakeQueue, QueueError};

#[derive(Debug, Default)]
pub struct MemoryIntakeQueue {
    entries: Mutex<VecDeque<String>>,
    arrived: Notify,
    unavailable: AtomicBool,
}

impl MemoryIntakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("intake queue offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IntakeQueue for MemoryIntakeQueue {
    async fn push(&self, raw: &str) -> Result<(), QueueError> {
        self.check_available()?;
        self.entries.lock().push_back(raw.to_string());
        self.arrived.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check_available()?;
            if let Some(raw) = self.entries.lock().pop_front() {
                return Ok(Some(raw));
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDelayStore {
    members: Mutex<HashMap<String, i64>>,
}

impl MemoryDelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All members with their scores, lowest score first.
    pub fn entries(&self) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .members
            .lock()
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        entries.sort_by_key(|(_, score)| *score);
        entries
    }
}

#[async_trait]
impl DelayStore for MemoryDelayStore {
    async fn add(&self, member: &str, score: i64) -> Result<(), QueueError> {
        self.members.lock().insert(member.to_string(), score);
        Ok(())
    }

    async fn range_by_score(
        &self,
        min: i64,
        max: i64,
        limit: usize,
    ) -> Result<Vec<String>, QueueError> {
        let mut due: Vec<(String, i64)> = self
            .members
            .lock()
            .iter()
            .filter(|(_, score)| (min..=max).contains(*score))
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by_key(|(_, score)| *score);
        Ok(due.into_iter().take(limit).map(|(member, _)| member).collect())
    }

    async fn remove(&self, members: &[String]) -> Result<u64, QueueError> {
        let mut guard = self.members.lock();
        let removed = members
            .iter()
            .filter(|member| guard.remove(member.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeadLetterQueue {
    entries: Mutex<Vec<String>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl DeadLetterQueue for MemoryDeadLetterQueue {
    async fn push(&self, raw: &str) -> Result<(), QueueError> {
        self.entries.lock().push(raw.to_string());
        Ok(())
    }
}
