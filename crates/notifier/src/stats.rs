//! In-process delivery counters, flushed once per wall-clock minute.
//!
//! Workers bump the counters concurrently. The flush loop swaps them to zero
//! at each minute boundary, appends a summary to the month-keyed stat log and
//! forwards per-reason counts to the stat store. The external sinks are the
//! durable record; nothing here survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::stat_log::StatLog;
use crate::stat_store::StatStore;

/// Failure reason, optionally qualified by tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReasonKey {
    pub reason: String,
    pub tenant: Option<String>,
}

impl std::fmt::Display for ReasonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}|{}", self.reason, tenant),
            None => write!(f, "{}", self.reason),
        }
    }
}

#[derive(Debug, Default)]
struct FailureCounters {
    total: u64,
    by_reason: HashMap<ReasonKey, u64>,
}

/// Counts accumulated since the previous flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub success: u64,
    pub failure: u64,
    pub reasons: BTreeMap<ReasonKey, u64>,
}

impl StatSnapshot {
    /// Human-readable summary, one line for the totals and one per reason.
    pub fn summary(&self, minute: DateTime<Utc>) -> String {
        let stamp = minute.format("%Y-%m-%d %H:%M");
        let mut out = format!(
            "{} success: {}, failure: {}\n",
            stamp, self.success, self.failure
        );
        for (key, count) in &self.reasons {
            let _ = writeln!(out, "{} reason[{}]: {}", stamp, key, count);
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct StatAggregator {
    success: AtomicU64,
    failures: Mutex<FailureCounters>,
}

impl StatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failure under `reason`. The total and the reason bucket move
    /// together so a flush never sees one without the other.
    pub fn record_failure(&self, reason: &str, tenant: Option<&str>) {
        let key = ReasonKey {
            reason: reason.to_string(),
            tenant: tenant.map(str::to_string),
        };
        let mut failures = self.failures.lock();
        failures.total += 1;
        *failures.by_reason.entry(key).or_insert(0) += 1;
    }

    /// Take everything counted so far and reset to zero. Increments racing with
    /// the swap land either in this snapshot or the next, never neither.
    pub fn snapshot_and_reset(&self) -> StatSnapshot {
        let success = self.success.swap(0, Ordering::AcqRel);
        let failures = std::mem::take(&mut *self.failures.lock());
        StatSnapshot {
            success,
            failure: failures.total,
            reasons: failures
                .by_reason
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }
}

/// Start of the minute following `now`.
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let minute = TimeDelta::minutes(1);
    now.duration_trunc(minute).unwrap_or(now) + minute
}

/// Flushes the aggregator at every wall-clock minute until cancelled.
pub struct StatFlusher {
    stats: Arc<StatAggregator>,
    log: StatLog,
    store: Arc<dyn StatStore>,
}

impl StatFlusher {
    pub fn new(stats: Arc<StatAggregator>, log: StatLog, store: Arc<dyn StatStore>) -> Self {
        Self { stats, log, store }
    }

    /// Each minute is flushed once even if the timer wakes slightly before
    /// the wall clock reaches the boundary.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut last_flushed: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let from = last_flushed.map_or(now, |last| last.max(now));
            let boundary = next_minute_boundary(from);
            let wait = (boundary - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.flush(boundary).await;
                    last_flushed = Some(boundary);
                }
                _ = cancel.cancelled() => {
                    self.flush(Utc::now()).await;
                    tracing::info!("Stat flusher stopped");
                    return;
                }
            }
        }
    }

    /// Write one minute's worth of counts to the log file and the stat store.
    pub async fn flush(&mut self, minute: DateTime<Utc>) -> StatSnapshot {
        let snapshot = self.stats.snapshot_and_reset();
        let summary = snapshot.summary(minute);

        match self.log.append(minute, &summary).await {
            Ok(()) => tracing::info!(
                success = snapshot.success,
                failure = snapshot.failure,
                "Stat summary written"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to write stat log"),
        }

        for (key, count) in &snapshot.reasons {
            if let Err(e) = self
                .store
                .append_fail_reason(minute, &key.reason, *count, key.tenant.as_deref())
                .await
            {
                tracing::warn!(reason = %key, error = %e, "Failed to persist fail reason");
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_snapshot_resets_counters() {
        let stats = StatAggregator::new();
        stats.record_success();
        stats.record_success();
        stats.record_failure("send_error", None);
        stats.record_failure("invalid_target", Some("acme"));
        stats.record_failure("invalid_target", Some("acme"));

        let snap = stats.snapshot_and_reset();
        assert_eq!(snap.success, 2);
        assert_eq!(snap.failure, 3);
        let key = ReasonKey {
            reason: "invalid_target".to_string(),
            tenant: Some("acme".to_string()),
        };
        assert_eq!(snap.reasons[&key], 2);

        assert_eq!(stats.snapshot_and_reset(), StatSnapshot::default());
    }

    #[test]
    fn test_concurrent_increments_not_lost_across_flushes() {
        let stats = Arc::new(StatAggregator::new());
        let writers: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record_success();
                        stats.record_failure("send_error", None);
                    }
                })
            })
            .collect();

        let mut success = 0;
        let mut failure = 0;
        let mut by_reason = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            let snap = stats.snapshot_and_reset();
            success += snap.success;
            failure += snap.failure;
            by_reason += snap.reasons.values().sum::<u64>();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        let snap = stats.snapshot_and_reset();
        success += snap.success;
        failure += snap.failure;
        by_reason += snap.reasons.values().sum::<u64>();

        assert_eq!(success, 80_000);
        assert_eq!(failure, 80_000);
        assert_eq!(by_reason, 80_000);
    }

    #[test]
    fn test_summary_format() {
        let mut snap = StatSnapshot {
            success: 10,
            failure: 1,
            reasons: BTreeMap::new(),
        };
        snap.reasons.insert(
            ReasonKey {
                reason: "invalid_json".to_string(),
                tenant: None,
            },
            1,
        );
        let minute = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 0).unwrap();
        assert_eq!(
            snap.summary(minute),
            "2026-03-04 05:06 success: 10, failure: 1\n2026-03-04 05:06 reason[invalid_json]: 1\n"
        );
    }

    #[test]
    fn test_reason_key_display_includes_tenant() {
        let key = ReasonKey {
            reason: "send_error".to_string(),
            tenant: Some("acme".to_string()),
        };
        assert_eq!(key.to_string(), "send_error|acme");
    }

    #[test]
    fn test_next_minute_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 42).unwrap();
        assert_eq!(
            next_minute_boundary(now),
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
        );
    }
}
