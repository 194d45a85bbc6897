use std::path::PathBuf;
use std::time::Duration;

use beacon_common::config::AppConfig;

/// Pool sizes, limits and retry policy for the dispatch engine.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub dispatcher_count: usize,
    pub worker_count: usize,
    pub channel_buffer: usize,
    pub send_rate_per_second: f64,
    pub send_burst: u32,
    /// A message whose retry count exceeds this is dead-lettered.
    pub max_retry_count: u32,
    pub retry_step_seconds: u64,
    pub scheduler_batch_size: usize,
    pub scheduler_tick: Duration,
    pub pop_timeout: Duration,
    /// Pause after a durable-store error before the dispatcher pops again.
    pub store_error_backoff: Duration,
    pub stat_log_dir: PathBuf,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dispatcher_count: 10,
            worker_count: 50,
            channel_buffer: 2000,
            send_rate_per_second: 200.0,
            send_burst: 5,
            max_retry_count: 5,
            retry_step_seconds: 3,
            scheduler_batch_size: 30,
            scheduler_tick: Duration::from_secs(1),
            pop_timeout: Duration::from_secs(5),
            store_error_backoff: Duration::from_secs(1),
            stat_log_dir: PathBuf::from("stat"),
        }
    }
}

impl NotifierConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            dispatcher_count: config.dispatcher_count.max(1),
            worker_count: config.worker_count.max(1),
            channel_buffer: config.channel_buffer.max(1),
            send_rate_per_second: config.send_rate_per_second,
            send_burst: config.send_burst.max(1),
            max_retry_count: config.max_retry_count,
            retry_step_seconds: config.retry_step_seconds,
            scheduler_batch_size: config.scheduler_batch_size.max(1),
            pop_timeout: Duration::from_secs(config.pop_timeout_seconds.max(1)),
            stat_log_dir: PathBuf::from(&config.stat_log_dir),
            ..Self::default()
        }
    }

    /// Epoch second at which retry number `retry_count` becomes due.
    ///
    /// Linear backoff: `now + retry_count * step`.
    pub fn retry_due_at(&self, now: i64, retry_count: u32) -> i64 {
        now + i64::from(retry_count) * self.retry_step_seconds as i64
    }
}
