use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string (statistics store)
    pub database_url: String,

    /// Redis connection string (durable queues)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 15)
    pub db_max_connections: u32,

    /// Redis list producers append to
    pub intake_queue: String,

    /// Redis sorted set holding messages awaiting redelivery
    pub delay_queue: String,

    /// Redis list receiving messages that exhausted their retries
    pub dead_letter_queue: String,

    /// Concurrent blocking pops against the intake queue (default: 10)
    pub dispatcher_count: usize,

    /// Concurrent message processors (default: 50)
    pub worker_count: usize,

    /// Capacity of the channel between dispatchers and workers (default: 2000)
    pub channel_buffer: usize,

    /// Sustained gateway send rate across all workers (default: 200/s)
    pub send_rate_per_second: f64,

    /// Token bucket burst capacity (default: 5)
    pub send_burst: u32,

    /// Retries allowed before a message is dead-lettered (default: 5)
    pub max_retry_count: u32,

    /// Linear backoff step; retry `k` waits `k * step` seconds (default: 3)
    pub retry_step_seconds: u64,

    /// Due entries promoted per scheduler tick (default: 30)
    pub scheduler_batch_size: usize,

    /// Blocking pop wait bound in seconds (default: 5)
    pub pop_timeout_seconds: u64,

    /// Directory for the month-keyed statistics log (default: "stat")
    pub stat_log_dir: String,

    /// Push gateway base URL
    pub gateway_base_url: String,

    /// Gateway application id used to obtain access tokens
    pub gateway_app_id: Option<String>,

    /// Gateway application secret used to obtain access tokens
    pub gateway_app_secret: Option<String>,

    /// Identity resolver endpoint
    pub resolver_url: Option<String>,

    pub enable_target_allowlist: bool,
    pub allowed_targets: Vec<String>,
    pub enable_target_blocklist: bool,
    pub blocked_targets: Vec<String>,

    /// Ingestion API listen address (default: 0.0.0.0:3000)
    pub api_bind_addr: String,

    /// Source IPs permitted to call the ingestion API; empty allows everyone
    pub allowed_ips: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 15)?,
            intake_queue: std::env::var("INTAKE_QUEUE")
                .unwrap_or_else(|_| "push_msg_queue".to_string()),
            delay_queue: std::env::var("DELAY_QUEUE")
                .unwrap_or_else(|_| "push_msg_delay".to_string()),
            dead_letter_queue: std::env::var("DEAD_LETTER_QUEUE")
                .unwrap_or_else(|_| "push_msg_dlq".to_string()),
            dispatcher_count: parse_var("DISPATCHER_COUNT", 10)?,
            worker_count: parse_var("WORKER_COUNT", 50)?,
            channel_buffer: parse_var("CHANNEL_BUFFER", 2000)?,
            send_rate_per_second: parse_var("SEND_RATE_PER_SECOND", 200.0)?,
            send_burst: parse_var("SEND_BURST", 5)?,
            max_retry_count: parse_var("MAX_RETRY_COUNT", 5)?,
            retry_step_seconds: parse_var("RETRY_STEP_SECONDS", 3)?,
            scheduler_batch_size: parse_var("SCHEDULER_BATCH_SIZE", 30)?,
            pop_timeout_seconds: parse_var("POP_TIMEOUT_SECONDS", 5)?,
            stat_log_dir: std::env::var("STAT_LOG_DIR").unwrap_or_else(|_| "stat".to_string()),
            gateway_base_url: std::env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.weixin.qq.com".to_string()),
            gateway_app_id: std::env::var("GATEWAY_APP_ID").ok(),
            gateway_app_secret: std::env::var("GATEWAY_APP_SECRET").ok(),
            resolver_url: std::env::var("RESOLVER_URL").ok(),
            enable_target_allowlist: parse_var("ENABLE_TARGET_ALLOWLIST", false)?,
            allowed_targets: split_list(std::env::var("ALLOWED_TARGETS").ok()),
            enable_target_blocklist: parse_var("ENABLE_TARGET_BLOCKLIST", false)?,
            blocked_targets: split_list(std::env::var("BLOCKED_TARGETS").ok()),
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            allowed_ips: split_list(std::env::var("ALLOWED_IPS").ok()),
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks.
fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
