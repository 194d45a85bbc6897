//! Asynchronous push-notification dispatch engine.
//!
//! Producers append wire-format messages to a durable intake queue. The
//! dispatcher pool drains it into a bounded channel, rate-limited workers
//! deliver through the push gateway, failures round-trip through the delay
//! store and exhausted messages land in the dead-letter queue.

pub mod config;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod stat_log;
pub mod stat_store;
pub mod stats;
pub mod worker;

pub use config::NotifierConfig;
pub use orchestrator::{Notifier, NotifierDeps};
