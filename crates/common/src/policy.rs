//! Target allow/deny policy.
//!
//! Both lists are opt-in. A disabled deny-list blocks nothing; a disabled
//! allowlist admits everyone.

use std::collections::HashSet;

use crate::config::AppConfig;

#[derive(Debug, Clone, Default)]
pub struct TargetPolicy {
    allow: Option<HashSet<String>>,
    deny: Option<HashSet<String>>,
}

impl TargetPolicy {
    /// A policy that admits every target.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut policy = Self::open();
        if config.enable_target_allowlist {
            policy = policy.with_allowlist(config.allowed_targets.iter().cloned());
        }
        if config.enable_target_blocklist {
            policy = policy.with_blocklist(config.blocked_targets.iter().cloned());
        }
        tracing::info!(
            allowlist = policy.allow.as_ref().map(HashSet::len),
            blocklist = policy.deny.as_ref().map(HashSet::len),
            "Target policy loaded"
        );
        policy
    }

    pub fn with_allowlist(mut self, targets: impl IntoIterator<Item = String>) -> Self {
        self.allow = Some(targets.into_iter().collect());
        self
    }

    pub fn with_blocklist(mut self, targets: impl IntoIterator<Item = String>) -> Self {
        self.deny = Some(targets.into_iter().collect());
        self
    }

    pub fn is_blocked(&self, target: &str) -> bool {
        self.deny.as_ref().is_some_and(|deny| deny.contains(target))
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.allow.as_ref().is_none_or(|allow| allow.contains(target))
    }

    /// Deny-list first, then allowlist.
    pub fn permits(&self, target: &str) -> bool {
        !self.is_blocked(target) && self.is_allowed(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_policy_permits_everything() {
        let policy = TargetPolicy::open();
        assert!(policy.permits("123"));
        assert!(!policy.is_blocked("123"));
    }

    #[test]
    fn test_blocklist_wins_over_allowlist() {
        let policy = TargetPolicy::open()
            .with_allowlist(["123".to_string()])
            .with_blocklist(["123".to_string()]);
        assert!(policy.is_allowed("123"));
        assert!(policy.is_blocked("123"));
        assert!(!policy.permits("123"));
    }

    #[test]
    fn test_allowlist_rejects_unknown_targets() {
        let policy = TargetPolicy::open().with_allowlist(["123".to_string()]);
        assert!(policy.permits("123"));
        assert!(!policy.permits("456"));
    }

    #[test]
    fn test_disabled_lists_in_config_are_ignored() {
        let config = AppConfig {
            database_url: "unused".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            db_max_connections: 1,
            intake_queue: "q".to_string(),
            delay_queue: "d".to_string(),
            dead_letter_queue: "dlq".to_string(),
            dispatcher_count: 1,
            worker_count: 1,
            channel_buffer: 1,
            send_rate_per_second: 1.0,
            send_burst: 1,
            max_retry_count: 5,
            retry_step_seconds: 3,
            scheduler_batch_size: 10,
            pop_timeout_seconds: 5,
            stat_log_dir: "stat".to_string(),
            gateway_base_url: "http://unused".to_string(),
            gateway_app_id: None,
            gateway_app_secret: None,
            resolver_url: None,
            enable_target_allowlist: false,
            allowed_targets: vec!["123".to_string()],
            enable_target_blocklist: false,
            blocked_targets: vec!["456".to_string()],
            api_bind_addr: "127.0.0.1:0".to_string(),
            allowed_ips: vec![],
        };
        let policy = TargetPolicy::from_config(&config);
        assert!(policy.permits("456"));
        assert!(policy.permits("789"));
    }
}
