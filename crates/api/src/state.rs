//! Shared application state for the Axum API server.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use beacon_common::config::AppConfig;
use beacon_common::policy::TargetPolicy;
use beacon_common::queue::IntakeQueue;

use crate::middleware::ip_allowlist::normalize;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<dyn IntakeQueue>,
    pub policy: Arc<TargetPolicy>,
    /// Empty means every client is admitted. IPv4-mapped entries are stored
    /// in their IPv4 form, matching how peers are compared.
    pub allowed_ips: Arc<HashSet<IpAddr>>,
}

impl AppState {
    pub fn new(
        intake: Arc<dyn IntakeQueue>,
        policy: TargetPolicy,
        allowed_ips: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        Self {
            intake,
            policy: Arc::new(policy),
            allowed_ips: Arc::new(allowed_ips.into_iter().map(normalize).collect()),
        }
    }

    pub fn from_config(intake: Arc<dyn IntakeQueue>, config: &AppConfig) -> anyhow::Result<Self> {
        let allowed_ips = config
            .allowed_ips
            .iter()
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|_| anyhow::anyhow!("ALLOWED_IPS entry {:?} is not an IP address", raw))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::new(
            intake,
            TargetPolicy::from_config(config),
            allowed_ips,
        ))
    }
}
