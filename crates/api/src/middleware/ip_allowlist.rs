//! Source-IP allowlist for the ingestion routes.
//!
//! `AllowedClient` is an extractor: a handler that takes it only runs when
//! the peer address is in `ALLOWED_IPS`. An empty allowlist admits everyone.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use beacon_common::error::AppError;

use crate::state::AppState;

/// Peer address of a request that passed the allowlist.
#[derive(Debug, Clone, Copy)]
pub struct AllowedClient {
    pub ip: Option<IpAddr>,
}

impl FromRequestParts<AppState> for AllowedClient {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let allowed = state.allowed_ips.clone();

        async move {
            if allowed.is_empty() {
                return Ok(AllowedClient { ip });
            }
            match ip {
                Some(ip) if allowed.contains(&normalize(ip)) => Ok(AllowedClient { ip: Some(ip) }),
                _ => {
                    tracing::warn!(client_ip = ?ip, "Rejected request from unlisted IP");
                    Err(AppError::Forbidden("IP not allowed".to_string()))
                }
            }
        }
    }
}

/// Unwrap IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) so dual-stack listeners
/// match IPv4 allowlist entries.
pub fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_normalize_mapped_ipv4() {
        let mapped: IpAddr = "::ffff:10.0.0.7".parse().unwrap();
        assert_eq!(normalize(mapped), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(normalize(v6), v6);
    }
}
