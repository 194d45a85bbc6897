//! Gateway bearer-token provider.
//!
//! Tokens are cached until shortly before expiry. A background refresher
//! re-fetches ahead of expiry so senders almost never wait on the token
//! endpoint; a cache miss still fetches inline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CredentialError;

/// Margin subtracted from `expires_in` when deciding a cached token is stale.
const EXPIRY_SAFETY_SECS: u64 = 100;

/// How long before expiry the background refresher fetches a new token.
const REFRESH_AHEAD_SECS: u64 = 60;

const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);
const REFRESH_FAILURE_BACKOFF: Duration = Duration::from_secs(10);

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid bearer token.
    async fn token(&self) -> Result<String, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    stale_at: Instant,
}

/// Fetches tokens with the client-credential grant and caches them.
pub struct CachedTokenProvider {
    http: reqwest::Client,
    token_url: String,
    app_id: Option<String>,
    app_secret: Option<String>,
    cached: RwLock<Option<CachedToken>>,
    fetch_lock: Mutex<()>,
}

impl CachedTokenProvider {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        app_id: Option<String>,
        app_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/cgi-bin/token", base_url.trim_end_matches('/')),
            app_id,
            app_secret,
            cached: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Fetch a fresh token and cache it. Returns the token's lifetime.
    pub async fn refresh(&self) -> Result<Duration, CredentialError> {
        let _guard = self.fetch_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Duration, CredentialError> {
        let response = match self.fetch().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Token fetch failed, retrying once");
                tokio::time::sleep(FETCH_RETRY_DELAY).await;
                self.fetch().await?
            }
        };

        let lifetime = Duration::from_secs(response.expires_in);
        let stale_at = Instant::now() + lifetime.saturating_sub(Duration::from_secs(EXPIRY_SAFETY_SECS));
        *self.cached.write().await = Some(CachedToken {
            value: response.access_token,
            stale_at,
        });

        tracing::info!(expires_in = response.expires_in, "Gateway access token refreshed");
        Ok(lifetime)
    }

    async fn fetch(&self) -> Result<TokenResponse, CredentialError> {
        let (Some(app_id), Some(secret)) = (&self.app_id, &self.app_secret) else {
            return Err(CredentialError::NotConfigured);
        };

        let response: TokenResponse = self
            .http
            .get(&self.token_url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", app_id.as_str()),
                ("secret", secret.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if response.errcode != 0 || response.access_token.is_empty() {
            return Err(CredentialError::Rejected {
                code: response.errcode,
                message: response.errmsg,
            });
        }
        Ok(response)
    }

    async fn cached_token(&self) -> Option<String> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|token| Instant::now() < token.stale_at)
            .map(|token| token.value.clone())
    }

    /// Keep the cache warm until cancelled.
    pub async fn run_refresher(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let next = match self.refresh().await {
                Ok(lifetime) => refresh_delay(lifetime),
                Err(e) => {
                    tracing::error!(error = %e, "Background token refresh failed");
                    REFRESH_FAILURE_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Token refresher stopped");
                    return;
                }
            }
        }
    }
}

/// Sleep before the next proactive refresh.
fn refresh_delay(lifetime: Duration) -> Duration {
    lifetime
        .saturating_sub(Duration::from_secs(REFRESH_AHEAD_SECS))
        .max(Duration::from_secs(1))
}

#[async_trait]
impl CredentialProvider for CachedTokenProvider {
    async fn token(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _guard = self.fetch_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }
        self.refresh_locked().await?;
        self.cached_token()
            .await
            .ok_or(CredentialError::Rejected {
                code: 0,
                message: "token expired immediately".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_delay_leads_expiry() {
        assert_eq!(refresh_delay(Duration::from_secs(7200)), Duration::from_secs(7140));
        assert_eq!(refresh_delay(Duration::from_secs(30)), Duration::from_secs(1));
    }

    #[test]
    fn test_token_response_error_shape() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"errcode":40013,"errmsg":"invalid appid"}"#).unwrap();
        assert_eq!(parsed.errcode, 40013);
        assert!(parsed.access_token.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_errors() {
        let provider = CachedTokenProvider::new(reqwest::Client::new(), "http://unused", None, None);
        assert!(matches!(
            provider.token().await,
            Err(CredentialError::NotConfigured)
        ));
    }
}
