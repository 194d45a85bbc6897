use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// Maps a producer's target key to the gateway's opaque recipient id.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, target_key: &str) -> Result<String, ResolveError>;
}

#[derive(Serialize)]
struct ResolveRequest<'a> {
    target_key: &'a str,
}

#[derive(Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Resolver backed by an HTTP lookup service: `POST {"target_key"}` -> `{"id"}`.
pub struct HttpIdentityResolver {
    http: reqwest::Client,
    url: Option<String>,
}

impl HttpIdentityResolver {
    pub fn new(http: reqwest::Client, url: Option<String>) -> Self {
        if url.is_none() {
            tracing::warn!("RESOLVER_URL not set, every identity lookup will fail");
        }
        Self { http, url }
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, target_key: &str) -> Result<String, ResolveError> {
        let url = self.url.as_deref().ok_or(ResolveError::NotConfigured)?;

        let response: ResolveResponse = self
            .http
            .post(url)
            .json(&ResolveRequest { target_key })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ResolveError::NotFound(target_key.to_string()))
    }
}
