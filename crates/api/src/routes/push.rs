//! Push ingestion route.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use beacon_common::error::AppError;
use beacon_common::types::{DeepLink, QueuedMessage};

use crate::middleware::ip_allowlist::AllowedClient;
use crate::state::AppState;

/// Header carrying the tenant id when the body does not.
pub const TENANT_HEADER: &str = "x-app-id";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/push", post(push_message))
}

/// Request body. Missing required fields are reported as validation errors
/// rather than deserialization failures.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub target_key: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub deep_link: Option<DeepLink>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl PushRequest {
    /// Validate and convert into a fresh queue entry (retry count zero).
    pub fn into_message(self, header_tenant: Option<String>) -> Result<QueuedMessage, AppError> {
        let target_key = self.target_key.trim().to_string();
        if target_key.is_empty() {
            return Err(AppError::Validation("target_key is required".to_string()));
        }
        if self.template_id.trim().is_empty() {
            return Err(AppError::Validation("template_id is required".to_string()));
        }
        let data = self
            .data
            .ok_or_else(|| AppError::Validation("data is required".to_string()))?;
        if let Some(link) = &self.deep_link
            && (link.app_id.is_empty() || link.page_path.is_empty())
        {
            return Err(AppError::Validation(
                "deep_link requires app_id and page_path".to_string(),
            ));
        }

        let tenant_id = self
            .tenant_id
            .filter(|t| !t.is_empty())
            .or(header_tenant.filter(|t| !t.is_empty()));

        Ok(QueuedMessage {
            target_key,
            template_id: self.template_id,
            url: self.url.filter(|u| !u.is_empty()),
            data,
            deep_link: self.deep_link,
            retry_count: 0,
            tenant_id,
        })
    }
}

/// POST /api/push: validate a push request and append it to the intake queue.
async fn push_message(
    State(state): State<AppState>,
    client: AllowedClient,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let header_tenant = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string());
    let message = request.into_message(header_tenant)?;

    if !state.policy.permits(&message.target_key) {
        tracing::warn!(
            client_ip = ?client.ip,
            target_key = %message.target_key,
            "Rejected push to blocked target"
        );
        return Err(AppError::Forbidden(format!(
            "target {} is not allowed",
            message.target_key
        )));
    }

    let raw = message
        .to_raw()
        .map_err(|e| AppError::Internal(format!("Failed to serialize message: {}", e)))?;
    state.intake.push(&raw).await?;

    tracing::info!(
        client_ip = ?client.ip,
        target_key = %message.target_key,
        template_id = %message.template_id,
        tenant_id = ?message.tenant(),
        "Message queued"
    );
    Ok(Json(json!({ "message": "queued" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: serde_json::Value) -> PushRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let err = request(json!({"template_id": "T1", "data": {}}))
            .into_message(None)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = request(json!({"target_key": "123", "template_id": "T1"}))
            .into_message(None)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_retry_count_is_always_reset() {
        let msg = request(json!({
            "target_key": "123",
            "template_id": "T1",
            "data": {"k": "v"},
            "retry_count": 4
        }))
        .into_message(None)
        .unwrap();
        assert_eq!(msg.retry_count, 0);
    }

    #[test]
    fn test_body_tenant_wins_over_header() {
        let body = json!({"target_key": "1", "template_id": "T", "data": {}, "tenant_id": "acme"});
        let msg = request(body).into_message(Some("other".to_string())).unwrap();
        assert_eq!(msg.tenant(), Some("acme"));

        let body = json!({"target_key": "1", "template_id": "T", "data": {}});
        let msg = request(body).into_message(Some("other".to_string())).unwrap();
        assert_eq!(msg.tenant(), Some("other"));
    }
}
