//! Template-message gateway client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use beacon_common::types::QueuedMessage;

use crate::credential::CredentialProvider;
use crate::error::SendError;

const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Deep-link block of the outbound body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiniProgram {
    pub appid: String,
    pub pagepath: String,
}

/// Body posted to the gateway's template-send endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMessage {
    pub touser: String,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub data: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miniprogram: Option<MiniProgram>,
}

impl TemplateMessage {
    /// Address `msg` to the resolved gateway identity.
    pub fn build(msg: &QueuedMessage, opaque_id: impl Into<String>) -> Self {
        Self {
            touser: opaque_id.into(),
            template_id: msg.template_id.clone(),
            url: msg.url.clone().filter(|u| !u.is_empty()),
            data: msg.data.clone(),
            miniprogram: msg.deep_link.as_ref().map(|link| MiniProgram {
                appid: link.app_id.clone(),
                pagepath: link.page_path.clone(),
            }),
        }
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, msg: &TemplateMessage) -> Result<(), SendError>;
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// HTTP gateway. Transport failures are retried once; vendor errors are not.
pub struct HttpGateway {
    http: reqwest::Client,
    send_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            send_url: format!(
                "{}/cgi-bin/message/template/send",
                base_url.trim_end_matches('/')
            ),
            credentials,
        }
    }

    async fn post(
        &self,
        token: &str,
        msg: &TemplateMessage,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(&self.send_url)
            .query(&[("access_token", token)])
            .json(msg)
            .send()
            .await
    }
}

#[async_trait]
impl PushGateway for HttpGateway {
    async fn send(&self, msg: &TemplateMessage) -> Result<(), SendError> {
        let token = self.credentials.token().await?;

        let response = match self.post(&token, msg).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway request failed, retrying once");
                tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                self.post(&token, msg)
                    .await
                    .map_err(|e| SendError::Transport(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Transport(format!("gateway returned HTTP {}", status)));
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| SendError::Transport(format!("unreadable gateway response: {}", e)))?;

        if body.errcode != 0 {
            return Err(SendError::Gateway {
                code: body.errcode,
                message: body.errmsg,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use beacon_common::types::DeepLink;

    use super::*;

    fn queued() -> QueuedMessage {
        QueuedMessage {
            target_key: "13800000000".to_string(),
            template_id: "TPL".to_string(),
            url: Some(String::new()),
            data: HashMap::from([(
                "first".to_string(),
                serde_json::json!({"value": "hello"}),
            )]),
            deep_link: Some(DeepLink {
                app_id: "wx123".to_string(),
                page_path: "pages/order?id=1".to_string(),
            }),
            retry_count: 2,
            tenant_id: None,
        }
    }

    #[test]
    fn test_build_addresses_opaque_id() {
        let msg = TemplateMessage::build(&queued(), "oABC");
        assert_eq!(msg.touser, "oABC");
        assert_eq!(msg.template_id, "TPL");
        assert!(msg.url.is_none());
        assert_eq!(msg.miniprogram.as_ref().unwrap().appid, "wx123");
    }

    #[test]
    fn test_outbound_body_shape() {
        let body = serde_json::to_value(TemplateMessage::build(&queued(), "oABC")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "touser": "oABC",
                "template_id": "TPL",
                "data": {"first": {"value": "hello"}},
                "miniprogram": {"appid": "wx123", "pagepath": "pages/order?id=1"}
            })
        );
    }

    #[test]
    fn test_response_defaults_to_success() {
        let parsed: GatewayResponse = serde_json::from_str(r#"{"msgid": 1}"#).unwrap();
        assert_eq!(parsed.errcode, 0);
    }
}
