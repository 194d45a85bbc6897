use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Deep-link target opened when the recipient taps the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    pub app_id: String,
    pub page_path: String,
}

/// A push request as it sits in the intake queue, delay store and dead-letter queue.
///
/// The serialized form is the message's only identity. Everything except
/// `retry_count` is fixed once the producer has enqueued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Producer-supplied key (e.g. a phone number) resolved to a gateway identity.
    pub target_key: String,
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<DeepLink>,
    #[serde(default)]
    pub retry_count: u32,
    /// Tenant/app partition for statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl QueuedMessage {
    /// Parse a raw queue entry.
    pub fn from_raw(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serialize back into a queue entry.
    pub fn to_raw(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Tenant id, treating an empty string as absent.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_minimal_payload() {
        let msg = QueuedMessage::from_raw(
            r#"{"target_key":"123","template_id":"T1","data":{"k":"v"}}"#,
        )
        .unwrap();
        assert_eq!(msg.retry_count, 0);
        assert!(msg.url.is_none());
        assert!(msg.deep_link.is_none());
        assert!(msg.tenant().is_none());
        assert_eq!(msg.data["k"], serde_json::json!("v"));
    }

    #[test]
    fn test_missing_data_is_rejected() {
        assert!(QueuedMessage::from_raw(r#"{"target_key":"123","template_id":"T1"}"#).is_err());
    }

    #[test]
    fn test_deep_link_and_tenant_survive_serialization() {
        let raw = r#"{"target_key":"123","template_id":"T1","data":{},
            "deep_link":{"app_id":"wx1","page_path":"pages/index"},
            "retry_count":3,"tenant_id":"acme"}"#;
        let msg = QueuedMessage::from_raw(raw).unwrap();
        let again = QueuedMessage::from_raw(&msg.to_raw().unwrap()).unwrap();
        assert_eq!(again, msg);
        assert_eq!(again.retry_count, 3);
        assert_eq!(again.tenant(), Some("acme"));
    }

    #[test]
    fn test_empty_tenant_is_none() {
        let msg = QueuedMessage::from_raw(
            r#"{"target_key":"1","template_id":"T","data":{},"tenant_id":""}"#,
        )
        .unwrap();
        assert!(msg.tenant().is_none());
    }
}
