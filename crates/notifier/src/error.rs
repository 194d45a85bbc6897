use thiserror::Error;

/// Failure fetching a gateway bearer token.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token endpoint returned {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("Gateway credentials are not configured")]
    NotConfigured,
}

/// Failure of one gateway send.
#[derive(Debug, Error)]
pub enum SendError {
    /// Structured vendor error carried in the response body.
    #[error("Gateway error {code}: {message}")]
    Gateway { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Resolver request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No identity found for target {0}")]
    NotFound(String),

    #[error("Identity resolver is not configured")]
    NotConfigured,
}

/// A failed write to the statistics store. Always logged and swallowed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stat record: {0}")]
    Invalid(String),
}

/// Why a message was not delivered on this attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Target {0} blocked by policy")]
    PolicyBlocked(String),

    #[error("Identity resolution failed: {0}")]
    IdentityResolution(#[from] ResolveError),

    #[error("Gateway error {code}: {message}")]
    Gateway { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<SendError> for DeliveryError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Gateway { code, message } => DeliveryError::Gateway { code, message },
            SendError::Transport(msg) => DeliveryError::Transport(msg),
            SendError::Credential(e) => DeliveryError::Transport(e.to_string()),
        }
    }
}

impl DeliveryError {
    /// Whether the message goes through the delay/dead-letter transition.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::IdentityResolution(_)
                | DeliveryError::Gateway { .. }
                | DeliveryError::Transport(_)
        )
    }

    /// Failure-reason label recorded in statistics. `None` for policy drops,
    /// which are not failures.
    pub fn reason(&self) -> Option<String> {
        match self {
            DeliveryError::MalformedMessage(_) => Some("invalid_json".to_string()),
            DeliveryError::PolicyBlocked(_) => None,
            DeliveryError::IdentityResolution(_) => Some("resolve_error".to_string()),
            DeliveryError::Gateway { code, .. } => Some(gateway_reason(*code)),
            DeliveryError::Transport(_) => Some("send_error".to_string()),
        }
    }
}

/// Map a vendor error code to a reason label.
pub fn gateway_reason(code: i64) -> String {
    match code {
        40003 => "invalid_target".to_string(),
        43004 => "target_not_subscribed".to_string(),
        42001 => "credential_expired".to_string(),
        other => format!("vendor_{}", other),
    }
}
