use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    InvalidRequest,
    Authentication,
    Throttled,
    Transport,
    Rejected,
    Backend,
    ProtocolViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub provider_code: Option<String>,
    pub http_status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_code: None,
            http_status: None,
        }
    }

    pub fn with_provider_code(mut self, provider_code: impl Into<String>) -> Self {
        self.provider_code = Some(provider_code.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.provider_code, self.http_status) {
            (Some(code), Some(status)) => {
                write!(f, "{} (provider_code={code}, http_status={status})", self.message)
            }
            (Some(code), None) => write!(f, "{} (provider_code={code})", self.message),
            (None, Some(status)) => write!(f, "{} (http_status={status})", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

pub fn invalid_request(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::InvalidRequest, message)
}

pub fn transport_error(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Transport, message)
}

pub fn protocol_violation(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderErrorKind::ProtocolViolation, message)
}

/// Maps an EC2 error response onto a kind. Throttling codes win over the
/// HTTP status because EC2 reports them as plain 400s.
pub fn classify_response_error(status: u16, code: Option<&str>) -> ProviderErrorKind {
    match code {
        Some("RequestLimitExceeded" | "Throttling" | "ThrottlingException") => {
            return ProviderErrorKind::Throttled;
        }
        Some(
            "AuthFailure" | "UnauthorizedOperation" | "InvalidClientTokenId"
            | "SignatureDoesNotMatch" | "OptInRequired",
        ) => return ProviderErrorKind::Authentication,
        _ => {}
    }

    match status {
        401 | 403 => ProviderErrorKind::Authentication,
        429 => ProviderErrorKind::Throttled,
        400..=499 => ProviderErrorKind::Rejected,
        _ => ProviderErrorKind::Backend,
    }
}
