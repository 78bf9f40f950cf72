use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{provider::ProviderError, session::SessionStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionErrorKind {
    Validation,
    Provider,
    RetryExhausted,
    NotFound,
    Store,
    AlreadyRunning,
    AttemptBudgetExhausted,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionError {
    pub kind: AcquisitionErrorKind,
    pub message: String,
    /// Underlying provider failure, kept for provider and retry-exhaustion kinds.
    pub provider_error: Option<ProviderError>,
}

impl AcquisitionError {
    pub fn new(kind: AcquisitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_error: None,
        }
    }

    pub fn with_provider_error(mut self, err: ProviderError) -> Self {
        self.provider_error = Some(err);
        self
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AcquisitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.provider_error
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<SessionStoreError> for AcquisitionError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound(session_id) => not_found(&session_id),
            other => AcquisitionError::new(AcquisitionErrorKind::Store, other.to_string()),
        }
    }
}

pub fn validation_error(message: impl Into<String>) -> AcquisitionError {
    AcquisitionError::new(AcquisitionErrorKind::Validation, message)
}

pub fn not_found(session_id: &str) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::NotFound,
        format!("no session found for session id '{session_id}'"),
    )
}

pub fn provider_failure(operation: &str, err: ProviderError) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::Provider,
        format!("provider {operation} failed: {err}"),
    )
    .with_provider_error(err)
}

pub fn retry_exhausted(allocation_id: &str, attempts: u32, last: ProviderError) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::RetryExhausted,
        format!("release of {allocation_id} failed after {attempts} attempts: {last}"),
    )
    .with_provider_error(last)
}

pub fn already_running(session_id: &str) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::AlreadyRunning,
        format!("session '{session_id}' already has an active run"),
    )
}

pub fn attempt_budget_exhausted(session_id: &str, limit: u64) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::AttemptBudgetExhausted,
        format!("session '{session_id}' reached the ceiling of {limit} acquisitions for one run"),
    )
}

pub fn shutting_down(session_id: &str) -> AcquisitionError {
    AcquisitionError::new(
        AcquisitionErrorKind::ShuttingDown,
        format!("service is shutting down; session '{session_id}' was not started"),
    )
}
