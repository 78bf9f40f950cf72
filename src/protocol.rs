use serde::{Deserialize, Serialize};

use crate::{
    acquisition::{AcquisitionError, AcquisitionErrorKind, RunOutcome, RunReport},
    session::SessionStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub request_id: Option<String>,
    pub command: ClientCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Start {
        session_id: String,
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
        region: String,
    },
    Stop {
        session_id: String,
    },
    Status {
        session_id: String,
    },
}

impl ClientCommand {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Start { session_id, .. }
            | Self::Stop { session_id }
            | Self::Status { session_id } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Status { .. } => "status",
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
enum WireRequest {
    Start {
        #[serde(default)]
        request_id: Option<String>,
        session_id: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
        region: String,
    },
    Stop {
        #[serde(default)]
        request_id: Option<String>,
        session_id: String,
    },
    Status {
        #[serde(default)]
        request_id: Option<String>,
        session_id: String,
    },
}

pub fn parse_client_request(line: &str) -> Result<ClientRequest, serde_json::Error> {
    let wire: WireRequest = serde_json::from_str(line)?;
    let request = match wire {
        WireRequest::Start {
            request_id,
            session_id,
            access_key_id,
            secret_access_key,
            session_token,
            region,
        } => ClientRequest {
            request_id,
            command: ClientCommand::Start {
                session_id,
                access_key_id,
                secret_access_key,
                session_token,
                region,
            },
        },
        WireRequest::Stop {
            request_id,
            session_id,
        } => ClientRequest {
            request_id,
            command: ClientCommand::Stop { session_id },
        },
        WireRequest::Status {
            request_id,
            session_id,
        } => ClientRequest {
            request_id,
            command: ClientCommand::Status { session_id },
        },
    };
    Ok(request)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerResponse {
    RunFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        outcome: RunOutcome,
        batches: u32,
        acquisitions: u64,
        status: SessionStatus,
    },
    StopAcknowledged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        status: SessionStatus,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        status: SessionStatus,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
    },
}

impl ServerResponse {
    pub fn run_finished(request_id: Option<String>, report: RunReport) -> Self {
        Self::RunFinished {
            request_id,
            outcome: report.outcome,
            batches: report.batches,
            acquisitions: report.acquisitions,
            status: report.status,
        }
    }

    pub fn from_error(request_id: Option<String>, err: &AcquisitionError) -> Self {
        Self::Error {
            request_id,
            code: error_code(err.kind).to_string(),
            message: err.message.clone(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Error {
            request_id: None,
            code: "invalid_request".to_string(),
            message: message.into(),
        }
    }
}

pub fn error_code(kind: AcquisitionErrorKind) -> &'static str {
    match kind {
        AcquisitionErrorKind::Validation => "validation",
        AcquisitionErrorKind::Provider => "provider",
        AcquisitionErrorKind::RetryExhausted => "retry_exhausted",
        AcquisitionErrorKind::NotFound => "not_found",
        AcquisitionErrorKind::Store => "store",
        AcquisitionErrorKind::AlreadyRunning => "already_running",
        AcquisitionErrorKind::AttemptBudgetExhausted => "attempt_budget_exhausted",
        AcquisitionErrorKind::ShuttingDown => "shutting_down",
    }
}

pub fn encode_response(response: &ServerResponse) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_string(response)?;
    Ok(format!("{encoded}\n"))
}
