//! Request boundary: maps requests to runs and run outcomes to responses.
//!
//! Success carries the assembled record; every error kind gets its own
//! status code.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{ErrorKind, Orchestrator, PipelineError};
use crate::domain::{EventRequest, PipelineResult};

/// Failure body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub status: u16,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(err: &PipelineError) -> Self {
        let kind = err.kind();
        Self {
            error: kind,
            message: err.to_string(),
            status: kind.status_code(),
        }
    }
}

/// One response per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok {
        #[serde(rename = "eventResponse")]
        event_response: PipelineResult,
    },
    Err(ErrorResponse),
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Ok { .. } => 200,
            Response::Err(e) => e.status,
        }
    }
}

/// Run one request to completion
pub async fn handle(orchestrator: &Orchestrator, request: EventRequest) -> Response {
    match orchestrator.run(request.into_event()).await {
        Ok(result) => Response::Ok {
            event_response: result,
        },
        Err(e) => {
            let response = ErrorResponse::from(&e);
            info!(status = response.status, error = %response.error, "request failed");
            Response::Err(response)
        }
    }
}

/// Parse one JSON request line. Malformed bodies are invalid input.
pub fn parse_request(line: &str) -> Result<EventRequest, ErrorResponse> {
    serde_json::from_str(line).map_err(|e| {
        let kind = ErrorKind::InvalidInput;
        ErrorResponse {
            error: kind,
            message: format!("invalid request: {}", e),
            status: kind.status_code(),
        }
    })
}
