//! Error taxonomy for pipeline runs and boot-time recovery.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::{BusError, StoreError};
use crate::domain::Stage;

/// Errors produced by the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("eventName is a required request body parameter")]
    InvalidInput,

    #[error("{stage} could not subscribe: {source}")]
    Subscription {
        stage: Stage,
        #[source]
        source: BusError,
    },

    #[error("could not publish to '{subject}': {source}")]
    Publish {
        subject: String,
        #[source]
        source: BusError,
    },

    #[error("run {run_id} timed out after {elapsed_ms}ms ({completed} of 3 stages reported)")]
    Timeout {
        run_id: Uuid,
        elapsed_ms: u64,
        completed: usize,
    },

    #[error("could not persist run result: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("interrupt marker I/O failed: {0}")]
    Marker(#[source] std::io::Error),

    #[error("run {run_id} was cancelled before completion")]
    Cancelled { run_id: Uuid },

    #[error("run {run_id} completed without a result for every stage")]
    Incomplete { run_id: Uuid },
}

impl PipelineError {
    /// Stable classification used at the request boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput => ErrorKind::InvalidInput,
            PipelineError::Subscription { .. } => ErrorKind::Subscription,
            PipelineError::Publish { .. } => ErrorKind::Publish,
            PipelineError::Timeout { .. } | PipelineError::Cancelled { .. } => {
                ErrorKind::Timeout
            }
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Recovery(_) => ErrorKind::Recovery,
            PipelineError::Marker(_) | PipelineError::Incomplete { .. } => ErrorKind::Internal,
        }
    }
}

/// Coarse error classes, each mapped to its own response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid_input")]
    InvalidInput,
    #[serde(rename = "subscription_error")]
    Subscription,
    #[serde(rename = "publish_error")]
    Publish,
    #[serde(rename = "timeout_error")]
    Timeout,
    #[serde(rename = "storage_error")]
    Storage,
    #[serde(rename = "recovery_error")]
    Recovery,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for the response
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Storage => 500,
            ErrorKind::Publish => 502,
            ErrorKind::Subscription => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Recovery => 409,
            ErrorKind::Internal => 520,
        }
    }

    /// Process exit code for one-shot commands
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidInput => 2,
            ErrorKind::Subscription => 3,
            ErrorKind::Publish => 4,
            ErrorKind::Timeout => 5,
            ErrorKind::Storage => 6,
            ErrorKind::Recovery => 7,
            ErrorKind::Internal => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Subscription => "subscription_error",
            ErrorKind::Publish => "publish_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Recovery => "recovery_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run found in the interrupt marker that cannot be reconciled
#[derive(Debug, Clone, Error)]
pub enum RecoveryError {
    #[error("run {run_id} ('{event_name}') was in flight at shutdown and has no committed result; it is lost")]
    RunLost { run_id: Uuid, event_name: String },

    #[error("interrupt marker is not readable ({content:?}); the interrupted run cannot be identified")]
    UnreadableMarker { content: String },
}
