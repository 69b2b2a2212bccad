//! Publish/subscribe messaging.
//!
//! The orchestrator talks to the transport only through [`MessageBus`].
//! Deliveries are assumed at-least-once with no ordering across subjects.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::Stage;

pub use memory::InMemoryBus;

/// Root of every pipeline subject
pub const SUBJECT_ROOT: &str = "events.chain";

/// Messaging errors
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("subscriber on '{subject}' is not keeping up")]
    SlowConsumer { subject: String },

    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },
}

/// A validated, dot-separated subject name (NATS style, no wildcards)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject(String);

impl Subject {
    /// Validate and wrap a subject name
    pub fn new(name: impl Into<String>) -> Result<Self, BusError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), BusError> {
        let invalid = |reason: &str| BusError::InvalidSubject {
            subject: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("empty subject"));
        }
        for segment in name.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(invalid("segments may only contain [A-Za-z0-9_-]"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three subjects of one run.
///
/// The run id is embedded as a subject segment, so concurrent runs never
/// observe each other's messages.
#[derive(Debug, Clone)]
pub struct StageSubjects {
    subjects: [Subject; 3],
}

impl StageSubjects {
    pub fn for_run(run_id: Uuid) -> Self {
        let base = format!("{}.{}", SUBJECT_ROOT, run_id);
        // UUIDs render as hex and hyphens, always a valid segment
        let subjects = [
            Subject(base.clone()),
            Subject(format!("{}.{}", base, Stage::Two.listener_name())),
            Subject(format!("{}.{}", base, Stage::Three.listener_name())),
        ];
        Self { subjects }
    }

    /// Subject the given stage listens on
    pub fn subject(&self, stage: Stage) -> &Subject {
        &self.subjects[stage.index() - 1]
    }
}

/// A single delivery
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: Subject,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(subject: Subject, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }

    /// Payload as text; invalid UTF-8 is replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

type UnsubscribeFn = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    subject: Subject,
    receiver: mpsc::Receiver<Message>,
    on_drop: Option<UnsubscribeFn>,
}

impl Subscription {
    pub fn new(subject: Subject, receiver: mpsc::Receiver<Message>) -> Self {
        Self {
            subject,
            receiver,
            on_drop: None,
        }
    }

    /// Register cleanup to run when the subscription is dropped
    pub fn on_unsubscribe<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.on_drop = Some(Box::new(f));
        self
    }

    /// Next delivery, or `None` once the transport side is gone
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Messaging transport used by the orchestrator and stage handlers.
///
/// Implementations must be safe for concurrent use across runs.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Register interest in a subject
    async fn subscribe(&self, subject: &Subject) -> Result<Subscription, BusError>;

    /// Publish a payload to every current subscriber of `subject`
    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<(), BusError>;
}
