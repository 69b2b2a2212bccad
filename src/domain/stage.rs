//! The three fixed stages of the event chain.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of stages in every pipeline run
pub const STAGE_COUNT: usize = 3;

/// One of the fixed transform steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Uppercases the seed payload
    One,

    /// Reverses the payload received from stage one
    Two,

    /// Lowercases the payload received from stage two; terminal
    Three,
}

impl Stage {
    /// All stages in chain order
    pub const ALL: [Stage; STAGE_COUNT] = [Stage::One, Stage::Two, Stage::Three];

    /// 1-based position in the chain
    pub fn index(self) -> usize {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Three => 3,
        }
    }

    /// Zero-based slot in a run's result array
    pub(crate) fn slot(self) -> usize {
        self.index() - 1
    }

    /// The stage this one forwards to, if any
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::One => Some(Stage::Two),
            Stage::Two => Some(Stage::Three),
            Stage::Three => None,
        }
    }

    /// Apply this stage's transform
    pub fn transform(self, payload: &str) -> String {
        match self {
            Stage::One => payload.to_uppercase(),
            Stage::Two => payload.chars().rev().collect(),
            Stage::Three => payload.to_lowercase(),
        }
    }

    /// Name used in logs and subjects
    pub fn listener_name(self) -> &'static str {
        match self {
            Stage::One => "listener1",
            Stage::Two => "listener2",
            Stage::Three => "listener3",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.listener_name())
    }
}

/// Output of one stage within one run. Written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// 1..=3
    pub stage_index: usize,

    /// Transformed payload
    pub payload: String,

    /// When the delivery was handled
    pub received_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage: Stage, payload: String) -> Self {
        Self {
            stage_index: stage.index(),
            payload,
            received_at: Utc::now(),
        }
    }
}
