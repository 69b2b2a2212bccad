//! Final output of a completed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::StageResults;

/// The assembled record of a completed pipeline run.
///
/// Serialized as `{runId, listener1, listener2, listener3, eventTime}` and
/// persisted as one row of the `events` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Correlation id of the run that produced this record
    pub run_id: Uuid,

    pub listener1: String,
    pub listener2: String,
    pub listener3: String,

    /// Completion time
    pub event_time: DateTime<Utc>,
}

impl PipelineResult {
    /// Assemble a result from a full set of stage results.
    ///
    /// Returns `None` if any stage is missing.
    pub fn assemble(run_id: Uuid, results: StageResults) -> Option<Self> {
        let [one, two, three] = results;
        Some(Self {
            run_id,
            listener1: one?.payload,
            listener2: two?.payload,
            listener3: three?.payload,
            event_time: Utc::now(),
        })
    }
}
