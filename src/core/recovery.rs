//! Boot-time reconciliation of the interrupt marker.
//!
//! A non-empty marker means runs were inside their publish/persist window
//! when the process last stopped. Each such run either committed its row
//! before the crash (nothing to do) or is lost. Lost runs are reported,
//! never replayed: replaying the seed publish could duplicate messages the
//! first attempt already delivered.
//!
//! The marker is cleared only after every entry has been classified. If the
//! store cannot be queried, the scan fails and the marker is left in place
//! for the next boot.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::ResultStore;
use crate::domain::PipelineResult;

use super::error::{PipelineError, RecoveryError};
use super::marker::{InterruptMarker, MarkerContents, MarkerEntry};

/// Result of a boot-time scan
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Whether the marker was non-empty at boot
    pub interrupted: bool,

    /// Runs whose result was committed before the interruption
    pub reconciled: Vec<MarkerEntry>,

    /// Runs that cannot be recovered
    pub lost: Vec<RecoveryError>,
}

impl RecoveryReport {
    /// Clean prior shutdown
    pub fn is_clean(&self) -> bool {
        !self.interrupted
    }
}

/// Reads the interrupt marker once and reconciles it with the store
pub struct RecoveryScanner {
    marker: Arc<InterruptMarker>,
    store: Arc<dyn ResultStore>,
}

impl RecoveryScanner {
    pub fn new(marker: Arc<InterruptMarker>, store: Arc<dyn ResultStore>) -> Self {
        Self { marker, store }
    }

    /// Run the scan. Consumes the scanner: the marker is read exactly once.
    pub async fn scan(self) -> Result<RecoveryReport, PipelineError> {
        let contents = self.marker.read().await.map_err(PipelineError::Marker)?;

        let mut report = RecoveryReport {
            interrupted: !contents.is_empty(),
            ..Default::default()
        };

        match contents {
            MarkerContents::Empty => {
                info!("interrupt marker empty, previous shutdown was clean");
                return Ok(report);
            }
            MarkerContents::Unreadable(content) => {
                report.lost.push(RecoveryError::UnreadableMarker { content });
            }
            MarkerContents::Entries(entries) => {
                warn!(in_flight = entries.len(), "interrupt marker set, reconciling");
                let latest = self.store.latest().await?;
                for entry in entries {
                    if self.is_committed(&entry, latest.as_ref()).await? {
                        info!(run_id = %entry.run_id, event = %entry.event_name, "run committed before interruption");
                        report.reconciled.push(entry);
                    } else {
                        report.lost.push(RecoveryError::RunLost {
                            run_id: entry.run_id,
                            event_name: entry.event_name,
                        });
                    }
                }
            }
        }

        for lost in &report.lost {
            let err = PipelineError::Recovery(lost.clone());
            error!(error = %err, "unrecoverable run");
        }

        self.marker.clear().await.map_err(PipelineError::Marker)?;
        info!(
            reconciled = report.reconciled.len(),
            lost = report.lost.len(),
            "interrupt marker cleared"
        );
        Ok(report)
    }

    async fn is_committed(
        &self,
        entry: &MarkerEntry,
        latest: Option<&PipelineResult>,
    ) -> Result<bool, PipelineError> {
        if latest.is_some_and(|row| row.run_id == entry.run_id) {
            return Ok(true);
        }
        Ok(self.store.find(entry.run_id).await?.is_some())
    }
}

/// Run ids of lost runs, for reporting
pub fn lost_run_ids(report: &RecoveryReport) -> Vec<Uuid> {
    report
        .lost
        .iter()
        .filter_map(|e| match e {
            RecoveryError::RunLost { run_id, .. } => Some(*run_id),
            RecoveryError::UnreadableMarker { .. } => None,
        })
        .collect()
}
