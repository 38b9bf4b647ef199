use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::experiment::ExperimentId;

/// Identifier assigned by the experiment service when a trial starts.
pub type TrialId = u64;

/// One concrete run of an experiment, composed of an ordered workload sequence.
///
/// Holds only the owning experiment's id, not the experiment itself; trials
/// are fetched independently and resolved back by lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub experiment_id: ExperimentId,
    #[serde(default)]
    pub workloads: Vec<Workload>,
}

/// Kind of an atomic unit of trial execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadKind {
    /// A batch of training steps.
    Training,
    /// A validation pass over the validation set.
    Validation,
    /// A persisted snapshot of trial state.
    Checkpoint,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Training => write!(f, "TRAINING"),
            WorkloadKind::Validation => write!(f, "VALIDATION"),
            WorkloadKind::Checkpoint => write!(f, "CHECKPOINT"),
        }
    }
}

/// An atomic unit of trial execution as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub kind: WorkloadKind,
    /// Position in the trial's workload sequence; strictly increasing.
    pub sequence: u64,
    /// Whether the workload finished. An incomplete workload is the trial's
    /// currently active one.
    pub completed: bool,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl Workload {
    pub fn new(kind: WorkloadKind, sequence: u64) -> Self {
        Self {
            kind,
            sequence,
            completed: false,
            metrics: HashMap::new(),
        }
    }

    pub fn completed(kind: WorkloadKind, sequence: u64) -> Self {
        Self {
            kind,
            sequence,
            completed: true,
            metrics: HashMap::new(),
        }
    }
}

impl Trial {
    pub fn new(id: TrialId, experiment_id: ExperimentId) -> Self {
        Self {
            id,
            experiment_id,
            workloads: Vec::new(),
        }
    }

    /// Append a workload, enforcing the strictly increasing sequence invariant.
    pub fn try_push_workload(&mut self, workload: Workload) -> Result<()> {
        if let Some(last) = self.workloads.last() {
            if workload.sequence <= last.sequence {
                bail!(
                    "Workload sequence must be strictly increasing in trial {}: {} after {}",
                    self.id,
                    workload.sequence,
                    last.sequence
                );
            }
        }
        self.workloads.push(workload);
        Ok(())
    }

    pub fn last_workload(&self) -> Option<&Workload> {
        self.workloads.last()
    }

    /// Workloads of the given kind, in sequence order.
    pub fn workloads_of(&self, kind: WorkloadKind) -> impl Iterator<Item = &Workload> {
        self.workloads.iter().filter(move |w| w.kind == kind)
    }

    /// Whether the trial has an unfinished workload of the given kind.
    pub fn has_active_workload(&self, kind: WorkloadKind) -> bool {
        self.workloads_of(kind).any(|w| !w.completed)
    }

    /// Whether the trial has a finished workload of the given kind.
    pub fn has_completed_workload(&self, kind: WorkloadKind) -> bool {
        self.workloads_of(kind).any(|w| w.completed)
    }

    /// Highest sequence number among completed workloads of the given kind,
    /// or `None` when none have completed.
    pub fn progress_of(&self, kind: WorkloadKind) -> Option<u64> {
        self.workloads_of(kind)
            .filter(|w| w.completed)
            .map(|w| w.sequence)
            .max()
    }
}
