use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigDocument;
use crate::models::trial::Trial;

/// Identifier assigned by the experiment service at submission time.
pub type ExperimentId = u64;

/// A top-level unit of training work submitted to the service.
///
/// The harness never owns authoritative experiment state; instances of this
/// struct are snapshots of what the service reported at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub state: ExperimentState,
    pub config: ConfigDocument,
    #[serde(default)]
    pub trials: Vec<Trial>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State of an experiment in the service's lifecycle.
///
/// State machine transitions:
/// - `Created` → `Active` (activation) | `Canceled`
/// - `Active` → `Paused` | `Canceled` | `Completed` | `Error`
/// - `Paused` → `Active` (resume) | `Canceled` | `Error`
/// - `Completed`, `Canceled`, and `Error` are terminal states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    /// Experiment is registered but has not been activated.
    Created,

    /// Experiment is scheduled; trials are running or waiting for resources.
    Active,

    /// Experiment was paused by an operator; trials are suspended.
    Paused,

    /// Experiment was canceled before completing; terminal state.
    Canceled,

    /// All trials finished successfully; terminal state.
    Completed,

    /// A trial failed and the experiment stopped; terminal state.
    Error,
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentState::Created => write!(f, "CREATED"),
            ExperimentState::Active => write!(f, "ACTIVE"),
            ExperimentState::Paused => write!(f, "PAUSED"),
            ExperimentState::Canceled => write!(f, "CANCELED"),
            ExperimentState::Completed => write!(f, "COMPLETED"),
            ExperimentState::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for ExperimentState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(ExperimentState::Created),
            "ACTIVE" => Ok(ExperimentState::Active),
            "PAUSED" => Ok(ExperimentState::Paused),
            "CANCELED" | "CANCELLED" => Ok(ExperimentState::Canceled),
            "COMPLETED" => Ok(ExperimentState::Completed),
            "ERROR" => Ok(ExperimentState::Error),
            _ => anyhow::bail!(
                "Invalid experiment state: {s}. Valid values: CREATED, ACTIVE, PAUSED, CANCELED, COMPLETED, ERROR"
            ),
        }
    }
}

impl ExperimentState {
    /// Check whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentState::Canceled | ExperimentState::Completed | ExperimentState::Error
        )
    }

    /// Check if transitioning from the current state to the new state is valid.
    ///
    /// Same-state transitions are always valid (no-op); commands must be safe
    /// to retry under at-least-once delivery.
    pub fn can_transition_to(&self, new_state: &ExperimentState) -> bool {
        if self == new_state {
            return true;
        }

        match self {
            ExperimentState::Created => matches!(
                new_state,
                ExperimentState::Active | ExperimentState::Canceled
            ),
            ExperimentState::Active => matches!(
                new_state,
                ExperimentState::Paused
                    | ExperimentState::Canceled
                    | ExperimentState::Completed
                    | ExperimentState::Error
            ),
            ExperimentState::Paused => matches!(
                new_state,
                ExperimentState::Active | ExperimentState::Canceled | ExperimentState::Error
            ),
            // Terminal states
            ExperimentState::Canceled | ExperimentState::Completed | ExperimentState::Error => {
                false
            }
        }
    }

    /// Attempt to transition to a new state, returning an error if invalid.
    pub fn try_transition(&self, new_state: ExperimentState) -> Result<ExperimentState> {
        if self.can_transition_to(&new_state) {
            Ok(new_state)
        } else {
            bail!("Invalid experiment state transition: {self} -> {new_state}")
        }
    }

    /// Returns the list of states this state can transition to.
    pub fn valid_transitions(&self) -> Vec<ExperimentState> {
        match self {
            ExperimentState::Created => {
                vec![ExperimentState::Active, ExperimentState::Canceled]
            }
            ExperimentState::Active => vec![
                ExperimentState::Paused,
                ExperimentState::Canceled,
                ExperimentState::Completed,
                ExperimentState::Error,
            ],
            ExperimentState::Paused => vec![
                ExperimentState::Active,
                ExperimentState::Canceled,
                ExperimentState::Error,
            ],
            ExperimentState::Canceled | ExperimentState::Completed | ExperimentState::Error => {
                vec![]
            }
        }
    }
}

impl Experiment {
    pub fn new(id: ExperimentId, config: ConfigDocument) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ExperimentState::Created,
            config,
            trials: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt to transition the experiment to a new state with validation.
    pub fn try_transition(&mut self, new_state: ExperimentState) -> Result<()> {
        let validated = self.state.try_transition(new_state)?;
        self.state = validated;
        self.updated_at = Utc::now();
        Ok(())
    }
}
