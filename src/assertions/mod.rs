//! Behavioral assertions over harness-observed data
//!
//! Pure predicates and checks over trials, workloads, and log lines fetched
//! from the service. Failures carry expected vs actual so a test report is
//! actionable without re-running the scenario.

use regex::Regex;
use thiserror::Error;

use crate::models::{Trial, TrialId, Workload, WorkloadKind};

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("trials {a} and {b} are not equivalent: {detail}")]
    TrialsNotEquivalent { a: TrialId, b: TrialId, detail: String },

    #[error("trial {trial}: expected final workload to be a completed CHECKPOINT, found {found}")]
    MissingFinalCheckpoint { trial: TrialId, found: String },

    #[error("trial {trial}: expected a VALIDATION workload before the first TRAINING workload, found TRAINING at sequence {training_sequence} first")]
    MissingInitialValidation { trial: TrialId, training_sequence: u64 },

    #[error("pattern {pattern:?} matched none of {lines} log lines")]
    PatternNotMatched { pattern: String, lines: usize },

    #[error("invalid log pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Assert two trials ran structurally equal workload sequences.
///
/// Compares kind, sequence number, and completion status pairwise; ignores
/// trial ids, metrics values, and anything time-dependent.
pub fn assert_equivalent_trials(a: &Trial, b: &Trial) -> Result<(), AssertionError> {
    if a.workloads.len() != b.workloads.len() {
        return Err(AssertionError::TrialsNotEquivalent {
            a: a.id,
            b: b.id,
            detail: format!(
                "workload counts differ: {} vs {}",
                a.workloads.len(),
                b.workloads.len()
            ),
        });
    }

    for (left, right) in a.workloads.iter().zip(&b.workloads) {
        if left.kind != right.kind
            || left.sequence != right.sequence
            || left.completed != right.completed
        {
            return Err(AssertionError::TrialsNotEquivalent {
                a: a.id,
                b: b.id,
                detail: format!(
                    "workload mismatch at sequence {}: {:?}/{}/completed={} vs {:?}/{}/completed={}",
                    left.sequence,
                    left.kind,
                    left.sequence,
                    left.completed,
                    right.kind,
                    right.sequence,
                    right.completed
                ),
            });
        }
    }

    Ok(())
}

/// Assert the trial's last workload is a completed checkpoint, i.e. the
/// service checkpointed before declaring the trial done.
pub fn assert_performed_final_checkpoint(trial: &Trial) -> Result<(), AssertionError> {
    match trial.last_workload() {
        Some(last) if last.kind == WorkloadKind::Checkpoint && last.completed => Ok(()),
        Some(last) => Err(AssertionError::MissingFinalCheckpoint {
            trial: trial.id,
            found: format!("{} (completed={})", last.kind, last.completed),
        }),
        None => Err(AssertionError::MissingFinalCheckpoint {
            trial: trial.id,
            found: "no workloads".to_string(),
        }),
    }
}

/// Assert the trial validated before it trained.
///
/// Passes when the first VALIDATION workload precedes the first TRAINING
/// workload with sequence number > 0, or when no such TRAINING has happened
/// yet.
pub fn assert_performed_initial_validation(trial: &Trial) -> Result<(), AssertionError> {
    let first_training = trial
        .workloads_of(WorkloadKind::Training)
        .map(|w| w.sequence)
        .find(|sequence| *sequence > 0);

    let Some(training_sequence) = first_training else {
        return Ok(());
    };

    let validated_before = trial
        .workloads_of(WorkloadKind::Validation)
        .any(|w| w.sequence < training_sequence);

    if validated_before {
        Ok(())
    } else {
        Err(AssertionError::MissingInitialValidation {
            trial: trial.id,
            training_sequence,
        })
    }
}

/// Substring presence over raw trial log lines.
pub fn check_if_string_present_in_trial_logs(logs: &[String], needle: &str) -> bool {
    logs.iter().any(|line| line.contains(needle))
}

/// Assert every pattern matches at least one log line, in any order.
pub fn assert_patterns_in_trial_logs(
    logs: &[String],
    patterns: &[&str],
) -> Result<(), AssertionError> {
    for pattern in patterns {
        let regex = Regex::new(pattern).map_err(|source| AssertionError::InvalidPattern {
            pattern: (*pattern).to_string(),
            source,
        })?;
        if !logs.iter().any(|line| regex.is_match(line)) {
            return Err(AssertionError::PatternNotMatched {
                pattern: (*pattern).to_string(),
                lines: logs.len(),
            });
        }
    }
    Ok(())
}

/// All checkpoint workloads across the given trials, in trial order.
pub fn workloads_with_checkpoint(trials: &[Trial]) -> Vec<&Workload> {
    workloads_of_kind(trials, WorkloadKind::Checkpoint)
}

/// All training workloads across the given trials, in trial order.
pub fn workloads_with_training(trials: &[Trial]) -> Vec<&Workload> {
    workloads_of_kind(trials, WorkloadKind::Training)
}

/// All validation workloads across the given trials, in trial order.
pub fn workloads_with_validation(trials: &[Trial]) -> Vec<&Workload> {
    workloads_of_kind(trials, WorkloadKind::Validation)
}

fn workloads_of_kind(trials: &[Trial], kind: WorkloadKind) -> Vec<&Workload> {
    trials
        .iter()
        .flat_map(|trial| trial.workloads_of(kind))
        .collect()
}

/// Metrics reported by the trial's completed workloads, in sequence order.
pub fn trial_metrics(trial: &Trial) -> Vec<&std::collections::HashMap<String, f64>> {
    trial
        .workloads
        .iter()
        .filter(|w| w.completed && !w.metrics.is_empty())
        .map(|w| &w.metrics)
        .collect()
}
