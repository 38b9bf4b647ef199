//! In-process fake of the experiment service
//!
//! Implements [`ExperimentService`] over a scripted lifecycle: every state or
//! trial read advances the experiment one tick, so harness polling drives the
//! fake forward exactly the way it would drive a real service's clock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use gantry::client::{ClientError, ExperimentService};
use gantry::config::ConfigDocument;
use gantry::harness::{ExperimentHarness, HarnessOptions};
use gantry::models::{ExperimentId, ExperimentState, Trial, TrialId, Workload, WorkloadKind};
use gantry::wait::WaitOptions;

/// Workload script every successful trial plays back.
pub const SUCCESS_SCRIPT: [(WorkloadKind, u64); 5] = [
    (WorkloadKind::Validation, 0),
    (WorkloadKind::Training, 1),
    (WorkloadKind::Training, 2),
    (WorkloadKind::Validation, 3),
    (WorkloadKind::Checkpoint, 4),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Completed,
    CredentialError,
}

struct FakeExperiment {
    config: ConfigDocument,
    state: ExperimentState,
    outcome: Outcome,
    tick: u32,
    trials: Vec<Trial>,
    logs: HashMap<TrialId, Vec<String>>,
}

#[derive(Default)]
struct FakeState {
    next_experiment_id: ExperimentId,
    next_trial_id: TrialId,
    experiments: HashMap<ExperimentId, FakeExperiment>,
}

/// Scripted stand-in for the remote experiment-management service.
#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        id: ExperimentId,
        target: ExperimentState,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let experiment = state
            .experiments
            .get_mut(&id)
            .ok_or(ClientError::NotFound { id })?;
        experiment.state = experiment
            .state
            .try_transition(target)
            .map_err(|err| ClientError::InvalidTransition {
                id,
                reason: err.to_string(),
            })?;
        Ok(())
    }

    /// An experiment only failing at checkpoint time has an S3 storage block
    /// with no credentials; everything else completes.
    fn outcome_for(config: &ConfigDocument) -> Outcome {
        let storage = &config["checkpoint_storage"];
        if storage["type"] == "s3" && storage.get("access_key").is_none() {
            Outcome::CredentialError
        } else {
            Outcome::Completed
        }
    }
}

impl FakeState {
    /// Advance one scripted tick. Only ACTIVE experiments make progress;
    /// paused and terminal experiments hold still.
    fn advance(&mut self, id: ExperimentId) {
        let Some(experiment) = self.experiments.get_mut(&id) else {
            return;
        };
        if experiment.state != ExperimentState::Active {
            return;
        }
        experiment.tick += 1;

        if experiment.tick == 1 {
            let max_trials = experiment
                .config
                .pointer("/searcher/max_trials")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            for _ in 0..max_trials {
                self.next_trial_id += 1;
                let trial_id = self.next_trial_id;
                experiment.trials.push(Trial::new(trial_id, id));
                experiment
                    .logs
                    .insert(trial_id, vec![format!("INFO: launching trial {trial_id}")]);
            }
        }

        match experiment.outcome {
            Outcome::Completed => {
                for trial in &mut experiment.trials {
                    let logs = experiment.logs.get_mut(&trial.id).unwrap();
                    if let Some(open) = trial.workloads.last_mut().filter(|w| !w.completed) {
                        open.completed = true;
                        if open.kind == WorkloadKind::Validation {
                            open.metrics
                                .insert("loss".to_string(), 1.0 / f64::from(experiment.tick));
                        }
                        logs.push(format!("{} {} complete", open.kind, open.sequence));
                    }
                    if let Some(&(kind, sequence)) = SUCCESS_SCRIPT.get(trial.workloads.len()) {
                        trial.try_push_workload(Workload::new(kind, sequence)).unwrap();
                        logs.push(format!("{kind} {sequence} started"));
                    }
                }
                let done = experiment.trials.iter().all(|t| {
                    t.workloads.len() == SUCCESS_SCRIPT.len()
                        && t.workloads.iter().all(|w| w.completed)
                });
                if done {
                    experiment.state = experiment
                        .state
                        .try_transition(ExperimentState::Completed)
                        .unwrap();
                }
            }
            Outcome::CredentialError => {
                if experiment.tick == 1 {
                    for trial in &mut experiment.trials {
                        trial
                            .try_push_workload(Workload::new(WorkloadKind::Training, 0))
                            .unwrap();
                    }
                } else {
                    for trial in &experiment.trials {
                        let logs = experiment.logs.get_mut(&trial.id).unwrap();
                        logs.push(
                            "NoCredentialsError: Unable to locate credentials".to_string(),
                        );
                        logs.push(format!("ERROR: trial {} exited", trial.id));
                    }
                    experiment.state = experiment
                        .state
                        .try_transition(ExperimentState::Error)
                        .unwrap();
                }
            }
        }
    }
}

impl ExperimentService for FakeService {
    fn create(
        &self,
        config: &ConfigDocument,
        activate: bool,
    ) -> Result<ExperimentId, ClientError> {
        if !config.is_object() {
            return Err(ClientError::InvalidConfig {
                reason: "config must be an object".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.next_experiment_id += 1;
        let id = state.next_experiment_id;
        state.experiments.insert(
            id,
            FakeExperiment {
                outcome: FakeService::outcome_for(config),
                config: config.clone(),
                state: if activate {
                    ExperimentState::Active
                } else {
                    ExperimentState::Created
                },
                tick: 0,
                trials: Vec::new(),
                logs: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn activate(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.transition(id, ExperimentState::Active)
    }

    fn pause(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.transition(id, ExperimentState::Paused)
    }

    fn cancel(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.transition(id, ExperimentState::Canceled)
    }

    fn get_state(&self, id: ExperimentId) -> Result<ExperimentState, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.advance(id);
        state
            .experiments
            .get(&id)
            .map(|e| e.state)
            .ok_or(ClientError::NotFound { id })
    }

    fn get_config(&self, id: ExperimentId) -> Result<ConfigDocument, ClientError> {
        let state = self.state.lock().unwrap();
        state
            .experiments
            .get(&id)
            .map(|e| e.config.clone())
            .ok_or(ClientError::NotFound { id })
    }

    fn get_trials(&self, id: ExperimentId) -> Result<Vec<Trial>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.advance(id);
        state
            .experiments
            .get(&id)
            .map(|e| e.trials.clone())
            .ok_or(ClientError::NotFound { id })
    }

    fn get_trial_logs(
        &self,
        trial: TrialId,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, ClientError> {
        let state = self.state.lock().unwrap();
        let logs = state
            .experiments
            .values()
            .find_map(|e| e.logs.get(&trial))
            .ok_or(ClientError::TrialNotFound { id: trial })?;

        match pattern {
            None => Ok(logs.clone()),
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|err| ClientError::MalformedResponse {
                    reason: format!("bad log pattern: {err}"),
                })?;
                Ok(logs.iter().filter(|l| regex.is_match(l)).cloned().collect())
            }
        }
    }
}

/// Harness over a fresh fake, polling fast enough to keep tests quick.
pub fn fake_harness() -> ExperimentHarness<FakeService> {
    gantry::profiling::init_test_logging();
    ExperimentHarness::with_options(
        FakeService::new(),
        HarnessOptions {
            wait: WaitOptions::new(Duration::from_secs(5), Duration::from_millis(2)),
            log_tail: 50,
        },
    )
}
