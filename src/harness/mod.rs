//! Experiment scenario orchestration
//!
//! Drives a remote experiment through its lifecycle and verifies what the
//! service reports along the way. The harness mirrors service state, it never
//! owns it: every decision is made from a fresh poll. All configuration is
//! explicit per harness instance; there are no ambient fixtures.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, ensure, Context, Result};
use tracing::{debug, info};

use crate::assertions::{
    assert_patterns_in_trial_logs, assert_performed_final_checkpoint,
    assert_performed_initial_validation, workloads_with_checkpoint, workloads_with_validation,
};
use crate::client::{ClientError, ExperimentService};
use crate::config::{config_fingerprint, load_config_file, ConfigDocument};
use crate::models::{Experiment, ExperimentId, ExperimentState, Trial, TrialId, WorkloadKind};
use crate::profiling::profile_test;
use crate::wait::{wait_until, CancelToken, WaitOptions};

/// Per-harness defaults, threaded explicitly into every operation.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub wait: WaitOptions,
    /// How many trailing log lines to attach to a failure report.
    pub log_tail: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            wait: WaitOptions::default(),
            log_tail: 50,
        }
    }
}

/// Orchestrates one test's view of the experiment service.
///
/// Concurrent harness instances are isolated by experiment id on the service
/// side; the only local state is the submission cache backing
/// [`maybe_create_experiment`].
pub struct ExperimentHarness<S: ExperimentService> {
    service: S,
    opts: HarnessOptions,
    cancel: CancelToken,
    submitted: Mutex<HashMap<String, ExperimentId>>,
}

impl<S: ExperimentService> ExperimentHarness<S> {
    pub fn new(service: S) -> Self {
        Self::with_options(service, HarnessOptions::default())
    }

    pub fn with_options(service: S, opts: HarnessOptions) -> Self {
        Self {
            service,
            opts,
            cancel: CancelToken::new(),
            submitted: Mutex::new(HashMap::new()),
        }
    }

    /// Token cancelling every wait issued through this harness.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    pub fn create_experiment(
        &self,
        config: &ConfigDocument,
        activate: bool,
    ) -> Result<ExperimentId> {
        let id = self
            .service
            .create(config, activate)
            .context("Failed to create experiment")?;
        info!(id, activate, "submitted experiment");
        Ok(id)
    }

    /// Create an activated experiment unless an equivalent one (by config
    /// fingerprint) was already submitted through this harness; returns the
    /// existing id in that case. Keeps idempotent test runs from piling up
    /// duplicate experiments on the service.
    pub fn maybe_create_experiment(&self, config: &ConfigDocument) -> Result<ExperimentId> {
        let fingerprint = config_fingerprint(config);

        let mut submitted = self
            .submitted
            .lock()
            .expect("submission cache lock poisoned");
        if let Some(id) = submitted.get(&fingerprint) {
            debug!(id, "reusing equivalent experiment");
            return Ok(*id);
        }

        let id = self.create_experiment(config, true)?;
        submitted.insert(fingerprint, id);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn activate_experiment(&self, id: ExperimentId) -> Result<()> {
        self.service
            .activate(id)
            .with_context(|| format!("Failed to activate experiment {id}"))
    }

    pub fn pause_experiment(&self, id: ExperimentId) -> Result<()> {
        self.service
            .pause(id)
            .with_context(|| format!("Failed to pause experiment {id}"))
    }

    pub fn cancel_experiment(&self, id: ExperimentId) -> Result<()> {
        self.service
            .cancel(id)
            .with_context(|| format!("Failed to cancel experiment {id}"))
    }

    /// Cancel one experiment and wait until the service confirms it.
    pub fn cancel_single(&self, id: ExperimentId) -> Result<()> {
        self.cancel_experiment(id)?;
        self.wait_for_experiment_state(id, ExperimentState::Canceled)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn experiment_state(&self, id: ExperimentId) -> Result<ExperimentState> {
        self.service
            .get_state(id)
            .with_context(|| format!("Failed to fetch state of experiment {id}"))
    }

    pub fn experiment_config_json(&self, id: ExperimentId) -> Result<ConfigDocument> {
        self.service
            .get_config(id)
            .with_context(|| format!("Failed to fetch config of experiment {id}"))
    }

    pub fn experiment_trials(&self, id: ExperimentId) -> Result<Vec<Trial>> {
        self.service
            .get_trials(id)
            .with_context(|| format!("Failed to fetch trials of experiment {id}"))
    }

    pub fn experiment_first_trial(&self, id: ExperimentId) -> Result<Trial> {
        let trials = self.experiment_trials(id)?;
        trials
            .into_iter()
            .next()
            .with_context(|| format!("Experiment {id} has no trials"))
    }

    /// Assemble a full experiment snapshot from the individual queries.
    ///
    /// Timestamps reflect fetch time; the service only exposes state, config,
    /// and trials through this client.
    pub fn experiment_snapshot(&self, id: ExperimentId) -> Result<Experiment> {
        let mut experiment = Experiment::new(id, self.experiment_config_json(id)?);
        experiment.state = self.experiment_state(id)?;
        experiment.trials = self.experiment_trials(id)?;
        Ok(experiment)
    }

    pub fn trial_logs(&self, trial: TrialId, pattern: Option<&str>) -> Result<Vec<String>> {
        self.service
            .get_trial_logs(trial, pattern)
            .with_context(|| format!("Failed to fetch logs of trial {trial}"))
    }

    pub fn experiment_has_active_workload(
        &self,
        id: ExperimentId,
        kind: WorkloadKind,
    ) -> Result<bool> {
        let trials = self.experiment_trials(id)?;
        Ok(trials.iter().any(|t| t.has_active_workload(kind)))
    }

    pub fn experiment_has_completed_workload(
        &self,
        id: ExperimentId,
        kind: WorkloadKind,
    ) -> Result<bool> {
        let trials = self.experiment_trials(id)?;
        Ok(trials.iter().any(|t| t.has_completed_workload(kind)))
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Wait until the experiment reaches `target`.
    ///
    /// Reaching a different terminal state is a failure, reported immediately
    /// with the experiment id and the trailing log lines rather than spinning
    /// until the timeout.
    pub fn wait_for_experiment_state(
        &self,
        id: ExperimentId,
        target: ExperimentState,
    ) -> Result<ExperimentState> {
        debug!(id, %target, "waiting for experiment state");
        let observed = wait_until(
            || self.service.get_state(id),
            |polled| match polled {
                Ok(state) => *state == target || state.is_terminal(),
                // Transient failures were already retried inside the client;
                // a hard error ends the wait.
                Err(err) => !err.is_transient(),
            },
            &self.opts.wait,
            &self.cancel,
        )
        .with_context(|| format!("Waiting for experiment {id} to reach {target}"))?;

        let state = observed.with_context(|| format!("Polling state of experiment {id}"))?;
        if state == target {
            return Ok(state);
        }

        let tail = self.tail_logs(id);
        bail!(
            "Experiment {id} reached terminal state {state} while waiting for {target}; last {} log lines:\n{}",
            tail.len(),
            tail.join("\n")
        );
    }

    /// Wait until some trial reports an unfinished workload of `kind`.
    pub fn wait_for_experiment_active_workload(
        &self,
        id: ExperimentId,
        kind: WorkloadKind,
    ) -> Result<()> {
        let observed = wait_until(
            || -> Result<bool, ClientError> {
                let trials = self.service.get_trials(id)?;
                Ok(trials.iter().any(|t| t.has_active_workload(kind)))
            },
            |polled| match polled {
                Ok(active) => *active,
                Err(err) => !err.is_transient(),
            },
            &self.opts.wait,
            &self.cancel,
        )
        .with_context(|| format!("Waiting for an active {kind} workload in experiment {id}"))?;

        observed.with_context(|| format!("Polling trials of experiment {id}"))?;
        Ok(())
    }

    /// Wait until a completed workload of `kind` has progressed past
    /// `min_progress` (by sequence number) in some trial.
    pub fn wait_for_experiment_workload_progress(
        &self,
        id: ExperimentId,
        kind: WorkloadKind,
        min_progress: u64,
    ) -> Result<()> {
        let observed = wait_until(
            || -> Result<Option<u64>, ClientError> {
                let trials = self.service.get_trials(id)?;
                Ok(trials.iter().filter_map(|t| t.progress_of(kind)).max())
            },
            |polled| match polled {
                Ok(Some(progress)) => *progress > min_progress,
                Ok(None) => false,
                Err(err) => !err.is_transient(),
            },
            &self.opts.wait,
            &self.cancel,
        )
        .with_context(|| {
            format!("Waiting for {kind} progress past {min_progress} in experiment {id}")
        })?;

        observed.with_context(|| format!("Polling trials of experiment {id}"))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    /// Submit an activated experiment, wait for COMPLETED, and verify trial
    /// count, per-trial workload composition, and checkpoint/validation
    /// behavior implied by the config.
    pub fn run_basic_test(
        &self,
        config: &ConfigDocument,
        expected_trials: usize,
        expected_workloads: usize,
    ) -> Result<ExperimentId> {
        let _profile = profile_test("run_basic_test");

        let id = self.create_experiment(config, true)?;
        self.wait_for_experiment_state(id, ExperimentState::Completed)?;

        let trials = self.experiment_trials(id)?;
        ensure!(
            trials.len() == expected_trials,
            "Experiment {id}: expected {expected_trials} trials, found {}",
            trials.len()
        );

        for trial in &trials {
            ensure!(
                trial.workloads.len() == expected_workloads,
                "Experiment {id} trial {}: expected {expected_workloads} workloads, found {}",
                trial.id,
                trial.workloads.len()
            );
            assert_performed_initial_validation(trial)
                .with_context(|| format!("Experiment {id} trial {}", trial.id))?;
        }

        if config.get("checkpoint_storage").is_some() {
            ensure!(
                !workloads_with_checkpoint(&trials).is_empty(),
                "Experiment {id}: checkpoint storage configured but no checkpoint workload ran"
            );
            // Initial-validation ordering is vacuous for a trial that never
            // trained past sequence 0, so demand a validation outright.
            ensure!(
                !workloads_with_validation(&trials).is_empty(),
                "Experiment {id}: checkpoint storage configured but no validation workload ran"
            );
            for trial in &trials {
                assert_performed_final_checkpoint(trial)
                    .with_context(|| format!("Experiment {id} trial {}", trial.id))?;
            }
        }

        info!(id, "basic scenario passed");
        Ok(id)
    }

    /// Like [`run_basic_test`], loading the experiment config from a YAML or
    /// JSON file first.
    pub fn run_basic_test_with_config_file(
        &self,
        path: &Path,
        expected_trials: usize,
        expected_workloads: usize,
    ) -> Result<ExperimentId> {
        let config = load_config_file(path)?;
        self.run_basic_test(&config, expected_trials, expected_workloads)
    }

    /// Like [`run_failure_test`], loading the experiment config from a YAML
    /// or JSON file first.
    pub fn run_failure_test_with_config_file(
        &self,
        path: &Path,
        expected_error_pattern: &str,
    ) -> Result<ExperimentId> {
        let config = load_config_file(path)?;
        self.run_failure_test(&config, expected_error_pattern)
    }

    /// Submit an experiment expected to fail, wait for ERROR, and verify the
    /// first trial's logs match `expected_error_pattern`.
    pub fn run_failure_test(
        &self,
        config: &ConfigDocument,
        expected_error_pattern: &str,
    ) -> Result<ExperimentId> {
        let _profile = profile_test("run_failure_test");

        let id = self.create_experiment(config, true)?;
        self.wait_for_experiment_state(id, ExperimentState::Error)?;

        let trial = self.experiment_first_trial(id)?;
        let logs = self.trial_logs(trial.id, None)?;
        assert_patterns_in_trial_logs(&logs, &[expected_error_pattern])
            .with_context(|| format!("Experiment {id} trial {} logs", trial.id))?;

        info!(id, "failure scenario passed");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Trailing log lines of the first trial, best effort; failure reports
    /// should never themselves fail on a diagnostics fetch.
    fn tail_logs(&self, id: ExperimentId) -> Vec<String> {
        let Ok(trials) = self.service.get_trials(id) else {
            return Vec::new();
        };
        let Some(first) = trials.first() else {
            return Vec::new();
        };
        let logs = self.service.get_trial_logs(first.id, None).unwrap_or_default();
        let skip = logs.len().saturating_sub(self.opts.log_tail);
        logs[skip..].to_vec()
    }
}
