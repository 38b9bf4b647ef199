//! Failure-path scenarios: service errors, bad transitions, failure reports

use gantry::assertions::check_if_string_present_in_trial_logs;
use gantry::models::ExperimentState;

use crate::fixtures::{s3_no_creds_config, shared_fs_config, EXPECTED_WORKLOADS};
use crate::helpers::fake_harness;

#[test]
fn s3_without_credentials_reaches_error_with_credential_logs() {
    let harness = fake_harness();
    let id = harness
        .run_failure_test(&s3_no_creds_config(), "[Cc]redentials")
        .unwrap();

    assert_eq!(harness.experiment_state(id).unwrap(), ExperimentState::Error);

    let trial = harness.experiment_first_trial(id).unwrap();
    let logs = harness.trial_logs(trial.id, None).unwrap();
    assert!(check_if_string_present_in_trial_logs(
        &logs,
        "Unable to locate credentials"
    ));
}

#[test]
fn unexpected_terminal_state_is_reported_with_id_and_log_tail() {
    let harness = fake_harness();
    // Expecting COMPLETED from a config scripted to fail.
    let err = harness
        .run_basic_test(&s3_no_creds_config(), 1, EXPECTED_WORKLOADS)
        .unwrap_err();

    let report = format!("{err:#}");
    assert!(report.contains("ERROR"), "missing terminal state: {report}");
    assert!(report.contains("COMPLETED"), "missing expectation: {report}");
    assert!(
        report.contains("Unable to locate credentials"),
        "missing log tail: {report}"
    );
}

#[test]
fn failure_test_loads_config_from_yaml_file() {
    use std::io::Write;

    let harness = fake_harness();

    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    let yaml = serde_yaml::to_string(&s3_no_creds_config()).unwrap();
    write!(file, "{yaml}").unwrap();

    let id = harness
        .run_failure_test_with_config_file(file.path(), "[Cc]redentials")
        .unwrap();
    assert_eq!(harness.experiment_state(id).unwrap(), ExperimentState::Error);
}

#[test]
fn failure_test_on_healthy_experiment_fails() {
    let harness = fake_harness();
    let err = harness
        .run_failure_test(&shared_fs_config(1), "credentials")
        .unwrap_err();
    // The experiment completed instead of erroring.
    assert!(format!("{err:#}").contains("COMPLETED"));
}

#[test]
fn unknown_experiment_is_not_found() {
    let harness = fake_harness();
    let err = harness.experiment_state(9999).unwrap_err();
    assert!(format!("{err:#}").contains("not found"));
}

#[test]
fn pausing_an_unactivated_experiment_is_an_invalid_transition() {
    let harness = fake_harness();
    let id = harness
        .create_experiment(&shared_fs_config(1), false)
        .unwrap();

    let err = harness.pause_experiment(id).unwrap_err();
    let report = format!("{err:#}");
    assert!(report.contains("invalid transition"), "{report}");
    assert!(report.contains(&id.to_string()), "{report}");
}

#[test]
fn non_object_config_is_rejected() {
    let harness = fake_harness();
    let err = harness
        .create_experiment(&serde_json::json!("just a string"), true)
        .unwrap_err();
    assert!(format!("{err:#}").contains("invalid experiment config"));
}
