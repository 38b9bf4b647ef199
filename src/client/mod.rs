//! Thin client for the remote experiment-management service
//!
//! All operations are remote calls; the client keeps no state between calls
//! beyond the connection pool. The `ExperimentService` trait is the seam the
//! harness and tests program against, so scenarios are independent of the
//! wire protocol.

mod error;

pub use error::ClientError;

use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ConfigDocument;
use crate::models::{ExperimentId, ExperimentState, Trial, TrialId};

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Cap on retries of transient failures before giving up.
const MAX_TRANSIENT_RETRIES: u32 = 3;
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Operations the harness needs from an experiment-management service.
///
/// GETs are idempotent; state-changing commands tolerate at-least-once
/// delivery (pausing a paused experiment is a no-op, not an error).
pub trait ExperimentService {
    /// Submit a new experiment. When `activate` is false the experiment is
    /// registered but left in the CREATED state.
    fn create(&self, config: &ConfigDocument, activate: bool)
        -> Result<ExperimentId, ClientError>;

    fn activate(&self, id: ExperimentId) -> Result<(), ClientError>;
    fn pause(&self, id: ExperimentId) -> Result<(), ClientError>;
    fn cancel(&self, id: ExperimentId) -> Result<(), ClientError>;

    fn get_state(&self, id: ExperimentId) -> Result<ExperimentState, ClientError>;
    fn get_config(&self, id: ExperimentId) -> Result<ConfigDocument, ClientError>;
    fn get_trials(&self, id: ExperimentId) -> Result<Vec<Trial>, ClientError>;

    /// Raw log lines for a trial, optionally pre-filtered server-side by a
    /// regex pattern.
    fn get_trial_logs(
        &self,
        trial: TrialId,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, ClientError>;
}

/// HTTP implementation of [`ExperimentService`] against a REST-style API.
pub struct ServiceClient {
    base_url: String,
    http: Client,
}

#[derive(Deserialize)]
struct CreateResponse {
    id: ExperimentId,
}

#[derive(Deserialize)]
struct StateResponse {
    state: ExperimentState,
}

impl ServiceClient {
    /// Build a client with connect and request timeouts so a wedged service
    /// cannot hang a test indefinitely.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("gantry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Run `op`, retrying transient failures up to [`MAX_TRANSIENT_RETRIES`]
    /// times. Fatal errors pass through on the first occurrence.
    fn with_retry<T>(
        &self,
        what: &str,
        op: impl Fn() -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                    attempt += 1;
                    warn!(what, attempt, error = %err, "transient service failure, retrying");
                    thread::sleep(TRANSIENT_RETRY_DELAY);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Map an error-status response onto the client error taxonomy.
    ///
    /// `id` is the experiment the request addressed, when there is one; it
    /// keys the NotFound and InvalidTransition variants.
    fn check_status(response: Response, id: Option<ExperimentId>) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let reason = if body.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body.trim())
        };

        Err(match status {
            StatusCode::NOT_FOUND => match id {
                Some(id) => ClientError::NotFound { id },
                None => ClientError::MalformedResponse { reason },
            },
            StatusCode::CONFLICT => ClientError::InvalidTransition {
                id: id.unwrap_or_default(),
                reason,
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ClientError::InvalidConfig { reason }
            }
            StatusCode::TOO_MANY_REQUESTS => ClientError::ServiceUnavailable { reason },
            _ if status.is_server_error() => ClientError::ServiceUnavailable { reason },
            _ => ClientError::MalformedResponse { reason },
        })
    }

    fn post_command(&self, id: ExperimentId, command: &str) -> Result<(), ClientError> {
        self.with_retry(command, || {
            debug!(id, command, "posting experiment command");
            let response = self
                .http
                .post(self.url(&format!("/api/v1/experiments/{id}/{command}")))
                .send()?;
            Self::check_status(response, Some(id))?;
            Ok(())
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        id: Option<ExperimentId>,
    ) -> Result<T, ClientError> {
        self.with_retry(path, || {
            debug!(path, "fetching from experiment service");
            let response = self.http.get(self.url(path)).send()?;
            let response = Self::check_status(response, id)?;
            response.json().map_err(|err| ClientError::MalformedResponse {
                reason: err.to_string(),
            })
        })
    }
}

impl ExperimentService for ServiceClient {
    fn create(
        &self,
        config: &ConfigDocument,
        activate: bool,
    ) -> Result<ExperimentId, ClientError> {
        // Creation is not retried: a transient failure after the service
        // registered the experiment would otherwise submit a duplicate.
        debug!(activate, "creating experiment");
        let response = self
            .http
            .post(self.url("/api/v1/experiments"))
            .json(&serde_json::json!({ "config": config, "activate": activate }))
            .send()?;
        let response = Self::check_status(response, None)?;
        let created: CreateResponse =
            response.json().map_err(|err| ClientError::MalformedResponse {
                reason: err.to_string(),
            })?;
        debug!(id = created.id, "experiment created");
        Ok(created.id)
    }

    fn activate(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.post_command(id, "activate")
    }

    fn pause(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.post_command(id, "pause")
    }

    fn cancel(&self, id: ExperimentId) -> Result<(), ClientError> {
        self.post_command(id, "cancel")
    }

    fn get_state(&self, id: ExperimentId) -> Result<ExperimentState, ClientError> {
        let response: StateResponse =
            self.get_json(&format!("/api/v1/experiments/{id}"), Some(id))?;
        Ok(response.state)
    }

    fn get_config(&self, id: ExperimentId) -> Result<ConfigDocument, ClientError> {
        self.get_json(&format!("/api/v1/experiments/{id}/config"), Some(id))
    }

    fn get_trials(&self, id: ExperimentId) -> Result<Vec<Trial>, ClientError> {
        self.get_json(&format!("/api/v1/experiments/{id}/trials"), Some(id))
    }

    fn get_trial_logs(
        &self,
        trial: TrialId,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, ClientError> {
        self.with_retry("trial logs", || {
            let mut request = self.http.get(self.url(&format!("/api/v1/trials/{trial}/logs")));
            if let Some(pattern) = pattern {
                request = request.query(&[("pattern", pattern)]);
            }
            let response = request.send()?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(ClientError::TrialNotFound { id: trial });
            }
            let response = Self::check_status(response, None)?;
            response.json().map_err(|err| ClientError::MalformedResponse {
                reason: err.to_string(),
            })
        })
    }
}
