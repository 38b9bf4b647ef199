use thiserror::Error;

use crate::models::{ExperimentId, TrialId};

/// Failures surfaced by experiment service operations.
///
/// Only `ServiceUnavailable` and transport timeouts are transient; everything
/// else is fatal to the calling scenario and must not be retried.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service rejected or dropped the request transiently (5xx, 429,
    /// connection refused). Retried inside the client, capped at a small
    /// fixed count.
    #[error("experiment service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    /// The submitted configuration was rejected.
    #[error("invalid experiment config: {reason}")]
    InvalidConfig { reason: String },

    /// No experiment with this id exists on the service.
    #[error("experiment {id} not found")]
    NotFound { id: ExperimentId },

    /// No trial with this id exists on the service.
    #[error("trial {id} not found")]
    TrialNotFound { id: TrialId },

    /// The experiment's current state disallows the requested command.
    #[error("invalid transition for experiment {id}: {reason}")]
    InvalidTransition { id: ExperimentId, reason: String },

    /// The service answered with a body the client could not interpret.
    #[error("malformed response from experiment service: {reason}")]
    MalformedResponse { reason: String },

    /// Transport-level failure below the HTTP status layer.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::ServiceUnavailable { .. } => true,
            ClientError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
