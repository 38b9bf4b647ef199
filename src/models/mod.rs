//! Data model mirrored from the experiment service
//!
//! These types are snapshots of remote state: the service owns the
//! authoritative lifecycle, the harness only observes it.

pub mod experiment;
pub mod trial;

pub use experiment::{Experiment, ExperimentId, ExperimentState};
pub use trial::{Trial, TrialId, Workload, WorkloadKind};
