//! gantry: end-to-end lifecycle harness for experiment training services
//!
//! Drives a remote experiment-management service through its lifecycle
//! (create -> active -> paused/canceled -> completed) and asserts behavioral
//! invariants over the trials, workloads, and logs it observes. The service
//! itself (scheduler, trial executor, checkpoint storage) is an external
//! collaborator reached only through [`client::ExperimentService`].

pub mod assertions;
pub mod client;
pub mod config;
pub mod harness;
pub mod models;
pub mod profiling;
pub mod wait;
