//! Grading pipeline server.
//!
//! Wires the scheduler, the evaluation stages, and the external
//! collaborators together: an authenticated ingress socket feeding the
//! queue, worker pools draining it, and a delivery loop shipping verdicts
//! to the result sink.

pub mod advisor;
pub mod config;
pub mod delivery;
pub mod ingress;
pub mod sink;

pub use config::{Credentials, Settings};
