//! Mining coordinator for the SILENTARMY Equihash solver.
//!
//! This crate contains everything except the proof-of-work search itself:
//! the Stratum pool client, the supervisor for `sa-solver` subprocesses,
//! and the coordinator that moves work between the two while keeping
//! throughput statistics.

pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod job;
pub mod solver;
pub mod stats;
pub mod stratum;
pub mod tracing;
