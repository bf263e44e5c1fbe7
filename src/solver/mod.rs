//! The sa-solver subprocess: its line protocol and its supervision.
//!
//! The solver itself is a black box doing the Equihash search on a GPU.
//! This module covers everything around it: parsing the three line shapes
//! it emits, formatting the job lines it consumes, and keeping one
//! process alive per configured device instance.

pub mod lines;
pub mod supervisor;

pub use lines::{Solution, SolverLine, BANNER};
pub use supervisor::{solver_path, DevId, SolverEvent, Supervisor};
