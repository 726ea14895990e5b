//! Persistence support for the xfe solver.
//!
//! This crate provides:
//! - **Slot-keyed numeric state** (`DataSlots`) used by nodes, integration
//!   points and integrators to serialise their mutable fields
//! - **JSON-based restart** checkpoints (`RestartState`) with save/load

pub mod error;
mod restart;

pub use error::{IoError, Result};
pub use restart::{DataSlots, RESTART_SCHEMA_VERSION, RestartState, load_restart, save_restart};
