//! Numerical backend abstraction layer.
//!
//! The global tangent and unbalance are handed to a [`LinearSolver`]
//! selected at runtime. Both backends consume the same COO triplets.
//!
//! # Backends
//!
//! - **Native** (default): dense LU from nalgebra. Works for
//!   non-symmetric tangents.
//! - **SparseCholesky**: `nalgebra-sparse` CSC Cholesky for symmetric
//!   positive definite systems.
//!
//! ```text
//! Element Library (small dense nalgebra DMatrix)
//!         │
//!         ▼
//! Assembly (produces COO triplets + residual)
//!         │
//!         ▼
//! LinearSolver
//!    ┌────┴────┐
//!    ▼         ▼
//! Dense LU  Sparse Cholesky
//! ```

pub mod native;
pub mod sparse;
pub mod traits;

use serde::{Deserialize, Serialize};

pub use native::NativeBackend;
pub use sparse::SparseCholeskyBackend;
pub use traits::*;

/// Linear solver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    DenseLu,
    SparseCholesky,
}

/// Returns the solver backend for `kind`.
pub fn create_backend(kind: BackendKind) -> Box<dyn LinearSolver> {
    match kind {
        BackendKind::DenseLu => Box::new(NativeBackend),
        BackendKind::SparseCholesky => Box::new(SparseCholeskyBackend),
    }
}

/// Returns the default solver backend.
pub fn default_backend() -> Box<dyn LinearSolver> {
    create_backend(BackendKind::default())
}
