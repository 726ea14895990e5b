//! Error types for solver operations.
//!
//! The first four variants are the analysis failures a driver can react
//! to; everything else aborts the analysis.

use thiserror::Error;

/// Result type alias using the solver error.
pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    /// Local return mapping did not converge within its budget.
    #[error("constitutive integration failed: {0}")]
    IntegrationFailure(String),

    /// Degenerate or inverted element geometry.
    #[error("element {element}: invalid geometry (det J = {det_j:.6e})")]
    Geometry { element: i32, det_j: f64 },

    /// The linear solver could not produce a solution.
    #[error("linear solve failed: {0}")]
    LinearSolve(String),

    /// Equilibrium iteration exhausted its budget.
    #[error("no convergence after {iterations} iterations (norm = {norm:.6e})")]
    Convergence { iterations: usize, norm: f64 },

    /// Inconsistent model definition (missing nodes, duplicate tags, ...).
    #[error("domain error: {0}")]
    Domain(String),

    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A state transition that the commit/revert protocol forbids.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("persistence error: {0}")]
    Io(#[from] xfe_io::IoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SolverError {
    /// Whether a driver may revert and retry the step with a smaller increment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SolverError::IntegrationFailure(_)
                | SolverError::LinearSolve(_)
                | SolverError::Convergence { .. }
        )
    }
}
