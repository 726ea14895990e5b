//! Linear solve interface between the driver and the backends.
//!
//! The driver hands the assembled tangent (COO triplets over free
//! equations) and the unbalance to a [`LinearSolver`] and receives the
//! correction ΔU. Element-level work stays in small dense nalgebra matrices.

use nalgebra::DVector;
use thiserror::Error;

/// Failure of a single linear solve.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("unbalance has {unbalance} entries, tangent has {equations} equations")]
    DimensionMismatch { unbalance: usize, equations: usize },
    #[error("tangent is singular ({0})")]
    Singular(String),
    #[error("{0} produced a non-finite correction")]
    NonFinite(&'static str),
}

/// Square tangent in COO form. Duplicate `(row, col)` entries sum.
#[derive(Debug, Clone)]
pub struct TangentTriplets {
    pub size: usize,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

impl TangentTriplets {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((r, c), v)| (*r, *c, *v))
    }
}

/// K ΔU = R over the free equations of the current numbering.
#[derive(Debug, Clone)]
pub struct LinearSystemData {
    pub tangent: TangentTriplets,
    pub unbalance: DVector<f64>,
}

impl LinearSystemData {
    pub fn num_equations(&self) -> usize {
        self.tangent.size
    }

    pub(crate) fn check_dimensions(&self) -> Result<(), BackendError> {
        if self.unbalance.len() != self.tangent.size {
            return Err(BackendError::DimensionMismatch {
                unbalance: self.unbalance.len(),
                equations: self.tangent.size,
            });
        }
        Ok(())
    }
}

/// Diagnostics of one solve.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// ‖K ΔU − R‖, when the backend computes it.
    pub residual_norm: Option<f64>,
    pub solver_name: &'static str,
}

pub trait LinearSolver: Send + Sync {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_unbalance_is_rejected() {
        let system = LinearSystemData {
            tangent: TangentTriplets {
                size: 2,
                rows: vec![0, 1],
                cols: vec![0, 1],
                values: vec![1.0, 1.0],
            },
            unbalance: DVector::zeros(3),
        };
        assert!(matches!(
            system.check_dimensions(),
            Err(BackendError::DimensionMismatch { unbalance: 3, equations: 2 })
        ));
    }
}
