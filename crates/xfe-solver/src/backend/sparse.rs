//! Sparse Cholesky backend using nalgebra-sparse.
//!
//! Requires a symmetric positive definite tangent (elastic, J2 and
//! associative Drucker–Prager models, positive mass matrices). Use the
//! dense LU backend for non-symmetric tangents.

use super::traits::*;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Sparse Cholesky (CSC) solver backend.
pub struct SparseCholeskyBackend;

impl LinearSolver for SparseCholeskyBackend {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        system.check_dimensions()?;
        let n = system.num_equations();
        let triplets = &system.tangent;
        let coo = CooMatrix::try_from_triplets(
            n,
            n,
            triplets.rows.clone(),
            triplets.cols.clone(),
            triplets.values.clone(),
        )
        .map_err(|e| BackendError::Singular(format!("invalid triplets: {e:?}")))?;
        let csc = CscMatrix::from(&coo);

        let cholesky = CscCholesky::factor(&csc)
            .map_err(|e| BackendError::Singular(format!("Cholesky factorization: {e:?}")))?;

        let rhs = DMatrix::from_column_slice(n, 1, system.unbalance.as_slice());
        let solution = cholesky.solve(&rhs);
        let u = DVector::from_column_slice(solution.as_slice());

        if u.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite("sparse Cholesky"));
        }

        Ok((
            u,
            SolveInfo {
                residual_norm: None,
                solver_name: "nalgebra-sparse-Cholesky",
            },
        ))
    }

    fn name(&self) -> &str {
        "sparse-cholesky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal() -> LinearSystemData {
        LinearSystemData {
            tangent: TangentTriplets {
                size: 3,
                // diagonal split over two triplets to exercise summation
                rows: vec![0, 0, 1, 1, 1, 2, 2, 0],
                cols: vec![0, 1, 0, 1, 2, 1, 2, 0],
                values: vec![3.0, -1.0, -1.0, 4.0, -1.0, -1.0, 4.0, 1.0],
            },
            unbalance: DVector::from_vec(vec![1.0, 2.0, 1.0]),
        }
    }

    #[test]
    fn sparse_cholesky_matches_dense_lu() {
        let system = tridiagonal();
        let (sparse, info) = SparseCholeskyBackend.solve_linear(&system).unwrap();
        let (dense, _) = super::super::NativeBackend.solve_linear(&system).unwrap();
        for i in 0..3 {
            assert!((sparse[i] - dense[i]).abs() < 1e-12);
        }
        assert_eq!(info.solver_name, "nalgebra-sparse-Cholesky");
    }

    #[test]
    fn indefinite_matrix_is_rejected() {
        let mut system = tridiagonal();
        system.tangent.values[3] = -4.0;
        assert!(SparseCholeskyBackend.solve_linear(&system).is_err());
    }
}
