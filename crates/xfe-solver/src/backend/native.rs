//! Native dense backend using nalgebra.
//!
//! Dense LU with partial pivoting. Handles non-symmetric tangents
//! (non-associative plasticity) and is the default for small models.

use super::traits::*;
use nalgebra::{DMatrix, DVector};

/// Dense LU solver backend.
///
/// Suitable for small-to-medium problems (up to a few thousand equations).
pub struct NativeBackend;

impl LinearSolver for NativeBackend {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        system.check_dimensions()?;
        let n = system.num_equations();
        let mut k = DMatrix::zeros(n, n);
        for (r, c, v) in system.tangent.iter() {
            k[(r, c)] += v;
        }

        let u = k
            .clone()
            .lu()
            .solve(&system.unbalance)
            .ok_or_else(|| BackendError::Singular("LU pivot vanished".into()))?;

        if u.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite("dense LU"));
        }
        let residual_norm = (&k * &u - &system.unbalance).norm();

        Ok((
            u,
            SolveInfo {
                residual_norm: Some(residual_norm),
                solver_name: "nalgebra-LU",
            },
        ))
    }

    fn name(&self) -> &str {
        "native-nalgebra"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_linear_solve_trivial() {
        // Solve: [2 0; 0 3] * [x; y] = [4; 9]
        let backend = NativeBackend;
        let system = LinearSystemData {
            tangent: TangentTriplets {
                size: 2,
                rows: vec![0, 1],
                cols: vec![0, 1],
                values: vec![2.0, 3.0],
            },
            unbalance: DVector::from_vec(vec![4.0, 9.0]),
        };

        let (u, info) = backend.solve_linear(&system).unwrap();
        assert!((u[0] - 2.0).abs() < 1e-12);
        assert!((u[1] - 3.0).abs() < 1e-12);
        assert_eq!(info.solver_name, "nalgebra-LU");
    }

    #[test]
    fn native_linear_solve_nonsymmetric() {
        // K = [4 -2 0; -1 4 -1; 0 -1 3], F = [2; 2; 2]
        let backend = NativeBackend;
        let system = LinearSystemData {
            tangent: TangentTriplets {
                size: 3,
                rows: vec![0, 0, 1, 1, 1, 2, 2],
                cols: vec![0, 1, 0, 1, 2, 1, 2],
                values: vec![4.0, -2.0, -1.0, 4.0, -1.0, -1.0, 3.0],
            },
            unbalance: DVector::from_vec(vec![2.0, 2.0, 2.0]),
        };

        let (u, info) = backend.solve_linear(&system).unwrap();

        let k = DMatrix::from_row_slice(3, 3, &[4.0, -2.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 3.0]);
        let f_check = &k * &u;
        for i in 0..3 {
            assert!(
                (f_check[i] - system.unbalance[i]).abs() < 1e-10,
                "Residual too large at DOF {}",
                i
            );
        }
        assert!(info.residual_norm.unwrap() < 1e-10);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let system = LinearSystemData {
            tangent: TangentTriplets {
                size: 2,
                rows: vec![0, 0, 1, 1],
                cols: vec![0, 1, 0, 1],
                values: vec![1.0, 1.0, 1.0, 1.0],
            },
            unbalance: DVector::from_vec(vec![1.0, 0.0]),
        };
        assert!(matches!(
            NativeBackend.solve_linear(&system),
            Err(BackendError::Singular(_))
        ));
    }
}
