//! Voigt-notation helpers for symmetric second- and fourth-order tensors.
//!
//! Stress components are ordered `[σxx, σyy, σzz, τxy, τyz, τxz]`. Strain
//! vectors use the same order with *engineering* shear (γ = 2ε), so that
//! `σ = D ε` holds with an ordinary matrix product and `σ · ε` is the
//! work density.

use nalgebra::{Matrix6, Vector6};

/// Symmetric tensor in Voigt notation.
pub type Voigt = Vector6<f64>;

/// Material tangent mapping engineering strain to stress.
pub type Tangent = Matrix6<f64>;

pub const SQRT_2_3: f64 = 0.816_496_580_927_726;

/// Second-order identity `δij`.
pub fn identity() -> Voigt {
    Vector6::new(1.0, 1.0, 1.0, 0.0, 0.0, 0.0)
}

/// Trace of a Voigt vector (stress or strain, the shear convention is irrelevant).
pub fn trace(v: &Voigt) -> f64 {
    v[0] + v[1] + v[2]
}

/// Mean (hydrostatic) stress, tension positive.
pub fn mean_stress(stress: &Voigt) -> f64 {
    trace(stress) / 3.0
}

/// Deviatoric part of a stress vector.
pub fn stress_deviator(stress: &Voigt) -> Voigt {
    stress - identity() * mean_stress(stress)
}

/// Deviatoric part of an engineering strain, returned in *tensor*
/// components (shear halved) so it can be combined with stresses.
pub fn strain_deviator(strain: &Voigt) -> Voigt {
    let mean = trace(strain) / 3.0;
    Vector6::new(
        strain[0] - mean,
        strain[1] - mean,
        strain[2] - mean,
        0.5 * strain[3],
        0.5 * strain[4],
        0.5 * strain[5],
    )
}

/// Converts tensor shear components to engineering shear.
pub fn to_engineering(tensorial: &Voigt) -> Voigt {
    Vector6::new(
        tensorial[0],
        tensorial[1],
        tensorial[2],
        2.0 * tensorial[3],
        2.0 * tensorial[4],
        2.0 * tensorial[5],
    )
}

/// Frobenius norm of a tensor stored with tensor (not engineering) shear.
pub fn tensor_norm(v: &Voigt) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2] + 2.0 * (v[3] * v[3] + v[4] * v[4] + v[5] * v[5]))
        .sqrt()
}

/// Von Mises equivalent stress.
pub fn von_mises(stress: &Voigt) -> f64 {
    (1.5_f64).sqrt() * tensor_norm(&stress_deviator(stress))
}

/// `I ⊗ I`.
pub fn volumetric_projector() -> Tangent {
    let one = identity();
    one * one.transpose()
}

/// Deviatoric projector acting on engineering strain and producing
/// tensor components: `P : ε = dev(ε)`.
pub fn deviatoric_projector() -> Tangent {
    let mut p = Matrix6::zeros();
    for i in 0..3 {
        for j in 0..3 {
            p[(i, j)] = if i == j { 2.0 / 3.0 } else { -1.0 / 3.0 };
        }
    }
    for i in 3..6 {
        p[(i, i)] = 0.5;
    }
    p
}

/// Isotropic elastic tangent `K I⊗I + 2G P`.
pub fn isotropic_elastic_tangent(bulk: f64, shear: f64) -> Tangent {
    volumetric_projector() * bulk + deviatoric_projector() * (2.0 * shear)
}

/// Bulk and shear moduli from Young's modulus and Poisson's ratio.
pub fn bulk_and_shear(elastic_modulus: f64, poissons_ratio: f64) -> (f64, f64) {
    let bulk = elastic_modulus / (3.0 * (1.0 - 2.0 * poissons_ratio));
    let shear = elastic_modulus / (2.0 * (1.0 + poissons_ratio));
    (bulk, shear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn von_mises_uniaxial() {
        let stress = Vector6::new(100.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(von_mises(&stress), 100.0, epsilon = 1e-10);
    }

    #[test]
    fn von_mises_pure_shear() {
        let stress = Vector6::new(0.0, 0.0, 0.0, 100.0, 0.0, 0.0);
        assert_relative_eq!(von_mises(&stress), 100.0 * 3.0_f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn elastic_tangent_matches_lame_form() {
        let (e, nu) = (200e3, 0.3);
        let (k, g) = bulk_and_shear(e, nu);
        let d = isotropic_elastic_tangent(k, g);
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        assert_relative_eq!(d[(0, 0)], lambda + 2.0 * g, max_relative = 1e-12);
        assert_relative_eq!(d[(0, 1)], lambda, max_relative = 1e-12);
        assert_relative_eq!(d[(3, 3)], g, max_relative = 1e-12);
        assert_relative_eq!(d[(3, 0)], 0.0);
    }

    #[test]
    fn deviatoric_projector_removes_volume() {
        let strain = Vector6::new(1e-3, 2e-3, 3e-3, 4e-3, 0.0, 0.0);
        let dev = deviatoric_projector() * strain;
        assert_relative_eq!(trace(&dev), 0.0, epsilon = 1e-15);
        assert_relative_eq!(dev, strain_deviator(&strain), epsilon = 1e-15);
    }
}
