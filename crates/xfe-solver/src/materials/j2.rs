//! Von Mises (J2) plasticity with isotropic hardening.
//!
//! # Hardening
//!
//! ```text
//! q(ξ) = σ0 + (σ∞ − σ0)(1 − exp(−δ ξ)) + H ξ
//! f(σ, ξ) = ‖dev σ‖ − √(2/3) q(ξ)
//! ```
//!
//! # Return mapping
//!
//! Radial return: the scalar consistency equation
//!
//! ```text
//! g(γ) = ‖s_tr‖ − 2Gγ − √(2/3) q(ξn + √(2/3) γ) − (η/Δt) γ = 0
//! ```
//!
//! is solved by Newton iteration. When the Newton budget is exhausted the
//! strain increment is split into 2, 4, 8, … sub-increments before the
//! update is reported as an [`SolverError::IntegrationFailure`].
//!
//! The algorithmic tangent is `K 1⊗1 + 2Gθ₁ P − 2Gθ̄ n⊗n`.

use tracing::debug;

use crate::error::{Result, SolverError};
use crate::response::Response;
use crate::tensor::{
    SQRT_2_3, Tangent, Voigt, deviatoric_projector, identity, isotropic_elastic_tangent,
    strain_deviator, tensor_norm, to_engineering, trace, volumetric_projector, stress_deviator,
};

use super::state::IntegrationPointState;
use super::{ConstitutiveModel, ReturnMappingConfig};

/// Internal variables: plastic strain (engineering shear) and the
/// equivalent plastic strain ξ.
const N_INTERNAL: usize = 7;
const XI: usize = 6;

struct PointUpdate {
    stress: Voigt,
    tangent: Tangent,
    internal: [f64; N_INTERNAL],
}

#[derive(Debug, Clone)]
pub struct J2Plasticity {
    bulk: f64,
    shear: f64,
    yield_stress: f64,
    saturation_stress: f64,
    saturation_exponent: f64,
    hardening_modulus: f64,
    viscosity: f64,
    density: f64,
    dt: f64,
    config: ReturnMappingConfig,
    state: IntegrationPointState,
}

impl J2Plasticity {
    pub fn new(
        bulk: f64,
        shear: f64,
        yield_stress: f64,
        saturation_stress: f64,
        saturation_exponent: f64,
        hardening_modulus: f64,
        config: ReturnMappingConfig,
    ) -> Result<Self> {
        if !(bulk > 0.0 && shear > 0.0) {
            return Err(SolverError::InvalidMaterial(format!(
                "J2: bulk and shear moduli must be positive (K = {bulk}, G = {shear})"
            )));
        }
        if !(yield_stress > 0.0) {
            return Err(SolverError::InvalidMaterial(format!(
                "J2: yield stress must be positive, got {yield_stress}"
            )));
        }
        if saturation_exponent < 0.0 {
            return Err(SolverError::InvalidMaterial(
                "J2: saturation exponent must be non-negative".into(),
            ));
        }
        let elastic = isotropic_elastic_tangent(bulk, shear);
        Ok(Self {
            bulk,
            shear,
            yield_stress,
            saturation_stress,
            saturation_exponent,
            hardening_modulus,
            viscosity: 0.0,
            density: 0.0,
            dt: 0.0,
            config,
            state: IntegrationPointState::new(vec![0.0; N_INTERNAL], elastic),
        })
    }

    /// Perfectly plastic von Mises material.
    pub fn perfectly_plastic(
        bulk: f64,
        shear: f64,
        yield_stress: f64,
        config: ReturnMappingConfig,
    ) -> Result<Self> {
        Self::new(bulk, shear, yield_stress, yield_stress, 0.0, 0.0, config)
    }

    /// Viscosity η. The overstress term η/Δt needs a time
    /// increment, so it only acts under transient integrators; load
    /// stepping leaves Δt at zero and the response stays rate-independent.
    pub fn with_viscosity(mut self, viscosity: f64) -> Result<Self> {
        if viscosity < 0.0 {
            return Err(SolverError::InvalidMaterial(
                "J2: viscosity must be non-negative".into(),
            ));
        }
        self.viscosity = viscosity;
        Ok(self)
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    fn hardening(&self, xi: f64) -> f64 {
        self.yield_stress
            + (self.saturation_stress - self.yield_stress)
                * (1.0 - (-self.saturation_exponent * xi).exp())
            + self.hardening_modulus * xi
    }

    fn hardening_slope(&self, xi: f64) -> f64 {
        (self.saturation_stress - self.yield_stress)
            * self.saturation_exponent
            * (-self.saturation_exponent * xi).exp()
            + self.hardening_modulus
    }

    fn viscous_term(&self, dt: f64) -> f64 {
        if self.viscosity > 0.0 && dt > 0.0 {
            self.viscosity / dt
        } else {
            0.0
        }
    }

    /// Radial return from the internal variables `internal_n` to the total
    /// strain `strain`.
    fn return_map(
        &self,
        internal_n: &[f64; N_INTERNAL],
        strain: &Voigt,
        dt: f64,
    ) -> Result<PointUpdate> {
        let (k, g) = (self.bulk, self.shear);
        let plastic_n = Voigt::from_column_slice(&internal_n[..6]);
        let xi_n = internal_n[XI];

        let elastic_strain = strain - plastic_n;
        let pressure = k * trace(&elastic_strain);
        let s_trial = strain_deviator(&elastic_strain) * (2.0 * g);
        let norm = tensor_norm(&s_trial);

        let radius_n = SQRT_2_3 * self.hardening(xi_n);
        if norm - radius_n <= self.config.tolerance * radius_n.abs() {
            return Ok(PointUpdate {
                stress: s_trial + identity() * pressure,
                tangent: isotropic_elastic_tangent(k, g),
                internal: *internal_n,
            });
        }

        let visc = self.viscous_term(dt);
        let mut gamma = 0.0;
        let mut converged = false;
        for _ in 0..self.config.max_iterations {
            let xi = xi_n + SQRT_2_3 * gamma;
            let residual =
                norm - 2.0 * g * gamma - SQRT_2_3 * self.hardening(xi) - visc * gamma;
            if residual.abs() <= self.config.tolerance * norm {
                converged = true;
                break;
            }
            let slope = -2.0 * g - (2.0 / 3.0) * self.hardening_slope(xi) - visc;
            gamma -= residual / slope;
        }
        if !converged || !gamma.is_finite() {
            return Err(SolverError::IntegrationFailure(format!(
                "J2 return mapping did not converge in {} iterations",
                self.config.max_iterations
            )));
        }

        let n = s_trial / norm;
        let xi = xi_n + SQRT_2_3 * gamma;
        let stress = s_trial - n * (2.0 * g * gamma) + identity() * pressure;

        let mut internal = *internal_n;
        let plastic = plastic_n + to_engineering(&n) * gamma;
        internal[..6].copy_from_slice(plastic.as_slice());
        internal[XI] = xi;

        let theta_1 = 1.0 - 2.0 * g * gamma / norm;
        let theta_bar = 1.0
            / (1.0 + self.hardening_slope(xi) / (3.0 * g) + visc / (2.0 * g))
            - (1.0 - theta_1);
        let tangent = volumetric_projector() * k + deviatoric_projector() * (2.0 * g * theta_1)
            - n * n.transpose() * (2.0 * g * theta_bar);

        Ok(PointUpdate {
            stress,
            tangent,
            internal,
        })
    }

    /// Integrates from the committed state in `substeps` equal strain
    /// sub-increments.
    fn integrate_substeps(&self, strain: &Voigt, substeps: usize) -> Result<PointUpdate> {
        let start = self.state.committed().strain;
        let mut internal = self.committed_internal();
        let mut update = None;
        for k in 1..=substeps {
            let fraction = k as f64 / substeps as f64;
            let target = start + (strain - start) * fraction;
            let step = self.return_map(&internal, &target, self.dt / substeps as f64)?;
            internal = step.internal;
            update = Some(step);
        }
        update.ok_or_else(|| SolverError::IntegrationFailure("J2: zero sub-steps requested".into()))
    }

    fn integrate(&self, strain: &Voigt) -> Result<PointUpdate> {
        let mut result = self.return_map(&self.committed_internal(), strain, self.dt);
        let mut substeps = 2;
        while result.is_err() && substeps <= self.config.max_substeps {
            result = self.integrate_substeps(strain, substeps);
            if result.is_ok() {
                debug!(substeps, "J2 return mapping recovered by sub-stepping");
            }
            substeps *= 2;
        }
        result
    }

    fn committed_internal(&self) -> [f64; N_INTERNAL] {
        let mut internal = [0.0; N_INTERNAL];
        internal.copy_from_slice(&self.state.committed().internal);
        internal
    }
}

impl ConstitutiveModel for J2Plasticity {
    fn kind(&self) -> &'static str {
        "J2Plasticity"
    }

    fn state(&self) -> &IntegrationPointState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IntegrationPointState {
        &mut self.state
    }

    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        match self.integrate(strain) {
            Ok(update) => {
                self.state
                    .set_trial(*strain, update.stress, &update.internal, update.tangent);
                Ok(())
            }
            Err(err) => {
                self.state.mark_failed();
                Err(err)
            }
        }
    }

    fn initial_tangent(&self) -> Tangent {
        isotropic_elastic_tangent(self.bulk, self.shear)
    }

    fn get_copy(&self) -> Box<dyn ConstitutiveModel> {
        Box::new(self.clone())
    }

    fn density(&self) -> f64 {
        self.density
    }

    fn yield_value(&self) -> f64 {
        let xi = self.state.internal()[XI];
        tensor_norm(&stress_deviator(self.state.stress())) - SQRT_2_3 * self.hardening(xi)
    }

    fn set_time_increment(&mut self, dt: f64) {
        self.dt = dt;
    }

    fn response(&self, key: &str) -> Option<Response> {
        let internal = self.state.internal();
        match key {
            "plastic_strain" => Some(Response::voigt(&Voigt::from_column_slice(&internal[..6]))),
            "equivalent_plastic_strain" => Some(Response::Scalar(internal[XI])),
            _ => self.state.response(key),
        }
    }
}
