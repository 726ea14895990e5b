//! Scalar isotropic damage with exponential softening.
//!
//! ```text
//! σ = (1 − d) C ε
//! ε_eq = √(ε : C : ε / E)
//! κ = max(κ_n, ε_eq)
//! d(κ) = 1 − (κ₀/κ) exp(−(κ − κ₀)/(κ_f − κ₀))   for κ > κ₀
//! ```
//!
//! The update is closed form and never fails. On loading the tangent is
//! `(1 − d) C − d'(κ) (Cε) ⊗ (Cε) / (E ε_eq)`, otherwise the secant
//! `(1 − d) C`.

use crate::error::{Result, SolverError};
use crate::response::Response;
use crate::tensor::{Tangent, Voigt, bulk_and_shear, isotropic_elastic_tangent};

use super::state::IntegrationPointState;
use super::{ConstitutiveModel, check_elastic_constants};

/// Internal variables: history variable κ and damage d.
const KAPPA: usize = 0;
const DAMAGE: usize = 1;

#[derive(Debug, Clone)]
pub struct IsotropicDamage {
    elastic_modulus: f64,
    threshold_strain: f64,
    softening_strain: f64,
    density: f64,
    stiffness: Tangent,
    state: IntegrationPointState,
}

impl IsotropicDamage {
    pub fn new(
        elastic_modulus: f64,
        poissons_ratio: f64,
        threshold_strain: f64,
        softening_strain: f64,
    ) -> Result<Self> {
        check_elastic_constants(elastic_modulus, poissons_ratio)?;
        if !(threshold_strain > 0.0 && softening_strain > threshold_strain) {
            return Err(SolverError::InvalidMaterial(format!(
                "damage: need 0 < threshold strain < softening strain (got {threshold_strain}, {softening_strain})"
            )));
        }
        let (bulk, shear) = bulk_and_shear(elastic_modulus, poissons_ratio);
        let stiffness = isotropic_elastic_tangent(bulk, shear);
        Ok(Self {
            elastic_modulus,
            threshold_strain,
            softening_strain,
            density: 0.0,
            stiffness,
            state: IntegrationPointState::new(vec![threshold_strain, 0.0], stiffness),
        })
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    fn damage(&self, kappa: f64) -> f64 {
        if kappa <= self.threshold_strain {
            return 0.0;
        }
        let k0 = self.threshold_strain;
        1.0 - (k0 / kappa) * (-(kappa - k0) / (self.softening_strain - k0)).exp()
    }

    fn damage_slope(&self, kappa: f64) -> f64 {
        if kappa <= self.threshold_strain {
            return 0.0;
        }
        let k0 = self.threshold_strain;
        let span = self.softening_strain - k0;
        (k0 / kappa) * (-(kappa - k0) / span).exp() * (1.0 / kappa + 1.0 / span)
    }

    fn equivalent_strain(&self, effective_stress: &Voigt, strain: &Voigt) -> f64 {
        (effective_stress.dot(strain).max(0.0) / self.elastic_modulus).sqrt()
    }
}

impl ConstitutiveModel for IsotropicDamage {
    fn kind(&self) -> &'static str {
        "IsotropicDamage"
    }

    fn state(&self) -> &IntegrationPointState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IntegrationPointState {
        &mut self.state
    }

    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        let kappa_n = self.state.committed().internal[KAPPA];
        let effective = self.stiffness * strain;
        let eq = self.equivalent_strain(&effective, strain);

        let (kappa, tangent) = if eq > kappa_n {
            let d = self.damage(eq);
            let correction = effective * effective.transpose()
                * (self.damage_slope(eq) / (self.elastic_modulus * eq));
            (eq, self.stiffness * (1.0 - d) - correction)
        } else {
            (kappa_n, self.stiffness * (1.0 - self.damage(kappa_n)))
        };
        let d = self.damage(kappa);
        self.state
            .set_trial(*strain, effective * (1.0 - d), &[kappa, d], tangent);
        Ok(())
    }

    fn initial_tangent(&self) -> Tangent {
        self.stiffness
    }

    fn get_copy(&self) -> Box<dyn ConstitutiveModel> {
        Box::new(self.clone())
    }

    fn density(&self) -> f64 {
        self.density
    }

    /// Damage criterion `ε_eq − κ`.
    fn yield_value(&self) -> f64 {
        let strain = self.state.strain();
        let eq = self.equivalent_strain(&(self.stiffness * strain), strain);
        eq - self.state.internal()[KAPPA]
    }

    fn response(&self, key: &str) -> Option<Response> {
        match key {
            "damage" => Some(Response::Scalar(self.state.internal()[DAMAGE])),
            "kappa" => Some(Response::Scalar(self.state.internal()[KAPPA])),
            _ => self.state.response(key),
        }
    }
}
