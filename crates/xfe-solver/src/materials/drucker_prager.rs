//! Drucker–Prager plasticity with linear cohesion hardening.
//!
//! ```text
//! f(σ, ε̄ᵖ) = √J₂ + η p − ξ c(ε̄ᵖ),   c(ε̄ᵖ) = c₀ + H ε̄ᵖ
//! ```
//!
//! `η`, `ξ` (and `η̄` for the flow potential) are chosen so that the cone
//! matches the Mohr–Coulomb surface under plane strain:
//!
//! ```text
//! η = 3 tan φ / √(9 + 12 tan² φ),   ξ = 3 / √(9 + 12 tan² φ)
//! ```
//!
//! The return first targets the smooth cone. When the cone return would
//! cross the apex (`√J₂_tr − G Δγ < 0`) the stress is returned to the apex
//! instead. Both returns have closed-form consistent tangents; the cone
//! tangent is non-symmetric whenever ψ ≠ φ.

use nalgebra::Vector6;

use crate::error::{Result, SolverError};
use crate::response::Response;
use crate::tensor::{
    Tangent, Voigt, bulk_and_shear, deviatoric_projector, identity, isotropic_elastic_tangent,
    mean_stress, strain_deviator, stress_deviator, tensor_norm, to_engineering, trace,
    volumetric_projector,
};

use super::state::IntegrationPointState;
use super::{ConstitutiveModel, ReturnMappingConfig, check_elastic_constants};

const N_INTERNAL: usize = 7;
const EPBAR: usize = 6;

struct PointUpdate {
    stress: Voigt,
    tangent: Tangent,
    plastic: Voigt,
    epbar: f64,
}

#[derive(Debug, Clone)]
pub struct DruckerPrager {
    bulk: f64,
    shear: f64,
    cohesion: f64,
    hardening_modulus: f64,
    eta: f64,
    xi: f64,
    eta_bar: f64,
    density: f64,
    config: ReturnMappingConfig,
    state: IntegrationPointState,
}

/// Plane-strain Mohr–Coulomb matching factors `(η, ξ)` for an angle in radians.
fn plane_strain_factors(angle: f64) -> (f64, f64) {
    let t = angle.tan();
    let root = (9.0 + 12.0 * t * t).sqrt();
    (3.0 * t / root, 3.0 / root)
}

impl DruckerPrager {
    /// Angles are in radians.
    pub fn new(
        elastic_modulus: f64,
        poissons_ratio: f64,
        cohesion: f64,
        friction_angle: f64,
        dilatancy_angle: f64,
        hardening_modulus: f64,
        config: ReturnMappingConfig,
    ) -> Result<Self> {
        check_elastic_constants(elastic_modulus, poissons_ratio)?;
        if cohesion < 0.0 {
            return Err(SolverError::InvalidMaterial(
                "Drucker-Prager: cohesion must be non-negative".into(),
            ));
        }
        let quarter = std::f64::consts::FRAC_PI_2;
        if !(0.0..quarter).contains(&friction_angle) || !(0.0..quarter).contains(&dilatancy_angle)
        {
            return Err(SolverError::InvalidMaterial(
                "Drucker-Prager: friction and dilatancy angles must lie in [0, 90) degrees".into(),
            ));
        }
        let (bulk, shear) = bulk_and_shear(elastic_modulus, poissons_ratio);
        let (eta, xi) = plane_strain_factors(friction_angle);
        let (eta_bar, _) = plane_strain_factors(dilatancy_angle);
        Ok(Self {
            bulk,
            shear,
            cohesion,
            hardening_modulus,
            eta,
            xi,
            eta_bar,
            density: 0.0,
            config,
            state: IntegrationPointState::new(
                vec![0.0; N_INTERNAL],
                isotropic_elastic_tangent(bulk, shear),
            ),
        })
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    fn cohesion_at(&self, epbar: f64) -> f64 {
        self.cohesion + self.hardening_modulus * epbar
    }

    fn not_converged(&self, surface: &str) -> SolverError {
        SolverError::IntegrationFailure(format!(
            "Drucker-Prager {surface} return did not converge in {} iterations",
            self.config.max_iterations
        ))
    }

    fn return_map(&self, strain: &Voigt) -> Result<PointUpdate> {
        let (k, g, h) = (self.bulk, self.shear, self.hardening_modulus);
        let committed = &self.state.committed().internal;
        let plastic_n = Vector6::from_column_slice(&committed[..6]);
        let epbar_n = committed[EPBAR];

        let elastic_strain = strain - plastic_n;
        let p_trial = k * trace(&elastic_strain);
        let s_trial = strain_deviator(&elastic_strain) * (2.0 * g);
        let sqrt_j2 = tensor_norm(&s_trial) / std::f64::consts::SQRT_2;

        let c_n = self.cohesion_at(epbar_n);
        let f_trial = sqrt_j2 + self.eta * p_trial - self.xi * c_n;
        let scale = (self.xi * c_n).abs().max(sqrt_j2).max(f64::MIN_POSITIVE);
        if f_trial <= self.config.tolerance * scale {
            return Ok(PointUpdate {
                stress: s_trial + identity() * p_trial,
                tangent: isotropic_elastic_tangent(k, g),
                plastic: plastic_n,
                epbar: epbar_n,
            });
        }

        // Smooth cone
        let slope = -g - k * self.eta * self.eta_bar - self.xi * self.xi * h;
        let mut dgamma = 0.0;
        let mut converged = false;
        for _ in 0..self.config.max_iterations {
            let residual = sqrt_j2 - g * dgamma + self.eta * (p_trial - k * self.eta_bar * dgamma)
                - self.xi * self.cohesion_at(epbar_n + self.xi * dgamma);
            if residual.abs() <= self.config.tolerance * scale {
                converged = true;
                break;
            }
            dgamma -= residual / slope;
        }
        if !converged {
            return Err(self.not_converged("cone"));
        }

        if sqrt_j2 - g * dgamma >= 0.0 && sqrt_j2 > 0.0 {
            let ratio = g * dgamma / sqrt_j2;
            let unit = s_trial / tensor_norm(&s_trial);
            let a = 1.0 / (g + k * self.eta * self.eta_bar + self.xi * self.xi * h);
            let one = identity();
            let tangent = deviatoric_projector() * (2.0 * g * (1.0 - ratio))
                + unit * unit.transpose() * (2.0 * g * (ratio - g * a))
                - (unit * one.transpose() * self.eta + one * unit.transpose() * self.eta_bar)
                    * (std::f64::consts::SQRT_2 * g * a * k)
                + volumetric_projector() * (k * (1.0 - k * self.eta * self.eta_bar * a));
            let stress = s_trial * (1.0 - ratio) + one * (p_trial - k * self.eta_bar * dgamma);
            return Ok(PointUpdate {
                plastic: self.plastic_strain(strain, &stress),
                stress,
                tangent,
                epbar: epbar_n + self.xi * dgamma,
            });
        }

        // Apex
        if self.eta <= 0.0 || self.eta_bar <= 0.0 {
            return Err(SolverError::IntegrationFailure(
                "Drucker-Prager apex return requires positive friction and dilatancy".into(),
            ));
        }
        let alpha = self.xi / self.eta_bar;
        let beta = self.xi / self.eta;
        let mut dev = 0.0;
        converged = false;
        for _ in 0..self.config.max_iterations {
            let residual =
                self.cohesion_at(epbar_n + alpha * dev) * beta - p_trial + k * dev;
            if residual.abs() <= self.config.tolerance * p_trial.abs().max(scale) {
                converged = true;
                break;
            }
            dev -= residual / (alpha * beta * h + k);
        }
        if !converged {
            return Err(self.not_converged("apex"));
        }
        let stress = identity() * (p_trial - k * dev);
        Ok(PointUpdate {
            plastic: self.plastic_strain(strain, &stress),
            stress,
            tangent: volumetric_projector() * (k * (1.0 - k / (k + alpha * beta * h))),
            epbar: epbar_n + alpha * dev,
        })
    }

    /// Plastic strain consistent with a returned stress: `εᵖ = ε − C⁻¹σ`.
    fn plastic_strain(&self, strain: &Voigt, stress: &Voigt) -> Voigt {
        let elastic_dev = to_engineering(&(stress_deviator(stress) / (2.0 * self.shear)));
        let elastic_vol = identity() * (mean_stress(stress) / (3.0 * self.bulk));
        strain - elastic_dev - elastic_vol
    }
}

impl ConstitutiveModel for DruckerPrager {
    fn kind(&self) -> &'static str {
        "DruckerPrager"
    }

    fn state(&self) -> &IntegrationPointState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IntegrationPointState {
        &mut self.state
    }

    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        match self.return_map(strain) {
            Ok(update) => {
                let mut internal = [0.0; N_INTERNAL];
                internal[..6].copy_from_slice(update.plastic.as_slice());
                internal[EPBAR] = update.epbar;
                self.state
                    .set_trial(*strain, update.stress, &internal, update.tangent);
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
        let stress = self.state.stress();
        let sqrt_j2 = tensor_norm(&stress_deviator(stress)) / std::f64::consts::SQRT_2;
        sqrt_j2 + self.eta * mean_stress(stress)
            - self.xi * self.cohesion_at(self.state.internal()[EPBAR])
    }

    fn response(&self, key: &str) -> Option<Response> {
        let internal = self.state.internal();
        match key {
            "plastic_strain" => Some(Response::voigt(&Vector6::from_column_slice(&internal[..6]))),
            "equivalent_plastic_strain" => Some(Response::Scalar(internal[EPBAR])),
            _ => self.state.response(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn soil(dilatancy_deg: f64) -> DruckerPrager {
        DruckerPrager::new(
            30_000.0,
            0.3,
            20.0,
            30f64.to_radians(),
            dilatancy_deg.to_radians(),
            500.0,
            ReturnMappingConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn compression_below_cone_is_elastic() {
        let mut m = soil(10.0);
        let strain = Vector6::new(-1e-4, -1e-4, -1e-4, 0.0, 0.0, 0.0);
        m.set_trial_strain(&strain).unwrap();
        assert_relative_eq!(m.stress(), m.initial_tangent() * strain, max_relative = 1e-12);
        assert!(m.yield_value() < 0.0);
    }

    #[test]
    fn cone_and_apex_returns_are_admissible() {
        let paths = [
            // deviatoric shear: cone
            Vector6::new(0.0, 0.0, 0.0, 1e-2, 0.0, 0.0),
            // shear under confinement: cone
            Vector6::new(-2e-3, -2e-3, -2e-3, 5e-3, 0.0, 0.0),
            // hydrostatic tension: apex
            Vector6::new(5e-3, 5e-3, 5e-3, 0.0, 0.0, 0.0),
        ];
        for strain in paths {
            let mut m = soil(30.0);
            m.set_trial_strain(&strain).unwrap();
            m.commit_state().unwrap();
            assert!(
                m.yield_value() <= 1e-8 * 20.0,
                "f = {} for {strain:?}",
                m.yield_value()
            );
        }
    }

    #[test]
    fn hydrostatic_tension_lands_on_apex() {
        let mut m = soil(30.0);
        m.set_trial_strain(&Vector6::new(5e-3, 5e-3, 5e-3, 0.0, 0.0, 0.0))
            .unwrap();
        let stress = m.stress();
        assert_relative_eq!(tensor_norm(&stress_deviator(&stress)), 0.0, epsilon = 1e-9);
        let epbar = m.state().internal()[EPBAR];
        assert!(epbar > 0.0);
        assert_relative_eq!(
            mean_stress(&stress),
            m.xi / m.eta * m.cohesion_at(epbar),
            max_relative = 1e-9
        );
    }

    #[test]
    fn cone_tangent_matches_finite_differences() {
        for dilatancy in [10.0, 30.0] {
            let base = Vector6::new(-1e-3, -2e-3, -1e-3, 1e-2, 1e-3, 0.0);
            let mut m = soil(dilatancy);
            m.set_trial_strain(&base).unwrap();
            assert!(m.state().internal()[EPBAR] > 0.0, "expected a plastic state");
            let tangent = m.tangent();
            let scale = tangent.abs().max();

            let h = 1e-8;
            for j in 0..6 {
                let mut plus = base;
                plus[j] += h;
                let mut minus = base;
                minus[j] -= h;
                m.set_trial_strain(&plus).unwrap();
                let s_plus = m.stress();
                m.set_trial_strain(&minus).unwrap();
                let s_minus = m.stress();
                let column = (s_plus - s_minus) / (2.0 * h);
                for i in 0..6 {
                    assert!(
                        (column[i] - tangent[(i, j)]).abs() < 1e-4 * scale,
                        "ψ = {dilatancy}: D[{i},{j}] fd = {}, analytic = {}",
                        column[i],
                        tangent[(i, j)]
                    );
                }
            }
        }
    }

    #[test]
    fn non_associative_tangent_is_unsymmetric() {
        let mut m = soil(5.0);
        m.set_trial_strain(&Vector6::new(-1e-3, -2e-3, -1e-3, 1e-2, 1e-3, 0.0))
            .unwrap();
        let d = m.tangent();
        assert!((d - d.transpose()).abs().max() > 1e-6 * d.abs().max());
    }

    #[test]
    fn zero_dilatancy_apex_is_reported() {
        let mut m = soil(0.0);
        let err = m
            .set_trial_strain(&Vector6::new(5e-3, 5e-3, 5e-3, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, SolverError::IntegrationFailure(_)));
        assert!(m.commit_state().is_err());
    }
}
