//! Constitutive models for small-strain continuum analysis.
//!
//! Every model owns one [`IntegrationPointState`] and follows the same
//! protocol:
//!
//! ```text
//! set_trial_strain(ε) ──► stress(), tangent()      (trial, scratch)
//!        │
//!        ├── commit_state()          trial → committed
//!        └── revert_to_last_commit() committed → trial
//! ```
//!
//! A failed `set_trial_strain` leaves the point flagged; committing it is
//! refused until the next successful update or a revert.
//!
//! # Variants
//!
//! - [`ElasticIsotropic`]: linear elasticity
//! - [`J2Plasticity`]: von Mises plasticity with saturation + linear
//!   isotropic hardening and optional viscous regularisation
//! - [`DruckerPrager`]: pressure-sensitive plasticity with cone and apex
//!   return mappings
//! - [`IsotropicDamage`]: strain-driven scalar damage with exponential
//!   softening

mod damage;
mod drucker_prager;
mod elastic;
mod j2;
pub mod state;

pub use damage::IsotropicDamage;
pub use drucker_prager::DruckerPrager;
pub use elastic::ElasticIsotropic;
pub use j2::J2Plasticity;
pub use state::{IntegrationPointState, MaterialState};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xfe_io::DataSlots;

use crate::error::{Result, SolverError};
use crate::response::Response;
use crate::tensor::{Tangent, Voigt};

/// Local Newton budget shared by every return-mapping model of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnMappingConfig {
    /// Relative tolerance on the scalar consistency residual.
    pub tolerance: f64,
    /// Newton iterations per (sub-)increment.
    pub max_iterations: usize,
    /// Largest number of sub-increments tried before giving up (1 disables
    /// sub-stepping).
    pub max_substeps: usize,
}

impl Default for ReturnMappingConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 25,
            max_substeps: 16,
        }
    }
}

/// Capability set of a constitutive model bound to one integration point.
pub trait ConstitutiveModel: Send + Sync + std::fmt::Debug {
    /// Short model name used in logs and responses.
    fn kind(&self) -> &'static str;

    fn state(&self) -> &IntegrationPointState;

    fn state_mut(&mut self) -> &mut IntegrationPointState;

    /// Integrates the stress for a total trial strain (engineering shear).
    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()>;

    /// Elastic tangent of the undamaged, unyielded material.
    fn initial_tangent(&self) -> Tangent;

    /// Deep copy including both committed and trial state.
    fn get_copy(&self) -> Box<dyn ConstitutiveModel>;

    fn density(&self) -> f64 {
        0.0
    }

    /// Admissibility measure of the current state; `<= 0` inside the
    /// elastic domain.
    fn yield_value(&self) -> f64 {
        f64::NEG_INFINITY
    }

    /// Time step used by rate-dependent models.
    fn set_time_increment(&mut self, _dt: f64) {}

    fn stress(&self) -> Voigt {
        *self.state().stress()
    }

    fn strain(&self) -> Voigt {
        *self.state().strain()
    }

    fn tangent(&self) -> Tangent {
        *self.state().tangent()
    }

    fn commit_state(&mut self) -> Result<()> {
        self.state_mut().commit()
    }

    fn revert_to_last_commit(&mut self) -> Result<()> {
        self.state_mut().revert();
        Ok(())
    }

    fn revert_to_start(&mut self) -> Result<()> {
        self.state_mut().revert_to_start();
        Ok(())
    }

    fn response(&self, key: &str) -> Option<Response> {
        self.state().response(key)
    }

    fn send_state(&self) -> DataSlots {
        self.state().send_state()
    }

    fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        self.state_mut().recv_state(slots)
    }
}

/// Material description as it appears in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MaterialSpec {
    Elastic {
        elastic_modulus: f64,
        poissons_ratio: f64,
        #[serde(default)]
        density: f64,
    },
    J2Plasticity {
        bulk_modulus: f64,
        shear_modulus: f64,
        yield_stress: f64,
        /// Saturation stress; equal to `yield_stress` for linear hardening.
        saturation_stress: f64,
        #[serde(default)]
        saturation_exponent: f64,
        #[serde(default)]
        hardening_modulus: f64,
        #[serde(default)]
        viscosity: f64,
        #[serde(default)]
        density: f64,
    },
    DruckerPrager {
        elastic_modulus: f64,
        poissons_ratio: f64,
        cohesion: f64,
        /// Friction angle in degrees.
        friction_angle: f64,
        /// Dilatancy angle in degrees.
        dilatancy_angle: f64,
        #[serde(default)]
        hardening_modulus: f64,
        #[serde(default)]
        density: f64,
    },
    IsotropicDamage {
        elastic_modulus: f64,
        poissons_ratio: f64,
        /// Equivalent strain at damage onset.
        threshold_strain: f64,
        /// Softening strain controlling the post-peak slope.
        softening_strain: f64,
        #[serde(default)]
        density: f64,
    },
}

impl MaterialSpec {
    /// Whether the model has a viscous overstress term. The term scales
    /// with 1/Δt and only acts when the integrator advances time.
    pub fn is_rate_dependent(&self) -> bool {
        matches!(*self, MaterialSpec::J2Plasticity { viscosity, .. } if viscosity > 0.0)
    }

    pub fn build(&self, config: &ReturnMappingConfig) -> Result<Box<dyn ConstitutiveModel>> {
        let model: Box<dyn ConstitutiveModel> = match *self {
            MaterialSpec::Elastic {
                elastic_modulus,
                poissons_ratio,
                density,
            } => Box::new(ElasticIsotropic::new(elastic_modulus, poissons_ratio, density)?),
            MaterialSpec::J2Plasticity {
                bulk_modulus,
                shear_modulus,
                yield_stress,
                saturation_stress,
                saturation_exponent,
                hardening_modulus,
                viscosity,
                density,
            } => Box::new(
                J2Plasticity::new(
                    bulk_modulus,
                    shear_modulus,
                    yield_stress,
                    saturation_stress,
                    saturation_exponent,
                    hardening_modulus,
                    *config,
                )?
                .with_viscosity(viscosity)?
                .with_density(density),
            ),
            MaterialSpec::DruckerPrager {
                elastic_modulus,
                poissons_ratio,
                cohesion,
                friction_angle,
                dilatancy_angle,
                hardening_modulus,
                density,
            } => Box::new(
                DruckerPrager::new(
                    elastic_modulus,
                    poissons_ratio,
                    cohesion,
                    friction_angle.to_radians(),
                    dilatancy_angle.to_radians(),
                    hardening_modulus,
                    *config,
                )?
                .with_density(density),
            ),
            MaterialSpec::IsotropicDamage {
                elastic_modulus,
                poissons_ratio,
                threshold_strain,
                softening_strain,
                density,
            } => Box::new(
                IsotropicDamage::new(
                    elastic_modulus,
                    poissons_ratio,
                    threshold_strain,
                    softening_strain,
                )?
                .with_density(density),
            ),
        };
        Ok(model)
    }
}

pub(crate) fn check_elastic_constants(elastic_modulus: f64, poissons_ratio: f64) -> Result<()> {
    if !(elastic_modulus > 0.0) {
        return Err(SolverError::InvalidMaterial(format!(
            "elastic modulus must be positive, got {elastic_modulus}"
        )));
    }
    if !(poissons_ratio > -1.0 && poissons_ratio < 0.5) {
        return Err(SolverError::InvalidMaterial(format!(
            "Poisson's ratio must lie in (-1, 0.5), got {poissons_ratio}"
        )));
    }
    Ok(())
}

/// Named material prototypes and their element assignments.
///
/// Elements never share a model instance: [`instantiate`](Self::instantiate)
/// hands out a deep copy of the prototype for every integration point.
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    /// Prototypes by name
    materials: HashMap<String, Box<dyn ConstitutiveModel>>,
    /// Element-to-material assignments (element tag -> material name)
    element_materials: HashMap<i32, String>,
    return_mapping: ReturnMappingConfig,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_return_mapping(config: ReturnMappingConfig) -> Self {
        Self {
            return_mapping: config,
            ..Self::default()
        }
    }

    pub fn return_mapping(&self) -> &ReturnMappingConfig {
        &self.return_mapping
    }

    /// Builds a prototype from its description and registers it.
    pub fn add_material(&mut self, name: impl Into<String>, spec: &MaterialSpec) -> Result<()> {
        let model = spec.build(&self.return_mapping)?;
        self.add_prototype(name, model);
        Ok(())
    }

    pub fn add_prototype(&mut self, name: impl Into<String>, model: Box<dyn ConstitutiveModel>) {
        self.materials.insert(name.into(), model);
    }

    pub fn get_material(&self, name: &str) -> Option<&dyn ConstitutiveModel> {
        self.materials.get(name).map(|m| m.as_ref())
    }

    pub fn material_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.materials.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn assign_material(&mut self, element_tag: i32, material_name: impl Into<String>) {
        self.element_materials.insert(element_tag, material_name.into());
    }

    /// Fresh, independent copy of a named prototype.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn ConstitutiveModel>> {
        self.materials
            .get(name)
            .map(|m| m.get_copy())
            .ok_or_else(|| SolverError::InvalidMaterial(format!("unknown material '{name}'")))
    }

    /// Copy of the material assigned to an element.
    pub fn element_material(&self, element_tag: i32) -> Result<Box<dyn ConstitutiveModel>> {
        let name = self.element_materials.get(&element_tag).ok_or_else(|| {
            SolverError::InvalidMaterial(format!("no material assigned to element {element_tag}"))
        })?;
        self.instantiate(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector6;

    fn steel() -> MaterialSpec {
        MaterialSpec::J2Plasticity {
            bulk_modulus: 166_666.0,
            shear_modulus: 76_923.0,
            yield_stress: 250.0,
            saturation_stress: 250.0,
            saturation_exponent: 0.0,
            hardening_modulus: 1000.0,
            viscosity: 0.0,
            density: 7.85e-9,
        }
    }

    #[test]
    fn instances_are_independent_copies() {
        let mut library = MaterialLibrary::new();
        library.add_material("steel", &steel()).unwrap();
        library.assign_material(1, "steel");

        let mut a = library.element_material(1).unwrap();
        let b = library.element_material(1).unwrap();
        a.set_trial_strain(&Vector6::new(1e-4, 0.0, 0.0, 0.0, 0.0, 0.0))
            .unwrap();
        a.commit_state().unwrap();

        assert!(a.stress()[0] > 0.0);
        assert_eq!(b.stress(), Vector6::zeros());
        assert_eq!(library.get_material("steel").unwrap().stress(), Vector6::zeros());
    }

    #[test]
    fn unknown_material_is_reported() {
        let library = MaterialLibrary::new();
        assert!(matches!(
            library.element_material(4),
            Err(SolverError::InvalidMaterial(_))
        ));
        assert!(library.instantiate("concrete").is_err());
    }

    #[test]
    fn spec_parses_from_json() {
        let json = r#"{"type": "Elastic", "elastic_modulus": 1000.0, "poissons_ratio": 0.0}"#;
        let spec: MaterialSpec = serde_json::from_str(json).unwrap();
        let model = spec.build(&ReturnMappingConfig::default()).unwrap();
        assert_eq!(model.kind(), "ElasticIsotropic");
        assert_eq!(model.density(), 0.0);
    }

    #[test]
    fn invalid_constants_are_rejected() {
        let spec = MaterialSpec::Elastic {
            elastic_modulus: 1000.0,
            poissons_ratio: 0.5,
            density: 0.0,
        };
        assert!(matches!(
            spec.build(&ReturnMappingConfig::default()),
            Err(SolverError::InvalidMaterial(_))
        ));
    }
}
