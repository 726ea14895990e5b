use crate::error::Result;
use crate::tensor::{Tangent, Voigt, bulk_and_shear, isotropic_elastic_tangent};

use super::state::IntegrationPointState;
use super::{ConstitutiveModel, check_elastic_constants};

/// Isotropic linear elasticity, `σ = D ε`.
#[derive(Debug, Clone)]
pub struct ElasticIsotropic {
    elastic_modulus: f64,
    poissons_ratio: f64,
    density: f64,
    stiffness: Tangent,
    state: IntegrationPointState,
}

impl ElasticIsotropic {
    pub fn new(elastic_modulus: f64, poissons_ratio: f64, density: f64) -> Result<Self> {
        check_elastic_constants(elastic_modulus, poissons_ratio)?;
        let (bulk, shear) = bulk_and_shear(elastic_modulus, poissons_ratio);
        let stiffness = isotropic_elastic_tangent(bulk, shear);
        Ok(Self {
            elastic_modulus,
            poissons_ratio,
            density,
            stiffness,
            state: IntegrationPointState::new(Vec::new(), stiffness),
        })
    }

    pub fn elastic_modulus(&self) -> f64 {
        self.elastic_modulus
    }

    pub fn poissons_ratio(&self) -> f64 {
        self.poissons_ratio
    }
}

impl ConstitutiveModel for ElasticIsotropic {
    fn kind(&self) -> &'static str {
        "ElasticIsotropic"
    }

    fn state(&self) -> &IntegrationPointState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut IntegrationPointState {
        &mut self.state
    }

    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        let stress = self.stiffness * strain;
        self.state.set_trial(*strain, stress, &[], self.stiffness);
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
}
