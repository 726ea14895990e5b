//! Newmark β-method.
//!
//! ```text
//! u_{n+1} = u_n + Δt*u̇_n + (Δt²/2)*[(1-2β)*ü_n + 2β*ü_{n+1}]
//! u̇_{n+1} = u̇_n + Δt*[(1-γ)*ü_n + γ*ü_{n+1}]
//! ```
//!
//! Standard parameter choices:
//! - **Average acceleration** (unconditionally stable): γ = 1/2, β = 1/4
//! - **Linear acceleration**: γ = 1/2, β = 1/6
//!
//! The unknown is the displacement; velocity and acceleration follow from
//! the relations above at every iteration.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use xfe_io::DataSlots;

use super::{
    Integrator, RayleighFactors, StiffnessKind, apply_increment, static_unbalance,
    subtract_dynamic_forces,
};
use crate::assembly::{self, GlobalSystem};
use crate::dof_map::DofMap;
use crate::domain::Domain;
use crate::error::{Result, SolverError};

const SLOT_TIME_STEP: u16 = 0;

/// Newmark time integration parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewmarkConfig {
    /// Newmark β parameter (controls acceleration)
    pub beta: f64,
    /// Newmark γ parameter (controls velocity)
    pub gamma: f64,
    #[serde(default)]
    pub rayleigh: RayleighFactors,
}

impl NewmarkConfig {
    /// Average acceleration method (unconditionally stable, 2nd order accurate)
    ///
    /// γ = 1/2, β = 1/4
    pub fn average_acceleration() -> Self {
        Self {
            beta: 0.25,
            gamma: 0.5,
            rayleigh: RayleighFactors::default(),
        }
    }

    /// Linear acceleration method (conditionally stable)
    ///
    /// γ = 1/2, β = 1/6
    pub fn linear_acceleration() -> Self {
        Self {
            beta: 1.0 / 6.0,
            gamma: 0.5,
            rayleigh: RayleighFactors::default(),
        }
    }

    /// C = αM*M + βK*K
    pub fn with_rayleigh_damping(mut self, alpha_m: f64, beta_k: f64) -> Self {
        self.rayleigh = RayleighFactors::new(alpha_m, beta_k);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.beta > 0.0 && self.gamma > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "Newmark parameters must be positive (beta = {}, gamma = {})",
                self.beta, self.gamma
            )));
        }
        Ok(())
    }
}

impl Default for NewmarkConfig {
    fn default() -> Self {
        Self::average_acceleration()
    }
}

/// Implicit Newmark integrator.
#[derive(Debug, Clone)]
pub struct Newmark {
    config: NewmarkConfig,
    dt: f64,
}

impl Newmark {
    pub fn new(config: NewmarkConfig, dt: f64) -> Result<Self> {
        config.validate()?;
        check_time_step(dt)?;
        Ok(Self { config, dt })
    }

    pub fn config(&self) -> &NewmarkConfig {
        &self.config
    }

    /// `(c2, c3)`: velocity and acceleration per unit displacement
    /// increment.
    fn coefficients(&self) -> (f64, f64) {
        let NewmarkConfig { beta, gamma, .. } = self.config;
        (gamma / (beta * self.dt), 1.0 / (beta * self.dt * self.dt))
    }
}

fn check_time_step(dt: f64) -> Result<()> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(SolverError::InvalidInput(format!(
            "time step must be positive, got {dt}"
        )));
    }
    Ok(())
}

impl Integrator for Newmark {
    fn kind(&self) -> &'static str {
        "Newmark"
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn increment(&self) -> f64 {
        self.dt
    }

    fn set_increment(&mut self, increment: f64) -> Result<()> {
        check_time_step(increment)?;
        self.dt = increment;
        Ok(())
    }

    fn new_step(&mut self, domain: &mut Domain, _map: &DofMap) -> Result<()> {
        let time = domain.committed_time() + self.dt;
        domain.apply_loads(time)?;
        domain.set_time_increment(self.dt);

        // Predictor at unchanged free displacements; constrained DOFs
        // already carry their imposed values.
        let NewmarkConfig { beta, gamma, .. } = self.config;
        let dt = self.dt;
        for node in domain.nodes_mut() {
            for i in 0..node.ndof() {
                let (u, v, a) = (
                    node.committed_disp[i],
                    node.committed_vel[i],
                    node.committed_accel[i],
                );
                let du = node.trial_disp[i] - u;
                let accel =
                    du / (beta * dt * dt) - v / (beta * dt) - (0.5 / beta - 1.0) * a;
                node.trial_accel[i] = accel;
                node.trial_vel[i] = v + dt * ((1.0 - gamma) * a + gamma * accel);
            }
        }
        domain.update_elements()
    }

    fn form_tangent(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem, stiffness: StiffnessKind) {
        let (c2, c3) = self.coefficients();
        let rayleigh = self.config.rayleigh;
        system.reset_tangent(map.num_equations());
        assembly::assemble_element_matrices(system, domain, map, |element| {
            let mut k = match stiffness {
                StiffnessKind::Current => element.tangent_stiffness(),
                StiffnessKind::Initial => element.initial_stiffness(),
            };
            k += element.mass() * c3;
            if !rayleigh.is_zero() {
                k += element.damping(&rayleigh) * c2;
            }
            k
        });
        assembly::assemble_nodal_mass(system, domain, map, c3 + c2 * rayleigh.alpha_m);
    }

    fn form_unbalance(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem) {
        static_unbalance(domain, map, system);
        subtract_dynamic_forces(domain, map, system, &self.config.rayleigh);
    }

    fn update(&mut self, domain: &mut Domain, map: &DofMap, delta: &DVector<f64>) -> Result<()> {
        let (c2, c3) = self.coefficients();
        apply_increment(domain, map, delta, c2, c3);
        domain.update_elements()
    }

    fn send_state(&self) -> DataSlots {
        let mut slots = DataSlots::new();
        slots.put_scalar(SLOT_TIME_STEP, self.dt);
        slots
    }

    fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        self.set_increment(slots.scalar(SLOT_TIME_STEP)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_conditions::{LoadPattern, TimeSeries};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    /// Free point mass m = 2 under a constant force F = 4.
    fn point_mass() -> (Domain, DofMap) {
        let mut domain = Domain::new();
        domain.add_node(1, Vector3::zeros(), 1).unwrap();
        domain.set_nodal_mass(1, 2.0).unwrap();
        let mut pattern = LoadPattern::new(1, TimeSeries::Constant { factor: 1.0 });
        pattern.add_nodal_load(1, vec![4.0]);
        domain.add_pattern(pattern).unwrap();
        let map = DofMap::build(&domain);
        (domain, map)
    }

    fn solve_one_step(integrator: &mut Newmark, domain: &mut Domain, map: &DofMap) {
        let mut system = GlobalSystem::new(map.num_equations());
        integrator.new_step(domain, map).unwrap();
        integrator.form_tangent(domain, map, &mut system, StiffnessKind::Current);
        integrator.form_unbalance(domain, map, &mut system);
        let k = system.to_dense();
        let delta = DVector::from_element(1, system.residual()[0] / k[(0, 0)]);
        integrator.update(domain, map, &delta).unwrap();
        integrator.commit(domain).unwrap();
    }

    #[test]
    fn constant_force_on_free_mass() {
        let (mut domain, map) = point_mass();
        assert_eq!(map.num_equations(), 1);
        let mut newmark = Newmark::new(NewmarkConfig::average_acceleration(), 0.1).unwrap();

        solve_one_step(&mut newmark, &mut domain, &map);
        let node = domain.node_by_tag(1).unwrap();
        assert_relative_eq!(node.committed_accel[0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(node.committed_vel[0], 0.1, max_relative = 1e-12);
        assert_relative_eq!(node.committed_disp[0], 0.005, max_relative = 1e-12);
        assert_relative_eq!(domain.committed_time(), 0.1, max_relative = 1e-12);

        // from a consistent start the scheme is exact for constant acceleration
        solve_one_step(&mut newmark, &mut domain, &map);
        let node = domain.node_by_tag(1).unwrap();
        assert_relative_eq!(node.committed_accel[0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(node.committed_vel[0], 0.3, max_relative = 1e-12);
        assert_relative_eq!(node.committed_disp[0], 0.025, max_relative = 1e-12);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut config = NewmarkConfig::linear_acceleration();
        config.beta = 0.0;
        assert!(Newmark::new(config, 0.1).is_err());
        assert!(Newmark::new(NewmarkConfig::default(), -1.0).is_err());
    }
}
