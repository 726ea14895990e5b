//! Integrators: how the driver's equation unknowns map onto nodal
//! response quantities.
//!
//! An integrator owns the relation between the solved increment and the
//! nodes' trial displacement, velocity and acceleration, and it decides
//! which element matrices enter the system tangent:
//!
//! | Integrator          | Tangent                      | Unbalance                    |
//! |---------------------|------------------------------|------------------------------|
//! | `LoadControl`       | K                            | F(λ) − P(u)                  |
//! | `Newmark`           | K + γ/(βΔt) C + 1/(βΔt²) M   | F(t) − P(u) − M a − C v      |
//! | `CentralDifference` | 1/(2Δt) C + 1/Δt² M          | F(t) − P(u) − M a − C v      |
//!
//! Velocities and accelerations follow the integrator relations only; the
//! driver never touches them directly.

mod central_difference;
mod load_control;
mod newmark;

pub use central_difference::CentralDifference;
pub use load_control::LoadControl;
pub use newmark::{Newmark, NewmarkConfig};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use xfe_io::DataSlots;

use crate::assembly::{self, GlobalSystem};
use crate::dof_map::DofMap;
use crate::domain::{Domain, gather_element_vector};
use crate::error::Result;

/// Rayleigh damping coefficients,
/// `C = αM·M + βK·K + βK0·K_initial + βKc·K_committed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayleighFactors {
    pub alpha_m: f64,
    pub beta_k: f64,
    pub beta_k0: f64,
    pub beta_kc: f64,
}

impl RayleighFactors {
    pub fn new(alpha_m: f64, beta_k: f64) -> Self {
        Self {
            alpha_m,
            beta_k,
            ..Default::default()
        }
    }

    /// Mass- and stiffness-proportional coefficients giving damping
    /// ratios `zeta1`, `zeta2` at frequencies `freq1`, `freq2` (Hz).
    pub fn from_modal_damping(freq1: f64, freq2: f64, zeta1: f64, zeta2: f64) -> Self {
        let omega1 = 2.0 * std::f64::consts::PI * freq1;
        let omega2 = 2.0 * std::f64::consts::PI * freq2;

        // ζi = αM/(2ωi) + βK ωi/2
        let det = omega2 / omega1 - omega1 / omega2;
        let alpha_m = 2.0 * (zeta1 * omega2 - zeta2 * omega1) / det;
        let beta_k = 2.0 * (zeta2 / omega1 - zeta1 / omega2) / det;
        Self::new(alpha_m, beta_k)
    }

    pub fn is_zero(&self) -> bool {
        self.alpha_m == 0.0 && self.beta_k == 0.0 && self.beta_k0 == 0.0 && self.beta_kc == 0.0
    }
}

/// Which element stiffness enters the system tangent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StiffnessKind {
    /// Consistent tangent of the current trial state
    #[default]
    Current,
    /// Cached initial (elastic) stiffness
    Initial,
}

/// Static or transient time integrator.
pub trait Integrator: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Explicit schemes need exactly one linear solve per step.
    fn is_explicit(&self) -> bool {
        false
    }

    /// Whether reactions include inertia and damping forces.
    fn is_dynamic(&self) -> bool {
        false
    }

    /// Load-factor or time increment of the next step.
    fn increment(&self) -> f64;

    /// Changes the increment, e.g. when the driver cuts a step.
    fn set_increment(&mut self, increment: f64) -> Result<()>;

    /// Advances the pseudo-time, applies loads and predicts the trial
    /// response of the new step.
    fn new_step(&mut self, domain: &mut Domain, map: &DofMap) -> Result<()>;

    /// Forms the system tangent from scratch.
    fn form_tangent(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem, stiffness: StiffnessKind);

    /// Forms the unbalance (right-hand side) from scratch.
    fn form_unbalance(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem);

    /// Applies a solved increment and updates all elements.
    fn update(&mut self, domain: &mut Domain, map: &DofMap, delta: &DVector<f64>) -> Result<()>;

    fn commit(&mut self, domain: &mut Domain) -> Result<()> {
        domain.commit()
    }

    fn revert_to_last_commit(&mut self, domain: &mut Domain) -> Result<()> {
        domain.revert_to_last_commit()
    }

    /// Called after the DOF map has been rebuilt.
    fn domain_changed(&mut self, _domain: &Domain) {}

    fn send_state(&self) -> DataSlots;

    fn recv_state(&mut self, slots: &DataSlots) -> Result<()>;
}

/// Adds a global increment to the trial displacements and scaled copies
/// of it to the trial velocities and accelerations.
pub(crate) fn apply_increment(
    domain: &mut Domain,
    map: &DofMap,
    delta: &DVector<f64>,
    velocity_factor: f64,
    acceleration_factor: f64,
) {
    for (group, node) in map.groups().iter().zip(domain.nodes_mut()) {
        for (dof, eq) in group.equations().iter().enumerate() {
            let Some(eq) = eq else { continue };
            let du = delta[*eq];
            node.trial_disp[dof] += du;
            node.trial_vel[dof] += velocity_factor * du;
            node.trial_accel[dof] += acceleration_factor * du;
        }
    }
}

/// `F − P(u)`: applied nodal loads minus element resisting forces.
pub(crate) fn static_unbalance(domain: &Domain, map: &DofMap, system: &mut GlobalSystem) {
    system.reset_residual(map.num_equations());
    assembly::assemble_nodal_loads(system, domain, map);
    assembly::assemble_element_vectors(system, domain, map, |element, _| -element.resisting_force());
}

/// Subtracts inertia and damping forces `M a + C v` from the unbalance.
pub(crate) fn subtract_dynamic_forces(
    domain: &Domain,
    map: &DofMap,
    system: &mut GlobalSystem,
    rayleigh: &RayleighFactors,
) {
    assembly::assemble_element_vectors(system, domain, map, |element, nodes| {
        let accel = gather_element_vector(nodes, element, |n| &n.trial_accel);
        let mut force = element.mass() * accel;
        if !rayleigh.is_zero() {
            let vel = gather_element_vector(nodes, element, |n| &n.trial_vel);
            force += element.damping(rayleigh) * vel;
        }
        -force
    });

    let accel = map.gather(domain.nodes(), |n| &n.trial_accel);
    let vel = map.gather(domain.nodes(), |n| &n.trial_vel);
    let mut lumped = DVector::zeros(map.num_equations());
    for (group, node) in map.groups().iter().zip(domain.nodes()) {
        let Some(mass) = node.mass else { continue };
        for eq in group.equations().iter().flatten() {
            lumped[*eq] = mass;
        }
    }
    let inertia = lumped.component_mul(&(accel + vel * rayleigh.alpha_m));
    system.add_global_vector(&inertia, -1.0);
}
