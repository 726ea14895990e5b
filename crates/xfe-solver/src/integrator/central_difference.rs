//! Explicit central difference.
//!
//! Equilibrium is written at time t with
//!
//! ```text
//! ü_t = (u_{t+Δt} - 2u_t + u_{t-Δt}) / Δt²
//! u̇_t = (u_{t+Δt} - u_{t-Δt}) / 2Δt
//! ```
//!
//! so one solve with `M/Δt² + C/2Δt` yields `u_{t+Δt}`. Element
//! resisting forces are evaluated at `u_t` only. The increment cannot
//! change once the first step has been committed.

use nalgebra::DVector;
use xfe_io::DataSlots;

use super::{Integrator, RayleighFactors, StiffnessKind, static_unbalance, subtract_dynamic_forces};
use crate::assembly::{self, GlobalSystem};
use crate::dof_map::DofMap;
use crate::domain::Domain;
use crate::error::{Result, SolverError};

const SLOT_TIME_STEP: u16 = 0;
const SLOT_PREVIOUS_DISP: u16 = 1;

#[derive(Debug, Clone)]
pub struct CentralDifference {
    dt: f64,
    rayleigh: RayleighFactors,
    /// `u_{t-Δt}` per node, arena order
    previous_disp: Vec<DVector<f64>>,
    started: bool,
}

impl CentralDifference {
    pub fn new(dt: f64, rayleigh: RayleighFactors) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "time step must be positive, got {dt}"
            )));
        }
        if rayleigh.beta_k != 0.0 || rayleigh.beta_kc != 0.0 {
            return Err(SolverError::InvalidInput(
                "central difference supports mass and initial-stiffness damping only".into(),
            ));
        }
        Ok(Self {
            dt,
            rayleigh,
            previous_disp: Vec::new(),
            started: false,
        })
    }

    fn resize(&mut self, domain: &Domain) {
        let nodes = domain.nodes();
        if self.previous_disp.len() != nodes.len() {
            self.previous_disp = nodes.iter().map(|n| n.committed_disp.clone()).collect();
        }
    }
}

impl Integrator for CentralDifference {
    fn kind(&self) -> &'static str {
        "CentralDifference"
    }

    fn is_explicit(&self) -> bool {
        true
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn increment(&self) -> f64 {
        self.dt
    }

    fn set_increment(&mut self, increment: f64) -> Result<()> {
        if self.started && increment != self.dt {
            return Err(SolverError::InvalidInput(
                "central difference time step cannot change during an analysis".into(),
            ));
        }
        if !(increment.is_finite() && increment > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "time step must be positive, got {increment}"
            )));
        }
        self.dt = increment;
        Ok(())
    }

    fn new_step(&mut self, domain: &mut Domain, _map: &DofMap) -> Result<()> {
        self.resize(domain);
        let time = domain.committed_time();
        domain.apply_loads(time)?;
        domain.set_time_increment(self.dt);

        // Response at time t for a zero increment.
        let dt = self.dt;
        for (node, previous) in domain.nodes_mut().iter_mut().zip(&self.previous_disp) {
            let step = &node.committed_disp - previous;
            node.trial_accel = &step * (-1.0 / (dt * dt));
            node.trial_vel = &step * (1.0 / (2.0 * dt));
        }
        domain.update_elements()
    }

    fn form_tangent(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem, _stiffness: StiffnessKind) {
        let (c2, c3) = (0.5 / self.dt, 1.0 / (self.dt * self.dt));
        let rayleigh = self.rayleigh;
        system.reset_tangent(map.num_equations());
        assembly::assemble_element_matrices(system, domain, map, |element| {
            let mut k = element.mass() * c3;
            if !rayleigh.is_zero() {
                k += element.damping(&rayleigh) * c2;
            }
            k
        });
        assembly::assemble_nodal_mass(system, domain, map, c3 + c2 * rayleigh.alpha_m);
    }

    fn form_unbalance(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem) {
        static_unbalance(domain, map, system);
        subtract_dynamic_forces(domain, map, system, &self.rayleigh);
    }

    fn update(&mut self, domain: &mut Domain, map: &DofMap, delta: &DVector<f64>) -> Result<()> {
        let dt = self.dt;
        for (group, node) in map.groups().iter().zip(domain.nodes_mut()) {
            for (dof, eq) in group.equations().iter().enumerate() {
                let Some(eq) = eq else { continue };
                let du = delta[*eq];
                node.trial_disp[dof] += du;
                node.trial_accel[dof] += du / (dt * dt);
                node.trial_vel[dof] += du / (2.0 * dt);
            }
        }
        // constrained DOFs move to their values at t + Δt
        let time = domain.committed_time() + dt;
        domain.apply_loads(time)?;
        domain.update_elements()
    }

    fn commit(&mut self, domain: &mut Domain) -> Result<()> {
        let previous: Vec<DVector<f64>> = domain.nodes().iter().map(|n| n.committed_disp.clone()).collect();
        domain.commit()?;
        self.previous_disp = previous;
        self.started = true;
        Ok(())
    }

    fn domain_changed(&mut self, domain: &Domain) {
        self.resize(domain);
    }

    fn send_state(&self) -> DataSlots {
        let mut slots = DataSlots::new();
        slots.put_scalar(SLOT_TIME_STEP, self.dt);
        let flat: Vec<f64> = self
            .previous_disp
            .iter()
            .flat_map(|d| d.iter().copied())
            .collect();
        slots.put(SLOT_PREVIOUS_DISP, flat);
        slots
    }

    fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        let dt = slots.scalar(SLOT_TIME_STEP)?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolverError::CorruptState(format!("invalid time step {dt}")));
        }
        let flat = slots.require_any(SLOT_PREVIOUS_DISP)?;
        let expected: usize = self.previous_disp.iter().map(|d| d.len()).sum();
        if !self.previous_disp.is_empty() && flat.len() != expected {
            return Err(SolverError::CorruptState(format!(
                "central difference history has {} values, expected {expected}",
                flat.len()
            )));
        }
        let mut offset = 0;
        for d in &mut self.previous_disp {
            d.copy_from_slice(&flat[offset..offset + d.len()]);
            offset += d.len();
        }
        self.dt = dt;
        self.started = true;
        Ok(())
    }
}
