use nalgebra::DVector;
use xfe_io::DataSlots;

use super::{Integrator, StiffnessKind, apply_increment, static_unbalance};
use crate::assembly::{self, GlobalSystem};
use crate::dof_map::DofMap;
use crate::domain::Domain;
use crate::error::{Result, SolverError};

const SLOT_INCREMENT: u16 = 0;

/// Static integrator: pseudo-time is the load factor λ, advanced by a
/// fixed increment Δλ per step.
#[derive(Debug, Clone)]
pub struct LoadControl {
    increment: f64,
}

impl LoadControl {
    pub fn new(increment: f64) -> Result<Self> {
        check_increment(increment)?;
        Ok(Self { increment })
    }
}

fn check_increment(increment: f64) -> Result<()> {
    if !(increment.is_finite() && increment > 0.0) {
        return Err(SolverError::InvalidInput(format!(
            "load increment must be positive, got {increment}"
        )));
    }
    Ok(())
}

impl Integrator for LoadControl {
    fn kind(&self) -> &'static str {
        "LoadControl"
    }

    fn increment(&self) -> f64 {
        self.increment
    }

    fn set_increment(&mut self, increment: f64) -> Result<()> {
        check_increment(increment)?;
        self.increment = increment;
        Ok(())
    }

    fn new_step(&mut self, domain: &mut Domain, _map: &DofMap) -> Result<()> {
        let lambda = domain.committed_time() + self.increment;
        domain.apply_loads(lambda)?;
        domain.update_elements()
    }

    fn form_tangent(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem, stiffness: StiffnessKind) {
        system.reset_tangent(map.num_equations());
        assembly::assemble_element_matrices(system, domain, map, |element| match stiffness {
            StiffnessKind::Current => element.tangent_stiffness(),
            StiffnessKind::Initial => element.initial_stiffness(),
        });
    }

    fn form_unbalance(&self, domain: &Domain, map: &DofMap, system: &mut GlobalSystem) {
        static_unbalance(domain, map, system);
    }

    fn update(&mut self, domain: &mut Domain, map: &DofMap, delta: &DVector<f64>) -> Result<()> {
        apply_increment(domain, map, delta, 0.0, 0.0);
        domain.update_elements()
    }

    fn send_state(&self) -> DataSlots {
        let mut slots = DataSlots::new();
        slots.put_scalar(SLOT_INCREMENT, self.increment);
        slots
    }

    fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        self.set_increment(slots.scalar(SLOT_INCREMENT)?)
    }
}
