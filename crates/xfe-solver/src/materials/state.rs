//! Committed / trial state of one integration point.
//!
//! The trial half is scratch space written by `set_trial_strain`; the
//! committed half only changes in [`IntegrationPointState::commit`].
//! Reads (`stress`, `strain`, `tangent`) always come from the trial half,
//! which equals the committed half right after a commit or a revert.

use nalgebra::{Matrix6, Vector6};
use xfe_io::DataSlots;

use crate::error::{Result, SolverError};
use crate::response::Response;
use crate::tensor::{Tangent, Voigt};

const SLOT_COMMITTED_STRAIN: u16 = 0;
const SLOT_COMMITTED_STRESS: u16 = 1;
const SLOT_COMMITTED_INTERNAL: u16 = 2;
const SLOT_COMMITTED_TANGENT: u16 = 3;
const SLOT_TRIAL_STRAIN: u16 = 4;
const SLOT_TRIAL_STRESS: u16 = 5;
const SLOT_TRIAL_INTERNAL: u16 = 6;
const SLOT_TRIAL_TANGENT: u16 = 7;
const SLOT_FAILED: u16 = 8;

/// Strain, stress and model-specific internal variables at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialState {
    pub strain: Voigt,
    pub stress: Voigt,
    pub internal: Vec<f64>,
}

impl MaterialState {
    fn pristine(internal: Vec<f64>) -> Self {
        Self {
            strain: Vector6::zeros(),
            stress: Vector6::zeros(),
            internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationPointState {
    committed: MaterialState,
    trial: MaterialState,
    committed_tangent: Tangent,
    trial_tangent: Tangent,
    initial_internal: Vec<f64>,
    initial_tangent: Tangent,
    failed: bool,
}

impl IntegrationPointState {
    /// Zero-strain state with the given initial internal variables.
    pub fn new(initial_internal: Vec<f64>, initial_tangent: Tangent) -> Self {
        Self {
            committed: MaterialState::pristine(initial_internal.clone()),
            trial: MaterialState::pristine(initial_internal.clone()),
            committed_tangent: initial_tangent,
            trial_tangent: initial_tangent,
            initial_internal,
            initial_tangent,
            failed: false,
        }
    }

    pub fn committed(&self) -> &MaterialState {
        &self.committed
    }

    pub fn trial(&self) -> &MaterialState {
        &self.trial
    }

    pub fn stress(&self) -> &Voigt {
        &self.trial.stress
    }

    pub fn strain(&self) -> &Voigt {
        &self.trial.strain
    }

    pub fn tangent(&self) -> &Tangent {
        &self.trial_tangent
    }

    pub fn committed_tangent(&self) -> &Tangent {
        &self.committed_tangent
    }

    pub fn internal(&self) -> &[f64] {
        &self.trial.internal
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Stores the result of a successful return mapping.
    pub fn set_trial(&mut self, strain: Voigt, stress: Voigt, internal: &[f64], tangent: Tangent) {
        self.trial.strain = strain;
        self.trial.stress = stress;
        self.trial.internal.clear();
        self.trial.internal.extend_from_slice(internal);
        self.trial_tangent = tangent;
        self.failed = false;
    }

    /// Flags the trial half as unusable until the next successful update
    /// or a revert.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Copies trial into committed. Idempotent.
    pub fn commit(&mut self) -> Result<()> {
        if self.failed {
            return Err(SolverError::CorruptState(
                "cannot commit an integration point whose last update failed".into(),
            ));
        }
        self.committed.clone_from(&self.trial);
        self.committed_tangent = self.trial_tangent;
        Ok(())
    }

    pub fn revert(&mut self) {
        self.trial.clone_from(&self.committed);
        self.trial_tangent = self.committed_tangent;
        self.failed = false;
    }

    pub fn revert_to_start(&mut self) {
        self.committed = MaterialState::pristine(self.initial_internal.clone());
        self.committed_tangent = self.initial_tangent;
        self.revert();
    }

    /// Queries shared by every constitutive model.
    pub fn response(&self, key: &str) -> Option<Response> {
        match key {
            "stress" | "stresses" => Some(Response::voigt(self.stress())),
            "strain" | "strains" => Some(Response::voigt(self.strain())),
            "tangent" => Some(Response::tangent(self.tangent())),
            "internal" => Some(Response::Vector(nalgebra::DVector::from_column_slice(
                self.internal(),
            ))),
            _ => None,
        }
    }

    pub fn send_state(&self) -> DataSlots {
        let mut slots = DataSlots::new();
        slots.put(SLOT_COMMITTED_STRAIN, self.committed.strain.as_slice());
        slots.put(SLOT_COMMITTED_STRESS, self.committed.stress.as_slice());
        slots.put(SLOT_COMMITTED_INTERNAL, self.committed.internal.clone());
        slots.put(SLOT_COMMITTED_TANGENT, self.committed_tangent.as_slice());
        slots.put(SLOT_TRIAL_STRAIN, self.trial.strain.as_slice());
        slots.put(SLOT_TRIAL_STRESS, self.trial.stress.as_slice());
        slots.put(SLOT_TRIAL_INTERNAL, self.trial.internal.clone());
        slots.put(SLOT_TRIAL_TANGENT, self.trial_tangent.as_slice());
        slots.put_scalar(SLOT_FAILED, if self.failed { 1.0 } else { 0.0 });
        slots
    }

    /// Restores a state produced by [`send_state`](Self::send_state).
    /// The internal variable count must match this model's schema.
    pub fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        let n_internal = self.initial_internal.len();
        let committed = MaterialState {
            strain: Vector6::from_column_slice(slots.require(SLOT_COMMITTED_STRAIN, 6)?),
            stress: Vector6::from_column_slice(slots.require(SLOT_COMMITTED_STRESS, 6)?),
            internal: slots.require(SLOT_COMMITTED_INTERNAL, n_internal)?.to_vec(),
        };
        let trial = MaterialState {
            strain: Vector6::from_column_slice(slots.require(SLOT_TRIAL_STRAIN, 6)?),
            stress: Vector6::from_column_slice(slots.require(SLOT_TRIAL_STRESS, 6)?),
            internal: slots.require(SLOT_TRIAL_INTERNAL, n_internal)?.to_vec(),
        };
        self.committed_tangent = Matrix6::from_column_slice(slots.require(SLOT_COMMITTED_TANGENT, 36)?);
        self.trial_tangent = Matrix6::from_column_slice(slots.require(SLOT_TRIAL_TANGENT, 36)?);
        self.failed = slots.scalar(SLOT_FAILED)? != 0.0;
        self.committed = committed;
        self.trial = trial;
        Ok(())
    }
}
