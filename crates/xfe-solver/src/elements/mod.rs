//! Finite element library.
//!
//! Elements own their integration-point materials and reference their
//! nodes by [`NodeId`] only; node storage belongs to the
//! [`Domain`](crate::domain::Domain).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use xfe_io::DataSlots;

use crate::boundary_conditions::ElementLoad;
use crate::domain::{Node, NodeId};
use crate::error::Result;
use crate::integrator::RayleighFactors;
use crate::response::Response;

pub mod gauss;
pub mod solid;

pub use solid::{ContinuumElement, Hex8, Hex8Shape, Quad4, Quad4Shape, ShapeFamily, SolidSection};

/// Element families known to the model builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// 4-node bilinear quadrilateral, plane strain
    Quad4,
    /// 8-node trilinear hexahedron
    Hex8,
}

/// Element interface for incremental nonlinear analysis.
///
/// `update` pushes the current trial displacements of the incident nodes
/// into every integration point; the matrix and vector accessors then
/// reflect that trial state until the next commit or revert.
pub trait Element: Send + Sync + std::fmt::Debug {
    fn tag(&self) -> i32;

    fn kind(&self) -> ElementKind;

    /// Incident nodes in element order.
    fn nodes(&self) -> &[NodeId];

    fn dofs_per_node(&self) -> usize;

    fn num_dofs(&self) -> usize {
        self.nodes().len() * self.dofs_per_node()
    }

    /// Computes trial strains from the nodes' trial displacements and
    /// integrates every material point.
    ///
    /// # Errors
    /// Propagates the first constitutive failure unchanged.
    fn update(&mut self, nodes: &[Node]) -> Result<()>;

    /// Stiffness from the current (trial) consistent tangents.
    fn tangent_stiffness(&self) -> DMatrix<f64>;

    /// Stiffness from the initial elastic tangents (cached).
    fn initial_stiffness(&self) -> DMatrix<f64>;

    /// Stiffness from the last committed tangents.
    fn committed_stiffness(&self) -> DMatrix<f64>;

    fn mass(&self) -> DMatrix<f64>;

    /// Rayleigh damping `αM M + βK K + βK0 K0 + βKc Kc`.
    fn damping(&self, factors: &RayleighFactors) -> DMatrix<f64> {
        let n = self.num_dofs();
        let mut c = DMatrix::zeros(n, n);
        if factors.alpha_m != 0.0 {
            c += self.mass() * factors.alpha_m;
        }
        if factors.beta_k != 0.0 {
            c += self.tangent_stiffness() * factors.beta_k;
        }
        if factors.beta_k0 != 0.0 {
            c += self.initial_stiffness() * factors.beta_k0;
        }
        if factors.beta_kc != 0.0 {
            c += self.committed_stiffness() * factors.beta_kc;
        }
        c
    }

    /// Internal force from the stored stresses minus the applied element
    /// loads.
    fn resisting_force(&self) -> DVector<f64>;

    /// Clears the applied element load accumulator.
    fn zero_load(&mut self);

    /// Adds `factor × load` to the applied element loads.
    fn add_load(&mut self, load: &ElementLoad, factor: f64) -> Result<()>;

    fn set_time_increment(&mut self, _dt: f64) {}

    /// True when an integration point holds a failed trial update.
    fn has_failed_point(&self) -> bool;

    fn commit_state(&mut self) -> Result<()>;

    fn revert_to_last_commit(&mut self) -> Result<()>;

    fn revert_to_start(&mut self) -> Result<()>;

    /// String-keyed read-only query, e.g. `["stresses"]` or
    /// `["material", "0", "plastic_strain"]`.
    fn response(&self, query: &[&str]) -> Option<Response>;

    /// One slot set per integration point.
    fn send_state(&self) -> Vec<DataSlots>;

    fn recv_state(&mut self, slots: &[DataSlots]) -> Result<()>;
}
