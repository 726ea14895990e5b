//! Incremental nonlinear finite element solver.
//!
//! The crate integrates path-dependent constitutive models at element
//! integration points, assembles global tangents and unbalanced forces
//! over a mutable domain, and drives the domain through load or time
//! steps with a commit/revert protocol that keeps every layer consistent
//! when an attempt fails.
//!
//! Layers, bottom up:
//! - [`materials`]: elastic, J2, Drucker–Prager and damage models
//! - [`elements`]: isoparametric continuum elements owning one material
//!   copy per integration point
//! - [`domain`] and [`dof_map`]: nodes, elements, constraints, load
//!   patterns and equation numbering
//! - [`assembly`] and [`backend`]: global system and linear solvers
//! - [`integrator`] and [`nonlinear_solver`]: static and transient
//!   stepping with Newton-type iteration and step cutting
//! - [`model_builder`] and [`analysis`]: JSON models and the run pipeline

pub mod analysis;
pub mod assembly;
pub mod backend;
pub mod boundary_conditions;
pub mod dof_map;
pub mod domain;
pub mod elements;
pub mod error;
pub mod integrator;
pub mod materials;
pub mod model_builder;
pub mod nonlinear_solver;
pub mod response;
pub mod tensor;

pub use analysis::{AnalysisConfig, AnalysisPipeline, AnalysisResults, AnalysisType, IntegratorConfig};
pub use assembly::GlobalSystem;
pub use backend::{
    BackendError, BackendKind, LinearSolver, LinearSystemData, NativeBackend, SolveInfo,
    SparseCholeskyBackend, TangentTriplets, create_backend, default_backend,
};
pub use boundary_conditions::{
    DofId, ElementLoad, LoadPattern, NodalLoad, PrescribedDisplacement, SpConstraint, TimeSeries,
};
pub use dof_map::{DofGroup, DofMap};
pub use domain::{Domain, ElementId, Node, NodeId};
pub use elements::{Element, ElementKind, Hex8, Quad4, SolidSection};
pub use error::{Result, SolverError};
pub use integrator::{
    CentralDifference, Integrator, LoadControl, Newmark, NewmarkConfig, RayleighFactors,
    StiffnessKind,
};
pub use materials::{
    ConstitutiveModel, DruckerPrager, ElasticIsotropic, IntegrationPointState, IsotropicDamage,
    J2Plasticity, MaterialLibrary, MaterialSpec, ReturnMappingConfig,
};
pub use model_builder::{ModelBuilder, ModelInput};
pub use nonlinear_solver::{
    AnalysisReport, ConvergenceTest, NonlinearConfig, NonlinearSolver, SolutionAlgorithm,
    StepControl, StepReport,
};
pub use response::Response;
