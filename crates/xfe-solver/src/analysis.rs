//! Analysis pipeline: integrator selection, driver setup and checkpoints.
//!
//! An [`AnalysisConfig`] names the integrator, the number of steps and
//! the equilibrium settings. [`AnalysisPipeline::run`] builds the driver,
//! optionally resumes from a restart file, advances the domain and
//! collects committed displacements and reactions per node tag.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xfe_io::{load_restart, save_restart};

use crate::backend::{BackendKind, create_backend};
use crate::domain::Domain;
use crate::error::Result;
use crate::model_builder::{ModelBuilder, ModelInput};
use crate::integrator::{
    CentralDifference, Integrator, LoadControl, Newmark, NewmarkConfig, RayleighFactors,
};
use crate::nonlinear_solver::{AnalysisReport, NonlinearConfig, NonlinearSolver, SolutionAlgorithm};

/// Analysis family implied by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisType {
    /// Quasi-static load stepping
    Static,
    /// Time integration with inertia
    Transient,
}

/// Integrator selection as it appears in a model file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IntegratorConfig {
    LoadControl {
        increment: f64,
    },
    Newmark {
        dt: f64,
        #[serde(default)]
        parameters: NewmarkConfig,
    },
    CentralDifference {
        dt: f64,
        #[serde(default)]
        rayleigh: RayleighFactors,
    },
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig::LoadControl { increment: 1.0 }
    }
}

impl IntegratorConfig {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            IntegratorConfig::LoadControl { .. } => AnalysisType::Static,
            IntegratorConfig::Newmark { .. } | IntegratorConfig::CentralDifference { .. } => {
                AnalysisType::Transient
            }
        }
    }

    pub fn build(&self) -> Result<Box<dyn Integrator>> {
        Ok(match *self {
            IntegratorConfig::LoadControl { increment } => Box::new(LoadControl::new(increment)?),
            IntegratorConfig::Newmark { dt, parameters } => Box::new(Newmark::new(parameters, dt)?),
            IntegratorConfig::CentralDifference { dt, rayleigh } => {
                Box::new(CentralDifference::new(dt, rayleigh)?)
            }
        })
    }
}

/// Analysis configuration and control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub integrator: IntegratorConfig,
    /// Total number of steps, counted from the start of the analysis
    pub num_steps: usize,
    pub solver: NonlinearConfig,
    pub backend: BackendKind,
    /// Restart file written after the last committed step
    pub checkpoint: Option<PathBuf>,
    /// Restart file to resume from
    pub restart_from: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            integrator: IntegratorConfig::default(),
            num_steps: 1,
            solver: NonlinearConfig::default(),
            backend: BackendKind::default(),
            checkpoint: None,
            restart_from: None,
        }
    }
}

/// Committed nodal results after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResults {
    pub analysis_type: AnalysisType,
    pub report: AnalysisReport,
    pub num_equations: usize,
    /// Committed displacements by node tag
    pub displacements: BTreeMap<i32, Vec<f64>>,
    /// Reactions by node tag
    pub reactions: BTreeMap<i32, Vec<f64>>,
}

/// Main analysis pipeline orchestrator
pub struct AnalysisPipeline {
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Load-controlled static pipeline with `num_steps` equal increments
    /// reaching a load factor of one.
    pub fn static_load_steps(num_steps: usize) -> Self {
        let increment = 1.0 / num_steps.max(1) as f64;
        Self::new(AnalysisConfig {
            integrator: IntegratorConfig::LoadControl { increment },
            num_steps,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analysis_type(&self) -> AnalysisType {
        self.config.integrator.analysis_type()
    }

    /// Builds a fresh domain from `input` and runs its analysis section.
    ///
    /// Every call starts from the pristine model, so perturbed copies of
    /// one input can be evaluated independently.
    pub fn run_model(input: &ModelInput) -> Result<(Domain, AnalysisResults)> {
        let (mut domain, _materials) = ModelBuilder::build(input)?;
        if input.analysis.integrator.analysis_type() == AnalysisType::Static {
            let viscous = input.rate_dependent_materials();
            if !viscous.is_empty() {
                warn!(
                    materials = ?viscous,
                    "viscosity has no effect under load stepping; response is rate-independent"
                );
            }
        }
        let results = Self::new(input.analysis.clone()).run(&mut domain)?;
        Ok((domain, results))
    }

    /// Runs the configured analysis on `domain`.
    ///
    /// When a checkpoint path is configured it is written after the run,
    /// also when a step fails, so the last committed state can be resumed.
    pub fn run(&self, domain: &mut Domain) -> Result<AnalysisResults> {
        let integrator = self.config.integrator.build()?;
        let backend = create_backend(self.config.backend);
        let mut solver_config = self.config.solver;
        if integrator.is_explicit() && solver_config.algorithm != SolutionAlgorithm::Linear {
            debug!(integrator = integrator.kind(), "explicit integrator, using linear algorithm");
            solver_config.algorithm = SolutionAlgorithm::Linear;
        }
        let mut solver = NonlinearSolver::new(integrator, backend, solver_config)?;

        if let Some(path) = &self.config.restart_from {
            let state = load_restart(path)?;
            solver.restore(domain, &state)?;
            info!(path = %path.display(), step = state.step, time = state.time, "resumed from restart");
        }

        let remaining = self.config.num_steps.saturating_sub(solver.steps_taken());
        let outcome = solver.analyze(domain, remaining);

        if let Some(path) = &self.config.checkpoint {
            save_restart(path, &solver.checkpoint(domain))?;
            info!(path = %path.display(), step = solver.steps_taken(), "checkpoint written");
        }

        let report = outcome.inspect_err(|e| warn!(error = %e, "analysis aborted"))?;

        let mut displacements = BTreeMap::new();
        let mut reactions = BTreeMap::new();
        for node in domain.nodes() {
            displacements.insert(node.tag, node.committed_disp.iter().copied().collect());
            reactions.insert(node.tag, node.reaction.iter().copied().collect());
        }

        Ok(AnalysisResults {
            analysis_type: self.analysis_type(),
            report,
            num_equations: solver.dof_map().num_equations(),
            displacements,
            reactions,
        })
    }
}
