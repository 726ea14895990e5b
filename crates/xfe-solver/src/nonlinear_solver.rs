//! Incremental-iterative solution driver.
//!
//! Solves the equilibrium equation of every step
//! R(u) = F_ext(t) - F_int(u) [- M ü - C u̇] = 0
//!
//! # Step State Machine
//!
//! ```text
//! predict ─► form K, R ─► solve K Δu = R ─► update ─► test ─┐
//!                ▲                                         │ not converged
//!                └─────────────────────────────────────────┘
//! converged ─► commit
//! failure   ─► revert_to_last_commit ─► (halve step, retry) or report
//! ```
//!
//! # Convergence Tests
//!
//! - **NormUnbalance**: ||R|| < tol
//! - **RelativeNormUnbalance**: ||R|| / ||R_0|| < tol
//! - **NormDisplacementIncrement**: ||Δu|| < tol
//! - **EnergyIncrement**: ½ |Δu·R| < tol
//!
//! Only recoverable failures (integration, linear solve, convergence)
//! trigger a step cut; everything else aborts the analysis.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xfe_io::RestartState;

use crate::assembly::GlobalSystem;
use crate::backend::LinearSolver;
use crate::dof_map::DofMap;
use crate::domain::Domain;
use crate::error::{Result, SolverError};
use crate::integrator::{Integrator, StiffnessKind};

/// Equilibrium iteration scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionAlgorithm {
    /// One solve per step, no convergence test
    Linear,
    /// Tangent re-formed every iteration
    #[default]
    Newton,
    /// Tangent formed once per step
    ModifiedNewton,
    /// Initial (elastic) stiffness throughout
    InitialNewton,
}

/// Convergence criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceTest {
    NormUnbalance,
    #[default]
    RelativeNormUnbalance,
    NormDisplacementIncrement,
    EnergyIncrement,
}

/// Adaptive step cutting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepControl {
    /// Maximum number of successive halvings of a failed step
    pub max_cuts: usize,
}

impl Default for StepControl {
    fn default() -> Self {
        Self { max_cuts: 4 }
    }
}

/// Nonlinear solver configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearConfig {
    pub algorithm: SolutionAlgorithm,
    pub test: ConvergenceTest,
    pub tolerance: f64,
    /// Maximum number of iterations per step
    pub max_iterations: usize,
    /// The iteration diverges once ||R|| exceeds this multiple of the
    /// step's first unbalance
    pub divergence_factor: f64,
    /// Backtracking line search on ||R||
    pub use_line_search: bool,
    /// Maximum line search halvings
    pub max_line_search: usize,
    pub step_control: StepControl,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        Self {
            algorithm: SolutionAlgorithm::Newton,
            test: ConvergenceTest::RelativeNormUnbalance,
            tolerance: 1e-8,
            max_iterations: 25,
            divergence_factor: 1e8,
            use_line_search: false,
            max_line_search: 5,
            step_control: StepControl::default(),
        }
    }
}

impl NonlinearConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) || self.max_iterations == 0 || !(self.divergence_factor > 1.0) {
            return Err(SolverError::InvalidInput(format!(
                "invalid nonlinear solver settings: tolerance {}, max_iterations {}, divergence_factor {}",
                self.tolerance, self.max_iterations, self.divergence_factor
            )));
        }
        Ok(())
    }
}

/// Outcome of one committed (outer) step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: usize,
    /// Committed pseudo-time (λ or t)
    pub time: f64,
    /// Equilibrium iterations, summed over sub-steps
    pub iterations: usize,
    /// Final value of the convergence test
    pub norm: f64,
    /// Number of step halvings needed
    pub cuts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub steps: Vec<StepReport>,
    pub final_time: f64,
}

impl AnalysisReport {
    pub fn total_iterations(&self) -> usize {
        self.steps.iter().map(|s| s.iterations).sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    iterations: usize,
    norm: f64,
    cuts: usize,
}

/// Drives a domain through load or time steps.
pub struct NonlinearSolver {
    integrator: Box<dyn Integrator>,
    backend: Box<dyn LinearSolver>,
    config: NonlinearConfig,
    map: DofMap,
    system: GlobalSystem,
    steps_taken: usize,
}

impl NonlinearSolver {
    pub fn new(
        integrator: Box<dyn Integrator>,
        backend: Box<dyn LinearSolver>,
        config: NonlinearConfig,
    ) -> Result<Self> {
        config.validate()?;
        if integrator.is_explicit() && config.algorithm != SolutionAlgorithm::Linear {
            return Err(SolverError::InvalidInput(format!(
                "{} is explicit and needs the Linear algorithm",
                integrator.kind()
            )));
        }
        Ok(Self {
            integrator,
            backend,
            config,
            map: DofMap::default(),
            system: GlobalSystem::default(),
            steps_taken: 0,
        })
    }

    pub fn config(&self) -> &NonlinearConfig {
        &self.config
    }

    pub fn integrator(&self) -> &dyn Integrator {
        self.integrator.as_ref()
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.map
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Rebuilds the DOF map after a domain change.
    fn refresh_map(&mut self, domain: &Domain) {
        if !self.map.is_current(domain) {
            self.map = DofMap::build(domain);
            self.integrator.domain_changed(domain);
            debug!(
                equations = self.map.num_equations(),
                stamp = domain.change_stamp(),
                "DOF map rebuilt"
            );
        }
    }

    /// Runs `num_steps` steps of the current increment.
    ///
    /// # Errors
    /// The first step that still fails after all permitted cuts; the
    /// domain is left at the last committed state.
    pub fn analyze(&mut self, domain: &mut Domain, num_steps: usize) -> Result<AnalysisReport> {
        info!(
            integrator = self.integrator.kind(),
            steps = num_steps,
            increment = self.integrator.increment(),
            "analysis started"
        );
        let mut report = AnalysisReport::default();
        for _ in 0..num_steps {
            let step = self.solve_step(domain)?;
            report.steps.push(step);
        }
        report.final_time = domain.committed_time();
        info!(
            time = report.final_time,
            iterations = report.total_iterations(),
            "analysis finished"
        );
        Ok(report)
    }

    /// One outer step, cut into halves on recoverable failure.
    pub fn solve_step(&mut self, domain: &mut Domain) -> Result<StepReport> {
        self.refresh_map(domain);
        let increment = self.integrator.increment();
        let outcome = self.step_with_cuts(domain, increment, 0);
        self.integrator.set_increment(increment)?;
        let attempt = outcome.inspect_err(|e| {
            warn!(step = self.steps_taken + 1, error = %e, "step failed");
        })?;

        self.steps_taken += 1;
        domain.calculate_reactions(self.integrator.is_dynamic());
        let report = StepReport {
            step: self.steps_taken,
            time: domain.committed_time(),
            iterations: attempt.iterations,
            norm: attempt.norm,
            cuts: attempt.cuts,
        };
        info!(
            step = report.step,
            time = report.time,
            iterations = report.iterations,
            norm = report.norm,
            cuts = report.cuts,
            "step converged"
        );
        Ok(report)
    }

    fn step_with_cuts(&mut self, domain: &mut Domain, increment: f64, depth: usize) -> Result<Attempt> {
        self.integrator.set_increment(increment)?;
        let error = match self.attempt(domain) {
            Ok(attempt) => return Ok(attempt),
            Err(e) => e,
        };
        self.integrator.revert_to_last_commit(domain)?;

        if !error.is_recoverable() || depth >= self.config.step_control.max_cuts {
            return Err(error);
        }
        let half = 0.5 * increment;
        if self.integrator.set_increment(half).is_err() {
            return Err(error);
        }
        warn!(depth = depth + 1, increment = half, error = %error, "cutting step");

        let first = self.step_with_cuts(domain, half, depth + 1)?;
        let second = self.step_with_cuts(domain, half, depth + 1)?;
        Ok(Attempt {
            iterations: first.iterations + second.iterations,
            norm: second.norm,
            cuts: 1 + first.cuts + second.cuts,
        })
    }

    fn solve_system(&mut self) -> Result<DVector<f64>> {
        if self.map.num_equations() == 0 {
            return Ok(DVector::zeros(0));
        }
        let data = self.system.linear_system();
        let (delta, info) = self
            .backend
            .solve_linear(&data)
            .map_err(|e| SolverError::LinearSolve(e.to_string()))?;
        if let Some(residual) = info.residual_norm {
            debug!(solver = %info.solver_name, residual, "linear solve");
        }
        Ok(delta)
    }

    fn form_tangent(&mut self, domain: &Domain, stiffness: StiffnessKind) {
        self.integrator
            .form_tangent(domain, &self.map, &mut self.system, stiffness);
    }

    fn form_unbalance(&mut self, domain: &Domain) -> f64 {
        self.integrator
            .form_unbalance(domain, &self.map, &mut self.system);
        self.system.residual().norm()
    }

    /// One trial of the current increment; the caller reverts on error.
    fn attempt(&mut self, domain: &mut Domain) -> Result<Attempt> {
        self.integrator.new_step(domain, &self.map)?;
        let first_norm = self.form_unbalance(domain);

        if self.config.algorithm == SolutionAlgorithm::Linear {
            self.form_tangent(domain, StiffnessKind::Current);
            let delta = self.solve_system()?;
            self.integrator.update(domain, &self.map, &delta)?;
            self.integrator.commit(domain)?;
            return Ok(Attempt {
                iterations: 1,
                norm: delta.norm(),
                cuts: 0,
            });
        }

        let mut norm = first_norm;
        for iteration in 1..=self.config.max_iterations {
            match self.config.algorithm {
                SolutionAlgorithm::Newton => self.form_tangent(domain, StiffnessKind::Current),
                SolutionAlgorithm::ModifiedNewton if iteration == 1 => {
                    self.form_tangent(domain, StiffnessKind::Current)
                }
                SolutionAlgorithm::InitialNewton if iteration == 1 => {
                    self.form_tangent(domain, StiffnessKind::Initial)
                }
                _ => {}
            }
            let unbalance = self.system.residual().clone();
            let delta = self.solve_system()?;
            self.integrator.update(domain, &self.map, &delta)?;
            let mut unbalance_norm = self.form_unbalance(domain);

            if self.config.use_line_search {
                unbalance_norm = self.line_search(domain, &delta, unbalance.norm(), unbalance_norm)?;
            }

            norm = match self.config.test {
                ConvergenceTest::NormUnbalance => unbalance_norm,
                ConvergenceTest::RelativeNormUnbalance => {
                    if first_norm > 0.0 {
                        unbalance_norm / first_norm
                    } else {
                        unbalance_norm
                    }
                }
                ConvergenceTest::NormDisplacementIncrement => delta.norm(),
                ConvergenceTest::EnergyIncrement => 0.5 * delta.dot(&unbalance).abs(),
            };
            debug!(iteration, norm, unbalance = unbalance_norm, "equilibrium iteration");

            if norm <= self.config.tolerance {
                self.integrator.commit(domain)?;
                return Ok(Attempt {
                    iterations: iteration,
                    norm,
                    cuts: 0,
                });
            }
            if !unbalance_norm.is_finite()
                || unbalance_norm > self.config.divergence_factor * first_norm.max(f64::MIN_POSITIVE)
            {
                return Err(SolverError::Convergence {
                    iterations: iteration,
                    norm: unbalance_norm,
                });
            }
        }
        Err(SolverError::Convergence {
            iterations: self.config.max_iterations,
            norm,
        })
    }

    /// Halves the last increment while the unbalance grows. Returns the
    /// accepted unbalance norm.
    fn line_search(
        &mut self,
        domain: &mut Domain,
        delta: &DVector<f64>,
        previous_norm: f64,
        mut norm: f64,
    ) -> Result<f64> {
        let mut step = 1.0;
        for _ in 0..self.config.max_line_search {
            if norm < previous_norm {
                break;
            }
            let back = delta * (-0.5 * step);
            step *= 0.5;
            self.integrator.update(domain, &self.map, &back)?;
            norm = self.form_unbalance(domain);
            debug!(step, norm, "line search");
        }
        Ok(norm)
    }

    /// Snapshot of the domain plus integrator state.
    pub fn checkpoint(&self, domain: &Domain) -> RestartState {
        let mut state = domain.checkpoint(self.steps_taken);
        state.integrator = self.integrator.send_state();
        state
            .metadata
            .insert("integrator".into(), self.integrator.kind().into());
        state
    }

    pub fn restore(&mut self, domain: &mut Domain, state: &RestartState) -> Result<()> {
        if let Some(kind) = state.metadata.get("integrator")
            && kind != self.integrator.kind()
        {
            return Err(SolverError::CorruptState(format!(
                "checkpoint written by {kind}, solver uses {}",
                self.integrator.kind()
            )));
        }
        domain.restore(state)?;
        self.refresh_map(domain);
        self.integrator.recv_state(&state.integrator)?;
        self.steps_taken = state.step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::boundary_conditions::{LoadPattern, SpConstraint, TimeSeries};
    use crate::domain::NodeId;
    use crate::elements::{Element, Quad4, SolidSection};
    use crate::integrator::LoadControl;
    use crate::materials::{
        ConstitutiveModel, ElasticIsotropic, IntegrationPointState, J2Plasticity, ReturnMappingConfig,
    };
    use crate::tensor::{Tangent, Voigt};
    use nalgebra::Vector3;

    /// Elastic, but refuses any strain jump larger than `limit` from the
    /// committed state.
    #[derive(Debug, Clone)]
    struct IncrementLimited {
        inner: ElasticIsotropic,
        limit: f64,
    }

    impl ConstitutiveModel for IncrementLimited {
        fn kind(&self) -> &'static str {
            "IncrementLimited"
        }
        fn state(&self) -> &IntegrationPointState {
            self.inner.state()
        }
        fn state_mut(&mut self) -> &mut IntegrationPointState {
            self.inner.state_mut()
        }
        fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
            let jump = (strain - self.state().committed().strain).amax();
            if jump > self.limit {
                self.state_mut().mark_failed();
                return Err(SolverError::IntegrationFailure(format!("strain jump {jump}")));
            }
            self.inner.set_trial_strain(strain)
        }
        fn initial_tangent(&self) -> Tangent {
            self.inner.initial_tangent()
        }
        fn get_copy(&self) -> Box<dyn ConstitutiveModel> {
            Box::new(self.clone())
        }
    }

    /// Unit square, bottom edge on rollers, node 1 pinned, top edge pulled.
    fn square(material: &dyn ConstitutiveModel, top_disp: f64) -> Domain {
        let mut domain = Domain::new();
        for (tag, x, y) in [(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0), (4, 0.0, 1.0)] {
            domain.add_node(tag, Vector3::new(x, y, 0.0), 2).unwrap();
        }
        let ids: Vec<NodeId> = (0..4).map(NodeId).collect();
        let quad = Quad4::new(1, ids, domain.nodes(), material, SolidSection::default()).unwrap();
        domain.add_element(Box::new(quad)).unwrap();
        domain.fix(SpConstraint::fixed(1, 0)).unwrap();
        domain.fix(SpConstraint::fixed(1, 1)).unwrap();
        domain.fix(SpConstraint::fixed(2, 1)).unwrap();
        let mut pattern = LoadPattern::new(1, TimeSeries::Linear { factor: 1.0 });
        pattern.add_prescribed_displacement(3, 1, top_disp);
        pattern.add_prescribed_displacement(4, 1, top_disp);
        domain.add_pattern(pattern).unwrap();
        domain
    }

    fn solver(increment: f64, config: NonlinearConfig) -> NonlinearSolver {
        NonlinearSolver::new(
            Box::new(LoadControl::new(increment).unwrap()),
            Box::new(NativeBackend),
            config,
        )
        .unwrap()
    }

    #[test]
    fn elastic_step_converges_in_one_iteration() {
        let material = ElasticIsotropic::new(1000.0, 0.0, 0.0).unwrap();
        let mut domain = square(&material, 1e-3);
        let mut driver = solver(1.0, NonlinearConfig {
            test: ConvergenceTest::NormUnbalance,
            tolerance: 1e-9,
            ..Default::default()
        });
        let report = driver.analyze(&mut domain, 1).unwrap();
        assert_eq!(report.steps.len(), 1);
        assert!(report.steps[0].iterations <= 2);
        assert_eq!(report.final_time, 1.0);

        // uniaxial stress σyy = E εyy
        let stress = domain.element_by_tag(1).unwrap().response(&["stresses"]).unwrap();
        let first = stress.as_list().unwrap()[0].as_vector().unwrap().clone();
        assert!((first[1] - 1.0).abs() < 1e-9, "σyy = {}", first[1]);
        assert!(first[0].abs() < 1e-9);
    }

    #[test]
    fn plastic_steps_converge_and_stay_admissible() {
        let config = ReturnMappingConfig::default();
        let material = J2Plasticity::new(1000.0, 400.0, 1.0, 1.5, 10.0, 20.0, config).unwrap();
        let mut domain = square(&material, 1e-2);
        let mut driver = solver(0.1, NonlinearConfig::default());
        let report = driver.analyze(&mut domain, 10).unwrap();
        assert_eq!(report.steps.len(), 10);
        assert!((report.final_time - 1.0).abs() < 1e-12);

        let element = domain.element_by_tag(1).unwrap();
        let eps = element
            .response(&["material", "0", "equivalent_plastic_strain"])
            .and_then(|r| r.as_scalar())
            .unwrap();
        assert!(eps > 0.0);
    }

    #[test]
    fn failed_increment_is_cut() {
        let material = IncrementLimited {
            inner: ElasticIsotropic::new(1000.0, 0.0, 0.0).unwrap(),
            limit: 0.3e-3,
        };
        let mut domain = square(&material, 1e-3);
        let mut driver = solver(1.0, NonlinearConfig::default());
        let report = driver.analyze(&mut domain, 1).unwrap();
        // 1e-3 → 0.5e-3 → 0.25e-3 per sub-step
        assert_eq!(report.steps[0].cuts, 3);
        assert_eq!(report.final_time, 1.0);
        assert_eq!(driver.integrator().increment(), 1.0);
    }

    #[test]
    fn exhausted_cuts_report_failure_and_keep_committed_state() {
        let material = IncrementLimited {
            inner: ElasticIsotropic::new(1000.0, 0.0, 0.0).unwrap(),
            limit: 0.3e-3,
        };
        let mut domain = square(&material, 1e-3);
        let config = NonlinearConfig {
            step_control: StepControl { max_cuts: 1 },
            ..Default::default()
        };
        let mut driver = solver(1.0, config);
        let err = driver.analyze(&mut domain, 1).unwrap_err();
        assert!(matches!(err, SolverError::IntegrationFailure(_)));
        assert_eq!(domain.committed_time(), 0.0);
        let element = domain.element_by_tag(1).unwrap();
        let stress = element.response(&["material", "0", "stress"]).unwrap();
        assert_eq!(stress.as_vector().unwrap().norm(), 0.0);
    }

    #[test]
    fn explicit_integrator_requires_linear_algorithm() {
        let cd = crate::integrator::CentralDifference::new(0.01, Default::default()).unwrap();
        let result = NonlinearSolver::new(Box::new(cd), Box::new(NativeBackend), NonlinearConfig::default());
        assert!(matches!(result, Err(SolverError::InvalidInput(_))));
    }

    #[test]
    fn config_json_uses_defaults() {
        let config: NonlinearConfig =
            serde_json::from_str(r#"{"algorithm": "ModifiedNewton", "tolerance": 1e-6}"#).unwrap();
        assert_eq!(config.algorithm, SolutionAlgorithm::ModifiedNewton);
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.step_control.max_cuts, 4);
    }
}
