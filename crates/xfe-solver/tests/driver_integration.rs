//! Driver-level behaviour: failure recovery, transient response and
//! checkpoint/restart.

use approx::assert_relative_eq;
use nalgebra::Vector3;
use xfe_io::{load_restart, save_restart};
use xfe_solver::tensor::{Tangent, Voigt};
use xfe_solver::{
    ConstitutiveModel, ConvergenceTest, Domain, ElasticIsotropic, IntegrationPointState,
    J2Plasticity, LoadControl, LoadPattern, NativeBackend, Newmark, NewmarkConfig,
    NonlinearConfig, NonlinearSolver, Quad4, Result, ReturnMappingConfig, SolidSection,
    SolverError, SpConstraint, StepControl, TimeSeries,
};

/// Correct stresses, but reports a tangent ten times too stiff, so Newton
/// contracts by only 10% per iteration.
#[derive(Debug, Clone)]
struct OverstiffTangent {
    inner: ElasticIsotropic,
}

impl ConstitutiveModel for OverstiffTangent {
    fn kind(&self) -> &'static str {
        "OverstiffTangent"
    }
    fn state(&self) -> &IntegrationPointState {
        self.inner.state()
    }
    fn state_mut(&mut self) -> &mut IntegrationPointState {
        self.inner.state_mut()
    }
    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        self.inner.set_trial_strain(strain)
    }
    fn initial_tangent(&self) -> Tangent {
        self.inner.initial_tangent() * 10.0
    }
    fn tangent(&self) -> Tangent {
        self.inner.tangent() * 10.0
    }
    fn get_copy(&self) -> Box<dyn ConstitutiveModel> {
        Box::new(self.clone())
    }
}

/// Elastic up to a strain cap, then the return mapping "fails".
#[derive(Debug, Clone)]
struct Brittle {
    inner: ElasticIsotropic,
    cap: f64,
}

impl ConstitutiveModel for Brittle {
    fn kind(&self) -> &'static str {
        "Brittle"
    }
    fn state(&self) -> &IntegrationPointState {
        self.inner.state()
    }
    fn state_mut(&mut self) -> &mut IntegrationPointState {
        self.inner.state_mut()
    }
    fn set_trial_strain(&mut self, strain: &Voigt) -> Result<()> {
        if strain.amax() > self.cap {
            self.state_mut().mark_failed();
            return Err(SolverError::IntegrationFailure(format!(
                "strain {:.3e} beyond cap",
                strain.amax()
            )));
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

/// Unit square on a fixed base; the top edge moves vertically only.
fn column(material: &dyn ConstitutiveModel) -> Domain {
    let mut domain = Domain::new();
    for (tag, x, y) in [(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0), (4, 0.0, 1.0)] {
        domain.add_node(tag, Vector3::new(x, y, 0.0), 2).unwrap();
    }
    let ids = (1..=4).map(|t| domain.node_id(t).unwrap()).collect();
    let quad = Quad4::new(1, ids, domain.nodes(), material, SolidSection::default()).unwrap();
    domain.add_element(Box::new(quad)).unwrap();
    for (node, dof) in [(1, 0), (1, 1), (2, 0), (2, 1), (3, 0), (4, 0)] {
        domain.fix(SpConstraint::fixed(node, dof)).unwrap();
    }
    domain
}

fn pull(domain: &mut Domain, series: TimeSeries, force_per_node: f64) {
    let mut pattern = LoadPattern::new(1, series);
    pattern.add_nodal_load(3, vec![0.0, force_per_node]);
    pattern.add_nodal_load(4, vec![0.0, force_per_node]);
    domain.add_pattern(pattern).unwrap();
}

fn static_solver(increment: f64, config: NonlinearConfig) -> NonlinearSolver {
    NonlinearSolver::new(
        Box::new(LoadControl::new(increment).unwrap()),
        Box::new(NativeBackend),
        config,
    )
    .unwrap()
}

fn element_stresses(domain: &Domain) -> Vec<Vec<f64>> {
    domain
        .element_by_tag(1)
        .unwrap()
        .response(&["stresses"])
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|r| r.as_vector().unwrap().iter().copied().collect())
        .collect()
}

#[test]
fn slow_newton_reports_convergence_failure_and_restores_state() {
    let material = OverstiffTangent {
        inner: ElasticIsotropic::new(100.0, 0.0, 0.0).unwrap(),
    };
    let mut domain = column(&material);
    pull(&mut domain, TimeSeries::Linear { factor: 1.0 }, 0.5);
    let mut solver = static_solver(
        1.0,
        NonlinearConfig {
            test: ConvergenceTest::NormUnbalance,
            tolerance: 1e-10,
            max_iterations: 10,
            step_control: StepControl { max_cuts: 1 },
            ..Default::default()
        },
    );

    let err = solver.solve_step(&mut domain).unwrap_err();
    assert!(matches!(err, SolverError::Convergence { iterations: 10, .. }), "{err}");

    assert_eq!(domain.time(), 0.0);
    assert_eq!(domain.committed_time(), 0.0);
    for node in domain.nodes() {
        assert_eq!(node.trial_disp, node.committed_disp);
        assert_eq!(node.committed_disp.amax(), 0.0);
    }
    for sigma in element_stresses(&domain) {
        assert!(sigma.iter().all(|s| *s == 0.0));
    }
}

#[test]
fn integration_failure_reverts_to_last_committed_stress() {
    let material = Brittle {
        inner: ElasticIsotropic::new(100.0, 0.0, 0.0).unwrap(),
        cap: 0.025,
    };
    let mut domain = column(&material);
    // ε = 0.01 per step
    pull(&mut domain, TimeSeries::Linear { factor: 1.0 }, 0.5);
    let mut solver = static_solver(
        1.0,
        NonlinearConfig {
            step_control: StepControl { max_cuts: 0 },
            ..Default::default()
        },
    );

    solver.analyze(&mut domain, 2).unwrap();
    let committed = element_stresses(&domain);
    assert_relative_eq!(committed[0][1], 2.0, max_relative = 1e-9);

    let err = solver.solve_step(&mut domain).unwrap_err();
    assert!(matches!(err, SolverError::IntegrationFailure(_)), "{err}");
    assert_eq!(element_stresses(&domain), committed);
    assert_eq!(domain.time(), 2.0);
    assert_eq!(solver.steps_taken(), 2);

    // the domain stays usable: unload and continue
    domain.remove_pattern(1);
    pull(&mut domain, TimeSeries::Constant { factor: 1.0 }, 0.5);
    solver.solve_step(&mut domain).unwrap();
    assert_relative_eq!(element_stresses(&domain)[0][1], 1.0, max_relative = 1e-9);
}

#[test]
fn commit_with_a_failed_point_commits_nothing() {
    let material = Brittle {
        inner: ElasticIsotropic::new(100.0, 0.0, 0.0).unwrap(),
        cap: 0.025,
    };
    // two quads side by side: 1 on the left, 2 on the right
    let mut domain = Domain::new();
    for (tag, x, y) in [
        (1, 0.0, 0.0),
        (2, 1.0, 0.0),
        (3, 2.0, 0.0),
        (4, 0.0, 1.0),
        (5, 1.0, 1.0),
        (6, 2.0, 1.0),
    ] {
        domain.add_node(tag, Vector3::new(x, y, 0.0), 2).unwrap();
    }
    for (tag, nodes) in [(1, [1, 2, 5, 4]), (2, [2, 3, 6, 5])] {
        let ids = nodes.iter().map(|t| domain.node_id(*t).unwrap()).collect();
        let quad = Quad4::new(tag, ids, domain.nodes(), &material, SolidSection::default()).unwrap();
        domain.add_element(Box::new(quad)).unwrap();
    }
    let set_ux = |domain: &mut Domain, tags: [i32; 2], ux: f64| {
        for tag in tags {
            let id = domain.node_id(tag).unwrap();
            domain.nodes_mut()[id.0].trial_disp[0] = ux;
        }
    };

    // ε = 0.01 in the left quad, -0.01 in the right one
    set_ux(&mut domain, [2, 5], 0.01);
    domain.update_elements().unwrap();
    // right quad stretched to ε = 0.04, beyond the cap
    set_ux(&mut domain, [3, 6], 0.05);
    assert!(domain.update_elements().is_err());

    let err = domain.commit().unwrap_err();
    assert!(matches!(err, SolverError::CorruptState(_)), "{err}");
    assert!(err.to_string().contains("element 2"));
    for node in domain.nodes() {
        assert_eq!(node.committed_disp.amax(), 0.0);
    }

    // the left quad's trial stress was not committed either
    domain.revert_to_last_commit().unwrap();
    let left = domain.element_by_tag(1).unwrap().response(&["stresses"]).unwrap();
    for sigma in left.as_list().unwrap() {
        assert!(sigma.as_vector().unwrap().iter().all(|s| *s == 0.0));
    }
}

#[test]
fn newmark_step_load_doubles_static_deflection() {
    let material = ElasticIsotropic::new(100.0, 0.0, 0.0).unwrap();
    let mut domain = column(&material);
    domain.set_nodal_mass(3, 0.5).unwrap();
    domain.set_nodal_mass(4, 0.5).unwrap();
    pull(&mut domain, TimeSeries::Constant { factor: 1.0 }, 1.0);

    // k = 100, m = 1 → ω = 10
    let period = 2.0 * std::f64::consts::PI / 10.0;
    let dt = period / 100.0;
    let mut solver = NonlinearSolver::new(
        Box::new(Newmark::new(NewmarkConfig::average_acceleration(), dt).unwrap()),
        Box::new(NativeBackend),
        NonlinearConfig::default(),
    )
    .unwrap();

    let mut peak: f64 = 0.0;
    for _ in 0..60 {
        solver.solve_step(&mut domain).unwrap();
        let uy = domain.node_by_tag(3).unwrap().committed_disp[1];
        peak = peak.max(uy);
    }
    let static_deflection = 0.02;
    assert_relative_eq!(peak, 2.0 * static_deflection, max_relative = 1e-2);

    // reactions include inertia: supports carry F − m a
    let top = domain.node_by_tag(3).unwrap();
    let support: f64 = [1, 2]
        .iter()
        .map(|t| domain.node_by_tag(*t).unwrap().reaction[1])
        .sum();
    let inertia = 2.0 * 0.5 * top.trial_accel[1];
    assert_relative_eq!(support, -(2.0 - inertia), epsilon = 1e-6);
}

#[test]
fn restart_from_file_matches_uninterrupted_run() {
    let config = ReturnMappingConfig::default();
    let material = J2Plasticity::new(1000.0, 400.0, 1.0, 1.5, 10.0, 20.0, config).unwrap();

    let mut straight = column(&material);
    pull(&mut straight, TimeSeries::Linear { factor: 1.0 }, 1.5);
    let mut reference = static_solver(0.2, NonlinearConfig::default());
    reference.analyze(&mut straight, 5).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("step3.json");
    let mut first = column(&material);
    pull(&mut first, TimeSeries::Linear { factor: 1.0 }, 1.5);
    let mut solver = static_solver(0.2, NonlinearConfig::default());
    solver.analyze(&mut first, 3).unwrap();
    save_restart(&path, &solver.checkpoint(&first)).unwrap();

    let state = load_restart(&path).unwrap();
    assert_eq!(state.step, 3);
    let mut resumed = column(&material);
    pull(&mut resumed, TimeSeries::Linear { factor: 1.0 }, 1.5);
    let mut solver = static_solver(0.2, NonlinearConfig::default());
    solver.restore(&mut resumed, &state).unwrap();
    solver.analyze(&mut resumed, 2).unwrap();

    assert_relative_eq!(resumed.committed_time(), 1.0, epsilon = 1e-12);
    for (a, b) in straight.nodes().iter().zip(resumed.nodes()) {
        for (x, y) in a.committed_disp.iter().zip(b.committed_disp.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-10);
        }
    }
    let eps = |d: &Domain| {
        d.element_by_tag(1)
            .unwrap()
            .response(&["material", "0", "equivalent_plastic_strain"])
            .and_then(|r| r.as_scalar())
            .unwrap()
    };
    assert!(eps(&straight) > 0.0);
    assert_relative_eq!(eps(&straight), eps(&resumed), max_relative = 1e-10);
}

#[test]
fn restore_rejects_checkpoint_of_another_integrator() {
    let material = ElasticIsotropic::new(100.0, 0.0, 0.0).unwrap();
    let mut domain = column(&material);
    domain.set_nodal_mass(3, 1.0).unwrap();
    let dynamic = NonlinearSolver::new(
        Box::new(Newmark::new(NewmarkConfig::default(), 0.01).unwrap()),
        Box::new(NativeBackend),
        NonlinearConfig::default(),
    )
    .unwrap();
    let state = dynamic.checkpoint(&domain);

    let mut solver = static_solver(0.1, NonlinearConfig::default());
    let err = solver.restore(&mut domain, &state).unwrap_err();
    assert!(matches!(err, SolverError::CorruptState(_)));
}
