//! Hierarchy coordinator tests: lazy construction, role resolution,
//! downward invalidation and whole-project runs.

mod common;

use common::Fixture;
use diffred::core::config::{Config, PreferencesConfig};
use diffred::core::error::PipelineError;
use diffred::hierarchy::{
    CrystalId, HierarchyCoordinator, NodeRef, StageRef, SweepId, SweepSpec,
};
use diffred::lattice::{BravaisLattice, TabulatedSymmetry, UnitCell};
use diffred::phase::{PhaseFlags, PhaseState};
use diffred::programs::{IntegraterKind, RefinerKind, ScalerKind, Tool};
use diffred::stage::{Epoch, LatticeAssertion};

struct Project {
    coordinator: HierarchyCoordinator,
    crystal: CrystalId,
    sweeps: Vec<SweepId>,
}

fn coordinator(fx: &Fixture, preferences: PreferencesConfig) -> HierarchyCoordinator {
    HierarchyCoordinator::new(
        Box::new(fx.suite.clone()),
        Box::new(TabulatedSymmetry),
        fx.settings.clone(),
        preferences,
    )
}

fn sweep_spec(fx: &Fixture, name: &str, epoch: u64) -> SweepSpec {
    SweepSpec::new(
        name,
        epoch,
        format!("{}_####.cbf", name),
        fx.dir.path().join("images"),
        (1, 90),
    )
}

/// One crystal "lyso" with two sweeps on one wavelength.
fn project(fx: &Fixture, preferences: PreferencesConfig, joint: bool) -> Project {
    let mut coordinator = coordinator(fx, preferences).with_joint_refinement(joint);
    let crystal = coordinator.add_crystal("lyso", None, None).unwrap();
    let wavelength = coordinator.add_wavelength(crystal, "NATIVE", 0.9795).unwrap();
    let sweeps = vec![
        coordinator.add_sweep(wavelength, sweep_spec(fx, "SWEEP1", 1)).unwrap(),
        coordinator.add_sweep(wavelength, sweep_spec(fx, "SWEEP2", 2)).unwrap(),
    ];
    Project {
        coordinator,
        crystal,
        sweeps,
    }
}

fn all_stages(p: &Project) -> Vec<StageRef> {
    let mut stages = Vec::new();
    for sweep in &p.sweeps {
        stages.push(StageRef::Indexer(*sweep));
        stages.push(StageRef::Refiner(*sweep));
        stages.push(StageRef::Integrater(*sweep));
    }
    stages.push(StageRef::Scaler(p.crystal));
    stages
}

// ============================================================================
// Lazy construction
// ============================================================================

#[test]
fn stages_are_built_on_first_use_and_cached() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let s1 = p.sweeps[0];

    assert_eq!(p.coordinator.refiner_count(), 0);
    assert_eq!(p.coordinator.phase_of(StageRef::Refiner(s1)), None);

    let label = p.coordinator.get_or_create_stage(s1).unwrap().label().to_string();
    assert_eq!(label, "SWEEP1/refine");
    p.coordinator.get_or_create_stage(s1).unwrap();
    assert_eq!(p.coordinator.refiner_count(), 1);

    let refiner = p.coordinator.refiner(s1).unwrap();
    assert_eq!(refiner.logic().indexers().len(), 1);
    assert!(refiner.logic().indexer(Epoch(1)).is_some());
    // Construction alone runs nothing.
    assert_eq!(fx.suite.total_calls(), 0);
    assert_eq!(
        p.coordinator.phase_of(StageRef::Indexer(s1)),
        Some(PhaseState::NotPrepared)
    );
}

#[test]
fn separate_refiners_without_joint_refinement() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);

    p.coordinator.get_or_create_stage(p.sweeps[0]).unwrap();
    p.coordinator.get_or_create_stage(p.sweeps[1]).unwrap();
    assert_eq!(p.coordinator.refiner_count(), 2);
    assert_eq!(
        p.coordinator.refiner(p.sweeps[1]).map(|r| r.label()),
        Some("SWEEP2/refine")
    );
}

#[test]
fn crystal_lattice_is_injected_into_indexers() {
    let fx = Fixture::new();
    let mut coordinator = coordinator(&fx, PreferencesConfig::default());
    let cell = UnitCell::new(78.1, 78.1, 37.2, 90.0, 90.0, 90.0);
    let crystal = coordinator
        .add_crystal("thau", Some(BravaisLattice::Tp), Some(cell))
        .unwrap();
    let wavelength = coordinator.add_wavelength(crystal, "SAD", 0.9795).unwrap();
    let sweep = coordinator.add_sweep(wavelength, sweep_spec(&fx, "S1", 1)).unwrap();

    coordinator.get_or_create_stage(sweep).unwrap();
    let indexer = coordinator.indexer(sweep).unwrap();
    assert_eq!(indexer.logic().input_lattice(), Some(BravaisLattice::Tp));
    assert_eq!(indexer.logic().input_cell(), Some(cell));
    assert!(indexer.logic().is_user_lattice());
    assert_eq!(indexer.logic().sweep().wavelength, Some(0.9795));
}

#[test]
fn hierarchy_rejects_inconsistent_nodes() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let crystal = p.crystal;

    assert!(p.coordinator.add_crystal("lyso", None, None).is_err());
    let wavelength = p.coordinator.add_wavelength(crystal, "REMOTE", 0.91).unwrap();
    let err = p
        .coordinator
        .add_sweep(wavelength, sweep_spec(&fx, "SWEEP3", 2))
        .unwrap_err();
    assert!(err.to_string().contains("epoch 2 already used"));
    assert!(p.coordinator.add_wavelength(crystal, "BAD", 0.0).is_err());
    let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0);
    assert!(p.coordinator.add_crystal("x", None, Some(cell)).is_err());
}

#[test]
fn from_config_builds_the_hierarchy() {
    let fx = Fixture::new();
    let content = format!(
        r#"
[pipeline]
working_directory = "{}"
joint_refinement = true

[[crystals]]
name = "thau"
lattice = "tP"

[[crystals.wavelengths]]
name = "SAD"
wavelength = 0.9795

[[crystals.wavelengths.sweeps]]
name = "SWEEP1"
template = "thau_1_####.cbf"
directory = "/data/thau"
first_image = 1
last_image = 180
epoch = 10
resolution = 1.8
"#,
        fx.dir.path().join("work").display()
    );
    let config = Config::from_toml(&content).unwrap();

    let mut coordinator = HierarchyCoordinator::from_config(
        &config,
        Box::new(fx.suite.clone()),
        Box::new(TabulatedSymmetry),
    )
    .unwrap();

    let (crystal, node) = coordinator.crystal_named("thau").unwrap();
    assert_eq!(node.lattice, Some(BravaisLattice::Tp));
    let (sweep, node) = coordinator.sweep_named("SWEEP1").unwrap();
    assert_eq!(node.epoch(), Epoch(10));
    assert_eq!(node.spec.wedge, (1, 180));
    assert_eq!(coordinator.hierarchy().crystal_of(sweep).unwrap(), crystal);

    // Joint refinement with a DIALS refiner: labelled after the crystal.
    let label = coordinator.get_or_create_stage(sweep).unwrap().label().to_string();
    assert_eq!(label, "thau/refine");
}

// ============================================================================
// Role resolution
// ============================================================================

#[test]
fn roles_fall_through_to_available_implementations() {
    let fx = Fixture::new();
    fx.suite.uninstall(Tool::Aimless);
    fx.suite.uninstall(Tool::DialsIntegrate);
    let mut p = project(&fx, PreferencesConfig::default(), false);

    assert_eq!(p.coordinator.scaler_kind().unwrap(), ScalerKind::Xscale);
    assert_eq!(p.coordinator.integrater_kind().unwrap(), IntegraterKind::Xds);
    // The refiner able to feed the chosen integrater comes first.
    assert_eq!(p.coordinator.refiner_kind().unwrap(), RefinerKind::Xds);
}

#[test]
fn default_roles_with_everything_installed() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    assert_eq!(p.coordinator.integrater_kind().unwrap(), IntegraterKind::Dials);
    assert_eq!(p.coordinator.refiner_kind().unwrap(), RefinerKind::Dials);
    assert_eq!(p.coordinator.scaler_kind().unwrap(), ScalerKind::Aimless);
}

#[test]
fn unavailable_preferred_role_is_fatal() {
    let fx = Fixture::new();
    fx.suite.uninstall(Tool::Xscale);
    let preferences = PreferencesConfig {
        scaler: Some("xscale".to_string()),
        ..PreferencesConfig::default()
    };
    let mut p = project(&fx, preferences, false);

    let err = p.coordinator.scale(p.crystal).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, PipelineError::NotAvailable { ref role, .. } if role == "scaler"));
    assert_eq!(fx.suite.total_calls(), 0);
}

#[test]
fn exhausted_role_is_not_available() {
    let fx = Fixture::new();
    for tool in [Tool::DialsIntegrate, Tool::XdsIntegrate, Tool::MosflmIntegrate] {
        fx.suite.uninstall(tool);
    }
    let mut p = project(&fx, PreferencesConfig::default(), false);

    let err = p.coordinator.integrate(p.sweeps[0]).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("dials, xds, mosflm"));
}

// ============================================================================
// Joint refinement
// ============================================================================

#[test]
fn joint_refinement_shares_one_refiner() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), true);

    p.coordinator.get_or_create_stage(p.sweeps[0]).unwrap();
    p.coordinator.get_or_create_stage(p.sweeps[1]).unwrap();

    assert_eq!(p.coordinator.refiner_count(), 1);
    let refiner = p.coordinator.refiner(p.sweeps[1]).unwrap();
    assert_eq!(refiner.label(), "lyso/refine");
    assert_eq!(
        refiner.logic().indexers().keys().copied().collect::<Vec<_>>(),
        vec![Epoch(1), Epoch(2)]
    );
}

#[test]
fn late_sweep_joins_existing_joint_refiner() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), true);
    p.coordinator.refine(p.sweeps[0]).unwrap();
    assert_eq!(
        p.coordinator.phase_of(StageRef::Refiner(p.sweeps[0])),
        Some(PhaseState::Finished)
    );

    let wavelength = p.coordinator.hierarchy().sweep(p.sweeps[0]).unwrap().wavelength;
    let late = p
        .coordinator
        .add_sweep(wavelength, sweep_spec(&fx, "SWEEP3", 3))
        .unwrap();

    assert_eq!(p.coordinator.refiner_count(), 1);
    assert_eq!(p.coordinator.refiner(late).unwrap().logic().indexers().len(), 3);
    assert_eq!(
        p.coordinator.phase_of(StageRef::Refiner(p.sweeps[0])),
        Some(PhaseState::NotPrepared)
    );
}

#[test]
fn joint_refinement_needs_a_multi_sweep_refiner() {
    let fx = Fixture::new();
    let preferences = PreferencesConfig {
        refiner: Some("xds".to_string()),
        ..PreferencesConfig::default()
    };
    let mut p = project(&fx, preferences, true);

    p.coordinator.get_or_create_stage(p.sweeps[0]).unwrap();
    p.coordinator.get_or_create_stage(p.sweeps[1]).unwrap();
    assert_eq!(p.coordinator.refiner_count(), 2);
}

// ============================================================================
// Running
// ============================================================================

#[test]
fn index_runs_only_the_indexer() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let s1 = p.sweeps[0];

    let solution = p.coordinator.index(s1).unwrap();
    assert_eq!(solution.lattice, BravaisLattice::Tp);
    assert_eq!(p.coordinator.phase_of(StageRef::Indexer(s1)), Some(PhaseState::Finished));
    assert_eq!(
        p.coordinator.phase_of(StageRef::Refiner(s1)),
        Some(PhaseState::NotPrepared)
    );
    assert_eq!(p.coordinator.phase_of(StageRef::Integrater(s1)), None);
}

#[test]
fn integrate_pulls_the_chain_up_to_date() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let s1 = p.sweeps[0];

    let result = p.coordinator.integrate(s1).unwrap();
    assert_eq!(result.epoch, Epoch(1));
    for stage in [StageRef::Indexer(s1), StageRef::Refiner(s1), StageRef::Integrater(s1)] {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::Finished));
    }

    let calls = fx.suite.total_calls();
    p.coordinator.integrate(s1).unwrap();
    assert_eq!(fx.suite.total_calls(), calls);
}

#[test]
fn stale_refiner_resets_integrater() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let s1 = p.sweeps[0];
    p.coordinator.integrate(s1).unwrap();

    p.coordinator
        .get_or_create_stage(s1)
        .unwrap()
        .set_parameter("dials.refine", "outlier.algorithm", "tukey");
    assert_eq!(p.coordinator.phase_of(StageRef::Refiner(s1)), Some(PhaseState::Prepared));

    p.coordinator.integrate(s1).unwrap();
    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 2);
    assert_eq!(fx.suite.calls(Tool::DialsIndex), 1);
}

#[test]
fn refined_before_integrate_still_resets_integrater() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let s1 = p.sweeps[0];
    p.coordinator.integrate(s1).unwrap();

    p.coordinator
        .get_or_create_stage(s1)
        .unwrap()
        .set_parameter("dials.refine", "outlier.algorithm", "tukey");
    // The refiner catches up on its own before the integrater is asked.
    p.coordinator.refine(s1).unwrap();
    assert_eq!(p.coordinator.phase_of(StageRef::Refiner(s1)), Some(PhaseState::Finished));
    assert_eq!(p.coordinator.phase_of(StageRef::Integrater(s1)), Some(PhaseState::Finished));

    p.coordinator.integrate(s1).unwrap();
    assert_eq!(p.coordinator.refiner(s1).unwrap().executions(), 2);
    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 2);

    // Nothing changed since, so the next call is free.
    let calls = fx.suite.total_calls();
    p.coordinator.integrate(s1).unwrap();
    assert_eq!(fx.suite.total_calls(), calls);
}

#[test]
fn joint_refiner_rerun_resets_every_integrater() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), true);
    let (s1, s2) = (p.sweeps[0], p.sweeps[1]);
    p.coordinator.integrate(s1).unwrap();
    p.coordinator.integrate(s2).unwrap();
    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 2);

    p.coordinator
        .get_or_create_stage(s1)
        .unwrap()
        .set_parameter("dials.refine", "scan_varying", "true");
    p.coordinator.integrate(s1).unwrap();
    p.coordinator.integrate(s2).unwrap();
    assert_eq!(p.coordinator.refiner(s2).unwrap().executions(), 2);
    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 4);
}

#[test]
fn reintegration_rescales_even_with_the_same_files() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    let first = p.coordinator.scale(p.crystal).unwrap();
    let inputs = p.coordinator.scaler(p.crystal).unwrap().logic().inputs().clone();

    p.coordinator
        .get_or_create_stage(p.sweeps[0])
        .unwrap()
        .set_parameter("dials.refine", "outlier.algorithm", "tukey");
    let second = p.coordinator.scale(p.crystal).unwrap();

    // Integration rewrote the same file, yet scaling reran.
    assert_eq!(p.coordinator.scaler(p.crystal).unwrap().logic().inputs(), &inputs);
    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 3);
    assert_eq!(fx.suite.calls(Tool::Aimless), 2);
    assert_eq!(second, first);

    // A further call with nothing stale touches nothing.
    let calls = fx.suite.total_calls();
    p.coordinator.scale(p.crystal).unwrap();
    assert_eq!(fx.suite.total_calls(), calls);
}

#[test]
fn run_all_scales_every_crystal() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.add_crystal("empty", None, None).unwrap();

    let outcomes = p.coordinator.run_all();

    assert_eq!(outcomes.len(), 2);
    let scaled = outcomes["lyso"].as_ref().unwrap();
    assert_eq!(scaled.reflections.len(), 1);
    assert!(scaled.reflections[0].ends_with("scaled.mtz"));
    let err = outcomes["empty"].as_ref().unwrap_err();
    assert!(err.to_string().contains("crystal empty has no sweeps"));

    assert_eq!(fx.suite.calls(Tool::DialsIntegrate), 2);
    assert_eq!(fx.suite.calls(Tool::Aimless), 1);
    let aimless = fx.suite.last_inputs(Tool::Aimless).unwrap();
    assert!(aimless.contains_key("hklin.1"));
    assert!(aimless.contains_key("hklin.2"));
    for stage in all_stages(&p) {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::Finished));
    }
}

#[test]
fn null_scaler_skips_integration() {
    let fx = Fixture::new();
    let reduced = fx.dir.path().join("reduced");
    std::fs::create_dir_all(&reduced).unwrap();
    let preferences = PreferencesConfig {
        scaler: Some("null".to_string()),
        ..PreferencesConfig::default()
    };
    let mut coordinator = coordinator(&fx, preferences);
    let crystal = coordinator.add_crystal("lyso", None, None).unwrap();
    let wavelength = coordinator.add_wavelength(crystal, "NATIVE", 0.9795).unwrap();
    let mut expected = Vec::new();
    for (epoch, name) in [(1, "SWEEP1"), (2, "SWEEP2")] {
        let path = reduced.join(format!("{}.mtz", name));
        std::fs::write(&path, "").unwrap();
        let mut spec = sweep_spec(&fx, name, epoch);
        spec.reflections = Some(path.clone());
        coordinator.add_sweep(wavelength, spec).unwrap();
        expected.push(path);
    }

    let result = coordinator.scale(crystal).unwrap();
    assert_eq!(result.reflections, expected);
    assert_eq!(fx.suite.total_calls(), 0);
}

#[test]
fn null_scaler_requires_reflections() {
    let fx = Fixture::new();
    let preferences = PreferencesConfig {
        scaler: Some("null".to_string()),
        ..PreferencesConfig::default()
    };
    let mut p = project(&fx, preferences, false);
    let err = p.coordinator.scale(p.crystal).unwrap_err();
    assert!(err.to_string().contains("has no reflections for the null scaler"));
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn crystal_lattice_change_invalidates_everything_below() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.run_all();

    p.coordinator
        .set_crystal_lattice(p.crystal, Some(BravaisLattice::Tp), None)
        .unwrap();

    for stage in all_stages(&p) {
        assert_eq!(
            p.coordinator.phase_of(stage),
            Some(PhaseState::NotPrepared),
            "{:?} not reset",
            stage
        );
    }
    assert_eq!(p.coordinator.refiner(p.sweeps[0]).unwrap().flags(), PhaseFlags::empty());
    let indexer = p.coordinator.indexer(p.sweeps[1]).unwrap();
    assert_eq!(indexer.logic().input_lattice(), Some(BravaisLattice::Tp));
    assert!(indexer.payload().is_empty());
    assert!(indexer.cached().is_none());
}

#[test]
fn unchanged_crystal_lattice_keeps_results() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.run_all();

    p.coordinator.set_crystal_lattice(p.crystal, None, None).unwrap();
    assert_eq!(
        p.coordinator.phase_of(StageRef::Scaler(p.crystal)),
        Some(PhaseState::Finished)
    );

    let cell = UnitCell::new(78.0, 78.0, 37.0, 90.0, 90.0, 90.0);
    assert!(p.coordinator.set_crystal_lattice(p.crystal, None, Some(cell)).is_err());
}

#[test]
fn sweep_invalidation_leaves_siblings_alone() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.run_all();
    let (s1, s2) = (p.sweeps[0], p.sweeps[1]);

    p.coordinator.invalidate_downstream(NodeRef::Sweep(s1)).unwrap();

    for stage in [StageRef::Indexer(s1), StageRef::Refiner(s1), StageRef::Integrater(s1)] {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::NotPrepared));
    }
    assert_eq!(
        p.coordinator.phase_of(StageRef::Scaler(p.crystal)),
        Some(PhaseState::NotPrepared)
    );
    for stage in [StageRef::Indexer(s2), StageRef::Refiner(s2), StageRef::Integrater(s2)] {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::Finished));
    }

    // The next run only redoes the invalidated sweep.
    let outcomes = p.coordinator.run_all();
    assert!(outcomes["lyso"].is_ok());
    assert_eq!(fx.suite.calls(Tool::DialsIndex), 3);
    assert_eq!(fx.suite.calls(Tool::Aimless), 2);
}

// ============================================================================
// Lattice assertion
// ============================================================================

#[test]
fn correct_assertion_changes_nothing() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.run_all();

    let answer = p.coordinator.assert_lattice(p.sweeps[0], BravaisLattice::Tp).unwrap();
    assert_eq!(answer, LatticeAssertion::Correct);
    for stage in all_stages(&p) {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::Finished));
    }
}

#[test]
fn possible_assertion_resets_consumers() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.run_all();
    let (s1, s2) = (p.sweeps[0], p.sweeps[1]);

    let answer = p.coordinator.assert_lattice(s1, BravaisLattice::Op).unwrap();
    assert_eq!(answer, LatticeAssertion::Possible);
    for stage in [
        StageRef::Indexer(s1),
        StageRef::Refiner(s1),
        StageRef::Integrater(s1),
        StageRef::Scaler(p.crystal),
    ] {
        assert_eq!(p.coordinator.phase_of(stage), Some(PhaseState::NotPrepared));
    }
    assert_eq!(p.coordinator.phase_of(StageRef::Integrater(s2)), Some(PhaseState::Finished));
    assert_eq!(
        p.coordinator.indexer(s1).unwrap().logic().input_lattice(),
        Some(BravaisLattice::Op)
    );
}

#[test]
fn impossible_assertion_is_reported() {
    let fx = Fixture::new();
    let mut p = project(&fx, PreferencesConfig::default(), false);
    p.coordinator.integrate(p.sweeps[0]).unwrap();

    let answer = p.coordinator.assert_lattice(p.sweeps[0], BravaisLattice::Cp).unwrap();
    assert_eq!(answer, LatticeAssertion::Impossible);
    assert_eq!(
        p.coordinator.phase_of(StageRef::Integrater(p.sweeps[0])),
        Some(PhaseState::NotPrepared)
    );
    // The selected lattice is untouched.
    assert_eq!(
        p.coordinator.indexer(p.sweeps[0]).unwrap().logic().lattice(),
        Some(BravaisLattice::Tp)
    );
}
