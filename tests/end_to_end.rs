//! End-to-end scenarios and cross-cutting invariants from spec.md §8 that
//! exercise the public engine API rather than a single crate in isolation.

use latticefield::{IgsoaEngine, SatpHiggsEngine};
use latticefield_init::{GaussianParams, Placement};
use latticefield_lattice::Dim;

#[test]
fn gaussian_drift_invariance_1d() {
    let nx = 4096;
    let mut engine = IgsoaEngine::create(nx, 1, 1, Dim::One, 1.0, 1.0, 0.1, 0.01, false).unwrap();
    let params = GaussianParams {
        amplitude: 1.5,
        sigma: [256.0, 0.0, 0.0],
        center: [2048.0, 0.0, 0.0],
        baseline_phi: 0.0,
    };
    engine.init_gaussian(&params, Placement::Overwrite);
    engine.advance(50, None).unwrap();

    let (com_x, _, _) = engine.center_of_mass();
    let drift = com_x - 2048.0;
    assert!(drift.abs() < 1.0, "drift={drift}, expected within +/-1 site of 2048");
}

#[test]
fn r_c_scaling_quadruples_neighbor_count_on_a_1d_ring() {
    // spec.md §8 scenario 2: the R_c=4 run does strictly more per-site work
    // than R_c=1, because neighbor count scales as O(R_c). Check the
    // mechanism directly (cache size) rather than wall-clock time, which is
    // not a stable thing to assert on in CI.
    let shape = latticefield_lattice::Shape::new(4096, 1, 1, Dim::One).unwrap();
    let kernel_small = latticefield_neighbors::KernelCache::new(1.0);
    let kernel_large = latticefield_neighbors::KernelCache::new(4.0);
    let mut cache_small = latticefield_neighbors::NeighborCache::new(shape, 1.0);
    let mut cache_large = latticefield_neighbors::NeighborCache::new(shape, 4.0);
    cache_small.build(1.0, &kernel_small).unwrap();
    cache_large.build(4.0, &kernel_large).unwrap();

    let count_small = cache_small.neighbors(2048).unwrap().len();
    let count_large = cache_large.neighbors(2048).unwrap().len();
    assert!(
        count_large > count_small,
        "count_small={count_small} count_large={count_large}"
    );
    let ratio = count_large as f64 / count_small as f64;
    assert!((ratio - 4.0).abs() < 0.5, "ratio={ratio}, expected near 4x");
}

#[test]
fn satp_higgs_vacuum_is_stable_over_many_steps() {
    let nx = 256;
    let dx = 0.1;
    let c = 1.0;
    let dt = 0.5 * latticefield_satp::max_stable_dt(c, dx, 1);
    let mut engine = SatpHiggsEngine::create(nx, 1, 1, Dim::One, dx, dt, c, 0.0, 0.0, 0.0, -1.0, 0.5).unwrap();

    engine.advance(10_000, None).unwrap();

    assert!(engine.rms_phi() < 1e-8, "phi_rms={}", engine.rms_phi());
    assert!(
        engine.rms_h_relative() < 1e-8,
        "h_rms_relative={}",
        engine.rms_h_relative()
    );
}

#[test]
fn satp_higgs_cfl_violation_is_rejected_at_construction() {
    let c = 1.0;
    let dx = 0.1;
    let dt = 0.15; // above the 0.095 CFL limit in 1D
    let result = SatpHiggsEngine::create(256, 1, 1, Dim::One, dx, dt, c, 0.0, 0.0, 0.0, -1.0, 0.5);
    assert!(result.is_err());
    assert_eq!(result.err().unwrap().status_code(), 1);
}

#[test]
fn igsoa_energy_is_conserved_with_zero_dissipation_and_normalization() {
    let nx = 64;
    let mut engine = IgsoaEngine::create(nx, 1, 1, Dim::One, 1.0, 0.0, 0.0, 0.01, true).unwrap();
    // Every site starts above the normalization threshold so Sigma F_i = N
    // holds from step 0 onward, rather than climbing as a sparse Gaussian's
    // near-zero tail sites cross the threshold one at a time.
    engine.init_uniform(1.0, 0.0, 0.0, Placement::Overwrite);

    let (psi_re0, psi_im0, _) = engine.get_all_states();
    let f0: f64 = psi_re0
        .iter()
        .zip(psi_im0.iter())
        .map(|(re, im)| re * re + im * im)
        .sum();

    engine.advance(1000, None).unwrap();

    let (psi_re1, psi_im1, _) = engine.get_all_states();
    let f1: f64 = psi_re1
        .iter()
        .zip(psi_im1.iter())
        .map(|(re, im)| re * re + im * im)
        .sum();

    assert!(
        (f1 - f0).abs() < 1e-10 * nx as f64,
        "total |psi|^2 drifted: f0={f0} f1={f1}"
    );
}

#[test]
fn get_all_states_round_trips_through_set_psi_set_phi() {
    let mut engine = IgsoaEngine::create(16, 1, 1, Dim::One, 1.0, 0.5, 0.1, 0.01, false).unwrap();
    let params = GaussianParams {
        amplitude: 1.0,
        sigma: [3.0, 0.0, 0.0],
        center: [8.0, 0.0, 0.0],
        baseline_phi: 0.5,
    };
    engine.init_gaussian(&params, Placement::Overwrite);
    engine.advance(5, None).unwrap();

    let (psi_re, psi_im, phi) = engine.get_all_states();
    let mut restored = IgsoaEngine::create(16, 1, 1, Dim::One, 1.0, 0.5, 0.1, 0.01, false).unwrap();
    for x in 0..16 {
        restored.set_psi(x, 0, 0, psi_re[x], psi_im[x]);
        restored.set_phi(x, 0, 0, phi[x]);
    }

    let (restored_re, restored_im, restored_phi) = restored.get_all_states();
    assert_eq!(psi_re, restored_re);
    assert_eq!(psi_im, restored_im);
    assert_eq!(phi, restored_phi);
}

#[test]
fn fftw_wisdom_round_trip_does_not_rewrite_an_existing_plan_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = latticefield::wisdom_init(dir.path()).unwrap();
    {
        let _plan = store.plan_2d(32, 32).unwrap();
    }
    store.shutdown().unwrap();

    let key_path = dir.path().join(format!(
        "{}.dat",
        latticefield_wisdom::plan_key(&[32, 32])
    ));
    let modified_after_first_run = std::fs::metadata(&key_path).unwrap().modified().unwrap();

    let store = latticefield::wisdom_init(dir.path()).unwrap();
    let _plan = store.plan_2d(32, 32).unwrap();
    let modified_after_second_run = std::fs::metadata(&key_path).unwrap().modified().unwrap();

    assert_eq!(modified_after_first_run, modified_after_second_run);
}
