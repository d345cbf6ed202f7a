//! Lattice field simulator core: opaque engine handles over the IGSOA and
//! SATP+Higgs field families (spec.md §6).
//!
//! Each engine owns its lattice, config, neighbor/kernel caches (IGSOA only),
//! and a per-engine [`Metrics`] struct — never a process-global singleton
//! (spec.md §9 re-architecture: the legacy global metrics struct shared
//! across engines was a data race).

use crossbeam_utils::CachePadded;
use latticefield_diagnostics::DiagnosticsError;
use latticefield_igsoa::{IgsoaConfig, IgsoaError};
use latticefield_init::{GaussianParams, PlaneWaveParams, Placement};
use latticefield_lattice::{Dim, DrivingSource, IgsoaNode, Lattice, LatticeShapeError, SatpHiggsNode, Shape};
use latticefield_neighbors::{KernelCache, NeighborCache, NeighborError};
use latticefield_satp::{SatpConfig, SatpError};
use latticefield_wisdom::WisdomError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised by engine construction, mutation, or stepping, mapped to the
/// exit-code ranges of spec.md §6: 1-99 config, 100-199 memory, 200-299
/// runtime, 300-399 physics, 400-499 I/O, 500-599 cache, 900 not-implemented.
#[derive(Debug, thiserror::Error)]
pub enum LatticeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Shape(#[from] LatticeShapeError),

    #[error("site ({x},{y},{z}) out of bounds for dimensions ({nx},{ny},{nz})")]
    OutOfBounds {
        x: usize,
        y: usize,
        z: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    },

    #[error(transparent)]
    Igsoa(#[from] IgsoaError),

    #[error(transparent)]
    Satp(#[from] SatpError),

    #[error(transparent)]
    Neighbor(#[from] NeighborError),

    #[error(transparent)]
    Wisdom(#[from] WisdomError),

    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),
}

pub type LatticeResult<T> = Result<T, LatticeError>;

impl LatticeError {
    /// Map this error onto the spec.md §6 exit-code scheme.
    pub fn status_code(&self) -> u32 {
        match self {
            LatticeError::Config(_) | LatticeError::Shape(_) => 1,
            LatticeError::OutOfBounds { .. } => 200,
            LatticeError::Igsoa(IgsoaError::NumericalInstability { .. }) => 300,
            LatticeError::Igsoa(IgsoaError::Neighbor(e)) => neighbor_code(e),
            LatticeError::Satp(SatpError::InvalidDt { .. }) => 1,
            LatticeError::Satp(SatpError::NumericalInstability { .. }) => 300,
            LatticeError::Neighbor(e) => neighbor_code(e),
            LatticeError::Wisdom(_) => 400,
            LatticeError::Diagnostics(DiagnosticsError::Wisdom(_)) => 400,
            LatticeError::Diagnostics(DiagnosticsError::FftFailed(_)) => 200,
            LatticeError::NotImplemented(_) => 900,
        }
    }
}

fn neighbor_code(_e: &NeighborError) -> u32 {
    500
}

/// `{ns_per_op, ops_per_sec, total_ops}` snapshot of a [`Metrics`] (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub ns_per_op: f64,
    pub ops_per_sec: f64,
    pub total_ops: u64,
}

/// Per-engine step/operation/timing counters. `CachePadded` keeps the three
/// atomics on separate cache lines so an optional parallel per-step loop
/// (spec.md §5) updating them from multiple threads never false-shares.
struct Metrics {
    total_steps: CachePadded<AtomicU64>,
    total_site_ops: CachePadded<AtomicU64>,
    total_time_ns: CachePadded<AtomicU64>,
}

impl Metrics {
    fn new() -> Self {
        Self {
            total_steps: CachePadded::new(AtomicU64::new(0)),
            total_site_ops: CachePadded::new(AtomicU64::new(0)),
            total_time_ns: CachePadded::new(AtomicU64::new(0)),
        }
    }

    fn record(&self, steps: u64, site_ops: u64, elapsed_ns: u64) {
        self.total_steps.fetch_add(steps, Ordering::Relaxed);
        self.total_site_ops.fetch_add(site_ops, Ordering::Relaxed);
        self.total_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let total_ops = self.total_site_ops.load(Ordering::Relaxed);
        let total_ns = self.total_time_ns.load(Ordering::Relaxed);
        let ns_per_op = if total_ops > 0 {
            total_ns as f64 / total_ops as f64
        } else {
            0.0
        };
        let ops_per_sec = if total_ns > 0 {
            total_ops as f64 / (total_ns as f64 / 1e9)
        } else {
            0.0
        };
        MetricsSnapshot {
            ns_per_op,
            ops_per_sec,
            total_ops,
        }
    }
}

const MAX_R_C: f64 = 1000.0;

fn validate_dt_bounds(dt: f64) -> LatticeResult<()> {
    if !(dt > 0.0 && dt <= 1.0) {
        return Err(LatticeError::Config(format!(
            "dt must be in (0, 1], got {dt}"
        )));
    }
    Ok(())
}

/// IGSOA engine handle: owns its lattice, config, neighbor/kernel caches,
/// simulation clock, and per-engine metrics (spec.md §3, §6).
pub struct IgsoaEngine {
    lattice: Lattice<IgsoaNode>,
    config: IgsoaConfig,
    cache: NeighborCache,
    time: f64,
    step_count: u64,
    metrics: Metrics,
}

impl IgsoaEngine {
    /// Construct and eagerly validate an IGSOA engine (spec.md §4.8). R_c = 0
    /// is accepted and disables non-local coupling (spec.md §8 boundary
    /// behavior); negative R_c or R_c > 1000 is rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        nx: usize,
        ny: usize,
        nz: usize,
        dim: Dim,
        r_c: f64,
        kappa: f64,
        gamma: f64,
        dt: f64,
        normalize_psi: bool,
    ) -> LatticeResult<Self> {
        let shape = Shape::new(nx, ny, nz, dim)?;
        if !(0.0..=MAX_R_C).contains(&r_c) {
            return Err(LatticeError::Config(format!(
                "r_c must be in [0, {MAX_R_C}], got {r_c}"
            )));
        }
        if kappa < 0.0 {
            return Err(LatticeError::Config(format!("kappa must be >= 0, got {kappa}")));
        }
        if gamma < 0.0 {
            return Err(LatticeError::Config(format!("gamma must be >= 0, got {gamma}")));
        }
        validate_dt_bounds(dt)?;

        let config = IgsoaConfig {
            r_c,
            kappa,
            gamma,
            dt,
            normalize_psi,
            hbar: 1.0,
            parallel: false,
        };
        let lattice = Lattice::new(shape, IgsoaNode::vacuum(r_c, kappa, gamma));
        let kernel_cache = KernelCache::new(r_c);
        let mut cache = NeighborCache::new(shape, r_c);
        cache.build(r_c, &kernel_cache)?;

        Ok(Self {
            lattice,
            config,
            cache,
            time: 0.0,
            step_count: 0,
            metrics: Metrics::new(),
        })
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.lattice.shape.nx, self.lattice.shape.ny, self.lattice.shape.nz)
    }

    fn index_in_bounds(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        let shape = self.lattice.shape;
        if x < shape.nx && y < shape.ny && z < shape.nz {
            Some(shape.index(x, y, z))
        } else {
            None
        }
    }

    /// Set psi at (x, y, z); ignored out of bounds (release) / asserts (debug).
    pub fn set_psi(&mut self, x: usize, y: usize, z: usize, re: f64, im: f64) {
        match self.index_in_bounds(x, y, z) {
            Some(i) => {
                let node = self.lattice.get_mut(i);
                node.psi = num_complex::Complex64::new(re, im);
                node.refresh_derived();
            }
            None => debug_assert!(false, "set_psi out of bounds"),
        }
    }

    pub fn set_phi(&mut self, x: usize, y: usize, z: usize, value: f64) {
        match self.index_in_bounds(x, y, z) {
            Some(i) => {
                let node = self.lattice.get_mut(i);
                node.phi = value;
                node.refresh_derived();
            }
            None => debug_assert!(false, "set_phi out of bounds"),
        }
    }

    /// Returns `(0.0, 0.0)` out of bounds (release); debug builds assert.
    pub fn get_psi(&self, x: usize, y: usize, z: usize) -> (f64, f64) {
        match self.index_in_bounds(x, y, z) {
            Some(i) => {
                let psi = self.lattice.get(i).psi;
                (psi.re, psi.im)
            }
            None => {
                debug_assert!(false, "get_psi out of bounds");
                (0.0, 0.0)
            }
        }
    }

    pub fn get_phi(&self, x: usize, y: usize, z: usize) -> f64 {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get(i).phi,
            None => {
                debug_assert!(false, "get_phi out of bounds");
                0.0
            }
        }
    }

    pub fn get_f(&self, x: usize, y: usize, z: usize) -> f64 {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get(i).f,
            None => {
                debug_assert!(false, "get_f out of bounds");
                0.0
            }
        }
    }

    /// Bulk row-major copy of `(psi_re, psi_im, phi)` over the whole lattice.
    pub fn get_all_states(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n = self.lattice.site_count();
        let mut psi_re = Vec::with_capacity(n);
        let mut psi_im = Vec::with_capacity(n);
        let mut phi = Vec::with_capacity(n);
        for node in self.lattice.as_slice() {
            psi_re.push(node.psi.re);
            psi_im.push(node.psi.im);
            phi.push(node.phi);
        }
        (psi_re, psi_im, phi)
    }

    pub fn init_gaussian(&mut self, params: &GaussianParams, mode: Placement) {
        latticefield_init::init_gaussian(&mut self.lattice, params, mode);
    }

    pub fn init_plane_wave(&mut self, params: &PlaneWaveParams, mode: Placement) {
        latticefield_init::init_plane_wave(&mut self.lattice, params, mode);
    }

    pub fn init_uniform(&mut self, psi_re: f64, psi_im: f64, phi: f64, mode: Placement) {
        latticefield_init::init_uniform(&mut self.lattice, psi_re, psi_im, phi, mode);
    }

    pub fn init_random(&mut self, a_max: f64, seed: u64, mode: Placement) {
        latticefield_init::init_random(&mut self.lattice, a_max, seed, mode);
    }

    /// Advance `k_steps` time steps of size `config.dt` (spec.md §4.2).
    pub fn advance(&mut self, k_steps: u64, driving: Option<&dyn DrivingSource>) -> LatticeResult<()> {
        let start = Instant::now();
        let n = self.lattice.site_count() as u64;
        let new_time = latticefield_igsoa::advance(
            &mut self.lattice,
            Some(&self.cache),
            &self.config,
            self.time,
            k_steps,
            driving,
        )?;
        self.time = new_time;
        self.step_count += k_steps;
        self.metrics.record(k_steps, k_steps * n, start.elapsed().as_nanos() as u64);
        Ok(())
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn total_energy(&self) -> f64 {
        latticefield_diagnostics::total_energy_igsoa(&self.lattice)
    }

    pub fn entropy_rate(&self) -> f64 {
        latticefield_diagnostics::entropy_rate(&self.lattice)
    }

    /// Circular center of mass weighted by F = |psi|^2 (spec.md §4.6).
    pub fn center_of_mass(&self) -> (f64, f64, f64) {
        let lattice = &self.lattice;
        latticefield_diagnostics::center_of_mass(&lattice.shape, |i| lattice.get(i).f)
    }
}

/// SATP+Higgs engine handle: fixed-stencil Velocity-Verlet over a real
/// (phi, h) pair (spec.md §3, §6).
pub struct SatpHiggsEngine {
    lattice: Lattice<SatpHiggsNode>,
    config: SatpConfig,
    time: f64,
    step_count: u64,
    metrics: Metrics,
}

impl SatpHiggsEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        nx: usize,
        ny: usize,
        nz: usize,
        dim: Dim,
        dx: f64,
        dt: f64,
        c: f64,
        gamma_phi: f64,
        gamma_h: f64,
        lambda: f64,
        mu_sq: f64,
        lambda_h: f64,
    ) -> LatticeResult<Self> {
        let shape = Shape::new(nx, ny, nz, dim)?;
        if dx <= 0.0 {
            return Err(LatticeError::Config(format!("dx must be > 0, got {dx}")));
        }
        if c <= 0.0 {
            return Err(LatticeError::Config(format!("c must be > 0, got {c}")));
        }
        if gamma_phi < 0.0 || gamma_h < 0.0 {
            return Err(LatticeError::Config(
                "gamma_phi and gamma_h must be >= 0".to_string(),
            ));
        }
        validate_dt_bounds(dt)?;
        latticefield_satp::validate_dt(dt, c, dx, dim.as_usize())?;

        let h_vev = SatpConfig::derive_h_vev(mu_sq, lambda_h);
        let config = SatpConfig {
            dx,
            dt,
            c,
            gamma_phi,
            gamma_h,
            lambda,
            mu_sq,
            lambda_h,
            h_vev,
            parallel: false,
        };
        let lattice = Lattice::new(shape, SatpHiggsNode::vacuum(h_vev));

        Ok(Self {
            lattice,
            config,
            time: 0.0,
            step_count: 0,
            metrics: Metrics::new(),
        })
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.lattice.shape.nx, self.lattice.shape.ny, self.lattice.shape.nz)
    }

    fn index_in_bounds(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        let shape = self.lattice.shape;
        if x < shape.nx && y < shape.ny && z < shape.nz {
            Some(shape.index(x, y, z))
        } else {
            None
        }
    }

    pub fn set_phi(&mut self, x: usize, y: usize, z: usize, value: f64) {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get_mut(i).phi = value,
            None => debug_assert!(false, "set_phi out of bounds"),
        }
    }

    pub fn set_h(&mut self, x: usize, y: usize, z: usize, value: f64) {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get_mut(i).h = value,
            None => debug_assert!(false, "set_h out of bounds"),
        }
    }

    pub fn get_phi(&self, x: usize, y: usize, z: usize) -> f64 {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get(i).phi,
            None => {
                debug_assert!(false, "get_phi out of bounds");
                0.0
            }
        }
    }

    pub fn get_h(&self, x: usize, y: usize, z: usize) -> f64 {
        match self.index_in_bounds(x, y, z) {
            Some(i) => self.lattice.get(i).h,
            None => {
                debug_assert!(false, "get_h out of bounds");
                0.0
            }
        }
    }

    pub fn h_vev(&self) -> f64 {
        self.config.h_vev
    }

    pub fn advance(&mut self, k_steps: u64, source: Option<&dyn DrivingSource>) -> LatticeResult<()> {
        let start = Instant::now();
        let n = self.lattice.site_count() as u64;
        let new_time = latticefield_satp::advance(&mut self.lattice, &self.config, self.time, k_steps, source)?;
        self.time = new_time;
        self.step_count += k_steps;
        self.metrics.record(k_steps, k_steps * n, start.elapsed().as_nanos() as u64);
        Ok(())
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn total_energy(&self) -> f64 {
        latticefield_diagnostics::total_energy_satp(&self.lattice, &self.config)
    }

    pub fn rms_phi(&self) -> f64 {
        latticefield_diagnostics::rms_phi(self.lattice.as_slice().iter().map(|n| n.phi))
    }

    pub fn rms_h_relative(&self) -> f64 {
        latticefield_diagnostics::rms_h_relative(&self.lattice, self.config.h_vev)
    }

    /// Circular center of mass weighted by |phi| (spec.md §4.6).
    pub fn center_of_mass(&self) -> (f64, f64, f64) {
        let lattice = &self.lattice;
        latticefield_diagnostics::center_of_mass(&lattice.shape, |i| lattice.get(i).phi.abs())
    }
}

/// Open/create the process-wide FFTW wisdom store (spec.md §4.7).
pub fn wisdom_init(dir: impl AsRef<std::path::Path>) -> LatticeResult<latticefield_wisdom::WisdomStore> {
    Ok(latticefield_wisdom::WisdomStore::init(dir)?)
}

/// Correlation length of a 1D scalar field sample via the wisdom-cached FFT
/// plan (spec.md §8 end-to-end scenario 3).
pub fn correlation_length(store: &latticefield_wisdom::WisdomStore, field: &[f64]) -> LatticeResult<f64> {
    Ok(latticefield_diagnostics::correlation_length_1d(store, field)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_dt_above_one() {
        let result = IgsoaEngine::create(4, 1, 1, Dim::One, 1.0, 0.0, 0.0, 1.5, true);
        assert_eq!(result.err().map(|e| e.status_code()), Some(1));
    }

    #[test]
    fn create_rejects_negative_r_c() {
        let result = IgsoaEngine::create(4, 1, 1, Dim::One, -1.0, 0.0, 0.0, 0.01, true);
        assert_eq!(result.err().map(|e| e.status_code()), Some(1));
    }

    #[test]
    fn set_then_get_psi_round_trips_bit_for_bit() {
        let mut engine = IgsoaEngine::create(8, 1, 1, Dim::One, 0.0, 0.0, 0.0, 0.01, false).unwrap();
        engine.set_psi(3, 0, 0, 0.25, -0.75);
        assert_eq!(engine.get_psi(3, 0, 0), (0.25, -0.75));
    }

    #[test]
    fn satp_rejects_dt_above_cfl_limit() {
        let result = SatpHiggsEngine::create(256, 1, 1, Dim::One, 0.1, 0.15, 1.0, 0.0, 0.0, 0.0, -1.0, 0.5);
        assert_eq!(result.err().map(|e| e.status_code()), Some(1));
    }

    #[test]
    fn satp_accepts_dt_at_cfl_limit() {
        let max_dt = latticefield_satp::max_stable_dt(1.0, 0.1, 1);
        let engine = SatpHiggsEngine::create(256, 1, 1, Dim::One, 0.1, max_dt, 1.0, 0.0, 0.0, 0.0, -1.0, 0.5);
        assert!(engine.is_ok());
    }

    #[test]
    fn metrics_accumulate_across_advance_calls() {
        let mut engine = IgsoaEngine::create(8, 1, 1, Dim::One, 0.0, 0.0, 0.0, 0.01, false).unwrap();
        engine.advance(10, None).unwrap();
        let snapshot = engine.get_metrics();
        assert_eq!(snapshot.total_ops, 80);
        assert_eq!(engine.step_count(), 10);
    }
}
