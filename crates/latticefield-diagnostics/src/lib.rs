//! Lattice-wide reductions (spec.md §4.6): total energy, entropy production
//! rate, RMS, circular center-of-mass, and an FFT-based correlation length.

use fftw::plan::C2CPlan;
use fftw::types::c64;
use latticefield_lattice::{IgsoaNode, Lattice, SatpHiggsNode, Shape};
use latticefield_satp::SatpConfig;
use latticefield_wisdom::{WisdomError, WisdomStore};
use std::f64::consts::PI;

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error(transparent)]
    Wisdom(#[from] WisdomError),

    #[error("FFT execution failed: {0}")]
    FftFailed(String),
}

pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

/// Total IGSOA energy E = sum_i (F_i + phi_i^2) (spec.md §4.6).
pub fn total_energy_igsoa(lattice: &Lattice<IgsoaNode>) -> f64 {
    lattice.as_slice().iter().map(|n| n.f + n.phi * n.phi).sum()
}

/// Total SATP+Higgs energy: sum of the per-site cached energy density times
/// the axis-product volume element dx^d (spec.md §4.6).
pub fn total_energy_satp(lattice: &Lattice<SatpHiggsNode>, config: &SatpConfig) -> f64 {
    let dim = [lattice.shape.nx, lattice.shape.ny, lattice.shape.nz]
        .iter()
        .filter(|&&n| n > 1)
        .count()
        .max(1);
    let volume_element = config.dx.powi(dim as i32);
    let sum: f64 = lattice.as_slice().iter().map(|n| n.energy_density).sum();
    sum * volume_element
}

/// Entropy production rate Sdot_total = sum_i Sdot_i.
pub fn entropy_rate(lattice: &Lattice<IgsoaNode>) -> f64 {
    lattice.as_slice().iter().map(|n| n.s_dot).sum()
}

/// RMS of phi: sqrt(<phi^2>).
pub fn rms_phi(phi_values: impl Iterator<Item = f64> + Clone) -> f64 {
    let mut count = 0usize;
    let mut sum_sq = 0.0;
    for v in phi_values {
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

/// RMS of h relative to its vacuum expectation value: sqrt(<(h - h_vev)^2>).
pub fn rms_h_relative(lattice: &Lattice<SatpHiggsNode>, h_vev: f64) -> f64 {
    let n = lattice.site_count();
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f64 = lattice
        .as_slice()
        .iter()
        .map(|node| (node.h - h_vev).powi(2))
        .sum();
    (sum_sq / n as f64).sqrt()
}

/// Circular center-of-mass on a torus (spec.md §4.6): for weight `w_i` and
/// angle `theta_axis = 2*pi*coord_axis/N_axis`, accumulate sum(w*cos) and
/// sum(w*sin) per axis and take atan2, mapped back to `[0, N_axis)`. Returns
/// 0 for an axis whose total weight is zero. Naive coordinate averaging is
/// specifically wrong on a periodic domain and is never used here.
pub fn center_of_mass(shape: &Shape, weight: impl Fn(usize) -> f64) -> (f64, f64, f64) {
    let axes = [shape.nx, shape.ny, shape.nz];
    let mut sum_w = [0.0f64; 3];
    let mut sum_cos = [0.0f64; 3];
    let mut sum_sin = [0.0f64; 3];

    for i in 0..shape.site_count() {
        let w = weight(i);
        if w == 0.0 {
            continue;
        }
        let (x, y, z) = shape.coords(i);
        let coords = [x, y, z];
        for axis in 0..3 {
            let n = axes[axis];
            let theta = 2.0 * PI * coords[axis] as f64 / n as f64;
            sum_w[axis] += w;
            sum_cos[axis] += w * theta.cos();
            sum_sin[axis] += w * theta.sin();
        }
    }

    let mut result = [0.0f64; 3];
    for axis in 0..3 {
        if sum_w[axis] == 0.0 {
            result[axis] = 0.0;
            continue;
        }
        let mut angle = sum_sin[axis].atan2(sum_cos[axis]);
        if angle < 0.0 {
            angle += 2.0 * PI;
        }
        result[axis] = angle / (2.0 * PI) * axes[axis] as f64;
    }
    (result[0], result[1], result[2])
}

/// Fit an exponential decay `exp(-k/xi)` to the low-k power spectrum of a
/// scalar field (spec.md §8 end-to-end scenario 3) via an FFTW plan drawn
/// from the wisdom cache, then a log-space linear least-squares fit.
pub fn correlation_length_1d(store: &WisdomStore, field: &[f64]) -> DiagnosticsResult<f64> {
    let n = field.len();
    let plan = store.plan_1d(n)?;
    let mut plan = plan;
    let mut input: Vec<c64> = field.iter().map(|&v| c64::new(v, 0.0)).collect();
    let mut output: Vec<c64> = vec![c64::new(0.0, 0.0); n];
    plan.c2c(&mut input, &mut output)
        .map_err(|e| DiagnosticsError::FftFailed(e.to_string()))?;

    let power: Vec<f64> = output.iter().take(n / 2).map(|c| c.norm_sqr()).collect();
    Ok(fit_exponential_decay(&power))
}

/// log(P(k)) ~= log(P0) - k/xi; solve the 2-parameter least-squares line fit
/// via the normal equations (grounded on nalgebra elsewhere in this
/// workspace's lineage; here the 2x2 system is solved directly since a full
/// matrix decomposition would be overkill for two unknowns).
fn fit_exponential_decay(power: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = power
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, &p)| p > 0.0)
        .map(|(k, &p)| (k as f64, p.ln()))
        .collect();

    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    if slope >= 0.0 {
        0.0
    } else {
        -1.0 / slope
    }
}
