//! Velocity-Verlet integration of the coupled SATP phi / Higgs h wave system
//! (spec.md §4.3):
//!
//! phi'' = c^2 nabla^2 phi - gamma_phi phi' - 2 lambda phi h^2 + S(t, x)
//! h''   = c^2 nabla^2 h   - gamma_h   h'   - 2 mu^2 h - 4 lambda_h h^3 - 2 lambda phi^2 h

use latticefield_lattice::{DrivingSource, Lattice, SatpHiggsNode, Shape};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SatpError {
    #[error("numerical instability detected (NaN or Inf) at site {site}")]
    NumericalInstability { site: usize },

    #[error("dt {dt} exceeds the CFL stability bound {max_dt} for c={c}, dx={dx}, dim={dim}")]
    InvalidDt {
        dt: f64,
        max_dt: f64,
        c: f64,
        dx: f64,
        dim: usize,
    },
}

pub type SatpResult<T> = Result<T, SatpError>;

/// Per-engine configuration for the SATP+Higgs integrator (spec.md §4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatpConfig {
    pub dx: f64,
    pub dt: f64,
    pub c: f64,
    pub gamma_phi: f64,
    pub gamma_h: f64,
    pub lambda: f64,
    pub mu_sq: f64,
    pub lambda_h: f64,
    pub h_vev: f64,
    pub parallel: bool,
}

impl SatpConfig {
    /// Derive h_vev from mu^2 and lambda_h: the nonzero minimum of the Higgs
    /// potential V(h) = mu^2 h^2 + lambda_h h^4 satisfies h_vev^2 = -mu^2 / (2 lambda_h).
    pub fn derive_h_vev(mu_sq: f64, lambda_h: f64) -> f64 {
        if lambda_h <= 0.0 {
            return 0.0;
        }
        let v_sq = -mu_sq / (2.0 * lambda_h);
        if v_sq <= 0.0 {
            0.0
        } else {
            v_sq.sqrt()
        }
    }
}

/// Maximum stable Velocity-Verlet time step under the CFL condition
/// c*dt/dx <= 1/sqrt(d) (spec.md §4.3): `0.95 * dx / (c * sqrt(d))`.
pub fn max_stable_dt(c: f64, dx: f64, dim: usize) -> f64 {
    0.95 * dx / (c * (dim as f64).sqrt())
}

/// Eagerly validate dt against the CFL bound; the legacy implementation only
/// checked on demand, this implementation rejects construction up front
/// (spec.md §4.3, §9).
pub fn validate_dt(dt: f64, c: f64, dx: f64, dim: usize) -> SatpResult<()> {
    let max_dt = max_stable_dt(c, dx, dim);
    if dt > max_dt {
        return Err(SatpError::InvalidDt { dt, max_dt, c, dx, dim });
    }
    Ok(())
}

#[inline]
fn laplacian(shape: &Shape, field: &[f64], i: usize, dx: f64) -> f64 {
    let mut sum = 0.0;
    let mut center_count = 0usize;
    for (axis, n) in [(0usize, shape.nx), (1, shape.ny), (2, shape.nz)] {
        if n <= 1 {
            continue;
        }
        let plus = shape.neighbor_index(i, axis, 1);
        let minus = shape.neighbor_index(i, axis, -1);
        sum += field[plus] + field[minus];
        center_count += 1;
    }
    (sum - 2.0 * center_count as f64 * field[i]) / (dx * dx)
}

/// Forward-difference squared-gradient magnitude used only by the energy
/// density diagnostic (spec.md §4.6), distinct from the Laplacian stencil.
#[inline]
fn forward_grad_sq(shape: &Shape, field: &[f64], i: usize, dx: f64) -> f64 {
    let mut sum = 0.0;
    for (axis, n) in [(0usize, shape.nx), (1, shape.ny), (2, shape.nz)] {
        if n <= 1 {
            continue;
        }
        let plus = shape.neighbor_index(i, axis, 1);
        let d = (field[plus] - field[i]) / dx;
        sum += d * d;
    }
    sum
}

fn local_energy_density(config: &SatpConfig, shape: &Shape, phi: &[f64], h: &[f64], phi_dot: f64, h_dot: f64, i: usize) -> f64 {
    let grad_phi_sq = forward_grad_sq(shape, phi, i, config.dx);
    let grad_h_sq = forward_grad_sq(shape, h, i, config.dx);
    let hv = h[i];
    0.5 * (phi_dot * phi_dot + h_dot * h_dot)
        + 0.5 * config.c * config.c * grad_phi_sq
        + 0.5 * config.c * config.c * grad_h_sq
        + config.mu_sq * hv * hv
        + config.lambda_h * hv.powi(4)
        + config.lambda * phi[i] * phi[i] * hv * hv
}

fn accelerations(
    config: &SatpConfig,
    shape: &Shape,
    phi: &[f64],
    h: &[f64],
    phi_dot: &[f64],
    h_dot: &[f64],
    t: f64,
    source: Option<&dyn DrivingSource>,
) -> (Vec<f64>, Vec<f64>) {
    let n = shape.site_count();
    let compute = |i: usize| {
        let lap_phi = laplacian(shape, phi, i, config.dx);
        let lap_h = laplacian(shape, h, i, config.dx);
        let s = source
            .map(|s| s.sample(t, shape.coords(i), i).0)
            .unwrap_or(0.0);
        let a_phi = config.c * config.c * lap_phi
            - config.gamma_phi * phi_dot[i]
            - 2.0 * config.lambda * phi[i] * h[i] * h[i]
            + s;
        let a_h = config.c * config.c * lap_h
            - config.gamma_h * h_dot[i]
            - 2.0 * config.mu_sq * h[i]
            - 4.0 * config.lambda_h * h[i].powi(3)
            - 2.0 * config.lambda * phi[i] * phi[i] * h[i];
        (a_phi, a_h)
    };
    let pairs: Vec<(f64, f64)> = if config.parallel {
        (0..n).into_par_iter().map(compute).collect()
    } else {
        (0..n).map(compute).collect()
    };
    pairs.into_iter().unzip()
}

/// Advance the SATP+Higgs lattice by one Velocity-Verlet step (spec.md
/// §4.3). Damping terms in the second acceleration evaluation use the
/// half-kicked velocities, the standard velocity-dependent-force variant.
pub fn step(
    lattice: &mut Lattice<SatpHiggsNode>,
    config: &SatpConfig,
    t: f64,
    source: Option<&dyn DrivingSource>,
) -> SatpResult<()> {
    let shape = lattice.shape;
    let n = shape.site_count();

    let mut phi: Vec<f64> = lattice.as_slice().iter().map(|n| n.phi).collect();
    let mut h: Vec<f64> = lattice.as_slice().iter().map(|n| n.h).collect();
    let mut phi_dot: Vec<f64> = lattice.as_slice().iter().map(|n| n.phi_dot).collect();
    let mut h_dot: Vec<f64> = lattice.as_slice().iter().map(|n| n.h_dot).collect();

    let (a0_phi, a0_h) = accelerations(config, &shape, &phi, &h, &phi_dot, &h_dot, t, source);

    for i in 0..n {
        phi[i] += phi_dot[i] * config.dt + 0.5 * a0_phi[i] * config.dt * config.dt;
        h[i] += h_dot[i] * config.dt + 0.5 * a0_h[i] * config.dt * config.dt;
        phi_dot[i] += 0.5 * a0_phi[i] * config.dt;
        h_dot[i] += 0.5 * a0_h[i] * config.dt;
    }

    // Half-kicked velocities feed the damping term in the second evaluation:
    // the standard velocity-dependent-force variant of Velocity-Verlet.
    let (a1_phi, a1_h) = accelerations(config, &shape, &phi, &h, &phi_dot, &h_dot, t + config.dt, source);

    for i in 0..n {
        phi_dot[i] += 0.5 * a1_phi[i] * config.dt;
        h_dot[i] += 0.5 * a1_h[i] * config.dt;

        if !phi[i].is_finite() || !h[i].is_finite() || !phi_dot[i].is_finite() || !h_dot[i].is_finite() {
            return Err(SatpError::NumericalInstability { site: i });
        }
    }

    for i in 0..n {
        let energy = local_energy_density(config, &shape, &phi, &h, phi_dot[i], h_dot[i], i);
        let node = lattice.get_mut(i);
        node.phi = phi[i];
        node.h = h[i];
        node.phi_dot = phi_dot[i];
        node.h_dot = h_dot[i];
        node.energy_density = energy;
    }

    Ok(())
}

/// Advance by `k` steps starting at time `t0`; returns the new time.
pub fn advance(
    lattice: &mut Lattice<SatpHiggsNode>,
    config: &SatpConfig,
    t0: f64,
    k_steps: u64,
    source: Option<&dyn DrivingSource>,
) -> SatpResult<f64> {
    let mut t = t0;
    for _ in 0..k_steps {
        step(lattice, config, t, source)?;
        t += config.dt;
    }
    Ok(t)
}
