//! State initialization operators (spec.md §4.5): Gaussian, plane-wave,
//! uniform, random, and three-zone-source profiles, each applied under a
//! placement mode of overwrite, add, or blend. Every operator recomputes
//! derived caches (F, theta, Sdot) on every site it touches.

use latticefield_lattice::{DrivingSource, IgsoaNode, Lattice};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::f64::consts::PI;

/// How a new value combines with whatever was already stored at a site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Overwrite,
    Add,
    /// Interpolate `old*(1-beta) + new*beta`; `beta` is expected in `[0, 1]`.
    Blend(f64),
}

fn blend_complex(
    old: num_complex::Complex64,
    new: num_complex::Complex64,
    mode: Placement,
) -> num_complex::Complex64 {
    match mode {
        Placement::Overwrite => new,
        Placement::Add => old + new,
        Placement::Blend(beta) => old * (1.0 - beta) + new * beta,
    }
}

fn blend_real(old: f64, new: f64, mode: Placement) -> f64 {
    match mode {
        Placement::Overwrite => new,
        Placement::Add => old + new,
        Placement::Blend(beta) => old * (1.0 - beta) + new * beta,
    }
}

/// Parameters for a Gaussian wave packet (spec.md §4.5): purely real `psi`
/// centered at `center` with per-axis width `sigma`, clamped to >= 1e-9.
#[derive(Debug, Clone)]
pub struct GaussianParams {
    pub amplitude: f64,
    pub sigma: [f64; 3],
    pub center: [f64; 3],
    /// Baseline phi applied in overwrite/blend mode; ignored (phi untouched)
    /// in add mode.
    pub baseline_phi: f64,
}

pub fn init_gaussian(lattice: &mut Lattice<IgsoaNode>, params: &GaussianParams, mode: Placement) {
    let shape = lattice.shape;
    for i in 0..shape.site_count() {
        let (x, y, z) = shape.coords(i);
        let coords = [x as f64, y as f64, z as f64];
        let mut exponent = 0.0;
        for (axis, &coord) in coords.iter().enumerate() {
            let sigma = params.sigma[axis].max(1e-9);
            let d = coord - params.center[axis];
            exponent += d * d / (2.0 * sigma * sigma);
        }
        let value = params.amplitude * (-exponent).exp();
        let new_psi = num_complex::Complex64::new(value, 0.0);

        let node = lattice.get_mut(i);
        node.psi = blend_complex(node.psi, new_psi, mode);
        node.phi = match mode {
            Placement::Add => node.phi,
            _ => blend_real(node.phi, params.baseline_phi, mode),
        };
        node.refresh_derived();
    }
}

/// Parameters for a plane wave `psi <- A * exp(i*(k.x + phi0))` (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct PlaneWaveParams {
    pub amplitude: f64,
    pub k: [f64; 3],
    pub phase0: f64,
}

pub fn init_plane_wave(lattice: &mut Lattice<IgsoaNode>, params: &PlaneWaveParams, mode: Placement) {
    let shape = lattice.shape;
    for i in 0..shape.site_count() {
        let (x, y, z) = shape.coords(i);
        let coords = [x as f64, y as f64, z as f64];
        let phase = params.k[0] * coords[0] + params.k[1] * coords[1] + params.k[2] * coords[2] + params.phase0;
        let new_psi = num_complex::Complex64::from_polar(params.amplitude, phase);
        let node = lattice.get_mut(i);
        node.psi = blend_complex(node.psi, new_psi, mode);
        node.refresh_derived();
    }
}

/// Set every site to the same `(psi_re, psi_im, phi)` (spec.md §4.5).
pub fn init_uniform(lattice: &mut Lattice<IgsoaNode>, psi_re: f64, psi_im: f64, phi: f64, mode: Placement) {
    let new_psi = num_complex::Complex64::new(psi_re, psi_im);
    for i in 0..lattice.shape.site_count() {
        let node = lattice.get_mut(i);
        node.psi = blend_complex(node.psi, new_psi, mode);
        node.phi = blend_real(node.phi, phi, mode);
        node.refresh_derived();
    }
}

/// `|psi|` uniform in `[0, a_max]`, phase uniform in `[0, 2*pi)`. Seed 0
/// draws from system entropy; any other seed is reproducible (spec.md §4.5).
pub fn init_random(lattice: &mut Lattice<IgsoaNode>, a_max: f64, seed: u64, mode: Placement) {
    let mut rng: Box<dyn RngCore> = if seed == 0 {
        Box::new(rand::thread_rng())
    } else {
        Box::new(StdRng::seed_from_u64(seed))
    };

    for i in 0..lattice.shape.site_count() {
        let magnitude = rng.gen_range(0.0..=a_max);
        let phase = rng.gen_range(0.0..(2.0 * PI));
        let new_psi = num_complex::Complex64::from_polar(magnitude, phase);
        let node = lattice.get_mut(i);
        node.psi = blend_complex(node.psi, new_psi, mode);
        node.refresh_derived();
    }
}

/// A driving term with three spatial zones along one axis, each amplitude
/// modulated by `sin(2*pi*f*t)` when a frequency is set, active only for
/// `t` in `[t_start, t_end]` (spec.md §4.5).
pub struct ThreeZoneSource {
    pub axis: usize,
    /// Boundaries splitting `axis` into zones 0, 1, 2.
    pub boundaries: [f64; 2],
    pub amplitudes: [f64; 3],
    pub frequency: Option<f64>,
    pub t_start: f64,
    pub t_end: f64,
}

impl DrivingSource for ThreeZoneSource {
    fn sample(&self, t: f64, coords: (usize, usize, usize), _index: usize) -> (f64, f64) {
        if t < self.t_start || t > self.t_end {
            return (0.0, 0.0);
        }
        let axis_coords = [coords.0 as f64, coords.1 as f64, coords.2 as f64];
        let pos = axis_coords[self.axis];
        let zone = if pos < self.boundaries[0] {
            0
        } else if pos < self.boundaries[1] {
            1
        } else {
            2
        };
        let time_factor = match self.frequency {
            Some(f) => (2.0 * PI * f * t).sin(),
            None => 1.0,
        };
        (self.amplitudes[zone] * time_factor, 0.0)
    }
}

pub fn three_zone_source(
    axis: usize,
    boundaries: [f64; 2],
    amplitudes: [f64; 3],
    frequency: Option<f64>,
    t_start: f64,
    t_end: f64,
) -> ThreeZoneSource {
    ThreeZoneSource {
        axis,
        boundaries,
        amplitudes,
        frequency,
        t_start,
        t_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticefield_lattice::{Dim, Shape};

    fn lattice(nx: usize) -> Lattice<IgsoaNode> {
        let shape = Shape::new(nx, 1, 1, Dim::One).unwrap();
        Lattice::new(shape, IgsoaNode::vacuum(0.0, 0.0, 0.0))
    }

    #[test]
    fn uniform_round_trips_through_get_all_states() {
        let mut lattice = lattice(8);
        init_uniform(&mut lattice, 1.5, 0.0, 0.2, Placement::Overwrite);
        for i in 0..8 {
            assert_eq!(lattice.get(i).psi.re, 1.5);
            assert_eq!(lattice.get(i).phi, 0.2);
        }
    }

    #[test]
    fn gaussian_overwrite_is_idempotent() {
        let mut lattice = lattice(32);
        let params = GaussianParams {
            amplitude: 1.5,
            sigma: [4.0, 1e-9, 1e-9],
            center: [16.0, 0.0, 0.0],
            baseline_phi: 0.0,
        };
        init_gaussian(&mut lattice, &params, Placement::Overwrite);
        let first: Vec<_> = lattice.as_slice().iter().map(|n| n.psi).collect();
        init_gaussian(&mut lattice, &params, Placement::Overwrite);
        let second: Vec<_> = lattice.as_slice().iter().map(|n| n.psi).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn gaussian_clamps_degenerate_sigma() {
        let mut lattice = lattice(8);
        let params = GaussianParams {
            amplitude: 1.0,
            sigma: [0.0, 0.0, 0.0],
            center: [0.0, 0.0, 0.0],
            baseline_phi: 0.0,
        };
        init_gaussian(&mut lattice, &params, Placement::Overwrite);
        assert!(lattice.get(0).psi.re.is_finite());
    }

    #[test]
    fn random_with_nonzero_seed_is_reproducible() {
        let mut a = lattice(16);
        let mut b = lattice(16);
        init_random(&mut a, 2.0, 42, Placement::Overwrite);
        init_random(&mut b, 2.0, 42, Placement::Overwrite);
        for i in 0..16 {
            assert_eq!(a.get(i).psi, b.get(i).psi);
        }
    }

    #[test]
    fn random_magnitudes_stay_within_bound() {
        let mut lattice = lattice(64);
        init_random(&mut lattice, 3.0, 7, Placement::Overwrite);
        for node in lattice.as_slice() {
            assert!(node.psi.norm() <= 3.0 + 1e-12);
        }
    }

    #[test]
    fn three_zone_source_is_silent_outside_its_window() {
        let source = three_zone_source(0, [4.0, 8.0], [1.0, 2.0, 3.0], None, 1.0, 2.0);
        assert_eq!(source.sample(0.5, (0, 0, 0), 0), (0.0, 0.0));
        assert_eq!(source.sample(2.5, (0, 0, 0), 0), (0.0, 0.0));
        assert_eq!(source.sample(1.5, (10, 0, 0), 0), (3.0, 0.0));
    }

    #[test]
    fn three_zone_source_selects_amplitude_by_zone() {
        let source = three_zone_source(0, [4.0, 8.0], [1.0, 2.0, 3.0], None, 0.0, 10.0);
        assert_eq!(source.sample(1.0, (1, 0, 0), 0).0, 1.0);
        assert_eq!(source.sample(1.0, (5, 0, 0), 0).0, 2.0);
        assert_eq!(source.sample(1.0, (9, 0, 0), 0).0, 3.0);
    }
}
