//! Flat row-major lattice storage and index/coordinate conversion.
//!
//! The lattice is the leaf dependency of the whole workspace: every other
//! crate (neighbor cache, integrators, diagnostics, initialization) builds on
//! the [`Shape`] and node types defined here.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Spatial dimensionality of a lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dim {
    One,
    Two,
    Three,
}

impl Dim {
    pub fn as_usize(self) -> usize {
        match self {
            Dim::One => 1,
            Dim::Two => 2,
            Dim::Three => 3,
        }
    }

    pub fn sqrt(self) -> f64 {
        (self.as_usize() as f64).sqrt()
    }
}

/// Errors raised while constructing or indexing a lattice shape.
#[derive(Debug, thiserror::Error)]
pub enum LatticeShapeError {
    #[error("axis size must be in 1..={max}, got {got}")]
    AxisOutOfRange { got: usize, max: usize },

    #[error("total site count {total} exceeds the maximum of {max}")]
    TooManySites { total: usize, max: usize },
}

pub type LatticeShapeResult<T> = Result<T, LatticeShapeError>;

/// Upper bound on a single axis for 2D lattices (spec.md invariant, §4.8).
pub const MAX_AXIS_2D: usize = 4096;
/// Upper bound on a single axis for 3D lattices (spec.md invariant, §4.8).
pub const MAX_AXIS_3D: usize = 512;
/// Upper bound on total site count (spec.md invariant, §4.8).
pub const MAX_TOTAL_SITES: usize = 100_000_000;

/// Dimensions and dimensionality of a toroidal lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dim: Dim,
}

impl Shape {
    /// Construct and validate a lattice shape per spec.md §4.8.
    pub fn new(nx: usize, ny: usize, nz: usize, dim: Dim) -> LatticeShapeResult<Self> {
        let axis_max = match dim {
            Dim::One => MAX_AXIS_2D,
            Dim::Two => MAX_AXIS_2D,
            Dim::Three => MAX_AXIS_3D,
        };
        let (nx, ny, nz) = match dim {
            Dim::One => (nx, 1, 1),
            Dim::Two => (nx, ny, 1),
            Dim::Three => (nx, ny, nz),
        };
        for axis in [nx, ny, nz] {
            if axis == 0 || axis > axis_max {
                return Err(LatticeShapeError::AxisOutOfRange {
                    got: axis,
                    max: axis_max,
                });
            }
        }
        let total = nx * ny * nz;
        if total > MAX_TOTAL_SITES {
            return Err(LatticeShapeError::TooManySites {
                total,
                max: MAX_TOTAL_SITES,
            });
        }
        Ok(Self { nx, ny, nz, dim })
    }

    #[inline]
    pub fn site_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Convert (x, y, z) to a linear row-major index: i = (z*Ny + y)*Nx + x.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.nx && y < self.ny && z < self.nz, "coords out of range");
        (z * self.ny + y) * self.nx + x
    }

    /// Convert a linear index back to (x, y, z).
    #[inline]
    pub fn coords(&self, i: usize) -> (usize, usize, usize) {
        debug_assert!(i < self.site_count(), "index out of range");
        let x = i % self.nx;
        let y = (i / self.nx) % self.ny;
        let z = i / (self.nx * self.ny);
        (x, y, z)
    }

    /// Wrapped distance along one axis of size `n`.
    #[inline]
    pub fn wrapped_axis_distance(a: usize, b: usize, n: usize) -> usize {
        let d = a.abs_diff(b);
        d.min(n - d)
    }

    /// Periodic neighbor index along `axis` (0=x, 1=y, 2=z) with signed shift `delta`.
    #[inline]
    pub fn neighbor_index(&self, i: usize, axis: usize, delta: isize) -> usize {
        let (x, y, z) = self.coords(i);
        let mut coord = [x as isize, y as isize, z as isize];
        let n = [self.nx as isize, self.ny as isize, self.nz as isize];
        coord[axis] = ((coord[axis] + delta) % n[axis] + n[axis]) % n[axis];
        self.index(coord[0] as usize, coord[1] as usize, coord[2] as usize)
    }

    /// Euclidean wrapped distance between two sites.
    pub fn wrapped_distance(&self, i: usize, j: usize) -> f64 {
        let (xi, yi, zi) = self.coords(i);
        let (xj, yj, zj) = self.coords(j);
        let dx = Self::wrapped_axis_distance(xi, xj, self.nx) as f64;
        let dy = Self::wrapped_axis_distance(yi, yj, self.ny) as f64;
        let dz = Self::wrapped_axis_distance(zi, zj, self.nz) as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Per-site state for the IGSOA field family (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IgsoaNode {
    pub psi: Complex64,
    pub psi_dot: Complex64,
    pub phi: f64,
    pub phi_dot: f64,
    /// Cached |psi|^2.
    pub f: f64,
    /// Cached gradient magnitude of F.
    pub grad_f: f64,
    /// Cached arg(psi).
    pub theta: f64,
    /// Cached entropy-production rate.
    pub s_dot: f64,
    /// Causal radius, must be >= lattice spacing when positive.
    pub r_c: f64,
    /// Phi-Psi coupling.
    pub kappa: f64,
    /// Dissipation coefficient.
    pub gamma: f64,
}

impl IgsoaNode {
    pub fn vacuum(r_c: f64, kappa: f64, gamma: f64) -> Self {
        Self {
            psi: Complex64::new(0.0, 0.0),
            psi_dot: Complex64::new(0.0, 0.0),
            phi: 0.0,
            phi_dot: 0.0,
            f: 0.0,
            grad_f: 0.0,
            theta: 0.0,
            s_dot: 0.0,
            r_c,
            kappa,
            gamma,
        }
    }

    /// Recompute F, theta, S-dot from the stored psi/phi (§8 consistency invariant).
    pub fn refresh_derived(&mut self) {
        self.f = self.psi.norm_sqr();
        self.theta = self.psi.arg();
        self.s_dot = self.r_c * (self.phi - self.psi.re).powi(2);
    }
}

/// Per-site state for the SATP+Higgs field family (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SatpHiggsNode {
    pub phi: f64,
    pub phi_dot: f64,
    pub h: f64,
    pub h_dot: f64,
    /// Cached local energy density (refreshed by the integrator/diagnostics crate).
    pub energy_density: f64,
}

impl SatpHiggsNode {
    pub fn vacuum(h_vev: f64) -> Self {
        Self {
            phi: 0.0,
            phi_dot: 0.0,
            h: h_vev,
            h_dot: 0.0,
            energy_density: 0.0,
        }
    }
}

/// A time- and space-dependent driving term shared by the IGSOA and
/// SATP+Higgs integrators (spec.md §4.2 step 9, §4.3 source term S).
///
/// Returns `(signal_real, signal_imag)`; SATP+Higgs sources only use the
/// real component.
pub trait DrivingSource: Send + Sync {
    fn sample(&self, t: f64, coords: (usize, usize, usize), index: usize) -> (f64, f64);
}

/// Adapts a plain closure to [`DrivingSource`].
pub struct ClosureDrivingSource<F>(pub F)
where
    F: Fn(f64, (usize, usize, usize), usize) -> (f64, f64) + Send + Sync;

impl<F> DrivingSource for ClosureDrivingSource<F>
where
    F: Fn(f64, (usize, usize, usize), usize) -> (f64, f64) + Send + Sync,
{
    fn sample(&self, t: f64, coords: (usize, usize, usize), index: usize) -> (f64, f64) {
        (self.0)(t, coords, index)
    }
}

/// Owns a flat, row-major array of nodes over a [`Shape`].
#[derive(Debug, Clone)]
pub struct Lattice<N> {
    pub shape: Shape,
    nodes: Vec<N>,
}

impl<N: Clone> Lattice<N> {
    pub fn new(shape: Shape, fill: N) -> Self {
        let n = shape.site_count();
        Self {
            shape,
            nodes: vec![fill; n],
        }
    }

    pub fn from_nodes(shape: Shape, nodes: Vec<N>) -> Self {
        debug_assert_eq!(nodes.len(), shape.site_count());
        Self { shape, nodes }
    }

    #[inline]
    pub fn get(&self, i: usize) -> &N {
        &self.nodes[i]
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize) -> &mut N {
        &mut self.nodes[i]
    }

    #[inline]
    pub fn as_slice(&self) -> &[N] {
        &self.nodes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [N] {
        &mut self.nodes
    }

    pub fn site_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_coords_roundtrip() {
        let shape = Shape::new(8, 6, 4, Dim::Three).unwrap();
        for i in 0..shape.site_count() {
            let (x, y, z) = shape.coords(i);
            assert_eq!(shape.index(x, y, z), i);
        }
    }

    #[test]
    fn wrapped_axis_distance_is_symmetric_and_bounded() {
        let n = 10;
        for a in 0..n {
            for b in 0..n {
                let d = Shape::wrapped_axis_distance(a, b, n);
                assert_eq!(d, Shape::wrapped_axis_distance(b, a, n));
                assert!(d <= n / 2);
            }
        }
    }

    #[test]
    fn neighbor_index_wraps_for_any_signed_delta() {
        let shape = Shape::new(5, 1, 1, Dim::One).unwrap();
        assert_eq!(shape.neighbor_index(0, 0, -1), 4);
        assert_eq!(shape.neighbor_index(4, 0, 1), 0);
        assert_eq!(shape.neighbor_index(2, 0, -7), shape.neighbor_index(2, 0, -7 % 5));
    }

    #[test]
    fn rejects_oversized_axis() {
        assert!(Shape::new(MAX_AXIS_2D + 1, 1, 1, Dim::One).is_err());
        assert!(Shape::new(1, 1, MAX_AXIS_3D + 1, Dim::Three).is_err());
    }

    #[test]
    fn igsoa_node_refresh_derived_matches_definition() {
        let mut node = IgsoaNode::vacuum(1.0, 0.5, 0.1);
        node.psi = Complex64::new(3.0, 4.0);
        node.phi = 1.0;
        node.refresh_derived();
        assert!((node.f - 25.0).abs() < 1e-12);
        assert!((node.theta - (4.0f64).atan2(3.0)).abs() < 1e-12);
        assert!((node.s_dot - 1.0 * (1.0 - 3.0f64).powi(2)).abs() < 1e-12);
    }
}
