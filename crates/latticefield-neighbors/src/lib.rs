//! Spatial hash, kernel cache, and neighbor-list cache used by the IGSOA
//! non-local coupling kernel (spec.md §4.4). Turns the naive O(N^2) pairwise
//! sweep into O(N * k_bar) by consulting a bucketed spatial index only at
//! build time; the hot `advance` loop never touches the spatial hash.

use latticefield_lattice::Shape;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum NeighborError {
    #[error("spatial hash build failed: {0}")]
    SpatialHashFailed(String),

    #[error("cache rebuild failed: {0}")]
    CacheRebuildFailed(String),

    #[error("neighbor cache not built; call build() before advance()")]
    CacheNotBuilt,
}

pub type NeighborResult<T> = Result<T, NeighborError>;

/// Exponential coupling kernel K(r, R_c) = exp(-r/R_c)/R_c for r <= R_c.
#[inline]
pub fn kernel(r: f64, r_c: f64) -> f64 {
    if r_c <= 0.0 || r > r_c {
        0.0
    } else {
        (-r / r_c).exp() / r_c
    }
}

const KERNEL_BINS: usize = 1024;

/// Uniformly-binned lookup table for [`kernel`], tiered by an exact-recompute
/// threshold near the origin where the kernel varies fastest (spec.md §3).
#[derive(Debug, Clone)]
pub struct KernelCache {
    r_c: f64,
    bin_size: f64,
    tier1_threshold: f64,
    table: Vec<f64>,
}

impl KernelCache {
    pub fn new(r_c: f64) -> Self {
        let bin_size = if r_c > 0.0 {
            (r_c / KERNEL_BINS as f64).max(f64::MIN_POSITIVE)
        } else {
            1.0
        };
        debug_assert!(KERNEL_BINS as f64 * bin_size >= r_c);
        let table = (0..KERNEL_BINS)
            .map(|b| kernel(b as f64 * bin_size, r_c))
            .collect();
        Self {
            r_c,
            bin_size,
            tier1_threshold: r_c / 4.0,
            table,
        }
    }

    pub fn r_c(&self) -> f64 {
        self.r_c
    }

    /// Evaluate K(r, R_c): exact recompute below the tier-1 threshold, table
    /// lookup otherwise.
    #[inline]
    pub fn eval(&self, r: f64) -> f64 {
        if self.r_c <= 0.0 || r > self.r_c {
            return 0.0;
        }
        if r < self.tier1_threshold {
            return kernel(r, self.r_c);
        }
        let bin = ((r / self.bin_size) as usize).min(KERNEL_BINS - 1);
        self.table[bin]
    }
}

/// Uniform-bucket spatial hash used only to construct a [`NeighborCache`].
pub struct SpatialHash {
    cell_size: usize,
    bucket_counts: (isize, isize, isize),
    buckets: HashMap<(isize, isize, isize), Vec<usize>>,
    shape: Shape,
}

impl SpatialHash {
    /// Build a spatial hash over `shape` with cell size `ceil(r_c)`.
    pub fn build(shape: Shape, r_c: f64) -> NeighborResult<Self> {
        if r_c <= 0.0 {
            return Err(NeighborError::SpatialHashFailed(
                "r_c must be positive to build a spatial hash".into(),
            ));
        }
        let cell_size = (r_c.ceil() as usize).max(1);
        let bucket_counts = (
            shape.nx.div_ceil(cell_size) as isize,
            shape.ny.div_ceil(cell_size) as isize,
            shape.nz.div_ceil(cell_size) as isize,
        );
        let mut buckets: HashMap<(isize, isize, isize), Vec<usize>> = HashMap::new();
        for i in 0..shape.site_count() {
            let (x, y, z) = shape.coords(i);
            let bucket = Self::bucket_of(x, y, z, cell_size);
            buckets.entry(bucket).or_default().push(i);
        }
        Ok(Self {
            cell_size,
            bucket_counts,
            buckets,
            shape,
        })
    }

    #[inline]
    fn bucket_of(x: usize, y: usize, z: usize, cell_size: usize) -> (isize, isize, isize) {
        (
            (x / cell_size) as isize,
            (y / cell_size) as isize,
            (z / cell_size) as isize,
        )
    }

    /// All sites in the (2r+1)^d bucket neighborhood of the bucket containing
    /// `site`, wrapped around the torus so buckets adjacent to axis 0 also
    /// see the buckets adjacent to the far edge. Cell size is `ceil(r_c)`, so
    /// a single ring (r=1) always covers every candidate within R_c;
    /// candidates are filtered by true wrapped distance by the caller.
    pub fn query_neighborhood(&self, site: usize) -> Vec<usize> {
        let (x, y, z) = self.shape.coords(site);
        let (bx, by, bz) = Self::bucket_of(x, y, z, self.cell_size);
        let (cx, cy, cz) = self.bucket_counts;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let key = (
                        (bx + dx).rem_euclid(cx),
                        (by + dy).rem_euclid(cy),
                        (bz + dz).rem_euclid(cz),
                    );
                    if let Some(sites) = self.buckets.get(&key) {
                        for &j in sites {
                            if seen.insert(j) {
                                out.push(j);
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// One entry in a site's neighbor list: the neighbor index, its coupling
/// weight, and the wrapped Euclidean distance used to derive it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborEntry {
    pub j: usize,
    pub w_ij: f64,
    pub d_ij: f64,
}

/// Per-site cache of {j, w_ij, d_ij} entries with |i-j wrapped distance| <= R_c.
///
/// Invalidated by any change to R_c or the lattice dimensions; `advance` must
/// check [`NeighborCache::is_built`] before consuming it (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct NeighborCache {
    shape: Shape,
    r_c: f64,
    lists: Vec<Vec<NeighborEntry>>,
    built: bool,
}

impl NeighborCache {
    pub fn new(shape: Shape, r_c: f64) -> Self {
        Self {
            shape,
            r_c,
            lists: vec![Vec::new(); shape.site_count()],
            built: false,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn r_c(&self) -> f64 {
        self.r_c
    }

    /// Mark the cache stale; must be called whenever R_c or the lattice
    /// dimensions change, ahead of the next `advance`.
    pub fn invalidate(&mut self) {
        self.built = false;
    }

    pub fn neighbors(&self, i: usize) -> NeighborResult<&[NeighborEntry]> {
        if !self.built {
            return Err(NeighborError::CacheNotBuilt);
        }
        Ok(&self.lists[i])
    }

    /// Rebuild protocol from spec.md §4.4: clear, insert every site into its
    /// bucket, then for every site query the bucket neighborhood, filter by
    /// true wrapped distance <= R_c, and compute weights via the kernel cache.
    pub fn build(&mut self, r_c: f64, kernel_cache: &KernelCache) -> NeighborResult<()> {
        self.r_c = r_c;
        for list in &mut self.lists {
            list.clear();
        }
        self.built = false;

        if r_c <= 0.0 || self.shape.site_count() <= 1 {
            // spec.md §4.2 edge case: R_c <= 0 or N = 1 means zero coupling.
            self.built = true;
            return Ok(());
        }

        let hash = SpatialHash::build(self.shape, r_c)?;
        for i in 0..self.shape.site_count() {
            let candidates = hash.query_neighborhood(i);
            let entry_list = &mut self.lists[i];
            for j in candidates {
                if j == i {
                    continue;
                }
                let d_ij = self.shape.wrapped_distance(i, j);
                if d_ij <= r_c {
                    let w_ij = kernel_cache.eval(d_ij);
                    entry_list.push(NeighborEntry { j, w_ij, d_ij });
                }
            }
        }
        self.built = true;
        tracing::debug!(
            sites = self.shape.site_count(),
            r_c,
            "neighbor cache rebuilt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticefield_lattice::Dim;

    #[test]
    fn kernel_is_zero_beyond_r_c() {
        assert_eq!(kernel(2.0, 1.0), 0.0);
        assert!(kernel(0.5, 1.0) > 0.0);
    }

    #[test]
    fn kernel_cache_matches_exact_kernel_closely() {
        let r_c = 3.0;
        let cache = KernelCache::new(r_c);
        for i in 0..50 {
            let r = i as f64 * 0.05;
            let exact = kernel(r, r_c);
            let cached = cache.eval(r);
            assert!((exact - cached).abs() < 1e-3, "r={r} exact={exact} cached={cached}");
        }
    }

    #[test]
    fn neighbor_cache_exact_pair_set_matches_bruteforce() {
        let shape = Shape::new(12, 1, 1, Dim::One).unwrap();
        let r_c = 2.5;
        let kernel_cache = KernelCache::new(r_c);
        let mut cache = NeighborCache::new(shape, r_c);
        cache.build(r_c, &kernel_cache).unwrap();

        for i in 0..shape.site_count() {
            let mut expected: Vec<usize> = (0..shape.site_count())
                .filter(|&j| j != i && shape.wrapped_distance(i, j) <= r_c)
                .collect();
            let mut got: Vec<usize> = cache.neighbors(i).unwrap().iter().map(|e| e.j).collect();
            expected.sort_unstable();
            got.sort_unstable();
            assert_eq!(expected, got, "mismatch at site {i}");
        }
    }

    #[test]
    fn r_c_non_positive_gives_empty_cache() {
        let shape = Shape::new(8, 1, 1, Dim::One).unwrap();
        let kernel_cache = KernelCache::new(0.0);
        let mut cache = NeighborCache::new(shape, 0.0);
        cache.build(0.0, &kernel_cache).unwrap();
        for i in 0..shape.site_count() {
            assert!(cache.neighbors(i).unwrap().is_empty());
        }
    }

    #[test]
    fn unbuilt_cache_is_rejected() {
        let shape = Shape::new(4, 1, 1, Dim::One).unwrap();
        let cache = NeighborCache::new(shape, 1.0);
        assert!(matches!(cache.neighbors(0), Err(NeighborError::CacheNotBuilt)));
    }
}
