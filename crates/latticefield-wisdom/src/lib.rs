//! Process-wide FFTW wisdom cache (spec.md §4.7).
//!
//! Lifecycle: [`WisdomStore::init`] loads `global_wisdom.dat` from a
//! directory; [`WisdomStore::plan`] imports a size-keyed wisdom file if one
//! exists, builds the plan (reusing any imported wisdom), and writes the
//! learned wisdom back the first time a size is seen; [`WisdomStore::shutdown`]
//! exports the accumulated global wisdom and releases FFTW's library-wide
//! planner state.
//!
//! FFTW's planner is process-wide shared mutable state and plan construction
//! is not thread-safe in the underlying library, so every plan build and
//! every wisdom export/import is serialized through one mutex (spec.md §5).

use fftw::plan::{C2CPlan, C2CPlan64};
use fftw::types::{c64, Flag, Sign};
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum WisdomError {
    #[error("failed to create wisdom directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("plan construction failed: {0}")]
    PlanFailed(String),

    #[error("wisdom file path is not representable as a C string: {0}")]
    InvalidPath(String),

    #[error("FFTW rejected the wisdom file at {0}")]
    ImportRejected(PathBuf),

    #[error("FFTW failed to export wisdom to {0}")]
    ExportFailed(PathBuf),
}

pub type WisdomResult<T> = Result<T, WisdomError>;

fn path_to_cstring(path: &Path) -> WisdomResult<CString> {
    CString::new(path.as_os_str().to_string_lossy().into_owned())
        .map_err(|e| WisdomError::InvalidPath(e.to_string()))
}

/// Import a wisdom file if it exists; I/O/parse failures are non-fatal
/// (spec.md §7): callers log a warning and fall back to fresh planning.
fn import_wisdom_file(path: &Path) -> WisdomResult<()> {
    let cpath = path_to_cstring(path)?;
    let ok = unsafe { fftw_sys::fftw_import_wisdom_from_filename(cpath.as_ptr()) };
    if ok == 0 {
        return Err(WisdomError::ImportRejected(path.to_path_buf()));
    }
    Ok(())
}

fn export_wisdom_file(path: &Path) -> WisdomResult<()> {
    let cpath = path_to_cstring(path)?;
    let ok = unsafe { fftw_sys::fftw_export_wisdom_to_filename(cpath.as_ptr()) };
    if ok == 0 {
        return Err(WisdomError::ExportFailed(path.to_path_buf()));
    }
    Ok(())
}

/// Key format `fft_<dim>d_<Nx>x<Ny>x...` (spec.md §6).
pub fn plan_key(dims: &[usize]) -> String {
    let sizes = dims
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x");
    format!("fft_{}d_{}", dims.len(), sizes)
}

/// Process-wide FFTW wisdom cache rooted at a directory on disk.
pub struct WisdomStore {
    dir: PathBuf,
    build_lock: Mutex<()>,
}

impl WisdomStore {
    /// Create `dir` if missing and import `dir/global_wisdom.dat` if present.
    pub fn init(dir: impl AsRef<Path>) -> WisdomResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| WisdomError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let store = Self {
            dir,
            build_lock: Mutex::new(()),
        };

        let global = store.dir.join("global_wisdom.dat");
        if global.exists() {
            if let Err(e) = import_wisdom_file(&global) {
                tracing::warn!(error = %e, path = ?global, "failed to import global wisdom, continuing with fresh planning");
            }
        }
        Ok(store)
    }

    /// Build a forward complex-to-complex plan for `dims`, consulting and
    /// updating the per-size wisdom file.
    pub fn plan(&self, dims: &[usize], flag: Flag) -> WisdomResult<C2CPlan64> {
        let _guard = self.build_lock.lock().unwrap();
        let key = plan_key(dims);
        let path = self.dir.join(format!("{key}.dat"));
        let existed = path.exists();

        if existed {
            if let Err(e) = import_wisdom_file(&path) {
                tracing::warn!(error = %e, key = %key, "failed to import per-size wisdom, continuing with fresh planning");
            }
        }

        let n: usize = dims.iter().product();
        let mut a = vec![c64::new(0.0, 0.0); n];
        let mut b = vec![c64::new(0.0, 0.0); n];
        let plan = C2CPlan64::new(dims, &mut a, &mut b, Sign::Forward, flag)
            .map_err(|e| WisdomError::PlanFailed(e.to_string()))?;

        if !existed {
            if let Err(e) = export_wisdom_file(&path) {
                tracing::warn!(error = %e, key = %key, "failed to persist per-size wisdom");
            }
        }

        tracing::debug!(key = %key, "FFTW plan ready");
        Ok(plan)
    }

    pub fn plan_1d(&self, n: usize) -> WisdomResult<C2CPlan64> {
        self.plan(&[n], Flag::MEASURE)
    }

    pub fn plan_2d(&self, nx: usize, ny: usize) -> WisdomResult<C2CPlan64> {
        self.plan(&[nx, ny], Flag::MEASURE)
    }

    pub fn plan_3d(&self, nx: usize, ny: usize, nz: usize) -> WisdomResult<C2CPlan64> {
        self.plan(&[nx, ny, nz], Flag::MEASURE)
    }

    /// Export accumulated global wisdom and release library-wide FFT resources.
    ///
    /// Callers must drop every plan obtained from this store before calling
    /// `shutdown`: FFTW's cleanup call invalidates all outstanding plan
    /// handles process-wide.
    pub fn shutdown(self) -> WisdomResult<()> {
        let _guard = self.build_lock.lock().unwrap();
        let global = self.dir.join("global_wisdom.dat");
        export_wisdom_file(&global)?;
        unsafe {
            fftw_sys::fftw_cleanup();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_missing_directory() {
        let base = tempdir().unwrap();
        let dir = base.path().join("wisdom");
        assert!(!dir.exists());
        WisdomStore::init(&dir).unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn plan_writes_a_size_keyed_wisdom_file_once() {
        let base = tempdir().unwrap();
        let store = WisdomStore::init(base.path()).unwrap();
        let _plan = store.plan_2d(8, 8).unwrap();
        let key_file = base.path().join(format!("{}.dat", plan_key(&[8, 8])));
        assert!(key_file.exists());
    }

    #[test]
    fn second_init_and_plan_does_not_error() {
        let base = tempdir().unwrap();
        {
            let store = WisdomStore::init(base.path()).unwrap();
            let plan = store.plan_2d(4, 4).unwrap();
            drop(plan); // plans must be dropped before shutdown() releases FFTW's planner state
            store.shutdown().unwrap();
        }
        let store = WisdomStore::init(base.path()).unwrap();
        let _plan = store.plan_2d(4, 4).unwrap();
    }
}
