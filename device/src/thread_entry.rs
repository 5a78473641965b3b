//! Per-thread cache of expensive-to-create handles.
//!
//! Each OS thread lazily gets one [`ThreadEntry`] per backend instance,
//! holding its workspace pool and, under the `cuda` feature, a cached
//! cuBLAS handle. Entries are never shared across threads, so nothing in
//! here locks; they are dropped (releasing pooled blocks) at thread
//! teardown.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::AccelDriver;
use crate::pool::WorkspacePool;

pub struct ThreadEntry {
    pub(crate) pool: WorkspacePool,
    #[cfg(feature = "cuda")]
    blas: Option<cudarc::cublas::CudaBlas>,
}

impl ThreadEntry {
    fn new(driver: Arc<dyn AccelDriver>) -> Self {
        Self {
            pool: WorkspacePool::new(driver),
            #[cfg(feature = "cuda")]
            blas: None,
        }
    }
}

#[cfg(feature = "cuda")]
impl ThreadEntry {
    /// The thread's cuBLAS handle, created on first use against `stream`.
    pub fn blas(
        &mut self,
        stream: &Arc<cudarc::driver::CudaStream>,
    ) -> crate::error::Result<&cudarc::cublas::CudaBlas> {
        use snafu::ResultExt;

        if self.blas.is_none() {
            let handle = cudarc::cublas::CudaBlas::new(Arc::clone(stream)).context(crate::error::CublasSnafu)?;
            self.blas = Some(handle);
        }
        Ok(self.blas.as_ref().expect("just initialized"))
    }
}

thread_local! {
    // Keyed by backend instance id. A process has one backend instance, so
    // this is one entry per thread; the key only matters when independent
    // instances coexist (tests).
    static ENTRIES: RefCell<HashMap<u64, ThreadEntry>> = RefCell::new(HashMap::new());
}

/// Run `f` with the calling thread's entry for the backend `api_id`,
/// creating it on first use.
pub(crate) fn with_entry<R>(api_id: u64, driver: &Arc<dyn AccelDriver>, f: impl FnOnce(&mut ThreadEntry) -> R) -> R {
    ENTRIES.with(|cell| {
        let mut entries = cell.borrow_mut();
        let entry = entries.entry(api_id).or_insert_with(|| ThreadEntry::new(Arc::clone(driver)));
        f(entry)
    })
}
