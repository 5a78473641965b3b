//! Per-device free-list pool for scratch allocations.
//!
//! Workspace requests are short-lived and repeat the same handful of sizes,
//! so released blocks are kept in per-(device, size) free lists and handed
//! back on the next same-size request instead of going through the driver
//! heap again. After warm-up a steady-state alloc/free cycle costs no
//! driver calls.
//!
//! The pool has no interior locking: it lives in the thread-local entry
//! (one pool per thread) and is never shared.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::driver::AccelDriver;
use crate::error::fatal;

/// Default cap on cached free blocks per (device, size) class.
const DEFAULT_FREE_CAP: usize = 32;

fn free_cap_from_env() -> usize {
    std::env::var("ZARYA_WORKSPACE_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_FREE_CAP)
}

pub struct WorkspacePool {
    driver: Arc<dyn AccelDriver>,
    /// Released blocks, keyed by (device ordinal, exact byte size).
    free: HashMap<(i32, usize), SmallVec<[NonNull<u8>; 4]>>,
    /// Checked-out blocks: address -> (device, size), so `free` can restage
    /// a block without the caller repeating the size.
    live: HashMap<usize, (i32, usize)>,
    free_cap: usize,
}

impl WorkspacePool {
    pub fn new(driver: Arc<dyn AccelDriver>) -> Self {
        Self::with_free_cap(driver, free_cap_from_env())
    }

    pub fn with_free_cap(driver: Arc<dyn AccelDriver>, free_cap: usize) -> Self {
        Self { driver, free: HashMap::new(), live: HashMap::new(), free_cap }
    }

    /// Allocate `nbytes` of scratch space on `device`.
    ///
    /// The caller has already made `device` current. Failure of the
    /// underlying driver allocation is fatal: scratch space is assumed
    /// obtainable within configured limits, and this layer has no fallback.
    pub fn alloc(&mut self, device: i32, nbytes: usize) -> NonNull<u8> {
        if let Some(list) = self.free.get_mut(&(device, nbytes))
            && let Some(ptr) = list.pop()
        {
            trace!(device, nbytes, "workspace pool hit");
            self.live.insert(ptr.as_ptr() as usize, (device, nbytes));
            return ptr;
        }

        let ptr = match self.driver.mem_alloc(nbytes) {
            Ok(ptr) => ptr,
            Err(err) => fatal!("workspace allocation of {nbytes} bytes on device {device} failed: {err}"),
        };
        debug!(device, nbytes, "workspace pool miss, allocated from driver heap");
        self.live.insert(ptr.as_ptr() as usize, (device, nbytes));
        ptr
    }

    /// Return a block obtained from [`Self::alloc`] to the pool.
    ///
    /// Blocks beyond the per-size cap are released to the driver instead of
    /// being cached.
    pub fn free(&mut self, device: i32, ptr: NonNull<u8>) {
        let Some((_, nbytes)) = self.live.remove(&(ptr.as_ptr() as usize)) else {
            fatal!("freeing workspace pointer {:p} this pool did not allocate", ptr.as_ptr());
        };

        let list = self.free.entry((device, nbytes)).or_default();
        if list.len() < self.free_cap {
            list.push(ptr);
        } else {
            trace!(device, nbytes, "workspace free list full, releasing block to driver");
            if let Err(err) = self.driver.mem_free(ptr) {
                fatal!("releasing workspace block failed: {err}");
            }
        }
    }

    /// Number of blocks currently cached across all size classes.
    pub fn cached_blocks(&self) -> usize {
        self.free.values().map(|list| list.len()).sum()
    }
}

impl Drop for WorkspacePool {
    fn drop(&mut self) {
        // Thread teardown. Best effort: the process (or the device context)
        // may already be going away, so failures only warn.
        for ((device, nbytes), list) in self.free.drain() {
            if self.driver.set_device(device).is_err() {
                continue;
            }
            for ptr in list {
                if let Err(err) = self.driver.mem_free(ptr) {
                    warn!(device, nbytes, %err, "leaking cached workspace block at teardown");
                }
            }
        }
    }
}

impl std::fmt::Debug for WorkspacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspacePool")
            .field("cached_blocks", &self.cached_blocks())
            .field("live", &self.live.len())
            .field("free_cap", &self.free_cap)
            .finish()
    }
}
