//! External tensor-runtime allocator contract.
//!
//! A host tensor runtime (the framework embedding zarya) may own a caching
//! device allocator and a pinned-host allocator of its own. When one is
//! registered here, the device substrate defers allocation, pinned-memory
//! bookkeeping, and stream selection to it so that a single memory pool
//! serves both sides. The runtime is assumed to be internally thread-safe
//! and is authoritative while registered: memory it hands out must be
//! returned to it, never to the raw driver.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::stream::StreamHandle;

/// Opaque token minted by the external runtime.
///
/// Used both for allocation contexts and for deleters; zarya never looks
/// inside, it only carries the token back to the runtime that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchCtx(*mut c_void);

unsafe impl Send for DispatchCtx {}
unsafe impl Sync for DispatchCtx {}

impl DispatchCtx {
    pub const NULL: Self = Self(std::ptr::null_mut());

    pub const fn from_raw(raw: *mut c_void) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for DispatchCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchCtx({:p})", self.0)
    }
}

/// A pinned host allocation owned by the external runtime.
///
/// `ctx` identifies the allocation to the runtime's cache; `deleter` is the
/// token to pass back through [`TensorRuntime::free_host_workspace`] when
/// the block is no longer needed.
#[derive(Debug)]
pub struct HostBlock {
    pub ptr: NonNull<u8>,
    pub ctx: DispatchCtx,
    pub deleter: DispatchCtx,
}

/// Capability interface of the external tensor runtime.
///
/// All allocation methods are infallible from zarya's point of view: the
/// runtime either satisfies the request or aborts by its own policy, the
/// same contract the raw driver path has.
pub trait TensorRuntime: Send + Sync {
    /// Whether the runtime is currently able to serve requests. Probed
    /// fresh on every device-substrate entry point; a runtime may come up
    /// after the substrate is constructed.
    fn is_available(&self) -> bool {
        true
    }

    /// Allocate device scratch memory tied to `stream`.
    fn alloc_workspace(&self, nbytes: usize, stream: StreamHandle) -> NonNull<u8>;

    /// Return memory obtained from [`Self::alloc_workspace`].
    fn free_workspace(&self, ptr: NonNull<u8>);

    /// Allocate pinned host memory from the runtime's caching host
    /// allocator.
    fn alloc_host_workspace(&self, nbytes: usize) -> HostBlock;

    /// Release a pinned host block via its deleter token.
    fn free_host_workspace(&self, deleter: DispatchCtx);

    /// Record that `ptr` (a pinned host allocation of this runtime) was
    /// used by an asynchronous operation on `stream` touching `device`.
    /// The runtime must not recycle the block until that use completes.
    fn record_host_alloc(&self, ptr: *mut u8, ctx: DispatchCtx, stream: StreamHandle, device: i32);

    /// The stream the runtime considers current for the calling thread.
    fn current_stream(&self) -> StreamHandle;

    /// Shrink the runtime's pinned-host cache. Called before zarya pins
    /// memory in place, to leave room for it.
    fn empty_host_cache(&self);
}

/// Registration slot for the external runtime.
///
/// Production code uses the process-wide [`DispatchTable::global`] table;
/// independent tables exist so tests can isolate registration state.
pub struct DispatchTable {
    slot: RwLock<Option<Arc<dyn TensorRuntime>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self { slot: RwLock::new(None) }
    }

    /// The process-wide table the device substrate consults by default.
    pub fn global() -> Arc<DispatchTable> {
        static GLOBAL: Lazy<Arc<DispatchTable>> = Lazy::new(|| Arc::new(DispatchTable::new()));
        Arc::clone(&GLOBAL)
    }

    pub fn register(&self, runtime: Arc<dyn TensorRuntime>) {
        *self.slot.write() = Some(runtime);
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    /// The registered runtime, if present and currently available.
    ///
    /// This is the capability probe every device-substrate entry point
    /// runs; the result must not be latched across calls.
    pub fn active(&self) -> Option<Arc<dyn TensorRuntime>> {
        let slot = self.slot.read();
        match slot.as_ref() {
            Some(runtime) if runtime.is_available() => Some(Arc::clone(runtime)),
            _ => None,
        }
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Register `runtime` in the process-wide table.
pub fn register_runtime(runtime: Arc<dyn TensorRuntime>) {
    DispatchTable::global().register(runtime);
}

/// The process-wide runtime, if one is registered and available.
pub fn active_runtime() -> Option<Arc<dyn TensorRuntime>> {
    DispatchTable::global().active()
}
