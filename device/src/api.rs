//! Accelerator backend facade.
//!
//! [`AccelDeviceApi`] combines the workspace pool, pinned memory
//! management, stream/event management, and the copy engine behind the
//! [`DeviceApi`] surface the rest of the runtime consumes. Every
//! allocation and copy entry point is delegate-first: when an external
//! tensor runtime is registered and available, its allocator and stream
//! selection are authoritative and the driver heap is not touched.
//!
//! Driver failures on paths not classified as soft are fatal; see
//! `error.rs` for the policy.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, trace};

use zarya_core::dispatch::{DispatchCtx, DispatchTable, HostBlock, TensorRuntime};
use zarya_core::{Device, StreamHandle};

use crate::copy;
use crate::driver::{AccelDriver, DriverAttr, PointerKind};
use crate::error::{ErrorClass, expect_driver, fatal};
use crate::thread_entry;

/// Alignment the driver heap guarantees for every allocation.
pub const DRIVER_ALLOC_ALIGNMENT: usize = 256;

/// Device attributes a caller can query through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// Whether the device exists. The only attribute whose driver-level
    /// failure is not an error: a failed probe means "no".
    Exist,
    MaxThreadsPerBlock,
    WarpSize,
    MaxSharedMemoryPerBlock,
    /// Compute capability, formatted "major.minor".
    ComputeVersion,
    DeviceName,
    MaxClockRate,
    MultiProcessorCount,
    /// Per-dimension thread-block limits, formatted as a JSON-style
    /// 3-element array string.
    MaxThreadDimensions,
}

/// Attribute query result. The heterogeneous shape (integers for most
/// kinds, formatted strings for compute capability, device name, and the
/// dimension triple) is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Int(i64),
    Str(String),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Int(_) => None,
            AttrValue::Str(s) => Some(s),
        }
    }
}

/// Public surface of one accelerator backend.
///
/// Registered in the backend registry so a generic dispatcher can retrieve
/// the singleton by name. Methods taking raw pointers are `unsafe`: the
/// pointer contracts are the caller's, this layer only routes.
///
/// Unless documented otherwise, driver failure inside any method is fatal
/// (logged, then panic) rather than returned; see the error-handling
/// policy in `error.rs`.
pub trait DeviceApi: Send + Sync {
    /// Whether at least one device of this backend kind is present.
    /// Probed once at construction and only ever downgraded afterwards.
    fn is_available(&self) -> bool;

    /// Make `device` current for the calling thread.
    fn set_device(&self, device: Device);

    fn attribute(&self, device: Device, kind: AttrKind) -> AttrValue;

    /// Allocate `nbytes` of device memory with the given alignment.
    ///
    /// Delegates to the external runtime's allocator when one is active so
    /// a single arena serves both sides; otherwise allocates from the
    /// driver heap, in which case `alignment` must divide
    /// [`DRIVER_ALLOC_ALIGNMENT`] (fatal misuse otherwise).
    fn alloc_data_space(&self, device: Device, nbytes: usize, alignment: usize) -> NonNull<u8>;

    /// Free memory obtained from [`Self::alloc_data_space`].
    ///
    /// The block is returned to whichever allocator is active *now*; a
    /// caller must not let the external runtime's registration state change
    /// between a block's alloc and free (mixing sources is undefined).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_data_space` on this backend and not be
    /// freed twice.
    unsafe fn free_data_space(&self, device: Device, ptr: NonNull<u8>);

    /// Copy on the current stream (the external runtime's choice when one
    /// is active, the default stream otherwise).
    ///
    /// # Safety
    ///
    /// See [`Self::copy_data_from_to_on`].
    unsafe fn copy_data_from_to(
        &self,
        from: *const u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
    );

    /// Copy on an explicit stream. A device-to-host copy on the default
    /// stream blocks until complete before returning; every other routing
    /// returns once enqueued.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid for offset + `nbytes` in their device's
    /// address space and stay valid until the stream drains.
    unsafe fn copy_data_from_to_on(
        &self,
        from: *const u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
        stream: StreamHandle,
    );

    /// As [`Self::copy_data_from_to`], additionally recording the host
    /// side of the transfer with the external runtime so its caching host
    /// allocator does not recycle the block before the asynchronous use
    /// completes. Must be used for every copy touching runtime-managed
    /// pinned memory; a no-op when no runtime is active.
    ///
    /// # Safety
    ///
    /// See [`Self::copy_data_from_to_on`].
    unsafe fn recorded_copy_data_from_to(
        &self,
        from: *mut u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
        ctx: DispatchCtx,
    );

    fn create_stream(&self, device: Device) -> StreamHandle;

    fn free_stream(&self, device: Device, stream: StreamHandle);

    /// Block the calling thread until `stream` has drained.
    fn sync_stream(&self, device: Device, stream: StreamHandle);

    /// Make work enqueued on `dst` after this call start only once
    /// everything enqueued on `src` before this call has completed.
    /// Implemented with an event edge; the calling thread does not block.
    fn sync_stream_from_to(&self, device: Device, src: StreamHandle, dst: StreamHandle);

    /// Accepted and ignored: stream selection belongs to the external
    /// runtime when one is present.
    fn set_stream(&self, device: Device, stream: StreamHandle) {
        let _ = (device, stream);
    }

    /// The stream considered active for the calling thread.
    fn current_stream(&self) -> StreamHandle;

    /// Register existing host memory as page-locked so it can feed
    /// asynchronous transfers without staging. Null pointers and zero
    /// sizes are rejected by returning `false`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `nbytes` and stay allocated until unpinned.
    unsafe fn pin_data(&self, ptr: *mut u8, nbytes: usize) -> bool;

    /// Reverse of [`Self::pin_data`]. Null is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been successfully pinned.
    unsafe fn unpin_data(&self, ptr: *mut u8);

    /// Whether `ptr` is page-locked host memory. Never errors: ambiguous
    /// driver answers resolve to `false`, and a dead context downgrades
    /// backend availability.
    fn is_pinned(&self, ptr: *const u8) -> bool;

    /// Allocate pinned host memory from the external runtime's caching
    /// host allocator. Zero size returns `None`; calling without an active
    /// runtime is fatal, since pinned churn without a cache must be an
    /// explicit opt-in.
    fn alloc_pinned_data_space(&self, nbytes: usize) -> Option<HostBlock>;

    /// Release a block from [`Self::alloc_pinned_data_space`] via its
    /// deleter token.
    fn free_pinned_data_space(&self, deleter: DispatchCtx);

    /// Allocate short-lived scratch memory: the external runtime's
    /// allocator when active, the calling thread's workspace pool
    /// otherwise.
    fn alloc_workspace(&self, device: Device, nbytes: usize) -> NonNull<u8>;

    /// Return scratch memory from [`Self::alloc_workspace`]. Same source-
    /// mixing caveat as [`Self::free_data_space`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_workspace` on this backend, on this
    /// thread when pool-backed, and not be freed twice.
    unsafe fn free_workspace(&self, device: Device, ptr: NonNull<u8>);
}

static NEXT_API_ID: AtomicU64 = AtomicU64::new(0);

/// The accelerator backend: [`DeviceApi`] over a raw driver plus a
/// dispatch table.
pub struct AccelDeviceApi {
    id: u64,
    driver: Arc<dyn AccelDriver>,
    dispatch: Arc<DispatchTable>,
    available: AtomicBool,
}

impl AccelDeviceApi {
    /// Build against the process-wide dispatch table.
    pub fn new(driver: Arc<dyn AccelDriver>) -> Self {
        Self::with_dispatch(driver, DispatchTable::global())
    }

    /// Build against an explicit dispatch table (tests use this for
    /// isolated registration state).
    pub fn with_dispatch(driver: Arc<dyn AccelDriver>, dispatch: Arc<DispatchTable>) -> Self {
        let available = match driver.device_count() {
            Ok(count) => count > 0,
            Err(err) => {
                debug!(%err, "device count probe failed, backend unavailable");
                false
            }
        };
        Self {
            id: NEXT_API_ID.fetch_add(1, Ordering::Relaxed),
            driver,
            dispatch,
            available: AtomicBool::new(available),
        }
    }

    pub(crate) fn instance_id(&self) -> u64 {
        self.id
    }

    pub(crate) fn driver(&self) -> &Arc<dyn AccelDriver> {
        &self.driver
    }

    /// The capability probe run at the top of every entry point.
    fn runtime(&self) -> Option<Arc<dyn TensorRuntime>> {
        self.dispatch.active()
    }

    /// Re-assert the current device. Nothing assumes a previous call left
    /// the right device selected.
    fn assert_device(&self, device: Device) {
        if !device.is_accel() {
            fatal!("expected an accelerator device, got {device}");
        }
        expect_driver(self.driver.set_device(device.index));
    }

    fn int_attr(&self, device: Device, attr: DriverAttr) -> i64 {
        i64::from(expect_driver(self.driver.attribute(device.index, attr)))
    }

    /// Scoped workspace allocation; the block returns to the active
    /// allocator when the guard drops.
    pub fn workspace(&self, device: Device, nbytes: usize) -> WorkspaceGuard<'_> {
        let ptr = self.alloc_workspace(device, nbytes);
        WorkspaceGuard { api: self, device, ptr }
    }
}

impl DeviceApi for AccelDeviceApi {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn set_device(&self, device: Device) {
        self.assert_device(device);
    }

    fn attribute(&self, device: Device, kind: AttrKind) -> AttrValue {
        match kind {
            AttrKind::Exist => {
                let exists = self.driver.attribute(device.index, DriverAttr::MaxThreadsPerBlock).is_ok();
                AttrValue::Int(i64::from(exists))
            }
            AttrKind::MaxThreadsPerBlock => AttrValue::Int(self.int_attr(device, DriverAttr::MaxThreadsPerBlock)),
            AttrKind::WarpSize => AttrValue::Int(self.int_attr(device, DriverAttr::WarpSize)),
            AttrKind::MaxSharedMemoryPerBlock => {
                AttrValue::Int(self.int_attr(device, DriverAttr::MaxSharedMemoryPerBlock))
            }
            AttrKind::ComputeVersion => {
                let major = self.int_attr(device, DriverAttr::ComputeCapabilityMajor);
                let minor = self.int_attr(device, DriverAttr::ComputeCapabilityMinor);
                AttrValue::Str(format!("{major}.{minor}"))
            }
            AttrKind::DeviceName => AttrValue::Str(expect_driver(self.driver.device_name(device.index))),
            AttrKind::MaxClockRate => AttrValue::Int(self.int_attr(device, DriverAttr::ClockRate)),
            AttrKind::MultiProcessorCount => AttrValue::Int(self.int_attr(device, DriverAttr::MultiProcessorCount)),
            AttrKind::MaxThreadDimensions => {
                let x = self.int_attr(device, DriverAttr::MaxBlockDimX);
                let y = self.int_attr(device, DriverAttr::MaxBlockDimY);
                let z = self.int_attr(device, DriverAttr::MaxBlockDimZ);
                // JSON string so one return shape carries all three values.
                AttrValue::Str(format!("[{x}, {y}, {z}]"))
            }
        }
    }

    fn alloc_data_space(&self, device: Device, nbytes: usize, alignment: usize) -> NonNull<u8> {
        self.assert_device(device);
        if let Some(rt) = self.runtime() {
            trace!(nbytes, "data space allocation delegated to tensor runtime");
            return rt.alloc_workspace(nbytes, self.current_stream());
        }
        if alignment == 0 || DRIVER_ALLOC_ALIGNMENT % alignment != 0 {
            fatal!("driver heap is aligned at {DRIVER_ALLOC_ALIGNMENT} bytes, cannot honor alignment {alignment}");
        }
        expect_driver(self.driver.mem_alloc(nbytes))
    }

    unsafe fn free_data_space(&self, device: Device, ptr: NonNull<u8>) {
        self.assert_device(device);
        if let Some(rt) = self.runtime() {
            return rt.free_workspace(ptr);
        }
        expect_driver(self.driver.mem_free(ptr));
    }

    unsafe fn copy_data_from_to(
        &self,
        from: *const u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
    ) {
        let stream = self.current_stream();
        unsafe {
            self.copy_data_from_to_on(from, from_offset, to, to_offset, nbytes, src, dst, stream);
        }
    }

    unsafe fn copy_data_from_to_on(
        &self,
        from: *const u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
        stream: StreamHandle,
    ) {
        unsafe {
            copy::copy_data(&*self.driver, from, from_offset, to, to_offset, nbytes, src, dst, stream);
        }
    }

    unsafe fn recorded_copy_data_from_to(
        &self,
        from: *mut u8,
        from_offset: usize,
        to: *mut u8,
        to_offset: usize,
        nbytes: usize,
        src: Device,
        dst: Device,
        ctx: DispatchCtx,
    ) {
        let stream = self.current_stream();
        unsafe {
            copy::copy_data(&*self.driver, from, from_offset, to, to_offset, nbytes, src, dst, stream);
        }
        if let Some(rt) = self.runtime() {
            // Record against the base pointer (what the runtime's cache
            // tracks), not the offset one.
            let (ptr, index) = if dst.is_host() { (to, src.index) } else { (from, dst.index) };
            rt.record_host_alloc(ptr, ctx, stream, index);
            trace!(device = index, "recorded host allocation use with tensor runtime");
        }
    }

    fn create_stream(&self, device: Device) -> StreamHandle {
        self.assert_device(device);
        expect_driver(self.driver.stream_create())
    }

    fn free_stream(&self, device: Device, stream: StreamHandle) {
        self.assert_device(device);
        expect_driver(self.driver.stream_destroy(stream));
    }

    fn sync_stream(&self, device: Device, stream: StreamHandle) {
        self.assert_device(device);
        expect_driver(self.driver.stream_synchronize(stream));
    }

    fn sync_stream_from_to(&self, device: Device, src: StreamHandle, dst: StreamHandle) {
        self.assert_device(device);
        let event = expect_driver(self.driver.event_create());
        expect_driver(self.driver.event_record(event, src));
        expect_driver(self.driver.stream_wait_event(dst, event));
        expect_driver(self.driver.event_destroy(event));
    }

    fn current_stream(&self) -> StreamHandle {
        match self.runtime() {
            Some(rt) => rt.current_stream(),
            None => StreamHandle::DEFAULT,
        }
    }

    unsafe fn pin_data(&self, ptr: *mut u8, nbytes: usize) -> bool {
        // Degenerate pins are handled inconsistently by drivers; reject
        // them here instead of attempting.
        let Some(ptr) = NonNull::new(ptr) else { return false };
        if nbytes == 0 {
            return false;
        }
        if let Some(rt) = self.runtime() {
            // Keep the runtime's own pinned pool small so in-place pinning
            // has room.
            rt.empty_host_cache();
        }
        expect_driver(unsafe { self.driver.host_register(ptr, nbytes) });
        true
    }

    unsafe fn unpin_data(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else { return };
        expect_driver(unsafe { self.driver.host_unregister(ptr) });
    }

    fn is_pinned(&self, ptr: *const u8) -> bool {
        // A dead context can't hold pinned memory, and re-asking the
        // driver would fail the same way every time.
        if !self.is_available() {
            return false;
        }
        match self.driver.pointer_kind(ptr) {
            Ok(kind) => kind == PointerKind::Host,
            Err(err) => match err.class() {
                // A plain host pointer on drivers that answer the query
                // with an error.
                ErrorClass::InvalidValue => false,
                ErrorClass::ContextGone => {
                    // CPU-only environment or forked subprocess. Stop
                    // asking; every later call short-circuits to false.
                    debug!(%err, "device context gone, downgrading backend availability");
                    self.available.store(false, Ordering::Release);
                    false
                }
                _ => fatal!("error while determining memory status: {err}"),
            },
        }
    }

    fn alloc_pinned_data_space(&self, nbytes: usize) -> Option<HostBlock> {
        if nbytes == 0 {
            return None;
        }
        let Some(rt) = self.runtime() else {
            fatal!("pinned allocation requires a tensor runtime with a caching host allocator");
        };
        Some(rt.alloc_host_workspace(nbytes))
    }

    fn free_pinned_data_space(&self, deleter: DispatchCtx) {
        let Some(rt) = self.runtime() else {
            fatal!("pinned free requires a tensor runtime with a caching host allocator");
        };
        rt.free_host_workspace(deleter);
    }

    fn alloc_workspace(&self, device: Device, nbytes: usize) -> NonNull<u8> {
        self.assert_device(device);
        if let Some(rt) = self.runtime() {
            return rt.alloc_workspace(nbytes, self.current_stream());
        }
        thread_entry::with_entry(self.id, &self.driver, |entry| entry.pool.alloc(device.index, nbytes))
    }

    unsafe fn free_workspace(&self, device: Device, ptr: NonNull<u8>) {
        self.assert_device(device);
        if let Some(rt) = self.runtime() {
            return rt.free_workspace(ptr);
        }
        thread_entry::with_entry(self.id, &self.driver, |entry| entry.pool.free(device.index, ptr));
    }
}

impl std::fmt::Debug for AccelDeviceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelDeviceApi")
            .field("id", &self.id)
            .field("available", &self.is_available())
            .finish()
    }
}

/// RAII workspace allocation obtained from [`AccelDeviceApi::workspace`].
#[derive(Debug)]
pub struct WorkspaceGuard<'a> {
    api: &'a AccelDeviceApi,
    device: Device,
    ptr: NonNull<u8>,
}

impl WorkspaceGuard<'_> {
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.api.free_workspace(self.device, self.ptr) };
    }
}
