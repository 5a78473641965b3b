//! Raw accelerator driver contract.
//!
//! [`AccelDriver`] captures the driver semantics the facade is built on:
//! explicit devices, streams, events, peer copies, host registration, and
//! attribute queries. Every method returns a [`Result`]; the facade layer
//! classifies failures into soft, availability-downgrading, and fatal per
//! its own policy, so implementations report faithfully and never abort.
//!
//! The production implementation is [`crate::cuda::CudaDriver`] (feature
//! `cuda`); tests run against an in-memory driver with the same contract.

use std::fmt;
use std::ptr::NonNull;

use zarya_core::StreamHandle;

use crate::error::Result;

/// A point-in-time marker on a stream.
///
/// Events exist only to build cross-stream happens-after edges; they own no
/// memory and are created and destroyed around a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) u64);

impl EventHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Transfer direction of a plain (non-peer) copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    DeviceToDevice,
    DeviceToHost,
    HostToDevice,
}

/// What kind of memory a pointer attribute query resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    /// Registered (page-locked) host memory.
    Host,
    /// Device memory.
    Device,
    /// Host memory the driver has no registration for.
    Unregistered,
}

/// Numeric per-device attributes exposed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAttr {
    MaxThreadsPerBlock,
    WarpSize,
    MaxSharedMemoryPerBlock,
    ComputeCapabilityMajor,
    ComputeCapabilityMinor,
    ClockRate,
    MultiProcessorCount,
    MaxBlockDimX,
    MaxBlockDimY,
    MaxBlockDimZ,
}

pub trait AccelDriver: Send + Sync + fmt::Debug {
    /// Number of devices of this backend kind. An error here means the
    /// driver itself is unusable (no driver, forked context); callers
    /// treat both an error and zero as "no devices".
    fn device_count(&self) -> Result<i32>;

    /// Make `device` current for the calling thread. Callers re-assert
    /// this before every device-touching operation; no call assumes a
    /// previous call left the right device selected.
    fn set_device(&self, device: i32) -> Result<()>;

    fn attribute(&self, device: i32, attr: DriverAttr) -> Result<i32>;

    fn device_name(&self, device: i32) -> Result<String>;

    /// Allocate from the driver heap on the current device. The returned
    /// block is aligned to at least 256 bytes.
    fn mem_alloc(&self, nbytes: usize) -> Result<NonNull<u8>>;

    fn mem_free(&self, ptr: NonNull<u8>) -> Result<()>;

    /// Enqueue an asynchronous copy on `stream`.
    ///
    /// # Safety
    ///
    /// `dst` and `src` must be valid for `nbytes` in the address spaces
    /// implied by `kind`, and must stay valid until the stream drains.
    unsafe fn memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        nbytes: usize,
        kind: CopyKind,
        stream: StreamHandle,
    ) -> Result<()>;

    /// Enqueue a peer-to-peer copy between two distinct devices, addressed
    /// by device ordinals and scheduled on `stream` in the source device's
    /// context.
    ///
    /// # Safety
    ///
    /// As [`Self::memcpy_async`], with each pointer valid on its own device.
    unsafe fn memcpy_peer_async(
        &self,
        dst: *mut u8,
        dst_device: i32,
        src: *const u8,
        src_device: i32,
        nbytes: usize,
        stream: StreamHandle,
    ) -> Result<()>;

    /// Create a stream on the current device, non-blocking with respect to
    /// the legacy default stream.
    fn stream_create(&self) -> Result<StreamHandle>;

    fn stream_destroy(&self, stream: StreamHandle) -> Result<()>;

    /// Block the calling thread until everything enqueued on `stream` has
    /// completed.
    fn stream_synchronize(&self, stream: StreamHandle) -> Result<()>;

    fn event_create(&self) -> Result<EventHandle>;

    /// Record `event` at the current tail of `stream`.
    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> Result<()>;

    /// Make work enqueued on `stream` after this call wait until `event`
    /// has been reached, without blocking the calling thread.
    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> Result<()>;

    fn event_destroy(&self, event: EventHandle) -> Result<()>;

    /// Register existing host memory as page-locked. Visible to all device
    /// contexts, so no device needs to be selected first.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `nbytes` and stay allocated until
    /// unregistered.
    unsafe fn host_register(&self, ptr: NonNull<u8>, nbytes: usize) -> Result<()>;

    /// # Safety
    ///
    /// `ptr` must have been passed to a successful [`Self::host_register`].
    unsafe fn host_unregister(&self, ptr: NonNull<u8>) -> Result<()>;

    /// Query what the driver knows about `ptr`. Never dereferences the
    /// pointer. Errors carry an [`crate::error::ErrorClass`] so the caller
    /// can tell a harmless unknown-pointer probe from a dead context.
    fn pointer_kind(&self, ptr: *const u8) -> Result<PointerKind>;
}
