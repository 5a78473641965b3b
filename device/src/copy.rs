//! Cross-device copy engine.
//!
//! Routes a transfer by the (source kind, destination kind) pair: same-
//! device async copy, peer copy between distinct accelerators, or a
//! host/device transfer. Host-to-host is outside the contract and fatal.
//!
//! One synchronization rule lives here: a device-to-host copy on the
//! default stream blocks until complete before returning, so a caller
//! reading host memory right after a default-stream copy sees valid data.
//! Copies on explicit streams make no such promise; host-to-device copies
//! keep the observed asymmetry and never block.

use tracing::trace;

use zarya_core::{Device, DeviceKind, StreamHandle};

use crate::driver::{AccelDriver, CopyKind};
use crate::error::{expect_driver, fatal};

/// Dispatch one copy of `nbytes` from `from + from_offset` to
/// `to + to_offset` on `stream`.
///
/// # Safety
///
/// Both pointers must be valid for their offset plus `nbytes` in the
/// address space named by their device, and stay valid until the stream
/// drains (or, for the blocking default-stream device-to-host path, until
/// this returns).
pub unsafe fn copy_data(
    driver: &dyn AccelDriver,
    from: *const u8,
    from_offset: usize,
    to: *mut u8,
    to_offset: usize,
    nbytes: usize,
    src: Device,
    dst: Device,
    stream: StreamHandle,
) {
    let from = unsafe { from.add(from_offset) };
    let to = unsafe { to.add(to_offset) };

    match (src.kind, dst.kind) {
        (DeviceKind::Accel, DeviceKind::Accel) => {
            expect_driver(driver.set_device(src.index));
            if src.index == dst.index {
                unsafe { enqueue_copy(driver, to, from, nbytes, CopyKind::DeviceToDevice, stream) };
            } else {
                trace!(src = src.index, dst = dst.index, nbytes, "peer copy");
                expect_driver(unsafe {
                    driver.memcpy_peer_async(to, dst.index, from, src.index, nbytes, stream)
                });
            }
        }
        (DeviceKind::Accel, DeviceKind::Host) => {
            expect_driver(driver.set_device(src.index));
            unsafe { enqueue_copy(driver, to, from, nbytes, CopyKind::DeviceToHost, stream) };
        }
        (DeviceKind::Host, DeviceKind::Accel) => {
            expect_driver(driver.set_device(dst.index));
            unsafe { enqueue_copy(driver, to, from, nbytes, CopyKind::HostToDevice, stream) };
        }
        (DeviceKind::Host, DeviceKind::Host) => {
            fatal!("expect copy from/to device, got {src} -> {dst}");
        }
    }
}

unsafe fn enqueue_copy(
    driver: &dyn AccelDriver,
    to: *mut u8,
    from: *const u8,
    nbytes: usize,
    kind: CopyKind,
    stream: StreamHandle,
) {
    expect_driver(unsafe { driver.memcpy_async(to, from, nbytes, kind, stream) });
    // Only wait for the copy when it's on the default stream and it's to
    // host memory.
    if stream.is_default() && kind == CopyKind::DeviceToHost {
        expect_driver(driver.stream_synchronize(stream));
    }
}
