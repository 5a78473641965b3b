use std::sync::Arc;

use zarya_core::{Device, StreamHandle};

use crate::api::DeviceApi;
use crate::test::backend;
use crate::test::mock::MockDriver;

#[test]
fn test_stream_lifecycle() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver);
    let dev = Device::accel(0);

    let stream = api.create_stream(dev);
    assert!(!stream.is_default());
    api.sync_stream(dev, stream);
    api.free_stream(dev, stream);
}

#[test]
fn test_explicit_stream_copy_defers_until_sync() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver.clone());
    let dev = Device::accel(0);
    let stream = api.create_stream(dev);

    let src: Vec<u8> = (0..64u8).collect();
    let mut out = vec![0u8; 64];
    let buf = api.alloc_data_space(dev, 64, 64);

    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 0, buf.as_ptr(), 0, 64, Device::host(), dev, stream);
        api.copy_data_from_to_on(buf.as_ptr(), 0, out.as_mut_ptr(), 0, 64, dev, Device::host(), stream);
    }

    // Nothing has drained the stream yet, so the destination is untouched.
    assert_eq!(driver.pending_ops(stream), 2);
    assert_eq!(out, vec![0u8; 64]);

    api.sync_stream(dev, stream);
    assert_eq!(out, src);

    api.free_stream(dev, stream);
    unsafe { api.free_data_space(dev, buf) };
}

#[test]
fn test_default_stream_host_to_device_is_not_synchronous() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver.clone());
    let dev = Device::accel(0);

    let src = [7u8; 16];
    let buf = api.alloc_data_space(dev, 16, 16);

    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 0, buf.as_ptr(), 0, 16, Device::host(), dev, StreamHandle::DEFAULT);
    }
    // Host-to-device keeps the asymmetry: enqueued, not waited for.
    assert_eq!(driver.pending_ops(StreamHandle::DEFAULT), 1);

    api.sync_stream(dev, StreamHandle::DEFAULT);
    unsafe { api.free_data_space(dev, buf) };
}

#[test]
fn test_wait_on_makes_writes_visible_without_source_sync() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver.clone());
    let dev = Device::accel(0);

    let a = api.create_stream(dev);
    let b = api.create_stream(dev);

    let src: Vec<u8> = (0..128u8).collect();
    let mut out = vec![0u8; 128];
    let buf = api.alloc_data_space(dev, 128, 128);

    // Write enqueued on A before the edge...
    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 0, buf.as_ptr(), 0, 128, Device::host(), dev, a);
    }
    api.sync_stream_from_to(dev, a, b);
    // ...must be visible to a read enqueued on B after it.
    unsafe {
        api.copy_data_from_to_on(buf.as_ptr(), 0, out.as_mut_ptr(), 0, 128, dev, Device::host(), b);
    }

    // Only B is synchronized; A's own queue is never waited on directly.
    api.sync_stream(dev, b);
    assert_eq!(out, src);

    api.free_stream(dev, a);
    api.free_stream(dev, b);
    unsafe { api.free_data_space(dev, buf) };
}

#[test]
fn test_wait_on_does_not_cover_later_source_work() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver.clone());
    let dev = Device::accel(0);

    let a = api.create_stream(dev);
    let b = api.create_stream(dev);

    let first = [1u8; 8];
    let second = [2u8; 8];
    let buf = api.alloc_data_space(dev, 8, 8);

    unsafe {
        api.copy_data_from_to_on(first.as_ptr(), 0, buf.as_ptr(), 0, 8, Device::host(), dev, a);
    }
    api.sync_stream_from_to(dev, a, b);
    // Enqueued on A after the edge was recorded; B must not wait for it.
    unsafe {
        api.copy_data_from_to_on(second.as_ptr(), 0, buf.as_ptr(), 0, 8, Device::host(), dev, a);
    }

    api.sync_stream(dev, b);
    assert_eq!(driver.pending_ops(a), 1, "work enqueued after the event stays pending on the source stream");

    api.sync_stream(dev, a);
    api.free_stream(dev, a);
    api.free_stream(dev, b);
    unsafe { api.free_data_space(dev, buf) };
}
