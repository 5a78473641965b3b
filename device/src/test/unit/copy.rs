use std::sync::Arc;

use test_case::test_case;

use zarya_core::{Device, StreamHandle};

use crate::api::DeviceApi;
use crate::test::backend;
use crate::test::mock::MockDriver;

#[test]
fn test_round_trip_through_device_memory() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver);
    let dev = Device::accel(0);

    let src: Vec<u8> = (0..1024usize).map(|i| (i % 256) as u8).collect();
    let mut out = vec![0u8; 1024];
    let buf = api.alloc_data_space(dev, 1024, 256);
    let stream = api.create_stream(dev);

    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 0, buf.as_ptr(), 0, 1024, Device::host(), dev, stream);
    }
    api.sync_stream(dev, stream);

    // Default-stream device-to-host completes before returning.
    unsafe {
        api.copy_data_from_to_on(buf.as_ptr(), 0, out.as_mut_ptr(), 0, 1024, dev, Device::host(), StreamHandle::DEFAULT);
    }
    assert_eq!(out, src);

    api.free_stream(dev, stream);
    unsafe { api.free_data_space(dev, buf) };
}

#[test]
fn test_default_stream_device_to_host_is_synchronous() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver.clone());
    let dev = Device::accel(0);

    let src = [9u8; 32];
    let mut out = [0u8; 32];
    let buf = api.alloc_data_space(dev, 32, 32);

    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 0, buf.as_ptr(), 0, 32, Device::host(), dev, StreamHandle::DEFAULT);
        api.copy_data_from_to_on(buf.as_ptr(), 0, out.as_mut_ptr(), 0, 32, dev, Device::host(), StreamHandle::DEFAULT);
    }

    // No explicit synchronize: the d2h copy drained the default stream.
    assert_eq!(driver.pending_ops(StreamHandle::DEFAULT), 0);
    assert_eq!(out, src);

    unsafe { api.free_data_space(dev, buf) };
}

#[test]
fn test_copy_honors_offsets() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver);
    let dev = Device::accel(0);

    let src: Vec<u8> = (0..64u8).collect();
    let mut out = vec![0u8; 64];
    let buf = api.alloc_data_space(dev, 64, 64);

    unsafe {
        api.copy_data_from_to_on(src.as_ptr(), 16, buf.as_ptr(), 32, 16, Device::host(), dev, StreamHandle::DEFAULT);
        api.copy_data_from_to_on(buf.as_ptr(), 32, out.as_mut_ptr(), 8, 16, dev, Device::host(), StreamHandle::DEFAULT);
    }

    assert_eq!(&out[8..24], &src[16..32]);
    assert!(out[..8].iter().all(|&b| b == 0));
    assert!(out[24..].iter().all(|&b| b == 0));

    unsafe { api.free_data_space(dev, buf) };
}

// Same-ordinal copies dispatch as device-to-device, distinct ordinals as a
// peer copy; both must move the bytes.
#[test_case(0, 0 ; "same_device")]
#[test_case(0, 1 ; "peer_devices")]
fn test_device_to_device_routing(src_dev: i32, dst_dev: i32) {
    let driver = Arc::new(MockDriver::new(2));
    let api = backend(driver);
    let src_dev = Device::accel(src_dev);
    let dst_dev = Device::accel(dst_dev);

    let seed = [5u8; 16];
    let mut out = [0u8; 16];
    let a = api.alloc_data_space(src_dev, 16, 16);
    let b = api.alloc_data_space(dst_dev, 16, 16);

    unsafe {
        api.copy_data_from_to_on(seed.as_ptr(), 0, a.as_ptr(), 0, 16, Device::host(), src_dev, StreamHandle::DEFAULT);
        api.copy_data_from_to_on(a.as_ptr(), 0, b.as_ptr(), 0, 16, src_dev, dst_dev, StreamHandle::DEFAULT);
        // Final d2h on the default stream drains the whole queue in order.
        api.copy_data_from_to_on(b.as_ptr(), 0, out.as_mut_ptr(), 0, 16, dst_dev, Device::host(), StreamHandle::DEFAULT);
    }
    assert_eq!(out, seed);

    unsafe {
        api.free_data_space(src_dev, a);
        api.free_data_space(dst_dev, b);
    }
}

#[test]
fn test_peer_copy_runs_in_source_device_context() {
    let driver = Arc::new(MockDriver::new(2));
    let api = backend(driver.clone());

    let a = api.alloc_data_space(Device::accel(1), 16, 16);
    let b = api.alloc_data_space(Device::accel(0), 16, 16);

    unsafe {
        api.copy_data_from_to_on(a.as_ptr(), 0, b.as_ptr(), 0, 16, Device::accel(1), Device::accel(0), StreamHandle::DEFAULT);
    }
    assert_eq!(driver.current_device(), 1);

    api.sync_stream(Device::accel(1), StreamHandle::DEFAULT);
    unsafe {
        api.free_data_space(Device::accel(1), a);
        api.free_data_space(Device::accel(0), b);
    }
}

#[test]
#[should_panic(expected = "expect copy from/to device")]
fn test_host_to_host_copy_is_fatal() {
    let driver = Arc::new(MockDriver::new(1));
    let api = backend(driver);

    let src = [1u8; 8];
    let mut dst = [0u8; 8];
    unsafe {
        api.copy_data_from_to_on(
            src.as_ptr(),
            0,
            dst.as_mut_ptr(),
            0,
            8,
            Device::host(),
            Device::host(),
            StreamHandle::DEFAULT,
        );
    }
}
