use std::sync::Arc;

use tracing_test::traced_test;

use crate::pool::WorkspacePool;
use crate::test::mock::MockDriver;

#[test]
fn test_same_size_reuses_block() {
    let driver = Arc::new(MockDriver::new(1));
    let mut pool = WorkspacePool::new(driver.clone());

    let first = pool.alloc(0, 1024);
    pool.free(0, first);
    let second = pool.alloc(0, 1024);

    assert_eq!(first, second, "second same-size allocation must reuse the released block");
    assert_eq!(driver.driver_alloc_count(), 1);
    pool.free(0, second);
}

#[test]
fn test_sizes_do_not_share_blocks() {
    let driver = Arc::new(MockDriver::new(1));
    let mut pool = WorkspacePool::new(driver.clone());

    let small = pool.alloc(0, 512);
    pool.free(0, small);
    let large = pool.alloc(0, 1024);

    // The cached 512-byte block cannot serve the 1024-byte request.
    assert_eq!(driver.driver_alloc_count(), 2);
    pool.free(0, large);
}

#[test]
fn test_devices_do_not_share_blocks() {
    let driver = Arc::new(MockDriver::new(2));
    let mut pool = WorkspacePool::new(driver.clone());

    let on_zero = pool.alloc(0, 256);
    pool.free(0, on_zero);
    let on_one = pool.alloc(1, 256);

    assert_eq!(driver.driver_alloc_count(), 2);
    pool.free(1, on_one);
}

#[test]
fn test_free_cap_releases_overflow_to_driver() {
    let driver = Arc::new(MockDriver::new(1));
    let mut pool = WorkspacePool::with_free_cap(driver.clone(), 1);

    let a = pool.alloc(0, 256);
    let b = pool.alloc(0, 256);
    pool.free(0, a);
    pool.free(0, b);

    assert_eq!(pool.cached_blocks(), 1);
    assert_eq!(driver.driver_free_count(), 1);
}

#[test]
fn test_drop_releases_cached_blocks() {
    let driver = Arc::new(MockDriver::new(1));
    {
        let mut pool = WorkspacePool::new(driver.clone());
        let a = pool.alloc(0, 256);
        let b = pool.alloc(0, 4096);
        pool.free(0, a);
        pool.free(0, b);
        assert_eq!(pool.cached_blocks(), 2);
    }
    assert_eq!(driver.live_allocations(), 0);
}

#[test]
#[should_panic(expected = "did not allocate")]
fn test_free_of_foreign_pointer_is_fatal() {
    let driver = Arc::new(MockDriver::new(1));
    let mut pool = WorkspacePool::new(driver);
    pool.free(0, std::ptr::NonNull::dangling());
}

#[traced_test]
#[test]
fn test_pool_logs_misses_and_hits() {
    let driver = Arc::new(MockDriver::new(1));
    let mut pool = WorkspacePool::new(driver);

    let ptr = pool.alloc(0, 128);
    pool.free(0, ptr);

    assert!(logs_contain("workspace pool miss"));
}
