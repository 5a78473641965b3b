use std::sync::Arc;

use zarya_core::Device;

use crate::api::{AttrKind, AttrValue, DeviceApi};
use crate::registry;
use crate::test::backend;
use crate::test::mock::MockDriver;

#[test]
fn test_register_and_get() {
    let api: Arc<dyn DeviceApi> = Arc::new(backend(Arc::new(MockDriver::new(1))));
    registry::register("mock-primary", Arc::clone(&api));

    let found = registry::get("mock-primary").expect("registered backend");
    assert!(found.is_available());
    assert_eq!(found.attribute(Device::accel(0), AttrKind::Exist), AttrValue::Int(1));
}

#[test]
fn test_unknown_backend_is_none() {
    assert!(registry::get("no-such-backend").is_none());
}

#[test]
fn test_reregistration_replaces_singleton() {
    let first: Arc<dyn DeviceApi> = Arc::new(backend(Arc::new(MockDriver::new(0))));
    let second: Arc<dyn DeviceApi> = Arc::new(backend(Arc::new(MockDriver::new(1))));

    registry::register("mock-replaced", first);
    registry::register("mock-replaced", second);

    let found = registry::get("mock-replaced").expect("registered backend");
    assert!(found.is_available(), "lookup must see the replacement");
}
