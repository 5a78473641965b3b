
mod unit;

use std::sync::Arc;

use zarya_core::DispatchTable;

use crate::api::AccelDeviceApi;
use mock::MockDriver;

/// Facade over a mock driver with isolated dispatch state.
pub(crate) fn backend(driver: Arc<MockDriver>) -> AccelDeviceApi {
    backend_with(driver, Arc::new(DispatchTable::new()))
}

pub(crate) fn backend_with(driver: Arc<MockDriver>, dispatch: Arc<DispatchTable>) -> AccelDeviceApi {
    AccelDeviceApi::with_dispatch(driver, dispatch)
}
