//! Shared vocabulary for the zarya runtime.
//!
//! This crate holds the types that cross the boundary between the device
//! substrate (`zarya-device`) and external collaborators: device identity,
//! opaque stream handles, and the contract through which an external tensor
//! runtime can take over allocation and stream selection.

pub mod device;
pub mod dispatch;
pub mod error;
pub mod stream;

pub use device::{Device, DeviceKind};
pub use dispatch::{DispatchCtx, DispatchTable, HostBlock, TensorRuntime};
pub use error::{Error, Result};
pub use stream::StreamHandle;
