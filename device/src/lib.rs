//! Accelerator memory and execution substrate.
//!
//! Provides the uniform surface a tensor/graph runtime uses to allocate
//! device memory, manage asynchronous streams, pin host memory, and move
//! data across device boundaries, without knowing which accelerator
//! backend is in use.
//!
//! # Layering
//!
//! The [`driver::AccelDriver`] trait captures raw driver semantics
//! (devices, streams, events, peer copies). [`api::AccelDeviceApi`] builds
//! the public [`api::DeviceApi`] facade on top of it: workspace pooling
//! through the per-thread handle cache, pinned-memory management, the copy
//! engine, and delegate-first integration with an external tensor runtime
//! (see `zarya_core::dispatch`). Backends register their facade singleton
//! in the [`registry`] under a fixed name.
//!
//! # Error policy
//!
//! Driver failures outside a small set of soft conditions are fatal:
//! logged with full context, then abort. Resilience belongs to callers.

pub mod api;
pub mod copy;
pub mod driver;
pub mod error;
pub mod pool;
pub mod registry;
pub mod thread_entry;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(test)]
pub mod test;

pub use api::{AccelDeviceApi, AttrKind, AttrValue, DRIVER_ALLOC_ALIGNMENT, DeviceApi, WorkspaceGuard};
pub use driver::{AccelDriver, CopyKind, DriverAttr, EventHandle, PointerKind};
pub use error::{Error, ErrorClass, Result};
pub use pool::WorkspacePool;
pub use registry::{BackendRegistry, registry};
pub use thread_entry::ThreadEntry;

pub use zarya_core::{Device, DeviceKind, DispatchCtx, DispatchTable, HostBlock, StreamHandle, TensorRuntime};
