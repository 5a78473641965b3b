//! CUDA implementation of the raw driver contract.
//!
//! Primary contexts are retained per ordinal and cached; streams and
//! events created through the driver are kept alive in handle-keyed maps
//! until destroyed. Pointer-based operations that the safe `cudarc` API
//! cannot express (host registration, pointer attribute queries) go
//! through `cudarc::driver::sys` directly.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cudarc::cublas::CudaBlas;
use cudarc::driver::{CudaContext, CudaEvent, CudaStream, DriverError, result, sys};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use zarya_core::StreamHandle;

use crate::api::{AccelDeviceApi, DeviceApi};
use crate::driver::{AccelDriver, CopyKind, DriverAttr, EventHandle, PointerKind};
use crate::error::{Error, ErrorClass, Result};
use crate::thread_entry;

/// Registry key of this backend.
pub const BACKEND_NAME: &str = "cuda";

thread_local! {
    // Ordinal most recently made current on this thread. Callers re-assert
    // the device before every device-touching call, so this is always fresh
    // when it is read.
    static CURRENT_DEVICE: Cell<i32> = const { Cell::new(0) };
}

fn classify(op: &'static str, err: DriverError) -> Error {
    use sys::CUresult as R;
    let class = match err.0 {
        R::CUDA_ERROR_INVALID_VALUE => ErrorClass::InvalidValue,
        R::CUDA_ERROR_DEINITIALIZED
        | R::CUDA_ERROR_NOT_INITIALIZED
        | R::CUDA_ERROR_NO_DEVICE
        | R::CUDA_ERROR_INVALID_DEVICE => ErrorClass::ContextGone,
        R::CUDA_ERROR_OUT_OF_MEMORY => ErrorClass::OutOfMemory,
        _ => ErrorClass::Other,
    };
    Error::Driver { op, class, message: format!("{err:?}") }
}

fn check(op: &'static str, code: sys::CUresult) -> Result<()> {
    match code {
        sys::CUresult::CUDA_SUCCESS => Ok(()),
        code => Err(classify(op, DriverError(code))),
    }
}

fn attr_to_sys(attr: DriverAttr) -> sys::CUdevice_attribute {
    use sys::CUdevice_attribute as A;
    match attr {
        DriverAttr::MaxThreadsPerBlock => A::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
        DriverAttr::WarpSize => A::CU_DEVICE_ATTRIBUTE_WARP_SIZE,
        DriverAttr::MaxSharedMemoryPerBlock => A::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
        DriverAttr::ComputeCapabilityMajor => A::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
        DriverAttr::ComputeCapabilityMinor => A::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        DriverAttr::ClockRate => A::CU_DEVICE_ATTRIBUTE_CLOCK_RATE,
        DriverAttr::MultiProcessorCount => A::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
        DriverAttr::MaxBlockDimX => A::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X,
        DriverAttr::MaxBlockDimY => A::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y,
        DriverAttr::MaxBlockDimZ => A::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z,
    }
}

#[derive(Debug, Default)]
pub struct CudaDriver {
    contexts: RwLock<HashMap<i32, Arc<CudaContext>>>,
    /// Streams created through this driver, keyed by raw handle so the
    /// owning `Arc` stays alive until destroy.
    streams: RwLock<HashMap<usize, Arc<CudaStream>>>,
    events: RwLock<HashMap<u64, CudaEvent>>,
    next_event: AtomicU64,
}

impl CudaDriver {
    fn context(&self, device: i32) -> Result<Arc<CudaContext>> {
        if let Some(ctx) = self.contexts.read().get(&device) {
            return Ok(Arc::clone(ctx));
        }

        let mut contexts = self.contexts.write();
        if let Some(ctx) = contexts.get(&device) {
            return Ok(Arc::clone(ctx));
        }
        let ctx = CudaContext::new(device as usize).map_err(|err| classify("context_new", err))?;
        contexts.insert(device, Arc::clone(&ctx));
        Ok(ctx)
    }

    fn current_context(&self) -> Result<Arc<CudaContext>> {
        self.context(CURRENT_DEVICE.with(Cell::get))
    }

    fn stream(&self, handle: StreamHandle) -> Result<Arc<CudaStream>> {
        if handle.is_default() {
            return Ok(self.current_context()?.default_stream());
        }
        self.streams
            .read()
            .get(&(handle.as_raw() as usize))
            .map(Arc::clone)
            .ok_or_else(|| Error::Driver {
                op: "stream_lookup",
                class: ErrorClass::InvalidValue,
                message: format!("unknown stream handle {:p}", handle.as_raw()),
            })
    }
}

impl AccelDriver for CudaDriver {
    fn device_count(&self) -> Result<i32> {
        result::init().map_err(|err| classify("init", err))?;
        result::device::get_count().map_err(|err| classify("device_count", err))
    }

    fn set_device(&self, device: i32) -> Result<()> {
        let ctx = self.context(device)?;
        ctx.bind_to_thread().map_err(|err| classify("set_device", err))?;
        CURRENT_DEVICE.with(|current| current.set(device));
        Ok(())
    }

    fn attribute(&self, device: i32, attr: DriverAttr) -> Result<i32> {
        let dev = result::device::get(device).map_err(|err| classify("device_get", err))?;
        unsafe { result::device::get_attribute(dev, attr_to_sys(attr)) }
            .map_err(|err| classify("device_attribute", err))
    }

    fn device_name(&self, device: i32) -> Result<String> {
        self.context(device)?.name().map_err(|err| classify("device_name", err))
    }

    fn mem_alloc(&self, nbytes: usize) -> Result<NonNull<u8>> {
        let dptr = unsafe { result::malloc_sync(nbytes) }.map_err(|err| classify("mem_alloc", err))?;
        NonNull::new(dptr as *mut u8).ok_or_else(|| Error::Driver {
            op: "mem_alloc",
            class: ErrorClass::Other,
            message: "driver returned a null allocation".to_string(),
        })
    }

    fn mem_free(&self, ptr: NonNull<u8>) -> Result<()> {
        unsafe { result::free_sync(ptr.as_ptr() as sys::CUdeviceptr) }.map_err(|err| classify("mem_free", err))
    }

    unsafe fn memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        nbytes: usize,
        kind: CopyKind,
        stream: StreamHandle,
    ) -> Result<()> {
        let cu_stream = stream.as_raw() as sys::CUstream;
        let res = match kind {
            CopyKind::HostToDevice => unsafe {
                result::memcpy_htod_async(
                    dst as sys::CUdeviceptr,
                    std::slice::from_raw_parts(src, nbytes),
                    cu_stream,
                )
            },
            CopyKind::DeviceToHost => unsafe {
                result::memcpy_dtoh_async(
                    std::slice::from_raw_parts_mut(dst, nbytes),
                    src as sys::CUdeviceptr,
                    cu_stream,
                )
            },
            CopyKind::DeviceToDevice => unsafe {
                result::memcpy_dtod_async(dst as sys::CUdeviceptr, src as sys::CUdeviceptr, nbytes, cu_stream)
            },
        };
        res.map_err(|err| classify("memcpy_async", err))
    }

    unsafe fn memcpy_peer_async(
        &self,
        dst: *mut u8,
        _dst_device: i32,
        src: *const u8,
        _src_device: i32,
        nbytes: usize,
        stream: StreamHandle,
    ) -> Result<()> {
        // Unified addressing routes the transfer to the owning devices; the
        // caller has already made the source device current.
        unsafe {
            result::memcpy_dtod_async(
                dst as sys::CUdeviceptr,
                src as sys::CUdeviceptr,
                nbytes,
                stream.as_raw() as sys::CUstream,
            )
        }
        .map_err(|err| classify("memcpy_peer_async", err))
    }

    fn stream_create(&self) -> Result<StreamHandle> {
        let ctx = self.current_context()?;
        // cudarc creates streams with the non-blocking flag, so nothing
        // serializes against the legacy default stream.
        let stream = ctx.new_stream().map_err(|err| classify("stream_create", err))?;
        let raw = stream.cu_stream() as usize;
        self.streams.write().insert(raw, stream);
        Ok(StreamHandle::from_raw(raw as *mut c_void))
    }

    fn stream_destroy(&self, stream: StreamHandle) -> Result<()> {
        match self.streams.write().remove(&(stream.as_raw() as usize)) {
            Some(_) => Ok(()),
            None => Err(Error::Driver {
                op: "stream_destroy",
                class: ErrorClass::InvalidValue,
                message: format!("unknown stream handle {:p}", stream.as_raw()),
            }),
        }
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> Result<()> {
        self.stream(stream)?.synchronize().map_err(|err| classify("stream_synchronize", err))
    }

    fn event_create(&self) -> Result<EventHandle> {
        let ctx = self.current_context()?;
        let event = ctx.create_event(None).map_err(|err| classify("event_create", err))?;
        let id = self.next_event.fetch_add(1, Ordering::Relaxed);
        self.events.write().insert(id, event);
        Ok(EventHandle::from_raw(id))
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        let stream = self.stream(stream)?;
        let events = self.events.read();
        let event = events.get(&event.as_raw()).ok_or_else(|| Error::Driver {
            op: "event_record",
            class: ErrorClass::InvalidValue,
            message: format!("unknown event {}", event.as_raw()),
        })?;
        stream.record(event).map_err(|err| classify("event_record", err))
    }

    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> Result<()> {
        let stream = self.stream(stream)?;
        let events = self.events.read();
        let event = events.get(&event.as_raw()).ok_or_else(|| Error::Driver {
            op: "stream_wait_event",
            class: ErrorClass::InvalidValue,
            message: format!("unknown event {}", event.as_raw()),
        })?;
        stream.wait(event).map_err(|err| classify("stream_wait_event", err))
    }

    fn event_destroy(&self, event: EventHandle) -> Result<()> {
        match self.events.write().remove(&event.as_raw()) {
            Some(_) => Ok(()),
            None => Err(Error::Driver {
                op: "event_destroy",
                class: ErrorClass::InvalidValue,
                message: format!("unknown event {}", event.as_raw()),
            }),
        }
    }

    unsafe fn host_register(&self, ptr: NonNull<u8>, nbytes: usize) -> Result<()> {
        // Pinned memory is visible to every context, so no device needs to
        // be current.
        check("host_register", unsafe {
            sys::cuMemHostRegister_v2(ptr.as_ptr() as *mut c_void, nbytes, 0)
        })
    }

    unsafe fn host_unregister(&self, ptr: NonNull<u8>) -> Result<()> {
        check("host_unregister", unsafe { sys::cuMemHostUnregister(ptr.as_ptr() as *mut c_void) })
    }

    fn pointer_kind(&self, ptr: *const u8) -> Result<PointerKind> {
        let mut mem_type = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
        check("pointer_kind", unsafe {
            sys::cuPointerGetAttribute(
                &mut mem_type as *mut sys::CUmemorytype as *mut c_void,
                sys::CUpointer_attribute::CU_POINTER_ATTRIBUTE_MEMORY_TYPE,
                ptr as sys::CUdeviceptr,
            )
        })?;
        Ok(match mem_type {
            sys::CUmemorytype::CU_MEMORYTYPE_HOST => PointerKind::Host,
            sys::CUmemorytype::CU_MEMORYTYPE_DEVICE | sys::CUmemorytype::CU_MEMORYTYPE_UNIFIED => PointerKind::Device,
            _ => PointerKind::Unregistered,
        })
    }
}

static GLOBAL: Lazy<Arc<AccelDeviceApi>> =
    Lazy::new(|| Arc::new(AccelDeviceApi::new(Arc::new(CudaDriver::default()))));

/// The process-wide CUDA backend singleton.
pub fn global() -> Arc<AccelDeviceApi> {
    Arc::clone(&GLOBAL)
}

/// Place the singleton in the backend registry under [`BACKEND_NAME`].
pub fn register_backend() {
    let api: Arc<dyn DeviceApi> = global();
    crate::registry::register(BACKEND_NAME, api);
}

/// Run `f` with the calling thread's cached cuBLAS handle for `device`,
/// creating the handle on first use.
pub fn with_thread_blas<R>(device: i32, f: impl FnOnce(&CudaBlas) -> R) -> Result<R> {
    let api = global();
    let ctx = CudaContext::new(device as usize).map_err(|err| classify("context_new", err))?;
    let stream = ctx.default_stream();
    thread_entry::with_entry(api.instance_id(), api.driver(), |entry| {
        let blas = entry.blas(&stream)?;
        Ok(f(blas))
    })
}
