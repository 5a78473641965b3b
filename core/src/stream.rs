use std::ffi::c_void;
use std::fmt;

/// Opaque handle to an ordered asynchronous command queue.
///
/// A stream is owned by exactly one device of the backend that created it.
/// The null handle names the legacy default stream, which always exists and
/// never needs to be created or destroyed.
///
/// The handle itself is just a token; what it points at is private to the
/// driver that issued it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(*mut c_void);

// Opaque token. Dereferencing is the owning driver's business, so moving the
// token between threads is fine.
unsafe impl Send for StreamHandle {}
unsafe impl Sync for StreamHandle {}

impl StreamHandle {
    /// The legacy default stream.
    pub const DEFAULT: Self = Self(std::ptr::null_mut());

    pub const fn from_raw(raw: *mut c_void) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub fn is_default(self) -> bool {
        self.0.is_null()
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() { write!(f, "StreamHandle(default)") } else { write!(f, "StreamHandle({:p})", self.0) }
    }
}
