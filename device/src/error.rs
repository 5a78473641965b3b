use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a raw driver failure.
///
/// The facade layer decides what each class means per call site: some are
/// soft (resolved to a default value), some downgrade backend availability,
/// the rest are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The driver rejected an argument. Commonly returned by pointer
    /// attribute queries for plain host pointers on older drivers.
    InvalidValue,
    /// The device context is unusable: deinitialized, never initialized,
    /// no device present, or a forked process without a context.
    ContextGone,
    /// Device memory exhausted.
    OutOfMemory,
    Other,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A raw driver call failed.
    #[snafu(display("driver error in {op}: {message}"))]
    Driver { op: &'static str, class: ErrorClass, message: String },

    /// Invalid device ordinal for this backend.
    #[snafu(display("invalid device ordinal {index}"))]
    InvalidOrdinal { index: i32 },

    #[cfg(feature = "cuda")]
    /// cuBLAS handle creation or use failed.
    #[snafu(display("cublas error: {source:?}"))]
    Cublas { source: cudarc::cublas::result::CublasError },
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Driver { class, .. } => *class,
            _ => ErrorClass::Other,
        }
    }
}

/// Abort path for unrecoverable driver failures and caller misuse.
///
/// Logs through tracing, then panics with the same classified message so
/// tests can assert the category. Everything not explicitly handled as a
/// soft condition goes through here; this layer has no recoverable-error
/// channel for driver faults.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::tracing::error!($($arg)*);
        panic!($($arg)*);
    }};
}
pub(crate) use fatal;

/// Unwrap a driver result, treating failure as fatal.
pub(crate) fn expect_driver<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fatal!("{err}"),
    }
}
