use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidDeviceSnafu, Result};

/// Which address space a [`Device`] lives in.
///
/// `Host` is ordinary pageable CPU memory. `Accel` is one accelerator of the
/// backend currently in use; the ordinal selects which one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Host,
    Accel,
}

/// One device addressable by the runtime.
///
/// The index is meaningful only for `Accel` devices; for `Host` it is
/// always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: i32,
}

impl Device {
    pub const fn host() -> Self {
        Self { kind: DeviceKind::Host, index: 0 }
    }

    pub const fn accel(index: i32) -> Self {
        Self { kind: DeviceKind::Accel, index }
    }

    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }

    pub fn is_accel(&self) -> bool {
        self.kind == DeviceKind::Accel
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Host => write!(f, "cpu"),
            DeviceKind::Accel => write!(f, "accel:{}", self.index),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    /// Parse a device string.
    ///
    /// Examples:
    /// - "cpu" -> host
    /// - "accel:1" -> accelerator 1
    /// - "gpu" -> accelerator 0 (default ordinal)
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        let parts: Vec<&str> = lower.split(':').collect();

        match parts[0] {
            "cpu" | "host" => Ok(Device::host()),
            "accel" | "gpu" | "cuda" => {
                let index = if parts.len() > 1 {
                    parts[1].parse().map_err(|_| Error::InvalidDevice { device: s.to_string() })?
                } else {
                    0
                };
                Ok(Device::accel(index))
            }
            _ => InvalidDeviceSnafu { device: s.to_string() }.fail(),
        }
    }
}
