use std::{fmt, str::FromStr};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{EngineErr, Result};

/// Whether this build can place data on XLA devices.
pub const HAS_XLA_SUPPORT: bool = false;

/// Where batches are placed before being processed.
///
/// Models are never moved by this crate; a device only applies to incoming batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Xla(usize),
}

impl Device {
    pub fn is_xla(&self) -> bool {
        matches!(self, Device::Xla(_))
    }

    /// Fails for devices this build can't place data on.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_xla() && !HAS_XLA_SUPPORT {
            return Err(EngineErr::XlaUnsupported);
        }

        Ok(())
    }
}

impl FromStr for Device {
    type Err = EngineErr;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EngineErr::InvalidDevice(s.to_string());
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => (kind, Some(index.parse::<usize>().map_err(|_| invalid())?)),
            None => (s, None),
        };

        match (kind, index) {
            ("cpu", None) => Ok(Device::Cpu),
            ("xla", index) => Ok(Device::Xla(index.unwrap_or_default())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Xla(index) => write!(f, "xla:{index}"),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = EngineErr;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(value: Device) -> Self {
        value.to_string()
    }
}

/// Places `tensor` on `device`.
///
/// Host arrays already live on the CPU, so for it this is the identity and `non_blocking` has
/// no effect.
pub fn convert_tensor(
    tensor: Array2<f32>,
    device: Device,
    _non_blocking: bool,
) -> Result<Array2<f32>> {
    device.ensure_supported()?;
    Ok(tensor)
}
