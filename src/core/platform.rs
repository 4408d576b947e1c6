//! Platform and device identifiers.
//!
//! A platform is one of a closed set of compute backends. Devices are indexed
//! per platform, so the real identity of a device is the (platform, device)
//! pair captured by [`Location`].

use crate::core::error::ArrayError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device index scoped to a platform. [`ACTIVE_DEVICE`] requests the active one.
pub type DeviceId = i32;

/// Sentinel device id meaning "the active device of the platform".
pub const ACTIVE_DEVICE: DeviceId = -1;

/// Compute backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Request to choose the active platform. Never stored on a realized memory.
    #[default]
    Default,
    /// Host CPU with task parallelism. Always available.
    Cpu,
    /// CUDA devices.
    Cuda,
    /// OpenCL devices.
    #[serde(rename = "opencl")]
    OpenCl,
}

impl Platform {
    /// Platforms a memory object can live on, in preference order.
    pub const REALIZED: [Platform; 3] = [Platform::Cpu, Platform::Cuda, Platform::OpenCl];

    /// Get the lexicon name of this platform.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Default => "default",
            Platform::Cpu => "cpu",
            Platform::Cuda => "cuda",
            Platform::OpenCl => "opencl",
        }
    }

    /// Whether this is a device platform (anything but the host).
    pub fn is_device(&self) -> bool {
        matches!(self, Platform::Cuda | Platform::OpenCl)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(Platform::Default),
            "cpu" => Ok(Platform::Cpu),
            "cuda" => Ok(Platform::Cuda),
            "opencl" => Ok(Platform::OpenCl),
            _ => Err(ArrayError::Parse {
                what: "platform",
                input: s.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A realized (platform, device) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Backend holding the memory.
    pub platform: Platform,
    /// Device index on that backend.
    pub device: usize,
}

impl Location {
    /// The host CPU, device 0.
    pub const HOST: Location = Location {
        platform: Platform::Cpu,
        device: 0,
    };

    /// Create a new location.
    pub const fn new(platform: Platform, device: usize) -> Self {
        Self { platform, device }
    }

    /// Whether this location is host memory.
    pub fn is_host(&self) -> bool {
        self.platform == Platform::Cpu
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::HOST
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_lexicon() {
        assert_eq!("CPU".parse::<Platform>().unwrap(), Platform::Cpu);
        assert_eq!(" OpenCL ".parse::<Platform>().unwrap(), Platform::OpenCl);
        assert_eq!("default".parse::<Platform>().unwrap(), Platform::Default);
        assert_eq!("Cuda".parse::<Platform>().unwrap(), Platform::Cuda);
        assert!("metal".parse::<Platform>().is_err());
        assert!("host-cpu".parse::<Platform>().is_err());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new(Platform::Cuda, 1).to_string(), "cuda/1");
        assert!(Location::HOST.is_host());
    }

    #[test]
    fn test_platform_serde() {
        let json = serde_json::to_string(&Platform::OpenCl).unwrap();
        assert_eq!(json, "\"opencl\"");
        let back: Platform = serde_json::from_str("\" CPU\"").unwrap();
        assert_eq!(back, Platform::Cpu);
        assert!(serde_json::from_str::<Platform>("\"gpu\"").is_err());
    }
}
