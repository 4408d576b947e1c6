//! Filter configuration envelope.
//!
//! Recognised keys (kebab-case in TOML and JSON):
//!
//! ```toml
//! platform = "cuda"     # default | cpu | cuda | opencl
//! device = -1           # -1 selects the active device of the platform
//! min-inputs = 1
//! max-inputs = 2        # -1 is unbounded
//! min-outputs = 0
//! max-outputs = 1
//!
//! [host]
//! parallel = true
//! min-block = 1024      # fewest tuples handed to one host task
//! ```

use crate::core::error::{FilterError, FilterResult};
use crate::core::platform::{DeviceId, Platform, ACTIVE_DEVICE};
use serde::{Deserialize, Serialize};

/// Host-side execution options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HostOptions {
    /// Split host kernels over the rayon pool.
    pub parallel: bool,
    /// Fewest tuples in one block. `0` lets the pool size decide.
    pub min_block: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            min_block: 0,
        }
    }
}

impl HostOptions {
    /// Tuples per block for an array of `tuples` tuples.
    pub fn block_len(&self, tuples: usize) -> usize {
        let auto = tuples / (rayon::current_num_threads() * 4);
        auto.max(self.min_block).max(1)
    }
}

/// Configuration of one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FilterConfig {
    /// Requested platform; `default` lets the filter choose.
    pub platform: Platform,
    /// Requested device; `-1` selects the active device.
    pub device: DeviceId,
    /// Fewest inputs.
    pub min_inputs: usize,
    /// Most inputs; `-1` is unbounded.
    pub max_inputs: i64,
    /// Fewest outputs.
    pub min_outputs: usize,
    /// Most outputs; `-1` is unbounded.
    pub max_outputs: i64,
    /// Host execution options.
    pub host: HostOptions,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Default,
            device: ACTIVE_DEVICE,
            min_inputs: 0,
            max_inputs: -1,
            min_outputs: 0,
            max_outputs: -1,
            host: HostOptions::default(),
        }
    }
}

impl FilterConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML.
    pub fn from_toml_str(text: &str) -> FilterResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON.
    pub fn from_json_str(text: &str) -> FilterResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> FilterResult<String> {
        toml::to_string(self).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Set the requested platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the requested device.
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    /// Set input bounds. `max = -1` is unbounded.
    pub fn with_inputs(mut self, min: usize, max: i64) -> Self {
        self.min_inputs = min;
        self.max_inputs = max;
        self
    }

    /// Set output bounds. `max = -1` is unbounded.
    pub fn with_outputs(mut self, min: usize, max: i64) -> Self {
        self.min_outputs = min;
        self.max_outputs = max;
        self
    }

    /// Enable or disable parallel host kernels.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.host.parallel = parallel;
        self
    }

    /// Set the fewest tuples per host block.
    pub fn with_min_block(mut self, min_block: usize) -> Self {
        self.host.min_block = min_block;
        self
    }

    /// Check the envelope for contradictions.
    pub fn validate(&self) -> FilterResult<()> {
        if self.device < ACTIVE_DEVICE {
            return Err(FilterError::Config(format!(
                "device must be -1 or a device index, got {}",
                self.device
            )));
        }
        check_bounds("inputs", self.min_inputs, self.max_inputs)?;
        check_bounds("outputs", self.min_outputs, self.max_outputs)
    }
}

fn check_bounds(what: &str, min: usize, max: i64) -> FilterResult<()> {
    if max < -1 {
        return Err(FilterError::Config(format!(
            "max-{} must be -1 or a count, got {}",
            what, max
        )));
    }
    if max >= 0 && (max as usize) < min {
        return Err(FilterError::Config(format!(
            "max-{} ({}) is below min-{} ({})",
            what, max, what, min
        )));
    }
    Ok(())
}

/// Whether `count` lies within `[min, max]`, `max = -1` being unbounded.
pub(crate) fn within(count: usize, min: usize, max: i64) -> bool {
    count >= min && (max < 0 || count <= max as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.platform, Platform::Default);
        assert_eq!(config.device, -1);
        assert_eq!(config.max_inputs, -1);
        assert!(config.host.parallel);
    }

    #[test]
    fn test_from_toml() {
        let config = FilterConfig::from_toml_str(
            r#"
            platform = "OpenCL"
            device = 1
            min-inputs = 1
            max-inputs = 2

            [host]
            min-block = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.platform, Platform::OpenCl);
        assert_eq!(config.device, 1);
        assert_eq!(config.max_inputs, 2);
        assert_eq!(config.host.min_block, 64);
        assert!(config.host.parallel);
    }

    #[test]
    fn test_from_json() {
        let config =
            FilterConfig::from_json_str(r#"{"platform": "cpu", "max-outputs": 1}"#).unwrap();
        assert_eq!(config.platform, Platform::Cpu);
        assert_eq!(config.max_outputs, 1);
    }

    #[test]
    fn test_validation() {
        assert!(FilterConfig::new().with_device(-2).validate().is_err());
        assert!(FilterConfig::new().with_inputs(3, 1).validate().is_err());
        assert!(FilterConfig::new().with_inputs(3, -1).validate().is_ok());
        assert!(FilterConfig::from_json_str(r#"{"max-inputs": -5}"#).is_err());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = FilterConfig::new()
            .with_platform(Platform::Cuda)
            .with_device(0)
            .with_min_block(16);
        let text = config.to_toml_string().unwrap();
        assert_eq!(FilterConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_block_len() {
        let host = HostOptions {
            parallel: true,
            min_block: 100,
        };
        assert!(host.block_len(10) >= 100);
        assert_eq!(HostOptions::default().block_len(0), 1);
        assert!(within(2, 1, -1));
        assert!(!within(3, 1, 2));
    }
}
