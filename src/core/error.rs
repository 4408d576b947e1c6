//! Error types for Voxflow.
//!
//! Uses thiserror for structured errors with context. Errors are split in two
//! layers:
//! - [`ArrayError`] for the data layer (memory, arrays, backends, images)
//! - [`FilterError`] for the filter lifecycle, wrapping data-layer failures

use crate::core::platform::{Location, Platform};
use crate::core::scalar::ScalarType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a filter instance, used to tag log lines and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterId(pub Uuid);

impl FilterId {
    /// Create a new random filter ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FilterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Errors raised by memory objects, data arrays, backends and images.
#[derive(Error, Debug)]
pub enum ArrayError {
    #[error("Platform {0} is not available in this build")]
    UnsupportedPlatform(Platform),

    #[error("Device {device} does not exist on platform {platform}")]
    InvalidDevice { platform: Platform, device: i32 },

    #[error("Scalar type {ty} is not supported {context}")]
    UnsupportedType { ty: ScalarType, context: String },

    #[error("Out of memory: failed to allocate {bytes} bytes on {location}")]
    OutOfMemory { location: Location, bytes: usize },

    #[error("Device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Location, got: Location },

    #[error("Size mismatch: {0}")]
    SizeMismatch(String),

    #[error("Images have non-equal grids")]
    MismatchedGrid,

    #[error("Invalid grid geometry: {0}")]
    InvalidGrid(String),

    #[error("Index {index} out of range for length {len}")]
    OutOfRange { index: isize, len: usize },

    #[error("Cannot convert {from} to {to}")]
    InvalidConversion { from: ScalarType, to: ScalarType },

    #[error("Cannot parse '{input}' as {what}")]
    Parse { what: &'static str, input: String },

    #[error("Backend error on {platform}: {message}")]
    Backend { platform: Platform, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ArrayError {
    /// Shorthand for an [`ArrayError::UnsupportedType`] with context.
    pub fn unsupported_type(ty: ScalarType, context: impl Into<String>) -> Self {
        ArrayError::UnsupportedType {
            ty,
            context: context.into(),
        }
    }

    /// Shorthand for an [`ArrayError::Backend`] failure.
    pub fn backend(platform: Platform, message: impl fmt::Display) -> Self {
        ArrayError::Backend {
            platform,
            message: message.to_string(),
        }
    }

    /// Check if a caller may retry the operation on another device.
    ///
    /// Structural errors (sizes, grids, conversions) fail the same way everywhere.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArrayError::UnsupportedPlatform(_)
                | ArrayError::InvalidDevice { .. }
                | ArrayError::UnsupportedType { .. }
                | ArrayError::OutOfMemory { .. }
                | ArrayError::Backend { .. }
        )
    }
}

/// Errors raised while configuring or running a filter.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter {filter_id} expects {min}..={max_text} inputs, got {got}", max_text = fmt_bound(*.max))]
    InputCount {
        filter_id: FilterId,
        min: usize,
        max: i64,
        got: usize,
    },

    #[error("Filter {filter_id} expects {min}..={max_text} outputs, produced {got}", max_text = fmt_bound(*.max))]
    OutputCount {
        filter_id: FilterId,
        min: usize,
        max: i64,
        got: usize,
    },

    #[error("Filter {filter_id} has no input {index}")]
    MissingInput { filter_id: FilterId, index: isize },

    #[error("Filter {0} was executed before it was initialized")]
    NotInitialized(FilterId),

    #[error("Invalid filter configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Array(#[from] ArrayError),
}

fn fmt_bound(max: i64) -> String {
    if max < 0 {
        "unbounded".to_string()
    } else {
        max.to_string()
    }
}

impl FilterError {
    /// Get the filter that raised this error, if it is a lifecycle error.
    pub fn filter_id(&self) -> Option<FilterId> {
        match self {
            FilterError::InputCount { filter_id, .. }
            | FilterError::OutputCount { filter_id, .. }
            | FilterError::MissingInput { filter_id, .. } => Some(*filter_id),
            FilterError::NotInitialized(filter_id) => Some(*filter_id),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for FilterError {
    fn from(e: toml::de::Error) -> Self {
        FilterError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(e: serde_json::Error) -> Self {
        FilterError::Config(e.to_string())
    }
}

/// Result type alias for data-layer operations.
pub type ArrayResult<T> = Result<T, ArrayError>;

/// Result type alias for filter operations.
pub type FilterResult<T> = Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_id_display() {
        let id = FilterId::new();
        assert_eq!(format!("{}", id).len(), 8);
    }

    #[test]
    fn test_input_count_message() {
        let error = FilterError::InputCount {
            filter_id: FilterId::new(),
            min: 1,
            max: -1,
            got: 0,
        };
        assert!(error.to_string().contains("unbounded"));
        assert!(error.filter_id().is_some());
    }

    #[test]
    fn test_recoverable() {
        assert!(ArrayError::UnsupportedPlatform(Platform::Cuda).is_recoverable());
        assert!(!ArrayError::MismatchedGrid.is_recoverable());
        let wrapped = FilterError::from(ArrayError::MismatchedGrid);
        assert!(wrapped.filter_id().is_none());
    }
}
