//! Core types for the Voxflow data layer.
//!
//! This module contains the foundational pieces every other module builds on:
//! - Error types
//! - Platform and device identifiers
//! - The platform registry and the scoped active-device switch
//! - Scalar type descriptors and saturating conversion

pub mod convert;
pub mod error;
pub mod platform;
pub mod registry;
pub mod scalar;

// Re-export commonly used types
pub use error::{ArrayError, ArrayResult, FilterError, FilterId, FilterResult};
pub use platform::{DeviceId, Location, Platform, ACTIVE_DEVICE};
pub use registry::{registry, ActiveScope, PlatformRegistry};
pub use scalar::{Element, ScalarType, Status};
