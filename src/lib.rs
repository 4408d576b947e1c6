//! # Voxflow - Heterogeneous Data Arrays and Element-wise Filters
//!
//! Voxflow stores voxel data as typed arrays of tuples that can live on the
//! host or on a compute device, and processes them with element-wise filters
//! that honour a per-tuple status mask.
//!
//! ## Features
//!
//! - **Typed Memory**: Contiguous buffers of plain, complex, colour, vector and matrix elements
//! - **Status Mask**: Every tuple is Active or Passive; filters only touch Active tuples
//! - **Device Placement**: Arrays migrate between host and device backends on demand
//! - **Element-wise Filters**: Unary and binary operators with in-place and copy forms
//! - **Pipelines**: Operator registry and TOML/JSON stage descriptions
//! - **Images**: Arrays on regular grids with lattice/world conversions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voxflow::prelude::*;
//!
//! // Host array of three scalar tuples
//! let mut a = DataArray::from_slice(&[1.0f32, -2.0, 3.0], 1)?;
//!
//! // Mask the second tuple, then add a constant to the Active ones
//! a.set_status(1, Status::Passive)?;
//! a.add_assign(10.0)?;
//! assert_eq!(a.to_vec::<f32>()?, vec![11.0, -2.0, 13.0]);
//!
//! // Run the same step through a device backend
//! LoopbackBackend::install(Platform::Cuda, 1)?;
//! let mut filter = BinaryFilter::in_place(BinaryKernel::Mul)
//!     .with_config(FilterConfig::new().with_platform(Platform::Cuda));
//! filter.process(&mut a, Operand::Scalar(2.0))?;
//! assert_eq!(a.platform(), Platform::Cuda);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Errors, platform identifiers, the platform registry and scalar types
//! - [`memory`]: Contiguous typed buffers on one (platform, device)
//! - [`backend`]: Device backends and their kernels
//! - [`array`]: Data arrays with status masks and their element iterators
//! - [`filters`]: Filter base, element-wise filters, registry and pipelines
//! - [`image`]: Regular grids and images

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod backend;
pub mod core;
pub mod filters;
pub mod image;
pub mod memory;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use voxflow::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::error::{ArrayError, ArrayResult, FilterError, FilterId, FilterResult};
    pub use crate::core::platform::{DeviceId, Location, Platform, ACTIVE_DEVICE};
    pub use crate::core::registry::{registry, ActiveScope, PlatformRegistry};
    pub use crate::core::scalar::{Element, ScalarType, Status};

    // Memory and arrays
    pub use crate::array::{CopyOptions, DataArray, Operand};
    pub use crate::memory::external::{ExternalArray, ExternalType};
    pub use crate::memory::Memory;

    // Backends
    pub use crate::backend::loopback::LoopbackBackend;
    pub use crate::backend::Backend;
    #[cfg(feature = "opencl")]
    pub use crate::backend::opencl::OpenClBackend;

    // Filters
    pub use crate::filters::{
        BinaryFilter, BinaryKernel, BinaryOperator, Filter, FilterConfig, FilterCore,
        HostBinary, HostOptions, HostUnary, OperatorRegistry, Pipeline, PipelineSpec, StageSpec,
        UnaryFilter, UnaryKernel, UnaryOperator,
    };

    // Images
    pub use crate::image::{Image, ImageOperand, ImageReader, ImageWriter, RasterIo, RegularGrid};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "voxflow");
    }

    #[test]
    fn test_prelude_round_trip() {
        let mut a = DataArray::from_slice(&[1.0f32, -2.0, 3.0], 1).unwrap();
        a.set_status(1, Status::Passive).unwrap();
        a.add_assign(10.0).unwrap();
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![11.0, -2.0, 13.0]);
        assert_eq!(a.count_active().unwrap(), 2);
    }
}
