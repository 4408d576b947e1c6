//! Filter module.
//!
//! Contains the filter base, the element-wise filters and their operators,
//! the operator registry and sequential pipelines.

pub mod base;
pub mod config;
pub mod elementwise;
pub mod operators;
pub mod pipeline;
pub mod registry;

pub use base::{range_index, Filter, FilterCore, FilterInput};
pub use config::{FilterConfig, HostOptions};
pub use elementwise::{BinaryFilter, UnaryFilter};
pub use operators::{
    BinaryKernel, BinaryOperator, HostBinary, HostUnary, KernelTarget, UnaryKernel, UnaryOperator,
};
pub use pipeline::{Pipeline, PipelineSpec, StageSpec};
pub use registry::{AnyOperator, OperatorFactory, OperatorRegistry, Params};
