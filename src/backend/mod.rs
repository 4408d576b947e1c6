//! Device backends.
//!
//! A backend owns the memory of one device platform and runs the builtin
//! whole-array kernels on it. Memory objects keep a reference to the backend
//! that allocated them, so a buffer is always released and read back through
//! the backend that produced it.
//!
//! Kernel entry points are only called while the kernel's (platform, device)
//! is active in the [`PlatformRegistry`](crate::core::PlatformRegistry).

pub mod loopback;
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::core::error::ArrayResult;
use crate::core::platform::Platform;
use crate::core::scalar::ScalarType;
use crate::filters::operators::{BinaryKernel, UnaryKernel};
use std::fmt;

/// Handle of a buffer allocated by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Device the buffer lives on.
    pub device: usize,
    /// Backend-private buffer id.
    pub id: u64,
    /// Buffer size in bytes.
    pub bytes: usize,
}

/// A device-resident array as seen by a kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelArray<'a> {
    /// Element type of the values buffer.
    pub ty: ScalarType,
    /// Number of tuples.
    pub tuples: usize,
    /// Components per tuple.
    pub components: usize,
    /// Values buffer, `tuples * components` elements.
    pub values: &'a DeviceHandle,
    /// Status buffer, one byte per tuple.
    pub status: &'a DeviceHandle,
}

/// Right-hand side of a binary kernel.
#[derive(Debug, Clone, Copy)]
pub enum KernelOperand<'a> {
    /// The same constant for every component.
    Scalar(f64),
    /// An array of the same shape on the same device.
    Array(KernelArray<'a>),
}

/// Memory primitives and kernels of one device platform.
pub trait Backend: Send + Sync {
    /// Platform served by this backend.
    fn platform(&self) -> Platform;

    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Number of devices.
    fn device_count(&self) -> usize;

    /// Whether kernels can run on arrays of this element type.
    fn supports_type(&self, ty: ScalarType) -> bool {
        ty.is_scalar() && !ty.is_complex()
    }

    /// Allocate a zeroed buffer.
    fn allocate(&self, device: usize, bytes: usize) -> ArrayResult<DeviceHandle>;

    /// Release a buffer. Unknown handles are ignored.
    fn release(&self, handle: &DeviceHandle);

    /// Copy host bytes into a buffer.
    fn upload(&self, dst: &DeviceHandle, src: &[u8]) -> ArrayResult<()>;

    /// Copy a buffer into host bytes.
    fn download(&self, src: &DeviceHandle, dst: &mut [u8]) -> ArrayResult<()>;

    /// Copy between two buffers on the same device.
    fn copy(&self, src: &DeviceHandle, dst: &DeviceHandle) -> ArrayResult<()>;

    /// Repeat `pattern` over the whole buffer.
    fn fill(&self, dst: &DeviceHandle, pattern: &[u8]) -> ArrayResult<()>;

    /// Run a unary kernel over an array in place.
    fn unary(&self, kernel: &UnaryKernel, target: &KernelArray<'_>) -> ArrayResult<()>;

    /// Run a binary kernel, updating `target` in place.
    fn binary(
        &self,
        kernel: &BinaryKernel,
        target: &KernelArray<'_>,
        operand: &KernelOperand<'_>,
    ) -> ArrayResult<()>;
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("platform", &self.platform())
            .field("name", &self.name())
            .field("devices", &self.device_count())
            .finish()
    }
}

/// Check that `pattern` tiles a buffer of `bytes` bytes.
pub(crate) fn check_pattern(platform: Platform, bytes: usize, pattern: &[u8]) -> ArrayResult<()> {
    if pattern.is_empty() || bytes % pattern.len() != 0 {
        return Err(crate::core::error::ArrayError::backend(
            platform,
            format!(
                "fill pattern of {} bytes does not tile {} bytes",
                pattern.len(),
                bytes
            ),
        ));
    }
    Ok(())
}
