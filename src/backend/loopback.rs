//! Loopback device backend.
//!
//! Keeps every device buffer in a private host arena and runs kernels with the
//! host element loops. Data still has to be migrated in and out explicitly,
//! so it behaves like a discrete device without needing one.

use crate::array::iter::{ElementIter, ElementIterMut};
use crate::backend::{check_pattern, Backend, DeviceHandle, KernelArray, KernelOperand};
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::platform::{Location, Platform};
use crate::core::registry::PlatformRegistry;
use crate::filters::elementwise::{binary_block, unary_block, RightBlock};
use crate::filters::operators::{BinaryKernel, UnaryKernel};
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Arena {
    buffers: HashMap<u64, Vec<u8>>,
    used: Vec<usize>,
}

impl Arena {
    fn take(&mut self, platform: Platform, handle: &DeviceHandle) -> ArrayResult<Vec<u8>> {
        self.buffers
            .remove(&handle.id)
            .ok_or_else(|| ArrayError::backend(platform, format!("unknown buffer {}", handle.id)))
    }

    fn get(&self, platform: Platform, handle: &DeviceHandle) -> ArrayResult<&Vec<u8>> {
        self.buffers
            .get(&handle.id)
            .ok_or_else(|| ArrayError::backend(platform, format!("unknown buffer {}", handle.id)))
    }

    fn get_mut(&mut self, platform: Platform, handle: &DeviceHandle) -> ArrayResult<&mut Vec<u8>> {
        self.buffers
            .get_mut(&handle.id)
            .ok_or_else(|| ArrayError::backend(platform, format!("unknown buffer {}", handle.id)))
    }
}

/// Device backend backed by host arenas.
pub struct LoopbackBackend {
    platform: Platform,
    devices: usize,
    capacity: Option<usize>,
    next_id: AtomicU64,
    arena: Mutex<Arena>,
}

impl LoopbackBackend {
    /// Create a backend serving `platform` with `devices` devices.
    pub fn new(platform: Platform, devices: usize) -> Self {
        Self {
            platform,
            devices,
            capacity: None,
            next_id: AtomicU64::new(1),
            arena: Mutex::new(Arena {
                buffers: HashMap::new(),
                used: vec![0; devices],
            }),
        }
    }

    /// Limit every device to `bytes` bytes of live buffers.
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Register a loopback backend in the global registry unless the platform
    /// already has a backend.
    pub fn install(platform: Platform, devices: usize) -> ArrayResult<()> {
        PlatformRegistry::global().register_if_absent(Arc::new(Self::new(platform, devices)))?;
        Ok(())
    }

    /// Bytes currently allocated on a device.
    pub fn used_bytes(&self, device: usize) -> usize {
        self.arena.lock().used.get(device).copied().unwrap_or(0)
    }

    /// Number of live buffers over all devices.
    pub fn live_buffers(&self) -> usize {
        self.arena.lock().buffers.len()
    }

    fn check_len(&self, handle: &DeviceHandle, len: usize) -> ArrayResult<()> {
        if handle.bytes != len {
            return Err(ArrayError::backend(
                self.platform,
                format!("buffer of {} bytes accessed with {} bytes", handle.bytes, len),
            ));
        }
        Ok(())
    }
}

impl Backend for LoopbackBackend {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn name(&self) -> &str {
        "loopback"
    }

    fn device_count(&self) -> usize {
        self.devices
    }

    fn allocate(&self, device: usize, bytes: usize) -> ArrayResult<DeviceHandle> {
        if device >= self.devices {
            return Err(ArrayError::InvalidDevice {
                platform: self.platform,
                device: device as i32,
            });
        }
        let mut arena = self.arena.lock();
        if let Some(capacity) = self.capacity {
            if arena.used[device] + bytes > capacity {
                return Err(ArrayError::OutOfMemory {
                    location: Location::new(self.platform, device),
                    bytes,
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        arena.buffers.insert(id, vec![0; bytes]);
        arena.used[device] += bytes;
        trace!("{}/{}: allocated buffer {} ({} bytes)", self.platform, device, id, bytes);
        Ok(DeviceHandle { device, id, bytes })
    }

    fn release(&self, handle: &DeviceHandle) {
        let mut arena = self.arena.lock();
        if arena.buffers.remove(&handle.id).is_some() {
            arena.used[handle.device] -= handle.bytes;
            trace!("{}/{}: released buffer {}", self.platform, handle.device, handle.id);
        }
    }

    fn upload(&self, dst: &DeviceHandle, src: &[u8]) -> ArrayResult<()> {
        self.check_len(dst, src.len())?;
        let mut arena = self.arena.lock();
        arena.get_mut(self.platform, dst)?.copy_from_slice(src);
        Ok(())
    }

    fn download(&self, src: &DeviceHandle, dst: &mut [u8]) -> ArrayResult<()> {
        self.check_len(src, dst.len())?;
        let arena = self.arena.lock();
        dst.copy_from_slice(arena.get(self.platform, src)?);
        Ok(())
    }

    fn copy(&self, src: &DeviceHandle, dst: &DeviceHandle) -> ArrayResult<()> {
        self.check_len(dst, src.bytes)?;
        let mut arena = self.arena.lock();
        let bytes = arena.get(self.platform, src)?.clone();
        arena.get_mut(self.platform, dst)?.copy_from_slice(&bytes);
        Ok(())
    }

    fn fill(&self, dst: &DeviceHandle, pattern: &[u8]) -> ArrayResult<()> {
        check_pattern(self.platform, dst.bytes, pattern)?;
        let mut arena = self.arena.lock();
        for chunk in arena.get_mut(self.platform, dst)?.chunks_exact_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    fn unary(&self, kernel: &UnaryKernel, target: &KernelArray<'_>) -> ArrayResult<()> {
        let mut arena = self.arena.lock();
        let mut values = arena.take(self.platform, target.values)?;
        let mut status = match arena.take(self.platform, target.status) {
            Ok(status) => status,
            Err(e) => {
                arena.buffers.insert(target.values.id, values);
                return Err(e);
            }
        };

        let mut it = ElementIterMut::new(
            target.ty,
            target.components,
            &mut values,
            &mut status,
            0..target.tuples,
        );
        unary_block(kernel, &mut it);

        arena.buffers.insert(target.values.id, values);
        arena.buffers.insert(target.status.id, status);
        Ok(())
    }

    fn binary(
        &self,
        kernel: &BinaryKernel,
        target: &KernelArray<'_>,
        operand: &KernelOperand<'_>,
    ) -> ArrayResult<()> {
        let mut arena = self.arena.lock();
        // the operand is read before the target is taken, so aliasing reads a snapshot
        let (right_values, right_status) = match operand {
            KernelOperand::Scalar(_) => (Vec::new(), Vec::new()),
            KernelOperand::Array(array) => (
                arena.get(self.platform, array.values)?.clone(),
                arena.get(self.platform, array.status)?.clone(),
            ),
        };
        let mut values = arena.take(self.platform, target.values)?;
        let mut status = match arena.take(self.platform, target.status) {
            Ok(status) => status,
            Err(e) => {
                arena.buffers.insert(target.values.id, values);
                return Err(e);
            }
        };

        let mut left = ElementIterMut::new(
            target.ty,
            target.components,
            &mut values,
            &mut status,
            0..target.tuples,
        );
        let right = match operand {
            KernelOperand::Scalar(value) => RightBlock::Scalar(*value),
            KernelOperand::Array(array) => RightBlock::Array(ElementIter::new(
                array.ty,
                array.components,
                &right_values,
                &right_status,
                0..array.tuples,
            )),
        };
        binary_block(kernel, &mut left, right);

        arena.buffers.insert(target.values.id, values);
        arena.buffers.insert(target.status.id, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scalar::ScalarType;

    #[test]
    fn test_allocation_accounting() {
        let backend = LoopbackBackend::new(Platform::Cuda, 2);
        let a = backend.allocate(1, 64).unwrap();
        assert_eq!(backend.used_bytes(1), 64);
        assert_eq!(backend.used_bytes(0), 0);
        backend.release(&a);
        assert_eq!(backend.used_bytes(1), 0);
        assert_eq!(backend.live_buffers(), 0);
        assert!(matches!(
            backend.allocate(2, 8),
            Err(ArrayError::InvalidDevice { device: 2, .. })
        ));
    }

    #[test]
    fn test_capacity_limit() {
        let backend = LoopbackBackend::new(Platform::OpenCl, 1).with_capacity(100);
        let _a = backend.allocate(0, 80).unwrap();
        assert!(matches!(
            backend.allocate(0, 40),
            Err(ArrayError::OutOfMemory { bytes: 40, .. })
        ));
    }

    #[test]
    fn test_upload_fill_download() {
        let backend = LoopbackBackend::new(Platform::Cuda, 1);
        let handle = backend.allocate(0, 8).unwrap();
        backend.upload(&handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        backend.fill(&handle, &[9, 0]).unwrap();
        let mut out = [0u8; 8];
        backend.download(&handle, &mut out).unwrap();
        assert_eq!(out, [9, 0, 9, 0, 9, 0, 9, 0]);
        assert!(backend.fill(&handle, &[1, 2, 3]).is_err());
        assert!(backend.upload(&handle, &[0; 4]).is_err());
    }

    #[test]
    fn test_scalar_kernel() {
        let backend = LoopbackBackend::new(Platform::Cuda, 1);
        let values = backend.allocate(0, 12).unwrap();
        let status = backend.allocate(0, 3).unwrap();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        backend.upload(&values, &data).unwrap();
        backend.upload(&status, &[0, 1, 0]).unwrap();

        let target = KernelArray {
            ty: ScalarType::F32,
            tuples: 3,
            components: 1,
            values: &values,
            status: &status,
        };
        backend
            .binary(&BinaryKernel::Mul, &target, &KernelOperand::Scalar(2.0))
            .unwrap();

        let mut out = vec![0u8; 12];
        backend.download(&values, &mut out).unwrap();
        let out: Vec<f32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(out, vec![2.0, 2.0, 6.0]);
    }
}
