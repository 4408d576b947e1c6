//! Contiguous memory objects.
//!
//! A [`Memory`] is a shared handle to a linear buffer of `len` elements of one
//! [`ScalarType`] living on one (platform, device). Clones share the buffer.
//! The buffer is either:
//! - host memory guarded by a reader/writer lock,
//! - a device buffer owned by the backend that allocated it,
//! - a host array owned by an external library (see [`external`]).
//!
//! Device buffers are released through their backend when the last handle
//! drops, if the memory owns them.

pub mod external;

use crate::backend::{Backend, DeviceHandle};
use crate::core::convert::{cast_slice, check_cast, encode_element, read_f64};
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::platform::{DeviceId, Location, Platform};
use crate::core::registry::{registry, ActiveScope};
use crate::core::scalar::{Element, ScalarType};
use external::ExternalArray;
use log::{debug, trace};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

enum Storage {
    Empty,
    Host(RwLock<Vec<u8>>),
    Device {
        backend: Arc<dyn Backend>,
        handle: DeviceHandle,
    },
    External(Arc<dyn ExternalArray>),
}

struct MemoryInner {
    location: Location,
    ty: ScalarType,
    len: usize,
    owner: bool,
    storage: Storage,
}

impl Drop for MemoryInner {
    fn drop(&mut self) {
        if let Storage::Device { backend, handle } = &self.storage {
            if self.owner {
                let _scope = enter(self.location).ok();
                backend.release(handle);
                trace!("Freed {} bytes on {}", handle.bytes, self.location);
            }
        }
    }
}

/// Make the device of `location` active for the duration of a backend call.
pub(crate) fn enter(location: Location) -> ArrayResult<ActiveScope<'static>> {
    registry().enter(location.platform, location.device as DeviceId)
}

fn host_zeroed(bytes: usize) -> ArrayResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes)
        .map_err(|_| ArrayError::OutOfMemory {
            location: Location::HOST,
            bytes,
        })?;
    buffer.resize(bytes, 0);
    Ok(buffer)
}

fn byte_len(len: usize, ty: ScalarType, location: Location) -> ArrayResult<usize> {
    len.checked_mul(ty.size()).ok_or(ArrayError::OutOfMemory {
        location,
        bytes: usize::MAX,
    })
}

/// Host bytes borrowed from a memory object.
pub(crate) enum HostBytes<'a> {
    Empty,
    Locked(RwLockReadGuard<'a, Vec<u8>>),
    External(&'a [u8]),
}

impl Deref for HostBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            HostBytes::Empty => &[],
            HostBytes::Locked(guard) => guard.as_slice(),
            HostBytes::External(bytes) => bytes,
        }
    }
}

/// Host bytes borrowed for writing.
pub(crate) enum HostBytesMut<'a> {
    Empty,
    Locked(RwLockWriteGuard<'a, Vec<u8>>),
}

impl Deref for HostBytesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            HostBytesMut::Empty => &[],
            HostBytesMut::Locked(guard) => guard.as_slice(),
        }
    }
}

impl DerefMut for HostBytesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            HostBytesMut::Empty => &mut [],
            HostBytesMut::Locked(guard) => guard.as_mut_slice(),
        }
    }
}

/// Shared handle to a linear typed buffer on one device.
#[derive(Clone)]
pub struct Memory {
    inner: Arc<MemoryInner>,
}

impl Memory {
    fn from_storage(location: Location, ty: ScalarType, len: usize, owner: bool, storage: Storage) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                location,
                ty,
                len,
                owner,
                storage,
            }),
        }
    }

    /// An empty memory of type `ty` on `location`.
    pub fn empty(ty: ScalarType, location: Location) -> Self {
        Self::from_storage(location, ty, 0, true, Storage::Empty)
    }

    /// Allocate `len` zeroed elements.
    ///
    /// `Platform::Default` and device `-1` resolve to the active pair.
    pub fn allocate(len: usize, ty: ScalarType, platform: Platform, device: DeviceId) -> ArrayResult<Self> {
        let location = registry().resolve(platform, device)?;
        Self::allocate_on(len, ty, location)
    }

    /// Allocate `len` zeroed elements on a resolved location.
    pub fn allocate_on(len: usize, ty: ScalarType, location: Location) -> ArrayResult<Self> {
        if len == 0 {
            return Ok(Self::empty(ty, location));
        }
        let bytes = byte_len(len, ty, location)?;
        let storage = if location.is_host() {
            Storage::Host(RwLock::new(host_zeroed(bytes)?))
        } else {
            let backend = registry().backend(location.platform)?;
            let handle = {
                let _scope = enter(location)?;
                backend.allocate(location.device, bytes)?
            };
            Storage::Device { backend, handle }
        };
        trace!("Allocated {} x {} on {}", len, ty, location);
        Ok(Self::from_storage(location, ty, len, true, storage))
    }

    /// Take ownership of packed host bytes.
    pub fn from_bytes(ty: ScalarType, bytes: Vec<u8>) -> ArrayResult<Self> {
        if bytes.len() % ty.size() != 0 {
            return Err(ArrayError::SizeMismatch(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                ty
            )));
        }
        let len = bytes.len() / ty.size();
        if len == 0 {
            return Ok(Self::empty(ty, Location::HOST));
        }
        Ok(Self::from_storage(
            Location::HOST,
            ty,
            len,
            true,
            Storage::Host(RwLock::new(bytes)),
        ))
    }

    /// Copy a slice of Rust elements into new host memory.
    pub fn from_slice<T: Element>(data: &[T]) -> Self {
        let bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
        let len = data.len();
        if len == 0 {
            return Self::empty(T::TYPE, Location::HOST);
        }
        Self::from_storage(Location::HOST, T::TYPE, len, true, Storage::Host(RwLock::new(bytes)))
    }

    /// Encode `f64` values as elements of type `ty` in new host memory.
    pub fn from_f64(ty: ScalarType, data: &[f64]) -> ArrayResult<Self> {
        let mut bytes = host_zeroed(byte_len(data.len(), ty, Location::HOST)?)?;
        for (value, chunk) in data.iter().zip(bytes.chunks_exact_mut(ty.size())) {
            chunk.copy_from_slice(&encode_element(ty, *value));
        }
        Self::from_bytes(ty, bytes)
    }

    /// Wrap a buffer allocated by `backend`.
    ///
    /// When `owner` is set the buffer is released once the last handle drops.
    pub fn wrap_device(
        backend: Arc<dyn Backend>,
        handle: DeviceHandle,
        ty: ScalarType,
        len: usize,
        owner: bool,
    ) -> ArrayResult<Self> {
        let location = Location::new(backend.platform(), handle.device);
        if handle.bytes != byte_len(len, ty, location)? {
            return Err(ArrayError::SizeMismatch(format!(
                "device buffer of {} bytes cannot hold {} x {}",
                handle.bytes, len, ty
            )));
        }
        Ok(Self::from_storage(
            location,
            ty,
            len,
            owner,
            Storage::Device { backend, handle },
        ))
    }

    /// Wrap an array owned by an external library without copying.
    ///
    /// The memory reports the host as its location and does not own the array.
    pub fn from_external(array: Arc<dyn ExternalArray>) -> ArrayResult<Self> {
        let ty = array.external_type()?.scalar_type()?;
        let len = array.tuples() * array.components();
        if array.as_bytes().len() != byte_len(len, ty, Location::HOST)? {
            return Err(ArrayError::SizeMismatch(format!(
                "external array of {} bytes does not hold {} x {}",
                array.as_bytes().len(),
                len,
                ty
            )));
        }
        Ok(Self::from_storage(
            Location::HOST,
            ty,
            len,
            false,
            Storage::External(array),
        ))
    }

    /// Get the (platform, device) holding the buffer.
    pub fn location(&self) -> Location {
        self.inner.location
    }

    /// Get the platform holding the buffer.
    pub fn platform(&self) -> Platform {
        self.inner.location.platform
    }

    /// Get the device holding the buffer.
    pub fn device(&self) -> usize {
        self.inner.location.device
    }

    /// Get the element type.
    pub fn scalar_type(&self) -> ScalarType {
        self.inner.ty
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the memory holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Size in bytes, `len * type size`.
    pub fn size_in_bytes(&self) -> usize {
        self.inner.len * self.inner.ty.size()
    }

    /// Whether the buffer is released with this memory.
    pub fn is_owner(&self) -> bool {
        self.inner.owner
    }

    /// Whether the buffer belongs to an external library.
    pub fn is_external(&self) -> bool {
        matches!(self.inner.storage, Storage::External(_))
    }

    /// Whether two handles refer to the same buffer.
    pub fn same_buffer(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of handles sharing this buffer.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Copy to another (platform, device).
    ///
    /// Copying to the same pair is a deep copy. Copies between devices may
    /// stage through host memory.
    pub fn copy_to(&self, platform: Platform, device: DeviceId) -> ArrayResult<Memory> {
        let target = registry().resolve(platform, device)?;
        self.copy_to_location(target)
    }

    /// Deep copy on the same (platform, device).
    pub fn duplicate(&self) -> ArrayResult<Memory> {
        self.copy_to_location(self.location())
    }

    /// Copy to a resolved location.
    pub fn copy_to_location(&self, target: Location) -> ArrayResult<Memory> {
        let out = Memory::allocate_on(self.len(), self.scalar_type(), target)?;
        if self.is_empty() {
            return Ok(out);
        }
        match (&self.inner.storage, &out.inner.storage) {
            (
                Storage::Device {
                    backend: src_backend,
                    handle: src,
                },
                Storage::Device {
                    backend: dst_backend,
                    handle: dst,
                },
            ) if self.location() == target && Arc::ptr_eq(src_backend, dst_backend) => {
                let _scope = enter(target)?;
                src_backend.copy(src, dst)?;
            }
            (_, Storage::Host(lock)) => {
                let mut dst = lock.write();
                self.read_into(&mut dst)?;
            }
            (_, Storage::Device { backend, handle }) => {
                let staged = self.to_bytes()?;
                let _scope = enter(target)?;
                backend.upload(handle, &staged)?;
            }
            (_, Storage::Empty | Storage::External(_)) => {}
        }
        if self.location() != target {
            debug!(
                "Migrated {} bytes {} -> {}",
                self.size_in_bytes(),
                self.location(),
                target
            );
        }
        Ok(out)
    }

    /// Convert every element to type `to` on the same device.
    ///
    /// Conversion saturates; device memory is converted through a host stage.
    pub fn cast(&self, to: ScalarType) -> ArrayResult<Memory> {
        check_cast(self.scalar_type(), to)?;
        if to == self.scalar_type() {
            return self.duplicate();
        }
        let mut converted = host_zeroed(byte_len(self.len(), to, Location::HOST)?)?;
        if self.location().is_host() {
            let src = self.host_bytes()?;
            cast_slice(self.scalar_type(), &src, to, &mut converted)?;
        } else {
            let staged = self.to_bytes()?;
            cast_slice(self.scalar_type(), &staged, to, &mut converted)?;
        }
        let host = Memory::from_bytes(to, converted)?;
        if self.location().is_host() {
            Ok(host)
        } else {
            host.copy_to_location(self.location())
        }
    }

    /// Write `value` to every element, saturating to the element type.
    ///
    /// External memory is first replaced by a native host copy.
    pub fn fill(&mut self, value: f64) -> ArrayResult<()> {
        let pattern = encode_element(self.scalar_type(), value);
        self.fill_pattern(&pattern)
    }

    /// Repeat one encoded element over the whole buffer.
    pub(crate) fn fill_pattern(&mut self, pattern: &[u8]) -> ArrayResult<()> {
        if self.is_external() {
            self.make_native()?;
        }
        match &self.inner.storage {
            Storage::Empty | Storage::External(_) => {}
            Storage::Host(lock) => {
                for chunk in lock.write().chunks_exact_mut(pattern.len()) {
                    chunk.copy_from_slice(pattern);
                }
            }
            Storage::Device { backend, handle } => {
                let _scope = enter(self.location())?;
                backend.fill(handle, pattern)?;
            }
        }
        Ok(())
    }

    /// Release the buffer if owned and leave an empty memory.
    pub fn free(&mut self) {
        *self = Memory::empty(self.scalar_type(), self.location());
    }

    /// Copy the whole buffer into host bytes.
    pub fn to_bytes(&self) -> ArrayResult<Vec<u8>> {
        match &self.inner.storage {
            Storage::Empty => Ok(Vec::new()),
            Storage::Host(lock) => Ok(lock.read().clone()),
            Storage::External(array) => Ok(array.as_bytes().to_vec()),
            Storage::Device { backend, handle } => {
                let mut out = host_zeroed(handle.bytes)?;
                let _scope = enter(self.location())?;
                backend.download(handle, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Copy out as Rust elements. `T` must match the element type.
    pub fn to_vec<T: Element>(&self) -> ArrayResult<Vec<T>> {
        if T::TYPE != self.scalar_type() {
            return Err(ArrayError::InvalidConversion {
                from: self.scalar_type(),
                to: T::TYPE,
            });
        }
        Ok(bytemuck::pod_collect_to_vec(&self.to_bytes()?))
    }

    /// Copy out as `f64`, for one-component element types.
    pub fn to_f64_vec(&self) -> ArrayResult<Vec<f64>> {
        let ty = self.scalar_type();
        if ty.dimension() != 1 {
            return Err(ArrayError::unsupported_type(ty, "for conversion to f64"));
        }
        let bytes = self.to_bytes()?;
        Ok(bytes.chunks_exact(ty.size()).map(|c| read_f64(ty, c)).collect())
    }

    fn read_into(&self, dst: &mut [u8]) -> ArrayResult<()> {
        match &self.inner.storage {
            Storage::Empty => Ok(()),
            Storage::Host(lock) => {
                dst.copy_from_slice(&lock.read());
                Ok(())
            }
            Storage::External(array) => {
                dst.copy_from_slice(array.as_bytes());
                Ok(())
            }
            Storage::Device { backend, handle } => {
                let _scope = enter(self.location())?;
                backend.download(handle, dst)
            }
        }
    }

    /// Replace external storage by a native host copy.
    pub(crate) fn make_native(&mut self) -> ArrayResult<()> {
        if self.is_external() {
            debug!("Copying {} external bytes into native memory", self.size_in_bytes());
            *self = self.copy_to_location(Location::HOST)?;
        }
        Ok(())
    }

    /// Borrow host bytes for reading.
    pub(crate) fn host_bytes(&self) -> ArrayResult<HostBytes<'_>> {
        match &self.inner.storage {
            Storage::Empty => Ok(HostBytes::Empty),
            Storage::Host(lock) => Ok(HostBytes::Locked(lock.read())),
            Storage::External(array) => Ok(HostBytes::External(array.as_bytes())),
            Storage::Device { .. } => Err(ArrayError::DeviceMismatch {
                expected: Location::HOST,
                got: self.location(),
            }),
        }
    }

    /// Borrow host bytes for writing. External memory becomes native first.
    pub(crate) fn host_bytes_mut(&mut self) -> ArrayResult<HostBytesMut<'_>> {
        self.make_native()?;
        match &self.inner.storage {
            Storage::Empty | Storage::External(_) => Ok(HostBytesMut::Empty),
            Storage::Host(lock) => Ok(HostBytesMut::Locked(lock.write())),
            Storage::Device { .. } => Err(ArrayError::DeviceMismatch {
                expected: Location::HOST,
                got: self.location(),
            }),
        }
    }

    /// Get the backend and handle of device memory.
    pub(crate) fn device_buffer(&self) -> Option<(&Arc<dyn Backend>, &DeviceHandle)> {
        match &self.inner.storage {
            Storage::Device { backend, handle } => Some((backend, handle)),
            _ => None,
        }
    }

    pub(crate) fn external_array(&self) -> Option<&Arc<dyn ExternalArray>> {
        match &self.inner.storage {
            Storage::External(array) => Some(array),
            _ => None,
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::empty(ScalarType::REAL, Location::HOST)
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.storage {
            Storage::Empty => "empty",
            Storage::Host(_) => "host",
            Storage::Device { .. } => "device",
            Storage::External(_) => "external",
        };
        f.debug_struct("Memory")
            .field("location", &self.inner.location)
            .field("type", &self.inner.ty)
            .field("len", &self.inner.len)
            .field("owner", &self.inner.owner)
            .field("storage", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::LoopbackBackend;

    #[test]
    fn test_allocate_zeroed() {
        let memory = Memory::allocate(4, ScalarType::I32, Platform::Cpu, 0).unwrap();
        assert_eq!(memory.size_in_bytes(), 16);
        assert_eq!(memory.to_vec::<i32>().unwrap(), vec![0; 4]);
        assert!(memory.is_owner());
        assert_eq!(memory.location(), Location::HOST);
    }

    #[test]
    fn test_empty_has_no_buffer() {
        let memory = Memory::allocate(0, ScalarType::F32, Platform::Cpu, 0).unwrap();
        assert!(memory.is_empty());
        assert!(memory.to_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let source = Memory::from_slice(&[1.0f64, 2.0, 3.0]);
        let mut copy = source.duplicate().unwrap();
        assert!(!copy.same_buffer(&source));
        copy.fill(7.0).unwrap();
        assert_eq!(source.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(copy.to_vec::<f64>().unwrap(), vec![7.0; 3]);
    }

    #[test]
    fn test_clone_shares() {
        let source = Memory::from_slice(&[1u8, 2]);
        let mut shared = source.clone();
        assert!(shared.same_buffer(&source));
        shared.fill(5.0).unwrap();
        assert_eq!(source.to_vec::<u8>().unwrap(), vec![5, 5]);
        shared.free();
        assert!(shared.is_empty());
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_cast_saturates() {
        let source = Memory::from_slice(&[0u8, 127, 255]);
        let cast = source.cast(ScalarType::I8).unwrap();
        assert_eq!(cast.to_vec::<i8>().unwrap(), vec![0, 127, 127]);
        assert!(matches!(
            Memory::from_slice(&[1.0f32; 3])
                .cast(ScalarType::F32x3)
                .map(|m| m.len()),
            Ok(3)
        ));
    }

    #[test]
    fn test_fill_saturates() {
        let mut memory = Memory::allocate(3, ScalarType::I8, Platform::Cpu, 0).unwrap();
        memory.fill(1000.0).unwrap();
        assert_eq!(memory.to_vec::<i8>().unwrap(), vec![127; 3]);
    }

    #[test]
    fn test_to_vec_type_check() {
        let memory = Memory::from_slice(&[1i16, 2]);
        assert!(matches!(
            memory.to_vec::<u16>(),
            Err(ArrayError::InvalidConversion { .. })
        ));
        assert_eq!(memory.to_f64_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_device_round_trip() {
        LoopbackBackend::install(Platform::Cuda, 2).unwrap();
        let source = Memory::from_slice(&[1.5f32, -2.0]);
        let device = source.copy_to(Platform::Cuda, 1).unwrap();
        assert_eq!(device.location(), Location::new(Platform::Cuda, 1));
        assert!(matches!(
            device.host_bytes(),
            Err(ArrayError::DeviceMismatch { .. })
        ));

        let mut moved = device.copy_to(Platform::Cuda, 0).unwrap();
        moved.fill(3.0).unwrap();
        assert_eq!(device.to_vec::<f32>().unwrap(), vec![1.5, -2.0]);
        assert_eq!(moved.to_vec::<f32>().unwrap(), vec![3.0, 3.0]);

        let cast = device.cast(ScalarType::I16).unwrap();
        assert_eq!(cast.location(), device.location());
        assert_eq!(cast.to_vec::<i16>().unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_device_free_releases() {
        let backend = Arc::new(LoopbackBackend::new(Platform::OpenCl, 1));
        let handle = backend.allocate(0, 16).unwrap();
        let shared: Arc<dyn Backend> = backend.clone();
        let mut memory = Memory::wrap_device(shared, handle, ScalarType::F64, 2, true).unwrap();
        let other = memory.clone();
        memory.free();
        assert_eq!(backend.live_buffers(), 1);
        drop(other);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_borrowed_device_memory_is_kept() {
        let backend = Arc::new(LoopbackBackend::new(Platform::OpenCl, 1));
        let handle = backend.allocate(0, 4).unwrap();
        let shared: Arc<dyn Backend> = backend.clone();
        let memory = Memory::wrap_device(shared, handle, ScalarType::U8, 4, false).unwrap();
        drop(memory);
        assert_eq!(backend.live_buffers(), 1);
        assert!(Memory::wrap_device(backend, handle, ScalarType::U8, 3, false).is_err());
    }
}
