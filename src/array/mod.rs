//! Data arrays: tuples of values plus a per-tuple status mask.
//!
//! A [`DataArray`] holds two memory objects on the same (platform, device):
//! `tuples * components` values and one status byte per tuple. Cloning an
//! array shares both memories. [`DataArray::share_values`] shares the values
//! but gives the new array its own status, so masks can diverge per consumer.
//!
//! ```ignore
//! let a = DataArray::from_slice(&[1i32, 2, 3, 4], 1)?;
//! let mut b = a.share_values()?;
//! b.set_status(0, Status::Passive)?;   // a[0] stays Active
//! ```

pub mod iter;
pub mod ops;

use crate::core::convert::{read_f64, write_f64};
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::platform::{DeviceId, Location, Platform};
use crate::core::registry::registry;
use crate::core::scalar::{Element, ScalarType, Status};
use crate::memory::external::ExternalArray;
use crate::memory::{HostBytes, HostBytesMut, Memory};
use iter::{ElementIter, ElementIterMut};
use std::ops::Range;
use std::sync::Arc;

pub use ops::Operand;

/// What a copy duplicates and where it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyOptions {
    /// Target (platform, device); `None` keeps the source location.
    pub target: Option<(Platform, DeviceId)>,
    /// Duplicate values even when no migration is needed.
    pub copy_values: bool,
    /// Duplicate status even when no migration is needed.
    pub copy_status: bool,
}

impl CopyOptions {
    /// Share both sides on the same device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate both sides.
    pub fn deep() -> Self {
        Self::new().with_values().with_status()
    }

    /// Migrate to (platform, device).
    pub fn to(mut self, platform: Platform, device: DeviceId) -> Self {
        self.target = Some((platform, device));
        self
    }

    /// Force the values to be duplicated.
    pub fn with_values(mut self) -> Self {
        self.copy_values = true;
        self
    }

    /// Force the status to be duplicated.
    pub fn with_status(mut self) -> Self {
        self.copy_status = true;
        self
    }
}

/// Tuples of values with a per-tuple status mask.
#[derive(Debug, Clone)]
pub struct DataArray {
    tuples: usize,
    components: usize,
    values: Memory,
    status: Memory,
}

impl Default for DataArray {
    fn default() -> Self {
        Self {
            tuples: 0,
            components: 1,
            values: Memory::default(),
            status: Memory::empty(ScalarType::Status, Location::HOST),
        }
    }
}

impl DataArray {
    /// Allocate a zeroed, all-Active array.
    pub fn new(
        tuples: usize,
        components: usize,
        ty: ScalarType,
        platform: Platform,
        device: DeviceId,
    ) -> ArrayResult<Self> {
        let location = registry().resolve(platform, device)?;
        Self::new_on(tuples, components, ty, location)
    }

    /// Allocate a zeroed, all-Active array on a resolved location.
    pub fn new_on(
        tuples: usize,
        components: usize,
        ty: ScalarType,
        location: Location,
    ) -> ArrayResult<Self> {
        let len = tuples.checked_mul(components).ok_or_else(|| {
            ArrayError::SizeMismatch(format!("{} x {} values overflow", tuples, components))
        })?;
        Ok(Self {
            tuples,
            components,
            values: Memory::allocate_on(len, ty, location)?,
            status: Memory::allocate_on(tuples, ScalarType::Status, location)?,
        })
    }

    /// One-component array over `values`, all Active.
    pub fn from_values(values: Memory) -> ArrayResult<Self> {
        let tuples = values.len();
        Self::from_values_with_tuples(values, tuples)
    }

    /// Array of `tuples` tuples over `values`, all Active.
    ///
    /// The number of values must be a multiple of `tuples`.
    pub fn from_values_with_tuples(values: Memory, tuples: usize) -> ArrayResult<Self> {
        let components = components_for(values.len(), tuples)?;
        let status = Memory::allocate_on(tuples, ScalarType::Status, values.location())?;
        Ok(Self {
            tuples,
            components,
            values,
            status,
        })
    }

    /// Array over existing values and status, co-located on the values' device.
    pub fn from_parts(values: Memory, status: Memory) -> ArrayResult<Self> {
        let target = values.location();
        Self::assemble(values, status, target)
    }

    /// Array over existing values and status, both migrated to (platform, device).
    pub fn from_parts_on(
        values: Memory,
        status: Memory,
        platform: Platform,
        device: DeviceId,
    ) -> ArrayResult<Self> {
        let target = registry().resolve(platform, device)?;
        Self::assemble(values, status, target)
    }

    fn assemble(values: Memory, status: Memory, target: Location) -> ArrayResult<Self> {
        let tuples = status.len();
        let components = components_for(values.len(), tuples)?;
        let status = if status.scalar_type() == ScalarType::Status {
            status
        } else {
            status.cast(ScalarType::Status)?
        };
        Ok(Self {
            tuples,
            components,
            values: migrate_memory(values, target)?,
            status: migrate_memory(status, target)?,
        })
    }

    /// Copy Rust elements into a new host array of `components` per tuple.
    pub fn from_slice<T: Element>(data: &[T], components: usize) -> ArrayResult<Self> {
        let tuples = tuples_for(data.len(), components)?;
        Self::from_values_with_tuples(Memory::from_slice(data), tuples)
    }

    /// Encode `f64` values as type `ty` in a new host array.
    pub fn from_f64(ty: ScalarType, data: &[f64], components: usize) -> ArrayResult<Self> {
        let tuples = tuples_for(data.len(), components)?;
        Self::from_values_with_tuples(Memory::from_f64(ty, data)?, tuples)
    }

    /// Wrap an externally owned array without copying.
    pub fn from_external(array: Arc<dyn ExternalArray>) -> ArrayResult<Self> {
        let tuples = array.tuples();
        Self::from_values_with_tuples(Memory::from_external(array)?, tuples)
    }

    /// Copy according to `options`.
    ///
    /// Without a different target and without forcing, both sides are shared.
    /// Migrating always duplicates both sides on the target.
    pub fn copy_with(&self, options: &CopyOptions) -> ArrayResult<Self> {
        let target = match options.target {
            Some((platform, device)) => registry().resolve(platform, device)?,
            None => self.location(),
        };
        let moved = target != self.location();
        let values = if moved || options.copy_values {
            self.values.copy_to_location(target)?
        } else {
            self.values.clone()
        };
        let status = if moved || options.copy_status {
            self.status.copy_to_location(target)?
        } else {
            self.status.clone()
        };
        Ok(Self {
            tuples: self.tuples,
            components: self.components,
            values,
            status,
        })
    }

    /// Share the values, duplicate the status.
    pub fn share_values(&self) -> ArrayResult<Self> {
        self.copy_with(&CopyOptions::new().with_status())
    }

    /// Duplicate both sides on the same device.
    pub fn deep_copy(&self) -> ArrayResult<Self> {
        self.copy_with(&CopyOptions::deep())
    }

    /// Copy to (platform, device). Sharing when already there.
    pub fn to_device(&self, platform: Platform, device: DeviceId) -> ArrayResult<Self> {
        self.copy_with(&CopyOptions::new().to(platform, device))
    }

    /// Copy to a resolved location. Sharing when already there.
    pub fn to_location(&self, location: Location) -> ArrayResult<Self> {
        if location == self.location() {
            return Ok(self.clone());
        }
        Ok(Self {
            tuples: self.tuples,
            components: self.components,
            values: self.values.copy_to_location(location)?,
            status: self.status.copy_to_location(location)?,
        })
    }

    /// Move this array to (platform, device).
    pub fn migrate(&mut self, platform: Platform, device: DeviceId) -> ArrayResult<()> {
        let target = registry().resolve(platform, device)?;
        if target != self.location() {
            *self = self.to_location(target)?;
        }
        Ok(())
    }

    /// Stop sharing the values with other arrays.
    pub fn copy_values(&mut self) -> ArrayResult<()> {
        self.values = self.values.duplicate()?;
        Ok(())
    }

    /// Stop sharing the status with other arrays.
    pub fn copy_status(&mut self) -> ArrayResult<()> {
        self.status = self.status.duplicate()?;
        Ok(())
    }

    /// Number of tuples.
    pub fn tuples(&self) -> usize {
        self.tuples
    }

    /// Elements per tuple.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Scalar components per tuple, counting every component of vector elements.
    pub fn scalar_components(&self) -> usize {
        self.components * self.scalar_type().dimension()
    }

    /// Number of value elements, `tuples * components`.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no tuples.
    pub fn is_empty(&self) -> bool {
        self.tuples == 0
    }

    /// Element type of the values.
    pub fn scalar_type(&self) -> ScalarType {
        self.values.scalar_type()
    }

    /// (platform, device) of both memories.
    pub fn location(&self) -> Location {
        self.values.location()
    }

    /// Platform of both memories.
    pub fn platform(&self) -> Platform {
        self.values.platform()
    }

    /// Device of both memories.
    pub fn device(&self) -> usize {
        self.values.device()
    }

    /// Values memory.
    pub fn values(&self) -> &Memory {
        &self.values
    }

    /// Status memory.
    pub fn status_memory(&self) -> &Memory {
        &self.status
    }

    /// Whether two arrays share their values memory.
    pub fn shares_values_with(&self, other: &DataArray) -> bool {
        self.values.same_buffer(&other.values)
    }

    /// Whether two arrays share their status memory.
    pub fn shares_status_with(&self, other: &DataArray) -> bool {
        self.status.same_buffer(&other.status)
    }

    /// Read one scalar component of a host array.
    pub fn value(&self, tuple: usize, component: usize) -> ArrayResult<f64> {
        let offset = self.component_offset(tuple, component)?;
        let bytes = self.values.host_bytes()?;
        let ty = self.scalar_type().component_type();
        Ok(read_f64(ty, &bytes[offset..]))
    }

    /// Write one scalar component of a host array, saturating.
    ///
    /// The write is visible to every array sharing these values.
    pub fn set_value(&mut self, tuple: usize, component: usize, value: f64) -> ArrayResult<()> {
        let offset = self.component_offset(tuple, component)?;
        let ty = self.scalar_type().component_type();
        let mut bytes = self.values.host_bytes_mut()?;
        write_f64(ty, &mut bytes[offset..], value);
        Ok(())
    }

    /// Status of one tuple of a host array.
    pub fn status(&self, tuple: usize) -> ArrayResult<Status> {
        self.check_tuple(tuple)?;
        let bytes = self.status.host_bytes()?;
        Ok(Status::from_byte(bytes[tuple]))
    }

    /// Set the status of one tuple of a host array.
    pub fn set_status(&mut self, tuple: usize, status: Status) -> ArrayResult<()> {
        self.check_tuple(tuple)?;
        let mut bytes = self.status.host_bytes_mut()?;
        bytes[tuple] = status.to_byte();
        Ok(())
    }

    /// Overwrite the whole status mask of a host array.
    pub fn assign_status(&mut self, statuses: &[Status]) -> ArrayResult<()> {
        if statuses.len() != self.tuples {
            return Err(ArrayError::SizeMismatch(format!(
                "{} statuses for {} tuples",
                statuses.len(),
                self.tuples
            )));
        }
        let mut bytes = self.status.host_bytes_mut()?;
        for (byte, status) in bytes.iter_mut().zip(statuses) {
            *byte = status.to_byte();
        }
        Ok(())
    }

    /// Copy out the status mask from any device.
    pub fn status_vec(&self) -> ArrayResult<Vec<Status>> {
        Ok(self
            .status
            .to_bytes()?
            .into_iter()
            .map(Status::from_byte)
            .collect())
    }

    /// Number of Active tuples.
    pub fn count_active(&self) -> ArrayResult<usize> {
        Ok(self.status_vec()?.iter().filter(|s| s.is_active()).count())
    }

    /// Copy out the values as `f64` from any device.
    pub fn to_f64_vec(&self) -> ArrayResult<Vec<f64>> {
        self.values.to_f64_vec()
    }

    /// Copy out the values as Rust elements from any device.
    pub fn to_vec<T: Element>(&self) -> ArrayResult<Vec<T>> {
        self.values.to_vec()
    }

    /// Compare shape, type, values and status, wherever both arrays live.
    pub fn same_content(&self, other: &DataArray) -> ArrayResult<bool> {
        Ok(self.tuples == other.tuples
            && self.components == other.components
            && self.scalar_type() == other.scalar_type()
            && self.values.to_bytes()? == other.values.to_bytes()?
            && self.status.to_bytes()? == other.status.to_bytes()?)
    }

    /// Borrow a host array for reading.
    pub fn host_view(&self) -> ArrayResult<HostView<'_>> {
        Ok(HostView {
            ty: self.scalar_type(),
            components: self.components,
            tuples: self.tuples,
            values: self.values.host_bytes()?,
            status: self.status.host_bytes()?,
        })
    }

    /// Borrow a host array for writing.
    ///
    /// Externally owned values are replaced by a native copy first.
    pub fn host_view_mut(&mut self) -> ArrayResult<HostViewMut<'_>> {
        let ty = self.scalar_type();
        let (components, tuples) = (self.components, self.tuples);
        Ok(HostViewMut {
            ty,
            components,
            tuples,
            values: self.values.host_bytes_mut()?,
            status: self.status.host_bytes_mut()?,
        })
    }

    fn check_tuple(&self, tuple: usize) -> ArrayResult<()> {
        if tuple >= self.tuples {
            return Err(ArrayError::OutOfRange {
                index: tuple as isize,
                len: self.tuples,
            });
        }
        Ok(())
    }

    fn component_offset(&self, tuple: usize, component: usize) -> ArrayResult<usize> {
        self.check_tuple(tuple)?;
        let per_tuple = self.scalar_components();
        if component >= per_tuple {
            return Err(ArrayError::OutOfRange {
                index: component as isize,
                len: per_tuple,
            });
        }
        let step = self.scalar_type().component_type().size();
        Ok((tuple * per_tuple + component) * step)
    }
}

fn components_for(len: usize, tuples: usize) -> ArrayResult<usize> {
    match (len, tuples) {
        (0, 0) => Ok(1),
        (_, 0) => Err(ArrayError::SizeMismatch(format!(
            "{} values cannot form zero tuples",
            len
        ))),
        (len, tuples) if len % tuples == 0 => Ok(len / tuples),
        (len, tuples) => Err(ArrayError::SizeMismatch(format!(
            "{} values do not divide into {} tuples",
            len, tuples
        ))),
    }
}

fn tuples_for(len: usize, components: usize) -> ArrayResult<usize> {
    if components == 0 || len % components != 0 {
        return Err(ArrayError::SizeMismatch(format!(
            "{} values do not form tuples of {} components",
            len, components
        )));
    }
    Ok(len / components)
}

fn migrate_memory(memory: Memory, target: Location) -> ArrayResult<Memory> {
    if memory.location() == target {
        Ok(memory)
    } else {
        memory.copy_to_location(target)
    }
}

/// Read access to the bytes of a host array.
pub struct HostView<'a> {
    ty: ScalarType,
    components: usize,
    tuples: usize,
    values: HostBytes<'a>,
    status: HostBytes<'a>,
}

impl HostView<'_> {
    /// Number of tuples.
    pub fn tuples(&self) -> usize {
        self.tuples
    }

    /// Iterate tuples `range`.
    pub fn iter(&self, range: Range<usize>) -> ElementIter<'_> {
        ElementIter::new(self.ty, self.components, &self.values, &self.status, range)
    }

    /// Iterate every tuple.
    pub fn iter_all(&self) -> ElementIter<'_> {
        self.iter(0..self.tuples)
    }

    /// The packed value bytes and the status bytes.
    pub(crate) fn bytes(&self) -> (&[u8], &[u8]) {
        (&self.values, &self.status)
    }
}

/// Write access to the bytes of a host array.
pub struct HostViewMut<'a> {
    ty: ScalarType,
    components: usize,
    tuples: usize,
    values: HostBytesMut<'a>,
    status: HostBytesMut<'a>,
}

impl HostViewMut<'_> {
    /// Number of tuples.
    pub fn tuples(&self) -> usize {
        self.tuples
    }

    /// Element type.
    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    /// Elements per tuple.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Iterate tuples `range` for reading.
    pub fn iter(&self, range: Range<usize>) -> ElementIter<'_> {
        ElementIter::new(self.ty, self.components, &self.values, &self.status, range)
    }

    /// Iterate tuples `range` for writing.
    pub fn iter_mut(&mut self, range: Range<usize>) -> ElementIterMut<'_> {
        ElementIterMut::new(
            self.ty,
            self.components,
            &mut self.values,
            &mut self.status,
            range,
        )
    }

    /// Split into the packed value bytes and the status bytes.
    pub(crate) fn bytes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut *self.values, &mut *self.status)
    }
}
