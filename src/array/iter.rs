//! Host element iterators.
//!
//! The iterators walk a half-open tuple range component by component, reading
//! and writing values as `f64` with saturating conversion to the element type.
//! They borrow host bytes, so they cannot outlive the view they come from.

use crate::core::convert::{read_f64, write_f64};
use crate::core::scalar::{ScalarType, Status};
use std::ops::Range;

/// Position logic shared by the constant and mutable iterators.
#[derive(Debug, Clone)]
struct Cursor {
    ty: ScalarType,
    step: usize,
    per_tuple: usize,
    tuple: usize,
    end: usize,
    component: usize,
}

impl Cursor {
    fn new(ty: ScalarType, components: usize, values: usize, status: usize, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= status,
            "tuple range {:?} exceeds {} tuples",
            range,
            status
        );
        let comp = ty.component_type();
        let per_tuple = components * ty.dimension();
        assert!(
            values >= status * per_tuple * comp.size(),
            "values buffer too small for {} tuples",
            status
        );
        // a tuple without components has nothing to visit
        let end = if per_tuple == 0 { range.start } else { range.end };
        Self {
            ty: comp,
            step: comp.size(),
            per_tuple,
            tuple: range.start,
            end,
            component: 0,
        }
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.tuple >= self.end
    }

    #[inline]
    fn advance(&mut self) {
        self.component += 1;
        if self.component == self.per_tuple {
            self.component = 0;
            self.tuple += 1;
        }
    }

    #[inline]
    fn next_tuple(&mut self) {
        self.component = 0;
        self.tuple += 1;
    }

    #[inline]
    fn offset(&self) -> usize {
        (self.tuple * self.per_tuple + self.component) * self.step
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.end.saturating_sub(self.tuple)
    }
}

/// Read-only iterator over a tuple range.
#[derive(Debug, Clone)]
pub struct ElementIter<'a> {
    cursor: Cursor,
    values: &'a [u8],
    status: &'a [u8],
}

impl<'a> ElementIter<'a> {
    /// Iterate tuples `range` of packed host buffers.
    ///
    /// `status` holds one byte per tuple; `values` holds `components` elements
    /// of type `ty` per tuple.
    ///
    /// # Panics
    ///
    /// Panics if the range or the buffers do not cover each other.
    pub fn new(
        ty: ScalarType,
        components: usize,
        values: &'a [u8],
        status: &'a [u8],
        range: Range<usize>,
    ) -> Self {
        let cursor = Cursor::new(ty, components, values.len(), status.len(), range);
        Self {
            cursor,
            values,
            status,
        }
    }

    /// Whether the range is exhausted.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.cursor.is_at_end()
    }

    /// Move to the next component, crossing into the next tuple when needed.
    #[inline]
    pub fn advance(&mut self) {
        self.cursor.advance()
    }

    /// Skip the rest of the current tuple.
    #[inline]
    pub fn next_tuple(&mut self) {
        self.cursor.next_tuple()
    }

    /// Index of the current tuple.
    pub fn tuple_index(&self) -> usize {
        self.cursor.tuple
    }

    /// Index of the current scalar component within its tuple.
    pub fn component_index(&self) -> usize {
        self.cursor.component
    }

    /// Number of tuples left, including the current one.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Read the current component.
    #[inline]
    pub fn get_component(&self) -> f64 {
        read_f64(self.cursor.ty, &self.values[self.cursor.offset()..])
    }

    /// Status of the current tuple.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_byte(self.status[self.cursor.tuple])
    }
}

/// Mutable iterator over a tuple range.
#[derive(Debug)]
pub struct ElementIterMut<'a> {
    cursor: Cursor,
    values: &'a mut [u8],
    status: &'a mut [u8],
}

impl<'a> ElementIterMut<'a> {
    /// Iterate tuples `range` of packed host buffers for writing.
    ///
    /// # Panics
    ///
    /// Panics if the range or the buffers do not cover each other.
    pub fn new(
        ty: ScalarType,
        components: usize,
        values: &'a mut [u8],
        status: &'a mut [u8],
        range: Range<usize>,
    ) -> Self {
        let cursor = Cursor::new(ty, components, values.len(), status.len(), range);
        Self {
            cursor,
            values,
            status,
        }
    }

    /// Whether the range is exhausted.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.cursor.is_at_end()
    }

    /// Move to the next component, crossing into the next tuple when needed.
    #[inline]
    pub fn advance(&mut self) {
        self.cursor.advance()
    }

    /// Skip the rest of the current tuple.
    #[inline]
    pub fn next_tuple(&mut self) {
        self.cursor.next_tuple()
    }

    /// Index of the current tuple.
    pub fn tuple_index(&self) -> usize {
        self.cursor.tuple
    }

    /// Index of the current scalar component within its tuple.
    pub fn component_index(&self) -> usize {
        self.cursor.component
    }

    /// Number of tuples left, including the current one.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Read the current component.
    #[inline]
    pub fn get_component(&self) -> f64 {
        read_f64(self.cursor.ty, &self.values[self.cursor.offset()..])
    }

    /// Write the current component, saturating to the element type.
    #[inline]
    pub fn set_component(&mut self, value: f64) {
        let offset = self.cursor.offset();
        write_f64(self.cursor.ty, &mut self.values[offset..], value)
    }

    /// Status of the current tuple.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_byte(self.status[self.cursor.tuple])
    }

    /// Set the status of the current tuple.
    #[inline]
    pub fn set_status(&mut self, status: Status) {
        self.status[self.cursor.tuple] = status.to_byte();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walks_components_then_tuples() {
        let values: Vec<u8> = [1i16, 2, 3, 4, 5, 6]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let status = [0u8, 1, 0];
        let mut it = ElementIter::new(ScalarType::I16, 2, &values, &status, 1..3);

        let mut seen = Vec::new();
        while !it.is_at_end() {
            seen.push((it.tuple_index(), it.component_index(), it.get_component(), it.status()));
            it.advance();
        }
        assert_eq!(
            seen,
            vec![
                (1, 0, 3.0, Status::Passive),
                (1, 1, 4.0, Status::Passive),
                (2, 0, 5.0, Status::Active),
                (2, 1, 6.0, Status::Active),
            ]
        );
    }

    #[test]
    fn test_empty_range() {
        let it = ElementIter::new(ScalarType::F32, 1, &[], &[], 0..0);
        assert!(it.is_at_end());
        assert_eq!(it.remaining(), 0);
    }

    #[test]
    fn test_set_component_saturates() {
        let mut values = vec![0u8; 3];
        let mut status = vec![0u8; 3];
        let mut it = ElementIterMut::new(ScalarType::U8, 1, &mut values, &mut status, 0..3);
        it.set_component(300.0);
        it.advance();
        it.set_component(-4.0);
        it.set_status(Status::Passive);
        it.next_tuple();
        it.set_component(7.6);
        it.advance();
        assert!(it.is_at_end());
        assert_eq!(values, vec![255, 0, 7]);
        assert_eq!(status, vec![0, 1, 0]);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_range_precondition() {
        let values = [0u8; 4];
        let status = [0u8; 4];
        let _ = ElementIter::new(ScalarType::U8, 1, &values, &status, 2..5);
    }
}
