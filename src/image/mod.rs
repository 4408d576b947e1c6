//! Images: a data array sampled on a regular grid.
//!
//! An [`Image`] pairs one tuple per grid point with the grid geometry.
//! Arithmetic runs through the data-array operations and keeps the grid;
//! binary operations between images require equal grids.

pub mod grid;
pub mod io;

use crate::array::{DataArray, Operand};
use crate::core::error::{ArrayError, ArrayResult, FilterResult};
use crate::core::platform::{DeviceId, Platform};
use crate::core::scalar::ScalarType;
use crate::filters::operators::BinaryKernel;
use nalgebra::Point3;
use std::ops::{Deref, DerefMut};
use std::path::Path;

pub use grid::RegularGrid;
pub use io::{ImageReader, ImageWriter, RasterIo};

/// Right-hand side of an image operation.
#[derive(Debug, Clone, Copy)]
pub enum ImageOperand<'a> {
    /// The same constant for every component.
    Scalar(f64),
    /// An image on an equal grid.
    Image(&'a Image),
}

impl From<f64> for ImageOperand<'_> {
    fn from(value: f64) -> Self {
        ImageOperand::Scalar(value)
    }
}

impl<'a> From<&'a Image> for ImageOperand<'a> {
    fn from(image: &'a Image) -> Self {
        ImageOperand::Image(image)
    }
}

/// A data array with grid geometry.
#[derive(Debug, Clone)]
pub struct Image {
    grid: RegularGrid,
    array: DataArray,
}

impl Image {
    /// Allocate a zeroed, all-Active image.
    pub fn new(
        grid: RegularGrid,
        components: usize,
        ty: ScalarType,
        platform: Platform,
        device: DeviceId,
    ) -> ArrayResult<Self> {
        let array = DataArray::new(grid.number_of_points(), components, ty, platform, device)?;
        Ok(Self { grid, array })
    }

    /// Attach a grid to an array holding one tuple per grid point.
    pub fn from_array(grid: RegularGrid, array: DataArray) -> ArrayResult<Self> {
        check_points(&grid, &array)?;
        Ok(Self { grid, array })
    }

    /// Read an image through `reader`.
    pub fn read(reader: &dyn ImageReader, path: &Path) -> ArrayResult<Self> {
        reader.read(path)
    }

    /// Write this image through `writer`.
    pub fn write(&self, writer: &dyn ImageWriter, path: &Path) -> ArrayResult<()> {
        writer.write(self, path)
    }

    /// Grid geometry.
    pub fn grid(&self) -> &RegularGrid {
        &self.grid
    }

    /// Replace the grid with one of the same number of points.
    pub fn set_grid(&mut self, grid: RegularGrid) -> ArrayResult<()> {
        check_points(&grid, &self.array)?;
        self.grid = grid;
        Ok(())
    }

    /// The sampled values.
    pub fn array(&self) -> &DataArray {
        &self.array
    }

    /// Split into grid and array.
    pub fn into_parts(self) -> (RegularGrid, DataArray) {
        (self.grid, self.array)
    }

    /// Read component `c` of the voxel at (i, j, k) in the first frame.
    pub fn voxel(&self, i: usize, j: usize, k: usize, c: usize) -> ArrayResult<f64> {
        self.array.value(self.grid.index_3d(i, j, k)?, c)
    }

    /// Write component `c` of the voxel at (i, j, k) in the first frame.
    pub fn set_voxel(&mut self, i: usize, j: usize, k: usize, c: usize, value: f64) -> ArrayResult<()> {
        let index = self.grid.index_3d(i, j, k)?;
        self.array.set_value(index, c, value)
    }

    /// World position of the voxel with linear `index`.
    pub fn index_to_world(&self, index: usize) -> ArrayResult<Point3<f64>> {
        self.grid.index_to_world(index)
    }

    /// Linear index of the voxel nearest to a world position.
    pub fn world_to_index(&self, world: &Point3<f64>) -> Option<usize> {
        self.grid.world_to_index(world)
    }

    fn operand<'a>(&self, rhs: ImageOperand<'a>) -> ArrayResult<Operand<'a>> {
        match rhs {
            ImageOperand::Scalar(value) => Ok(Operand::Scalar(value)),
            ImageOperand::Image(other) if other.grid == self.grid => Ok(Operand::Array(&other.array)),
            ImageOperand::Image(_) => Err(ArrayError::MismatchedGrid),
        }
    }

    /// Apply a builtin binary kernel, returning a new image on the same grid.
    pub fn binary(&self, kernel: BinaryKernel, rhs: ImageOperand<'_>) -> FilterResult<Image> {
        let array = self.array.binary(kernel, self.operand(rhs)?)?;
        Ok(Image {
            grid: self.grid,
            array,
        })
    }

    /// Apply a builtin binary kernel in place.
    pub fn binary_assign(&mut self, kernel: BinaryKernel, rhs: ImageOperand<'_>) -> FilterResult<()> {
        let rhs = self.operand(rhs)?;
        self.array.binary_assign(kernel, rhs)
    }
}

macro_rules! image_ops {
    ($($kernel:ident => $name:ident, $assign:ident;)*) => {
        #[allow(clippy::should_implement_trait)]
        impl Image {
            $(
                #[doc = concat!("Voxel-wise `", stringify!($name), "`, returning a new image.")]
                pub fn $name<'a>(&self, rhs: impl Into<ImageOperand<'a>>) -> FilterResult<Image> {
                    self.binary(BinaryKernel::$kernel, rhs.into())
                }

                #[doc = concat!("Voxel-wise `", stringify!($name), "` in place.")]
                pub fn $assign<'a>(&mut self, rhs: impl Into<ImageOperand<'a>>) -> FilterResult<()> {
                    self.binary_assign(BinaryKernel::$kernel, rhs.into())
                }
            )*
        }
    };
}

image_ops! {
    Add => add, add_assign;
    Sub => sub, sub_assign;
    Mul => mul, mul_assign;
    Div => div, div_assign;
    Min => min, min_assign;
    Max => max, max_assign;
}

impl Deref for Image {
    type Target = DataArray;

    fn deref(&self) -> &DataArray {
        &self.array
    }
}

impl DerefMut for Image {
    fn deref_mut(&mut self) -> &mut DataArray {
        &mut self.array
    }
}

fn check_points(grid: &RegularGrid, array: &DataArray) -> ArrayResult<()> {
    if grid.number_of_points() != array.tuples() {
        return Err(ArrayError::SizeMismatch(format!(
            "grid of {} points for {} tuples",
            grid.number_of_points(),
            array.tuples()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FilterError;
    use crate::core::scalar::Status;

    fn ramp(grid: RegularGrid) -> Image {
        let data: Vec<f32> = (0..grid.number_of_points()).map(|i| i as f32).collect();
        Image::from_array(grid, DataArray::from_slice(&data, 1).unwrap()).unwrap()
    }

    #[test]
    fn test_point_count_checked() {
        let array = DataArray::from_slice(&[1u8, 2, 3], 1).unwrap();
        assert!(matches!(
            Image::from_array(RegularGrid::new_2d(2, 2), array),
            Err(ArrayError::SizeMismatch(_))
        ));
        let image = Image::new(RegularGrid::new_3d(2, 3, 4), 3, ScalarType::U16, Platform::Cpu, 0).unwrap();
        assert_eq!(image.tuples(), 24);
        assert_eq!(image.components(), 3);
    }

    #[test]
    fn test_voxel_access() {
        let mut image = ramp(RegularGrid::new_3d(4, 3, 2));
        assert_eq!(image.voxel(1, 2, 1, 0).unwrap(), 21.0);
        image.set_voxel(0, 0, 1, 0, -1.0).unwrap();
        assert_eq!(image.value(12, 0).unwrap(), -1.0);
        assert!(image.voxel(4, 0, 0, 0).is_err());
    }

    #[test]
    fn test_arithmetic_keeps_grid() {
        let grid = RegularGrid::new_2d(3, 2).with_spacing(0.5, 0.5, 1.0).unwrap();
        let a = ramp(grid);
        let b = a.add(&a).unwrap().mul(0.5).unwrap();
        assert_eq!(b.grid(), a.grid());
        assert!(b.same_content(&a).unwrap());

        let mut c = Image::from_array(grid, a.deep_copy().unwrap()).unwrap();
        c.set_status(0, Status::Passive).unwrap();
        c.sub_assign(1.0).unwrap();
        assert_eq!(c.to_f64_vec().unwrap(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(a.value(1, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_mismatched_grid() {
        let a = ramp(RegularGrid::new_2d(3, 2));
        let b = ramp(RegularGrid::new_2d(3, 2).with_origin(1.0, 0.0, 0.0).unwrap());
        assert!(matches!(
            a.add(&b),
            Err(FilterError::Array(ArrayError::MismatchedGrid))
        ));
        let mut c = a.clone();
        assert!(c.div_assign(&b).is_err());
        assert!(matches!(
            a.min(&b),
            Err(FilterError::Array(ArrayError::MismatchedGrid))
        ));
        assert!(matches!(
            c.max_assign(&b),
            Err(FilterError::Array(ArrayError::MismatchedGrid))
        ));
        assert!(matches!(
            c.min_assign(&b),
            Err(FilterError::Array(ArrayError::MismatchedGrid))
        ));
        assert!(a.max(&b).is_err());
        assert_eq!(c.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
    }

    #[test]
    fn test_min_max_keep_grid() {
        let grid = RegularGrid::new_2d(3, 2);
        let a = ramp(grid);
        let low: Image = a.min(2.0).unwrap();
        assert_eq!(low.grid(), &grid);
        assert_eq!(low.to_f64_vec().unwrap(), vec![0.0, 1.0, 2.0, 2.0, 2.0, 2.0]);

        let mut high = a.clone();
        high.max_assign(&low).unwrap();
        assert_eq!(high.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
    }
}
