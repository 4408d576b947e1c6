//! Image reader and writer collaborators.
//!
//! [`RasterIo`] handles 2D rasters through the `image` crate. The format is
//! chosen from the file extension. Decoded rasters are wrapped as external
//! memory, so reading does not copy the pixels a second time. Raster formats
//! carry no status mask: written images lose it and read images are all
//! Active.

use super::{Image, RegularGrid};
use crate::array::DataArray;
use crate::core::error::{ArrayError, ArrayResult};
use crate::core::scalar::ScalarType;
use ::image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// Produces images from files.
pub trait ImageReader {
    /// Read the image stored at `path`.
    fn read(&self, path: &Path) -> ArrayResult<Image>;
}

/// Stores images to files.
pub trait ImageWriter {
    /// Write `image` to `path`.
    fn write(&self, image: &Image, path: &Path) -> ArrayResult<()>;
}

/// Reader and writer of 2D rasters (PNG, TIFF).
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterIo;

impl ImageReader for RasterIo {
    fn read(&self, path: &Path) -> ArrayResult<Image> {
        let decoded = ::image::open(path)?;
        let grid = RegularGrid::new_2d(decoded.width() as usize, decoded.height() as usize);
        debug!(
            "Read {}x{} {:?} raster from {}",
            decoded.width(),
            decoded.height(),
            decoded.color(),
            path.display()
        );
        let array = DataArray::from_external(Arc::new(decoded))?;
        Image::from_array(grid, array)
    }
}

impl ImageWriter for RasterIo {
    fn write(&self, image: &Image, path: &Path) -> ArrayResult<()> {
        let grid = image.grid();
        if !grid.is_2d() {
            return Err(ArrayError::InvalidGrid(format!(
                "raster files hold 2D images, grid is {:?}",
                grid.size()
            )));
        }
        let raster = to_raster(image.array(), grid.x() as u32, grid.y() as u32)?;
        raster.save(path)?;
        debug!("Wrote {:?} raster to {}", raster.color(), path.display());
        Ok(())
    }
}

fn to_raster(array: &DataArray, width: u32, height: u32) -> ArrayResult<DynamicImage> {
    let ty = array.scalar_type();
    let channels = array.scalar_components();
    let bytes = array.values().to_bytes()?;
    let len = bytes.len();
    let size_error = || {
        ArrayError::SizeMismatch(format!(
            "{} bytes do not form a {}x{} raster",
            len, width, height
        ))
    };

    let raster = match (ty.component_type(), channels) {
        (ScalarType::U8, 1) => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageLuma8),
        (ScalarType::U8, 2) => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageLumaA8),
        (ScalarType::U8, 3) => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageRgb8),
        (ScalarType::U8, 4) => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageRgba8),
        (ScalarType::U16, n @ 1..=4) => {
            let data: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
            match n {
                1 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, data)
                    .map(DynamicImage::ImageLuma16),
                2 => ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, data)
                    .map(DynamicImage::ImageLumaA16),
                3 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, data)
                    .map(DynamicImage::ImageRgb16),
                _ => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, data)
                    .map(DynamicImage::ImageRgba16),
            }
        }
        (ScalarType::F32, n @ 3..=4) => {
            let data: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
            if n == 3 {
                ImageBuffer::<Rgb<f32>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb32F)
            } else {
                ImageBuffer::<Rgba<f32>, _>::from_raw(width, height, data)
                    .map(DynamicImage::ImageRgba32F)
            }
        }
        _ => {
            return Err(ArrayError::unsupported_type(
                ty,
                format!("by raster files with {} channels", channels),
            ))
        }
    };
    raster.ok_or_else(size_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::Platform;
    use tempfile::tempdir;

    #[test]
    fn test_png_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.png");
        let data: Vec<u8> = (0..12).map(|v| v * 20).collect();
        let array = DataArray::from_slice(&data, 1).unwrap();
        let image = Image::from_array(RegularGrid::new_2d(4, 3), array).unwrap();
        image.write(&RasterIo, &path).unwrap();

        let back = Image::read(&RasterIo, &path).unwrap();
        assert_eq!(back.grid(), image.grid());
        assert!(back.values().is_external());
        assert_eq!(back.to_vec::<u8>().unwrap(), data);
        assert_eq!(back.voxel(3, 2, 0, 0).unwrap(), 220.0);
    }

    #[test]
    fn test_rgb16_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colour.png");
        let data: Vec<u16> = (0..18).map(|v| v * 1000).collect();
        let array = DataArray::from_slice(&data, 3).unwrap();
        let image = Image::from_array(RegularGrid::new_2d(3, 2), array).unwrap();
        RasterIo.write(&image, &path).unwrap();

        let back = RasterIo.read(&path).unwrap();
        assert_eq!(back.components(), 3);
        assert_eq!(back.scalar_type(), ScalarType::U16);
        assert_eq!(back.to_vec::<u16>().unwrap(), data);
    }

    #[test]
    fn test_read_then_filter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gray.png");
        let data = vec![10u8, 200, 30, 40];
        let image = Image::from_array(RegularGrid::new_2d(2, 2), DataArray::from_slice(&data, 1).unwrap()).unwrap();
        image.write(&RasterIo, &path).unwrap();

        let mut back = RasterIo.read(&path).unwrap();
        back.add_assign(100.0).unwrap();
        assert!(!back.values().is_external());
        assert_eq!(back.to_vec::<u8>().unwrap(), vec![110, 255, 130, 140]);
    }

    #[test]
    fn test_write_rejects_volumes_and_types() {
        let dir = tempdir().unwrap();
        let volume = Image::new(RegularGrid::new_3d(2, 2, 2), 1, ScalarType::U8, Platform::Cpu, 0).unwrap();
        assert!(matches!(
            RasterIo.write(&volume, &dir.path().join("v.png")),
            Err(ArrayError::InvalidGrid(_))
        ));
        let doubles = Image::new(RegularGrid::new_2d(2, 2), 1, ScalarType::F64, Platform::Cpu, 0).unwrap();
        assert!(matches!(
            RasterIo.write(&doubles, &dir.path().join("d.png")),
            Err(ArrayError::UnsupportedType { .. })
        ));
        assert!(RasterIo.read(&dir.path().join("missing.png")).is_err());
    }
}
