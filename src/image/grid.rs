//! Regular sampling grids.
//!
//! A [`RegularGrid`] maps a 4D lattice `(i, j, k, l)` to world space and time.
//! The spatial map is
//!
//! ```text
//! world = P * (origin + A * S * (lattice - centre))
//! ```
//!
//! where `A` holds the axis directions as columns, `S` the voxel spacing,
//! `centre` the lattice centre `((nx - 1) / 2, ...)` and `P` an affine
//! post-transform. `origin` is therefore the world position of the lattice
//! centre. Time is `torigin + l * dt`.
//!
//! Linear indices run fastest along `i`: `index = i + nx * (j + ny * (k + nz * l))`.

use crate::core::error::{ArrayError, ArrayResult};
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Tolerance of grid comparisons.
pub const GRID_TOLERANCE: f64 = 1e-6;

/// Serialized form of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GridAttributes {
    size: [usize; 4],
    spacing: [f64; 4],
    origin: [f64; 3],
    torigin: f64,
    axes: Matrix3<f64>,
    post_transform: Matrix4<f64>,
}

/// Geometry of a regularly sampled image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "GridAttributes", into = "GridAttributes")]
pub struct RegularGrid {
    size: [usize; 4],
    spacing: [f64; 4],
    origin: Vector3<f64>,
    torigin: f64,
    axes: Matrix3<f64>,
    post_transform: Matrix4<f64>,
    post_inverse: Matrix4<f64>,
    to_world: Matrix4<f64>,
    to_lattice: Matrix4<f64>,
}

impl RegularGrid {
    /// Create an axis-aligned grid of unit spacing centred on the world origin.
    ///
    /// Zero sizes are raised to one.
    pub fn new(nx: usize, ny: usize, nz: usize, nt: usize) -> Self {
        let mut grid = Self {
            size: [nx.max(1), ny.max(1), nz.max(1), nt.max(1)],
            spacing: [1.0; 4],
            origin: Vector3::zeros(),
            torigin: 0.0,
            axes: Matrix3::identity(),
            post_transform: Matrix4::identity(),
            post_inverse: Matrix4::identity(),
            to_world: Matrix4::identity(),
            to_lattice: Matrix4::identity(),
        };
        // unit spacing and identity axes are always invertible
        grid.to_world = grid.world_matrix();
        grid.to_lattice = grid.to_world.try_inverse().unwrap_or_else(Matrix4::identity);
        grid
    }

    /// Create a 2D grid.
    pub fn new_2d(nx: usize, ny: usize) -> Self {
        Self::new(nx, ny, 1, 1)
    }

    /// Create a 3D grid.
    pub fn new_3d(nx: usize, ny: usize, nz: usize) -> Self {
        Self::new(nx, ny, nz, 1)
    }

    /// Set the spatial voxel size.
    pub fn with_spacing(mut self, dx: f64, dy: f64, dz: f64) -> ArrayResult<Self> {
        self.spacing[..3].copy_from_slice(&[dx, dy, dz]);
        self.refresh()
    }

    /// Set the temporal origin and sampling interval.
    pub fn with_time(mut self, torigin: f64, dt: f64) -> ArrayResult<Self> {
        if !(dt.is_finite() && torigin.is_finite()) {
            return Err(ArrayError::InvalidGrid(format!(
                "time origin {} and interval {} must be finite",
                torigin, dt
            )));
        }
        self.torigin = torigin;
        self.spacing[3] = dt;
        Ok(self)
    }

    /// Set the world position of the lattice centre.
    pub fn with_origin(mut self, x: f64, y: f64, z: f64) -> ArrayResult<Self> {
        self.origin = Vector3::new(x, y, z);
        self.refresh()
    }

    /// Set the axis directions.
    pub fn with_axes(mut self, x: Vector3<f64>, y: Vector3<f64>, z: Vector3<f64>) -> ArrayResult<Self> {
        self.axes = Matrix3::from_columns(&[x, y, z]);
        self.refresh()
    }

    /// Set the affine post-transform.
    pub fn with_post_transform(mut self, transform: Matrix4<f64>) -> ArrayResult<Self> {
        self.post_transform = transform;
        self.refresh()
    }

    fn world_matrix(&self) -> Matrix4<f64> {
        let centre = Vector3::new(
            (self.size[0] as f64 - 1.0) / 2.0,
            (self.size[1] as f64 - 1.0) / 2.0,
            (self.size[2] as f64 - 1.0) / 2.0,
        );
        let scaling = Vector3::new(self.spacing[0], self.spacing[1], self.spacing[2]);
        self.post_transform
            * Matrix4::new_translation(&self.origin)
            * self.axes.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&scaling)
            * Matrix4::new_translation(&-centre)
    }

    fn refresh(mut self) -> ArrayResult<Self> {
        let Some(post_inverse) = self.post_transform.try_inverse() else {
            return Err(ArrayError::InvalidGrid(
                "post-transform is not invertible".to_string(),
            ));
        };
        let to_world = self.world_matrix();
        let Some(to_lattice) = to_world.try_inverse() else {
            return Err(ArrayError::InvalidGrid(format!(
                "spacing {:?} and axes do not span space",
                &self.spacing[..3]
            )));
        };
        self.post_inverse = post_inverse;
        self.to_world = to_world;
        self.to_lattice = to_lattice;
        Ok(self)
    }

    /// Lattice size `[nx, ny, nz, nt]`.
    pub fn size(&self) -> [usize; 4] {
        self.size
    }

    /// Number of columns.
    pub fn x(&self) -> usize {
        self.size[0]
    }

    /// Number of rows.
    pub fn y(&self) -> usize {
        self.size[1]
    }

    /// Number of slices.
    pub fn z(&self) -> usize {
        self.size[2]
    }

    /// Number of frames.
    pub fn t(&self) -> usize {
        self.size[3]
    }

    /// Voxel size and temporal interval `[dx, dy, dz, dt]`.
    pub fn spacing(&self) -> [f64; 4] {
        self.spacing
    }

    /// World position of the lattice centre.
    pub fn origin(&self) -> Point3<f64> {
        Point3::from(self.origin)
    }

    /// Time of frame zero.
    pub fn torigin(&self) -> f64 {
        self.torigin
    }

    /// Axis directions as columns.
    pub fn axes(&self) -> &Matrix3<f64> {
        &self.axes
    }

    /// Affine post-transform.
    pub fn post_transform(&self) -> &Matrix4<f64> {
        &self.post_transform
    }

    /// Inverse of the post-transform.
    pub fn post_transform_inverse(&self) -> &Matrix4<f64> {
        &self.post_inverse
    }

    /// Number of points in one frame.
    pub fn number_of_spatial_points(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Number of points over all frames.
    pub fn number_of_points(&self) -> usize {
        self.number_of_spatial_points() * self.size[3]
    }

    /// Whether the grid has a single slice and frame.
    pub fn is_2d(&self) -> bool {
        self.size[2] == 1 && self.size[3] == 1
    }

    /// Linear index of a 2D subscript in the first slice and frame.
    pub fn index_2d(&self, i: usize, j: usize) -> ArrayResult<usize> {
        self.index_4d(i, j, 0, 0)
    }

    /// Linear index of a 3D subscript in the first frame.
    pub fn index_3d(&self, i: usize, j: usize, k: usize) -> ArrayResult<usize> {
        self.index_4d(i, j, k, 0)
    }

    /// Linear index of a 4D subscript.
    pub fn index_4d(&self, i: usize, j: usize, k: usize, l: usize) -> ArrayResult<usize> {
        for (axis, (&sub, &n)) in [i, j, k, l].iter().zip(&self.size).enumerate() {
            if sub >= n {
                return Err(ArrayError::OutOfRange {
                    index: sub as isize,
                    len: self.size[axis],
                });
            }
        }
        let [nx, ny, nz, _] = self.size;
        Ok(i + nx * (j + ny * (k + nz * l)))
    }

    /// 2D subscript of a linear index, counting rows over all slices and frames.
    pub fn subscript_2d(&self, index: usize) -> ArrayResult<(usize, usize)> {
        self.check_index(index)?;
        Ok((index % self.size[0], index / self.size[0]))
    }

    /// 3D subscript of a linear index, counting slices over all frames.
    pub fn subscript_3d(&self, index: usize) -> ArrayResult<(usize, usize, usize)> {
        self.check_index(index)?;
        let [nx, ny, _, _] = self.size;
        let plane = nx * ny;
        Ok((index % nx, (index % plane) / nx, index / plane))
    }

    /// 4D subscript of a linear index.
    pub fn subscript_4d(&self, index: usize) -> ArrayResult<(usize, usize, usize, usize)> {
        self.check_index(index)?;
        let [nx, ny, nz, _] = self.size;
        let plane = nx * ny;
        let volume = plane * nz;
        Ok((
            index % nx,
            (index % plane) / nx,
            (index % volume) / plane,
            index / volume,
        ))
    }

    fn check_index(&self, index: usize) -> ArrayResult<()> {
        if index >= self.number_of_points() {
            return Err(ArrayError::OutOfRange {
                index: index as isize,
                len: self.number_of_points(),
            });
        }
        Ok(())
    }

    /// World position of continuous lattice coordinates.
    pub fn lattice_to_world(&self, lattice: &Point3<f64>) -> Point3<f64> {
        self.to_world.transform_point(lattice)
    }

    /// Continuous lattice coordinates of a world position.
    pub fn world_to_lattice(&self, world: &Point3<f64>) -> Point3<f64> {
        self.to_lattice.transform_point(world)
    }

    /// World position of the voxel with linear `index`.
    pub fn index_to_world(&self, index: usize) -> ArrayResult<Point3<f64>> {
        let (i, j, k) = self.subscript_3d(index % self.number_of_spatial_points())?;
        Ok(self.lattice_to_world(&Point3::new(i as f64, j as f64, k as f64)))
    }

    /// Linear index of the voxel nearest to a world position in the first frame.
    pub fn world_to_index(&self, world: &Point3<f64>) -> Option<usize> {
        let lattice = self.world_to_lattice(world);
        let round = |v: f64, n: usize| {
            let r = v.round();
            (r >= 0.0 && r < n as f64).then_some(r as usize)
        };
        let i = round(lattice.x, self.size[0])?;
        let j = round(lattice.y, self.size[1])?;
        let k = round(lattice.z, self.size[2])?;
        self.index_3d(i, j, k).ok()
    }

    /// Time of continuous frame coordinate `l`.
    pub fn lattice_to_time(&self, l: f64) -> f64 {
        self.torigin + l * self.spacing[3]
    }

    /// Continuous frame coordinate of time `t`. Grids without a temporal
    /// interval map every time to frame zero.
    pub fn time_to_lattice(&self, t: f64) -> f64 {
        if self.spacing[3] == 0.0 {
            0.0
        } else {
            (t - self.torigin) / self.spacing[3]
        }
    }
}

impl Default for RegularGrid {
    fn default() -> Self {
        Self::new(1, 1, 1, 1)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= GRID_TOLERANCE
}

impl PartialEq for RegularGrid {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.spacing.iter().zip(&other.spacing).all(|(a, b)| close(*a, *b))
            && (self.origin - other.origin).amax() <= GRID_TOLERANCE
            && close(self.torigin, other.torigin)
            && (self.axes - other.axes).amax() <= GRID_TOLERANCE
            && (self.post_transform - other.post_transform).amax() <= GRID_TOLERANCE
    }
}

impl TryFrom<GridAttributes> for RegularGrid {
    type Error = ArrayError;

    fn try_from(attrs: GridAttributes) -> ArrayResult<Self> {
        let [dx, dy, dz, dt] = attrs.spacing;
        let [x, y, z] = attrs.origin;
        let [nx, ny, nz, nt] = attrs.size;
        let mut grid = Self::new(nx, ny, nz, nt)
            .with_time(attrs.torigin, dt)?
            .with_spacing(dx, dy, dz)?;
        grid.origin = Vector3::new(x, y, z);
        grid.axes = attrs.axes;
        grid.post_transform = attrs.post_transform;
        grid.refresh()
    }
}

impl From<RegularGrid> for GridAttributes {
    fn from(grid: RegularGrid) -> Self {
        Self {
            size: grid.size,
            spacing: grid.spacing,
            origin: [grid.origin.x, grid.origin.y, grid.origin.z],
            torigin: grid.torigin,
            axes: grid.axes,
            post_transform: grid.post_transform,
        }
    }
}
