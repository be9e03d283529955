//! Grid model: a projected extent divided into pixels of a fixed resolution

mod tiling;
mod window;

pub use tiling::{BlockSize, PaddedSubgrid, Subgrid, Subgrids};
pub use window::PixelWindow;

use crate::crs::Projection;
use crate::error::{Error, Result};
use crate::raster::GeoTransform;
use serde::{Deserialize, Serialize};

/// Absolute tolerance (in projection units) for spatial comparisons.
pub const SPATIAL_TOLERANCE: f64 = 1e-8;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= SPATIAL_TOLERANCE
}

/// Pixel size in projection units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Square pixels
    pub fn square(size: f64) -> Self {
        Self::new(size, size)
    }

    pub fn equal(&self, other: &Resolution) -> bool {
        close(self.x, other.x) && close(self.y, other.y)
    }

    /// Resolution divided by an integer oversampling factor
    pub fn oversampled(&self, factor: usize) -> Self {
        Self::new(self.x / factor as f64, self.y / factor as f64)
    }
}

/// Axis-aligned extent in a projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub projection: Projection,
}

impl Extent {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64, projection: Projection) -> Result<Self> {
        if !(xmax > xmin) || !(ymax > ymin) {
            return Err(Error::InvalidGrid(format!(
                "empty extent x=[{}, {}] y=[{}, {}]",
                xmin, xmax, ymin, ymax
            )));
        }
        Ok(Self {
            xmin,
            xmax,
            ymin,
            ymax,
            projection,
        })
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Equality within [`SPATIAL_TOLERANCE`]
    pub fn equal(&self, other: &Extent) -> bool {
        self.projection.is_equivalent(&other.projection)
            && close(self.xmin, other.xmin)
            && close(self.xmax, other.xmax)
            && close(self.ymin, other.ymin)
            && close(self.ymax, other.ymax)
    }

    /// Whether the interiors of both extents overlap
    pub fn intersects(&self, other: &Extent) -> bool {
        self.xmin < other.xmax - SPATIAL_TOLERANCE
            && self.xmax > other.xmin + SPATIAL_TOLERANCE
            && self.ymin < other.ymax - SPATIAL_TOLERANCE
            && self.ymax > other.ymin + SPATIAL_TOLERANCE
    }

    /// Overlapping part of both extents, `None` if they do not overlap
    pub fn intersection(&self, other: &Extent) -> Result<Option<Extent>> {
        self.check_projection(&other.projection)?;
        if !self.intersects(other) {
            return Ok(None);
        }
        Ok(Some(Extent {
            xmin: self.xmin.max(other.xmin),
            xmax: self.xmax.min(other.xmax),
            ymin: self.ymin.max(other.ymin),
            ymax: self.ymax.min(other.ymax),
            projection: self.projection.clone(),
        }))
    }

    /// Fail with [`Error::ProjectionMismatch`] unless `projection` is equivalent.
    pub fn check_projection(&self, projection: &Projection) -> Result<()> {
        if self.projection.is_equivalent(projection) {
            Ok(())
        } else {
            Err(Error::ProjectionMismatch(
                self.projection.identifier(),
                projection.identifier(),
            ))
        }
    }

    pub fn to_rect(&self) -> geo_types::Rect<f64> {
        geo_types::Rect::new(
            geo_types::coord! { x: self.xmin, y: self.ymin },
            geo_types::coord! { x: self.xmax, y: self.ymax },
        )
    }
}

/// A rectangular pixel raster: extent + resolution + projection.
///
/// Width and height are derived from the extent span divided by the
/// resolution, rounded to the nearest integer; the extent is snapped so that
/// it spans exactly `width * res.x` by `height * res.y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    extent: Extent,
    resolution: Resolution,
    width: usize,
    height: usize,
}

impl Grid {
    pub fn new(extent: Extent, resolution: Resolution) -> Result<Self> {
        if !(resolution.x > 0.0) || !(resolution.y > 0.0) {
            return Err(Error::InvalidGrid(format!(
                "resolution must be positive, got ({}, {})",
                resolution.x, resolution.y
            )));
        }
        let width = (extent.width() / resolution.x).round();
        let height = (extent.height() / resolution.y).round();
        if width < 1.0 || height < 1.0 {
            return Err(Error::InvalidGrid(format!(
                "extent {}x{} is smaller than one pixel of {}x{}",
                extent.width(),
                extent.height(),
                resolution.x,
                resolution.y
            )));
        }
        let (width, height) = (width as usize, height as usize);
        let extent = Extent {
            xmax: extent.xmin + width as f64 * resolution.x,
            ymin: extent.ymax - height as f64 * resolution.y,
            ..extent
        };
        Ok(Self {
            extent,
            resolution,
            width,
            height,
        })
    }

    /// Grid with its upper-left corner at (`xmin`, `ymax`) and the given size in pixels
    pub fn from_origin(
        xmin: f64,
        ymax: f64,
        resolution: Resolution,
        cols: usize,
        rows: usize,
        projection: Projection,
    ) -> Result<Self> {
        let extent = Extent::new(
            xmin,
            xmin + cols as f64 * resolution.x,
            ymax - rows as f64 * resolution.y,
            ymax,
            projection,
        )?;
        Self::new(extent, resolution)
    }

    /// Grid described by a north-up affine transform
    pub fn from_geo_transform(
        transform: &GeoTransform,
        cols: usize,
        rows: usize,
        projection: Projection,
    ) -> Result<Self> {
        if !transform.is_north_up() {
            return Err(Error::InvalidGrid(
                "only north-up transforms are supported".into(),
            ));
        }
        Self::from_origin(
            transform.origin_x,
            transform.origin_y,
            Resolution::new(transform.pixel_width, -transform.pixel_height),
            cols,
            rows,
            projection,
        )
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn projection(&self) -> &Projection {
        &self.extent.projection
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.height
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::new(
            self.extent.xmin,
            self.extent.ymax,
            self.resolution.x,
            -self.resolution.y,
        )
    }

    /// Equality of extent, resolution and projection within [`SPATIAL_TOLERANCE`]
    pub fn equal(&self, other: &Grid) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.resolution.equal(&other.resolution)
            && self.extent.equal(&other.extent)
    }

    /// Fractional (col, row) of this grid's upper-left corner in `other`'s pixel space
    pub fn pixel_offset_in(&self, other: &Grid) -> (f64, f64) {
        let col = (self.extent.xmin - other.extent.xmin) / other.resolution.x;
        let row = (other.extent.ymax - self.extent.ymax) / other.resolution.y;
        (col, row)
    }

    /// Whether both grids share resolution and pixel lattice, so that one is
    /// a whole-pixel window of the other.
    pub fn is_aligned_with(&self, other: &Grid) -> bool {
        if !self.resolution.equal(&other.resolution)
            || !self.projection().is_equivalent(other.projection())
        {
            return false;
        }
        let (col, row) = self.pixel_offset_in(other);
        (col - col.round()).abs() * other.resolution.x <= SPATIAL_TOLERANCE
            && (row - row.round()).abs() * other.resolution.y <= SPATIAL_TOLERANCE
    }

    /// Window of `rows` x `cols` pixels starting at the given offset.
    ///
    /// Offsets may be negative or reach beyond the grid; the resulting grid
    /// simply extends the pixel lattice.
    pub fn subgrid(&self, row_offset: isize, col_offset: isize, rows: usize, cols: usize) -> Result<Grid> {
        let xmin = self.extent.xmin + col_offset as f64 * self.resolution.x;
        let ymax = self.extent.ymax - row_offset as f64 * self.resolution.y;
        Grid::from_origin(
            xmin,
            ymax,
            self.resolution,
            cols,
            rows,
            self.extent.projection.clone(),
        )
    }

    /// Grid grown by `pixels` on every side.
    pub fn pad(&self, pixels: usize) -> Result<Grid> {
        let p = pixels as isize;
        self.subgrid(-p, -p, self.height + 2 * pixels, self.width + 2 * pixels)
    }

    /// Same extent at a different resolution
    pub fn with_resolution(&self, resolution: Resolution) -> Result<Grid> {
        Grid::new(self.extent.clone(), resolution)
    }

    /// Part of this grid overlapping `other`, snapped outward to this grid's lattice.
    pub fn intersection(&self, other: &Grid) -> Result<Option<Grid>> {
        let extent = match self.extent.intersection(&other.extent)? {
            Some(extent) => extent,
            None => return Ok(None),
        };
        let window = self.window_covering(&extent);
        Ok(Some(self.subgrid(
            window.row_off,
            window.col_off,
            window.rows,
            window.cols,
        )?))
    }

    /// Smallest pixel window of this grid's lattice covering `extent`.
    pub fn window_covering(&self, extent: &Extent) -> PixelWindow {
        let tol_x = SPATIAL_TOLERANCE / self.resolution.x;
        let tol_y = SPATIAL_TOLERANCE / self.resolution.y;
        let c0 = ((extent.xmin - self.extent.xmin) / self.resolution.x + tol_x).floor() as isize;
        let c1 = ((extent.xmax - self.extent.xmin) / self.resolution.x - tol_x).ceil() as isize;
        let r0 = ((self.extent.ymax - extent.ymax) / self.resolution.y + tol_y).floor() as isize;
        let r1 = ((self.extent.ymax - extent.ymin) / self.resolution.y - tol_y).ceil() as isize;
        PixelWindow::new(r0, c0, (r1 - r0).max(1) as usize, (c1 - c0).max(1) as usize)
    }

    /// X coordinates of the pixel centers, left to right
    pub fn x_centers(&self) -> Vec<f64> {
        (0..self.width)
            .map(|c| self.extent.xmin + (c as f64 + 0.5) * self.resolution.x)
            .collect()
    }

    /// Y coordinates of the pixel centers, top to bottom
    pub fn y_centers(&self) -> Vec<f64> {
        (0..self.height)
            .map(|r| self.extent.ymax - (r as f64 + 0.5) * self.resolution.y)
            .collect()
    }

    /// Partition into tiles of at most `size` pixels, in row-major order.
    pub fn subgrids(&self, size: BlockSize) -> Subgrids<'_> {
        Subgrids::new(self, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Grid {
        Grid::from_origin(
            1000.0,
            2000.0,
            Resolution::square(30.0),
            10,
            8,
            Projection::from_epsg(32633),
        )
        .unwrap()
    }

    #[test]
    fn test_grid_dimensions() {
        let g = grid();
        assert_eq!(g.shape(), (8, 10));
        assert_relative_eq!(g.extent().xmax, 1300.0);
        assert_relative_eq!(g.extent().ymin, 1760.0);
    }

    #[test]
    fn test_grid_rounds_pixel_count() {
        let extent = Extent::new(0.0, 99.999_999_999, 0.0, 50.0, Projection::wgs84()).unwrap();
        let g = Grid::new(extent, Resolution::square(10.0)).unwrap();
        assert_eq!(g.shape(), (5, 10));
        assert_relative_eq!(g.extent().xmax, 100.0);
    }

    #[test]
    fn test_grid_rejects_bad_resolution() {
        let extent = Extent::new(0.0, 10.0, 0.0, 10.0, Projection::wgs84()).unwrap();
        assert!(Grid::new(extent.clone(), Resolution::square(0.0)).is_err());
        assert!(Grid::new(extent, Resolution::square(100.0)).is_err());
    }

    #[test]
    fn test_grid_equal_with_tolerance() {
        let a = grid();
        let b = Grid::from_origin(
            1000.0 + 1e-10,
            2000.0,
            Resolution::square(30.0),
            10,
            8,
            Projection::from_epsg(32633),
        )
        .unwrap();
        assert!(a.equal(&b));
        let c = a.pad(1).unwrap();
        assert!(!a.equal(&c));
    }

    #[test]
    fn test_pad_and_alignment() {
        let g = grid();
        let padded = g.pad(2).unwrap();
        assert_eq!(padded.shape(), (12, 14));
        assert!(padded.is_aligned_with(&g));
        let (col, row) = padded.pixel_offset_in(&g);
        assert_relative_eq!(col, -2.0);
        assert_relative_eq!(row, -2.0);
    }

    #[test]
    fn test_intersection_snaps_to_lattice() {
        let g = grid();
        let other = Grid::from_origin(
            1045.0,
            1990.0,
            Resolution::square(10.0),
            100,
            100,
            Projection::from_epsg(32633),
        )
        .unwrap();
        let i = g.intersection(&other).unwrap().unwrap();
        assert!(i.is_aligned_with(&g));
        assert_relative_eq!(i.extent().xmin, 1030.0);
        assert_relative_eq!(i.extent().ymax, 2000.0);
        assert_eq!(i.width(), 9);
    }

    #[test]
    fn test_intersection_disjoint_and_mismatch() {
        let g = grid();
        let far = Grid::from_origin(
            9000.0,
            2000.0,
            Resolution::square(30.0),
            2,
            2,
            Projection::from_epsg(32633),
        )
        .unwrap();
        assert!(g.intersection(&far).unwrap().is_none());
        let other_proj = Grid::from_origin(
            1000.0,
            2000.0,
            Resolution::square(30.0),
            2,
            2,
            Projection::from_epsg(4326),
        )
        .unwrap();
        assert!(matches!(
            g.intersection(&other_proj),
            Err(Error::ProjectionMismatch(..))
        ));
    }

    #[test]
    fn test_pixel_centers() {
        let g = grid();
        assert_relative_eq!(g.x_centers()[0], 1015.0);
        assert_relative_eq!(g.y_centers()[7], 1775.0);
    }
}
