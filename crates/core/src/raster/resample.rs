//! Resampling kernels between grids of the same projection
//!
//! Every kernel works on footprints: the rectangle a destination pixel covers
//! in source pixel space, split into the source cells it overlaps and the
//! overlap area of each. Source cells outside the source array count as
//! "outside": they never contribute a value and never satisfy a predicate.

use crate::grid::Grid;
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

/// Resampling algorithm used when a source is read into a foreign grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleAlg {
    /// Value of the source pixel under the destination pixel center
    #[default]
    Nearest,
    /// Area-weighted mean of the valid source pixels in the footprint
    Average,
}

/// Whether `value` is a no-data value (NaN is always no-data).
pub fn is_no_data(value: f64, no_data: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match no_data {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => (value - nd).abs() <= 1e-6 * nd.abs().max(1.0),
        None => false,
    }
}

/// Overlap of one destination pixel with the source cells along one axis
#[derive(Debug, Clone)]
struct AxisFootprint {
    start: f64,
    end: f64,
    cells: Vec<(usize, f64)>,
}

impl AxisFootprint {
    fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    fn span(&self) -> f64 {
        self.end - self.start
    }
}

fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < 1e-9 {
        r
    } else {
        v
    }
}

fn axis_footprints(offset: f64, step: f64, n_dst: usize, n_src: usize) -> Vec<AxisFootprint> {
    (0..n_dst)
        .map(|i| {
            let start = snap(offset + i as f64 * step);
            let end = snap(offset + (i + 1) as f64 * step);
            let first = start.floor() as isize;
            let last = end.ceil() as isize;
            let cells = (first..last)
                .filter(|&k| k >= 0 && (k as usize) < n_src)
                .filter_map(|k| {
                    let w = end.min(k as f64 + 1.0) - start.max(k as f64);
                    (w > 1e-12).then_some((k as usize, w))
                })
                .collect();
            AxisFootprint { start, end, cells }
        })
        .collect()
}

/// Column and row footprints of `dst` pixels in the pixel space of `src_grid`
fn footprints(src: &ArrayView2<f64>, src_grid: &Grid, dst: &Grid) -> (Vec<AxisFootprint>, Vec<AxisFootprint>) {
    let (col_off, row_off) = dst.pixel_offset_in(src_grid);
    let (src_rows, src_cols) = src.dim();
    let step_x = dst.resolution().x / src_grid.resolution().x;
    let step_y = dst.resolution().y / src_grid.resolution().y;
    (
        axis_footprints(col_off, step_x, dst.width(), src_cols),
        axis_footprints(row_off, step_y, dst.height(), src_rows),
    )
}

/// Nearest-neighbour resampling; destination pixels whose center falls
/// outside the source receive `fill`.
pub fn nearest(src: ArrayView2<f64>, src_grid: &Grid, dst: &Grid, fill: f64) -> Array2<f64> {
    let (src_rows, src_cols) = src.dim();
    let (cols, rows) = footprints(&src, src_grid, dst);
    let pick = |fp: &AxisFootprint, n: usize| {
        let c = fp.center().floor();
        (c >= 0.0 && (c as usize) < n).then_some(c as usize)
    };
    let col_idx: Vec<_> = cols.iter().map(|fp| pick(fp, src_cols)).collect();
    let row_idx: Vec<_> = rows.iter().map(|fp| pick(fp, src_rows)).collect();

    Array2::from_shape_fn(dst.shape(), |(r, c)| match (row_idx[r], col_idx[c]) {
        (Some(sr), Some(sc)) => src[(sr, sc)],
        _ => fill,
    })
}

/// Area-weighted mean of the valid source pixels in each footprint.
///
/// No-data pixels and pixels outside the source are ignored; a footprint
/// without any valid pixel receives `fill`.
pub fn average(
    src: ArrayView2<f64>,
    src_grid: &Grid,
    dst: &Grid,
    no_data: Option<f64>,
    fill: f64,
) -> Array2<f64> {
    let (cols, rows) = footprints(&src, src_grid, dst);
    Array2::from_shape_fn(dst.shape(), |(r, c)| {
        let mut sum = 0.0;
        let mut weight = 0.0;
        for &(sr, wr) in &rows[r].cells {
            for &(sc, wc) in &cols[c].cells {
                let v = src[(sr, sc)];
                if !is_no_data(v, no_data) {
                    sum += v * wr * wc;
                    weight += wr * wc;
                }
            }
        }
        if weight > 0.0 {
            sum / weight
        } else {
            fill
        }
    })
}

/// Share of each footprint's area covered by source pixels satisfying `predicate`.
pub fn coverage<F>(src: ArrayView2<f64>, src_grid: &Grid, dst: &Grid, predicate: F) -> Array2<f64>
where
    F: Fn(f64) -> bool,
{
    let (cols, rows) = footprints(&src, src_grid, dst);
    Array2::from_shape_fn(dst.shape(), |(r, c)| {
        let area = rows[r].span() * cols[c].span();
        let mut covered = 0.0;
        for &(sr, wr) in &rows[r].cells {
            for &(sc, wc) in &cols[c].cells {
                if predicate(src[(sr, sc)]) {
                    covered += wr * wc;
                }
            }
        }
        (covered / area).min(1.0)
    })
}

/// Area-weighted mean of `value(pixel)` over each whole footprint; area
/// outside the source contributes zero.
pub fn footprint_mean<F>(src: ArrayView2<f64>, src_grid: &Grid, dst: &Grid, value: F) -> Array2<f64>
where
    F: Fn(f64) -> f64,
{
    let (cols, rows) = footprints(&src, src_grid, dst);
    Array2::from_shape_fn(dst.shape(), |(r, c)| {
        let area = rows[r].span() * cols[c].span();
        let mut sum = 0.0;
        for &(sr, wr) in &rows[r].cells {
            for &(sc, wc) in &cols[c].cells {
                sum += value(src[(sr, sc)]) * wr * wc;
            }
        }
        sum / area
    })
}

/// Per-category area shares: band `i` holds the share of each footprint
/// covered by source pixels equal to `categories[i]`.
pub fn category_fractions(
    src: ArrayView2<f64>,
    src_grid: &Grid,
    dst: &Grid,
    categories: &[f64],
) -> Array3<f64> {
    let (cols, rows) = footprints(&src, src_grid, dst);
    let (h, w) = dst.shape();
    let mut out = Array3::zeros((categories.len(), h, w));
    for r in 0..h {
        for c in 0..w {
            let area = rows[r].span() * cols[c].span();
            for &(sr, wr) in &rows[r].cells {
                for &(sc, wc) in &cols[c].cells {
                    let v = src[(sr, sc)];
                    if let Some(k) = categories.iter().position(|&cat| cat == v) {
                        out[(k, r, c)] += wr * wc / area;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::Resolution;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn grid(xmin: f64, ymax: f64, res: f64, cols: usize, rows: usize) -> Grid {
        Grid::from_origin(xmin, ymax, Resolution::square(res), cols, rows, Projection::from_epsg(32633))
            .unwrap()
    }

    #[test]
    fn test_nearest_identity_and_outside_fill() {
        let src = array![[1.0, 2.0], [3.0, 4.0]];
        let g = grid(0.0, 20.0, 10.0, 2, 2);
        assert_eq!(nearest(src.view(), &g, &g, -1.0), src);

        let shifted = grid(10.0, 20.0, 10.0, 2, 1);
        assert_eq!(nearest(src.view(), &g, &shifted, -1.0), array![[2.0, -1.0]]);
    }

    #[test]
    fn test_average_ignores_no_data() {
        let src = array![[1.0, 3.0, 0.0], [5.0, -9.0, 0.0], [0.0, 0.0, 0.0]];
        let fine = grid(0.0, 30.0, 10.0, 3, 3);
        let coarse = grid(0.0, 30.0, 20.0, 1, 1);
        let out = average(src.view(), &fine, &coarse, Some(-9.0), -9.0);
        assert_relative_eq!(out[(0, 0)], 3.0);
    }

    #[test]
    fn test_average_of_fractional_overlap() {
        // 15m pixels over 10m pixels: the first footprint spans 1.5 source cells
        let src = array![[2.0, 4.0, 6.0]];
        let fine = grid(0.0, 10.0, 10.0, 3, 1);
        let mid = Grid::from_origin(0.0, 10.0, Resolution::new(15.0, 10.0), 2, 1, Projection::from_epsg(32633))
            .unwrap();
        let out = average(src.view(), &fine, &mid, None, 0.0);
        assert_relative_eq!(out[(0, 0)], (2.0 + 0.5 * 4.0) / 1.5);
        assert_relative_eq!(out[(0, 1)], (0.5 * 4.0 + 6.0) / 1.5);
    }

    #[test]
    fn test_coverage_counts_outside_as_uncovered() {
        let src = array![[1.0, 1.0], [1.0, 0.0]];
        let fine = grid(0.0, 20.0, 10.0, 2, 2);
        let coarse = grid(0.0, 20.0, 20.0, 1, 1);
        let out = coverage(src.view(), &fine, &coarse, |v| v != 0.0);
        assert_relative_eq!(out[(0, 0)], 0.75);

        let larger = grid(0.0, 20.0, 40.0, 1, 1);
        let out = coverage(src.view(), &fine, &larger, |v| v != 0.0);
        assert_relative_eq!(out[(0, 0)], 3.0 / 16.0);
    }

    #[test]
    fn test_footprint_mean_counts_rejected_values_as_zero() {
        let src = array![[0.5, -1.0], [1.0, 0.5]];
        let fine = grid(0.0, 20.0, 10.0, 2, 2);
        let coarse = grid(0.0, 20.0, 20.0, 1, 1);
        let out = footprint_mean(src.view(), &fine, &coarse, |v| v.max(0.0));
        assert_relative_eq!(out[(0, 0)], 0.5);

        let larger = grid(0.0, 20.0, 40.0, 1, 1);
        let out = footprint_mean(src.view(), &fine, &larger, |v| v.max(0.0));
        assert_relative_eq!(out[(0, 0)], 0.125);
    }

    #[test]
    fn test_category_fractions_nine_to_one() {
        let src = array![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        let fine = grid(0.0, 30.0, 10.0, 3, 3);
        let coarse = grid(0.0, 30.0, 30.0, 1, 1);
        let out = category_fractions(src.view(), &fine, &coarse, &[1.0, 2.0, 3.0]);
        assert_relative_eq!(out[(0, 0, 0)], 6.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(out[(1, 0, 0)], 3.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(out[(2, 0, 0)], 0.0);
    }

    #[test]
    fn test_is_no_data() {
        assert!(is_no_data(f64::NAN, None));
        assert!(is_no_data(-9999.0, Some(-9999.0)));
        assert!(!is_no_data(0.0, None));
        assert!(!is_no_data(1.0, Some(f64::NAN)));
    }
}
