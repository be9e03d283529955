//! Partitioning a grid into tiles for bounded-memory processing

use super::{Grid, PixelWindow};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tile size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSize {
    pub rows: usize,
    pub cols: usize,
}

impl BlockSize {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn square(size: usize) -> Self {
        Self::new(size, size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(Error::InvalidParameter {
                name: "block_size",
                value: format!("{}x{}", self.rows, self.cols),
                reason: "tile dimensions must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::square(256)
    }
}

/// One tile of a parent grid.
///
/// Tile identity never includes overlap padding; see [`Subgrid::padded`].
#[derive(Debug, Clone)]
pub struct Subgrid {
    /// The tile as a grid of its own
    pub grid: Grid,
    /// Position in row-major visitation order
    pub index: usize,
    /// Tile row in the tile layout
    pub row: usize,
    /// Tile column in the tile layout
    pub col: usize,
    /// Row offset in the parent grid
    pub row_offset: usize,
    /// Column offset in the parent grid
    pub col_offset: usize,
}

/// A tile grown by an overlap border for neighborhood operations.
#[derive(Debug, Clone)]
pub struct PaddedSubgrid {
    /// Tile grid grown by `overlap` pixels on every side
    pub grid: Grid,
    pub overlap: usize,
    /// Part of `grid` (in its own pixel space) lying inside the parent grid.
    /// Pixels outside this window carry no source data.
    pub valid: PixelWindow,
}

impl Subgrid {
    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    /// Convert tile-local coordinates to parent grid coordinates
    pub fn to_parent_coords(&self, local_row: usize, local_col: usize) -> (usize, usize) {
        (self.row_offset + local_row, self.col_offset + local_col)
    }

    /// The tile with `overlap` pixels of context, clipped at the parent boundary.
    pub fn padded(&self, overlap: usize, parent: &Grid) -> Result<PaddedSubgrid> {
        let grid = if overlap == 0 {
            self.grid.clone()
        } else {
            self.grid.pad(overlap)?
        };
        let (rows, cols) = grid.shape();
        let in_parent = PixelWindow::new(
            self.row_offset as isize - overlap as isize,
            self.col_offset as isize - overlap as isize,
            rows,
            cols,
        );
        let valid = in_parent
            .clip(parent.height(), parent.width())
            .map(|w| w.shifted(-in_parent.row_off, -in_parent.col_off))
            .ok_or_else(|| Error::InvalidGrid("tile lies outside its parent grid".into()))?;
        Ok(PaddedSubgrid {
            grid,
            overlap,
            valid,
        })
    }
}

/// Lazy, finite iterator over the tiles of a grid in row-major order
pub struct Subgrids<'a> {
    parent: &'a Grid,
    size: BlockSize,
    tiles_down: usize,
    tiles_across: usize,
    next: usize,
}

impl<'a> Subgrids<'a> {
    pub(super) fn new(parent: &'a Grid, size: BlockSize) -> Self {
        let size = BlockSize::new(size.rows.max(1), size.cols.max(1));
        Self {
            parent,
            size,
            tiles_down: parent.height().div_ceil(size.rows),
            tiles_across: parent.width().div_ceil(size.cols),
            next: 0,
        }
    }

    /// Tile layout as (tile rows, tile columns)
    pub fn layout(&self) -> (usize, usize) {
        (self.tiles_down, self.tiles_across)
    }

    fn tile(&self, index: usize) -> Subgrid {
        let row = index / self.tiles_across;
        let col = index % self.tiles_across;
        let row_offset = row * self.size.rows;
        let col_offset = col * self.size.cols;
        let rows = self.size.rows.min(self.parent.height() - row_offset);
        let cols = self.size.cols.min(self.parent.width() - col_offset);
        Subgrid {
            grid: self.parent.window_grid(row_offset, col_offset, rows, cols),
            index,
            row,
            col,
            row_offset,
            col_offset,
        }
    }
}

impl Iterator for Subgrids<'_> {
    type Item = Subgrid;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.tiles_down * self.tiles_across {
            return None;
        }
        let tile = self.tile(self.next);
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.tiles_down * self.tiles_across - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Subgrids<'_> {}

impl Grid {
    /// In-bounds pixel window as a grid; callers guarantee a non-empty window.
    fn window_grid(&self, row_offset: usize, col_offset: usize, rows: usize, cols: usize) -> Grid {
        let res = self.resolution;
        let xmin = self.extent.xmin + col_offset as f64 * res.x;
        let ymax = self.extent.ymax - row_offset as f64 * res.y;
        Grid {
            extent: super::Extent {
                xmin,
                xmax: xmin + cols as f64 * res.x,
                ymin: ymax - rows as f64 * res.y,
                ymax,
                projection: self.extent.projection.clone(),
            },
            resolution: res,
            width: cols,
            height: rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::Resolution;

    fn parent(rows: usize, cols: usize) -> Grid {
        Grid::from_origin(0.0, 100.0, Resolution::square(1.0), cols, rows, Projection::wgs84())
            .unwrap()
    }

    #[test]
    fn test_tile_coverage() {
        let g = parent(37, 53);
        let mut covered = vec![vec![0u8; 53]; 37];

        for tile in g.subgrids(BlockSize::new(10, 16)) {
            let (rows, cols) = tile.shape();
            for r in 0..rows {
                for c in 0..cols {
                    let (pr, pc) = tile.to_parent_coords(r, c);
                    covered[pr][pc] += 1;
                }
            }
        }

        for row in covered {
            assert!(row.iter().all(|&n| n == 1), "gap or overlap in tiling");
        }
    }

    #[test]
    fn test_row_major_order() {
        let g = parent(20, 30);
        let tiles: Vec<_> = g.subgrids(BlockSize::square(10)).collect();
        assert_eq!(tiles.len(), 6);
        let order: Vec<_> = tiles.iter().map(|t| (t.index, t.row, t.col)).collect();
        assert_eq!(
            order,
            vec![(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 1, 0), (4, 1, 1), (5, 1, 2)]
        );
    }

    #[test]
    fn test_tile_grid_matches_parent_lattice() {
        let g = parent(20, 30);
        let tile = g.subgrids(BlockSize::square(8)).nth(4).unwrap();
        assert_eq!((tile.row, tile.col), (1, 0));
        assert!(tile.grid.is_aligned_with(&g));
        assert_eq!(tile.grid, g.subgrid(8, 0, 8, 8).unwrap());
    }

    #[test]
    fn test_padded_edge_tile_is_clipped() {
        let g = parent(20, 20);
        let first = g.subgrids(BlockSize::square(10)).next().unwrap();
        let padded = first.padded(2, &g).unwrap();
        assert_eq!(padded.grid.shape(), (14, 14));
        assert_eq!(padded.valid, PixelWindow::new(2, 2, 12, 12));

        let last = g.subgrids(BlockSize::square(10)).last().unwrap();
        let padded = last.padded(2, &g).unwrap();
        assert_eq!(padded.valid, PixelWindow::new(0, 0, 12, 12));
    }

    #[test]
    fn test_zero_block_size_invalid() {
        assert!(BlockSize::new(0, 4).validate().is_err());
        assert!(BlockSize::default().validate().is_ok());
    }
}
