//! Pixel windows in a grid's pixel space

/// A rectangle of pixels, possibly reaching outside the grid it refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row_off: isize,
    pub col_off: isize,
    pub rows: usize,
    pub cols: usize,
}

impl PixelWindow {
    pub fn new(row_off: isize, col_off: isize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    /// Window covering a whole `rows` x `cols` array
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, rows, cols)
    }

    pub fn row_end(&self) -> isize {
        self.row_off + self.rows as isize
    }

    pub fn col_end(&self) -> isize {
        self.col_off + self.cols as isize
    }

    /// Part of the window inside `[0, rows) x [0, cols)`, `None` if disjoint
    pub fn clip(&self, rows: usize, cols: usize) -> Option<PixelWindow> {
        let r0 = self.row_off.max(0);
        let c0 = self.col_off.max(0);
        let r1 = self.row_end().min(rows as isize);
        let c1 = self.col_end().min(cols as isize);
        if r1 <= r0 || c1 <= c0 {
            return None;
        }
        Some(PixelWindow::new(r0, c0, (r1 - r0) as usize, (c1 - c0) as usize))
    }

    /// Same window shifted by (`d_row`, `d_col`)
    pub fn shifted(&self, d_row: isize, d_col: isize) -> PixelWindow {
        PixelWindow::new(self.row_off + d_row, self.col_off + d_col, self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip() {
        let w = PixelWindow::new(-2, 3, 5, 10);
        let c = w.clip(4, 8).unwrap();
        assert_eq!(c, PixelWindow::new(0, 3, 3, 5));
        assert!(PixelWindow::new(10, 0, 2, 2).clip(4, 8).is_none());
    }
}
