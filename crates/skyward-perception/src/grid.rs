//! Dense row-major polar grid with wrap-aware access.
//!
//! Rows are elevation bins (south pole first), columns are azimuth bins.
//! Reads through [`PolarGrid::get_wrapped`] never go out of bounds:
//!
//! - columns wrap circularly (`-1` is the last column);
//! - rows past a pole reflect back into the grid and the column shifts by half
//!   the grid width, which is the bin on the other side of the pole.

/// Dense `rows × cols` matrix of `f32` values over the sphere.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarGrid {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl PolarGrid {
    /// A grid with every cell set to `fill`.
    pub fn new(rows: usize, cols: usize, fill: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![fill; rows * cols],
        }
    }

    /// Build a grid from nested rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "ragged rows");
            data.extend_from_slice(row);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Cell at `(row, col)`. Panics when out of range.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// Overwrite cell `(row, col)`. Panics when out of range.
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    /// Set every cell to `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Wrap an arbitrary column offset into `[0, cols)`.
    pub fn wrap_col(&self, col: isize) -> usize {
        wrap_column(col, self.cols)
    }

    /// Source cell for a possibly out-of-range `(row, col)`.
    pub fn wrapped_index(&self, row: isize, col: isize) -> (usize, usize) {
        let rows = self.rows as isize;
        let half = (self.cols / 2) as isize;
        if row < 0 {
            ((-row - 1).min(rows - 1) as usize, self.wrap_col(col + half))
        } else if row >= rows {
            ((2 * rows - row - 1).max(0) as usize, self.wrap_col(col + half))
        } else {
            (row as usize, self.wrap_col(col))
        }
    }

    /// Value at a possibly out-of-range `(row, col)`, see [`Self::wrapped_index`].
    pub fn get_wrapped(&self, row: isize, col: isize) -> f32 {
        let (r, c) = self.wrapped_index(row, col);
        self.get(r, c)
    }

    /// Elementwise in-place addition. Both grids must share a shape.
    pub fn add_assign(&mut self, other: &PolarGrid) {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b;
        }
    }

    /// Iterate `(row, col, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let cols = self.cols;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, v)| (i / cols, i % cols, *v))
    }

    /// Smallest and largest finite value, or `None` if there is none.
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Wrap an azimuth column offset into `[0, cols)` for a grid `cols` wide.
pub fn wrap_column(col: isize, cols: usize) -> usize {
    col.rem_euclid(cols as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(rows: usize, cols: usize) -> PolarGrid {
        let mut g = PolarGrid::new(rows, cols, 0.0);
        for r in 0..rows {
            for c in 0..cols {
                g.set(r, c, (r * cols + c) as f32);
            }
        }
        g
    }

    #[test]
    fn columns_wrap_circularly() {
        let g = numbered(4, 8);
        assert_eq!(g.wrap_col(-1), 7);
        assert_eq!(g.wrap_col(8), 0);
        assert_eq!(g.wrap_col(-17), 7);
        assert_eq!(wrap_column(-1, 60), 59);
        assert_eq!(wrap_column(64, 60), 4);
        assert_eq!(g.get_wrapped(2, -1), g.get(2, 7));
    }

    #[test]
    fn rows_reflect_through_poles() {
        let g = numbered(4, 8);
        assert_eq!(g.wrapped_index(-1, 0), (0, 4));
        assert_eq!(g.wrapped_index(-2, 5), (1, 1));
        assert_eq!(g.wrapped_index(4, 0), (3, 4));
        assert_eq!(g.wrapped_index(5, 7), (2, 3));
    }

    #[test]
    fn finite_range_skips_non_finite() {
        let mut g = PolarGrid::new(2, 2, 1.0);
        g.set(0, 0, f32::INFINITY);
        g.set(1, 1, -3.0);
        assert_eq!(g.finite_range(), Some((-3.0, 1.0)));
        assert_eq!(PolarGrid::new(1, 1, f32::NAN).finite_range(), None);
    }

    #[test]
    fn iter_is_row_major() {
        let g = numbered(2, 3);
        let cells: Vec<_> = g.iter().collect();
        assert_eq!(cells[4], (1, 1, 4.0));
        assert_eq!(cells.len(), 6);
    }

    #[test]
    fn from_rows_matches_set() {
        let g = PolarGrid::from_rows(&[vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert_eq!(g, numbered(2, 3));
    }
}
