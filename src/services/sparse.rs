use ndarray::{Array2, ArrayView2};

/// Compressed sparse row matrix of f64 values
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Builds a matrix from coordinate triplets
    ///
    /// Entries sharing a coordinate are summed, matching the usual COO -> CSR
    /// conversion. Callers must keep every index inside the given shape.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Self {
        debug_assert_eq!(rows.len(), cols.len());
        debug_assert_eq!(rows.len(), values.len());

        // Bucket entries by row
        let mut counts = vec![0usize; n_rows + 1];
        for &r in rows {
            counts[r + 1] += 1;
        }
        for i in 0..n_rows {
            counts[i + 1] += counts[i];
        }
        let mut next = counts.clone();
        let mut order = vec![0usize; rows.len()];
        for (pos, &r) in rows.iter().enumerate() {
            order[next[r]] = pos;
            next[r] += 1;
        }

        // Sort each row by column and merge duplicates
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::with_capacity(rows.len());
        let mut merged = Vec::with_capacity(rows.len());
        indptr.push(0);
        for r in 0..n_rows {
            let row_entries = &mut order[counts[r]..counts[r + 1]];
            row_entries.sort_by_key(|&pos| cols[pos]);
            let mut last_col = None;
            for &pos in row_entries.iter() {
                let c = cols[pos];
                debug_assert!(c < n_cols);
                if last_col == Some(c) {
                    if let Some(v) = merged.last_mut() {
                        *v += values[pos];
                    }
                } else {
                    indices.push(c);
                    merged.push(values[pos]);
                    last_col = Some(c);
                }
            }
            indptr.push(indices.len());
        }

        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            values: merged,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Stored entries after duplicate merging
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Value at (row, col), zero when not stored
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows {
            return 0.0;
        }
        let start = self.indptr[row];
        let end = self.indptr[row + 1];
        match self.indices[start..end].binary_search(&col) {
            Ok(offset) => self.values[start + offset],
            Err(_) => 0.0,
        }
    }

    /// Iterates (col, value) pairs of one row
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.indptr[row];
        let end = self.indptr[row + 1];
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// A · X for a dense X of shape (n_cols, l)
    pub fn dot_dense(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(x.nrows(), self.n_cols);
        let mut out = Array2::zeros((self.n_rows, x.ncols()));
        for r in 0..self.n_rows {
            let mut out_row = out.row_mut(r);
            for (c, v) in self.row(r) {
                out_row.scaled_add(v, &x.row(c));
            }
        }
        out
    }

    /// Aᵀ · X for a dense X of shape (n_rows, l)
    pub fn transpose_dot_dense(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(x.nrows(), self.n_rows);
        let mut out = Array2::zeros((self.n_cols, x.ncols()));
        for r in 0..self.n_rows {
            let x_row = x.row(r);
            for (c, v) in self.row(r) {
                out.row_mut(c).scaled_add(v, &x_row);
            }
        }
        out
    }

    /// Dense copy, for small matrices and tests
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.n_rows, self.n_cols));
        for r in 0..self.n_rows {
            for (c, v) in self.row(r) {
                dense[[r, c]] = v;
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_duplicate_coordinates_are_summed() {
        let m = CsrMatrix::from_triplets(2, 2, &[0, 0, 1], &[1, 1, 0], &[1.5, 2.0, -1.0]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 1), 3.5);
        assert_eq!(m.get(1, 0), -1.0);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_unsorted_input() {
        let m = CsrMatrix::from_triplets(3, 3, &[2, 0, 1, 0], &[0, 2, 1, 0], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            m.to_dense(),
            array![[4.0, 0.0, 2.0], [0.0, 3.0, 0.0], [1.0, 0.0, 0.0]]
        );
    }

    #[test]
    fn test_products_match_dense() {
        let m = CsrMatrix::from_triplets(2, 3, &[0, 0, 1], &[0, 2, 1], &[1.0, 2.0, 3.0]);
        let dense = m.to_dense();
        let x = array![[1.0, 0.5], [2.0, -1.0], [0.0, 4.0]];
        assert_eq!(m.dot_dense(&x.view()), dense.dot(&x));

        let y = array![[1.0], [2.0]];
        assert_eq!(m.transpose_dot_dense(&y.view()), dense.t().dot(&y));
    }

    #[test]
    fn test_empty_rows_keep_shape() {
        let m = CsrMatrix::from_triplets(3, 2, &[2], &[1], &[7.0]);
        assert_eq!(m.shape(), (3, 2));
        assert_eq!(m.row(0).count(), 0);
        assert_eq!(m.get(2, 1), 7.0);
    }
}
