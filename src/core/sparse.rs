use crate::types::{OperatorError, OperatorResult, Real};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Compressed sparse row matrix.
///
/// Jacobians and precision matrices are sized by the full pixel count, so only
/// the non-zero entries are stored. Column indices are sorted within each row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<Real>,
}

impl CsrMatrix {
    /// Empty matrix with the given shape
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            indptr: vec![0; rows + 1],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Square diagonal matrix. Zero diagonal entries are stored explicitly so
    /// the diagonal stays addressable for every pixel.
    pub fn from_diagonal(diagonal: ArrayView1<Real>) -> Self {
        let n = diagonal.len();
        Self {
            rows: n,
            cols: n,
            indptr: (0..=n).collect(),
            indices: (0..n).collect(),
            data: diagonal.to_vec(),
        }
    }

    /// Block-diagonal layout used for per-pixel Jacobians.
    ///
    /// Row `i` holds `blocks[i, ..]` at columns `i * k .. (i + 1) * k` where
    /// `k = blocks.ncols()`. Rows with `active[i] == false` are left empty.
    pub fn block_diagonal_rows(blocks: ArrayView2<Real>, active: &[bool]) -> OperatorResult<Self> {
        let (rows, k) = blocks.dim();
        if active.len() != rows {
            return Err(OperatorError::ShapeMismatch(format!(
                "block count {} does not match activity flags {}",
                rows,
                active.len()
            )));
        }

        let mut indptr = Vec::with_capacity(rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);

        for (i, row) in blocks.outer_iter().enumerate() {
            if active[i] {
                for (j, &value) in row.iter().enumerate() {
                    indices.push(i * k + j);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Ok(Self {
            rows,
            cols: rows * k,
            indptr,
            indices,
            data,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Value at (row, col); zero when not stored or out of range
    pub fn get(&self, row: usize, col: usize) -> Real {
        if row >= self.rows || col >= self.cols {
            return 0.0;
        }
        let start = self.indptr[row];
        let end = self.indptr[row + 1];
        match self.indices[start..end].binary_search(&col) {
            Ok(pos) => self.data[start + pos],
            Err(_) => 0.0,
        }
    }

    /// Stored entries of one row as (column, value) pairs
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, Real)> + '_ {
        let (start, end) = if row < self.rows {
            (self.indptr[row], self.indptr[row + 1])
        } else {
            (0, 0)
        };
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.data[start..end].iter().copied())
    }

    /// Main diagonal as a dense vector
    pub fn diagonal(&self) -> Array1<Real> {
        let n = self.rows.min(self.cols);
        Array1::from_shape_fn(n, |i| self.get(i, i))
    }

    /// Sparse matrix-vector product
    pub fn mul_vec(&self, x: ArrayView1<Real>) -> OperatorResult<Array1<Real>> {
        if x.len() != self.cols {
            return Err(OperatorError::ShapeMismatch(format!(
                "vector of length {} cannot multiply a {}x{} matrix",
                x.len(),
                self.rows,
                self.cols
            )));
        }

        let mut out = Array1::zeros(self.rows);
        for (i, value) in out.iter_mut().enumerate() {
            *value = self.row(i).map(|(j, a)| a * x[j]).sum();
        }
        Ok(out)
    }

    /// Dense copy, only sensible for small matrices
    pub fn to_dense(&self) -> Array2<Real> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for i in 0..self.rows {
            for (j, value) in self.row(i) {
                dense[[i, j]] = value;
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_diagonal_matrix() {
        let diag = array![4.0, 0.0, 0.25];
        let m = CsrMatrix::from_diagonal(diag.view());

        assert_eq!(m.shape(), (3, 3));
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(0, 0), 4.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.get(0, 2), 0.0);
        assert_eq!(m.get(10, 10), 0.0);
        assert_eq!(m.diagonal(), diag);
    }

    #[test]
    fn test_block_diagonal_layout() {
        let blocks = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let m = CsrMatrix::block_diagonal_rows(blocks.view(), &[true, false, true]).unwrap();

        assert_eq!(m.shape(), (3, 6));
        assert_eq!(m.nnz(), 4);

        let dense = m.to_dense();
        assert_eq!(dense.row(0).to_vec(), vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(dense.row(1).to_vec(), vec![0.0; 6]);
        assert_eq!(dense.row(2).to_vec(), vec![0.0, 0.0, 0.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn test_block_diagonal_rejects_bad_flags() {
        let blocks = Array2::<f64>::zeros((2, 2));
        assert!(CsrMatrix::block_diagonal_rows(blocks.view(), &[true]).is_err());
    }

    #[test]
    fn test_mul_vec() {
        let blocks = array![[1.0, 2.0], [3.0, 4.0]];
        let m = CsrMatrix::block_diagonal_rows(blocks.view(), &[true, true]).unwrap();
        let x = Array1::from(vec![1.0, 1.0, 2.0, 0.5]);

        let y = m.mul_vec(x.view()).unwrap();
        assert_eq!(y, array![3.0, 8.0]);

        assert!(m.mul_vec(array![1.0].view()).is_err());
        assert_eq!(CsrMatrix::zeros(2, 3).nnz(), 0);
    }
}
