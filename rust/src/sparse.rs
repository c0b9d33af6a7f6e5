//! Compressed sparse row matrices for CME generators.

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

/// Square sparse matrix in CSR layout.
///
/// Built from `(row, col, value)` triplets: duplicates are summed and
/// entries that end up exactly zero are dropped. Column indices within each
/// row are sorted, so two builds from the same triplet multiset are
/// bit-identical regardless of triplet order within a `(row, col)` group.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble an `n × n` matrix from coordinate triplets.
    ///
    /// Triplets with equal `(row, col)` are summed in the order given.
    ///
    /// # Panics
    /// If a row or column index is `>= n`.
    pub fn from_triplets(n: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        // Stable sort keeps the summation order of duplicates fixed.
        triplets.sort_by_key(|&(row, col, _)| (row, col));

        let mut row_ptr = vec![0usize; n + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());

        let mut iter = triplets.into_iter().peekable();
        while let Some((row, col, mut value)) = iter.next() {
            assert!(row < n && col < n, "entry ({row}, {col}) outside {n}x{n}");
            while let Some(&(r, c, v)) = iter.peek() {
                if (r, c) != (row, col) {
                    break;
                }
                value += v;
                iter.next();
            }
            if value != 0.0 {
                col_idx.push(col);
                values.push(value);
                row_ptr[row + 1] += 1;
            }
        }

        for i in 0..n {
            row_ptr[i + 1] += row_ptr[i];
        }

        Self {
            n,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Matrix dimension.
    #[inline]
    pub fn size(&self) -> usize {
        self.n
    }

    /// Number of stored (non-zero) entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Entry at `(row, col)`, zero if not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let span = self.row_ptr[row]..self.row_ptr[row + 1];
        match self.col_idx[span.clone()].binary_search(&col) {
            Ok(k) => self.values[span.start + k],
            Err(_) => 0.0,
        }
    }

    /// Stored entries as `(row, col, value)`, row-major.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n).flat_map(move |row| {
            (self.row_ptr[row]..self.row_ptr[row + 1])
                .map(move |k| (row, self.col_idx[k], self.values[k]))
        })
    }

    /// `y += alpha * A * x`.
    pub fn mul_add(&self, alpha: f64, x: ArrayView1<f64>, mut y: ArrayViewMut1<f64>) {
        debug_assert_eq!(x.len(), self.n);
        debug_assert_eq!(y.len(), self.n);
        for row in 0..self.n {
            let mut acc = 0.0;
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                acc += self.values[k] * x[self.col_idx[k]];
            }
            y[row] += alpha * acc;
        }
    }

    /// Sum of each column.
    pub fn column_sums(&self) -> Array1<f64> {
        let mut sums = Array1::zeros(self.n);
        for (_, col, value) in self.entries() {
            sums[col] += value;
        }
        sums
    }
}
