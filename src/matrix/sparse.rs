//! Compressed sparse row storage.
//!
//! `CsrMatrix` owns its structure: column indices are sorted within each row
//! and every coordinate appears at most once. The structure is fixed after
//! assembly; only values can change, through [`CsrMatrix::values_mut`], which
//! is what the equilibration transforms use.

use crate::core::traits::{MatShape, MatVec, Scalar};
use crate::error::KError;
use faer::sparse::{SparseColMat, Triplet};

#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Scalar> CsrMatrix<T> {
    /// Assemble from `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates keep the value written last.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, T)],
    ) -> Result<Self, KError> {
        for &(row, col, _) in triplets {
            if row >= nrows || col >= ncols {
                return Err(KError::EntryOutOfBounds { row, col, nrows, ncols });
            }
        }
        let mut order: Vec<usize> = (0..triplets.len()).collect();
        // stable: later writes stay after earlier ones for the same coordinate
        order.sort_by_key(|&k| (triplets[k].0, triplets[k].1));

        let mut row_ptr = vec![0usize; nrows + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values: Vec<T> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;
        for k in order {
            let (row, col, val) = triplets[k];
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v = val;
                }
                continue;
            }
            last = Some((row, col));
            row_ptr[row + 1] += 1;
            col_idx.push(col);
            values.push(val);
        }
        for i in 0..nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Build from raw CSR arrays, validating the structure.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, KError> {
        if row_ptr.len() != nrows + 1 {
            return Err(KError::DimensionMismatch { expected: nrows + 1, found: row_ptr.len() });
        }
        if col_idx.len() != values.len() {
            return Err(KError::DimensionMismatch { expected: col_idx.len(), found: values.len() });
        }
        if row_ptr[0] != 0 || row_ptr[nrows] != col_idx.len() {
            return Err(KError::DimensionMismatch {
                expected: col_idx.len(),
                found: row_ptr[nrows],
            });
        }
        for w in row_ptr.windows(2) {
            if w[0] > w[1] || w[1] > col_idx.len() {
                return Err(KError::DimensionMismatch { expected: col_idx.len(), found: w[1] });
            }
        }
        for i in 0..nrows {
            let cols = &col_idx[row_ptr[i]..row_ptr[i + 1]];
            if let Some(&col) = cols.iter().find(|&&c| c >= ncols) {
                return Err(KError::EntryOutOfBounds { row: i, col, nrows, ncols });
            }
            if cols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(KError::Configuration(format!(
                    "column indices of row {i} are not strictly increasing"
                )));
            }
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Values in storage order; the structure cannot be changed through this.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Column indices of row `i`.
    pub fn row_cols(&self, i: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Values of row `i`, aligned with [`CsrMatrix::row_cols`].
    pub fn row_vals(&self, i: usize) -> &[T] {
        &self.values[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Iterate `(col, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        self.row_cols(i).iter().copied().zip(self.row_vals(i).iter().copied())
    }

    /// Entry (i, j), zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> T {
        match self.row_cols(i).binary_search(&j) {
            Ok(k) => self.values[self.row_ptr[i] + k],
            Err(_) => T::zero(),
        }
    }

    pub fn diagonal(&self) -> Vec<T> {
        (0..self.nrows.min(self.ncols)).map(|i| self.get(i, i)).collect()
    }

    /// Visit every stored entry as `(row, col, &mut value)`.
    pub fn for_each_entry_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, usize, &mut T),
    {
        for i in 0..self.nrows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                f(i, self.col_idx[k], &mut self.values[k]);
            }
        }
    }

    /// Compute y = A · x.
    pub fn spmv(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.ncols, "Input vector x has incorrect length");
        assert_eq!(y.len(), self.nrows, "Output vector y has incorrect length");
        let row_dot = |i: usize| {
            self.row(i).fold(T::zero(), |acc, (j, a)| acc + a * x[j])
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            y.par_iter_mut().enumerate().for_each(|(i, yi)| *yi = row_dot(i));
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = row_dot(i);
            }
        }
    }

    /// r = b − A · x
    pub fn residual(&self, x: &[T], b: &[T], r: &mut [T]) {
        self.spmv(x, r);
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
    }

    /// Rows `rows` (global indices) with columns renumbered by `local_of`.
    /// Entries whose column maps to `None` are dropped.
    pub fn restrict<F>(&self, rows: &[usize], ncols: usize, local_of: F) -> Self
    where
        F: Fn(usize) -> Option<usize>,
    {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        row_ptr.push(0);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        let mut scratch: Vec<(usize, T)> = Vec::new();
        for &g in rows {
            scratch.clear();
            scratch.extend(self.row(g).filter_map(|(j, v)| local_of(j).map(|lj| (lj, v))));
            scratch.sort_by_key(|&(lj, _)| lj);
            for &(lj, v) in &scratch {
                col_idx.push(lj);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self { nrows: rows.len(), ncols, row_ptr, col_idx, values }
    }

    /// Symmetrized off-diagonal graph of the pattern:
    /// adj[i] = { j ≠ i | A[i,j] stored or A[j,i] stored }, sorted.
    pub fn pattern_adjacency(&self) -> Vec<Vec<usize>> {
        let n = self.nrows.max(self.ncols);
        let mut adj = vec![Vec::new(); n];
        for i in 0..self.nrows {
            for &j in self.row_cols(i) {
                if i != j {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        for nbrs in &mut adj {
            nbrs.sort_unstable();
            nbrs.dedup();
        }
        adj
    }
}

impl CsrMatrix<f64> {
    /// Convert to faer's compressed-column format for the direct engine.
    pub fn to_faer(&self) -> Result<SparseColMat<usize, f64>, KError> {
        let mut triplets = Vec::with_capacity(self.nnz());
        for i in 0..self.nrows {
            for (j, v) in self.row(i) {
                if !v.is_finite() {
                    return Err(KError::FactorizationFailed(format!(
                        "matrix entry ({i}, {j}) is not finite"
                    )));
                }
                triplets.push(Triplet::new(i, j, v));
            }
        }
        SparseColMat::<usize, f64>::try_new_from_triplets(self.nrows, self.ncols, &triplets)
            .map_err(|e| KError::FactorizationFailed(format!("sparse matrix build failed: {e:?}")))
    }
}

impl<T: Scalar> MatVec<T> for CsrMatrix<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        self.spmv(x, y);
    }
}

impl<T: Scalar> MatShape for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
}
