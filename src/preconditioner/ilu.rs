//! ILU(k, τ) preconditioner.
//!
//! Incomplete LU with level-of-fill control (Saad §10.3) combined with a
//! magnitude drop rule:
//!
//! - Level 0 holds the diagonal and every entry of A with |a_ij| ≥ τ.
//! - Eliminating row k from row i gives a fill entry (i, j) the level
//!   `lev(i,k) + lev(k,j) + 1`; fill is kept only up to `level`.
//! - Multipliers l_ik with |l_ik| ≤ τ are dropped together with their
//!   updates.
//!
//! The factorization runs row by row in IKJ order. L is unit lower
//! triangular and stored without its diagonal; U stores its diagonal
//! separately. [`Preconditioner::apply`] performs the forward and backward
//! substitutions in the output buffer and touches no other state, so one
//! factorization can be shared by concurrent callers.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, Section 10.3.

use crate::core::traits::Scalar;
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use std::collections::BTreeSet;

/// Sparse row structure for storing L/U factors.
#[derive(Clone, Debug, Default)]
pub struct SparseRow<T> {
    /// Column indices of nonzero entries
    pub cols: Vec<usize>,
    /// Values of nonzero entries
    pub vals: Vec<T>,
}

impl<T> SparseRow<T> {
    pub fn new() -> Self {
        Self { cols: Vec::new(), vals: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// ILU(k, τ) factors.
#[derive(Clone, Debug)]
pub struct Ilu<T> {
    level: usize,
    threshold: T,
    n: usize,
    l: Vec<SparseRow<T>>,
    u: Vec<SparseRow<T>>,
    diag: Vec<T>,
}

const ABSENT: usize = usize::MAX;

impl<T: Scalar> Ilu<T> {
    /// An unfactored preconditioner; call [`Ilu::factor`] before use.
    pub fn new(level: usize, threshold: T) -> Self {
        Self { level, threshold, n: 0, l: Vec::new(), u: Vec::new(), diag: Vec::new() }
    }

    /// Construct and factor in one step.
    pub fn factorize(a: &CsrMatrix<T>, level: usize, threshold: T) -> Result<Self, KError> {
        let mut ilu = Self::new(level, threshold);
        ilu.factor(a)?;
        Ok(ilu)
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn threshold(&self) -> T {
        self.threshold
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Stored entries of L and U, diagonal included.
    pub fn nnz(&self) -> usize {
        self.l.iter().map(SparseRow::len).sum::<usize>()
            + self.u.iter().map(SparseRow::len).sum::<usize>()
            + self.diag.len()
    }

    /// Compute the incomplete factors of `a`, replacing any previous ones.
    ///
    /// Fails with [`KError::SingularPivot`] when a diagonal entry of U is
    /// missing, non-finite, or negligible relative to its row of A.
    pub fn factor(&mut self, a: &CsrMatrix<T>) -> Result<(), KError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(KError::DimensionMismatch { expected: n, found: a.ncols() });
        }
        let _span = tracing::debug_span!("ilu_factor", n, level = self.level).entered();

        let mut l = vec![SparseRow::new(); n];
        let mut u = vec![SparseRow::new(); n];
        let mut u_lev: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut diag = vec![T::zero(); n];

        // dense work row, reset after each row through `touched`
        let mut w = vec![T::zero(); n];
        let mut lev = vec![ABSENT; n];
        let mut touched: Vec<usize> = Vec::new();
        let mut pending: BTreeSet<usize> = BTreeSet::new();

        for i in 0..n {
            let mut row_scale = T::zero();
            for (j, v) in a.row(i) {
                row_scale = row_scale.max(v.abs());
                if j == i || v.abs() >= self.threshold {
                    w[j] = v;
                    lev[j] = 0;
                    touched.push(j);
                    if j < i {
                        pending.insert(j);
                    }
                }
            }
            if lev[i] == ABSENT {
                lev[i] = 0;
                touched.push(i);
            }

            while let Some(k) = pending.pop_first() {
                let lik = w[k] / diag[k];
                let lev_ik = lev[k];
                w[k] = T::zero();
                lev[k] = ABSENT;
                if lik.abs() <= self.threshold {
                    continue;
                }
                l[i].cols.push(k);
                l[i].vals.push(lik);
                for ((&j, &ukj), &lev_kj) in u[k].cols.iter().zip(&u[k].vals).zip(&u_lev[k]) {
                    let fill = lev_ik.saturating_add(lev_kj).saturating_add(1);
                    if lev[j] != ABSENT {
                        w[j] = w[j] - lik * ukj;
                        lev[j] = lev[j].min(fill);
                    } else if fill <= self.level {
                        w[j] = -(lik * ukj);
                        lev[j] = fill;
                        touched.push(j);
                        if j < i {
                            pending.insert(j);
                        }
                    }
                }
            }

            let pivot = w[i];
            let tiny = T::epsilon() * if row_scale > T::zero() { row_scale } else { T::one() };
            if !pivot.is_finite() || pivot.abs() <= tiny {
                tracing::debug!(row = i, ?pivot, "singular pivot");
                return Err(KError::SingularPivot { row: i });
            }
            diag[i] = pivot;

            touched.sort_unstable();
            touched.dedup();
            for &j in &touched {
                if j > i && lev[j] != ABSENT {
                    u[i].cols.push(j);
                    u[i].vals.push(w[j]);
                    u_lev[i].push(lev[j]);
                }
                w[j] = T::zero();
                lev[j] = ABSENT;
            }
            touched.clear();
        }

        self.n = n;
        self.l = l;
        self.u = u;
        self.diag = diag;
        tracing::debug!(nnz = self.nnz(), a_nnz = a.nnz(), "ilu factors ready");
        Ok(())
    }
}

impl<T: Scalar> Preconditioner<T> for Ilu<T> {
    /// Solve L U z = r: forward substitution with unit L, then backward
    /// substitution with U.
    fn apply(&self, r: &[T], z: &mut [T]) -> Result<(), KError> {
        if r.len() != self.n {
            return Err(KError::DimensionMismatch { expected: self.n, found: r.len() });
        }
        if z.len() != self.n {
            return Err(KError::DimensionMismatch { expected: self.n, found: z.len() });
        }
        for i in 0..self.n {
            let row = &self.l[i];
            let mut sum = r[i];
            for (&k, &lik) in row.cols.iter().zip(&row.vals) {
                sum = sum - lik * z[k];
            }
            z[i] = sum;
        }
        for i in (0..self.n).rev() {
            let row = &self.u[i];
            let mut sum = z[i];
            for (&j, &uij) in row.cols.iter().zip(&row.vals) {
                sum = sum - uij * z[j];
            }
            z[i] = sum / self.diag[i];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tridiag(n: usize) -> CsrMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 4.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -2.0));
            }
        }
        CsrMatrix::from_triplets(n, n, &t).unwrap()
    }

    /// 2-D 5-point Laplacian on a g×g grid.
    fn laplacian(g: usize) -> CsrMatrix<f64> {
        let mut t = Vec::new();
        for r in 0..g {
            for c in 0..g {
                let i = r * g + c;
                t.push((i, i, 4.0));
                if c > 0 {
                    t.push((i, i - 1, -1.0));
                }
                if c + 1 < g {
                    t.push((i, i + 1, -1.0));
                }
                if r > 0 {
                    t.push((i, i - g, -1.0));
                }
                if r + 1 < g {
                    t.push((i, i + g, -1.0));
                }
            }
        }
        CsrMatrix::from_triplets(g * g, g * g, &t).unwrap()
    }

    #[test]
    fn exact_on_tridiagonal() {
        let a = tridiag(8);
        let ilu = Ilu::factorize(&a, 0, 1e-12).unwrap();
        let x_true: Vec<f64> = (0..8).map(|i| i as f64 - 2.5).collect();
        let mut b = vec![0.0; 8];
        a.spmv(&x_true, &mut b);
        let mut z = vec![0.0; 8];
        ilu.apply(&b, &mut z).unwrap();
        for (zi, xi) in z.iter().zip(&x_true) {
            assert_abs_diff_eq!(zi, xi, epsilon = 1e-12);
        }
    }

    #[test]
    fn fill_grows_with_level() {
        let a = laplacian(5);
        let ilu0 = Ilu::factorize(&a, 0, 0.0).unwrap();
        let ilu1 = Ilu::factorize(&a, 1, 0.0).unwrap();
        let ilu3 = Ilu::factorize(&a, 3, 0.0).unwrap();
        assert_eq!(ilu0.nnz(), a.nnz());
        assert!(ilu1.nnz() > ilu0.nnz());
        assert!(ilu3.nnz() > ilu1.nnz());
    }

    #[test]
    fn higher_level_is_a_better_inverse() {
        let a = laplacian(6);
        let n = a.nrows();
        let b = vec![1.0; n];
        let err = |ilu: &Ilu<f64>| {
            let mut z = vec![0.0; n];
            ilu.apply(&b, &mut z).unwrap();
            let mut r = vec![0.0; n];
            a.residual(&z, &b, &mut r);
            r.iter().map(|v| v * v).sum::<f64>().sqrt()
        };
        let e0 = err(&Ilu::factorize(&a, 0, 0.0).unwrap());
        let e2 = err(&Ilu::factorize(&a, 2, 0.0).unwrap());
        assert!(e2 < e0, "level 2 residual {e2} not below level 0 residual {e0}");
    }

    #[test]
    fn zero_pivot_is_reported() {
        let a =
            CsrMatrix::from_triplets(2, 2, &[(0, 0, 0.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)])
                .unwrap();
        assert!(matches!(Ilu::factorize(&a, 1, 0.0), Err(KError::SingularPivot { row: 0 })));
        let b =
            CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)])
                .unwrap();
        assert!(matches!(Ilu::factorize(&b, 1, 0.0), Err(KError::SingularPivot { row: 1 })));
    }

    #[test]
    fn small_entries_are_dropped() {
        let t = [(0, 0, 2.0), (0, 1, 1e-12), (1, 0, 1e-12), (1, 1, 3.0)];
        let a = CsrMatrix::from_triplets(2, 2, &t).unwrap();
        let ilu = Ilu::factorize(&a, 1, 1e-8).unwrap();
        assert_eq!(ilu.nnz(), 2);
    }

    #[test]
    fn unfactored_apply_rejects_input() {
        let ilu = Ilu::<f64>::new(1, 1e-8);
        let mut z = vec![0.0; 3];
        assert!(matches!(
            ilu.apply(&[1.0, 2.0, 3.0], &mut z),
            Err(KError::DimensionMismatch { .. })
        ));
    }
}
