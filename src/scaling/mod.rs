//! Row/column equilibration.
//!
//! [`normalize`] scales A in place to D_r · A · D_c so that the largest
//! magnitude in every row and every column approaches one. Each sweep
//! measures the row and column maxima of the currently scaled matrix and
//! divides the accumulated factors by their square roots; sweeps stop once
//! both maxima are within `threshold` of one, or once the sweep budget
//! (the global row count, but at least 64) is spent.
//!
//! The returned [`Normalized`] guard holds the only mutable borrow of the
//! matrix for as long as the scaled state is live. Consuming it with
//! [`Normalized::unnormalize`], or simply dropping it, restores the original
//! entries exactly, so a solve cannot leave a scaled matrix behind on any
//! exit path.
//!
//! Under domain decomposition the maxima are made consistent on shared rows
//! and columns through [`InnerProduct::sync`] and the stopping test through
//! [`InnerProduct::global_max`], so every rank takes the same number of
//! sweeps and computes the same factors a single process would.

use crate::core::traits::{InnerProduct, Scalar};
use crate::matrix::CsrMatrix;
use std::ops::Deref;

pub use crate::core::vector::{scale, unscale};

/// Lower bound on the sweep budget for small matrices.
const MIN_SWEEPS: usize = 64;

/// Scale-quality summary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalingDiagnostics<T> {
    /// ‖row‖₂
    pub row_norm: T,
    /// ‖col‖₂
    pub col_norm: T,
    /// ‖row‖₂ / ‖1/col‖₂
    pub ratio: T,
    pub sweeps: usize,
}

/// Diagonal factors of the current normalization.
#[derive(Clone, Debug)]
pub struct ScalingState<T> {
    /// Row factors: multiply row-space vectors (b) by these.
    pub row: Vec<T>,
    /// Column factors: divide column-space vectors (x) by these on the way in.
    pub col: Vec<T>,
    pub diagnostics: ScalingDiagnostics<T>,
}

/// A matrix in normalized state. Dereferences to the scaled matrix.
pub struct Normalized<'m, T: Scalar> {
    matrix: &'m mut CsrMatrix<T>,
    original: Vec<T>,
    state: ScalingState<T>,
    restored: bool,
}

impl<T: Scalar> Normalized<'_, T> {
    pub fn state(&self) -> &ScalingState<T> {
        &self.state
    }

    pub fn matrix(&self) -> &CsrMatrix<T> {
        self.matrix
    }

    /// Restore the original entries and return the diagnostics.
    pub fn unnormalize(mut self) -> ScalingDiagnostics<T> {
        self.restore();
        self.state.diagnostics
    }

    fn restore(&mut self) {
        if !self.restored {
            self.matrix.values_mut().copy_from_slice(&self.original);
            self.restored = true;
        }
    }
}

impl<T: Scalar> Deref for Normalized<'_, T> {
    type Target = CsrMatrix<T>;

    fn deref(&self) -> &CsrMatrix<T> {
        self.matrix
    }
}

impl<T: Scalar> Drop for Normalized<'_, T> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Equilibrate `a` in place.
pub fn normalize<'m, T: Scalar>(
    a: &'m mut CsrMatrix<T>,
    threshold: T,
    ip: &dyn InnerProduct<T>,
) -> Normalized<'m, T> {
    let (m, n) = (a.nrows(), a.ncols());
    let _span = tracing::debug_span!("normalize", m, n).entered();
    let original = a.values().to_vec();
    let mut row = vec![T::one(); m];
    let mut col = vec![T::one(); n];
    let mut row_max = vec![T::zero(); m];
    let mut col_max = vec![T::zero(); n];
    let mut sweeps = 0;
    // every rank must agree on the bound
    let max_sweeps = ip.global_dim(m).max(MIN_SWEEPS);

    for _ in 0..max_sweeps {
        sweeps += 1;
        row_max.iter_mut().for_each(|v| *v = T::zero());
        col_max.iter_mut().for_each(|v| *v = T::zero());
        for i in 0..m {
            for (j, v) in a.row(i) {
                let mag = v.abs();
                if mag > row_max[i] {
                    row_max[i] = mag;
                }
                if mag > col_max[j] {
                    col_max[j] = mag;
                }
            }
        }
        ip.sync(&mut row_max);
        ip.sync(&mut col_max);

        let dev_r = ip.global_max(apply_sweep(&mut row, &row_max));
        let dev_c = ip.global_max(apply_sweep(&mut col, &col_max));

        let mut k = 0;
        a.for_each_entry_mut(|i, j, v| {
            *v = row[i] * original[k] * col[j];
            k += 1;
        });

        if dev_r <= threshold && dev_c <= threshold {
            break;
        }
    }

    let inv_col: Vec<T> = col.iter().map(|&c| T::one() / c).collect();
    let row_norm = ip.norm(&row);
    let col_norm = ip.norm(&col);
    let inv_col_norm = ip.norm(&inv_col);
    let ratio = if inv_col_norm > T::zero() { row_norm / inv_col_norm } else { T::zero() };
    tracing::debug!(sweeps, ?row_norm, ?col_norm, ?ratio, "equilibration finished");

    Normalized {
        matrix: a,
        original,
        state: ScalingState {
            row,
            col,
            diagnostics: ScalingDiagnostics { row_norm, col_norm, ratio, sweeps },
        },
        restored: false,
    }
}

/// Divide each factor by √max and return the largest |1 − max| seen.
/// Empty rows or columns keep their factor.
fn apply_sweep<T: Scalar>(factors: &mut [T], maxima: &[T]) -> T {
    let mut deviation = T::zero();
    for (f, &mx) in factors.iter_mut().zip(maxima) {
        if mx > T::zero() {
            let d = (T::one() - mx).abs();
            if d > deviation {
                deviation = d;
            }
            *f = *f / mx.sqrt();
        }
    }
    deviation
}
