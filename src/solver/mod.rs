//! Krylov & direct solver interfaces.
//!
//! The three Krylov methods implement one strategy trait, [`LinearSolver`],
//! over a [`KrylovSystem`] that bundles the operator, the right-hand side,
//! an optional preconditioner and the reduction handle. The methods never
//! compute a norm or a dot product on their own: everything goes through
//! `sys.ip`, which is what makes the same code correct on one process and
//! under domain decomposition.

use crate::core::traits::{InnerProduct, MatVec, Scalar};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::{Convergence, SolveStats};

/// Everything a Krylov method reads during a solve.
pub struct KrylovSystem<'a, M: ?Sized, T> {
    pub a: &'a M,
    pub b: &'a [T],
    pub pc: Option<&'a dyn Preconditioner<T>>,
    pub ip: &'a dyn InnerProduct<T>,
}

impl<'a, M, T> KrylovSystem<'a, M, T>
where
    M: MatVec<T> + ?Sized,
    T: Scalar,
{
    pub fn new(a: &'a M, b: &'a [T]) -> Self {
        Self { a, b, pc: None, ip: &() }
    }

    pub fn with_preconditioner(mut self, pc: Option<&'a dyn Preconditioner<T>>) -> Self {
        self.pc = pc;
        self
    }

    pub fn with_inner_product(mut self, ip: &'a dyn InnerProduct<T>) -> Self {
        self.ip = ip;
        self
    }

    /// r = b − A x, made consistent on shared entries.
    pub fn residual(&self, x: &[T], r: &mut [T]) {
        self.a.matvec(x, r);
        for (ri, &bi) in r.iter_mut().zip(self.b) {
            *ri = bi - *ri;
        }
        self.ip.sync(r);
    }

    /// y = A x, made consistent on shared entries.
    pub fn apply_op(&self, x: &[T], y: &mut [T]) {
        self.a.matvec(x, y);
        self.ip.sync(y);
    }

    /// z = M⁻¹ r, or a copy of r without a preconditioner.
    pub fn precondition(&self, r: &[T], z: &mut [T]) -> Result<(), KError> {
        match self.pc {
            Some(pc) => {
                pc.apply(r, z)?;
                self.ip.sync(z);
            }
            None => z.copy_from_slice(r),
        }
        Ok(())
    }

    /// ‖b − A x‖ of the given iterate.
    pub fn true_residual_norm(&self, x: &[T]) -> T {
        let mut r = vec![T::zero(); self.b.len()];
        self.residual(x, &mut r);
        self.ip.norm(&r)
    }
}

/// Common interface of the iterative methods.
pub trait LinearSolver<M: ?Sized, T: Scalar> {
    /// Solve A·x = b starting from the contents of `x`, which on return
    /// holds the best available iterate.
    fn solve(&mut self, sys: &KrylovSystem<'_, M, T>, x: &mut [T]) -> Result<SolveStats<T>, KError>;

    fn convergence(&self) -> &Convergence<T>;

    fn convergence_mut(&mut self) -> &mut Convergence<T>;

    fn name(&self) -> &'static str;
}

pub mod bicgsafe;
pub mod bicgstab;
pub mod direct_lu;
pub mod gmres;

pub use bicgsafe::BiCgSafeSolver;
pub use bicgstab::BiCgStabSolver;
pub use direct_lu::{DirectSolver, LuSolver};
pub use gmres::GmresSolver;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::matrix::CsrMatrix;

    /// Diagonally dominant nonsymmetric tridiagonal system with known solution.
    pub fn tridiag_system(n: usize) -> (CsrMatrix<f64>, Vec<f64>, Vec<f64>) {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 4.0 + i as f64 * 0.1));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -0.5));
            }
        }
        let a = CsrMatrix::from_triplets(n, n, &t).unwrap();
        let x_true: Vec<f64> = (0..n).map(|i| 1.0 + (i % 3) as f64).collect();
        let mut b = vec![0.0; n];
        a.spmv(&x_true, &mut b);
        (a, x_true, b)
    }

    /// Nonsymmetric convection–diffusion operator on a g×g grid.
    pub fn convection_diffusion(g: usize) -> CsrMatrix<f64> {
        let mut t = Vec::new();
        for r in 0..g {
            for c in 0..g {
                let i = r * g + c;
                t.push((i, i, 4.0));
                if c > 0 {
                    t.push((i, i - 1, -1.3));
                }
                if c + 1 < g {
                    t.push((i, i + 1, -0.7));
                }
                if r > 0 {
                    t.push((i, i - g, -1.1));
                }
                if r + 1 < g {
                    t.push((i, i + g, -0.9));
                }
            }
        }
        CsrMatrix::from_triplets(g * g, g * g, &t).unwrap()
    }
}
