//! ILU(k, τ) apply is pure: repeated and concurrent applications after one
//! factorization give identical output.

use approx::assert_abs_diff_eq;
use krydd::{CsrMatrix, Ilu, Preconditioner};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;

/// Random sparse matrix with a dominant diagonal and a banded-plus-random
/// pattern, so ILU(k) has real fill to drop.
fn random_sparse(n: usize, seed: u64) -> CsrMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, 8.0 + rng.gen_range(0.0..1.0)));
        if i > 0 {
            t.push((i, i - 1, rng.gen_range(-1.0..1.0)));
        }
        if i + 1 < n {
            t.push((i, i + 1, rng.gen_range(-1.0..1.0)));
        }
        let j = rng.gen_range(0..n);
        if j != i {
            t.push((i, j, rng.gen_range(-1.0..1.0)));
        }
    }
    CsrMatrix::from_triplets(n, n, &t).unwrap()
}

#[test]
fn repeated_apply_is_bitwise_stable() {
    let a = random_sparse(120, 1);
    let ilu = Ilu::factorize(&a, 1, 1e-3).unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    let r: Vec<f64> = (0..120).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut first = vec![0.0; 120];
    ilu.apply(&r, &mut first).unwrap();
    for _ in 0..10 {
        let mut z = vec![f64::NAN; 120];
        ilu.apply(&r, &mut z).unwrap();
        assert_eq!(z, first);
    }
}

#[test]
fn concurrent_apply_matches_sequential() {
    let a = random_sparse(200, 3);
    let ilu = Ilu::factorize(&a, 2, 1e-4).unwrap();
    let inputs: Vec<Vec<f64>> = (0..8u64)
        .map(|s| {
            let mut rng = StdRng::seed_from_u64(10 + s);
            (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect()
        })
        .collect();
    let sequential: Vec<Vec<f64>> = inputs
        .iter()
        .map(|r| {
            let mut z = vec![0.0; 200];
            ilu.apply(r, &mut z).unwrap();
            z
        })
        .collect();

    let pc: &dyn Preconditioner<f64> = &ilu;
    let concurrent: Vec<Vec<f64>> = thread::scope(|s| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|r| {
                s.spawn(move || {
                    let mut z = vec![0.0; 200];
                    for _ in 0..20 {
                        pc.apply(r, &mut z).unwrap();
                    }
                    z
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(concurrent, sequential);
}

#[test]
fn higher_fill_level_is_a_better_approximation() {
    let a = random_sparse(150, 5);
    let x: Vec<f64> = (0..150).map(|i| (i as f64 * 0.1).sin()).collect();
    let mut b = vec![0.0; 150];
    a.spmv(&x, &mut b);
    let error = |level: usize| {
        let ilu = Ilu::factorize(&a, level, 0.0).unwrap();
        let mut z = vec![0.0; 150];
        ilu.apply(&b, &mut z).unwrap();
        z.iter().zip(&x).map(|(zi, xi)| (zi - xi).powi(2)).sum::<f64>().sqrt()
    };
    let e0 = error(0);
    let e_full = error(150);
    assert!(e_full < e0);
    assert_abs_diff_eq!(e_full, 0.0, epsilon = 1e-10);
}

#[test]
fn fill_threshold_drops_entries() {
    let a = random_sparse(100, 9);
    let dense_fill = Ilu::factorize(&a, 3, 0.0).unwrap();
    let sparse_fill = Ilu::factorize(&a, 3, 0.05).unwrap();
    assert!(sparse_fill.nnz() < dense_fill.nnz());
    assert!(dense_fill.nnz() >= a.nnz());
}
