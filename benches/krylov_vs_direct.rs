use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use krydd::parallel::SerialComm;
use krydd::{CsrMatrix, Method, Orchestrator, SolverConfig};

/// 2-D Poisson operator on a g×g grid.
fn poisson(g: usize) -> CsrMatrix<f64> {
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

fn bench_krylov_vs_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("poisson");
    for g in [16, 32] {
        let a = poisson(g);
        let b = vec![1.0; g * g];
        let configs = [
            ("direct", SolverConfig::new(Method::Direct)),
            ("ilu-gmres", SolverConfig::new(Method::Gmres).with_preconditioning(true)),
            ("ilu-bicgstab", SolverConfig::new(Method::BiCgStab).with_preconditioning(true)),
            (
                "scaled-ilu-bicgsafe",
                SolverConfig::new(Method::BiCgSafe).with_scaling(true).with_preconditioning(true),
            ),
        ];
        for (name, cfg) in configs {
            let orchestrator = Orchestrator::new(cfg, &SerialComm);
            group.bench_with_input(BenchmarkId::new(name, g * g), &g, |bench, _| {
                bench.iter(|| {
                    let (mut a, mut b) = (a.clone(), b.clone());
                    let mut x = vec![0.0; g * g];
                    black_box(orchestrator.run(&mut a, &mut x, &mut b).unwrap());
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_krylov_vs_direct);
criterion_main!(benches);
