//! Solve the 4×4 grid demo system, or a Matrix Market system given on the
//! command line, with the solver selected through the environment.
//!
//! ```text
//! RUST_LOG=krydd=info cargo run --example grid_demo
//! KSP=SPBCGS CTHRES=1e-10 RUST_LOG=info cargo run --example grid_demo -- A.mtx b.mtx
//! ```
//!
//! With the `mpi` feature the run spans every rank of `MPI_COMM_WORLD`.

use krydd::{read_matrix_market, read_vector, CsrMatrix, KError, Orchestrator, SolverConfig};
use std::fs::File;
use std::io::BufReader;
use tracing_subscriber::EnvFilter;

fn grid(g: usize) -> Result<CsrMatrix<f64>, KError> {
    let mut t = Vec::new();
    for r in 0..g {
        for c in 0..g {
            let i = r * g + c;
            t.push((i, i, -4.0));
            if c > 0 {
                t.push((i, i - 1, 1.0));
            }
            if c + 1 < g {
                t.push((i, i + 1, 1.0));
            }
            if r > 0 {
                t.push((i, i - g, 1.0));
            }
            if r + 1 < g {
                t.push((i, i + g, 1.0));
            }
        }
    }
    CsrMatrix::from_triplets(g * g, g * g, &t)
}

fn load() -> Result<(CsrMatrix<f64>, Vec<f64>), KError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            let a = grid(4)?;
            let b = vec![1.0; a.nrows()];
            Ok((a, b))
        }
        [matrix] => {
            let a = read_matrix_market(BufReader::new(File::open(matrix)?))?;
            let b = vec![1.0; a.nrows()];
            Ok((a, b))
        }
        [matrix, rhs, ..] => {
            let a = read_matrix_market(BufReader::new(File::open(matrix)?))?;
            let b = read_vector(BufReader::new(File::open(rhs)?))?;
            Ok((a, b))
        }
    }
}

fn main() -> Result<(), KError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = SolverConfig::from_env()?;
    let (mut a, mut b) = load()?;
    let mut x = vec![0.0; a.nrows()];

    #[cfg(feature = "mpi")]
    let comm = krydd::parallel::MpiComm::new()?;
    #[cfg(not(feature = "mpi"))]
    let comm = krydd::parallel::SerialComm;

    let report = Orchestrator::new(config, &comm).run(&mut a, &mut x, &mut b)?;
    if krydd::parallel::Comm::is_root(&comm) {
        println!("method     {}", report.method);
        println!("outcome    {:?}", report.stats.outcome);
        println!("iterations {}", report.stats.iterations);
        let t = &report.times;
        println!("FACT       {:.6} s", t.factorization.as_secs_f64());
        println!("PREC       {:.6} s", t.preconditioner.as_secs_f64());
        println!("ITER       {:.6} s", t.iteration.as_secs_f64());
        if let Some(s) = report.scaling {
            println!("SCAL ratio {:e} rnorm {:e} cnorm {:e}", s.ratio, s.row_norm, s.col_norm);
        }
        println!("|Ax-b|     {:e}", report.residual.absolute);
        println!("|Ax-b|/|x| {:e}", report.residual.relative_to_x);
    }
    Ok(())
}
