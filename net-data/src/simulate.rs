//! Bernoulli-SBM simulation with ground-truth memberships.
//!
//! Backs the `missnet simulate` command and serves as a fixture
//! generator for the inference tests; not a general-purpose SBM library.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A simulated network together with its generating memberships.
#[derive(Debug, Clone)]
pub struct SbmGroundTruth {
    /// Fully observed 0/1 adjacency (no missing markers).
    pub adjacency: DMatrix<f64>,
    /// True block of each node.
    pub memberships: Vec<usize>,
}

/// Draw an N-node Bernoulli SBM.
///
/// * `pi` - block proportions (length Q, must sum to ~1)
/// * `theta` - Q×Q connectivity probabilities (symmetric for undirected)
pub fn simulate_sbm(
    n: usize,
    pi: &[f64],
    theta: &DMatrix<f64>,
    directed: bool,
    seed: u64,
) -> anyhow::Result<SbmGroundTruth> {
    let q = pi.len();
    anyhow::ensure!(q > 0, "at least one block required");
    anyhow::ensure!(
        theta.nrows() == q && theta.ncols() == q,
        "connectivity must be {q} x {q}, got {} x {}",
        theta.nrows(),
        theta.ncols()
    );
    let total: f64 = pi.iter().sum();
    anyhow::ensure!(
        (total - 1.0).abs() < 1e-8,
        "block proportions must sum to 1 (got {total})"
    );
    anyhow::ensure!(
        theta.iter().all(|&p| (0.0..=1.0).contains(&p)),
        "connectivity entries must be probabilities"
    );

    let mut rng = StdRng::seed_from_u64(seed);

    let memberships: Vec<usize> = (0..n).map(|_| draw_categorical(pi, &mut rng)).collect();

    let mut adjacency = DMatrix::zeros(n, n);
    if directed {
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let p = theta[(memberships[i], memberships[j])];
                if rng.random::<f64>() < p {
                    adjacency[(i, j)] = 1.0;
                }
            }
        }
    } else {
        for j in 0..n {
            for i in 0..j {
                let p = theta[(memberships[i], memberships[j])];
                if rng.random::<f64>() < p {
                    adjacency[(i, j)] = 1.0;
                    adjacency[(j, i)] = 1.0;
                }
            }
        }
    }

    Ok(SbmGroundTruth {
        adjacency,
        memberships,
    })
}

/// Q-block planted partition: `p_in` within blocks, `p_out` between.
pub fn planted_partition(
    n: usize,
    q: usize,
    p_in: f64,
    p_out: f64,
    seed: u64,
) -> anyhow::Result<SbmGroundTruth> {
    let pi = vec![1.0 / q as f64; q];
    let theta = DMatrix::from_fn(q, q, |i, j| if i == j { p_in } else { p_out });
    simulate_sbm(n, &pi, &theta, false, seed)
}

fn draw_categorical(pi: &[f64], rng: &mut StdRng) -> usize {
    let u: f64 = rng.random();
    let mut acc = 0.0;
    for (k, &p) in pi.iter().enumerate() {
        acc += p;
        if u < acc {
            return k;
        }
    }
    pi.len() - 1
}
