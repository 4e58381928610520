//! Spectral clustering for block-membership initialization.
//!
//! Randomized SVD (Alg. 4.4 of Halko et al. 2009) of the degree-normalized
//! adjacency, followed by k-means on the leading left singular vectors.
//! Also provides the adjusted Rand index for comparing memberships.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

type Mat = DMatrix<f64>;

/// Randomized SVD with QR-based subspace iteration.
pub struct RandomizedSvd {
    max_rank: usize,
    iter: usize,
    u_vectors: Mat,
    singular_values: DVector<f64>,
    seed: u64,
}

impl RandomizedSvd {
    pub fn new(max_rank: usize, iter: usize, seed: u64) -> Self {
        Self {
            max_rank,
            iter,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVector::zeros(0),
            seed,
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn singular_values(&self) -> &DVector<f64> {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        let mut rank = nr.min(nc);
        let mut oversample = 0;
        if self.max_rank > 0 && rank > self.max_rank {
            rank = self.max_rank;
            oversample = 5;
        }
        anyhow::ensure!(rank > 0, "must be at least rank = 1");

        let qq = self.rand_subspace_iteration(xx, rank + oversample)?;
        let rank = rank.min(qq.ncols());
        let qq = qq.columns(0, rank).into_owned();

        let bb = qq.transpose() * xx;
        let svd = bb.svd(true, true);

        match svd.u {
            Some(svd_u) => {
                self.u_vectors = &qq * svd_u.columns(0, rank).into_owned();
                self.singular_values = svd.singular_values.rows(0, rank).into_owned();
            }
            None => anyhow::bail!("SVD failed"),
        }
        Ok(())
    }

    // Orthonormal basis whose range approximates the range of xx
    fn rand_subspace_iteration(&self, xx: &Mat, rank_and_oversample: usize) -> anyhow::Result<Mat> {
        let nc = xx.ncols();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let omega = Mat::from_fn(nc, rank_and_oversample, |_, _| {
            rng.sample::<f64, _>(StandardNormal)
        });
        let mut qq = (xx * omega).qr().q();

        for _ in 0..self.iter {
            let ww = (xx.transpose() * &qq).qr().q();
            qq = (xx * ww).qr().q();
        }
        Ok(qq)
    }
}

/// Hard clustering of nodes into `q` groups from the spectral embedding
/// of a (symmetric, zero-imputed) adjacency matrix.
///
/// The adjacency is normalized as `D^{-1/2} A D^{-1/2}` with degrees
/// floored at 1 to keep isolated nodes finite.
pub fn spectral_clustering(adjacency: &DMatrix<f64>, q: usize, seed: u64) -> Vec<usize> {
    let n = adjacency.nrows();
    if q <= 1 || n == 0 {
        return vec![0; n];
    }
    if q >= n {
        // one node per block
        return (0..n).collect();
    }

    let degree: Vec<f64> = (0..n)
        .map(|i| adjacency.row(i).iter().sum::<f64>().max(1.0))
        .collect();
    let normalized = DMatrix::from_fn(n, n, |i, j| {
        adjacency[(i, j)] / (degree[i] * degree[j]).sqrt()
    });

    let mut rsvd = RandomizedSvd::new(q, 5, seed);
    if rsvd.compute(&normalized).is_err() {
        // embedding failed; fall back to a deterministic round-robin split
        return (0..n).map(|i| i % q).collect();
    }

    // row-normalize the embedding before k-means
    let uu = rsvd.matrix_u();
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            let row = uu.row(i);
            let norm = row.norm().max(1e-12);
            row.iter().map(|&x| (x / norm) as f32).collect()
        })
        .collect();

    kmeans_rows(&rows, q)
}

/// K-means over row vectors, returning one label per row.
pub fn kmeans_rows(rows: &[Vec<f32>], q: usize) -> Vec<usize> {
    if q <= 1 || rows.is_empty() {
        return vec![0; rows.len()];
    }
    let data: Vec<Vec<f32>> = rows.to_vec();
    let clust = clustering::kmeans(q, &data, 100);
    clust.membership
}

/// Adjusted Rand index between two hard memberships.
///
/// 1 for identical partitions (up to label permutation), ~0 for
/// independent ones.
pub fn adjusted_rand_index(a: &[usize], b: &[usize]) -> f64 {
    assert_eq!(a.len(), b.len(), "memberships must have equal length");
    let n = a.len();
    if n < 2 {
        return 1.0;
    }

    let ka = a.iter().max().map(|&m| m + 1).unwrap_or(0);
    let kb = b.iter().max().map(|&m| m + 1).unwrap_or(0);

    let mut table = vec![0usize; ka * kb];
    let mut row_sum = vec![0usize; ka];
    let mut col_sum = vec![0usize; kb];
    for (&x, &y) in a.iter().zip(b.iter()) {
        table[x * kb + y] += 1;
        row_sum[x] += 1;
        col_sum[y] += 1;
    }

    let choose2 = |m: usize| (m * m.saturating_sub(1)) as f64 / 2.0;

    let sum_table: f64 = table.iter().map(|&m| choose2(m)).sum();
    let sum_rows: f64 = row_sum.iter().map(|&m| choose2(m)).sum();
    let sum_cols: f64 = col_sum.iter().map(|&m| choose2(m)).sum();
    let total = choose2(n);

    let expected = sum_rows * sum_cols / total;
    let max_index = 0.5 * (sum_rows + sum_cols);
    if (max_index - expected).abs() < 1e-12 {
        return 1.0;
    }
    (sum_table - expected) / (max_index - expected)
}
