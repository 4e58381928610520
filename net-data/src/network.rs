//! Partly observed network representation.
//!
//! Wraps an N×N dyad matrix with three logical layers:
//! - `Y`: realized dyad values (1 where an observed edge is present),
//! - `R`: observation indicators (1 where the dyad was sampled),
//! - `sampled_nodes`: per-node observed flags.
//!
//! Both `Y` and `R` are stored as sparse CSC matrices holding *both*
//! triangles for undirected networks; the closed-form kernels downstream
//! rely on that symmetry (and compensate with a 1/2 factor).

use nalgebra::DMatrix;
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};
use thiserror::Error;

use crate::clustering::spectral_clustering;

/// Errors raised while validating a raw adjacency matrix.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("adjacency matrix must be square (got {nrows} x {ncols})")]
    NotSquare { nrows: usize, ncols: usize },

    #[error("adjacency entries must be 0, 1 or NaN (found {value} at ({row}, {col}))")]
    InvalidEntry { row: usize, col: usize, value: f64 },

    #[error("requested {q} blocks for a network with {n} nodes")]
    BlockCountOutOfRange { q: usize, n: usize },
}

/// An N×N network with possibly missing dyads.
///
/// Read-only after construction: the VEM fitters own their mutable
/// state and only borrow the network.
#[derive(Debug, Clone)]
pub struct PartlyObservedNetwork {
    adjacency: DMatrix<f64>,
    y: CscMatrix<f64>,
    r: CscMatrix<f64>,
    directed: bool,
    sampled_nodes: Vec<bool>,
    nb_observed_dyads: usize,
}

impl PartlyObservedNetwork {
    /// Build the network from a dense adjacency matrix where NaN marks a
    /// missing dyad. The diagonal is never a valid dyad and is ignored.
    ///
    /// Directedness is derived once from symmetry: the network is
    /// undirected iff, whenever both triangle entries are observed, they
    /// agree. For undirected networks an asymmetric missingness pattern
    /// is symmetrized with OR (a dyad is observed if either triangle
    /// entry is).
    pub fn from_adjacency(adjacency: DMatrix<f64>) -> Result<Self, NetworkError> {
        let (nrows, ncols) = adjacency.shape();
        if nrows != ncols {
            return Err(NetworkError::NotSquare { nrows, ncols });
        }
        let n = nrows;

        for j in 0..n {
            for i in 0..n {
                if i == j {
                    continue;
                }
                let v = adjacency[(i, j)];
                if !v.is_nan() && v != 0.0 && v != 1.0 {
                    return Err(NetworkError::InvalidEntry {
                        row: i,
                        col: j,
                        value: v,
                    });
                }
            }
        }

        let directed = !is_value_symmetric(&adjacency);

        let mut y_coo = CooMatrix::new(n, n);
        let mut r_coo = CooMatrix::new(n, n);
        let mut sampled_nodes = vec![false; n];
        let mut nb_observed_dyads = 0usize;

        if directed {
            for j in 0..n {
                for i in 0..n {
                    if i == j {
                        continue;
                    }
                    let v = adjacency[(i, j)];
                    if v.is_nan() {
                        continue;
                    }
                    r_coo.push(i, j, 1.0);
                    if v == 1.0 {
                        y_coo.push(i, j, 1.0);
                    }
                    sampled_nodes[i] = true;
                    sampled_nodes[j] = true;
                    nb_observed_dyads += 1;
                }
            }
        } else {
            for j in 0..n {
                for i in 0..j {
                    // OR-symmetrized: a dyad counts as observed if either
                    // triangle entry is.
                    let (a, b) = (adjacency[(i, j)], adjacency[(j, i)]);
                    let v = if a.is_nan() { b } else { a };
                    if v.is_nan() {
                        continue;
                    }
                    r_coo.push(i, j, 1.0);
                    r_coo.push(j, i, 1.0);
                    if v == 1.0 {
                        y_coo.push(i, j, 1.0);
                        y_coo.push(j, i, 1.0);
                    }
                    sampled_nodes[i] = true;
                    sampled_nodes[j] = true;
                    nb_observed_dyads += 1;
                }
            }
        }

        Ok(PartlyObservedNetwork {
            adjacency,
            y: CscMatrix::from(&y_coo),
            r: CscMatrix::from(&r_coo),
            directed,
            sampled_nodes,
            nb_observed_dyads,
        })
    }

    /// Number of nodes N.
    pub fn n_nodes(&self) -> usize {
        self.adjacency.nrows()
    }

    /// Number of dyads: N(N-1)/2 undirected, N(N-1) directed.
    pub fn nb_dyads(&self) -> usize {
        let n = self.n_nodes();
        if self.directed {
            n * (n - 1)
        } else {
            n * (n - 1) / 2
        }
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Realized dyad values (both triangles for undirected networks).
    pub fn y(&self) -> &CscMatrix<f64> {
        &self.y
    }

    /// Observation indicators (both triangles for undirected networks).
    pub fn r(&self) -> &CscMatrix<f64> {
        &self.r
    }

    /// The raw adjacency with NaN missing markers.
    pub fn adjacency(&self) -> &DMatrix<f64> {
        &self.adjacency
    }

    /// Per-node observed flags (a node is observed when at least one of
    /// its dyads is).
    pub fn sampled_nodes(&self) -> &[bool] {
        &self.sampled_nodes
    }

    pub fn nb_sampled_nodes(&self) -> usize {
        self.sampled_nodes.iter().filter(|&&s| s).count()
    }

    /// Number of observed dyads (each undirected dyad counted once).
    pub fn nb_observed_dyads(&self) -> usize {
        self.nb_observed_dyads
    }

    pub fn nb_missing_dyads(&self) -> usize {
        self.nb_dyads() - self.nb_observed_dyads
    }

    /// Zero-imputed dense value matrix (missing dyads treated as absent).
    pub fn zero_imputed(&self) -> DMatrix<f64> {
        let n = self.n_nodes();
        let mut dense = DMatrix::zeros(n, n);
        for (i, j, &v) in self.y.triplet_iter() {
            dense[(i, j)] = v;
        }
        dense
    }

    /// Initial hard clustering of the nodes into `q` blocks, from a
    /// spectral embedding of the zero-imputed observed sub-network.
    pub fn clustering_init(&self, q: usize, seed: u64) -> Result<Vec<usize>, NetworkError> {
        let n = self.n_nodes();
        if q == 0 || q > n {
            return Err(NetworkError::BlockCountOutOfRange { q, n });
        }
        if q == 1 {
            return Ok(vec![0; n]);
        }
        let mut dense = self.zero_imputed();
        if self.directed {
            // spectral embedding works on the symmetrized graph
            let t = dense.transpose();
            dense += t;
        }
        Ok(spectral_clustering(&dense, q, seed))
    }
}

/// Symmetric up to missingness: wherever both triangle entries are
/// observed they must agree.
fn is_value_symmetric(adjacency: &DMatrix<f64>) -> bool {
    let n = adjacency.nrows();
    for j in 0..n {
        for i in 0..j {
            let (a, b) = (adjacency[(i, j)], adjacency[(j, i)]);
            if !a.is_nan() && !b.is_nan() && a != b {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fully_observed_undirected(n: usize) -> DMatrix<f64> {
        let mut adj = DMatrix::zeros(n, n);
        for j in 0..n {
            for i in 0..j {
                let v = if (i + j) % 2 == 0 { 1.0 } else { 0.0 };
                adj[(i, j)] = v;
                adj[(j, i)] = v;
            }
        }
        adj
    }

    #[test]
    fn fully_observed_dyad_counts() {
        let net = PartlyObservedNetwork::from_adjacency(fully_observed_undirected(10)).unwrap();
        assert!(!net.is_directed());
        assert_eq!(net.nb_dyads(), 45);
        assert_eq!(net.nb_observed_dyads(), 45);
        assert_eq!(net.nb_missing_dyads(), 0);
        assert!(net.sampled_nodes().iter().all(|&s| s));
    }

    #[test]
    fn directed_dyad_counts() {
        let mut adj = DMatrix::zeros(4, 4);
        adj[(0, 1)] = 1.0;
        // (1, 0) stays 0 -> asymmetric -> directed
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();
        assert!(net.is_directed());
        assert_eq!(net.nb_dyads(), 12);
        assert_eq!(net.nb_observed_dyads(), 12);
    }

    #[test]
    fn missing_dyads_are_counted() {
        let mut adj = fully_observed_undirected(6);
        adj[(0, 1)] = f64::NAN;
        adj[(1, 0)] = f64::NAN;
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();
        assert!(!net.is_directed());
        assert_eq!(net.nb_observed_dyads(), 14);
        assert_eq!(net.nb_missing_dyads(), 1);
    }

    #[test]
    fn asymmetric_missingness_is_or_symmetrized() {
        let mut adj = fully_observed_undirected(5);
        adj[(2, 3)] = f64::NAN; // (3, 2) still observed
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();
        assert!(!net.is_directed());
        assert_eq!(net.nb_missing_dyads(), 0);
    }

    #[test]
    fn isolated_unobserved_node() {
        let mut adj = fully_observed_undirected(5);
        for k in 0..5 {
            if k != 4 {
                adj[(k, 4)] = f64::NAN;
                adj[(4, k)] = f64::NAN;
            }
        }
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();
        assert!(!net.sampled_nodes()[4]);
        assert_eq!(net.nb_sampled_nodes(), 4);
    }

    #[test]
    fn rejects_non_square() {
        let adj = DMatrix::<f64>::zeros(3, 4);
        assert!(matches!(
            PartlyObservedNetwork::from_adjacency(adj),
            Err(NetworkError::NotSquare { .. })
        ));
    }

    #[test]
    fn rejects_non_binary_entries() {
        let mut adj = DMatrix::<f64>::zeros(3, 3);
        adj[(0, 1)] = 0.5;
        adj[(1, 0)] = 0.5;
        assert!(matches!(
            PartlyObservedNetwork::from_adjacency(adj),
            Err(NetworkError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn clustering_init_bounds() {
        let net = PartlyObservedNetwork::from_adjacency(fully_observed_undirected(6)).unwrap();
        assert!(net.clustering_init(0, 42).is_err());
        assert!(net.clustering_init(7, 42).is_err());
        let labels = net.clustering_init(2, 42).unwrap();
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|&c| c < 2));
    }
}
