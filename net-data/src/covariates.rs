//! Covariate containers for sampling designs and covariate SBMs.
//!
//! Covariates are fixed at construction and come in two shapes: one
//! N×N matrix per dyad-level covariate, or a single N×M matrix of
//! node-level features. Shape conformance against a given network is
//! checked by the consumer (sampling mechanism or SBM layer), not by
//! the network itself.

use nalgebra::DMatrix;

/// Dyad- or node-level covariates.
#[derive(Debug, Clone)]
pub enum Covariates {
    /// One N×N matrix per covariate.
    Dyad(Vec<DMatrix<f64>>),
    /// N×M matrix: one row of M features per node.
    Node(DMatrix<f64>),
}

impl Covariates {
    /// Number of covariates M.
    pub fn count(&self) -> usize {
        match self {
            Covariates::Dyad(mats) => mats.len(),
            Covariates::Node(mat) => mat.ncols(),
        }
    }

    pub fn as_dyad(&self) -> Option<&[DMatrix<f64>]> {
        match self {
            Covariates::Dyad(mats) => Some(mats),
            Covariates::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&DMatrix<f64>> {
        match self {
            Covariates::Node(mat) => Some(mat),
            Covariates::Dyad(_) => None,
        }
    }

    /// All matrices conform to a network with `n` nodes?
    pub fn conforms_to(&self, n: usize) -> bool {
        match self {
            Covariates::Dyad(mats) => mats.iter().all(|m| m.nrows() == n && m.ncols() == n),
            Covariates::Node(mat) => mat.nrows() == n,
        }
    }

    /// Linear effect `beta . x_ij` of dyad covariates at (i, j).
    ///
    /// Only defined for the dyad shape; the consumer validates the shape
    /// at construction.
    pub fn dyad_effect(&self, i: usize, j: usize, beta: &[f64]) -> f64 {
        match self {
            Covariates::Dyad(mats) => mats
                .iter()
                .zip(beta.iter())
                .map(|(m, &b)| b * m[(i, j)])
                .sum(),
            Covariates::Node(_) => 0.0,
        }
    }

    /// Linear effect `beta . x_i` of node covariates at node i.
    pub fn node_effect(&self, i: usize, beta: &[f64]) -> f64 {
        match self {
            Covariates::Node(mat) => mat
                .row(i)
                .iter()
                .zip(beta.iter())
                .map(|(&x, &b)| b * x)
                .sum(),
            Covariates::Dyad(_) => 0.0,
        }
    }

    /// Dense matrix of dyad effects `beta . x_ij` for the whole network.
    pub fn dyad_effect_matrix(&self, n: usize, beta: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| self.dyad_effect(i, j, beta))
    }

    /// The covariate vector at dyad (i, j), for gradient accumulation.
    pub fn dyad_vector(&self, i: usize, j: usize) -> Vec<f64> {
        match self {
            Covariates::Dyad(mats) => mats.iter().map(|m| m[(i, j)]).collect(),
            Covariates::Node(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn dyad_effect_is_linear() {
        let x0 = DMatrix::from_element(3, 3, 1.0);
        let x1 = DMatrix::from_fn(3, 3, |i, j| (i + j) as f64);
        let cov = Covariates::Dyad(vec![x0, x1]);
        assert_eq!(cov.count(), 2);
        assert!(cov.conforms_to(3));
        assert!(!cov.conforms_to(4));
        assert_abs_diff_eq!(cov.dyad_effect(1, 2, &[0.5, 2.0]), 0.5 + 6.0);
    }

    #[test]
    fn node_effect_uses_feature_rows() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let cov = Covariates::Node(x);
        assert_eq!(cov.count(), 2);
        assert_abs_diff_eq!(cov.node_effect(1, &[1.0, -1.0]), -1.0);
    }
}
