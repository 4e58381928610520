//! NMAR designs: the observation probability depends on the realized
//! dyad value, the latent blocks, or the degrees, so parameters are
//! re-estimated inside the joint VEM loop using the variational state.

use nalgebra::{DMatrix, DVector};
use net_data::PartlyObservedNetwork;
use rand::rngs::StdRng;
use rand::Rng;

use super::mar::for_each_dyad;
use super::{
    clamp_proba, dyad_is_observed, dyad_value, node_flags_to_r, PenaltyScale, SamplingDesign,
    SamplingModel, VariationalView,
};
use crate::error::MissNetError;
use crate::kernels::{log1pexp, sigmoid};
use crate::optim;

// ----------------------------------------------------------------
// double standard: P(observe | Y=1) = rho1, P(observe | Y=0) = rho0

#[derive(Debug, Clone)]
pub struct DoubleStandardSampling {
    rho0: f64,
    rho1: f64,
}

impl DoubleStandardSampling {
    pub fn new(rho0: f64, rho1: f64) -> Self {
        DoubleStandardSampling { rho0, rho1 }
    }

    /// Posterior edge probability of a *missing* dyad, combining the
    /// imputed marginal `nu` with the two observation rates.
    fn missing_edge_posterior(&self, nu: f64) -> f64 {
        let p1 = (1.0 - self.rho1) * nu;
        let p0 = (1.0 - self.rho0) * (1.0 - nu);
        if p1 + p0 > 0.0 {
            p1 / (p1 + p0)
        } else {
            nu
        }
    }
}

impl SamplingModel for DoubleStandardSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::DoubleStandard
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.rho0, self.rho1]
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Dyad
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        view: Option<&VariationalView>,
    ) -> f64 {
        let rho0 = clamp_proba(self.rho0);
        let rho1 = clamp_proba(self.rho1);
        // fallback marginal for missing dyads when no variational state
        // is available yet
        let stored_per_dyad = if net.is_directed() { 1.0 } else { 2.0 };
        let marginal = net.y().nnz() as f64 / (stored_per_dyad * net.nb_dyads() as f64).max(1.0);

        let mut ll = 0.0;
        for_each_dyad(net.n_nodes(), net.is_directed(), |i, j| {
            if dyad_is_observed(net, i, j) {
                if dyad_value(net, i, j) == 1.0 {
                    ll += rho1.ln();
                } else {
                    ll += rho0.ln();
                }
            } else {
                let nu = view.map_or(marginal, |v| v.nu[(i, j)]).clamp(0.0, 1.0);
                ll += ((1.0 - rho1) * nu + (1.0 - rho0) * (1.0 - nu)).max(1e-300).ln();
            }
        });
        ll
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let n = adjacency.nrows();
        let mut r = DMatrix::zeros(n, n);
        for_each_dyad(n, directed, |i, j| {
            let p = if adjacency[(i, j)] == 1.0 {
                self.rho1
            } else {
                self.rho0
            };
            if rng.random::<f64>() < p {
                r[(i, j)] = 1.0;
                if !directed {
                    r[(j, i)] = 1.0;
                }
            }
        });
        Ok(r)
    }

    fn update_with_blocks(
        &mut self,
        net: &PartlyObservedNetwork,
        view: &VariationalView,
    ) -> Result<(), MissNetError> {
        // expected edge / non-edge mass split between observed and
        // missing dyads, with the posterior reweighting for the latter
        let mut obs_edges = 0.0;
        let mut obs_holes = 0.0;
        let mut miss_edges = 0.0;
        let mut miss_holes = 0.0;

        for_each_dyad(net.n_nodes(), net.is_directed(), |i, j| {
            if dyad_is_observed(net, i, j) {
                if dyad_value(net, i, j) == 1.0 {
                    obs_edges += 1.0;
                } else {
                    obs_holes += 1.0;
                }
            } else {
                let w = self.missing_edge_posterior(view.nu[(i, j)].clamp(0.0, 1.0));
                miss_edges += w;
                miss_holes += 1.0 - w;
            }
        });

        if obs_edges + miss_edges > 0.0 {
            self.rho1 = clamp_proba(obs_edges / (obs_edges + miss_edges));
        }
        if obs_holes + miss_holes > 0.0 {
            self.rho0 = clamp_proba(obs_holes / (obs_holes + miss_holes));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------
// block-node: node observation probability depends on its block

#[derive(Debug, Clone)]
pub struct BlockNodeSampling {
    /// one observation rate per block; empty until the first update
    rho: Vec<f64>,
    /// ground-truth labels, only needed for drawing
    blocks: Option<Vec<usize>>,
}

impl BlockNodeSampling {
    pub fn new(rho: Vec<f64>, blocks: Option<Vec<usize>>) -> Self {
        BlockNodeSampling { rho, blocks }
    }
}

impl SamplingModel for BlockNodeSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::BlockNode
    }

    fn parameters(&self) -> Vec<f64> {
        self.rho.clone()
    }

    fn parameter_dimension(&self) -> usize {
        self.rho.len().max(1)
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Node
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        view: Option<&VariationalView>,
    ) -> f64 {
        let flags = net.sampled_nodes();
        match view {
            Some(v) if self.rho.len() == v.z.ncols() => {
                let mut ll = 0.0;
                for (i, &s) in flags.iter().enumerate() {
                    for (q, &rho_q) in self.rho.iter().enumerate() {
                        let rho_q = clamp_proba(rho_q);
                        let term = if s { rho_q.ln() } else { (1.0 - rho_q).ln() };
                        ll += v.z[(i, q)] * term;
                    }
                }
                ll
            }
            _ => {
                // marginal fallback: single pooled rate
                let rate = clamp_proba(
                    net.nb_sampled_nodes() as f64 / net.n_nodes() as f64,
                );
                net.nb_sampled_nodes() as f64 * rate.ln()
                    + (net.n_nodes() - net.nb_sampled_nodes()) as f64 * (1.0 - rate).ln()
            }
        }
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        _directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let blocks = self.blocks.as_ref().ok_or_else(|| {
            MissNetError::InvalidInput("block-node sampling needs cluster labels to draw".into())
        })?;
        let n = adjacency.nrows();
        if blocks.len() != n {
            return Err(MissNetError::InvalidInput(format!(
                "{} cluster labels for {} nodes",
                blocks.len(),
                n
            )));
        }
        if let Some(&max) = blocks.iter().max() {
            if max >= self.rho.len() {
                return Err(MissNetError::InvalidInput(format!(
                    "block label {max} has no observation rate (got {} rates)",
                    self.rho.len()
                )));
            }
        }
        let flags: Vec<bool> = (0..n)
            .map(|i| rng.random::<f64>() < self.rho[blocks[i]])
            .collect();
        Ok(node_flags_to_r(&flags))
    }

    fn update_with_blocks(
        &mut self,
        net: &PartlyObservedNetwork,
        view: &VariationalView,
    ) -> Result<(), MissNetError> {
        let q = view.z.ncols();
        let flags = net.sampled_nodes();
        let mut rho = vec![0.0; q];
        for qq in 0..q {
            let mut num = 0.0;
            let mut den = 0.0;
            for (i, &s) in flags.iter().enumerate() {
                num += view.z[(i, qq)] * if s { 1.0 } else { 0.0 };
                den += view.z[(i, qq)];
            }
            rho[qq] = if den > 0.0 {
                clamp_proba(num / den)
            } else {
                0.5
            };
        }
        self.rho = rho;
        Ok(())
    }

    fn log_lambda(&self, net: &PartlyObservedNetwork, q: usize) -> Option<DMatrix<f64>> {
        if self.rho.len() != q {
            return None;
        }
        let flags = net.sampled_nodes();
        Some(DMatrix::from_fn(net.n_nodes(), q, |i, qq| {
            let rho_q = clamp_proba(self.rho[qq]);
            if flags[i] {
                rho_q.ln()
            } else {
                (1.0 - rho_q).ln()
            }
        }))
    }
}

// ----------------------------------------------------------------
// block-dyad: dyad observation probability depends on both endpoint blocks

#[derive(Debug, Clone)]
pub struct BlockDyadSampling {
    /// Q×Q observation rates; 0×0 until the first update
    rho: DMatrix<f64>,
    blocks: Option<Vec<usize>>,
}

impl BlockDyadSampling {
    pub fn new(rho: DMatrix<f64>, blocks: Option<Vec<usize>>) -> Self {
        BlockDyadSampling { rho, blocks }
    }
}

impl SamplingModel for BlockDyadSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::BlockDyad
    }

    fn parameters(&self) -> Vec<f64> {
        self.rho.iter().copied().collect()
    }

    fn parameter_dimension(&self) -> usize {
        self.rho.len().max(1)
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Dyad
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        view: Option<&VariationalView>,
    ) -> f64 {
        match view {
            Some(v) if self.rho.nrows() == v.z.ncols() => {
                let z = v.z;
                let factor = if net.is_directed() { 1.0 } else { 0.5 };
                // both triangles of R are stored, so the bilinear form
                // counts each undirected dyad twice
                let rz: DMatrix<f64> = net.r() * z;
                let num = z.transpose() * rz;

                let cc = DVector::from_iterator(z.ncols(), z.column_iter().map(|c| c.sum()));
                let overlap = z.transpose() * z;
                let total = &cc * cc.transpose() - overlap;

                let mut ll = 0.0;
                for qq in 0..z.ncols() {
                    for l in 0..z.ncols() {
                        let rho = clamp_proba(self.rho[(qq, l)]);
                        ll += num[(qq, l)] * rho.ln()
                            + (total[(qq, l)] - num[(qq, l)]).max(0.0) * (1.0 - rho).ln();
                    }
                }
                factor * ll
            }
            _ => {
                let rate = clamp_proba(
                    net.nb_observed_dyads() as f64 / net.nb_dyads() as f64,
                );
                net.nb_observed_dyads() as f64 * rate.ln()
                    + net.nb_missing_dyads() as f64 * (1.0 - rate).ln()
            }
        }
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let blocks = self.blocks.as_ref().ok_or_else(|| {
            MissNetError::InvalidInput("block-dyad sampling needs cluster labels to draw".into())
        })?;
        let n = adjacency.nrows();
        if blocks.len() != n {
            return Err(MissNetError::InvalidInput(format!(
                "{} cluster labels for {} nodes",
                blocks.len(),
                n
            )));
        }
        if let Some(&max) = blocks.iter().max() {
            if max >= self.rho.nrows() {
                return Err(MissNetError::InvalidInput(format!(
                    "block label {max} outside the {}x{} rate matrix",
                    self.rho.nrows(),
                    self.rho.ncols()
                )));
            }
        }
        let mut r = DMatrix::zeros(n, n);
        for_each_dyad(n, directed, |i, j| {
            if rng.random::<f64>() < self.rho[(blocks[i], blocks[j])] {
                r[(i, j)] = 1.0;
                if !directed {
                    r[(j, i)] = 1.0;
                }
            }
        });
        Ok(r)
    }

    fn update_with_blocks(
        &mut self,
        net: &PartlyObservedNetwork,
        view: &VariationalView,
    ) -> Result<(), MissNetError> {
        let z = view.z;
        // same bilinear pattern as the connectivity M-step: expected
        // observed dyads over expected dyads per block pair
        let rz: DMatrix<f64> = net.r() * z;
        let num = z.transpose() * rz;

        let cc = DVector::from_iterator(z.ncols(), z.column_iter().map(|c| c.sum()));
        let overlap = z.transpose() * z;
        let total = &cc * cc.transpose() - overlap;

        self.rho = DMatrix::from_fn(z.ncols(), z.ncols(), |qq, l| {
            if total[(qq, l)] > 1e-12 {
                clamp_proba(num[(qq, l)] / total[(qq, l)])
            } else {
                0.5
            }
        });
        Ok(())
    }
}

// ----------------------------------------------------------------
// degree: node observation probability is logistic in its degree

#[derive(Debug, Clone)]
pub struct DegreeSampling {
    intercept: f64,
    slope: f64,
}

impl DegreeSampling {
    pub fn new(intercept: f64, slope: f64) -> Self {
        DegreeSampling { intercept, slope }
    }

    /// Imputed degrees: observed edges plus the marginal edge
    /// probability on missing dyads when a variational view exists.
    fn imputed_degrees(net: &PartlyObservedNetwork, view: Option<&VariationalView>) -> Vec<f64> {
        let n = net.n_nodes();
        let y_dense = net.zero_imputed();
        let mut degree = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if dyad_is_observed(net, i, j) || view.is_none() {
                    degree[i] += y_dense[(i, j)];
                } else if let Some(v) = view {
                    degree[i] += v.nu[(i, j)].clamp(0.0, 1.0);
                }
            }
        }
        degree
    }
}

impl SamplingModel for DegreeSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::Degree
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.intercept, self.slope]
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Node
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        view: Option<&VariationalView>,
    ) -> f64 {
        let degree = Self::imputed_degrees(net, view);
        net.sampled_nodes()
            .iter()
            .zip(degree.iter())
            .map(|(&s, &d)| {
                let eta = self.intercept + self.slope * d;
                if s {
                    eta - log1pexp(eta)
                } else {
                    -log1pexp(eta)
                }
            })
            .sum()
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        _directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let n = adjacency.nrows();
        let flags: Vec<bool> = (0..n)
            .map(|i| {
                let d: f64 = adjacency.row(i).iter().filter(|v| !v.is_nan()).sum();
                rng.random::<f64>() < sigmoid(self.intercept + self.slope * d)
            })
            .collect();
        Ok(node_flags_to_r(&flags))
    }

    fn update_with_blocks(
        &mut self,
        net: &PartlyObservedNetwork,
        view: &VariationalView,
    ) -> Result<(), MissNetError> {
        let degree = Self::imputed_degrees(net, Some(view));
        let flags = net.sampled_nodes().to_vec();

        let cost_and_grad = |b: &ndarray::Array1<f64>| -> (f64, ndarray::Array1<f64>) {
            let mut cost = 0.0;
            let mut grad = ndarray::Array1::<f64>::zeros(2);
            for (&s, &d) in flags.iter().zip(degree.iter()) {
                let eta = b[0] + b[1] * d;
                let si = if s { 1.0 } else { 0.0 };
                cost += log1pexp(eta) - si * eta;
                let resid = sigmoid(eta) - si;
                grad[0] += resid;
                grad[1] += resid * d;
            }
            (cost, grad)
        };

        let x0 = ndarray::Array1::from_vec(vec![self.intercept, self.slope]);
        let sol = optim::minimize(x0, cost_and_grad, 1e-8, 100)?;
        self.intercept = sol[0];
        self.slope = sol[1];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use net_data::simulate::{planted_partition, simulate_sbm};
    use rand::SeedableRng;

    #[test]
    fn double_standard_prefers_edges_when_rho1_high() {
        let truth = planted_partition(60, 2, 0.4, 0.1, 21).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let model = DoubleStandardSampling::new(0.2, 0.95);
        let r = model
            .draw_observation(&truth.adjacency, false, &mut rng)
            .unwrap();

        let (mut edge_obs, mut edge_n, mut hole_obs, mut hole_n) = (0.0, 0.0, 0.0, 0.0);
        for j in 0..60 {
            for i in 0..j {
                if truth.adjacency[(i, j)] == 1.0 {
                    edge_n += 1.0;
                    edge_obs += r[(i, j)];
                } else {
                    hole_n += 1.0;
                    hole_obs += r[(i, j)];
                }
            }
        }
        assert!(edge_obs / edge_n > 0.85);
        assert!(hole_obs / hole_n < 0.3);
    }

    #[test]
    fn block_node_update_recovers_per_block_rates() {
        let truth = planted_partition(200, 2, 0.3, 0.05, 33).unwrap();
        let mut rng = StdRng::seed_from_u64(33);
        let gen = BlockNodeSampling::new(vec![0.9, 0.2], Some(truth.memberships.clone()));
        let r = gen
            .draw_observation(&truth.adjacency, false, &mut rng)
            .unwrap();

        let mut adj = truth.adjacency.clone();
        for j in 0..200 {
            for i in 0..200 {
                if i != j && r[(i, j)] == 0.0 {
                    adj[(i, j)] = f64::NAN;
                }
            }
        }
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();

        // hard ground-truth memberships as the variational state
        let z = DMatrix::from_fn(200, 2, |i, q| {
            if truth.memberships[i] == q {
                1.0
            } else {
                0.0
            }
        });
        let nu = DMatrix::from_element(200, 200, 0.15);
        let view = VariationalView { z: &z, nu: &nu };

        let mut fitted = BlockNodeSampling::new(Vec::new(), None);
        fitted.update_with_blocks(&net, &view).unwrap();
        assert_abs_diff_eq!(fitted.rho[0], 0.9, epsilon = 0.08);
        assert_abs_diff_eq!(fitted.rho[1], 0.2, epsilon = 0.12);
    }

    #[test]
    fn block_dyad_update_recovers_the_rate_matrix() {
        let truth = planted_partition(160, 2, 0.3, 0.05, 47).unwrap();
        let rho = DMatrix::from_row_slice(2, 2, &[0.9, 0.3, 0.3, 0.7]);
        let gen = BlockDyadSampling::new(rho, Some(truth.memberships.clone()));
        let mut rng = StdRng::seed_from_u64(47);
        let r = gen
            .draw_observation(&truth.adjacency, false, &mut rng)
            .unwrap();

        let mut adj = truth.adjacency.clone();
        for j in 0..160 {
            for i in 0..160 {
                if i != j && r[(i, j)] == 0.0 {
                    adj[(i, j)] = f64::NAN;
                }
            }
        }
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();

        let z = DMatrix::from_fn(160, 2, |i, q| {
            if truth.memberships[i] == q {
                1.0
            } else {
                0.0
            }
        });
        let nu = DMatrix::from_element(160, 160, 0.15);
        let view = VariationalView { z: &z, nu: &nu };

        let mut fitted = BlockDyadSampling::new(DMatrix::zeros(0, 0), None);
        fitted.update_with_blocks(&net, &view).unwrap();
        assert_eq!(fitted.rho.shape(), (2, 2));
        assert_abs_diff_eq!(fitted.rho[(0, 0)], 0.9, epsilon = 0.05);
        assert_abs_diff_eq!(fitted.rho[(0, 1)], 0.3, epsilon = 0.05);
        assert_abs_diff_eq!(fitted.rho[(1, 1)], 0.7, epsilon = 0.05);
        // both triangles are stored, so cross-block rates come out symmetric
        assert_abs_diff_eq!(fitted.rho[(0, 1)], fitted.rho[(1, 0)], epsilon = 1e-9);
    }

    #[test]
    fn degree_update_recovers_a_positive_slope() {
        // one dense block gives a wide degree spread for the logistic fit
        let pi = [0.5, 0.5];
        let theta = DMatrix::from_row_slice(2, 2, &[0.4, 0.02, 0.02, 0.05]);
        let truth = simulate_sbm(200, &pi, &theta, false, 61).unwrap();
        let gen = DegreeSampling::new(-2.0, 0.08);
        let mut rng = StdRng::seed_from_u64(61);
        let r = gen
            .draw_observation(&truth.adjacency, false, &mut rng)
            .unwrap();

        let mut adj = truth.adjacency.clone();
        for j in 0..200 {
            for i in 0..200 {
                if i != j && r[(i, j)] == 0.0 {
                    adj[(i, j)] = f64::NAN;
                }
            }
        }
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();

        let z = DMatrix::from_fn(200, 2, |i, q| {
            if truth.memberships[i] == q {
                1.0
            } else {
                0.0
            }
        });
        // imputed degrees on hidden dyads use the block-wise edge marginals
        let nu = DMatrix::from_fn(200, 200, |i, j| {
            if i == j {
                0.0
            } else {
                theta[(truth.memberships[i], truth.memberships[j])]
            }
        });
        let view = VariationalView { z: &z, nu: &nu };

        let mut fitted = DegreeSampling::new(0.0, 0.0);
        fitted.update_with_blocks(&net, &view).unwrap();
        let params = fitted.parameters();
        assert!(params[1] > 0.02, "slope should favour hubs: {params:?}");
        assert!(params[0] < 0.0, "intercept should stay negative: {params:?}");
    }

    #[test]
    fn block_node_log_lambda_shape() {
        let truth = planted_partition(30, 2, 0.4, 0.1, 5).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();
        let model = BlockNodeSampling::new(vec![0.7, 0.3], None);
        let ll = model.log_lambda(&net, 2).unwrap();
        assert_eq!(ll.shape(), (30, 2));
        // all nodes observed here, so the term is log rho_q everywhere
        assert_abs_diff_eq!(ll[(0, 0)], 0.7_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(ll[(0, 1)], 0.3_f64.ln(), epsilon = 1e-12);
        assert!(model.log_lambda(&net, 3).is_none());
    }

    #[test]
    fn degree_sampling_favours_hubs() {
        // star-ish network: node 0 connected to everyone
        let n = 40;
        let mut adj = DMatrix::zeros(n, n);
        for j in 1..n {
            adj[(0, j)] = 1.0;
            adj[(j, 0)] = 1.0;
        }
        let model = DegreeSampling::new(-3.0, 0.5);
        let mut hub_hits = 0usize;
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let r = model.draw_observation(&adj, false, &mut rng).unwrap();
            if (1..n).any(|j| r[(0, j)] == 1.0) {
                hub_hits += 1;
            }
        }
        // sigma(-3 + 0.5 * 39) ~ 1 for the hub, sigma(-2.5) ~ 0.08 for leaves
        assert!(hub_hits > 40, "hub observed only {hub_hits}/50 draws");
    }

    #[test]
    fn block_designs_require_labels_to_draw() {
        let adj = DMatrix::zeros(5, 5);
        let mut rng = StdRng::seed_from_u64(0);
        let model = BlockNodeSampling::new(vec![0.5], None);
        assert!(model.draw_observation(&adj, false, &mut rng).is_err());
        let model = BlockDyadSampling::new(DMatrix::from_element(1, 1, 0.5), None);
        assert!(model.draw_observation(&adj, false, &mut rng).is_err());
    }
}
