//! MAR designs: observation depends only on constants or covariates,
//! so the parameters are estimable from the observation pattern alone.

use nalgebra::DMatrix;
use net_data::{Covariates, PartlyObservedNetwork};
use rand::rngs::StdRng;
use rand::Rng;

use super::{
    clamp_proba, dyad_is_observed, node_flags_to_r, PenaltyScale, SamplingDesign, SamplingModel,
    VariationalView,
};
use crate::error::MissNetError;
use crate::kernels::{log1pexp, sigmoid};
use crate::optim;

// ----------------------------------------------------------------
// dyad sampling: every dyad observed independently with probability rho

#[derive(Debug, Clone)]
pub struct DyadSampling {
    rho: f64,
}

impl DyadSampling {
    pub fn new(rho: f64) -> Self {
        DyadSampling { rho }
    }
}

impl SamplingModel for DyadSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::Dyad
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.rho]
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Dyad
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        _view: Option<&VariationalView>,
    ) -> f64 {
        let rho = clamp_proba(self.rho);
        net.nb_observed_dyads() as f64 * rho.ln()
            + net.nb_missing_dyads() as f64 * (1.0 - rho).ln()
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let n = adjacency.nrows();
        let mut r = DMatrix::zeros(n, n);
        if directed {
            for j in 0..n {
                for i in 0..n {
                    if i != j && rng.random::<f64>() < self.rho {
                        r[(i, j)] = 1.0;
                    }
                }
            }
        } else {
            for j in 0..n {
                for i in 0..j {
                    if rng.random::<f64>() < self.rho {
                        r[(i, j)] = 1.0;
                        r[(j, i)] = 1.0;
                    }
                }
            }
        }
        Ok(r)
    }

    fn estimate_mar(&mut self, net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        self.rho = clamp_proba(net.nb_observed_dyads() as f64 / net.nb_dyads() as f64);
        Ok(())
    }
}

// ----------------------------------------------------------------
// node sampling: nodes observed independently; a dyad is observed iff
// both endpoints are

#[derive(Debug, Clone)]
pub struct NodeSampling {
    rho: f64,
}

impl NodeSampling {
    pub fn new(rho: f64) -> Self {
        NodeSampling { rho }
    }
}

impl SamplingModel for NodeSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::Node
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.rho]
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Node
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        _view: Option<&VariationalView>,
    ) -> f64 {
        let rho = clamp_proba(self.rho);
        let observed = net.nb_sampled_nodes() as f64;
        let hidden = net.n_nodes() as f64 - observed;
        observed * rho.ln() + hidden * (1.0 - rho).ln()
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        _directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let n = adjacency.nrows();
        let flags: Vec<bool> = (0..n).map(|_| rng.random::<f64>() < self.rho).collect();
        Ok(node_flags_to_r(&flags))
    }

    fn estimate_mar(&mut self, net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        self.rho = clamp_proba(net.nb_sampled_nodes() as f64 / net.n_nodes() as f64);
        Ok(())
    }
}

// ----------------------------------------------------------------
// covariate designs: logistic observation probability with intercept

/// Dyad observation with probability `logistic(b0 + beta . x_ij)`.
#[derive(Debug, Clone)]
pub struct CovarDyadSampling {
    /// intercept followed by one coefficient per covariate
    beta: Vec<f64>,
    covariates: Covariates,
}

impl CovarDyadSampling {
    pub fn new(covariates: Covariates, parameters: Option<&[f64]>) -> Result<Self, MissNetError> {
        if covariates.as_dyad().is_none() {
            return Err(MissNetError::InvalidInput(
                "covar-dyad requires dyad-level covariates".into(),
            ));
        }
        let dim = covariates.count() + 1;
        let beta = match parameters {
            None => vec![0.0; dim],
            Some(p) if p.len() == dim => p.to_vec(),
            Some(p) => {
                return Err(MissNetError::InvalidInput(format!(
                    "covar-dyad expects {dim} parameters (intercept + coefficients), got {}",
                    p.len()
                )))
            }
        };
        Ok(CovarDyadSampling { beta, covariates })
    }

    fn eta(&self, i: usize, j: usize) -> f64 {
        self.beta[0] + self.covariates.dyad_effect(i, j, &self.beta[1..])
    }
}

impl SamplingModel for CovarDyadSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::CovarDyad
    }

    fn parameters(&self) -> Vec<f64> {
        self.beta.clone()
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Dyad
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        _view: Option<&VariationalView>,
    ) -> f64 {
        let n = net.n_nodes();
        let mut ll = 0.0;
        for_each_dyad(n, net.is_directed(), |i, j| {
            let eta = self.eta(i, j);
            if dyad_is_observed(net, i, j) {
                ll += eta - log1pexp(eta);
            } else {
                ll -= log1pexp(eta);
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
        if !self.covariates.conforms_to(n) {
            return Err(MissNetError::InvalidInput(
                "covariate matrices do not match the network size".into(),
            ));
        }
        let mut r = DMatrix::zeros(n, n);
        for_each_dyad(n, directed, |i, j| {
            if rng.random::<f64>() < sigmoid(self.eta(i, j)) {
                r[(i, j)] = 1.0;
                if !directed {
                    r[(j, i)] = 1.0;
                }
            }
        });
        Ok(r)
    }

    fn estimate_mar(&mut self, net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        let n = net.n_nodes();
        let directed = net.is_directed();
        let covariates = self.covariates.clone();
        let dim = self.beta.len();

        // Bernoulli log-likelihood of the observation indicators under
        // the logistic link, with analytic gradient
        let cost_and_grad = |b: &ndarray::Array1<f64>| -> (f64, ndarray::Array1<f64>) {
            let mut cost = 0.0;
            let mut grad = ndarray::Array1::<f64>::zeros(dim);
            for_each_dyad(n, directed, |i, j| {
                let x = covariates.dyad_vector(i, j);
                let eta: f64 = b[0] + x.iter().enumerate().map(|(m, &v)| b[m + 1] * v).sum::<f64>();
                let robs = if dyad_is_observed(net, i, j) { 1.0 } else { 0.0 };
                cost += log1pexp(eta) - robs * eta;
                let resid = sigmoid(eta) - robs;
                grad[0] += resid;
                for (m, &v) in x.iter().enumerate() {
                    grad[m + 1] += resid * v;
                }
            });
            (cost, grad)
        };

        let x0 = ndarray::Array1::from_vec(self.beta.clone());
        let sol = optim::minimize(x0, cost_and_grad, 1e-8, 100)?;
        self.beta = sol.to_vec();
        Ok(())
    }
}

/// Node observation with probability `logistic(nu0 + nu . x_i)`.
#[derive(Debug, Clone)]
pub struct CovarNodeSampling {
    nu: Vec<f64>,
    covariates: Covariates,
}

impl CovarNodeSampling {
    pub fn new(covariates: Covariates, parameters: Option<&[f64]>) -> Result<Self, MissNetError> {
        if covariates.as_node().is_none() {
            return Err(MissNetError::InvalidInput(
                "covar-node requires node-level covariates".into(),
            ));
        }
        let dim = covariates.count() + 1;
        let nu = match parameters {
            None => vec![0.0; dim],
            Some(p) if p.len() == dim => p.to_vec(),
            Some(p) => {
                return Err(MissNetError::InvalidInput(format!(
                    "covar-node expects {dim} parameters (intercept + coefficients), got {}",
                    p.len()
                )))
            }
        };
        Ok(CovarNodeSampling { nu, covariates })
    }

    fn eta(&self, i: usize) -> f64 {
        self.nu[0] + self.covariates.node_effect(i, &self.nu[1..])
    }
}

impl SamplingModel for CovarNodeSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::CovarNode
    }

    fn parameters(&self) -> Vec<f64> {
        self.nu.clone()
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Node
    }

    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        _view: Option<&VariationalView>,
    ) -> f64 {
        net.sampled_nodes()
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let eta = self.eta(i);
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
        if !self.covariates.conforms_to(n) {
            return Err(MissNetError::InvalidInput(
                "covariate matrix does not match the network size".into(),
            ));
        }
        let flags: Vec<bool> = (0..n)
            .map(|i| rng.random::<f64>() < sigmoid(self.eta(i)))
            .collect();
        Ok(node_flags_to_r(&flags))
    }

    fn estimate_mar(&mut self, net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        let covariates = self.covariates.clone();
        let flags = net.sampled_nodes().to_vec();
        let dim = self.nu.len();

        let cost_and_grad = |b: &ndarray::Array1<f64>| -> (f64, ndarray::Array1<f64>) {
            let mut cost = 0.0;
            let mut grad = ndarray::Array1::<f64>::zeros(dim);
            for (i, &s) in flags.iter().enumerate() {
                let eta: f64 = b[0]
                    + (0..dim - 1)
                        .map(|m| b[m + 1] * covariates.as_node().map_or(0.0, |x| x[(i, m)]))
                        .sum::<f64>();
                let si = if s { 1.0 } else { 0.0 };
                cost += log1pexp(eta) - si * eta;
                let resid = sigmoid(eta) - si;
                grad[0] += resid;
                for m in 0..dim - 1 {
                    grad[m + 1] += resid * covariates.as_node().map_or(0.0, |x| x[(i, m)]);
                }
            }
            (cost, grad)
        };

        let x0 = ndarray::Array1::from_vec(self.nu.clone());
        let sol = optim::minimize(x0, cost_and_grad, 1e-8, 100)?;
        self.nu = sol.to_vec();
        Ok(())
    }
}

/// Visit each dyad once: unordered pairs (i > j) for undirected, all
/// ordered pairs for directed.
pub(crate) fn for_each_dyad(n: usize, directed: bool, mut f: impl FnMut(usize, usize)) {
    if directed {
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    f(i, j);
                }
            }
        }
    } else {
        for i in 0..n {
            for j in 0..i {
                f(i, j);
            }
        }
    }
}
