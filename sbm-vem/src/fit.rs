//! Variational EM for one Bernoulli SBM on a partly observed network.
//!
//! Alternates the closed-form (or gradient-based, with covariates)
//! M-step with a fixed-point E-step until the variational lower bound
//! stalls. The joint sampling loop drives the same machinery through
//! [`SbmFit::one_iteration`] and injects its per-node E-step term.

use nalgebra::{DMatrix, DVector};
use net_data::{Covariates, PartlyObservedNetwork};

use crate::error::MissNetError;
use crate::kernels;

/// Knobs of the VEM loop.
#[derive(Debug, Clone)]
pub struct VemOptions {
    /// outer VEM iterations
    pub max_iter: usize,
    /// E-step fixed-point sweeps per outer iteration
    pub fix_point_iter: usize,
    /// relative bound improvement below which the loop stops
    pub threshold: f64,
    /// log the bound at each iteration
    pub trace: bool,
    /// a block whose total responsibility mass falls below this
    /// fraction of N aborts the fit
    pub degenerate_mass: f64,
}

impl Default for VemOptions {
    fn default() -> Self {
        VemOptions {
            max_iter: 50,
            fix_point_iter: 3,
            threshold: 1e-4,
            trace: false,
            degenerate_mass: 1e-4,
        }
    }
}

/// How the VEM loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged { iterations: usize },
    MaxIterReached { iterations: usize },
}

/// Connectivity parameters of the fitted SBM.
#[derive(Debug, Clone)]
pub enum Connectivity {
    /// Q×Q edge probabilities
    Bernoulli(DMatrix<f64>),
    /// Q×Q logistic offsets plus covariate coefficients
    Logistic { gamma: DMatrix<f64>, beta: Vec<f64> },
}

/// A fitted (or in-progress) SBM with variational state.
#[derive(Debug, Clone)]
pub struct SbmFit {
    q: usize,
    z: DMatrix<f64>,
    pi: DVector<f64>,
    connectivity: Connectivity,
    bound: f64,
    bound_trace: Vec<f64>,
    status: FitStatus,
}

impl SbmFit {
    /// Initialize from hard cluster labels: the one-hot memberships are
    /// smoothed so no responsibility starts at exactly zero, then one
    /// M-step derives the matching parameters.
    pub fn from_labels(
        net: &PartlyObservedNetwork,
        q: usize,
        labels: &[usize],
        covariates: Option<&Covariates>,
    ) -> Result<Self, MissNetError> {
        let n = net.n_nodes();
        if labels.len() != n {
            return Err(MissNetError::InvalidInput(format!(
                "{} labels for {} nodes",
                labels.len(),
                n
            )));
        }
        if let Some(&max) = labels.iter().max() {
            if max >= q {
                return Err(MissNetError::InvalidInput(format!(
                    "label {max} outside 0..{q}"
                )));
            }
        }

        let (own, off) = if q > 1 {
            (0.9, 0.1 / (q - 1) as f64)
        } else {
            (1.0, 0.0)
        };
        let z = DMatrix::from_fn(n, q, |i, qq| if labels[i] == qq { own } else { off });

        let pi = kernels::pi_update(&z);
        let connectivity = match covariates {
            None => Connectivity::Bernoulli(kernels::m_step(net.y(), net.r(), &z)),
            Some(covar) => {
                let theta = kernels::m_step(net.y(), net.r(), &z);
                // warm-start gamma at the logit of the closed-form update
                let gamma = theta.map(|t| (t / (1.0 - t)).ln());
                Connectivity::Logistic {
                    gamma,
                    beta: vec![0.0; covar.count()],
                }
            }
        };

        let mut fit = SbmFit {
            q,
            z,
            pi,
            connectivity,
            bound: f64::NEG_INFINITY,
            bound_trace: Vec::new(),
            status: FitStatus::MaxIterReached { iterations: 0 },
        };
        fit.bound = fit.evaluate_bound(net, covariates);
        Ok(fit)
    }

    pub fn q(&self) -> usize {
        self.q
    }

    pub fn z(&self) -> &DMatrix<f64> {
        &self.z
    }

    pub fn pi(&self) -> &DVector<f64> {
        &self.pi
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn bound_trace(&self) -> &[f64] {
        &self.bound_trace
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Hard block assignment: row-wise argmax of the responsibilities.
    pub fn memberships(&self) -> Vec<usize> {
        self.z
            .row_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(idx, _)| idx)
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Marginal edge probability for every dyad, observed or not.
    pub fn imputed_edge_probabilities(
        &self,
        net: &PartlyObservedNetwork,
        covariates: Option<&Covariates>,
    ) -> DMatrix<f64> {
        let n = net.n_nodes();
        let mut nu = match &self.connectivity {
            Connectivity::Bernoulli(theta) => &self.z * theta * self.z.transpose(),
            Connectivity::Logistic { gamma, beta } => {
                let mut linear = &self.z * gamma * self.z.transpose();
                if let Some(covar) = covariates {
                    linear += covar.dyad_effect_matrix(n, beta);
                }
                linear.map(crate::kernels::sigmoid)
            }
        };
        for i in 0..n {
            nu[(i, i)] = 0.0;
        }
        nu
    }

    /// One VEM sweep: M-step from the current responsibilities, then
    /// `fix_point_iter` E-step passes, then refresh the bound.
    pub fn one_iteration(
        &mut self,
        net: &PartlyObservedNetwork,
        covariates: Option<&Covariates>,
        log_lambda: Option<&DMatrix<f64>>,
        opts: &VemOptions,
    ) -> Result<(), MissNetError> {
        self.pi = kernels::pi_update(&self.z);
        match (&self.connectivity, covariates) {
            (Connectivity::Bernoulli(_), None) => {
                self.connectivity =
                    Connectivity::Bernoulli(kernels::m_step(net.y(), net.r(), &self.z));
            }
            (Connectivity::Logistic { gamma, beta }, Some(covar)) => {
                let y_dense = net.zero_imputed();
                let (gamma, beta) = kernels::m_step_covariates(
                    &y_dense,
                    net.r(),
                    covar,
                    &self.z,
                    gamma,
                    beta,
                    net.is_directed(),
                )?;
                self.connectivity = Connectivity::Logistic { gamma, beta };
            }
            _ => {
                return Err(MissNetError::InvalidInput(
                    "covariates changed between initialization and fitting".into(),
                ))
            }
        }

        for _ in 0..opts.fix_point_iter.max(1) {
            self.z = match &self.connectivity {
                Connectivity::Bernoulli(theta) => kernels::e_step(
                    net.y(),
                    net.r(),
                    &self.z,
                    theta,
                    &self.pi,
                    log_lambda,
                    net.is_directed(),
                ),
                Connectivity::Logistic { gamma, beta } => {
                    let covar = covariates.ok_or_else(|| {
                        MissNetError::InvalidInput("logistic connectivity needs covariates".into())
                    })?;
                    let phi = covar.dyad_effect_matrix(net.n_nodes(), beta);
                    kernels::e_step_covariates(
                        net.y(),
                        net.r(),
                        &phi,
                        &self.z,
                        gamma,
                        &self.pi,
                        log_lambda,
                        net.is_directed(),
                    )
                }
            };
        }
        self.check_degeneracy(net, opts)?;

        self.bound = self.evaluate_bound(net, covariates);
        self.bound_trace.push(self.bound);
        Ok(())
    }

    /// Run the full VEM loop from the current state.
    pub fn fit(
        &mut self,
        net: &PartlyObservedNetwork,
        covariates: Option<&Covariates>,
        opts: &VemOptions,
    ) -> Result<(), MissNetError> {
        let mut previous = self.bound;
        for iter in 1..=opts.max_iter {
            self.one_iteration(net, covariates, None, opts)?;
            if opts.trace {
                log::debug!("vem q={} iter={} bound={:.6}", self.q, iter, self.bound);
            }
            let gain = (self.bound - previous) / previous.abs().max(1.0);
            if gain.abs() < opts.threshold {
                self.status = FitStatus::Converged { iterations: iter };
                return Ok(());
            }
            previous = self.bound;
        }
        self.status = FitStatus::MaxIterReached {
            iterations: opts.max_iter,
        };
        Ok(())
    }

    /// Variational lower bound: expected complete log-likelihood plus
    /// the entropy of the responsibilities.
    pub fn evaluate_bound(
        &self,
        net: &PartlyObservedNetwork,
        covariates: Option<&Covariates>,
    ) -> f64 {
        let vll = match (&self.connectivity, covariates) {
            (Connectivity::Bernoulli(theta), _) => kernels::lower_bound(
                net.y(),
                net.r(),
                &self.z,
                theta,
                &self.pi,
                net.is_directed(),
            ),
            (Connectivity::Logistic { gamma, beta }, Some(covar)) => {
                let phi = covar.dyad_effect_matrix(net.n_nodes(), beta);
                kernels::lower_bound_covariates(
                    net.y(),
                    net.r(),
                    &phi,
                    &self.z,
                    gamma,
                    &self.pi,
                    net.is_directed(),
                )
            }
            (Connectivity::Logistic { .. }, None) => f64::NEG_INFINITY,
        };
        vll + kernels::entropy(&self.z)
    }

    /// Number of free parameters in the block model itself.
    pub fn parameter_count(&self, directed: bool) -> (usize, usize) {
        let mixture = self.q.saturating_sub(1);
        let connectivity = match &self.connectivity {
            Connectivity::Bernoulli(_) => {
                if directed {
                    self.q * self.q
                } else {
                    self.q * (self.q + 1) / 2
                }
            }
            Connectivity::Logistic { beta, .. } => {
                let base = if directed {
                    self.q * self.q
                } else {
                    self.q * (self.q + 1) / 2
                };
                base + beta.len()
            }
        };
        (mixture, connectivity)
    }

    /// ICL of the block model alone: twice the bound minus the usual
    /// penalty, mixture part scaling in N and connectivity part in the
    /// number of dyads.
    pub fn icl(&self, net: &PartlyObservedNetwork) -> f64 {
        let (mixture, connectivity) = self.parameter_count(net.is_directed());
        let penalty = mixture as f64 * (net.n_nodes() as f64).ln()
            + connectivity as f64 * (net.nb_dyads() as f64).ln();
        2.0 * self.bound - penalty
    }

    fn check_degeneracy(
        &self,
        net: &PartlyObservedNetwork,
        opts: &VemOptions,
    ) -> Result<(), MissNetError> {
        let floor = opts.degenerate_mass * net.n_nodes() as f64;
        for (qq, col) in self.z.column_iter().enumerate() {
            let mass = col.sum();
            if mass < floor {
                return Err(MissNetError::DegenerateFit { block: qq, mass });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use net_data::simulate::planted_partition;

    fn fitted_planted(n: usize, q: usize, seed: u64) -> (PartlyObservedNetwork, SbmFit) {
        let truth = planted_partition(n, q, 0.4, 0.05, seed).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();
        let labels = net.clustering_init(q, seed).unwrap();
        let mut fit = SbmFit::from_labels(&net, q, &labels, None).unwrap();
        fit.fit(&net, None, &VemOptions::default()).unwrap();
        (net, fit)
    }

    #[test]
    fn bound_is_monotone_over_iterations() {
        let (_, fit) = fitted_planted(60, 3, 4);
        let trace = fit.bound_trace();
        assert!(trace.len() >= 2);
        for w in trace.windows(2) {
            assert!(
                w[1] >= w[0] - 1e-6,
                "bound decreased: {} -> {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn recovers_planted_blocks() {
        let truth = planted_partition(90, 3, 0.4, 0.05, 8).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency.clone()).unwrap();
        let labels = net.clustering_init(3, 8).unwrap();
        let mut fit = SbmFit::from_labels(&net, 3, &labels, None).unwrap();
        fit.fit(&net, None, &VemOptions::default()).unwrap();

        let ari = net_data::clustering::adjusted_rand_index(
            &fit.memberships(),
            &truth.memberships,
        );
        assert!(ari > 0.95, "ARI too low: {ari}");
    }

    #[test]
    fn pi_stays_on_the_simplex() {
        let (_, fit) = fitted_planted(50, 2, 12);
        assert_abs_diff_eq!(fit.pi().sum(), 1.0, epsilon = 1e-6);
        assert!(fit.pi().iter().all(|&p| p > 0.0));
    }

    #[test]
    fn imputed_probabilities_are_valid() {
        let (net, fit) = fitted_planted(40, 2, 3);
        let nu = fit.imputed_edge_probabilities(&net, None);
        assert_eq!(nu.shape(), (40, 40));
        assert!(nu.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_abs_diff_eq!(nu[(7, 7)], 0.0);
    }

    #[test]
    fn larger_q_pays_a_bigger_penalty() {
        let truth = planted_partition(80, 2, 0.4, 0.05, 6).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();

        let mut icls = Vec::new();
        for q in [2usize, 5] {
            let labels = net.clustering_init(q, 6).unwrap();
            let mut fit = SbmFit::from_labels(&net, q, &labels, None).unwrap();
            if fit.fit(&net, None, &VemOptions::default()).is_ok() {
                icls.push(fit.icl(&net));
            }
        }
        if icls.len() == 2 {
            assert!(icls[0] > icls[1], "Q=2 should beat Q=5: {icls:?}");
        }
    }

    #[test]
    fn one_block_per_node_does_not_degenerate() {
        // a saturated model is wasteful, not degenerate
        let truth = planted_partition(12, 3, 0.5, 0.1, 19).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();
        let labels: Vec<usize> = (0..12).collect();
        let mut fit = SbmFit::from_labels(&net, 12, &labels, None).unwrap();
        fit.fit(&net, None, &VemOptions::default()).unwrap();
        assert!(fit.bound().is_finite());
    }

    #[test]
    fn bad_labels_are_rejected() {
        let truth = planted_partition(20, 2, 0.4, 0.1, 1).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();
        assert!(SbmFit::from_labels(&net, 2, &[0; 19], None).is_err());
        assert!(SbmFit::from_labels(&net, 2, &vec![5; 20], None).is_err());
    }
}
