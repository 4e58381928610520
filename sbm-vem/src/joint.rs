//! Joint inference of the block model and the sampling mechanism.
//!
//! MAR designs decouple: their parameters are estimated once from the
//! observation pattern and the block model is fitted as usual. NMAR
//! designs are re-estimated every sweep from the variational state, and
//! block-node coupling feeds back into the E-step through the per-node
//! `log_lambda` term.

use net_data::{Covariates, PartlyObservedNetwork};

use crate::error::MissNetError;
use crate::fit::{FitStatus, SbmFit, VemOptions};
use crate::sampling::{PenaltyScale, SamplingModel, VariationalView};

/// A block model fitted jointly with its sampling design.
pub struct MissSbmFit {
    sbm: SbmFit,
    sampling: Box<dyn SamplingModel>,
    bound: f64,
    status: FitStatus,
}

impl MissSbmFit {
    /// Fit `sbm` and `sampling` together on `net`.
    pub fn fit(
        net: &PartlyObservedNetwork,
        mut sbm: SbmFit,
        mut sampling: Box<dyn SamplingModel>,
        covariates: Option<&Covariates>,
        opts: &VemOptions,
    ) -> Result<Self, MissNetError> {
        let q = sbm.q();
        let nmar = sampling.design().is_nmar();

        if !nmar {
            sampling.estimate_mar(net)?;
        }

        let mut bound = f64::NEG_INFINITY;
        let mut status = FitStatus::MaxIterReached {
            iterations: opts.max_iter,
        };

        for iter in 1..=opts.max_iter {
            if nmar {
                let nu = sbm.imputed_edge_probabilities(net, covariates);
                let view = VariationalView {
                    z: sbm.z(),
                    nu: &nu,
                };
                sampling.update_with_blocks(net, &view)?;
            }

            let log_lambda = sampling.log_lambda(net, q);
            sbm.one_iteration(net, covariates, log_lambda.as_ref(), opts)?;

            let nu = sbm.imputed_edge_probabilities(net, covariates);
            let view = VariationalView {
                z: sbm.z(),
                nu: &nu,
            };
            let next = sbm.bound() + sampling.log_proba_observation(net, Some(&view));

            if opts.trace {
                log::debug!(
                    "joint q={q} design={} iter={iter} bound={next:.6}",
                    sampling.design()
                );
            }

            let gain = (next - bound) / bound.abs().max(1.0);
            bound = next;
            if gain.abs() < opts.threshold {
                status = FitStatus::Converged { iterations: iter };
                break;
            }
        }

        Ok(MissSbmFit {
            sbm,
            sampling,
            bound,
            status,
        })
    }

    pub fn sbm(&self) -> &SbmFit {
        &self.sbm
    }

    pub fn sampling(&self) -> &dyn SamplingModel {
        self.sampling.as_ref()
    }

    /// Joint lower bound: block-model bound plus the observation term.
    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    pub fn memberships(&self) -> Vec<usize> {
        self.sbm.memberships()
    }

    /// ICL of the joint model: the block-model penalty plus a term for
    /// the sampling parameters at their natural scale.
    pub fn icl(&self, net: &PartlyObservedNetwork) -> f64 {
        let scale = match self.sampling.penalty_scale() {
            PenaltyScale::Node => net.n_nodes() as f64,
            PenaltyScale::Dyad => net.nb_dyads() as f64,
        };
        let sampling_penalty = self.sampling.parameter_dimension() as f64 * scale.ln();

        let (mixture, connectivity) = self.sbm.parameter_count(net.is_directed());
        let sbm_penalty = mixture as f64 * (net.n_nodes() as f64).ln()
            + connectivity as f64 * (net.nb_dyads() as f64).ln();

        2.0 * self.bound - sbm_penalty - sampling_penalty
    }
}
