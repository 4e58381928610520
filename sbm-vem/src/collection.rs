//! Model selection over a range of block counts.
//!
//! Each candidate Q is fitted from a spectral initialization plus a few
//! random restarts, in parallel, and the best fit per Q (by ICL) is
//! kept. Degenerate fits (a block losing all its mass) are dropped with
//! a warning rather than failing the whole exploration.

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use net_data::{Covariates, PartlyObservedNetwork};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::MissNetError;
use crate::fit::{SbmFit, VemOptions};
use crate::joint::MissSbmFit;
use crate::sampling::{build_sampling_model, SamplingDesign};

const RANDOM_RESTARTS: usize = 2;

/// Fits indexed by block count, with their joint ICL.
pub struct SbmCollection {
    models: BTreeMap<usize, (MissSbmFit, f64)>,
}

impl SbmCollection {
    /// The fit with the highest ICL.
    pub fn best(&self) -> &MissSbmFit {
        self.models
            .values()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(fit, _)| fit)
            .expect("collection holds at least one model")
    }

    /// (Q, ICL) pairs in increasing Q.
    pub fn icl_curve(&self) -> Vec<(usize, f64)> {
        self.models.iter().map(|(&q, (_, icl))| (q, *icl)).collect()
    }

    pub fn get(&self, q: usize) -> Option<&MissSbmFit> {
        self.models.get(&q).map(|(fit, _)| fit)
    }

    /// Hard memberships of the Q-block fit, if that Q was retained.
    pub fn membership(&self, q: usize) -> Option<Vec<usize>> {
        self.get(q).map(|fit| fit.memberships())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Fit the SBM jointly with `design` for every Q in `q_values` and keep
/// the best fit per Q.
///
/// Covariates feed the sampling model for the `covar-*` designs and the
/// connectivity model otherwise.
pub fn estimate_miss_sbm(
    net: &PartlyObservedNetwork,
    q_values: &[usize],
    design: SamplingDesign,
    covariates: Option<&Covariates>,
    opts: &VemOptions,
) -> Result<SbmCollection, MissNetError> {
    if q_values.is_empty() {
        return Err(MissNetError::InvalidInput(
            "at least one block count is required".into(),
        ));
    }
    for &q in q_values {
        if q == 0 || q > net.n_nodes() {
            return Err(MissNetError::InvalidInput(format!(
                "block count {q} out of range for {} nodes",
                net.n_nodes()
            )));
        }
    }

    let (sbm_covariates, sampling_covariates) = if design.is_covariate_dependent() {
        (None, covariates)
    } else {
        if let Some(covar) = covariates {
            if covar.as_dyad().is_none() {
                return Err(MissNetError::InvalidInput(
                    "connectivity covariates must be dyad-level matrices".into(),
                ));
            }
            if !covar.conforms_to(net.n_nodes()) {
                return Err(MissNetError::InvalidInput(
                    "covariate matrices do not match the network size".into(),
                ));
            }
        }
        (covariates, None)
    };

    let candidates: Vec<(usize, u64)> = q_values
        .iter()
        .flat_map(|&q| (0..=RANDOM_RESTARTS as u64).map(move |restart| (q, restart)))
        .collect();

    let bar = ProgressBar::new(candidates.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("fitting");

    let fitted: Vec<(usize, MissSbmFit, f64)> = candidates
        .par_iter()
        .filter_map(|&(q, restart)| {
            let result = fit_one(
                net,
                q,
                restart,
                design,
                sbm_covariates,
                sampling_covariates,
                opts,
            );
            bar.inc(1);
            match result {
                Ok(fit) => {
                    let icl = fit.icl(net);
                    Some((q, fit, icl))
                }
                Err(MissNetError::DegenerateFit { block, mass }) => {
                    log::warn!(
                        "dropping candidate q={q} restart={restart}: block {block} collapsed (mass {mass:.2e})"
                    );
                    None
                }
                Err(e) => {
                    log::warn!("dropping candidate q={q} restart={restart}: {e}");
                    None
                }
            }
        })
        .collect();
    bar.finish_and_clear();

    let mut models: BTreeMap<usize, (MissSbmFit, f64)> = BTreeMap::new();
    for (q, fit, icl) in fitted {
        match models.get(&q) {
            Some((_, best)) if *best >= icl => {}
            _ => {
                models.insert(q, (fit, icl));
            }
        }
    }

    if models.is_empty() {
        return Err(MissNetError::Numerical(
            "every candidate fit degenerated".into(),
        ));
    }
    Ok(SbmCollection { models })
}

/// Fit the collection under each candidate design and rank the results
/// by the ICL of their best fit, highest first.
///
/// The joint ICL penalizes the sampling parameters at their natural
/// scale, so the ranking is comparable across designs.
pub fn compare_sampling_designs(
    net: &PartlyObservedNetwork,
    q_values: &[usize],
    designs: &[SamplingDesign],
    covariates: Option<&Covariates>,
    opts: &VemOptions,
) -> Result<Vec<(SamplingDesign, SbmCollection)>, MissNetError> {
    if designs.is_empty() {
        return Err(MissNetError::InvalidInput(
            "at least one sampling design is required".into(),
        ));
    }

    let mut ranked: Vec<(SamplingDesign, SbmCollection, f64)> = Vec::with_capacity(designs.len());
    for &design in designs {
        let collection = estimate_miss_sbm(net, q_values, design, covariates, opts)?;
        let icl = collection.best().icl(net);
        log::info!("design {design}: best ICL {icl:.3}");
        ranked.push((design, collection, icl));
    }
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    Ok(ranked.into_iter().map(|(d, c, _)| (d, c)).collect())
}

fn fit_one(
    net: &PartlyObservedNetwork,
    q: usize,
    restart: u64,
    design: SamplingDesign,
    sbm_covariates: Option<&Covariates>,
    sampling_covariates: Option<&Covariates>,
    opts: &VemOptions,
) -> Result<MissSbmFit, MissNetError> {
    let labels = if restart == 0 {
        net.clustering_init(q, 42)?
    } else {
        let mut rng = StdRng::seed_from_u64(restart);
        (0..net.n_nodes()).map(|_| rng.random_range(0..q)).collect()
    };

    let sbm = SbmFit::from_labels(net, q, &labels, sbm_covariates)?;
    let sampling = build_sampling_model(design, None, sampling_covariates, None)?;
    MissSbmFit::fit(net, sbm, sampling, sbm_covariates, opts)
}
