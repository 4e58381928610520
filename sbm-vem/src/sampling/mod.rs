//! Sampling mechanisms: probabilistic models of which dyads/nodes are
//! observed.
//!
//! Each design exposes the log-probability of an observation pattern, a
//! way to draw a fresh pattern for simulation, and its parameter
//! estimator. MAR designs (`dyad`, `node`, `covar-*`) are estimable
//! from the observation pattern alone; NMAR designs (`double-standard`,
//! `block-*`, `degree`) depend on the latent blocks or the realized
//! dyads and are re-estimated inside the joint VEM loop. Dispatch on
//! the design name happens once, in [`build_sampling_model`].

use nalgebra::DMatrix;
use net_data::{Covariates, PartlyObservedNetwork};
use rand::rngs::StdRng;
use std::str::FromStr;

use crate::error::MissNetError;

mod mar;
mod nmar;
mod snowball;

pub use mar::{CovarDyadSampling, CovarNodeSampling, DyadSampling, NodeSampling};
pub use nmar::{BlockDyadSampling, BlockNodeSampling, DegreeSampling, DoubleStandardSampling};
pub use snowball::SnowballSampling;

/// The recognized sampling designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDesign {
    Dyad,
    Node,
    CovarDyad,
    CovarNode,
    DoubleStandard,
    BlockDyad,
    BlockNode,
    Degree,
    Snowball,
}

impl SamplingDesign {
    pub fn name(&self) -> &'static str {
        match self {
            SamplingDesign::Dyad => "dyad",
            SamplingDesign::Node => "node",
            SamplingDesign::CovarDyad => "covar-dyad",
            SamplingDesign::CovarNode => "covar-node",
            SamplingDesign::DoubleStandard => "double-standard",
            SamplingDesign::BlockDyad => "block-dyad",
            SamplingDesign::BlockNode => "block-node",
            SamplingDesign::Degree => "degree",
            SamplingDesign::Snowball => "snowball",
        }
    }

    pub fn is_covariate_dependent(&self) -> bool {
        matches!(self, SamplingDesign::CovarDyad | SamplingDesign::CovarNode)
    }

    pub fn is_block_dependent(&self) -> bool {
        matches!(self, SamplingDesign::BlockDyad | SamplingDesign::BlockNode)
    }

    /// NMAR designs need the joint loop; MAR designs do not.
    pub fn is_nmar(&self) -> bool {
        matches!(
            self,
            SamplingDesign::DoubleStandard
                | SamplingDesign::BlockDyad
                | SamplingDesign::BlockNode
                | SamplingDesign::Degree
        )
    }
}

impl FromStr for SamplingDesign {
    type Err = MissNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dyad" => Ok(SamplingDesign::Dyad),
            "node" => Ok(SamplingDesign::Node),
            "covar-dyad" => Ok(SamplingDesign::CovarDyad),
            "covar-node" => Ok(SamplingDesign::CovarNode),
            "double-standard" => Ok(SamplingDesign::DoubleStandard),
            "block-dyad" => Ok(SamplingDesign::BlockDyad),
            "block-node" => Ok(SamplingDesign::BlockNode),
            "degree" => Ok(SamplingDesign::Degree),
            "snowball" => Ok(SamplingDesign::Snowball),
            other => Err(MissNetError::UnsupportedSamplingDesign(other.to_string())),
        }
    }
}

impl std::fmt::Display for SamplingDesign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the ICL penalty for the sampling parameters scales with the
/// number of nodes or the number of dyads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyScale {
    Node,
    Dyad,
}

/// Read-only snapshot of the variational state handed to NMAR updates:
/// soft memberships and the imputed marginal edge probability per dyad.
pub struct VariationalView<'a> {
    pub z: &'a DMatrix<f64>,
    pub nu: &'a DMatrix<f64>,
}

/// Capability set shared by all sampling designs.
pub trait SamplingModel: Send + Sync {
    fn design(&self) -> SamplingDesign;

    fn parameters(&self) -> Vec<f64>;

    fn parameter_dimension(&self) -> usize {
        self.parameters().len()
    }

    fn is_block_dependent(&self) -> bool {
        self.design().is_block_dependent()
    }

    fn is_covariate_dependent(&self) -> bool {
        self.design().is_covariate_dependent()
    }

    fn penalty_scale(&self) -> PenaltyScale;

    /// Log-probability of the network's observation pattern. NMAR
    /// designs use the variational view to impute the unobserved part
    /// and fall back to marginal quantities when no view is available.
    fn log_proba_observation(
        &self,
        net: &PartlyObservedNetwork,
        view: Option<&VariationalView>,
    ) -> f64;

    /// Draw a 0/1 observation matrix R for a realized adjacency.
    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError>;

    /// Closed-form (or direct-optimization) MAR estimation from the
    /// observed pattern alone. No-op for NMAR designs.
    fn estimate_mar(&mut self, _net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        Ok(())
    }

    /// NMAR parameter update given the current variational state.
    /// No-op for MAR designs.
    fn update_with_blocks(
        &mut self,
        _net: &PartlyObservedNetwork,
        _view: &VariationalView,
    ) -> Result<(), MissNetError> {
        Ok(())
    }

    /// Per-node N×Q additive term for the E-step, when the design
    /// couples node observation to block membership.
    fn log_lambda(&self, _net: &PartlyObservedNetwork, _q: usize) -> Option<DMatrix<f64>> {
        None
    }
}

/// Build a sampling model from a design name and its inputs.
///
/// * `parameters` - design-specific vector; `None` leaves defaults to be
///   estimated during inference.
/// * `covariates` - required by (and only legal for) `covar-*` designs.
/// * `blocks` - node cluster labels, required to *draw* from block
///   designs (inference derives them from Z instead).
pub fn build_sampling_model(
    design: SamplingDesign,
    parameters: Option<&[f64]>,
    covariates: Option<&Covariates>,
    blocks: Option<&[usize]>,
) -> Result<Box<dyn SamplingModel>, MissNetError> {
    if covariates.is_some() && !design.is_covariate_dependent() {
        return Err(MissNetError::InvalidInput(format!(
            "design `{design}` does not accept covariates"
        )));
    }
    if design.is_covariate_dependent() && covariates.is_none() {
        return Err(MissNetError::InvalidInput(format!(
            "design `{design}` requires covariates"
        )));
    }

    let model: Box<dyn SamplingModel> = match design {
        SamplingDesign::Dyad => Box::new(DyadSampling::new(single_proba(design, parameters)?)),
        SamplingDesign::Node => Box::new(NodeSampling::new(single_proba(design, parameters)?)),
        SamplingDesign::CovarDyad => {
            let covar = covariates.cloned().ok_or_else(|| {
                MissNetError::InvalidInput("covar-dyad requires covariates".into())
            })?;
            CovarDyadSampling::new(covar, parameters).map(Box::new)?
        }
        SamplingDesign::CovarNode => {
            let covar = covariates.cloned().ok_or_else(|| {
                MissNetError::InvalidInput("covar-node requires covariates".into())
            })?;
            CovarNodeSampling::new(covar, parameters).map(Box::new)?
        }
        SamplingDesign::DoubleStandard => {
            let (rho0, rho1) = match parameters {
                None => (0.5, 0.5),
                Some([p0, p1]) => (*p0, *p1),
                Some(other) => {
                    return Err(MissNetError::InvalidInput(format!(
                        "double-standard expects 2 parameters, got {}",
                        other.len()
                    )))
                }
            };
            check_proba(design, rho0)?;
            check_proba(design, rho1)?;
            Box::new(DoubleStandardSampling::new(rho0, rho1))
        }
        SamplingDesign::BlockNode => {
            let rho = parameters.map(|p| p.to_vec()).unwrap_or_default();
            for &p in &rho {
                check_proba(design, p)?;
            }
            Box::new(BlockNodeSampling::new(rho, blocks.map(|b| b.to_vec())))
        }
        SamplingDesign::BlockDyad => {
            let rho = match parameters {
                None => DMatrix::zeros(0, 0),
                Some(p) => {
                    let q = (p.len() as f64).sqrt().round() as usize;
                    if q * q != p.len() {
                        return Err(MissNetError::InvalidInput(format!(
                            "block-dyad expects a flattened Q x Q matrix, got {} entries",
                            p.len()
                        )));
                    }
                    for &v in p {
                        check_proba(design, v)?;
                    }
                    DMatrix::from_column_slice(q, q, p)
                }
            };
            Box::new(BlockDyadSampling::new(rho, blocks.map(|b| b.to_vec())))
        }
        SamplingDesign::Degree => {
            let (a, b) = match parameters {
                None => (0.0, 0.0),
                Some([a, b]) => (*a, *b),
                Some(other) => {
                    return Err(MissNetError::InvalidInput(format!(
                        "degree expects 2 parameters (intercept, slope), got {}",
                        other.len()
                    )))
                }
            };
            Box::new(DegreeSampling::new(a, b))
        }
        SamplingDesign::Snowball => {
            let (rho, waves) = match parameters {
                None => (0.5, 2),
                Some([p]) => (*p, 2),
                Some([p, w]) => (*p, w.round() as usize),
                Some(other) => {
                    return Err(MissNetError::InvalidInput(format!(
                        "snowball expects (rate) or (rate, waves), got {} parameters",
                        other.len()
                    )))
                }
            };
            check_proba(design, rho)?;
            Box::new(SnowballSampling::new(rho, waves.max(1)))
        }
    };
    Ok(model)
}

fn single_proba(design: SamplingDesign, parameters: Option<&[f64]>) -> Result<f64, MissNetError> {
    let rho = match parameters {
        None => 0.5,
        Some([p]) => *p,
        Some(other) => {
            return Err(MissNetError::InvalidInput(format!(
                "design `{design}` expects a single probability, got {} parameters",
                other.len()
            )))
        }
    };
    check_proba(design, rho)?;
    Ok(rho)
}

fn check_proba(design: SamplingDesign, p: f64) -> Result<(), MissNetError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(MissNetError::InvalidInput(format!(
            "design `{design}`: probability {p} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Clamp an estimated probability into the open unit interval.
pub(crate) fn clamp_proba(p: f64) -> f64 {
    p.clamp(1e-9, 1.0 - 1e-9)
}

/// Was the unordered/ordered dyad (i, j) observed? For undirected
/// networks either triangle entry counts (OR-symmetrized, matching the
/// network construction).
pub(crate) fn dyad_is_observed(net: &PartlyObservedNetwork, i: usize, j: usize) -> bool {
    let a = net.adjacency();
    if net.is_directed() {
        !a[(i, j)].is_nan()
    } else {
        !a[(i, j)].is_nan() || !a[(j, i)].is_nan()
    }
}

/// Realized value of an observed dyad (OR-symmetrized for undirected).
pub(crate) fn dyad_value(net: &PartlyObservedNetwork, i: usize, j: usize) -> f64 {
    let a = net.adjacency();
    if net.is_directed() || !a[(i, j)].is_nan() {
        a[(i, j)]
    } else {
        a[(j, i)]
    }
}

/// Turn an observed-node vector into a full observation matrix: a dyad
/// is observed iff both endpoints are.
pub(crate) fn node_flags_to_r(flags: &[bool]) -> DMatrix<f64> {
    let n = flags.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i != j && flags[i] && flags[j] {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_design_name() {
        for name in [
            "dyad",
            "node",
            "covar-dyad",
            "covar-node",
            "double-standard",
            "block-dyad",
            "block-node",
            "degree",
            "snowball",
        ] {
            let design: SamplingDesign = name.parse().unwrap();
            assert_eq!(design.name(), name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "stratified".parse::<SamplingDesign>().unwrap_err();
        assert!(matches!(err, MissNetError::UnsupportedSamplingDesign(_)));
    }

    #[test]
    fn covariates_with_plain_design_fail_validation() {
        let covar = Covariates::Node(DMatrix::from_element(4, 1, 1.0));
        let err = build_sampling_model(SamplingDesign::Node, Some(&[0.5]), Some(&covar), None)
            .err()
            .unwrap();
        assert!(matches!(err, MissNetError::InvalidInput(_)));
    }

    #[test]
    fn covar_design_without_covariates_fails() {
        let err = build_sampling_model(SamplingDesign::CovarDyad, None, None, None)
            .err()
            .unwrap();
        assert!(matches!(err, MissNetError::InvalidInput(_)));
    }

    #[test]
    fn probability_out_of_range_fails() {
        let err = build_sampling_model(SamplingDesign::Dyad, Some(&[1.5]), None, None)
            .err()
            .unwrap();
        assert!(matches!(err, MissNetError::InvalidInput(_)));
    }
}
