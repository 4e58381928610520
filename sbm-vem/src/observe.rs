//! Forward simulation of an observation process: take a fully realized
//! adjacency matrix and hide the dyads a sampling design did not reach.

use nalgebra::DMatrix;
use net_data::Covariates;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::MissNetError;
use crate::sampling::{build_sampling_model, SamplingDesign};

/// Apply `design` to `adjacency` and return the partially observed
/// matrix, with `NaN` marking unobserved dyads. The diagonal is left
/// untouched.
pub fn observe_network(
    adjacency: &DMatrix<f64>,
    design: SamplingDesign,
    parameters: &[f64],
    clusters: Option<&[usize]>,
    covariates: Option<&Covariates>,
    seed: u64,
) -> Result<DMatrix<f64>, MissNetError> {
    let n = adjacency.nrows();
    if n != adjacency.ncols() {
        return Err(MissNetError::InvalidInput(format!(
            "adjacency is {}x{}, expected square",
            n,
            adjacency.ncols()
        )));
    }
    for v in adjacency.iter() {
        if *v != 0.0 && *v != 1.0 {
            return Err(MissNetError::InvalidInput(
                "adjacency must be fully realized with 0/1 entries".into(),
            ));
        }
    }
    if design.is_block_dependent() && clusters.is_none() {
        return Err(MissNetError::InvalidInput(format!(
            "design `{design}` needs cluster labels to draw an observation"
        )));
    }

    let directed = (0..n).any(|i| (0..i).any(|j| adjacency[(i, j)] != adjacency[(j, i)]));

    let model = build_sampling_model(design, Some(parameters), covariates, clusters)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let r = model.draw_observation(adjacency, directed, &mut rng)?;

    let mut observed = adjacency.clone();
    for j in 0..n {
        for i in 0..n {
            if i != j && r[(i, j)] == 0.0 {
                observed[(i, j)] = f64::NAN;
            }
        }
    }
    Ok(observed)
}
