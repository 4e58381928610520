//! Error taxonomy for the inference engine.
//!
//! `InvalidInput` and `UnsupportedSamplingDesign` always surface
//! immediately. `DegenerateFit` is recoverable at the collection level
//! (retry with another initialization); reaching the iteration cap is a
//! diagnostic on the result, never an error.

use net_data::network::NetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissNetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("unsupported sampling design `{0}`")]
    UnsupportedSamplingDesign(String),

    #[error("block {block} emptied out during the VEM fixed point (column mass {mass:.3e})")]
    DegenerateFit { block: usize, mass: f64 },

    #[error("numerical failure: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, MissNetError>;
