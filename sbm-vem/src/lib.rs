//! Variational inference for stochastic block models on partially
//! observed networks.
//!
//! The adjacency matrix is only partly seen: a sampling design decides
//! which dyads are recorded, and that design may itself depend on the
//! network (the observation process is then informative and has to be
//! modelled). This crate fits the Bernoulli SBM jointly with nine such
//! designs, selects the number of blocks by ICL, and can also run the
//! observation process forward to generate partially observed data.
//!
//! * [`fit`] - variational EM for one block model.
//! * [`sampling`] - the observation designs and their estimators.
//! * [`joint`] - block model and sampling design fitted together.
//! * [`collection`] - ICL-based exploration over block counts.
//! * [`observe`] - forward simulation of an observation process.

pub mod collection;
pub mod error;
pub mod fit;
pub mod joint;
pub mod kernels;
pub mod observe;
pub mod sampling;

mod optim;

pub use collection::{compare_sampling_designs, estimate_miss_sbm, SbmCollection};
pub use error::{MissNetError, Result};
pub use fit::{Connectivity, FitStatus, SbmFit, VemOptions};
pub use joint::MissSbmFit;
pub use observe::observe_network;
pub use sampling::{build_sampling_model, SamplingDesign, SamplingModel};
