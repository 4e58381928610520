//! Network data structures for SBM inference under missing data.
//!
//! A network observed through a sampling mechanism carries three layers:
//! the realized dyad values `Y` (0/1, undefined where missing), the
//! observation indicator `R` (1 where the dyad was sampled) and a
//! per-node sampled flag. This crate builds that representation from a
//! dense NaN-marked adjacency matrix and provides the surrounding
//! utilities: spectral initialization of block memberships, Bernoulli-SBM
//! simulation for benchmarks, dyad/node covariate containers and TSV
//! matrix IO.

#![deny(warnings)]

/// Partly observed network: Y/R sparse layers over a NaN-marked adjacency
pub mod network;

/// Dyad- and node-level covariate containers
pub mod covariates;

/// Randomized-SVD spectral clustering and membership comparison
pub mod clustering;

/// Bernoulli-SBM simulation with ground-truth memberships
pub mod simulate;

/// TSV read/write for dense matrices with `NA` missing markers
pub mod dmatrix_io;

pub use covariates::Covariates;
pub use network::{NetworkError, PartlyObservedNetwork};
pub use simulate::{simulate_sbm, SbmGroundTruth};
