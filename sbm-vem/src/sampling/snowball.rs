//! Snowball sampling: a Bernoulli wave of seed nodes, then a fixed
//! number of expansion waves along realized edges. Only the seed rate
//! is a free parameter; the wave count is a design choice.

use nalgebra::DMatrix;
use net_data::PartlyObservedNetwork;
use rand::rngs::StdRng;
use rand::Rng;

use super::{clamp_proba, node_flags_to_r, PenaltyScale, SamplingDesign, SamplingModel, VariationalView};
use crate::error::MissNetError;

#[derive(Debug, Clone)]
pub struct SnowballSampling {
    rho: f64,
    waves: usize,
}

impl SnowballSampling {
    pub fn new(rho: f64, waves: usize) -> Self {
        SnowballSampling { rho, waves }
    }
}

impl SamplingModel for SnowballSampling {
    fn design(&self) -> SamplingDesign {
        SamplingDesign::Snowball
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.rho]
    }

    fn penalty_scale(&self) -> PenaltyScale {
        PenaltyScale::Node
    }

    /// Node-binomial surrogate. The waves are deterministic given the
    /// seeds and the edges, so the seed rate carries the randomness.
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

    /// Same surrogate as the log-probability: the marginal node
    /// observation rate stands in for the seed rate.
    fn estimate_mar(&mut self, net: &PartlyObservedNetwork) -> Result<(), MissNetError> {
        self.rho = clamp_proba(net.nb_sampled_nodes() as f64 / net.n_nodes() as f64);
        Ok(())
    }

    fn draw_observation(
        &self,
        adjacency: &DMatrix<f64>,
        _directed: bool,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, MissNetError> {
        let n = adjacency.nrows();
        let mut flags: Vec<bool> = (0..n).map(|_| rng.random::<f64>() < self.rho).collect();

        for _ in 1..self.waves {
            let frontier = flags.clone();
            for i in 0..n {
                if flags[i] {
                    continue;
                }
                let reached = (0..n).any(|j| {
                    frontier[j] && (adjacency[(i, j)] == 1.0 || adjacency[(j, i)] == 1.0)
                });
                if reached {
                    flags[i] = true;
                }
            }
        }
        Ok(node_flags_to_r(&flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net_data::simulate::planted_partition;
    use rand::SeedableRng;

    #[test]
    fn waves_expand_the_sample() {
        let truth = planted_partition(80, 2, 0.3, 0.05, 11).unwrap();
        let one = SnowballSampling::new(0.1, 1);
        let two = SnowballSampling::new(0.1, 2);

        let count = |model: &SnowballSampling| {
            let mut rng = StdRng::seed_from_u64(42);
            let r = model
                .draw_observation(&truth.adjacency, false, &mut rng)
                .unwrap();
            (0..80).filter(|&i| (0..80).any(|j| r[(i, j)] == 1.0)).count()
        };
        let seeds = count(&one);
        let expanded = count(&two);
        assert!(seeds < expanded, "expansion {seeds} -> {expanded}");
        // dense blocks make a second wave reach almost everyone
        assert!(expanded > 60);
    }

    #[test]
    fn single_wave_is_plain_node_sampling() {
        let mut adj = DMatrix::zeros(20, 20);
        adj[(0, 1)] = 1.0;
        adj[(1, 0)] = 1.0;
        let model = SnowballSampling::new(1.0, 1);
        let mut rng = StdRng::seed_from_u64(0);
        let r = model.draw_observation(&adj, false, &mut rng).unwrap();
        for i in 0..20 {
            for j in 0..20 {
                assert_eq!(r[(i, j)], if i != j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn seed_rate_is_estimated_from_the_sampled_fraction() {
        let truth = planted_partition(100, 2, 0.3, 0.05, 19).unwrap();
        let gen = SnowballSampling::new(0.9, 2);
        let mut rng = StdRng::seed_from_u64(19);
        let r = gen.draw_observation(&truth.adjacency, false, &mut rng).unwrap();

        let mut adj = truth.adjacency.clone();
        for j in 0..100 {
            for i in 0..100 {
                if i != j && r[(i, j)] == 0.0 {
                    adj[(i, j)] = f64::NAN;
                }
            }
        }
        let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();

        let mut model = SnowballSampling::new(0.5, 2);
        model.estimate_mar(&net).unwrap();
        let rho = model.parameters()[0];
        let fraction = net.nb_sampled_nodes() as f64 / net.n_nodes() as f64;
        // the estimate is the fraction, up to the probability clamp
        assert!((rho - fraction).abs() < 1e-6, "rho {rho} vs fraction {fraction}");
        // a wave-expanded 0.9 seed rate samples well above the default
        assert!(rho > 0.8, "estimate stuck near the default: {rho}");
    }

    #[test]
    fn fixed_parameter_count() {
        let truth = planted_partition(20, 2, 0.4, 0.1, 7).unwrap();
        let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();
        let model = SnowballSampling::new(0.3, 3);
        assert_eq!(model.parameter_dimension(), 1);
        assert!(model.log_proba_observation(&net, None).is_finite());
    }
}
