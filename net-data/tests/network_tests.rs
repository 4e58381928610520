use net_data::clustering::adjusted_rand_index;
use net_data::simulate::planted_partition;
use net_data::PartlyObservedNetwork;

#[test]
fn fully_observed_simulation_has_all_dyads() {
    let truth = planted_partition(60, 3, 0.4, 0.05, 42).unwrap();
    let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();

    assert!(!net.is_directed());
    assert_eq!(net.nb_dyads(), 60 * 59 / 2);
    assert_eq!(net.nb_observed_dyads(), net.nb_dyads());
    assert!(net.sampled_nodes().iter().all(|&s| s));
}

#[test]
fn spectral_init_recovers_planted_blocks() {
    let truth = planted_partition(90, 3, 0.5, 0.02, 42).unwrap();
    let net = PartlyObservedNetwork::from_adjacency(truth.adjacency).unwrap();

    let labels = net.clustering_init(3, 42).unwrap();
    let ari = adjusted_rand_index(&labels, &truth.memberships);
    assert!(ari > 0.9, "spectral ARI too low: {ari}");
}

#[test]
fn spectral_init_tolerates_missing_dyads() {
    let truth = planted_partition(80, 2, 0.5, 0.02, 7).unwrap();
    let mut adj = truth.adjacency.clone();

    // knock out a band of dyads
    for j in 0..80 {
        for i in 0..j {
            if (i + j) % 7 == 0 {
                adj[(i, j)] = f64::NAN;
                adj[(j, i)] = f64::NAN;
            }
        }
    }

    let net = PartlyObservedNetwork::from_adjacency(adj).unwrap();
    assert!(net.nb_missing_dyads() > 0);

    let labels = net.clustering_init(2, 7).unwrap();
    let ari = adjusted_rand_index(&labels, &truth.memberships);
    assert!(ari > 0.8, "spectral ARI with missing dyads too low: {ari}");
}
