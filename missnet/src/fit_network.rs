use anyhow::Context;
use clap::Args;
use log::info;
use net_data::dmatrix_io::{read_matrix_tsv, write_matrix_tsv};
use net_data::PartlyObservedNetwork;
use sbm_vem::{estimate_miss_sbm, Connectivity, FitStatus, SamplingDesign, VemOptions};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::observe_network::read_covariates;

#[derive(Args, Debug)]
pub struct FitArgs {
    /// Partially observed adjacency matrix (TSV, `NA` for missing)
    #[arg(required = true)]
    adjacency_file: Box<str>,

    /// Sampling design name
    #[arg(long, short, required = true)]
    design: Box<str>,

    /// Smallest number of blocks to try
    #[arg(long, default_value_t = 1)]
    q_min: usize,

    /// Largest number of blocks to try
    #[arg(long, default_value_t = 5)]
    q_max: usize,

    /// Dyad covariate matrices (comma-separated TSV files)
    #[arg(long, value_delimiter(','))]
    dyad_covariates: Option<Vec<Box<str>>>,

    /// Node covariate matrix (TSV, one row per node)
    #[arg(long)]
    node_covariates: Option<Box<str>>,

    /// Variational EM iterations per candidate
    #[arg(long, default_value_t = 50)]
    max_iter: usize,

    /// Relative bound improvement that counts as converged
    #[arg(long, default_value_t = 1e-4)]
    threshold: f64,

    /// Output header; writes {out}.membership.tsv,
    /// {out}.connectivity.tsv, {out}.icl.tsv and {out}.summary.json
    #[arg(long, short, required = true)]
    out: Box<str>,
}

#[derive(Serialize)]
struct FitSummary {
    n_nodes: usize,
    directed: bool,
    nb_missing_dyads: usize,
    design: String,
    best_q: usize,
    icl: f64,
    bound: f64,
    converged: bool,
    iterations: usize,
    sampling_parameters: Vec<f64>,
    block_proportions: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    covariate_coefficients: Option<Vec<f64>>,
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    env_logger::init();

    let adjacency = read_matrix_tsv(&args.adjacency_file)
        .with_context(|| format!("reading {}", args.adjacency_file))?;
    let net = PartlyObservedNetwork::from_adjacency(adjacency)?;
    info!(
        "network: {} nodes, {} directed, {} of {} dyads missing",
        net.n_nodes(),
        net.is_directed(),
        net.nb_missing_dyads(),
        net.nb_dyads()
    );

    let design: SamplingDesign = args.design.parse()?;
    let covariates =
        read_covariates(args.dyad_covariates.as_deref(), args.node_covariates.as_deref())?;

    anyhow::ensure!(
        args.q_min >= 1 && args.q_min <= args.q_max,
        "invalid block range {}..={}",
        args.q_min,
        args.q_max
    );
    let q_values: Vec<usize> = (args.q_min..=args.q_max).collect();

    let opts = VemOptions {
        max_iter: args.max_iter,
        threshold: args.threshold,
        trace: true,
        ..VemOptions::default()
    };

    let collection = estimate_miss_sbm(&net, &q_values, design, covariates.as_ref(), &opts)?;
    for (q, icl) in collection.icl_curve() {
        info!("q={q} icl={icl:.3}");
    }

    let best = collection.best();
    info!(
        "selected q={} (icl {:.3})",
        best.sbm().q(),
        best.icl(&net)
    );

    write_labels(
        &best.memberships(),
        &format!("{}.membership.tsv", args.out),
    )?;
    write_icl_curve(&collection.icl_curve(), &format!("{}.icl.tsv", args.out))?;

    match best.sbm().connectivity() {
        Connectivity::Bernoulli(theta) => {
            write_matrix_tsv(theta, &format!("{}.connectivity.tsv", args.out))?;
        }
        Connectivity::Logistic { gamma, .. } => {
            write_matrix_tsv(gamma, &format!("{}.connectivity.tsv", args.out))?;
        }
    }

    let (converged, iterations) = match best.status() {
        FitStatus::Converged { iterations } => (true, iterations),
        FitStatus::MaxIterReached { iterations } => (false, iterations),
    };
    let summary = FitSummary {
        n_nodes: net.n_nodes(),
        directed: net.is_directed(),
        nb_missing_dyads: net.nb_missing_dyads(),
        design: design.to_string(),
        best_q: best.sbm().q(),
        icl: best.icl(&net),
        bound: best.bound(),
        converged,
        iterations,
        sampling_parameters: best.sampling().parameters(),
        block_proportions: best.sbm().pi().iter().copied().collect(),
        covariate_coefficients: match best.sbm().connectivity() {
            Connectivity::Bernoulli(_) => None,
            Connectivity::Logistic { beta, .. } => Some(beta.clone()),
        },
    };
    let json = File::create(format!("{}.summary.json", args.out))?;
    serde_json::to_writer_pretty(BufWriter::new(json), &summary)?;

    Ok(())
}

fn write_labels(labels: &[usize], path: &str) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for label in labels {
        writeln!(out, "{label}")?;
    }
    Ok(())
}

fn write_icl_curve(curve: &[(usize, f64)], path: &str) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (q, icl) in curve {
        writeln!(out, "{q}\t{icl}")?;
    }
    Ok(())
}
