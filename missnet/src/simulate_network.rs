use anyhow::Context;
use clap::Args;
use log::info;
use nalgebra::DMatrix;
use net_data::dmatrix_io::{read_matrix_tsv, write_matrix_tsv};
use net_data::simulate_sbm;
use std::fs::File;
use std::io::{BufWriter, Write};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of nodes
    #[arg(long, short, required = true)]
    n_nodes: usize,

    /// Block proportions (comma-separated, must sum to 1)
    #[arg(long, value_delimiter(','))]
    proportions: Option<Vec<f64>>,

    /// Q x Q connectivity matrix (TSV); overrides --p-in / --p-out
    #[arg(long)]
    connectivity: Option<Box<str>>,

    /// Number of blocks for the planted partition shortcut
    #[arg(long, short = 'q', default_value_t = 2)]
    blocks: usize,

    /// Within-block edge probability
    #[arg(long, default_value_t = 0.25)]
    p_in: f64,

    /// Between-block edge probability
    #[arg(long, default_value_t = 0.05)]
    p_out: f64,

    /// Draw a directed network
    #[arg(long, default_value_t = false)]
    directed: bool,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output header; writes {out}.adjacency.tsv and {out}.membership.tsv
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    env_logger::init();

    let (pi, theta) = match (&args.proportions, &args.connectivity) {
        (Some(pi), Some(path)) => {
            let theta =
                read_matrix_tsv(path).with_context(|| format!("reading {path}"))?;
            (pi.clone(), theta)
        }
        (None, None) => {
            let q = args.blocks;
            let pi = vec![1.0 / q as f64; q];
            let theta = DMatrix::from_fn(q, q, |i, j| {
                if i == j {
                    args.p_in
                } else {
                    args.p_out
                }
            });
            (pi, theta)
        }
        _ => anyhow::bail!("--proportions and --connectivity must be given together"),
    };

    let truth = simulate_sbm(args.n_nodes, &pi, &theta, args.directed, args.seed)?;
    let edges = truth.adjacency.iter().filter(|&&v| v == 1.0).count();
    info!(
        "simulated {} nodes, {} blocks, {} stored edge entries",
        args.n_nodes,
        pi.len(),
        edges
    );

    write_matrix_tsv(&truth.adjacency, &format!("{}.adjacency.tsv", args.out))?;

    let labels = File::create(format!("{}.membership.tsv", args.out))?;
    let mut labels = BufWriter::new(labels);
    for c in &truth.memberships {
        writeln!(labels, "{c}")?;
    }
    Ok(())
}
