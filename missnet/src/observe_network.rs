use anyhow::Context;
use clap::Args;
use log::info;
use net_data::dmatrix_io::{read_matrix_tsv, write_matrix_tsv};
use net_data::Covariates;
use sbm_vem::SamplingDesign;

#[derive(Args, Debug)]
pub struct ObserveArgs {
    /// Fully observed 0/1 adjacency matrix (TSV)
    #[arg(required = true)]
    adjacency_file: Box<str>,

    /// Sampling design name (dyad, node, covar-dyad, covar-node,
    /// double-standard, block-dyad, block-node, degree, snowball)
    #[arg(long, short, required = true)]
    design: Box<str>,

    /// Design parameters (comma-separated)
    #[arg(long, short, required = true, value_delimiter(','))]
    parameters: Vec<f64>,

    /// Node cluster labels, one per line, for the block designs
    #[arg(long, short)]
    clusters: Option<Box<str>>,

    /// Dyad covariate matrices (comma-separated TSV files)
    #[arg(long, value_delimiter(','))]
    dyad_covariates: Option<Vec<Box<str>>>,

    /// Node covariate matrix (TSV, one row per node)
    #[arg(long)]
    node_covariates: Option<Box<str>>,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output file for the partially observed adjacency
    #[arg(long, short, required = true)]
    out: Box<str>,
}

pub fn run_observe(args: &ObserveArgs) -> anyhow::Result<()> {
    env_logger::init();

    let adjacency = read_matrix_tsv(&args.adjacency_file)
        .with_context(|| format!("reading {}", args.adjacency_file))?;
    info!(
        "adjacency: {} x {}",
        adjacency.nrows(),
        adjacency.ncols()
    );

    let design: SamplingDesign = args.design.parse()?;
    let clusters = match &args.clusters {
        None => None,
        Some(path) => Some(read_cluster_labels(path)?),
    };
    let covariates = read_covariates(args.dyad_covariates.as_deref(), args.node_covariates.as_deref())?;

    let observed = sbm_vem::observe_network(
        &adjacency,
        design,
        &args.parameters,
        clusters.as_deref(),
        covariates.as_ref(),
        args.seed,
    )?;

    let hidden = observed.iter().filter(|v| v.is_nan()).count();
    info!(
        "design `{design}` hid {hidden} of {} entries",
        observed.len() - observed.nrows()
    );

    write_matrix_tsv(&observed, &args.out).with_context(|| format!("writing {}", args.out))?;
    Ok(())
}

pub fn read_cluster_labels(path: &str) -> anyhow::Result<Vec<usize>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<usize>()
                .map_err(|_| anyhow::anyhow!("cannot parse cluster label {tok:?}"))
        })
        .collect()
}

pub fn read_covariates(
    dyad: Option<&[Box<str>]>,
    node: Option<&str>,
) -> anyhow::Result<Option<Covariates>> {
    match (dyad, node) {
        (Some(_), Some(_)) => {
            anyhow::bail!("provide either dyad or node covariates, not both")
        }
        (Some(files), None) => {
            let mats = files
                .iter()
                .map(|f| read_matrix_tsv(f))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Some(Covariates::Dyad(mats)))
        }
        (None, Some(file)) => Ok(Some(Covariates::Node(read_matrix_tsv(file)?))),
        (None, None) => Ok(None),
    }
}
