mod fit_network;
mod observe_network;
mod simulate_network;

use clap::{Parser, Subcommand};
use log::info;

use fit_network::*;
use observe_network::*;
use simulate_network::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "MISSNET",
    long_about = "Stochastic block models for partially observed networks.\n\
		  Adjacency matrices are tab-separated text with `NA` marking\n\
		  dyads the sampling process did not record."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Hide part of a network through a sampling design",
        long_about = "Apply an observation process to a fully observed network:\n\
		      (1) draw which dyads the design records\n\
		      (2) replace the unrecorded dyads with NA.\n"
    )]
    Observe(ObserveArgs),

    #[command(
        about = "Fit block models to a partially observed network",
        long_about = "Joint variational inference of the block model and the\n\
		      sampling design over a range of block counts:\n\
		      (1) spectral initialization plus random restarts per Q\n\
		      (2) variational EM with the design's estimator in the loop\n\
		      (3) ICL-based selection of the number of blocks.\n"
    )]
    Fit(FitArgs),

    #[command(
        about = "Simulate a Bernoulli SBM network",
        long_about = "Draw a network from a stochastic block model, either a\n\
		      planted partition (--blocks, --p-in, --p-out) or explicit\n\
		      --proportions and a --connectivity matrix.\n"
    )]
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Observe(args) => {
            run_observe(args)?;
        }
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
