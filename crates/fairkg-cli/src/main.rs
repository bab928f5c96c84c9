mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::CliOverrides;
use pipeline::{SummaryArgs, TrainArgs};

/// fairkg: adversarially fair knowledge-graph embeddings.
#[derive(Parser)]
#[command(name = "fairkg", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training and dataset inspection.
#[derive(Subcommand)]
enum Command {
    /// Train an encoder against per-attribute discriminators.
    Train {
        /// Path to the triplet file (`user subreddit [relation]` per line).
        #[arg(long)]
        triplets: PathBuf,
        /// Sensitive attribute JSON file; repeat for several attributes.
        #[arg(long = "attribute")]
        attributes: Vec<PathBuf>,
        /// Path to training config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for checkpoints.
        #[arg(long, default_value = "checkpoints/fairkg")]
        output_dir: PathBuf,
        /// Override number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Override batch size (must be even).
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override corruption passes per batch.
        #[arg(long)]
        num_nce: Option<usize>,
        /// Override fairness penalty weight.
        #[arg(long)]
        gamma: Option<f64>,
        /// Override discriminator updates per batch.
        #[arg(long)]
        d_steps: Option<usize>,
        /// Override RNG seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Epochs between checkpoints.
        #[arg(long)]
        checkpoint_interval: Option<usize>,
        /// Train a random subset of discriminators each batch.
        #[arg(long)]
        sample_mask: bool,
        /// Use the raw discriminator loss as the adversarial signal.
        #[arg(long)]
        cross_entropy: bool,
        /// Keep the encoder fixed and only train discriminators.
        #[arg(long)]
        freeze_encoder: bool,
        /// Flag corrupted triplets that are known positives.
        #[arg(long)]
        filter_false_negs: bool,
        /// Append metrics to this JSONL file.
        #[arg(long)]
        metrics: Option<PathBuf>,
    },
    /// Print statistics from a triplet file.
    Summary {
        /// Path to the triplet file.
        #[arg(long)]
        triplets: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            triplets,
            attributes,
            config,
            output_dir,
            epochs,
            batch_size,
            num_nce,
            gamma,
            d_steps,
            seed,
            checkpoint_interval,
            sample_mask,
            cross_entropy,
            freeze_encoder,
            filter_false_negs,
            metrics,
        } => pipeline::run_train(TrainArgs {
            triplets,
            attributes,
            config,
            output_dir,
            metrics,
            overrides: CliOverrides {
                epochs,
                batch_size,
                num_nce,
                gamma,
                d_steps,
                seed,
                checkpoint_interval,
                sample_mask,
                cross_entropy,
                freeze_encoder,
                filter_false_negs,
            },
        }),
        Command::Summary { triplets, json } => pipeline::run_summary(SummaryArgs { triplets, json }),
    }
}
