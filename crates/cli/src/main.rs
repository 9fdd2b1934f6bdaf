//! vpactl - vertical resource admission CLI
//!
//! Computes the edits the admission webhook would make to a pod, validates
//! recommendation objects, and inspects resource quantities, all offline.

mod commands;
mod inputs;
mod output;

use admission_lib::{FeatureGates, Quantity};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{patch, quantity, validate};
use std::path::PathBuf;

/// Vertical resource admission CLI
#[derive(Parser)]
#[command(name = "vpactl")]
#[command(author, version, about = "Offline tool for vertical resource admission", long_about = None)]
pub struct Cli {
    /// Feature gates, as comma-separated Name=true|false pairs
    #[arg(long, env = "VPA_ADMISSION_FEATURE_GATES", default_value = "")]
    pub feature_gates: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute the edit list for a pod
    Patch {
        /// Pod object (JSON)
        #[arg(long)]
        pod: PathBuf,

        /// Recommendation objects (JSON array, List, or single object)
        #[arg(long)]
        recommendations: PathBuf,

        /// LimitRange objects for the pod's namespace
        #[arg(long)]
        limit_ranges: Option<PathBuf>,

        /// Label selectors keyed by Kind/name of the targeted controller
        #[arg(long)]
        selectors: Option<PathBuf>,

        /// Compute edits for the resize subresource
        #[arg(long)]
        resize: bool,

        /// Upper bound for boosted CPU
        #[arg(long)]
        boost_max_cpu: Option<String>,

        /// Print the patched pod instead of the edits
        #[arg(long)]
        apply: bool,
    },

    /// Validate recommendation objects
    Validate {
        /// Recommendation objects (JSON array, List, or single object)
        file: PathBuf,

        /// Apply the rules for object creation
        #[arg(long)]
        create: bool,
    },

    /// Parse and normalize resource quantities
    Quantity {
        /// Quantities such as 500m, 1.5, 256Mi
        #[arg(required = true)]
        values: Vec<String>,
    },
}

fn init_logging(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter("debug")
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let features: FeatureGates = cli
        .feature_gates
        .parse()
        .context("Invalid --feature-gates")?;

    match cli.command {
        Commands::Patch {
            pod,
            recommendations,
            limit_ranges,
            selectors,
            resize,
            boost_max_cpu,
            apply,
        } => {
            let boost_max_cpu = boost_max_cpu
                .as_deref()
                .map(str::parse::<Quantity>)
                .transpose()
                .context("Invalid --boost-max-cpu")?;
            let input = patch::PatchInput {
                pod,
                recommendations,
                limit_ranges,
                selectors,
                subresource: resize.then(|| "resize".to_string()),
                features,
                boost_max_cpu,
            };
            patch::run(&input, apply, cli.format).await?;
        }
        Commands::Validate { file, create } => {
            validate::run(&file, create, &features, cli.format)?;
        }
        Commands::Quantity { values } => {
            quantity::run(&values, cli.format)?;
        }
    }

    Ok(())
}
