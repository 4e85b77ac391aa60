//! Cluster harness CLI.
//!
//! Boots a local test cluster and keeps it up until Ctrl+C.
//!
//! # Quick Start
//!
//! ```bash
//! # Write the default options
//! cluster-harness config --output cluster.toml
//!
//! # Start 3 agents, 2 coordinators and 2 db-servers
//! cluster-harness up --config cluster.toml --agents 3 --coordinators 2 --dbservers 2
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Spawns, health-checks and tears down local multi-role test clusters.
#[derive(Parser)]
#[command(name = "cluster-harness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster, wait for Ctrl+C, then shut it down.
    Up {
        /// TOML options file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of agents [default: `agency_size` from the config].
        #[arg(long)]
        agents: Option<usize>,

        /// Number of coordinators.
        #[arg(long, default_value = "1")]
        coordinators: usize,

        /// Number of db-servers.
        #[arg(long, default_value = "2")]
        dbservers: usize,

        /// Server binary (overrides the config file).
        #[arg(long)]
        binary: Option<PathBuf>,

        /// Root working directory (overrides the config file).
        #[arg(long)]
        root_dir: Option<PathBuf>,
    },

    /// Print the default options as TOML.
    Config {
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            config,
            agents,
            coordinators,
            dbservers,
            binary,
            root_dir,
        } => {
            let options = commands::load_options(config.as_deref(), binary, root_dir)?;
            commands::up(options, agents, coordinators, dbservers).await
        }
        Commands::Config { output } => commands::print_config(output.as_deref()),
    }
}
