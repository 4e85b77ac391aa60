//! Subcommand implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cluster_harness::{ClusterManager, ClusterOptions, Instance};
use comfy_table::{Table, presets::UTF8_FULL};
use tracing::{info, warn};

/// Loads options from `config` (or defaults) and applies CLI overrides.
pub fn load_options(
    config: Option<&Path>,
    binary: Option<PathBuf>,
    root_dir: Option<PathBuf>,
) -> Result<ClusterOptions> {
    let mut options = match config {
        Some(path) => ClusterOptions::load(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => ClusterOptions::default(),
    };

    if let Some(binary) = binary {
        options.binary = binary;
    }
    if root_dir.is_some() {
        options.root_dir = root_dir;
    }
    options.validate().context("Invalid options")?;
    Ok(options)
}

/// Agent count for `up`: the flag if given, else `agency_size`.
pub fn agent_count(options: &ClusterOptions, agents: Option<usize>) -> usize {
    agents.unwrap_or(options.agency_size)
}

/// Starts the cluster, blocks until Ctrl+C, then cleans up.
pub async fn up(
    options: ClusterOptions,
    agents: Option<usize>,
    coordinators: usize,
    dbservers: usize,
) -> Result<()> {
    let agents = agent_count(&options, agents);
    let mut cluster = ClusterManager::new(options).context("Failed to create cluster manager")?;

    // Ctrl+C during startup aborts the readiness wait.
    let cancel = cluster.cancel_handle();
    let startup_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let started = cluster.start_cluster(agents, coordinators, dbservers).await;
    startup_interrupt.abort();

    let endpoint = match started {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(error = %e, "startup failed, cleaning up");
            cluster.cleanup().await.ok();
            return Err(e).context("Failed to start cluster");
        }
    };

    println!("{}", instance_table(cluster.instances()));
    println!();
    println!("Cluster endpoint: {endpoint}");
    println!("Root directory:   {}", cluster.root_dir().display());
    println!();
    println!("Press Ctrl+C to shut the cluster down.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("shutting down cluster");

    let report = cluster.cleanup().await.context("Cleanup failed")?;
    if !report.clean {
        bail!(
            "{} instance(s) had to be killed; logs kept in {}",
            report.killed.len(),
            cluster.root_dir().display()
        );
    }
    println!("Cluster shut down cleanly.");
    Ok(())
}

/// Prints the default options, or writes them to `output`.
pub fn print_config(output: Option<&Path>) -> Result<()> {
    let options = ClusterOptions::default();
    match output {
        Some(path) => {
            options
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default options to {}", path.display());
        }
        None => print!("{}", options.to_toml()?),
    }
    Ok(())
}

fn instance_table(instances: &[Instance]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Role", "PID", "Endpoint", "Status", "Directory"]);
    for instance in instances {
        let status = instance
            .exit_status()
            .map_or_else(|| "unknown".to_string(), |s| s.to_string());
        table.add_row(vec![
            instance.role().to_string(),
            instance.id().pid().to_string(),
            instance.endpoint().to_string(),
            status,
            instance.work_dir().display().to_string(),
        ]);
    }
    table
}
