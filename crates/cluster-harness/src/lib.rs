//! Test-cluster lifecycle management.
//!
//! Boots a multi-role cluster of server processes for integration tests:
//! - Agency bootstrap (consensus agents, last one announces membership)
//! - Coordinators and db-servers registered against the agency
//! - HTTP readiness probing with process liveness escalation
//! - Graceful-then-forced shutdown with bounded wait
//!
//! ```no_run
//! # async fn run() -> cluster_harness::Result<()> {
//! use cluster_harness::{ClusterManager, ClusterOptions};
//!
//! let mut cluster = ClusterManager::new(ClusterOptions::default())?;
//! let endpoint = cluster.start_cluster(3, 2, 2).await?;
//! println!("cluster answering on {endpoint}");
//! cluster.cleanup().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cancel;
pub mod config;
pub mod error;
pub mod http;
pub mod instance;
pub mod manager;
pub mod ports;
mod probe;
pub mod process;
mod starters;
pub mod topology;

#[cfg(test)]
mod testing;

pub use cancel::{CancelHandle, CancelToken};
pub use config::{ClusterOptions, Credentials, RoleOptions};
pub use error::{Error, Result, UnhealthyInstance};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use instance::{ExitStatus, Instance, InstanceId, Role, endpoint_to_url};
pub use manager::{CleanupReport, ClusterManager};
pub use ports::{LocalPortAllocator, PortAllocator};
pub use process::{LocalProcessControl, ProcessControl, ProcessState, SpawnRequest};
pub use topology::ArgMap;

/// Starts a cluster with local processes and returns the manager with the
/// entry endpoint.
///
/// If startup fails, the instances spawned so far are cleaned up before the
/// error is returned.
pub async fn start_cluster(
    options: ClusterOptions,
    agents: usize,
    coordinators: usize,
    db_servers: usize,
) -> Result<(ClusterManager, String)> {
    let mut manager = ClusterManager::new(options)?;
    match manager.start_cluster(agents, coordinators, db_servers).await {
        Ok(endpoint) => Ok((manager, endpoint)),
        Err(e) => {
            manager.cleanup().await.ok();
            Err(e)
        }
    }
}

/// Tears a running cluster down.
pub async fn stop_cluster(manager: &mut ClusterManager) -> Result<CleanupReport> {
    manager.cleanup().await
}
