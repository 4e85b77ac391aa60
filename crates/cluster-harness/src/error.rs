//! Error types for cluster lifecycle management.

use std::fmt;

use crate::instance::{ExitStatus, InstanceId, Role};
use thiserror::Error;

/// Cluster lifecycle errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A coordinator or db-server was requested before any agent exists.
    #[error("No agency instance has been started")]
    NoAgency,

    /// Agents exist, but every one of them has been observed dead.
    #[error("No agency instance is alive")]
    NoLiveAgent,

    /// No coordinator is currently reporting as running.
    #[error("No running coordinator available as cluster entry point")]
    NoCoordinator,

    /// The instance is not tracked by this manager.
    #[error("Instance {0} is not managed by this manager")]
    NotManaged(InstanceId),

    /// An instance died while the readiness probe was waiting on it.
    #[error("Instance {id} died during startup: {state}")]
    InstanceDead { id: InstanceId, state: String },

    /// One or more instances are not running.
    #[error("{} instance(s) not running: {}", .0.len(), list(.0))]
    Unhealthy(Vec<UnhealthyInstance>),

    /// No free port could be found in the configured range.
    #[error("Couldn't find a free port after {tries} tries in range {min}..{max}")]
    PortExhausted { min: u16, max: u16, tries: usize },

    /// Process spawn error.
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authorization header could not be produced.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A wait loop was aborted through its cancel handle.
    #[error("Operation cancelled")]
    Cancelled,

    /// The readiness probe exceeded its configured deadline.
    #[error("Instances did not become ready within {0:?}")]
    ProbeTimeout(std::time::Duration),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An instance reported by [`ClusterManager::check`](crate::ClusterManager::check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhealthyInstance {
    pub id: InstanceId,
    pub role: Role,
    pub status: Option<ExitStatus>,
}

impl fmt::Display for UnhealthyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(status) => write!(f, "{} {} ({status})", self.role, self.id),
            None => write!(f, "{} {} (unknown)", self.role, self.id),
        }
    }
}

fn list(instances: &[UnhealthyInstance]) -> String {
    instances
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
