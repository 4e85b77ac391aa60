//! Cluster options: binary, topology, ports, timing and credentials.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options shared by every role a manager starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Server binary to launch.
    pub binary: PathBuf,

    /// Arguments placed before the generated `--key value` flags.
    pub binary_args: Vec<String>,

    /// Root working directory; a fresh temp directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// Endpoint scheme (`tcp` or `ssl`).
    pub protocol: String,

    /// Number of agents started by `start_agency`.
    pub agency_size: usize,

    /// Value of `agency.wait-for-sync`.
    pub agency_wait_for_sync: bool,

    /// Value of `agency.supervision`.
    pub agency_supervision: bool,

    /// Lower bound for free-port allocation.
    pub min_port: u16,

    /// Upper bound (exclusive) for free-port allocation.
    pub max_port: u16,

    /// Argument overrides merged into every role.
    pub extra_args: BTreeMap<String, String>,

    /// Overrides for agents only.
    pub agents: RoleOptions,

    /// Overrides for coordinators only.
    pub coordinators: RoleOptions,

    /// Overrides for db-servers only.
    pub dbservers: RoleOptions,

    /// Interval between readiness probes and shutdown polls.
    pub poll_interval_ms: u64,

    /// Failed probes between two liveness checks of the process.
    pub liveness_check_every: u32,

    /// Grace period before cleanup force-kills remaining instances.
    pub shutdown_timeout_secs: u64,

    /// Optional deadline for the readiness probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_secs: Option<u64>,

    /// Credentials for probe and shutdown requests.
    pub credentials: Credentials,
}

/// Per-role argument overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleOptions {
    pub extra_args: BTreeMap<String, String>,
}

/// Credentials used to build the `Authorization` header.
///
/// A JWT secret (or secret folder) takes precedence over basic auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Directory whose lexicographically first file holds the secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret_folder: Option<PathBuf>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: String::new(),
            jwt_secret: None,
            jwt_secret_folder: None,
        }
    }
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("arangod"),
            binary_args: Vec::new(),
            root_dir: None,
            protocol: "tcp".to_string(),
            agency_size: 1,
            agency_wait_for_sync: false,
            agency_supervision: true,
            min_port: 1024,
            max_port: 32768,
            extra_args: BTreeMap::new(),
            agents: RoleOptions::default(),
            coordinators: RoleOptions::default(),
            dbservers: RoleOptions::default(),
            poll_interval_ms: 500,
            liveness_check_every: 60,
            shutdown_timeout_secs: 60,
            probe_timeout_secs: None,
            credentials: Credentials::default(),
        }
    }
}

impl ClusterOptions {
    /// Loads options from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let options: Self = toml::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    /// Saves options as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects option combinations no cluster can be started with.
    pub fn validate(&self) -> Result<()> {
        if self.agency_size == 0 {
            return Err(crate::Error::Config("agency_size must be >= 1".to_string()));
        }
        if self.min_port >= self.max_port {
            return Err(crate::Error::Config(format!(
                "min_port {} must be below max_port {}",
                self.min_port, self.max_port
            )));
        }
        if self.liveness_check_every == 0 {
            return Err(crate::Error::Config(
                "liveness_check_every must be >= 1".to_string(),
            ));
        }
        if !matches!(self.protocol.as_str(), "tcp" | "ssl") {
            return Err(crate::Error::Config(format!(
                "unsupported protocol {:?}",
                self.protocol
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_secs.map(Duration::from_secs)
    }

    /// Builds `<protocol>://127.0.0.1:<port>`.
    pub fn endpoint_for(&self, port: u16) -> String {
        format!("{}://127.0.0.1:{port}", self.protocol)
    }
}
