//! Instance records: one supervised server process per record.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::process::ProcessState;
use crate::topology::ArgMap;

/// Role a server process plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Consensus member of the agency.
    Agent,

    /// Stateless query router.
    Coordinator,

    /// Data-bearing primary.
    #[serde(rename = "dbserver")]
    DbServer,
}

impl Role {
    /// Name used for work directories and log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Coordinator => "coordinator",
            Role::DbServer => "dbserver",
        }
    }

    /// Value of the `cluster.my-role` flag, if the role registers with the agency.
    pub fn cluster_role(self) -> Option<&'static str> {
        match self {
            Role::Agent => None,
            Role::Coordinator => Some("COORDINATOR"),
            Role::DbServer => Some("PRIMARY"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a spawned instance (the OS process id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(u32);

impl InstanceId {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub fn pid(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Last observed status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Observed alive.
    Running,

    /// Terminated by the manager.
    Killed,

    /// Exited on its own (or vanished from the process table).
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl ExitStatus {
    pub fn is_running(self) -> bool {
        matches!(self, ExitStatus::Running)
    }
}

impl From<ProcessState> for ExitStatus {
    fn from(state: ProcessState) -> Self {
        match state {
            ProcessState::Running => ExitStatus::Running,
            ProcessState::Exited { code, signal } => ExitStatus::Exited { code, signal },
            ProcessState::NotFound => ExitStatus::Exited {
                code: None,
                signal: None,
            },
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Running => f.write_str("RUNNING"),
            ExitStatus::Killed => f.write_str("KILLED"),
            ExitStatus::Exited { code, signal } => {
                f.write_str("EXITED")?;
                if let Some(code) = code {
                    write!(f, " code={code}")?;
                }
                if let Some(signal) = signal {
                    write!(f, " signal={signal}")?;
                }
                Ok(())
            }
        }
    }
}

/// A spawned server process and everything needed to find, probe or relaunch it.
///
/// Fields are only mutated by the manager (`check`, `kill`, `restart`) and the
/// readiness prober.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    role: Role,
    endpoint: String,
    url: String,
    work_dir: PathBuf,
    args: ArgMap,
    exit_status: Option<ExitStatus>,
    restart_count: usize,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        role: Role,
        endpoint: String,
        work_dir: PathBuf,
        args: ArgMap,
    ) -> Self {
        let url = endpoint_to_url(&endpoint);
        Self {
            id,
            role,
            endpoint,
            url,
            work_dir,
            args,
            exit_status: None,
            restart_count: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Network endpoint, e.g. `tcp://127.0.0.1:4001`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// HTTP form of [`Self::endpoint`].
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Arguments the process was launched with.
    pub fn args(&self) -> &ArgMap {
        &self.args
    }

    /// `None` until the first observation.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    /// True unless the instance has been observed in a terminal state.
    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none_or(ExitStatus::is_running)
    }

    /// Records a fresh OS observation.
    ///
    /// A terminal status is never replaced by `Running`, and `Killed` is kept
    /// as is; only [`Self::restarted`] clears a terminal status.
    pub(crate) fn observe(&mut self, state: ProcessState) {
        let observed = ExitStatus::from(state);
        match self.exit_status {
            Some(ExitStatus::Killed) => {}
            Some(current) if !current.is_running() && observed.is_running() => {}
            _ => self.exit_status = Some(observed),
        }
    }

    pub(crate) fn mark_killed(&mut self) {
        self.exit_status = Some(ExitStatus::Killed);
    }

    pub(crate) fn restarted(&mut self, id: InstanceId) {
        self.id = id;
        self.exit_status = None;
        self.restart_count += 1;
    }
}

/// Converts a server endpoint into the URL used for HTTP requests.
///
/// `ssl://` maps to `https://`, any other scheme to `http://`, and a bare
/// `host:port` gets an `http://` prefix.
pub fn endpoint_to_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("ssl://") {
        return format!("https://{rest}");
    }
    match endpoint.find("://") {
        Some(pos) => format!("http{}", &endpoint[pos..]),
        None => format!("http://{endpoint}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new(
            InstanceId::new(42),
            Role::Coordinator,
            "tcp://127.0.0.1:4001".to_string(),
            PathBuf::from("/tmp/coordinator-0"),
            ArgMap::new(),
        )
    }

    #[test]
    fn test_endpoint_to_url() {
        assert_eq!(endpoint_to_url("tcp://127.0.0.1:80"), "http://127.0.0.1:80");
        assert_eq!(endpoint_to_url("ssl://127.0.0.1:443"), "https://127.0.0.1:443");
        assert_eq!(endpoint_to_url("127.0.0.1:80"), "http://127.0.0.1:80");
    }

    #[test]
    fn test_new_instance_is_unobserved() {
        let inst = instance();
        assert_eq!(inst.url(), "http://127.0.0.1:4001");
        assert_eq!(inst.exit_status(), None);
        assert!(inst.is_alive());
    }

    #[test]
    fn test_terminal_status_is_not_reverted() {
        let mut inst = instance();
        inst.observe(ProcessState::Running);
        assert_eq!(inst.exit_status(), Some(ExitStatus::Running));

        inst.observe(ProcessState::Exited {
            code: Some(1),
            signal: None,
        });
        inst.observe(ProcessState::Running);
        assert_eq!(
            inst.exit_status(),
            Some(ExitStatus::Exited {
                code: Some(1),
                signal: None
            })
        );
        assert!(!inst.is_alive());
    }

    #[test]
    fn test_killed_sticks_until_restart() {
        let mut inst = instance();
        inst.mark_killed();
        inst.observe(ProcessState::Running);
        assert_eq!(inst.exit_status(), Some(ExitStatus::Killed));

        inst.restarted(InstanceId::new(43));
        assert_eq!(inst.id(), InstanceId::new(43));
        assert_eq!(inst.exit_status(), None);
        assert_eq!(inst.restart_count(), 1);
        assert_eq!(inst.endpoint(), "tcp://127.0.0.1:4001");
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::DbServer.to_string(), "dbserver");
        assert_eq!(Role::Coordinator.cluster_role(), Some("COORDINATOR"));
        assert_eq!(Role::DbServer.cluster_role(), Some("PRIMARY"));
        assert_eq!(Role::Agent.cluster_role(), None);
    }
}
