//! Server process control.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::instance::{InstanceId, Role};
use crate::topology::ArgMap;
use crate::{Error, Result};

/// Everything needed to launch (or relaunch) one server process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub role: Role,
    pub binary: PathBuf,
    pub binary_args: Vec<String>,
    pub args: ArgMap,
    pub work_dir: PathBuf,
}

impl SpawnRequest {
    /// Full argument vector: `binary_args`, then the rendered arg map.
    pub fn command_line(&self) -> Vec<String> {
        let mut line = self.binary_args.clone();
        line.extend(self.args.to_command_line());
        line
    }
}

/// Live state of a process as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    NotFound,
}

/// Spawns, inspects and kills server processes.
///
/// Calls return as soon as the OS has accepted the request; none of them
/// waits for the process to become ready or to exit.
pub trait ProcessControl: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<InstanceId>;

    fn status(&self, id: InstanceId) -> ProcessState;

    fn kill(&self, id: InstanceId) -> Result<()>;

    /// Forgets the process. One still running is killed.
    fn release(&self, id: InstanceId);
}

/// [`ProcessControl`] backed by `tokio::process`.
///
/// Output of each process is appended to `server.log` in its work directory.
/// Children are killed when this value is dropped.
#[derive(Debug, Default)]
pub struct LocalProcessControl {
    children: Mutex<HashMap<InstanceId, Child>>,
}

impl LocalProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceId, Child>> {
        // A poisoned map still holds valid child handles.
        self.children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ProcessControl for LocalProcessControl {
    fn spawn(&self, request: &SpawnRequest) -> Result<InstanceId> {
        let log_path = request.work_dir.join("server.log");
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_err = log.try_clone()?;

        let child = Command::new(&request.binary)
            .args(request.command_line())
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {e}", request.binary.display())))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Spawn("process exited before reporting a pid".to_string()))?;
        let id = InstanceId::new(pid);
        debug!(%id, role = %request.role, log = %log_path.display(), "spawned process");

        self.children().insert(id, child);
        Ok(id)
    }

    fn status(&self, id: InstanceId) -> ProcessState {
        let mut children = self.children();
        let Some(child) = children.get_mut(&id) else {
            return ProcessState::NotFound;
        };

        match child.try_wait() {
            Ok(None) => ProcessState::Running,
            Ok(Some(status)) => ProcessState::Exited {
                code: status.code(),
                signal: exit_signal(status),
            },
            Err(_) => ProcessState::NotFound,
        }
    }

    fn kill(&self, id: InstanceId) -> Result<()> {
        let mut children = self.children();
        let child = children
            .get_mut(&id)
            .ok_or_else(|| Error::Spawn(format!("no child process with {id}")))?;

        // Already exited: nothing to signal.
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        child.start_kill()?;
        Ok(())
    }

    fn release(&self, id: InstanceId) {
        let Some(mut child) = self.children().remove(&id) else {
            return;
        };
        if matches!(child.try_wait(), Ok(None)) {
            warn!(%id, "releasing a running process, killing it");
            if let Err(e) = child.start_kill() {
                warn!(%id, error = %e, "kill failed");
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}
