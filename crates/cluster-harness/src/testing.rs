//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::http::{HttpClient, HttpResponse};
use crate::instance::InstanceId;
use crate::ports::PortAllocator;
use crate::process::{ProcessControl, ProcessState, SpawnRequest};
use crate::{Error, Result};

/// Process table that never launches anything.
#[derive(Debug, Default)]
pub struct FakeProcesses {
    inner: Mutex<FakeTable>,
}

#[derive(Debug, Default)]
struct FakeTable {
    next_pid: u32,
    states: HashMap<InstanceId, ProcessState>,
    spawned: Vec<SpawnRequest>,
    killed: Vec<InstanceId>,
    released: Vec<InstanceId>,
    ignore_kill: bool,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeTable {
                next_pid: 1000,
                ..FakeTable::default()
            }),
        }
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.inner.lock().unwrap().spawned.clone()
    }

    pub fn killed(&self) -> Vec<InstanceId> {
        self.inner.lock().unwrap().killed.clone()
    }

    pub fn released(&self) -> Vec<InstanceId> {
        self.inner.lock().unwrap().released.clone()
    }

    pub fn set_state(&self, id: InstanceId, state: ProcessState) {
        self.inner.lock().unwrap().states.insert(id, state);
    }

    /// Every running process exits with code 0.
    pub fn exit_all(&self) {
        let mut table = self.inner.lock().unwrap();
        for state in table.states.values_mut() {
            if *state == ProcessState::Running {
                *state = ProcessState::Exited {
                    code: Some(0),
                    signal: None,
                };
            }
        }
    }

    /// Kill requests are recorded but the process keeps running.
    pub fn ignore_kill(&self) {
        self.inner.lock().unwrap().ignore_kill = true;
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn(&self, request: &SpawnRequest) -> Result<InstanceId> {
        let mut table = self.inner.lock().unwrap();
        let id = InstanceId::new(table.next_pid);
        table.next_pid += 1;
        table.states.insert(id, ProcessState::Running);
        table.spawned.push(request.clone());
        Ok(id)
    }

    fn status(&self, id: InstanceId) -> ProcessState {
        self.inner
            .lock()
            .unwrap()
            .states
            .get(&id)
            .copied()
            .unwrap_or(ProcessState::NotFound)
    }

    fn kill(&self, id: InstanceId) -> Result<()> {
        let mut table = self.inner.lock().unwrap();
        if !table.states.contains_key(&id) {
            return Err(Error::Spawn(format!("no child process with {id}")));
        }
        table.killed.push(id);
        if !table.ignore_kill {
            table.states.insert(
                id,
                ProcessState::Exited {
                    code: None,
                    signal: Some(9),
                },
            );
        }
        Ok(())
    }

    fn release(&self, id: InstanceId) {
        let mut table = self.inner.lock().unwrap();
        if table.states.remove(&id).is_some() {
            table.released.push(id);
        }
    }
}

/// Sequential ports, optionally capped.
#[derive(Debug)]
pub struct FakePorts {
    next: Mutex<u16>,
    limit: Option<usize>,
    handed_out: Mutex<usize>,
}

impl FakePorts {
    pub fn new(first: u16) -> Self {
        Self {
            next: Mutex::new(first),
            limit: None,
            handed_out: Mutex::new(0),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl PortAllocator for FakePorts {
    fn allocate(&self, max_port: u16) -> Result<u16> {
        let mut handed_out = self.handed_out.lock().unwrap();
        if self.limit.is_some_and(|limit| *handed_out >= limit) {
            return Err(Error::PortExhausted {
                min: 0,
                max: max_port,
                tries: 20,
            });
        }
        let mut next = self.next.lock().unwrap();
        let port = *next;
        *next += 1;
        *handed_out += 1;
        Ok(port)
    }
}

/// Scripted HTTP endpoints.
///
/// Every URL answers 200 unless marked unready. A shutdown request makes
/// processes of the attached table exit, unless shutdown is ignored: a
/// routed instance's own `/_admin/shutdown` stops only that instance, any
/// other shutdown request stops all of them.
#[derive(Debug, Default)]
pub struct FakeHttp {
    unready: Mutex<HashSet<String>>,
    routes: Mutex<HashMap<String, InstanceId>>,
    gets: Mutex<Vec<String>>,
    deletes: Mutex<Vec<(String, Option<String>)>>,
    puts: Mutex<Vec<(String, String)>>,
    processes: Option<Arc<FakeProcesses>>,
    ignore_shutdown: bool,
    refuse_connections: bool,
    hanging: AtomicBool,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutting_down(processes: Arc<FakeProcesses>) -> Self {
        Self {
            processes: Some(processes),
            ..Self::default()
        }
    }

    pub fn ignoring_shutdown(mut self) -> Self {
        self.ignore_shutdown = true;
        self
    }

    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// `<base_url>/_api/version` answers 503 until [`Self::mark_ready`].
    pub fn mark_unready(&self, base_url: &str) {
        self.unready.lock().unwrap().insert(base_url.to_string());
    }

    pub fn mark_ready(&self, base_url: &str) {
        self.unready.lock().unwrap().remove(base_url);
    }

    /// Ties `base_url` to the process its shutdown request stops.
    pub fn route(&self, base_url: &str, id: InstanceId) {
        self.routes.lock().unwrap().insert(base_url.to_string(), id);
    }

    /// From now on every request is accepted but never answered.
    pub fn hang(&self) {
        self.hanging.store(true, Ordering::SeqCst);
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, Option<String>)> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    async fn stall_if_hanging(&self) {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn shut_down(&self, url: &str, processes: &FakeProcesses) {
        let routed = url
            .strip_suffix("/_admin/shutdown")
            .and_then(|base| self.routes.lock().unwrap().get(base).copied());
        match routed {
            Some(id) => processes.set_state(
                id,
                ProcessState::Exited {
                    code: Some(0),
                    signal: None,
                },
            ),
            None => processes.exit_all(),
        }
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str, _authorization: Option<&str>) -> Result<HttpResponse> {
        self.gets.lock().unwrap().push(url.to_string());
        self.stall_if_hanging().await;
        if self.refuse_connections {
            return Err(Error::Http("connection refused".to_string()));
        }
        let base = url.trim_end_matches("/_api/version");
        let code = if self.unready.lock().unwrap().contains(base) {
            503
        } else {
            200
        };
        Ok(HttpResponse {
            code,
            body: String::new(),
        })
    }

    async fn delete(&self, url: &str, authorization: Option<&str>) -> Result<HttpResponse> {
        self.deletes
            .lock()
            .unwrap()
            .push((url.to_string(), authorization.map(str::to_string)));
        self.stall_if_hanging().await;
        if self.refuse_connections {
            return Err(Error::Http("connection refused".to_string()));
        }
        if let Some(processes) = &self.processes {
            if !self.ignore_shutdown {
                self.shut_down(url, processes);
            }
        }
        Ok(HttpResponse {
            code: 200,
            body: String::new(),
        })
    }

    async fn put(&self, url: &str, body: &str, _authorization: Option<&str>) -> Result<HttpResponse> {
        self.puts.lock().unwrap().push((url.to_string(), body.to_string()));
        self.stall_if_hanging().await;
        if self.refuse_connections {
            return Err(Error::Http("connection refused".to_string()));
        }
        Ok(HttpResponse {
            code: 200,
            body: String::new(),
        })
    }
}
