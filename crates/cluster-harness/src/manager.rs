//! Cluster manager: owns the instance list and drives the whole lifecycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::authorization_header;
use crate::cancel::{CancelHandle, CancelToken, cancel_pair};
use crate::error::UnhealthyInstance;
use crate::http::{HttpClient, ReqwestClient};
use crate::instance::{ExitStatus, Instance, InstanceId, Role};
use crate::ports::{LocalPortAllocator, PortAllocator};
use crate::probe::ReadinessProber;
use crate::process::{LocalProcessControl, ProcessControl, SpawnRequest};
use crate::starters::{self, StartContext};
use crate::topology::{ArgMap, WorkDirNamer};
use crate::{ClusterOptions, Error, Result};

/// Per-request timeout of the HTTP client built by [`ClusterManager::new`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of [`ClusterManager::cleanup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Every instance exited within the shutdown timeout.
    pub clean: bool,

    /// Instances force-killed after the timeout.
    pub killed: Vec<InstanceId>,
}

/// Boots, observes and retires one cluster topology.
///
/// Operations are sequential and take `&mut self`; the instance list and the
/// root directory belong to this manager alone.
pub struct ClusterManager {
    options: ClusterOptions,
    root_dir: PathBuf,
    instances: Vec<Instance>,
    namer: WorkDirNamer,
    authorization: String,
    process: Arc<dyn ProcessControl>,
    ports: Arc<dyn PortAllocator>,
    http: Arc<dyn HttpClient>,
    cancel: CancelHandle,
    cancel_token: CancelToken,
}

impl ClusterManager {
    /// Creates a manager that launches local processes.
    pub fn new(options: ClusterOptions) -> Result<Self> {
        let ports = Arc::new(LocalPortAllocator::new(options.min_port));
        let http = Arc::new(ReqwestClient::new(REQUEST_TIMEOUT)?);
        Self::with_collaborators(options, Arc::new(LocalProcessControl::new()), ports, http)
    }

    /// Creates a manager on top of caller-supplied process, port and HTTP
    /// primitives.
    pub fn with_collaborators(
        options: ClusterOptions,
        process: Arc<dyn ProcessControl>,
        ports: Arc<dyn PortAllocator>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        options.validate()?;

        let root_dir = match &options.root_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(format!("cluster-harness-{}", Uuid::new_v4())),
        };
        let authorization = authorization_header(&options.credentials)?;
        let (cancel, cancel_token) = cancel_pair();

        Ok(Self {
            options,
            root_dir,
            instances: Vec::new(),
            namer: WorkDirNamer::default(),
            authorization,
            process,
            ports,
            http,
            cancel,
            cancel_token,
        })
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Every instance ever started by this manager, in start order.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Handle that aborts the readiness wait and shortens the cleanup wait.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn context(&self) -> StartContext<'_> {
        StartContext {
            options: &self.options,
            root_dir: &self.root_dir,
            process: self.process.as_ref(),
            ports: self.ports.as_ref(),
        }
    }

    /// Starts `agency_size` agents using the configured options.
    pub fn start_agency(&mut self) -> Result<Vec<Instance>> {
        self.start_agency_sized(self.options.agency_size)
    }

    fn start_agency_sized(&mut self, size: usize) -> Result<Vec<Instance>> {
        let mut instances = std::mem::take(&mut self.instances);
        let result = starters::start_agency(
            &self.context(),
            &mut instances,
            size,
            self.options.agency_wait_for_sync,
        );
        self.instances = instances;
        result
    }

    /// Starts one coordinator registered with the current agency endpoint.
    pub fn start_coordinator(&mut self, extra: &ArgMap) -> Result<Instance> {
        self.start_server(Role::Coordinator, extra)
    }

    /// Starts one db-server registered with the current agency endpoint.
    pub fn start_db_server(&mut self, extra: &ArgMap) -> Result<Instance> {
        self.start_server(Role::DbServer, extra)
    }

    fn start_server(&mut self, role: Role, extra: &ArgMap) -> Result<Instance> {
        let agency_endpoint = self.get_agency_endpoint()?;

        let mut instances = std::mem::take(&mut self.instances);
        let mut namer = std::mem::take(&mut self.namer);
        let result = starters::start_server(
            &self.context(),
            &mut instances,
            &mut namer,
            role,
            &agency_endpoint,
            extra,
        );
        self.instances = instances;
        self.namer = namer;
        result
    }

    /// Boots a full cluster and returns its entry endpoint.
    ///
    /// Order is fixed: agency, coordinators, db-servers, then the readiness
    /// probe over every instance. The entry endpoint is the first running
    /// coordinator, or the agency endpoint when no coordinator was requested.
    /// On failure, already spawned instances stay recorded; call
    /// [`Self::cleanup`] regardless.
    pub async fn start_cluster(
        &mut self,
        num_agents: usize,
        num_coordinators: usize,
        num_db_servers: usize,
    ) -> Result<String> {
        if num_agents == 0 {
            return Err(Error::Config("a cluster needs at least one agent".to_string()));
        }
        info!(
            num_agents,
            num_coordinators,
            num_db_servers,
            root_dir = %self.root_dir.display(),
            "starting cluster"
        );

        self.start_agency_sized(num_agents)?;
        for _ in 0..num_coordinators {
            self.start_coordinator(&ArgMap::new())?;
        }
        for _ in 0..num_db_servers {
            self.start_db_server(&ArgMap::new())?;
        }

        match self.wait_for_all_instances().await? {
            Some(endpoint) => Ok(endpoint),
            None => self.get_agency_endpoint(),
        }
    }

    /// Probes every instance until ready; returns the first running
    /// coordinator's endpoint, if any.
    pub async fn wait_for_all_instances(&mut self) -> Result<Option<String>> {
        let prober = ReadinessProber::new(
            self.http.as_ref(),
            self.process.as_ref(),
            Some(self.authorization.as_str()),
            &self.options,
        );
        prober
            .wait_for_all(
                &mut self.instances,
                &mut self.cancel_token,
                self.options.probe_timeout(),
            )
            .await
    }

    pub fn agents(&self) -> Vec<&Instance> {
        self.by_role(Role::Agent)
    }

    pub fn coordinators(&self) -> Vec<&Instance> {
        self.by_role(Role::Coordinator)
    }

    pub fn db_servers(&self) -> Vec<&Instance> {
        self.by_role(Role::DbServer)
    }

    fn by_role(&self, role: Role) -> Vec<&Instance> {
        self.instances.iter().filter(|i| i.role() == role).collect()
    }

    /// Endpoint of the first agent not observed dead.
    pub fn get_agency_endpoint(&self) -> Result<String> {
        starters::agency_endpoint(&self.instances)
    }

    /// Endpoint of the first coordinator last observed running.
    pub fn get_endpoint(&self) -> Result<String> {
        self.entry_coordinator()
            .map(|i| i.endpoint().to_string())
            .ok_or(Error::NoCoordinator)
    }

    fn entry_coordinator(&self) -> Option<&Instance> {
        self.instances
            .iter()
            .find(|i| i.role() == Role::Coordinator && i.exit_status() == Some(ExitStatus::Running))
    }

    /// Re-samples every process and fails with all instances not running.
    pub fn check(&mut self) -> Result<()> {
        let mut unhealthy = Vec::new();
        for instance in &mut self.instances {
            instance.observe(self.process.status(instance.id()));
            if instance.exit_status() != Some(ExitStatus::Running) {
                unhealthy.push(UnhealthyInstance {
                    id: instance.id(),
                    role: instance.role(),
                    status: instance.exit_status(),
                });
            }
        }

        if unhealthy.is_empty() {
            Ok(())
        } else {
            Err(Error::Unhealthy(unhealthy))
        }
    }

    fn position(&self, id: InstanceId) -> Result<usize> {
        self.instances
            .iter()
            .position(|i| i.id() == id)
            .ok_or(Error::NotManaged(id))
    }

    /// Signals the process and marks it `Killed` without waiting for it to exit.
    pub fn kill(&mut self, id: InstanceId) -> Result<()> {
        let index = self.position(id)?;
        self.process.kill(id)?;
        self.instances[index].mark_killed();
        info!(%id, role = %self.instances[index].role(), "killed instance");
        Ok(())
    }

    /// Relaunches an instance with its recorded arguments and work directory.
    ///
    /// The endpoint is reused; the returned id replaces the old one. The old
    /// process is released first, which kills it if it is still running.
    pub fn restart(&mut self, id: InstanceId) -> Result<InstanceId> {
        let index = self.position(id)?;
        self.process.release(id);
        let instance = &self.instances[index];
        let request = SpawnRequest {
            role: instance.role(),
            binary: self.options.binary.clone(),
            binary_args: self.options.binary_args.clone(),
            args: instance.args().clone(),
            work_dir: instance.work_dir().to_path_buf(),
        };

        let new_id = self.process.spawn(&request)?;
        let instance = &mut self.instances[index];
        instance.restarted(new_id);
        info!(old = %id, new = %new_id, role = %instance.role(), endpoint = %instance.endpoint(), "restarted instance");
        Ok(new_id)
    }

    /// Graceful-then-forced shutdown.
    ///
    /// With a running coordinator, the cluster is put into maintenance mode
    /// and asked to shut down as a whole. Otherwise each instance is asked
    /// on its own: coordinators, then db-servers, and agents only once no
    /// other role is still running. Every request counts against the
    /// shutdown timeout and gives way to cancellation. Whatever is still
    /// alive at the deadline is force-killed. The root directory is removed
    /// only after a clean shutdown; otherwise it is kept for inspection.
    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        let deadline = Instant::now() + self.options.shutdown_timeout();
        let interval = self.options.poll_interval();

        let mut pending: Vec<usize> = (0..self.instances.len())
            .filter(|&i| self.instances[i].is_alive())
            .collect();
        let mut requested = vec![false; self.instances.len()];

        if let Some(url) = self.entry_coordinator().map(|c| c.url().to_string()) {
            self.enable_maintenance(&url, deadline).await;
            let shutdown = format!("{url}/_admin/shutdown?shutdown_cluster=1");
            if self.send_shutdown(&shutdown, deadline).await {
                requested.fill(true);
            }
        }

        loop {
            pending.retain(|&i| {
                let instance = &mut self.instances[i];
                instance.observe(self.process.status(instance.id()));
                instance.is_alive()
            });
            if pending.is_empty() || Instant::now() >= deadline || self.cancel_token.is_cancelled() {
                break;
            }

            self.request_shutdowns(&pending, &mut requested, deadline).await;

            let nap = interval.min(deadline.saturating_duration_since(Instant::now()));
            if !self.cancel_token.sleep(nap).await {
                break;
            }
        }
        if self.cancel_token.is_cancelled() {
            warn!("cleanup wait cancelled");
        }

        let clean = pending.is_empty();
        let mut killed = Vec::with_capacity(pending.len());
        for i in pending {
            let instance = &mut self.instances[i];
            warn!(id = %instance.id(), role = %instance.role(), "instance did not shut down, killing");
            if let Err(e) = self.process.kill(instance.id()) {
                warn!(id = %instance.id(), error = %e, "kill failed");
            }
            instance.mark_killed();
            killed.push(instance.id());
        }

        if clean {
            if self.root_dir.exists() {
                fs::remove_dir_all(&self.root_dir)?;
            }
            info!(root_dir = %self.root_dir.display(), "cluster shut down cleanly");
        } else {
            warn!(
                root_dir = %self.root_dir.display(),
                killed = killed.len(),
                "unclean shutdown, keeping working directory"
            );
        }

        Ok(CleanupReport { clean, killed })
    }

    /// Stops the agency from starting failed-server jobs during teardown.
    async fn enable_maintenance(&mut self, coordinator_url: &str, deadline: Instant) {
        let url = format!("{coordinator_url}/_admin/cluster/maintenance");
        info!(%url, "enabling maintenance mode");
        let request = self.http.put(&url, "\"on\"", Some(self.authorization.as_str()));
        match self.cancel_token.run_until(request, Some(deadline)).await {
            Some(Ok(response)) if response.code == 200 => {}
            Some(Ok(response)) => warn!(%url, code = response.code, "maintenance mode refused"),
            Some(Err(e)) => warn!(%url, error = %e, "maintenance request failed"),
            None => warn!(%url, "maintenance request abandoned"),
        }
    }

    /// Asks each pending instance not yet asked to shut down. Agents are
    /// held back while any other role is pending.
    async fn request_shutdowns(&mut self, pending: &[usize], requested: &mut [bool], deadline: Instant) {
        let hold_agents = pending.iter().any(|&i| self.instances[i].role() != Role::Agent);
        let mut targets: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|&i| !requested[i])
            .filter(|&i| !(hold_agents && self.instances[i].role() == Role::Agent))
            .collect();
        targets.sort_by_key(|&i| shutdown_rank(self.instances[i].role()));

        for i in targets {
            requested[i] = true;
            let url = format!("{}/_admin/shutdown", self.instances[i].url());
            self.send_shutdown(&url, deadline).await;
        }
    }

    /// Best effort; returns whether the request was answered.
    async fn send_shutdown(&mut self, url: &str, deadline: Instant) -> bool {
        info!(%url, "requesting shutdown");
        let request = self.http.delete(url, Some(self.authorization.as_str()));
        match self.cancel_token.run_until(request, Some(deadline)).await {
            Some(Ok(_)) => true,
            Some(Err(e)) => {
                warn!(%url, error = %e, "shutdown request failed");
                false
            }
            None => {
                warn!(%url, "shutdown request abandoned");
                false
            }
        }
    }
}

fn shutdown_rank(role: Role) -> u8 {
    match role {
        Role::Coordinator => 0,
        Role::DbServer => 1,
        Role::Agent => 2,
    }
}
