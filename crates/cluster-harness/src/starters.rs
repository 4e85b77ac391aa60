//! Role starters: compute role flags, allocate endpoints and spawn.

use std::path::Path;

use tracing::info;

use crate::instance::{Instance, Role};
use crate::ports::PortAllocator;
use crate::process::{ProcessControl, SpawnRequest};
use crate::topology::{ArgMap, WorkDirNamer, build_role_args};
use crate::{ClusterOptions, Error, Result};

/// Borrowed manager state a starter works against.
pub(crate) struct StartContext<'a> {
    pub options: &'a ClusterOptions,
    pub root_dir: &'a Path,
    pub process: &'a dyn ProcessControl,
    pub ports: &'a dyn PortAllocator,
}

impl StartContext<'_> {
    fn spawn(&self, role: Role, endpoint: String, work_dir: &Path, args: ArgMap) -> Result<Instance> {
        let request = SpawnRequest {
            role,
            binary: self.options.binary.clone(),
            binary_args: self.options.binary_args.clone(),
            args,
            work_dir: work_dir.to_path_buf(),
        };
        let id = self.process.spawn(&request)?;
        info!(%id, %role, %endpoint, "started instance");

        Ok(Instance::new(
            id,
            role,
            endpoint,
            request.work_dir,
            request.args,
        ))
    }
}

/// Starts an agency of `size` agents and appends them to `instances`.
///
/// Every port is allocated before the first spawn, so an exhausted range
/// fails the whole agency instead of leaving it short of members. Only the
/// last agent learns the full membership: it gets `--agency.endpoint` for
/// every earlier agent and for itself, then `--agency.notify true`.
pub(crate) fn start_agency(
    ctx: &StartContext<'_>,
    instances: &mut Vec<Instance>,
    size: usize,
    wait_for_sync: bool,
) -> Result<Vec<Instance>> {
    if size == 0 {
        return Err(Error::Config("agency size must be >= 1".to_string()));
    }

    let endpoints = (0..size)
        .map(|_| ctx.ports.allocate(ctx.options.max_port).map(|port| ctx.options.endpoint_for(port)))
        .collect::<Result<Vec<_>>>()?;

    let mut started: Vec<Instance> = Vec::with_capacity(size);
    for (i, endpoint) in endpoints.iter().enumerate() {
        let mut overrides = ArgMap::from(&ctx.options.agents.extra_args);
        overrides
            .set("agency.activate", true)
            .set("agency.id", i)
            .set("agency.size", size)
            .set("agency.pool-size", size)
            .set("agency.wait-for-sync", wait_for_sync)
            .set("agency.supervision", ctx.options.agency_supervision)
            .set("agency.supervision-grace-period", "10.0")
            .set("agency.supervision-frequency", "1.0")
            .set("agency.my-address", endpoint)
            .set("server.endpoint", endpoint);

        if i == size - 1 {
            for peer in &started {
                overrides.push_flag("--agency.endpoint", peer.endpoint());
            }
            overrides
                .push_flag("--agency.endpoint", endpoint.as_str())
                .push_flag("--agency.notify", "true");
        }

        let (args, work_dir) =
            build_role_args(&format!("agency-{i}"), ctx.root_dir, ctx.options, &overrides)?;
        let instance = ctx.spawn(Role::Agent, endpoint.clone(), &work_dir, args)?;

        instances.push(instance.clone());
        started.push(instance);
    }

    info!(size, endpoint = %endpoints[size - 1], "agency started");
    Ok(started)
}

/// Starts one coordinator or db-server registered against `agency_endpoint`.
pub(crate) fn start_server(
    ctx: &StartContext<'_>,
    instances: &mut Vec<Instance>,
    namer: &mut WorkDirNamer,
    role: Role,
    agency_endpoint: &str,
    extra: &ArgMap,
) -> Result<Instance> {
    let Some(cluster_role) = role.cluster_role() else {
        return Err(Error::Config(format!("{role} is not a server role")));
    };
    let role_options = match role {
        Role::Coordinator => &ctx.options.coordinators,
        _ => &ctx.options.dbservers,
    };

    let port = ctx.ports.allocate(ctx.options.max_port)?;
    let endpoint = ctx.options.endpoint_for(port);

    let mut overrides = ArgMap::from(&role_options.extra_args);
    overrides.merge(extra);
    overrides
        .set("server.endpoint", &endpoint)
        .set("cluster.my-address", &endpoint)
        .set("cluster.my-local-info", &endpoint)
        .set("cluster.my-role", cluster_role)
        .set("cluster.agency-endpoint", agency_endpoint);

    let (args, work_dir) =
        build_role_args(&namer.next_name(role), ctx.root_dir, ctx.options, &overrides)?;
    let instance = ctx.spawn(role, endpoint, &work_dir, args)?;

    instances.push(instance.clone());
    Ok(instance)
}

/// Endpoint of the first agent not observed dead.
pub(crate) fn agency_endpoint(instances: &[Instance]) -> Result<String> {
    let mut agents = instances.iter().filter(|i| i.role() == Role::Agent).peekable();
    if agents.peek().is_none() {
        return Err(Error::NoAgency);
    }
    agents
        .find(|agent| agent.is_alive())
        .map(|agent| agent.endpoint().to_string())
        .ok_or(Error::NoLiveAgent)
}
