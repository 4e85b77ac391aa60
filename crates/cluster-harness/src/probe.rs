//! Readiness probing of freshly spawned instances.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::http::HttpClient;
use crate::instance::{ExitStatus, Instance, Role};
use crate::process::{ProcessControl, ProcessState};
use crate::{ClusterOptions, Error, Result};

/// Polls `GET <url>/_api/version` until every instance answers 200.
pub(crate) struct ReadinessProber<'a> {
    http: &'a dyn HttpClient,
    process: &'a dyn ProcessControl,
    authorization: Option<&'a str>,
    poll_interval: Duration,
    liveness_check_every: u32,
}

impl<'a> ReadinessProber<'a> {
    pub fn new(
        http: &'a dyn HttpClient,
        process: &'a dyn ProcessControl,
        authorization: Option<&'a str>,
        options: &ClusterOptions,
    ) -> Self {
        Self {
            http,
            process,
            authorization,
            poll_interval: options.poll_interval(),
            liveness_check_every: options.liveness_check_every.max(1),
        }
    }

    /// Waits for each instance in turn and returns the endpoint of the first
    /// running coordinator, if there is one.
    ///
    /// Without `timeout` this only gives up when a process is found dead or
    /// the token is cancelled.
    pub async fn wait_for_all(
        &self,
        instances: &mut [Instance],
        cancel: &mut CancelToken,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_sequentially(instances, cancel))
                .await
                .map_err(|_| Error::ProbeTimeout(limit))?,
            None => self.wait_sequentially(instances, cancel).await,
        }
    }

    async fn wait_sequentially(
        &self,
        instances: &mut [Instance],
        cancel: &mut CancelToken,
    ) -> Result<Option<String>> {
        for instance in instances.iter_mut() {
            self.wait_for_instance(instance, cancel).await?;
        }

        Ok(instances
            .iter()
            .find(|i| i.role() == Role::Coordinator && i.exit_status() == Some(ExitStatus::Running))
            .map(|i| i.endpoint().to_string()))
    }

    /// Polls one instance until it answers 200.
    ///
    /// Every `liveness_check_every` failed attempts the process itself is
    /// checked; a dead process is fatal. On success the process is sampled
    /// once more, so a ready instance is always recorded as running.
    pub async fn wait_for_instance(&self, instance: &mut Instance, cancel: &mut CancelToken) -> Result<()> {
        let url = format!("{}/_api/version", instance.url());
        let mut attempts: u32 = 0;

        loop {
            match cancel.run_until(self.http.get(&url, self.authorization), None).await {
                None => return Err(Error::Cancelled),
                Some(Ok(response)) if response.code == 200 => break,
                Some(Ok(response)) => debug!(id = %instance.id(), code = response.code, "not ready yet"),
                Some(Err(e)) => debug!(id = %instance.id(), error = %e, "not reachable yet"),
            }

            attempts += 1;
            if attempts % self.liveness_check_every == 0 {
                self.ensure_alive(instance)?;
                warn!(
                    id = %instance.id(),
                    role = %instance.role(),
                    attempts,
                    "instance alive but still not answering"
                );
            }

            if !cancel.sleep(self.poll_interval).await {
                return Err(Error::Cancelled);
            }
        }

        self.ensure_alive(instance)?;
        info!(id = %instance.id(), role = %instance.role(), endpoint = %instance.endpoint(), "instance ready");
        Ok(())
    }

    fn ensure_alive(&self, instance: &mut Instance) -> Result<()> {
        let state = self.process.status(instance.id());
        instance.observe(state);
        if state == ProcessState::Running {
            return Ok(());
        }

        error!(id = %instance.id(), role = %instance.role(), ?state, "instance died during startup");
        Err(Error::InstanceDead {
            id: instance.id(),
            state: format!("{instance:?}"),
        })
    }
}
