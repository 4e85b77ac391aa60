//! End-to-end lifecycle tests against real OS processes.
//!
//! `sh -c "exec sleep …"` stands in for the server binary: it ignores every
//! generated flag and stays alive until killed. HTTP is stubbed, since no
//! real server answers the probe or the shutdown request.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_harness::{
    ArgMap, ClusterManager, ClusterOptions, Error, ExitStatus, HttpClient, HttpResponse,
    LocalPortAllocator, LocalProcessControl, ProcessControl, ProcessState, Role,
};
use tempfile::TempDir;

/// Answers every request with 200 but never actually shuts anything down.
struct AlwaysReady;

#[async_trait]
impl HttpClient for AlwaysReady {
    async fn get(&self, _url: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Ok(HttpResponse {
            code: 200,
            body: "{\"server\":\"stub\"}".to_string(),
        })
    }

    async fn delete(&self, _url: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Ok(HttpResponse {
            code: 200,
            body: String::new(),
        })
    }

    async fn put(&self, _url: &str, _body: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Ok(HttpResponse {
            code: 200,
            body: String::new(),
        })
    }
}

/// Refuses every connection.
struct Unreachable;

#[async_trait]
impl HttpClient for Unreachable {
    async fn get(&self, _url: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Err(Error::Http("connection refused".to_string()))
    }

    async fn delete(&self, _url: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Err(Error::Http("connection refused".to_string()))
    }

    async fn put(&self, _url: &str, _body: &str, _authorization: Option<&str>) -> cluster_harness::Result<HttpResponse> {
        Err(Error::Http("connection refused".to_string()))
    }
}

fn options(temp: &TempDir, script: &str) -> ClusterOptions {
    ClusterOptions {
        binary: "sh".into(),
        binary_args: vec!["-c".to_string(), script.to_string()],
        root_dir: Some(temp.path().join("cluster")),
        min_port: 20000,
        max_port: 40000,
        poll_interval_ms: 20,
        liveness_check_every: 2,
        shutdown_timeout_secs: 1,
        ..ClusterOptions::default()
    }
}

fn manager(
    options: ClusterOptions,
    http: Arc<dyn HttpClient>,
) -> (ClusterManager, Arc<LocalProcessControl>) {
    let process = Arc::new(LocalProcessControl::new());
    let ports = Arc::new(LocalPortAllocator::new(options.min_port));
    let manager =
        ClusterManager::with_collaborators(options, process.clone(), ports, http).unwrap();
    (manager, process)
}

async fn wait_until_exited(process: &LocalProcessControl, manager: &ClusterManager) {
    for _ in 0..100 {
        let all_gone = manager
            .instances()
            .iter()
            .all(|i| process.status(i.id()) != ProcessState::Running);
        if all_gone {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("processes still running after kill");
}

#[tokio::test]
async fn test_full_cluster_lifecycle() {
    let temp = TempDir::new().unwrap();
    let (mut cluster, process) = manager(options(&temp, "exec sleep 600"), Arc::new(AlwaysReady));

    let endpoint = cluster.start_cluster(3, 2, 2).await.unwrap();

    assert_eq!(cluster.agents().len(), 3);
    assert_eq!(cluster.coordinators().len(), 2);
    assert_eq!(cluster.db_servers().len(), 2);

    let port = endpoint
        .strip_prefix("tcp://127.0.0.1:")
        .expect("endpoint is tcp://127.0.0.1:<port>");
    assert!(port.parse::<u16>().is_ok());
    assert_eq!(cluster.get_endpoint().unwrap(), endpoint);

    let mut endpoints: Vec<&str> = cluster.instances().iter().map(|i| i.endpoint()).collect();
    endpoints.sort_unstable();
    endpoints.dedup();
    assert_eq!(endpoints.len(), 7, "every instance has its own endpoint");

    for instance in cluster.instances() {
        assert!(instance.work_dir().join("server.log").exists());
        assert!(instance.work_dir().join("data").is_dir());
    }
    cluster.check().unwrap();

    // The stub ignores the shutdown request, so cleanup has to force-kill.
    let report = cluster.cleanup().await.unwrap();
    assert!(!report.clean);
    assert_eq!(report.killed.len(), 7);
    assert!(temp.path().join("cluster").exists());
    assert!(
        cluster
            .instances()
            .iter()
            .all(|i| i.exit_status() == Some(ExitStatus::Killed))
    );

    wait_until_exited(&process, &cluster).await;
}

#[tokio::test]
async fn test_process_dying_during_startup_is_fatal() {
    let temp = TempDir::new().unwrap();
    let (mut cluster, _process) = manager(options(&temp, "exit 7"), Arc::new(Unreachable));

    let result = cluster.start_cluster(1, 0, 0).await;
    let agent = cluster.agents()[0].id();
    assert!(matches!(result, Err(Error::InstanceDead { id, .. }) if id == agent));
    assert_eq!(
        cluster.agents()[0].exit_status(),
        Some(ExitStatus::Exited {
            code: Some(7),
            signal: None
        })
    );

    // Nothing is left running, so cleanup is clean and removes the tree.
    let report = cluster.cleanup().await.unwrap();
    assert!(report.clean);
    assert!(!temp.path().join("cluster").exists());
}

#[tokio::test]
async fn test_kill_check_restart() {
    let temp = TempDir::new().unwrap();
    let (mut cluster, process) = manager(options(&temp, "exec sleep 600"), Arc::new(AlwaysReady));
    cluster.start_cluster(1, 1, 0).await.unwrap();

    let coordinator = cluster.coordinators()[0].clone();
    cluster.kill(coordinator.id()).unwrap();

    match cluster.check() {
        Err(Error::Unhealthy(list)) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].role, Role::Coordinator);
            assert_eq!(list[0].status, Some(ExitStatus::Killed));
        }
        other => panic!("expected Unhealthy, got {other:?}"),
    }
    assert!(matches!(cluster.get_endpoint(), Err(Error::NoCoordinator)));

    let new_id = cluster.restart(coordinator.id()).unwrap();
    assert_ne!(new_id, coordinator.id());
    assert_eq!(cluster.coordinators()[0].endpoint(), coordinator.endpoint());
    cluster.check().unwrap();

    // A coordinator added later registers with the same agency.
    let extra = cluster.start_coordinator(&ArgMap::new()).unwrap();
    assert_eq!(
        extra.args().get("cluster.agency-endpoint"),
        Some(cluster.agents()[0].endpoint())
    );

    cluster.cleanup().await.unwrap();
    wait_until_exited(&process, &cluster).await;
}
