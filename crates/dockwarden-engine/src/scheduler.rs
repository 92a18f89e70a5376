//! Scheduler: drives a scan at a configured interval, classifies every candidate
//! against policy, and either applies an update directly or queues it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{error, info, instrument, warn};

use dockwarden_core::error::Result as CoreResult;
use dockwarden_core::events::{Event, EventBus, EventKind};
use dockwarden_core::store::Store;
use dockwarden_docker::{ContainerEngine, ContainerRef, RegistryAuth};
use dockwarden_registry::{compare, CompareResult, RegistryClient, RegistryCredential, UpdateKind};

use crate::depgraph::DependencyGraph;
use crate::error::EngineCrateError;
use crate::policy::{ignored_versions, policy_for, MaintenanceWindow, Policy};
use crate::queue::{PendingUpdate, Queue};
use crate::updater::{Outcome, UpdateRecord, UpdateSpec, Updater};

/// A container discovered during a scan, tagged with the host it was found on.
/// `host_id = "local"` identifies the scheduler's own machine; any other value
/// identifies a connected cluster agent.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub host_id: String,
    pub host_name: String,
    pub container: ContainerRef,
}

/// Supplies containers discovered on connected cluster agents (and optionally
/// Portainer-managed endpoints). The engine crate doesn't depend on the cluster
/// transport; this narrow trait is the only seam between them.
#[async_trait]
pub trait RemoteContainerSource: Send + Sync {
    async fn list_remote_containers(&self) -> Vec<Candidate>;
}

/// A source with nothing to report — used when cluster mode is disabled.
pub struct NoRemoteSources;

#[async_trait]
impl RemoteContainerSource for NoRemoteSources {
    async fn list_remote_containers(&self) -> Vec<Candidate> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub candidates: usize,
    pub updates_applied: usize,
    pub updates_queued: usize,
    pub errors: usize,
}

pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub stop_grace: Duration,
    pub maintenance_window: MaintenanceWindow,
    pub credentials: Vec<RegistryCredential>,
    pub max_concurrent: u32,
}

/// Drives periodic scans. Only one scan runs at a time; the orchestration loop
/// is cooperative and single-threaded even though individual updates within a
/// scan fan out under the updater's own concurrency cap.
pub struct Scheduler<S, E> {
    store: Arc<S>,
    engine: Arc<E>,
    registry: RegistryClient,
    events: EventBus,
    remote: Arc<dyn RemoteContainerSource>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
    ready: watch::Receiver<bool>,
    scanning: AtomicBool,
}

impl<S: Store + 'static, E: ContainerEngine + 'static> Scheduler<S, E> {
    pub fn new(
        store: Arc<S>,
        engine: Arc<E>,
        events: EventBus,
        remote: Arc<dyn RemoteContainerSource>,
        config: SchedulerConfig,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            engine,
            registry: RegistryClient::new(),
            events,
            remote,
            config,
            shutdown: Arc::new(Notify::new()),
            ready,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the tick loop until shutdown is signalled.
    pub async fn run(&mut self) {
        info!(
            interval_secs = self.config.scan_interval.as_secs(),
            "scheduler started"
        );
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.scan_interval) => {
                    self.wait_for_readiness().await;
                    let summary = self.tick().await;
                    info!(
                        candidates = summary.candidates,
                        applied = summary.updates_applied,
                        queued = summary.updates_queued,
                        errors = summary.errors,
                        "scan_complete"
                    );
                }
            }
        }
        info!("scheduler stopped");
    }

    async fn wait_for_readiness(&mut self) {
        while !*self.ready.borrow() {
            if self.ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run exactly one scan. Exposed separately from `run` so tests (and a
    /// manual "scan now" admin action) can drive a single tick deterministically.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> ScanSummary {
        if self.scanning.swap(true, Ordering::SeqCst) {
            warn!("scan already in progress, skipping overlapping tick");
            return ScanSummary::default();
        }
        let summary = self.tick_inner().await;
        self.scanning.store(false, Ordering::SeqCst);
        summary
    }

    async fn tick_inner(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();
        let candidates = self.enumerate_candidates().await;
        summary.candidates = candidates.len();

        let queue = Queue::new(self.store.clone(), self.events.clone());
        let now = chrono::Utc::now();
        let mut auto_batch: Vec<(Candidate, UpdateKind)> = Vec::new();

        for candidate in &candidates {
            match policy_for(&*self.store, &candidate.container.name).await {
                Ok(Policy::Pinned) => continue,
                Ok(policy) => {
                    match self.evaluate(candidate, &now).await {
                        Ok(Some(kind)) => {
                            if policy == Policy::Auto && self.config.maintenance_window.contains(now)
                            {
                                auto_batch.push((candidate.clone(), kind));
                            } else {
                                self.enqueue(&queue, candidate, &kind, now).await;
                                summary.updates_queued += 1;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(container = %candidate.container.name, error = %e, "comparator failed");
                            summary.errors += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(container = %candidate.container.name, error = %e, "policy lookup failed");
                    summary.errors += 1;
                }
            }
        }

        // Queued updates an operator has approved are applied on the next tick
        // even if their policy isn't Auto or the maintenance window is closed;
        // approval is an explicit one-time override of both.
        let mut approved_keys: Vec<(String, String)> = Vec::new();
        match queue.list().await {
            Ok(items) => {
                for item in items.into_iter().filter(|i| i.approved) {
                    let Some(kind) = item.to_update_kind() else { continue };
                    let candidate = Candidate {
                        host_id: item.host_id.clone(),
                        host_name: item.host_name.clone(),
                        container: ContainerRef {
                            id: item.container_name.clone(),
                            name: item.container_name.clone(),
                            image_reference: item.current_image.clone(),
                            image_digest: Some(item.current_digest.clone()),
                            labels: Default::default(),
                            network_mode: String::new(),
                            running: true,
                        },
                    };
                    approved_keys.push((item.host_id.clone(), item.container_name.clone()));
                    auto_batch.push((candidate, kind));
                }
            }
            Err(e) => {
                error!(error = %e, "failed to load queue for approved updates");
                summary.errors += 1;
            }
        }

        if !auto_batch.is_empty() {
            match self.apply_batch(auto_batch).await {
                Ok(records) => {
                    summary.updates_applied =
                        records.iter().filter(|r| matches!(r.outcome, Outcome::Success)).count();
                    for record in &records {
                        let key = (record.host_id.clone(), record.container.clone());
                        if approved_keys.contains(&key) && matches!(record.outcome, Outcome::Success) {
                            if let Err(e) = queue.remove(&record.host_id, &record.container).await {
                                error!(container = %record.container, error = %e, "failed to remove applied update from queue");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "auto-update batch aborted");
                    summary.errors += 1;
                }
            }
        }

        self.events
            .publish(Event::new(EventKind::ScanComplete, now).with_message(format!(
                "candidates={} applied={} queued={} errors={}",
                summary.candidates, summary.updates_applied, summary.updates_queued, summary.errors
            )))
            .await;

        summary
    }

    async fn enumerate_candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        match self.engine.list_running().await {
            Ok(containers) => {
                for container in containers {
                    candidates.push(Candidate {
                        host_id: "local".to_string(),
                        host_name: "local".to_string(),
                        container,
                    });
                }
            }
            Err(e) => error!(error = %e, "failed to list local containers"),
        }
        candidates.extend(self.remote.list_remote_containers().await);
        candidates
    }

    async fn evaluate(
        &self,
        candidate: &Candidate,
        now: &chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<Option<UpdateKind>> {
        let ignored = ignored_versions(&*self.store, &candidate.container.name).await?;
        let current_digest = candidate.container.image_digest.clone().unwrap_or_default();

        let credential = dockwarden_registry::select_credential(
            &dockwarden_registry::parse_image_reference(&candidate.container.image_reference)
                .registry,
            &self.config.credentials,
        );

        match compare(
            &self.registry,
            &candidate.container.image_reference,
            &current_digest,
            credential,
        )
        .await
        {
            Ok(CompareResult::NoUpdate) => Ok(None),
            Ok(CompareResult::UpdateAvailable(kind)) => {
                if let UpdateKind::NewerVersion { newer_versions, .. } = &kind {
                    if newer_versions.iter().all(|v| ignored.contains(v)) {
                        return Ok(None);
                    }
                }
                let _ = now;
                Ok(Some(kind))
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue(
        &self,
        queue: &Queue<S>,
        candidate: &Candidate,
        kind: &UpdateKind,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let pending = PendingUpdate::from_compare(
            &candidate.host_id,
            &candidate.host_name,
            &candidate.container.name,
            &candidate.container.image_reference,
            &candidate.container.image_digest.clone().unwrap_or_default(),
            kind,
            now,
        );
        if let Err(e) = queue.add(pending).await {
            error!(container = %candidate.container.name, error = %e, "failed to enqueue pending update");
            return;
        }
        self.events
            .publish(
                Event::new(EventKind::ContainerUpdate, now)
                    .with_container(candidate.container.name.clone())
                    .with_host(candidate.host_name.clone())
                    .with_message("update queued"),
            )
            .await;
    }

    /// Apply every auto-eligible update in dependency order (stop order: leaves
    /// before the things that depend on them). A dependency cycle aborts the
    /// whole batch rather than applying a partial, arbitrarily-ordered subset:
    /// there's no safe stop order to follow once the graph isn't a DAG.
    async fn apply_batch(
        &self,
        batch: Vec<(Candidate, UpdateKind)>,
    ) -> crate::error::Result<Vec<UpdateRecord>> {
        let containers: Vec<ContainerRef> = batch.iter().map(|(c, _)| c.container.clone()).collect();
        let graph = DependencyGraph::from_containers(&containers);
        let order = match graph.stop_order() {
            Ok(order) => order,
            Err((_partial, cycle)) => {
                return Err(EngineCrateError::Cycle(cycle.cycle_members));
            }
        };

        let by_name: std::collections::HashMap<String, (Candidate, UpdateKind)> = batch
            .into_iter()
            .map(|(c, k)| (c.container.name.clone(), (c, k)))
            .collect();

        let updater = Updater::new(self.store.clone(), self.engine.clone(), self.events.clone());
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            (self.config.max_concurrent.max(1)) as usize,
        ));

        let mut records = Vec::with_capacity(by_name.len());
        for name in order {
            let Some((candidate, kind)) = by_name.get(&name) else {
                continue;
            };
            let _permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let spec = self.build_spec(candidate, kind);
            records.push(updater.apply(&spec).await);
        }
        Ok(records)
    }

    fn build_spec(&self, candidate: &Candidate, kind: &UpdateKind) -> UpdateSpec {
        let mut spec = UpdateSpec::new(candidate.container.name.clone(), candidate.host_id.clone());
        spec.current_image = candidate.container.image_reference.clone();
        spec.current_digest = candidate.container.image_digest.clone().unwrap_or_default();
        spec.stop_grace = self.config.stop_grace;

        match kind {
            UpdateKind::DigestOnly { new_digest } => {
                spec.target_image = candidate.container.image_reference.clone();
                spec.target_digest = Some(new_digest.clone());
            }
            UpdateKind::NewerVersion { newer_versions, .. } => {
                let target_tag = newer_versions.first().cloned().unwrap_or_default();
                let reference = dockwarden_registry::parse_image_reference(
                    &candidate.container.image_reference,
                );
                spec.target_image = format!("{}/{}:{}", reference.registry, reference.repository, target_tag);
            }
        }

        let credential = dockwarden_registry::select_credential(
            &dockwarden_registry::parse_image_reference(&candidate.container.image_reference)
                .registry,
            &self.config.credentials,
        );
        spec.registry_auth = credential.map(|c| RegistryAuth {
            username: c.username.clone(),
            password: c.secret.clone(),
            server_address: c.host_pattern.clone(),
        });

        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwarden_core::store::SqlitePersistence;
    use dockwarden_docker::{EngineError, ExecOutput, RecreateSpec};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn no_remote_sources_reports_empty() {
        let source = NoRemoteSources;
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = rt.block_on(source.list_remote_containers());
        assert!(result.is_empty());
    }

    struct FakeEngine;

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn list_running(&self) -> dockwarden_docker::Result<Vec<ContainerRef>> {
            Ok(Vec::new())
        }
        async fn list_all(&self) -> dockwarden_docker::Result<Vec<ContainerRef>> {
            Ok(Vec::new())
        }
        async fn inspect(&self, _: &str) -> dockwarden_docker::Result<serde_json::Value> {
            Ok(json!({}))
        }
        async fn stop(&self, _: &str, _: Duration) -> dockwarden_docker::Result<()> {
            Ok(())
        }
        async fn start(&self, _: &str) -> dockwarden_docker::Result<()> {
            Ok(())
        }
        async fn pull(&self, _: &str, _: Option<RegistryAuth>) -> dockwarden_docker::Result<()> {
            Ok(())
        }
        async fn create(&self, _: &RecreateSpec) -> dockwarden_docker::Result<String> {
            Ok("id".into())
        }
        async fn rename(&self, _: &str, _: &str) -> dockwarden_docker::Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &str, _: bool) -> dockwarden_docker::Result<()> {
            Ok(())
        }
        async fn exec(
            &self,
            _: &str,
            _: &[String],
            _: Duration,
        ) -> dockwarden_docker::Result<ExecOutput> {
            Err(EngineError::Other("not used in this test".into()))
        }
    }

    fn container(name: &str, depends_on: &str) -> ContainerRef {
        let mut labels = HashMap::new();
        if !depends_on.is_empty() {
            labels.insert("dockwarden.depends-on".to_string(), depends_on.to_string());
        }
        ContainerRef {
            id: name.to_string(),
            name: name.to_string(),
            image_reference: "nginx:1.25".to_string(),
            image_digest: Some("sha256:aaa".to_string()),
            labels,
            network_mode: "bridge".to_string(),
            running: true,
        }
    }

    async fn test_scheduler() -> Scheduler<SqlitePersistence, FakeEngine> {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let engine = Arc::new(FakeEngine);
        let events = EventBus::new(8);
        let remote = Arc::new(NoRemoteSources);
        let (_tx, rx) = watch::channel(true);
        let config = SchedulerConfig {
            scan_interval: Duration::from_secs(300),
            stop_grace: Duration::from_secs(10),
            maintenance_window: MaintenanceWindow::always_open(),
            credentials: Vec::new(),
            max_concurrent: 3,
        };
        Scheduler::new(store, engine, events, remote, config, rx)
    }

    #[tokio::test]
    async fn apply_batch_aborts_whole_batch_on_dependency_cycle() {
        let scheduler = test_scheduler().await;
        // "a" depends on "b" and "b" depends on "a": no valid stop order exists.
        let a = container("a", "b");
        let b = container("b", "a");
        let kind = UpdateKind::DigestOnly { new_digest: "sha256:bbb".to_string() };
        let batch = vec![
            (Candidate { host_id: "local".into(), host_name: "local".into(), container: a }, kind.clone()),
            (Candidate { host_id: "local".into(), host_name: "local".into(), container: b }, kind),
        ];

        let result = scheduler.apply_batch(batch).await;
        assert!(matches!(result, Err(EngineCrateError::Cycle(_))));
    }

    #[tokio::test]
    async fn apply_batch_applies_in_dependency_order() {
        let scheduler = test_scheduler().await;
        // "web" depends on "db": db must apply before web in the returned records.
        let web = container("web", "db");
        let db = container("db", "");
        let kind = UpdateKind::DigestOnly { new_digest: "sha256:bbb".to_string() };
        let batch = vec![
            (Candidate { host_id: "local".into(), host_name: "local".into(), container: web }, kind.clone()),
            (Candidate { host_id: "local".into(), host_name: "local".into(), container: db }, kind),
        ];

        let records = scheduler.apply_batch(batch).await.unwrap();
        let positions: Vec<&str> = records.iter().map(|r| r.container.as_str()).collect();
        let db_pos = positions.iter().position(|&n| n == "db").unwrap();
        let web_pos = positions.iter().position(|&n| n == "web").unwrap();
        assert!(db_pos < web_pos);
    }
}
