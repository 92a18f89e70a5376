//! Single-container updater: snapshot, hooks, pull, stop, recreate, cleanup, with
//! rollback on any failure from the stop step onward.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use dockwarden_core::events::{Event, EventBus, EventKind};
use dockwarden_core::store::{buckets, Store, StoreExt};
use dockwarden_docker::{ContainerEngine, RecreateSpec, RegistryAuth};

use crate::error::{EngineCrateError, Result};
use crate::hooks::{run_hooks, Hook, HookPhase};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
const RENAME_SUFFIX: &str = "-dockwarden-old";

/// Outcome recorded for a single update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Rollback,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    pub container: String,
    pub old_image: String,
    pub new_image: String,
    pub old_digest: String,
    pub new_digest: Option<String>,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub host_id: String,
}

#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub container_name: String,
    pub host_id: String,
    pub current_image: String,
    pub current_digest: String,
    pub target_image: String,
    pub target_digest: Option<String>,
    pub registry_auth: Option<RegistryAuth>,
    pub stop_grace: Duration,
    pub pre_hooks: Vec<Hook>,
    pub post_hooks: Vec<Hook>,
    pub remove_old_image: bool,
}

impl UpdateSpec {
    pub fn new(container_name: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            host_id: host_id.into(),
            current_image: String::new(),
            current_digest: String::new(),
            target_image: String::new(),
            target_digest: None,
            registry_auth: None,
            stop_grace: DEFAULT_STOP_GRACE,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            remove_old_image: false,
        }
    }
}

/// Drives the 7-step update sequence for one container at a time. Hold one
/// instance per fleet; concurrency across containers is the caller's job (the
/// scheduler enforces the fleet-wide concurrency cap and per-container mutual
/// exclusion).
pub struct Updater<S, E> {
    store: Arc<S>,
    engine: Arc<E>,
    events: EventBus,
}

impl<S: Store, E: ContainerEngine> Updater<S, E> {
    pub fn new(store: Arc<S>, engine: Arc<E>, events: EventBus) -> Self {
        Self {
            store,
            engine,
            events,
        }
    }

    #[instrument(skip(self, spec), fields(container = %spec.container_name, host = %spec.host_id))]
    pub async fn apply(&self, spec: &UpdateSpec) -> UpdateRecord {
        let started = Utc::now();
        let result = self.apply_inner(spec).await;
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        let (outcome, error) = match &result {
            Ok(()) => (Outcome::Success, None),
            Err(EngineCrateError::HookSkip { .. }) => (Outcome::Skipped, None),
            Err(EngineCrateError::RolledBack(msg)) => (Outcome::Rollback, Some(msg.clone())),
            Err(EngineCrateError::RollbackFailed(msg)) => (Outcome::Failed, Some(msg.clone())),
            Err(e) => (Outcome::Failed, Some(e.to_string())),
        };

        let record = UpdateRecord {
            timestamp: started,
            container: spec.container_name.clone(),
            old_image: spec.current_image.clone(),
            new_image: spec.target_image.clone(),
            old_digest: spec.current_digest.clone(),
            new_digest: spec.target_digest.clone(),
            outcome,
            duration_ms,
            error,
            host_id: spec.host_id.clone(),
        };

        if let Err(e) = self.store.append(buckets::HISTORY, &record).await {
            error!(container = %spec.container_name, error = %e, "failed to persist update record");
        }

        self.events
            .publish(
                Event::new(EventKind::ContainerUpdate, Utc::now())
                    .with_container(spec.container_name.clone())
                    .with_host(spec.host_id.clone())
                    .with_message(format!("{:?}", record.outcome)),
            )
            .await;

        record
    }

    async fn apply_inner(&self, spec: &UpdateSpec) -> Result<()> {
        // Step 1: snapshot.
        let snapshot = self
            .engine
            .inspect(&spec.container_name)
            .await
            .map_err(EngineCrateError::Container)?;
        let snapshot_key = self.persist_snapshot(spec, &snapshot).await?;

        // Step 2: pre-update hooks. Exit 75 -> clean skip, no state change.
        if let Err(e) = run_hooks(
            self.engine.as_ref(),
            &spec.container_name,
            HookPhase::PreUpdate,
            &spec.pre_hooks,
        )
        .await
        {
            return Err(e);
        }

        // Step 3: pull target image.
        self.engine
            .pull(&spec.target_image, spec.registry_auth.clone())
            .await
            .map_err(EngineCrateError::Container)?;

        // From here on, a failure triggers rollback from the snapshot.
        if let Err(e) = self.recreate(spec, &snapshot).await {
            warn!(container = %spec.container_name, error = %e, "update failed past stop step, rolling back");
            return self.rollback(spec, &snapshot, e).await;
        }

        // Step 6: post-update hooks. Any non-zero triggers rollback too.
        if let Err(e) = run_hooks(
            self.engine.as_ref(),
            &spec.container_name,
            HookPhase::PostUpdate,
            &spec.post_hooks,
        )
        .await
        {
            warn!(container = %spec.container_name, error = %e, "post-update hook failed, rolling back");
            return self.rollback(spec, &snapshot, e).await;
        }

        // Step 7: cleanup (best-effort, never fails the update).
        if spec.remove_old_image {
            let old_name = format!("{}{}", spec.container_name, RENAME_SUFFIX);
            if let Err(e) = self.engine.remove(&old_name, true).await {
                warn!(container = %spec.container_name, error = %e, "cleanup of renamed old container failed");
            }
        }

        let _ = snapshot_key;
        Ok(())
    }

    /// Step 4+5: stop the running container, rename it out of the way, create and
    /// start the replacement. The previous container is only removed after the
    /// new one is confirmed running.
    async fn recreate(&self, spec: &UpdateSpec, snapshot: &Value) -> Result<()> {
        self.engine
            .stop(&spec.container_name, spec.stop_grace)
            .await
            .map_err(EngineCrateError::Container)?;

        // Move the stopped container out of the way before creating its
        // replacement under the same name, or `create` hits a 409 name conflict
        // against the still-present old container.
        let old_name = format!("{}{}", spec.container_name, RENAME_SUFFIX);
        self.engine
            .rename(&spec.container_name, &old_name)
            .await
            .map_err(EngineCrateError::Container)?;

        let recreate_spec = RecreateSpec {
            name: spec.container_name.clone(),
            image_reference: spec.target_image.clone(),
            previous_inspect: snapshot.clone(),
        };

        self.engine
            .create(&recreate_spec)
            .await
            .map_err(EngineCrateError::Container)?;
        self.engine
            .start(&spec.container_name)
            .await
            .map_err(EngineCrateError::Container)?;

        Ok(())
    }

    async fn rollback(
        &self,
        spec: &UpdateSpec,
        snapshot: &Value,
        cause: EngineCrateError,
    ) -> Result<()> {
        let restore_spec = RecreateSpec {
            name: spec.container_name.clone(),
            image_reference: spec.current_image.clone(),
            previous_inspect: snapshot.clone(),
        };

        let restored = async {
            let _ = self.engine.remove(&spec.container_name, true).await;
            self.engine
                .create(&restore_spec)
                .await
                .map_err(EngineCrateError::Container)?;
            self.engine
                .start(&spec.container_name)
                .await
                .map_err(EngineCrateError::Container)
        }
        .await;

        match restored {
            Ok(()) => Err(EngineCrateError::RolledBack(cause.to_string())),
            Err(rollback_err) => {
                error!(
                    container = %spec.container_name,
                    original_error = %cause,
                    rollback_error = %rollback_err,
                    "rollback itself failed; container forced to manual policy"
                );
                if let Err(e) = self
                    .force_manual_policy(&spec.container_name)
                    .await
                {
                    error!(container = %spec.container_name, error = %e, "failed to force manual policy after rollback failure");
                }
                Err(EngineCrateError::RollbackFailed(format!(
                    "original: {cause}; rollback: {rollback_err}"
                )))
            }
        }
    }

    async fn persist_snapshot(&self, spec: &UpdateSpec, snapshot: &Value) -> Result<String> {
        #[derive(Serialize)]
        struct SnapshotRecord<'a> {
            container: &'a str,
            timestamp: DateTime<Utc>,
            payload: &'a Value,
        }
        let key = format!("{}/{}", spec.host_id, Uuid::new_v4());
        self.store
            .put(
                buckets::SNAPSHOTS,
                &key,
                &SnapshotRecord {
                    container: &spec.container_name,
                    timestamp: Utc::now(),
                    payload: snapshot,
                },
            )
            .await?;
        Ok(key)
    }

    async fn force_manual_policy(&self, container_name: &str) -> Result<()> {
        self.store
            .put(buckets::POLICY_OVERRIDES, container_name, &"manual")
            .await?;
        info!(container = container_name, "policy forced to manual after failed rollback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dockwarden_core::store::SqlitePersistence;
    use dockwarden_docker::{ContainerRef, EngineError, ExecOutput};
    use std::sync::Mutex;

    struct FakeEngine {
        fail_on_start: bool,
        fail_rollback: bool,
        calls: Mutex<Vec<String>>,
        /// Names currently "occupied" by a container, so `create` can enforce
        /// the same name-uniqueness a real engine does (Docker 409).
        names: Mutex<std::collections::HashSet<String>>,
    }

    impl FakeEngine {
        fn new(fail_on_start: bool, fail_rollback: bool) -> Self {
            let mut names = std::collections::HashSet::new();
            names.insert("web".to_string());
            Self {
                fail_on_start,
                fail_rollback,
                calls: Mutex::new(Vec::new()),
                names: Mutex::new(names),
            }
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn list_running(&self) -> dockwarden_docker::Result<Vec<ContainerRef>> {
            Ok(Vec::new())
        }
        async fn list_all(&self) -> dockwarden_docker::Result<Vec<ContainerRef>> {
            Ok(Vec::new())
        }
        async fn inspect(&self, _: &str) -> dockwarden_docker::Result<Value> {
            self.calls.lock().unwrap().push("inspect".into());
            Ok(serde_json::json!({"Config": {}}))
        }
        async fn stop(&self, _: &str, _: Duration) -> dockwarden_docker::Result<()> {
            self.calls.lock().unwrap().push("stop".into());
            Ok(())
        }
        async fn start(&self, _: &str) -> dockwarden_docker::Result<()> {
            let start_count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push("start".into());
                calls.iter().filter(|c| c.as_str() == "start").count()
            };
            if self.fail_on_start && start_count == 1 {
                return Err(EngineError::StartFailed("boom".into()));
            }
            Ok(())
        }
        async fn pull(&self, _: &str, _: Option<RegistryAuth>) -> dockwarden_docker::Result<()> {
            self.calls.lock().unwrap().push("pull".into());
            Ok(())
        }
        async fn create(&self, spec: &RecreateSpec) -> dockwarden_docker::Result<String> {
            let create_count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push("create".into());
                calls.iter().filter(|c| c.as_str() == "create").count()
            };
            if self.fail_rollback && create_count == 2 {
                return Err(EngineError::StartFailed("rollback create failed".into()));
            }
            let mut names = self.names.lock().unwrap();
            if !names.insert(spec.name.clone()) {
                return Err(EngineError::StartFailed(format!(
                    "container name {} already in use",
                    spec.name
                )));
            }
            Ok("new-id".into())
        }
        async fn rename(&self, id_or_name: &str, new_name: &str) -> dockwarden_docker::Result<()> {
            self.calls.lock().unwrap().push("rename".into());
            let mut names = self.names.lock().unwrap();
            if !names.remove(id_or_name) {
                return Err(EngineError::NotFound(id_or_name.to_string()));
            }
            names.insert(new_name.to_string());
            Ok(())
        }
        async fn remove(&self, id_or_name: &str, _: bool) -> dockwarden_docker::Result<()> {
            self.calls.lock().unwrap().push("remove".into());
            self.names.lock().unwrap().remove(id_or_name);
            Ok(())
        }
        async fn exec(&self, _: &str, _: &[String], _: Duration) -> dockwarden_docker::Result<ExecOutput> {
            Ok(ExecOutput { exit_code: 0, stdout: String::new(), stderr: String::new() })
        }
    }

    fn spec() -> UpdateSpec {
        let mut s = UpdateSpec::new("web", "local");
        s.current_image = "nginx:1.25".into();
        s.current_digest = "sha256:aaa".into();
        s.target_image = "nginx:1.26".into();
        s.target_digest = Some("sha256:bbb".into());
        s
    }

    #[tokio::test]
    async fn successful_update_records_success_and_event() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let engine = Arc::new(FakeEngine::new(false, false));
        let updater = Updater::new(store.clone(), engine, EventBus::new(8));
        let record = updater.apply(&spec()).await;
        assert_eq!(record.outcome, Outcome::Success);

        let history: Vec<(String, UpdateRecord)> = store.list(buckets::HISTORY).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn failure_past_stop_triggers_rollback_outcome() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let engine = Arc::new(FakeEngine::new(true, false));
        let updater = Updater::new(store, engine, EventBus::new(8));
        let record = updater.apply(&spec()).await;
        assert_eq!(record.outcome, Outcome::Rollback);
    }

    #[tokio::test]
    async fn recreate_renames_old_container_before_creating_replacement() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let engine = Arc::new(FakeEngine::new(false, false));
        let updater = Updater::new(store, engine.clone(), EventBus::new(8));
        let record = updater.apply(&spec()).await;
        assert_eq!(record.outcome, Outcome::Success);

        let calls = engine.calls.lock().unwrap();
        let rename_pos = calls.iter().position(|c| c == "rename").unwrap();
        let create_pos = calls.iter().position(|c| c == "create").unwrap();
        assert!(rename_pos < create_pos, "rename must happen before create");
    }
}
