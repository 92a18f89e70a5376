// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container engine trait definition.
//!
//! Defines the abstract interface the updater and scheduler use to talk to a
//! local container engine. The `bollard` adapter is the only implementation that
//! ships in this crate, but the trait exists so the engine crate never depends on
//! `bollard` types directly.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from container engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No container matches the given name or id.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The engine returned an error while pulling an image.
    #[error("pull failed for {image}: {message}")]
    PullFailed { image: String, message: String },

    /// The engine returned an error starting or creating a container.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// The engine returned an error stopping a container within the grace period.
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// Exec inside a container failed or returned non-zero.
    #[error("exec failed: exit code {exit_code}: {stderr}")]
    ExecFailed { exit_code: i64, stderr: String },

    /// Could not reach the engine at all (socket/TCP connect failure).
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    /// Any other engine error, carrying the underlying message.
    #[error("engine error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// A container as seen by a scan, independent of which engine produced it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub image_reference: String,
    pub image_digest: Option<String>,
    pub labels: HashMap<String, String>,
    pub network_mode: String,
    pub running: bool,
}

impl ContainerRef {
    /// Containers this one depends on, per the `dockwarden.depends-on` label
    /// (comma-separated container names), plus any container it shares a network
    /// namespace with (`network_mode` of the form `container:<name-or-id>`).
    pub fn declared_dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .labels
            .get("dockwarden.depends-on")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        if let Some(target) = self.network_mode.strip_prefix("container:") {
            deps.push(target.to_string());
        }
        deps
    }
}

/// Options used to recreate a container after a successful pull.
#[derive(Debug, Clone)]
pub struct RecreateSpec {
    pub name: String,
    pub image_reference: String,
    /// The raw inspect payload captured just before the update, used as the
    /// template for recreation (labels, env, mounts, network config, etc. are
    /// pulled from this rather than re-specified here).
    pub previous_inspect: Value,
}

/// Outcome of an exec call.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Abstract interface over a local (or agent-local) container engine.
///
/// Implementations talk to a single engine endpoint (UNIX socket or TCP+TLS).
/// Swarm service operations are present on the trait but stubbed: this system
/// does not orchestrate swarm rollouts (Non-goal), it only needs enough surface
/// to avoid special-casing swarm containers out of scans.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List every running container.
    async fn list_running(&self) -> Result<Vec<ContainerRef>>;

    /// List every container, running or not.
    async fn list_all(&self) -> Result<Vec<ContainerRef>>;

    /// Raw inspect payload for a container, used as a pre-update snapshot and as
    /// the recreation template.
    async fn inspect(&self, id_or_name: &str) -> Result<Value>;

    /// Stop a container, giving it `grace` to exit before SIGKILL.
    async fn stop(&self, id_or_name: &str, grace: Duration) -> Result<()>;

    /// Start an existing (stopped) container.
    async fn start(&self, id_or_name: &str) -> Result<()>;

    /// Pull an image, optionally authenticating with a registry credential.
    async fn pull(&self, image_reference: &str, auth: Option<RegistryAuth>) -> Result<()>;

    /// Create a new container from `spec`, returning its id. Does not start it.
    /// Fails if a container already holds `spec.name` (Docker returns 409).
    async fn create(&self, spec: &RecreateSpec) -> Result<String>;

    /// Rename an existing container, freeing its old name for reuse.
    async fn rename(&self, id_or_name: &str, new_name: &str) -> Result<()>;

    /// Remove a container. Fails if it is running and `force` is false.
    async fn remove(&self, id_or_name: &str, force: bool) -> Result<()>;

    /// Execute a command inside a running container and wait for it to exit.
    async fn exec(
        &self,
        id_or_name: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Restart a container (stop with `grace`, then start).
    async fn restart(&self, id_or_name: &str, grace: Duration) -> Result<()> {
        self.stop(id_or_name, grace).await?;
        self.start(id_or_name).await
    }

    /// List swarm services. Stubbed: always returns an empty list, since swarm
    /// rollout orchestration is out of scope.
    async fn list_services(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Registry credentials as handed to the engine's pull call (engine-native auth
/// shape, distinct from `dockwarden_registry`'s credential type).
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_with(labels: &[(&str, &str)], network_mode: &str) -> ContainerRef {
        ContainerRef {
            id: "abc".into(),
            name: "web".into(),
            image_reference: "nginx:1.25".into(),
            image_digest: None,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            network_mode: network_mode.into(),
            running: true,
        }
    }

    #[test]
    fn declared_dependencies_from_label() {
        let c = container_with(&[("dockwarden.depends-on", "db, cache")], "bridge");
        assert_eq!(c.declared_dependencies(), vec!["db".to_string(), "cache".to_string()]);
    }

    #[test]
    fn declared_dependencies_include_shared_network_namespace() {
        let c = container_with(&[], "container:db");
        assert_eq!(c.declared_dependencies(), vec!["db".to_string()]);
    }

    #[test]
    fn no_dependencies_yields_empty_vec() {
        let c = container_with(&[], "bridge");
        assert!(c.declared_dependencies().is_empty());
    }
}
