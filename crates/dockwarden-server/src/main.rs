// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dockwarden-server - fleet update scheduler and cluster control plane.
//!
//! Runs three long-lived tasks side by side:
//! - the scan scheduler, applying or queueing updates on its own schedule
//! - the Enrollment QUIC endpoint, issuing signed certificates to new agents
//! - the Channel QUIC endpoint, the live connection to every enrolled agent

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use dockwarden_core::config::Config;
use dockwarden_core::events::EventBus;
use dockwarden_core::store::SqlitePersistence;
use dockwarden_docker::{BollardEngine, ContainerRef};
use dockwarden_cluster::ClusterServer;
use dockwarden_engine::policy::MaintenanceWindow;
use dockwarden_engine::scheduler::{Candidate, RemoteContainerSource, Scheduler, SchedulerConfig};
use dockwarden_registry::auth::RegistryCredential;

/// Feeds the scheduler containers reported by connected cluster agents.
struct ClusterContainerSource {
    cluster: Arc<ClusterServer<SqlitePersistence>>,
}

#[async_trait]
impl RemoteContainerSource for ClusterContainerSource {
    async fn list_remote_containers(&self) -> Vec<Candidate> {
        let hosts = match self.cluster.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!("failed to list cluster hosts: {}", e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for (host_id, record) in hosts {
            if !self.cluster.is_connected(&host_id) {
                continue;
            }
            match self.cluster.list_containers(&host_id).await {
                Ok(containers) => {
                    for info in containers {
                        if info.stale {
                            // Agent's engine has been unreachable past its offline
                            // grace period; last-known state can't be trusted.
                            continue;
                        }
                        candidates.push(Candidate {
                            host_id: host_id.clone(),
                            host_name: record.host_name.clone(),
                            container: ContainerRef {
                                id: info.name.clone(),
                                name: info.name,
                                image_reference: info.image,
                                image_digest: info.digest,
                                labels: Default::default(),
                                network_mode: String::new(),
                                running: info.running,
                            },
                        });
                    }
                }
                Err(e) => warn!(%host_id, "failed to list containers: {}", e),
            }
        }
        candidates
    }
}

fn sqlite_path_from_url(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .split('?')
        .next()
        .unwrap_or(database_url)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockwarden_server=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("no .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        scan_interval_secs = config.scan_interval.as_secs(),
        max_concurrent_updates = config.max_concurrent_updates,
        "starting dockwarden-server"
    );

    let store = Arc::new(
        SqlitePersistence::from_path(sqlite_path_from_url(&config.database_url)).await?,
    );
    let events = EventBus::new(256);
    let engine = Arc::new(BollardEngine::connect_local()?);

    let cluster = ClusterServer::new(store.clone(), events.clone()).await?;

    let enroll_addr = std::env::var("DOCKWARDEN_ENROLL_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7000".to_string())
        .parse()?;
    let channel_addr = std::env::var("DOCKWARDEN_CHANNEL_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7001".to_string())
        .parse()?;

    let enroll_cluster = cluster.clone();
    let enroll_task = tokio::spawn(async move {
        if let Err(e) = enroll_cluster.run_enroll_endpoint(enroll_addr).await {
            warn!("enrollment endpoint exited: {}", e);
        }
    });

    let channel_cluster = cluster.clone();
    let channel_task = tokio::spawn(async move {
        if let Err(e) = channel_cluster.run_channel_endpoint(channel_addr).await {
            warn!("channel endpoint exited: {}", e);
        }
    });

    let (ready_tx, ready_rx) = watch::channel(true);
    let remote = Arc::new(ClusterContainerSource { cluster: cluster.clone() });
    let credentials = config
        .registry_credentials
        .iter()
        .map(|(host_pattern, username, secret)| RegistryCredential {
            host_pattern: host_pattern.clone(),
            username: username.clone(),
            secret: secret.clone(),
        })
        .collect();
    let scheduler_config = SchedulerConfig {
        scan_interval: config.scan_interval,
        stop_grace: config.stop_grace_period,
        maintenance_window: MaintenanceWindow {
            start_hour: config.maintenance_start_hour,
            end_hour: config.maintenance_end_hour,
        },
        credentials,
        max_concurrent: config.max_concurrent_updates,
    };
    let mut scheduler = Scheduler::new(store, engine, events, remote, scheduler_config, ready_rx);
    let shutdown = scheduler.shutdown_handle();
    drop(ready_tx);

    info!(%enroll_addr, %channel_addr, "cluster endpoints starting");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.notify_one();
        }
    }

    enroll_task.abort();
    channel_task.abort();
    info!("dockwarden-server shut down");
    Ok(())
}
