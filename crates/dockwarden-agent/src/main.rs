// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dockwarden-agent - enrolls with a dockwarden-server cluster and keeps a
//! mTLS channel open to it, reporting local containers and carrying out the
//! commands the server sends back.

use std::sync::Arc;

use tracing::{info, warn};

use dockwarden_cluster::{AgentConfig, ClusterAgent};
use dockwarden_docker::BollardEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockwarden_agent=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("no .env file loaded: {}", e);
    }

    let config = AgentConfig::from_env()?;
    info!(
        host_name = %config.host_name,
        enroll_addr = %config.enroll_addr,
        channel_addr = %config.channel_addr,
        "starting dockwarden-agent"
    );

    let engine = Arc::new(BollardEngine::connect_local()?);
    let agent = ClusterAgent::new(config, engine);

    tokio::select! {
        _ = agent.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("dockwarden-agent shut down");
    Ok(())
}
