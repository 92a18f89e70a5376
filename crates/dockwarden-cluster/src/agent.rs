// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster agent: enrollment, the reconnect loop with offline journaling, and
//! cert renewal, all driven against a local [`ContainerEngine`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use dockwarden_docker::ContainerEngine;
use dockwarden_proto::frame::{Frame, FrameError};
use dockwarden_proto::messages::{
    AgentMessage, AgentPayload, CertRenewal, ContainerAction, ContainerInfo, EnrollRequest,
    Heartbeat, JournalEntry, OfflineJournal, ServerPayload, StateReport,
};

use crate::ca::RENEWAL_WINDOW_DAYS;
use crate::quic_client::{ClientError, QuicClient, QuicClientConfig};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Client(#[from] ClientError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("certificate generation failed: {0}")]
    Cert(String),
    #[error("identity store error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The agent's persisted identity: CA cert to verify the server, the agent's
/// own signed leaf certificate, and its private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub host_id: String,
    pub ca_cert_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Static agent configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub enroll_addr: std::net::SocketAddr,
    pub enroll_server_name: String,
    pub channel_addr: std::net::SocketAddr,
    pub channel_server_name: String,
    pub host_name: String,
    pub enroll_token: String,
    pub identity_path: PathBuf,
    pub heartbeat_interval: Duration,
    /// Containers are marked unknown after being unreachable this long.
    pub offline_grace: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        let enroll_addr = std::env::var("DOCKWARDEN_ENROLL_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:7000".to_string())
            .parse()
            .map_err(|_| AgentError::Cert("invalid DOCKWARDEN_ENROLL_ADDR".to_string()))?;
        let channel_addr = std::env::var("DOCKWARDEN_CHANNEL_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:7001".to_string())
            .parse()
            .map_err(|_| AgentError::Cert("invalid DOCKWARDEN_CHANNEL_ADDR".to_string()))?;
        let server_name =
            std::env::var("DOCKWARDEN_SERVER_NAME").unwrap_or_else(|_| "localhost".to_string());
        Ok(Self {
            enroll_addr,
            enroll_server_name: server_name.clone(),
            channel_addr,
            channel_server_name: server_name,
            host_name: std::env::var("DOCKWARDEN_HOST_NAME")
                .unwrap_or_else(|_| hostname_or_unknown()),
            enroll_token: std::env::var("DOCKWARDEN_ENROLL_TOKEN").unwrap_or_default(),
            identity_path: std::env::var("DOCKWARDEN_IDENTITY_PATH")
                .unwrap_or_else(|_| ".data/agent-identity.json".to_string())
                .into(),
            heartbeat_interval: Duration::from_secs(
                std::env::var("DOCKWARDEN_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            offline_grace: Duration::from_secs(
                std::env::var("DOCKWARDEN_OFFLINE_GRACE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

fn hostname_or_unknown() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// The cluster agent. Owns the connection to the server and the local
/// container engine it dispatches commands to.
pub struct ClusterAgent {
    config: AgentConfig,
    engine: Arc<dyn ContainerEngine>,
    journal: Mutex<Vec<JournalEntry>>,
    identity: Mutex<Option<AgentIdentity>>,
    /// Last list reported to the server and when the engine last answered it
    /// successfully, so a transient engine outage can still report last-known
    /// containers (marked stale) instead of an empty list.
    last_known: Mutex<(Vec<ContainerInfo>, Instant)>,
}

impl ClusterAgent {
    pub fn new(config: AgentConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            config,
            engine,
            journal: Mutex::new(Vec::new()),
            identity: Mutex::new(None),
            last_known: Mutex::new((Vec::new(), Instant::now())),
        }
    }

    fn load_identity(&self) -> Option<AgentIdentity> {
        let bytes = std::fs::read(&self.config.identity_path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn save_identity(&self, identity: &AgentIdentity) -> Result<(), AgentError> {
        if let Some(parent) = self.config.identity_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(identity)?;
        std::fs::write(&self.config.identity_path, &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.config.identity_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Generate a keypair and CSR, enroll against the Enrollment endpoint
    /// (which the agent cannot yet verify a certificate against), and persist
    /// the returned identity.
    #[instrument(skip(self))]
    pub async fn enroll(&self) -> Result<AgentIdentity, AgentError> {
        if let Some(existing) = self.load_identity() {
            return Ok(existing);
        }

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| AgentError::Cert(e.to_string()))?;
        let mut params =
            CertificateParams::new(Vec::new()).map_err(|e| AgentError::Cert(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "enrolling");
        params.distinguished_name = dn;
        let csr_pem = params
            .serialize_request(&key_pair)
            .map_err(|e| AgentError::Cert(e.to_string()))?
            .pem()
            .map_err(|e| AgentError::Cert(e.to_string()))?;

        let client = QuicClient::new(QuicClientConfig {
            server_addr: self.config.enroll_addr,
            server_name: self.config.enroll_server_name.clone(),
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })?;

        let response = client
            .request::<EnrollRequest, dockwarden_proto::messages::EnrollResponse>(&EnrollRequest {
                token: self.config.enroll_token.clone(),
                host_name: self.config.host_name.clone(),
                csr: csr_pem,
            })
            .await?;
        client.close().await;

        let identity = AgentIdentity {
            host_id: response.host_id,
            ca_cert_pem: response.ca_cert,
            cert_pem: response.agent_cert,
            key_pem: key_pair.serialize_pem(),
        };
        self.save_identity(&identity)?;
        info!(host_id = %identity.host_id, "enrolled with the cluster server");
        Ok(identity)
    }

    fn channel_client(&self, identity: &AgentIdentity) -> Result<QuicClient, AgentError> {
        Ok(QuicClient::new(QuicClientConfig {
            server_addr: self.config.channel_addr,
            server_name: self.config.channel_server_name.clone(),
            ca_pem: Some(identity.ca_cert_pem.clone().into_bytes()),
            client_identity: Some((
                identity.cert_pem.clone().into_bytes(),
                identity.key_pem.clone().into_bytes(),
            )),
            ..Default::default()
        })?)
    }

    /// Queue a description of a locally-executed action. Flushed to the server
    /// as an `OfflineJournal` the next time a channel connects.
    pub async fn record_action(&self, description: impl Into<String>) {
        self.journal.lock().await.push(JournalEntry {
            timestamp: Utc::now().timestamp(),
            description: description.into(),
        });
    }

    /// List locally-running containers. On an engine failure, keeps reporting
    /// the last successful list (so a transient hiccup doesn't make every
    /// container vanish from the next report) until `offline_grace` elapses,
    /// after which they're reported `stale` rather than silently dropped.
    async fn local_container_list(&self) -> Vec<ContainerInfo> {
        match self.engine.list_all().await {
            Ok(containers) => {
                let fresh: Vec<ContainerInfo> = containers
                    .into_iter()
                    .map(|c| ContainerInfo {
                        name: c.name,
                        image: c.image_reference,
                        digest: c.image_digest,
                        running: c.running,
                        stale: false,
                    })
                    .collect();
                *self.last_known.lock().await = (fresh.clone(), Instant::now());
                fresh
            }
            Err(e) => {
                warn!("failed to list local containers: {}", e);
                let (last, last_success) = self.last_known.lock().await.clone();
                if last_success.elapsed() >= self.config.offline_grace {
                    last.into_iter().map(|c| ContainerInfo { stale: true, ..c }).collect()
                } else {
                    last
                }
            }
        }
    }

    fn needs_renewal(cert_pem: &str) -> bool {
        let Some((_, pem)) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).ok() else {
            return false;
        };
        let Ok((_, cert)) = x509_parser::parse_x509_certificate(&pem.contents) else {
            return false;
        };
        let not_after = cert.validity().not_after.timestamp();
        let renewal_at = not_after - RENEWAL_WINDOW_DAYS * 24 * 3600;
        Utc::now().timestamp() >= renewal_at
    }

    /// Run one connected session: initial state report, then the command loop
    /// until the channel drops. Returns when disconnected so the caller can
    /// reconnect with backoff.
    async fn run_session(&self, identity: &AgentIdentity) -> Result<(), AgentError> {
        let client = self.channel_client(identity)?;
        client.connect().await?;

        let report = StateReport {
            host_id: identity.host_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            containers: self.local_container_list().await,
        };
        let _ack: dockwarden_proto::messages::ServerMessage =
            client.request(&report).await?;

        {
            let mut pending = self.journal.lock().await;
            if !pending.is_empty() {
                let journal = AgentMessage {
                    payload: Some(AgentPayload::OfflineJournal(OfflineJournal {
                        entries: std::mem::take(&mut *pending),
                    })),
                };
                client.send_fire_and_forget(&journal).await?;
            }
        }

        let mut framed = client.open_stream().await?;
        let mut heartbeat_ticker = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat_ticker.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat_ticker.tick() => {
                    let hb = AgentMessage {
                        payload: Some(AgentPayload::Heartbeat(Heartbeat {
                            timestamp: Utc::now().timestamp(),
                            version: env!("CARGO_PKG_VERSION").to_string(),
                            features: vec!["cert-renewal".to_string(), "offline-journal".to_string()],
                            host_id: identity.host_id.clone(),
                        })),
                    };
                    let frame = Frame::request(&hb)?;
                    if let Err(e) = framed.write_frame(&frame).await {
                        warn!("heartbeat send failed: {}", e);
                        return Err(e.into());
                    }

                    if Self::needs_renewal(&identity.cert_pem) {
                        if let Err(e) = self.request_cert_renewal(&mut framed, identity).await {
                            warn!("cert renewal request failed: {}", e);
                        }
                    }
                }
                incoming = framed.read_frame() => {
                    let frame = incoming?;
                    let msg: dockwarden_proto::messages::ServerMessage = frame.decode()?;
                    self.dispatch(&mut framed, identity, msg).await;
                }
            }
        }
    }

    async fn request_cert_renewal(
        &self,
        framed: &mut dockwarden_proto::frame::FramedStream<(quinn::SendStream, quinn::RecvStream)>,
        identity: &AgentIdentity,
    ) -> Result<(), AgentError> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| AgentError::Cert(e.to_string()))?;
        let mut params =
            CertificateParams::new(Vec::new()).map_err(|e| AgentError::Cert(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, identity.host_id.clone());
        params.distinguished_name = dn;
        let csr_pem = params
            .serialize_request(&key_pair)
            .map_err(|e| AgentError::Cert(e.to_string()))?
            .pem()
            .map_err(|e| AgentError::Cert(e.to_string()))?;

        let msg = AgentMessage {
            payload: Some(AgentPayload::CertRenewal(CertRenewal { csr: csr_pem })),
        };
        let frame = Frame::request(&msg)?;
        framed.write_frame(&frame).await?;
        info!(host_id = %identity.host_id, "requested certificate renewal");

        // The new key only becomes the agent's identity once the server
        // confirms with a CertRenewalResponse carrying the signed leaf.
        *self.identity.lock().await = Some(AgentIdentity {
            host_id: identity.host_id.clone(),
            ca_cert_pem: identity.ca_cert_pem.clone(),
            cert_pem: identity.cert_pem.clone(),
            key_pem: key_pair.serialize_pem(),
        });
        Ok(())
    }

    async fn dispatch(
        &self,
        framed: &mut dockwarden_proto::frame::FramedStream<(quinn::SendStream, quinn::RecvStream)>,
        identity: &AgentIdentity,
        msg: dockwarden_proto::messages::ServerMessage,
    ) {
        let Some(payload) = msg.payload else { return };
        let request_id = msg.request_id;

        let result = match payload {
            ServerPayload::ListContainers(_) => {
                let containers = self.local_container_list().await;
                Some(AgentPayload::ContainerList(dockwarden_proto::messages::ContainerList {
                    request_id: request_id.clone(),
                    containers,
                }))
            }
            ServerPayload::ContainerAction(action_req) => {
                let action = ContainerAction::try_from(action_req.action).unwrap_or(ContainerAction::Stop);
                let outcome = self.perform_action(&action_req.name, action).await;
                Some(AgentPayload::ContainerActionResult(
                    dockwarden_proto::messages::ContainerActionResult {
                        request_id: request_id.clone(),
                        name: action_req.name,
                        action: action as i32,
                        outcome: if outcome.is_ok() { "success".to_string() } else { "failed".to_string() },
                        error: outcome.err(),
                    },
                ))
            }
            ServerPayload::UpdateContainer(_) => {
                // Actual image pull/recreate is driven by `dockwarden_engine::Updater`
                // at the binary layer, which has the registry and hook context this
                // crate doesn't. Acknowledge receipt so the server can track it.
                None
            }
            ServerPayload::CertRenewalResponse(resp) => {
                let mut guard = self.identity.lock().await;
                if let Some(pending) = guard.take() {
                    let renewed = AgentIdentity { cert_pem: resp.cert, ..pending };
                    if let Err(e) = self.save_identity(&renewed) {
                        error!("failed to persist renewed certificate: {}", e);
                    } else {
                        info!(host_id = %identity.host_id, "certificate renewed");
                    }
                }
                None
            }
        };

        if let Some(payload) = result {
            let response = AgentMessage { payload: Some(payload) };
            if let Ok(frame) = Frame::request(&response) {
                let _ = framed.write_frame(&frame).await;
            }
        }
    }

    async fn perform_action(&self, name: &str, action: ContainerAction) -> Result<(), String> {
        let grace = Duration::from_secs(10);
        let result = match action {
            ContainerAction::Stop => self.engine.stop(name, grace).await,
            ContainerAction::Start => self.engine.start(name).await,
            ContainerAction::Restart => self.engine.restart(name, grace).await,
            ContainerAction::Remove => self.engine.remove(name, false).await,
        };
        self.record_action(format!("{action:?} {name}")).await;
        result.map_err(|e| e.to_string())
    }

    /// Enroll if needed, then reconnect forever with exponential backoff and
    /// jitter, running one session per connection.
    pub async fn run(&self) -> ! {
        let identity = loop {
            match self.enroll().await {
                Ok(identity) => break identity,
                Err(e) => {
                    error!("enrollment failed, retrying: {}", e);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            }
        };

        *self.identity.lock().await = Some(identity);

        let mut attempt: u32 = 0;
        loop {
            let current = self.identity.lock().await.clone().expect("identity set above");
            match self.run_session(&current).await {
                Ok(()) => attempt = 0,
                Err(e) => {
                    warn!("channel session ended: {}", e);
                    attempt += 1;
                }
            }
            let delay = backoff_with_jitter(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff capped at two minutes, with up to 20% jitter so many
/// agents reconnecting after a server restart don't thunder in lockstep.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_secs = 2u64.saturating_pow(attempt.min(6)).min(120);
    let jitter_ms = rand::rng().gen_range(0..=(base_secs * 1000 / 5).max(1));
    Duration::from_millis(base_secs * 1000 + jitter_ms)
}
