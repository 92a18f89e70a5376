// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster server: the Enrollment and Channel QUIC endpoints, a per-host
//! stream registry, and request/response correlation for commands sent down
//! to agents.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use dockwarden_core::error::CoreError;
use dockwarden_core::events::{Event, EventBus, EventKind};
use dockwarden_core::store::{buckets, Store, StoreExt};
use dockwarden_proto::frame::{Frame, FrameError, FramedStream};
use dockwarden_proto::messages::{
    AgentPayload, CertRenewalResponse, ContainerInfo, EnrollRequest, EnrollResponse,
    ListContainersRequest, ServerMessage, ServerPayload, StateReport,
};

use crate::ca::{revoke, ClusterCa, RevocationCache, RENEWAL_WINDOW_DAYS};
use crate::quic_server::{ConnectionHandler, QuicServer, QuicServerConfig, ServerError};

/// How often the in-memory revocation cache reloads from the store, so a
/// revocation issued through another process (or another `ClusterServer`
/// instance sharing the same store) is picked up without a restart.
const REVOCATION_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("server transport error: {0}")]
    Server(#[from] ServerError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("unknown or expired enrollment token")]
    InvalidToken,
    #[error("host {0} is not currently connected")]
    HostOffline(String),
    #[error("request to host {0} timed out")]
    Timeout(String),
    #[error("certificate serial {0} is revoked")]
    Revoked(String),
    #[error("enrollment token ttl must be positive, got {0}")]
    InvalidTtl(i64),
}

/// Durable per-host record, written at enrollment and updated on each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_id: String,
    pub host_name: String,
    pub cert_serial: String,
    pub enrolled_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub version: String,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingToken {
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerIdentity {
    key_pem: String,
    cert_pem: String,
}

const SERVER_IDENTITY_KEY: &str = "server-identity";
const SERVER_COMMON_NAME: &str = "dockwarden-cluster-server";

/// Live state for one connected host: the outbound command sink and the
/// correlation map awaiting responses to commands sent down that sink.
struct HostHandle {
    outbound: mpsc::Sender<ServerMessage>,
    pending: DashMap<String, oneshot::Sender<AgentPayload>>,
    last_seen: Mutex<DateTime<Utc>>,
}

/// The cluster server: owns the root CA, the host registry, and the two QUIC
/// listeners (Enrollment and Channel).
pub struct ClusterServer<S: Store + ?Sized> {
    store: Arc<S>,
    events: EventBus,
    ca: ClusterCa,
    hosts: DashMap<String, Arc<HostHandle>>,
    revocations: Arc<RevocationCache>,
}

impl<S: Store + ?Sized + 'static> ClusterServer<S> {
    pub async fn new(store: Arc<S>, events: EventBus) -> Result<Arc<Self>, ClusterError> {
        let ca = ClusterCa::load_or_generate(store.as_ref()).await?;
        let revocations = Arc::new(RevocationCache::new());
        revocations.refresh(store.as_ref()).await?;
        Ok(Arc::new(Self {
            store,
            events,
            ca,
            hosts: DashMap::new(),
            revocations,
        }))
    }

    /// The server's own TLS identity, signed by the cluster CA so agents can
    /// verify it with the same `ca_cert_pem()` they received at enrollment.
    async fn server_identity(&self) -> Result<(Vec<u8>, Vec<u8>), ClusterError> {
        if let Some(stored) = self
            .store
            .get::<ServerIdentity>(buckets::SETTINGS, SERVER_IDENTITY_KEY)
            .await?
        {
            return Ok((stored.cert_pem.into_bytes(), stored.key_pem.into_bytes()));
        }
        let (leaf, key_pair) = self.ca.issue_leaf(SERVER_COMMON_NAME)?;
        let stored = ServerIdentity {
            key_pem: key_pair.serialize_pem(),
            cert_pem: leaf.cert_pem.clone(),
        };
        self.store
            .put(buckets::SETTINGS, SERVER_IDENTITY_KEY, &stored)
            .await?;
        Ok((stored.cert_pem.into_bytes(), stored.key_pem.into_bytes()))
    }

    /// Issue a one-time enrollment token, valid for `ttl_secs` seconds.
    pub async fn issue_enroll_token(&self, ttl_secs: i64) -> Result<String, ClusterError> {
        if ttl_secs <= 0 {
            return Err(ClusterError::InvalidTtl(ttl_secs));
        }
        let token = Uuid::new_v4().to_string();
        let record = PendingToken {
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        };
        self.store
            .put(buckets::ENROLL_TOKENS, &token, &record)
            .await?;
        Ok(token)
    }

    /// Handle an `EnrollRequest` on the no-client-auth endpoint: validate the
    /// token, sign the agent's CSR, and persist the new host record.
    #[instrument(skip(self, req), fields(host_name = %req.host_name))]
    pub async fn handle_enroll(&self, req: EnrollRequest) -> Result<EnrollResponse, ClusterError> {
        let pending: Option<PendingToken> = self
            .store
            .get(buckets::ENROLL_TOKENS, &req.token)
            .await?;
        let pending = pending.ok_or(ClusterError::InvalidToken)?;
        if pending.expires_at < Utc::now() {
            self.store.delete(buckets::ENROLL_TOKENS, &req.token).await?;
            return Err(ClusterError::InvalidToken);
        }
        self.store.delete(buckets::ENROLL_TOKENS, &req.token).await?;

        let host_id = Uuid::new_v4().to_string();
        let leaf = self.ca.sign_csr(&req.csr, &host_id)?;

        let record = HostRecord {
            host_id: host_id.clone(),
            host_name: req.host_name.clone(),
            cert_serial: leaf.serial.clone(),
            enrolled_at: Utc::now(),
            last_heartbeat: None,
            version: String::new(),
            features: Vec::new(),
        };
        self.store
            .put(buckets::CLUSTER_HOSTS, &host_id, &record)
            .await?;

        self.events
            .publish(
                Event::new(EventKind::ClusterHost, Utc::now())
                    .with_host(req.host_name.clone())
                    .with_message("enrolled"),
            )
            .await;

        info!(%host_id, host_name = %req.host_name, "host enrolled");

        Ok(EnrollResponse {
            host_id,
            ca_cert: self.ca.ca_cert_pem().to_string(),
            agent_cert: leaf.cert_pem,
        })
    }

    /// Run the Enrollment endpoint: no client certificate required, since the
    /// agent doesn't hold one yet.
    pub async fn run_enroll_endpoint(
        self: &Arc<Self>,
        bind_addr: SocketAddr,
    ) -> Result<(), ClusterError> {
        let (cert_pem, key_pem) = self.server_identity().await?;
        let config = QuicServerConfig {
            bind_addr,
            cert_pem,
            key_pem,
            client_ca_pem: None,
            ..Default::default()
        };
        let server = QuicServer::new(config)?;
        info!(%bind_addr, "enrollment endpoint listening");

        let this = self.clone();
        server
            .run(move |conn: ConnectionHandler| {
                let this = this.clone();
                async move {
                    conn.run(move |mut stream| {
                        let this = this.clone();
                        async move {
                            let result = stream
                                .handle_request::<EnrollRequest, EnrollResponse, _, _>(|req| {
                                    let this = this.clone();
                                    async move {
                                        this.handle_enroll(req).await.map_err(|e| {
                                            ServerError::Tls(e.to_string())
                                        })
                                    }
                                })
                                .await;
                            if let Err(e) = result {
                                warn!("enrollment stream error: {}", e);
                            }
                        }
                    })
                    .await;
                }
            })
            .await?;
        Ok(())
    }

    /// Run the Channel endpoint: requires a valid client certificate signed by
    /// the cluster CA. Host identity is the certificate's common name.
    pub async fn run_channel_endpoint(
        self: &Arc<Self>,
        bind_addr: SocketAddr,
    ) -> Result<(), ClusterError> {
        let (cert_pem, key_pem) = self.server_identity().await?;
        let config = QuicServerConfig {
            bind_addr,
            cert_pem,
            key_pem,
            client_ca_pem: Some(self.ca.ca_cert_pem().as_bytes().to_vec()),
            revocation_cache: Some(self.revocations.clone()),
            ..Default::default()
        };
        let server = QuicServer::new(config)?;
        info!(%bind_addr, "channel endpoint listening");

        let refresher = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REVOCATION_REFRESH_INTERVAL);
            interval.tick().await; // first tick fires immediately, already refreshed in `new`
            loop {
                interval.tick().await;
                if let Err(e) = refresher.revocations.refresh(refresher.store.as_ref()).await {
                    warn!("revocation cache refresh failed, failing closed: {}", e);
                }
            }
        });

        let this = self.clone();
        server
            .run(move |conn: ConnectionHandler| {
                let this = this.clone();
                async move { this.handle_channel_connection(conn).await }
            })
            .await?;
        Ok(())
    }

    async fn handle_channel_connection(self: Arc<Self>, conn: ConnectionHandler) {
        let remote = conn.remote_address();
        let host_id = match Self::peer_host_id(&conn) {
            Some(id) => id,
            None => {
                warn!(%remote, "channel connection without an identifiable client certificate");
                return;
            }
        };
        let cert_serial = Self::peer_cert_serial(&conn);
        if self.reject_if_revoked(&host_id, cert_serial.as_deref()).is_err() {
            return;
        }
        debug!(%host_id, %remote, "channel connection accepted");

        // The agent opens one bi-stream per connection for its initial state
        // report (request/response), then a second long-lived bi-stream that
        // carries the rest of the channel traffic.
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let mut report_stream = FramedStream::new((send, recv));
                match report_stream.read_frame().await {
                    Ok(frame) => match frame.decode::<StateReport>() {
                        Ok(report) => {
                            self.handle_state_report(&host_id, report).await;
                            let ack = ServerMessage { request_id: String::new(), payload: None };
                            if let Ok(resp_frame) = Frame::response(&ack) {
                                let _ = report_stream.write_frame(&resp_frame).await;
                            }
                        }
                        Err(e) => warn!(%host_id, "undecodable state report: {}", e),
                    },
                    Err(e) => warn!(%host_id, "no state report received: {}", e),
                }
            }
            Err(e) => {
                warn!(%host_id, "failed to accept state report stream: {}", e);
                return;
            }
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(64);
        let handle = Arc::new(HostHandle {
            outbound: outbound_tx,
            pending: DashMap::new(),
            last_seen: Mutex::new(Utc::now()),
        });
        self.hosts.insert(host_id.clone(), handle.clone());

        let (send, recv) = match conn.accept_bi().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%host_id, "failed to establish channel stream: {}", e);
                self.hosts.remove(&host_id);
                return;
            }
        };
        let mut framed = FramedStream::new((send, recv));

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            let frame = match Frame::request(&msg) {
                                Ok(f) => f,
                                Err(e) => { warn!(%host_id, "failed to encode command: {}", e); continue; }
                            };
                            if let Err(e) = framed.write_frame(&frame).await {
                                warn!(%host_id, "failed to send to host: {}", e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = framed.read_frame() => {
                    match incoming {
                        Ok(frame) => {
                            if self.reject_if_revoked(&host_id, cert_serial.as_deref()).is_err() {
                                break;
                            }
                            match frame.decode::<dockwarden_proto::messages::AgentMessage>() {
                                Ok(agent_msg) => {
                                    self.handle_agent_message(&host_id, &handle, agent_msg).await;
                                }
                                Err(e) => warn!(%host_id, "undecodable frame: {}", e),
                            }
                        }
                        Err(e) => {
                            debug!(%host_id, "channel stream closed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        self.hosts.remove(&host_id);
        self.events
            .publish(
                Event::new(EventKind::ClusterHost, Utc::now())
                    .with_host(host_id.clone())
                    .with_message("disconnected"),
            )
            .await;
    }

    fn peer_host_id(conn: &ConnectionHandler) -> Option<String> {
        // The host id is embedded as the leaf certificate's common name at
        // signing time (see `ClusterCa::sign_csr`).
        let certs = conn.peer_certificates()?;
        let leaf = certs.first()?;
        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref()).ok()?;
        cert.subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(|s| s.to_string())
    }

    /// The connecting peer's leaf certificate serial, in the same
    /// colon-separated hex form `ClusterCa::sign_csr` records as
    /// `HostRecord.cert_serial`.
    fn peer_cert_serial(conn: &ConnectionHandler) -> Option<String> {
        let certs = conn.peer_certificates()?;
        let leaf = certs.first()?;
        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref()).ok()?;
        Some(cert.raw_serial_as_string())
    }

    /// Whether `host_id`'s certificate must be treated as revoked right now.
    /// Consulted on every authenticated RPC, not just at the TLS handshake,
    /// since a revocation issued mid-session otherwise wouldn't be noticed
    /// until the agent's connection happens to drop.
    fn reject_if_revoked(&self, host_id: &str, serial: Option<&str>) -> Result<(), ClusterError> {
        let revoked = match serial {
            Some(serial) => self.revocations.is_revoked(serial),
            // No parseable serial at all is treated the same as a revoked one:
            // fail closed rather than let an unidentifiable peer through.
            None => true,
        };
        if revoked {
            warn!(%host_id, "rejecting authenticated request: certificate revoked");
            return Err(ClusterError::Revoked(host_id.to_string()));
        }
        Ok(())
    }

    async fn handle_state_report(&self, host_id: &str, report: StateReport) {
        info!(%host_id, containers = report.containers.len(), "state report received");
        if let Some(handle) = self.hosts.get(host_id) {
            *handle.last_seen.lock().await = Utc::now();
        }
        self.bump_host(host_id, |r| {
            r.version = report.version.clone();
        })
        .await;
    }

    async fn handle_agent_message(
        &self,
        host_id: &str,
        handle: &Arc<HostHandle>,
        msg: dockwarden_proto::messages::AgentMessage,
    ) {
        let Some(payload) = msg.payload else { return };
        match &payload {
            AgentPayload::Heartbeat(hb) => {
                *handle.last_seen.lock().await = Utc::now();
                self.bump_host(host_id, |r| {
                    r.last_heartbeat = Some(Utc::now());
                    r.version = hb.version.clone();
                    r.features = hb.features.clone();
                })
                .await;
            }
            AgentPayload::CertRenewal(renewal) => {
                if let Err(e) = self.handle_cert_renewal(host_id, &renewal.csr, handle).await {
                    warn!(%host_id, "cert renewal failed: {}", e);
                }
            }
            AgentPayload::OfflineJournal(journal) => {
                for entry in &journal.entries {
                    self.events
                        .publish(
                            Event::new(EventKind::ClusterHost, Utc::now())
                                .with_host(host_id.to_string())
                                .with_message(entry.description.clone()),
                        )
                        .await;
                }
            }
            _ => {
                let request_id = match &payload {
                    AgentPayload::ContainerList(r) => Some(r.request_id.clone()),
                    AgentPayload::UpdateResult(r) => Some(r.request_id.clone()),
                    AgentPayload::ContainerActionResult(r) => Some(r.request_id.clone()),
                    AgentPayload::HookResult(r) => Some(r.request_id.clone()),
                    AgentPayload::RollbackResult(r) => Some(r.request_id.clone()),
                    _ => None,
                };
                if let Some(request_id) = request_id
                    && let Some((_, sender)) = handle.pending.remove(&request_id)
                {
                    let _ = sender.send(payload);
                }
            }
        }
    }

    async fn handle_cert_renewal(
        &self,
        host_id: &str,
        csr_pem: &str,
        handle: &Arc<HostHandle>,
    ) -> Result<(), ClusterError> {
        let record: Option<HostRecord> = self.store.get(buckets::CLUSTER_HOSTS, host_id).await?;
        let record = record.ok_or_else(|| ClusterError::HostOffline(host_id.to_string()))?;

        let leaf = self.ca.sign_csr(csr_pem, host_id)?;
        if revoke(self.store.as_ref(), &record.cert_serial).await.is_ok() {
            self.revocations.record_revoked(&record.cert_serial);
        }
        self.bump_host(host_id, |r| r.cert_serial = leaf.serial.clone()).await;

        let response = ServerMessage {
            request_id: String::new(),
            payload: Some(ServerPayload::CertRenewalResponse(CertRenewalResponse {
                cert: leaf.cert_pem,
            })),
        };
        handle
            .outbound
            .send(response)
            .await
            .map_err(|_| ClusterError::HostOffline(host_id.to_string()))?;
        Ok(())
    }

    async fn bump_host(&self, host_id: &str, f: impl FnOnce(&mut HostRecord)) {
        if let Ok(Some(mut record)) = self
            .store
            .get::<HostRecord>(buckets::CLUSTER_HOSTS, host_id)
            .await
        {
            f(&mut record);
            let _ = self.store.put(buckets::CLUSTER_HOSTS, host_id, &record).await;
        }
    }

    /// Send a command to a connected host and await its correlated response.
    pub async fn send_command(
        &self,
        host_id: &str,
        payload: ServerPayload,
        timeout: std::time::Duration,
    ) -> Result<AgentPayload, ClusterError> {
        let handle = self
            .hosts
            .get(host_id)
            .ok_or_else(|| ClusterError::HostOffline(host_id.to_string()))?
            .clone();

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        handle.pending.insert(request_id.clone(), tx);

        let msg = ServerMessage {
            request_id: request_id.clone(),
            payload: Some(payload),
        };
        handle
            .outbound
            .send(msg)
            .await
            .map_err(|_| ClusterError::HostOffline(host_id.to_string()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            _ => {
                handle.pending.remove(&request_id);
                Err(ClusterError::Timeout(host_id.to_string()))
            }
        }
    }

    /// Request a container list refresh from a host.
    pub async fn list_containers(
        &self,
        host_id: &str,
    ) -> Result<Vec<ContainerInfo>, ClusterError> {
        let payload = self
            .send_command(
                host_id,
                ServerPayload::ListContainers(ListContainersRequest {}),
                std::time::Duration::from_secs(30),
            )
            .await?;
        match payload {
            AgentPayload::ContainerList(list) => Ok(list.containers),
            _ => Ok(Vec::new()),
        }
    }

    /// Whether a host currently holds an open channel connection.
    pub fn is_connected(&self, host_id: &str) -> bool {
        self.hosts.contains_key(host_id)
    }

    /// List every enrolled host record.
    pub async fn list_hosts(&self) -> Result<HashMap<String, HostRecord>, ClusterError> {
        let records = self.store.list::<HostRecord>(buckets::CLUSTER_HOSTS).await?;
        Ok(records.into_iter().map(|(_, v)| (v.host_id.clone(), v)).collect())
    }

    /// Revoke a host's certificate and drop its live connection, if any.
    pub async fn revoke_host(&self, host_id: &str) -> Result<(), ClusterError> {
        if let Some(record) = self
            .store
            .get::<HostRecord>(buckets::CLUSTER_HOSTS, host_id)
            .await?
        {
            if revoke(self.store.as_ref(), &record.cert_serial).await.is_ok() {
                self.revocations.record_revoked(&record.cert_serial);
            }
        }
        if let Some((_, handle)) = self.hosts.remove(host_id) {
            drop(handle);
        }
        Ok(())
    }

    pub fn renewal_window_days() -> i64 {
        RENEWAL_WINDOW_DAYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwarden_core::store::SqlitePersistence;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};

    #[tokio::test]
    async fn issued_token_is_accepted_once() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let server = ClusterServer::new(store, EventBus::new(8)).await.unwrap();
        let token = server.issue_enroll_token(60).await.unwrap();

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "agent");
        params.distinguished_name = dn;
        let csr = params.serialize_request(&key_pair).unwrap().pem().unwrap();

        let resp = server
            .handle_enroll(EnrollRequest {
                token: token.clone(),
                host_name: "host-a".to_string(),
                csr,
            })
            .await
            .unwrap();
        assert!(!resp.host_id.is_empty());

        let key_pair2 = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params2 = CertificateParams::new(Vec::new()).unwrap();
        let mut dn2 = DistinguishedName::new();
        dn2.push(DnType::CommonName, "agent");
        params2.distinguished_name = dn2;
        let csr2 = params2.serialize_request(&key_pair2).unwrap().pem().unwrap();

        let second = server
            .handle_enroll(EnrollRequest {
                token,
                host_name: "host-a".to_string(),
                csr: csr2,
            })
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let server = ClusterServer::new(store, EventBus::new(8)).await.unwrap();
        let result = server
            .handle_enroll(EnrollRequest {
                token: "nope".to_string(),
                host_name: "host-a".to_string(),
                csr: String::new(),
            })
            .await;
        assert!(matches!(result, Err(ClusterError::InvalidToken)));
    }

    #[tokio::test]
    async fn offline_host_command_fails_fast() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let server = ClusterServer::new(store, EventBus::new(8)).await.unwrap();
        let result = server.list_containers("nonexistent-host").await;
        assert!(matches!(result, Err(ClusterError::HostOffline(_))));
    }

    #[tokio::test]
    async fn non_positive_ttl_is_rejected() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let server = ClusterServer::new(store, EventBus::new(8)).await.unwrap();
        assert!(matches!(
            server.issue_enroll_token(0).await,
            Err(ClusterError::InvalidTtl(0))
        ));
        assert!(matches!(
            server.issue_enroll_token(-5).await,
            Err(ClusterError::InvalidTtl(-5))
        ));
    }

    #[tokio::test]
    async fn revoked_host_is_rejected_by_the_cache() {
        let store = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let server = ClusterServer::new(store, EventBus::new(8)).await.unwrap();
        assert!(!server.revocations.is_revoked("abc123"));
        server.revocations.record_revoked("abc123");
        assert!(server.reject_if_revoked("host-a", Some("abc123")).is_err());
        assert!(server.reject_if_revoked("host-a", Some("never-seen")).is_ok());
        assert!(server.reject_if_revoked("host-a", None).is_err());
    }
}
