// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster root certificate authority: a self-signed ECDSA P-256 root that signs
//! agent leaf certificates from CSRs, plus a revoked-serial set backed by the
//! store.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType, Issuer,
    KeyPair, PKCS_ECDSA_P256_SHA256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dockwarden_core::error::Result as CoreResult;
use dockwarden_core::store::{buckets, Store, StoreExt};

#[derive(Debug, Error)]
pub enum CaError {
    #[error("certificate generation failed: {0}")]
    Generation(String),
    #[error("csr parse failed: {0}")]
    InvalidCsr(String),
    #[error("serial already revoked: {0}")]
    AlreadyRevoked(String),
}

/// The cluster root, persisted once and reused for every leaf signature. The
/// private key never leaves the server process.
pub struct ClusterCa {
    key_pair: KeyPair,
    cert_pem: String,
    params: CertificateParams,
}

/// Durable representation of the CA, the only thing written to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCa {
    key_pem: String,
    cert_pem: String,
}

const CA_KEY: &str = "root";
/// Agents renew when their cert has fewer than this many days left.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;
const LEAF_VALIDITY_DAYS: i64 = 397;
const CA_VALIDITY_DAYS: i64 = 3650;

impl ClusterCa {
    /// Load the persisted root, or generate and persist a new one if none exists.
    pub async fn load_or_generate<S: Store + ?Sized>(store: &S) -> CoreResult<Self> {
        if let Some(stored) = store.get::<StoredCa>(buckets::SETTINGS, CA_KEY).await? {
            return Ok(Self::from_stored(stored).map_err(to_core_error)?);
        }
        let ca = Self::generate().map_err(to_core_error)?;
        let stored = StoredCa {
            key_pem: ca.key_pair.serialize_pem(),
            cert_pem: ca.cert_pem.clone(),
        };
        store.put(buckets::SETTINGS, CA_KEY, &stored).await?;
        Ok(ca)
    }

    fn generate() -> Result<Self, CaError> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut params = CertificateParams::new(Vec::new())
            .map_err(|e| CaError::Generation(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "dockwarden cluster root");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Constrained(0));
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = (Utc::now() + ChronoDuration::days(CA_VALIDITY_DAYS))
            .try_into()
            .map_err(|_| CaError::Generation("invalid validity period".to_string()))?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::Generation(e.to_string()))?;
        let cert_pem = cert.pem();

        Ok(Self {
            key_pair,
            cert_pem,
            params,
        })
    }

    fn from_stored(stored: StoredCa) -> Result<Self, CaError> {
        let key_pair =
            KeyPair::from_pem(&stored.key_pem).map_err(|e| CaError::Generation(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "dockwarden cluster root");
        let mut params = CertificateParams::new(Vec::new())
            .map_err(|e| CaError::Generation(e.to_string()))?;
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Constrained(0));
        Ok(Self {
            key_pair,
            cert_pem: stored.cert_pem,
            params,
        })
    }

    /// The root CA certificate, PEM-encoded, handed to every agent at enrollment.
    pub fn ca_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Sign a CSR into a leaf certificate for a host, identified by `host_id` as
    /// the certificate's common name and serial lookup key.
    pub fn sign_csr(&self, csr_pem: &str, host_id: &str) -> Result<SignedLeaf, CaError> {
        let csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| CaError::InvalidCsr(e.to_string()))?;

        let issuer = Issuer::new(self.params.clone(), &self.key_pair);
        let now = Utc::now();
        let not_after = now + ChronoDuration::days(LEAF_VALIDITY_DAYS);

        let mut csr = csr;
        csr.params.not_before = now
            .try_into()
            .map_err(|_| CaError::Generation("invalid not_before".to_string()))?;
        csr.params.not_after = not_after
            .try_into()
            .map_err(|_| CaError::Generation("invalid not_after".to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host_id);
        csr.params.distinguished_name = dn;

        let cert = csr
            .signed_by(&issuer)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        Ok(SignedLeaf {
            cert_pem: cert.pem(),
            serial: cert.params().serial_number.clone().map(|s| s.to_string()).unwrap_or_default(),
            not_after,
        })
    }
}

pub struct SignedLeaf {
    pub cert_pem: String,
    pub serial: String,
    pub not_after: DateTime<Utc>,
}

impl ClusterCa {
    /// Generate a fresh keypair and sign a leaf certificate for it in one step.
    /// Used for the server's own TLS identity, which is signed by the same root
    /// that signs every agent so a single `ca_cert_pem()` verifies both sides.
    pub fn issue_leaf(&self, common_name: &str) -> Result<(SignedLeaf, KeyPair), CaError> {
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::Generation(e.to_string()))?;
        let mut params = CertificateParams::new(Vec::new())
            .map_err(|e| CaError::Generation(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "placeholder");
        params.distinguished_name = dn;
        let csr_pem = params
            .serialize_request(&key_pair)
            .map_err(|e| CaError::Generation(e.to_string()))?
            .pem()
            .map_err(|e| CaError::Generation(e.to_string()))?;
        let leaf = self.sign_csr(&csr_pem, common_name)?;
        Ok((leaf, key_pair))
    }
}

/// Revoke a certificate serial, rejecting a double revocation.
pub async fn revoke<S: Store + ?Sized>(store: &S, serial: &str) -> CoreResult<()> {
    if store
        .get::<bool>(buckets::REVOKED_CERTS, serial)
        .await?
        .is_some()
    {
        return Err(to_core_error(CaError::AlreadyRevoked(serial.to_string())));
    }
    store.put(buckets::REVOKED_CERTS, serial, &true).await
}

pub async fn is_revoked<S: Store + ?Sized>(store: &S, serial: &str) -> CoreResult<bool> {
    Ok(store
        .get::<bool>(buckets::REVOKED_CERTS, serial)
        .await?
        .unwrap_or(false))
}

/// In-memory snapshot of revoked certificate serials, consulted synchronously
/// from the TLS handshake's client-cert verifier, where no async store lookup
/// is possible. A cache that has never refreshed, or whose last refresh
/// failed, reports every serial as revoked: a store outage must fail closed,
/// not silently admit a revoked agent.
#[derive(Debug, Default)]
pub struct RevocationCache {
    revoked: DashSet<String>,
    healthy: AtomicBool,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the full revoked-serial set from the store. A failed reload marks
    /// the cache unhealthy immediately, even if a previous refresh had
    /// succeeded: a stale "healthy" snapshot is exactly what lets a
    /// newly-revoked agent slip through while the store is unreachable.
    pub async fn refresh<S: Store + ?Sized>(&self, store: &S) -> CoreResult<()> {
        let entries = match store.list::<bool>(buckets::REVOKED_CERTS).await {
            Ok(entries) => entries,
            Err(e) => {
                self.healthy.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.revoked.clear();
        for (serial, _) in entries {
            self.revoked.insert(serial);
        }
        self.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Record a just-revoked serial without waiting for the next refresh.
    pub fn record_revoked(&self, serial: &str) {
        self.revoked.insert(serial.to_string());
    }

    /// Whether `serial` must be treated as revoked: either it's in the set, or
    /// the cache itself is untrustworthy (no successful refresh yet).
    pub fn is_revoked(&self, serial: &str) -> bool {
        !self.healthy.load(Ordering::SeqCst) || self.revoked.contains(serial)
    }
}

fn to_core_error(err: CaError) -> dockwarden_core::error::CoreError {
    dockwarden_core::error::CoreError::fatal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwarden_core::store::SqlitePersistence;

    #[tokio::test]
    async fn generated_ca_is_persisted_and_reloaded() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let ca = ClusterCa::load_or_generate(&store).await.unwrap();
        let pem_a = ca.ca_cert_pem().to_string();

        let reloaded = ClusterCa::load_or_generate(&store).await.unwrap();
        assert_eq!(pem_a, reloaded.ca_cert_pem());
    }

    #[tokio::test]
    async fn sign_csr_produces_a_leaf_with_host_cn() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let ca = ClusterCa::load_or_generate(&store).await.unwrap();

        let agent_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "placeholder");
        params.distinguished_name = dn;
        let csr_pem = params.serialize_request(&agent_key).unwrap().pem().unwrap();

        let leaf = ca.sign_csr(&csr_pem, "host-a").unwrap();
        assert!(leaf.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(!leaf.serial.is_empty());
    }

    #[tokio::test]
    async fn revoke_rejects_double_revocation() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        revoke(&store, "abc123").await.unwrap();
        assert!(is_revoked(&store, "abc123").await.unwrap());
        assert!(revoke(&store, "abc123").await.is_err());
    }

    #[tokio::test]
    async fn unrevoked_serial_reports_false() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        assert!(!is_revoked(&store, "never-seen").await.unwrap());
    }

    #[test]
    fn revocation_cache_fails_closed_before_first_refresh() {
        let cache = RevocationCache::new();
        assert!(cache.is_revoked("anything"));
    }

    #[tokio::test]
    async fn revocation_cache_reflects_store_after_refresh() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        revoke(&store, "abc123").await.unwrap();

        let cache = RevocationCache::new();
        cache.refresh(&store).await.unwrap();
        assert!(cache.is_revoked("abc123"));
        assert!(!cache.is_revoked("never-seen"));
    }

    #[tokio::test]
    async fn revocation_cache_records_without_waiting_for_refresh() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let cache = RevocationCache::new();
        cache.refresh(&store).await.unwrap();

        cache.record_revoked("fresh");
        assert!(cache.is_revoked("fresh"));
        assert!(!cache.is_revoked("untouched"));
    }
}
