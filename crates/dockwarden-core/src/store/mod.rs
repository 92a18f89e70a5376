//! Bucketed key-value persistence.
//!
//! The store is the single source of truth (§9.1): every persisted record — queue
//! entries, history, snapshots, cluster hosts, enrollment tokens, revoked certs,
//! settings — lives in a named "bucket" as an opaque JSON-encoded value under a
//! caller-chosen key. Consumers never reach around this trait to touch `sqlx`
//! directly; narrower read-only views over specific buckets are built on top of it
//! in the crates that own those entities (`dockwarden-engine`, `dockwarden-cluster`).

mod sqlite;

pub use sqlite::SqlitePersistence;

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Bucket names used across the system. Kept as constants rather than a closed enum
/// so that a bucket can be added without touching this trait.
pub mod buckets {
    pub const HISTORY: &str = "history";
    pub const QUEUE: &str = "queue";
    pub const SNAPSHOTS: &str = "snapshots";
    pub const POLICY_OVERRIDES: &str = "policy-overrides";
    pub const IGNORED_VERSIONS: &str = "ignored-versions";
    pub const RATE_LIMITS: &str = "rate-limits";
    pub const CLUSTER_HOSTS: &str = "cluster-hosts";
    pub const ENROLL_TOKENS: &str = "enroll-tokens";
    pub const REVOKED_CERTS: &str = "revoked-certs";
    pub const SETTINGS: &str = "settings";
    pub const GHCR_CACHE: &str = "ghcr-cache";
}

/// A single record as seen by bucket scans: the key it was stored under plus its
/// raw JSON bytes.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: String,
    pub value: Vec<u8>,
}

/// Capability trait for bucketed key-value persistence. The only thing in the
/// workspace that talks to `sqlx` directly is the concrete implementation of this
/// trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store a value under `bucket`/`key`, overwriting any existing value.
    async fn put_raw(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Fetch the raw value under `bucket`/`key`, if present.
    async fn get_raw(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the value under `bucket`/`key`. A no-op if absent.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// List every record in `bucket`, in key order.
    async fn list_raw(&self, bucket: &str) -> Result<Vec<RawRecord>>;

    /// Append-only log write: insert a new record with an auto-assigned ordinal key.
    /// Used for ring-bounded append logs (history) where callers never address a
    /// specific key. Returns the assigned key.
    async fn append_raw(&self, bucket: &str, value: Vec<u8>) -> Result<String>;
}

/// Typed convenience helpers layered over [`Store`]'s raw JSON byte operations.
#[async_trait]
pub trait StoreExt: Store {
    async fn put<T: Serialize + Sync>(&self, bucket: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put_raw(bucket, key, bytes).await
    }

    async fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<Option<T>> {
        match self.get_raw(bucket, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list<T: DeserializeOwned>(&self, bucket: &str) -> Result<Vec<(String, T)>> {
        let raw = self.list_raw(bucket).await?;
        raw.into_iter()
            .map(|r| Ok((r.key, serde_json::from_slice(&r.value)?)))
            .collect()
    }

    async fn append<T: Serialize + Sync>(&self, bucket: &str, value: &T) -> Result<String> {
        let bytes = serde_json::to_vec(value)?;
        self.append_raw(bucket, bytes).await
    }
}

impl<T: Store + ?Sized> StoreExt for T {}
