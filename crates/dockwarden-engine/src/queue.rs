//! The pending-update queue: an ordered set keyed by (host-id, container-name),
//! persisted as a single blob and consulted by the notification layer to suppress
//! repeat notifications for the same (name, remote-digest) pair.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockwarden_core::error::Result;
use dockwarden_core::events::{Event, EventBus};
use dockwarden_core::store::{buckets, Store, StoreExt};
use dockwarden_registry::UpdateKind;

const QUEUE_KEY: &str = "pending";

/// A single queued candidate update, awaiting approval or auto-application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub host_id: String,
    pub container_name: String,
    pub current_image: String,
    pub current_digest: String,
    pub remote_digest: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub newer_versions: Vec<String>,
    pub current_version: Option<String>,
    pub target_version: Option<String>,
    pub kind: QueuedKind,
    pub host_name: String,
    pub approved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedKind {
    Digest,
    Version,
}

impl PendingUpdate {
    fn key(&self) -> String {
        format!("{}/{}", self.host_id, self.container_name)
    }

    /// The identity used to suppress repeat notifications: same container, same
    /// remote digest already notified about.
    pub fn notification_identity(&self) -> (String, Option<String>) {
        (self.container_name.clone(), self.remote_digest.clone())
    }

    /// Reconstruct the comparator result this entry was queued from, so an
    /// operator's approval can be applied without re-running the comparator.
    pub fn to_update_kind(&self) -> Option<UpdateKind> {
        match self.kind {
            QueuedKind::Digest => Some(UpdateKind::DigestOnly {
                new_digest: self.remote_digest.clone()?,
            }),
            QueuedKind::Version => Some(UpdateKind::NewerVersion {
                current_version: self.current_version.clone()?,
                newer_versions: self.newer_versions.clone(),
            }),
        }
    }

    pub fn from_compare(
        host_id: &str,
        host_name: &str,
        container_name: &str,
        current_image: &str,
        current_digest: &str,
        kind: &UpdateKind,
        now: DateTime<Utc>,
    ) -> Self {
        match kind {
            UpdateKind::DigestOnly { new_digest } => PendingUpdate {
                host_id: host_id.to_string(),
                container_name: container_name.to_string(),
                current_image: current_image.to_string(),
                current_digest: current_digest.to_string(),
                remote_digest: Some(new_digest.clone()),
                detected_at: now,
                newer_versions: Vec::new(),
                current_version: None,
                target_version: None,
                kind: QueuedKind::Digest,
                host_name: host_name.to_string(),
                approved: false,
            },
            UpdateKind::NewerVersion {
                current_version,
                newer_versions,
            } => PendingUpdate {
                host_id: host_id.to_string(),
                container_name: container_name.to_string(),
                current_image: current_image.to_string(),
                current_digest: current_digest.to_string(),
                remote_digest: None,
                detected_at: now,
                newer_versions: newer_versions.clone(),
                current_version: Some(current_version.clone()),
                target_version: newer_versions.first().cloned(),
                kind: QueuedKind::Version,
                host_name: host_name.to_string(),
                approved: false,
            },
        }
    }
}

/// Ordered set of pending updates, persisted as a single blob under one key so
/// writes are serialized (the store trait offers no cross-key transaction).
pub struct Queue<S: ?Sized> {
    store: Arc<S>,
    events: EventBus,
}

impl<S: Store + ?Sized> Queue<S> {
    pub fn new(store: Arc<S>, events: EventBus) -> Self {
        Self { store, events }
    }

    async fn load(&self) -> Result<Vec<PendingUpdate>> {
        Ok(self
            .store
            .get::<Vec<PendingUpdate>>(buckets::QUEUE, QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, items: &[PendingUpdate]) -> Result<()> {
        self.store.put(buckets::QUEUE, QUEUE_KEY, &items).await
    }

    pub async fn list(&self) -> Result<Vec<PendingUpdate>> {
        self.load().await
    }

    pub async fn get(&self, host_id: &str, container_name: &str) -> Result<Option<PendingUpdate>> {
        let items = self.load().await?;
        Ok(items
            .into_iter()
            .find(|u| u.host_id == host_id && u.container_name == container_name))
    }

    /// Insert or replace the entry for this `(host_id, container_name)`.
    pub async fn add(&self, update: PendingUpdate) -> Result<()> {
        let mut items = self.load().await?;
        let key = update.key();
        items.retain(|u| u.key() != key);
        items.push(update);
        self.save(&items).await?;
        self.publish_queue_change().await;
        Ok(())
    }

    /// Mark an entry approved and return it.
    pub async fn approve(&self, host_id: &str, container_name: &str) -> Result<Option<PendingUpdate>> {
        let mut items = self.load().await?;
        let mut approved = None;
        for item in items.iter_mut() {
            if item.host_id == host_id && item.container_name == container_name {
                item.approved = true;
                approved = Some(item.clone());
            }
        }
        self.save(&items).await?;
        if approved.is_some() {
            self.publish_queue_change().await;
        }
        Ok(approved)
    }

    pub async fn remove(&self, host_id: &str, container_name: &str) -> Result<()> {
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|u| !(u.host_id == host_id && u.container_name == container_name));
        if items.len() != before {
            self.save(&items).await?;
            self.publish_queue_change().await;
        }
        Ok(())
    }

    async fn publish_queue_change(&self) {
        self.events
            .publish(Event::new(
                dockwarden_core::events::EventKind::QueueChange,
                Utc::now(),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwarden_core::store::SqlitePersistence;

    fn sample(container_name: &str) -> PendingUpdate {
        PendingUpdate {
            host_id: "local".to_string(),
            container_name: container_name.to_string(),
            current_image: "nginx:1.25".to_string(),
            current_digest: "sha256:aaa".to_string(),
            remote_digest: Some("sha256:bbb".to_string()),
            detected_at: Utc::now(),
            newer_versions: Vec::new(),
            current_version: None,
            target_version: None,
            kind: QueuedKind::Digest,
            host_name: "local".to_string(),
            approved: false,
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let queue = Queue::new(Arc::new(store), EventBus::new(8));
        queue.add(sample("web")).await.unwrap();
        let fetched = queue.get("local", "web").await.unwrap().unwrap();
        assert_eq!(fetched.current_image, "nginx:1.25");
    }

    #[tokio::test]
    async fn add_is_upsert_by_key() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let queue = Queue::new(Arc::new(store), EventBus::new(8));
        queue.add(sample("web")).await.unwrap();
        let mut second = sample("web");
        second.remote_digest = Some("sha256:ccc".to_string());
        queue.add(second).await.unwrap();

        let all = queue.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_digest.as_deref(), Some("sha256:ccc"));
    }

    #[tokio::test]
    async fn approve_sets_flag_and_remove_deletes() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let queue = Queue::new(Arc::new(store), EventBus::new(8));
        queue.add(sample("web")).await.unwrap();

        let approved = queue.approve("local", "web").await.unwrap().unwrap();
        assert!(approved.approved);

        queue.remove("local", "web").await.unwrap();
        assert!(queue.get("local", "web").await.unwrap().is_none());
    }
}
