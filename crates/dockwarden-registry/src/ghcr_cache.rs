//! Cache of whether a Docker Hub image has a known GHCR mirror, to cut down on
//! repeated failed lookups against `ghcr.io` for images that never published one.
//!
//! A small hand-maintained table of well-known mirrors is consulted first; the
//! result of an actual registry probe is cached for 24 hours either way.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use dockwarden_core::error::CoreError;
use dockwarden_core::store::{buckets, Store, StoreExt};

const CACHE_TTL_HOURS: i64 = 24;

/// Well-known Docker Hub -> GHCR repository mappings, checked before ever
/// touching the network. Keyed by the Docker Hub repository (e.g. `library/nginx`).
const KNOWN_MIRRORS: &[(&str, &str)] = &[
    ("linuxserver/", "linuxserver/"), // linuxserver.io images mirror 1:1 under ghcr.io/linuxserver
    ("home-assistant/home-assistant", "home-assistant/core"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    ghcr_repository: Option<String>,
    checked_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.checked_at < ChronoDuration::hours(CACHE_TTL_HOURS)
    }
}

/// Look up whether `hub_repository` (e.g. `library/nginx`) has a GHCR
/// alternative, consulting the cache before falling back to `probe`.
///
/// `probe` is called only on a cache miss or expiry; it should return the GHCR
/// repository name if one exists, `None` if a probe confirmed none does.
pub async fn ghcr_alternative<S, F, Fut>(
    store: &S,
    hub_repository: &str,
    now: DateTime<Utc>,
    probe: F,
) -> Result<Option<String>, CoreError>
where
    S: Store + ?Sized,
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<Option<String>, CoreError>>,
{
    if let Some((hub_prefix, mirror)) = KNOWN_MIRRORS
        .iter()
        .find(|(hub_prefix, _)| hub_repository.starts_with(hub_prefix))
    {
        return Ok(Some(format!("{}{}", mirror, &hub_repository[hub_prefix.len()..])));
    }

    if let Some(cached) = store
        .get::<CacheEntry>(buckets::GHCR_CACHE, hub_repository)
        .await?
    {
        if cached.is_fresh(now) {
            return Ok(cached.ghcr_repository);
        }
    }

    let result = probe(hub_repository.to_string()).await?;
    store
        .put(
            buckets::GHCR_CACHE,
            hub_repository,
            &CacheEntry {
                ghcr_repository: result.clone(),
                checked_at: now,
            },
        )
        .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwarden_core::store::SqlitePersistence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn known_mirror_short_circuits_without_probing() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = ghcr_alternative(&store, "linuxserver/sonarr", Utc::now(), move |_| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await
        .unwrap();

        assert_eq!(result.as_deref(), Some("linuxserver/sonarr"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_is_probed_once_then_cached() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        for _ in 0..2 {
            let calls_clone = calls.clone();
            let result = ghcr_alternative(&store, "library/redis", now, move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("redis-org/redis-ghcr".to_string()))
                }
            })
            .await
            .unwrap();
            assert_eq!(result.as_deref(), Some("redis-org/redis-ghcr"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_reprobed() {
        let store = SqlitePersistence::in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        {
            let calls_clone = calls.clone();
            ghcr_alternative(&store, "library/caddy", now, move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .await
            .unwrap();
        }

        let later = now + ChronoDuration::hours(25);
        let calls_clone = calls.clone();
        ghcr_alternative(&store, "library/caddy", later, move |_| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
