//! Manifest and tag-list resolution against a v2-compatible registry.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, instrument};

use dockwarden_core::error::CoreError;

use crate::auth::{fetch_bearer_token, RegistryCredential, REGISTRY_TIMEOUT};
use crate::ratelimit::{parse_headers, RateLimitTracker};
use crate::reference::ImageReference;

const ACCEPT_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// A thin HTTPS client for registry manifest and tag-list lookups, honoring the
/// distribution-spec bearer-token challenge and recording rate-limit headers.
pub struct RegistryClient {
    http: reqwest::Client,
    rate_limits: RateLimitTracker,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REGISTRY_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            rate_limits: RateLimitTracker::new(),
        }
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.rate_limits
    }

    fn base_url(&self, registry: &str) -> String {
        if registry == "registry-1.docker.io" {
            "https://registry-1.docker.io".to_string()
        } else {
            format!("https://{registry}")
        }
    }

    /// Resolve the current content digest for `(image, tag)`, handling a
    /// `WWW-Authenticate` challenge transparently.
    #[instrument(skip(self, credential), fields(registry = %reference.registry, repository = %reference.repository))]
    pub async fn resolve_digest(
        &self,
        reference: &ImageReference,
        credential: Option<&RegistryCredential>,
    ) -> Result<String, CoreError> {
        let manifest_url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url(&reference.registry),
            reference.repository,
            reference.tag
        );

        let response = self
            .http
            .head(&manifest_url)
            .header("Accept", ACCEPT_MANIFEST)
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("manifest request failed: {e}")))?;

        if let Some(state) = parse_headers(response.headers(), Utc::now()) {
            self.rate_limits.record(&reference.registry, state);
        }

        let response = if response.status().as_u16() == 401 {
            let www_auth = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let token =
                fetch_bearer_token(&self.http, &www_auth, &reference.repository, credential)
                    .await?;

            self.http
                .head(&manifest_url)
                .header("Accept", ACCEPT_MANIFEST)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await
                .map_err(|e| CoreError::transient(format!("manifest request failed: {e}")))?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(CoreError::transient(format!(
                "manifest request returned {}",
                response.status()
            )));
        }

        response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::transient("manifest response missing content digest"))
    }

    /// List tags for a repository, filtered to those that parse as semver by the
    /// caller (this method returns the raw list; filtering is the caller's job via
    /// [`crate::semver_policy`]).
    #[instrument(skip(self, credential), fields(registry = %reference.registry, repository = %reference.repository))]
    pub async fn list_tags(
        &self,
        reference: &ImageReference,
        credential: Option<&RegistryCredential>,
    ) -> Result<Vec<String>, CoreError> {
        let tags_url = format!(
            "{}/v2/{}/tags/list",
            self.base_url(&reference.registry),
            reference.repository
        );

        let response = self
            .http
            .get(&tags_url)
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("tag list request failed: {e}")))?;

        let response = if response.status().as_u16() == 401 {
            let www_auth = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let token =
                fetch_bearer_token(&self.http, &www_auth, &reference.repository, credential)
                    .await?;

            self.http
                .get(&tags_url)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await
                .map_err(|e| CoreError::transient(format!("tag list request failed: {e}")))?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(CoreError::transient(format!(
                "tag list request returned {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct TagsResponse {
            tags: Vec<String>,
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| CoreError::transient(format!("tag list response not JSON: {e}")))?;

        debug!(tag_count = parsed.tags.len(), "fetched tag list");
        Ok(parsed.tags)
    }
}

/// Default per-hook/update timeout used elsewhere; kept here since it shares the
/// registry's notion of "how long is reasonable to wait".
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
