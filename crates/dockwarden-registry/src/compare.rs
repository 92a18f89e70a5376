//! The registry comparator: given a running container's image reference and
//! digest, decide whether an update is available and how to classify it.

use dockwarden_core::error::CoreError;

use crate::auth::RegistryCredential;
use crate::manifest::RegistryClient;
use crate::reference::{parse_image_reference, ImageReference};
use crate::semver_policy::newer_versions;

/// How an available update was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// Same tag, new digest.
    DigestOnly { new_digest: String },
    /// A strictly greater semver tag exists upstream.
    NewerVersion {
        current_version: String,
        newer_versions: Vec<String>,
    },
}

/// Outcome of comparing a running container against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareResult {
    NoUpdate,
    UpdateAvailable(UpdateKind),
}

/// Compare a running image reference/digest against the registry.
///
/// Edge cases per the spec: digest-pinned references always compare against the
/// same reference (no lookup possible, so this short-circuits to `NoUpdate`);
/// `latest` tags are treated as digest-only (no semver tag comparison is
/// meaningful for them).
pub async fn compare(
    client: &RegistryClient,
    image_ref: &str,
    current_digest: &str,
    credential: Option<&RegistryCredential>,
) -> Result<CompareResult, CoreError> {
    let reference = parse_image_reference(image_ref);

    if reference.is_local_only() {
        return Ok(CompareResult::NoUpdate);
    }

    if reference.is_digest_pinned() {
        return Ok(CompareResult::NoUpdate);
    }

    if reference.is_latest_tag() {
        return compare_digest_only(client, &reference, current_digest, credential).await;
    }

    // Try a version comparison first: if the current tag parses as semver and the
    // registry has a strictly greater tag, that's the more informative result.
    if let Ok(tags) = client.list_tags(&reference, credential).await {
        let candidates = newer_versions(&reference.tag, &tags);
        if !candidates.is_empty() {
            return Ok(CompareResult::UpdateAvailable(UpdateKind::NewerVersion {
                current_version: reference.tag.clone(),
                newer_versions: candidates,
            }));
        }
    }

    compare_digest_only(client, &reference, current_digest, credential).await
}

async fn compare_digest_only(
    client: &RegistryClient,
    reference: &ImageReference,
    current_digest: &str,
    credential: Option<&RegistryCredential>,
) -> Result<CompareResult, CoreError> {
    let remote_digest = client.resolve_digest(reference, credential).await?;
    if remote_digest == current_digest {
        Ok(CompareResult::NoUpdate)
    } else {
        Ok(CompareResult::UpdateAvailable(UpdateKind::DigestOnly {
            new_digest: remote_digest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn digest_pinned_reference_short_circuits_to_no_update() {
        let client = RegistryClient::new();
        let result = compare(&client, "nginx@sha256:aaa", "sha256:aaa", None)
            .await
            .unwrap();
        assert_eq!(result, CompareResult::NoUpdate);
    }

    #[tokio::test]
    async fn local_only_image_short_circuits_to_no_update() {
        let client = RegistryClient::new();
        let result = compare(&client, "localhost/my-build:dev", "sha256:aaa", None)
            .await
            .unwrap();
        assert_eq!(result, CompareResult::NoUpdate);
    }
}
