//! Parsing of Docker image references into registry/repository/tag-or-digest parts.

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// `Some` for a pinned digest reference (`name@sha256:...`); `None` otherwise.
    pub digest: Option<String>,
    /// The tag, defaulting to `"latest"` when absent. Still populated alongside a
    /// digest reference, since some registries require both in the manifest path.
    pub tag: String,
}

impl ImageReference {
    /// A digest reference always compares against the same reference: there is
    /// nothing to look up remotely.
    pub fn is_digest_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// `latest` tags are treated as digest-only: there is no version to bump, only
    /// a digest to refresh.
    pub fn is_latest_tag(&self) -> bool {
        self.tag == "latest"
    }

    /// Whether this reference points at an image built locally rather than
    /// pulled from any registry: a loopback registry host (`localhost`,
    /// `127.0.0.1`, or a `.local` name), the convention used by images that were
    /// `docker build -t`'d with no registry in their name. There's nothing
    /// upstream to compare against.
    pub fn is_local_only(&self) -> bool {
        let host = self.registry.split(':').next().unwrap_or(&self.registry);
        host == "localhost" || host == "127.0.0.1" || host.ends_with(".local")
    }
}

/// Parse an image reference of the shape accepted by `docker pull`, e.g.
/// `nginx`, `nginx:1.25`, `nginx@sha256:...`, `ghcr.io/org/repo:tag`.
pub fn parse_image_reference(image_ref: &str) -> ImageReference {
    let mut reference = image_ref.trim().to_string();

    let digest = reference.find("@sha256:").map(|pos| {
        let digest = reference[pos + 1..].to_string();
        reference.truncate(pos);
        digest
    });

    let mut registry = "registry-1.docker.io".to_string();
    let mut tag = "latest".to_string();

    let last_colon = reference.rfind(':');
    let last_slash = reference.rfind('/');

    if let Some(colon_pos) = last_colon {
        let slash_pos = last_slash.unwrap_or(0);
        if colon_pos > slash_pos {
            tag = reference[colon_pos + 1..].to_string();
            reference.truncate(colon_pos);
        }
    }

    let parts: Vec<&str> = reference.split('/').collect();
    let repository = if parts.len() >= 2
        && (parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost")
    {
        registry = parts[0].to_string();
        parts[1..].join("/")
    } else if parts.len() == 1 {
        format!("library/{}", parts[0])
    } else {
        reference
    };

    ImageReference {
        registry,
        repository,
        digest,
        tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_docker_hub_library() {
        let r = parse_image_reference("nginx");
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.digest, None);
    }

    #[test]
    fn tagged_hub_image_keeps_user_namespace() {
        let r = parse_image_reference("gitea/gitea:1.20.0");
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "gitea/gitea");
        assert_eq!(r.tag, "1.20.0");
    }

    #[test]
    fn third_party_registry_with_port_is_recognised() {
        let r = parse_image_reference("registry.example.com:5000/team/app:v2");
        assert_eq!(r.registry, "registry.example.com:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn digest_pinned_reference_is_captured_and_tag_defaults() {
        let r = parse_image_reference("nginx:1.25@sha256:aaaa");
        assert_eq!(r.tag, "1.25");
        assert_eq!(r.digest.as_deref(), Some("sha256:aaaa"));
        assert!(r.is_digest_pinned());
    }

    #[test]
    fn latest_tag_is_detected() {
        let r = parse_image_reference("redis");
        assert!(r.is_latest_tag());
    }

    #[test]
    fn localhost_reference_is_local_only() {
        let r = parse_image_reference("localhost/my-build:dev");
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "my-build");
        assert!(r.is_local_only());
    }

    #[test]
    fn hub_reference_is_not_local_only() {
        let r = parse_image_reference("nginx:1.25");
        assert!(!r.is_local_only());
    }
}
