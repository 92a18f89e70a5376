//! Two-step bearer-token auth flow per the Docker distribution spec: a
//! `WWW-Authenticate` challenge yields a realm/service/scope, from which a token is
//! fetched and attached as `Authorization: Bearer <token>` on the retried request.

use serde_json::Value;
use std::time::Duration;

use dockwarden_core::error::CoreError;

/// A credential for a registry host, matched by a glob-free substring/suffix
/// pattern against the request's registry host (e.g. `ghcr.io`, `*.example.com`).
#[derive(Debug, Clone)]
pub struct RegistryCredential {
    pub host_pattern: String,
    pub username: String,
    pub secret: String,
}

/// Selects the credential whose pattern matches `host`, if any.
pub fn select_credential<'a>(
    host: &str,
    credentials: &'a [RegistryCredential],
) -> Option<&'a RegistryCredential> {
    credentials.iter().find(|c| host_matches(host, &c.host_pattern))
}

fn host_matches(host: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        host.ends_with(suffix)
    } else {
        host == pattern
    }
}

/// Parse a `WWW-Authenticate` header and fetch a bearer token for `scope`.
pub async fn fetch_bearer_token(
    client: &reqwest::Client,
    www_authenticate: &str,
    repository: &str,
    credential: Option<&RegistryCredential>,
) -> Result<String, CoreError> {
    let realm = capture(www_authenticate, r#"realm="([^"]+)""#)
        .ok_or_else(|| CoreError::auth_failure("WWW-Authenticate header missing realm"))?;
    let service = capture(www_authenticate, r#"service="([^"]+)""#).unwrap_or_default();

    let scope = format!("repository:{repository}:pull");
    let token_url = format!(
        "{realm}?service={}&scope={}",
        urlencoding::encode(&service),
        urlencoding::encode(&scope),
    );

    let mut request = client.get(&token_url);
    if let Some(cred) = credential {
        request = request.basic_auth(&cred.username, Some(&cred.secret));
    }

    let response = request
        .send()
        .await
        .map_err(|e| CoreError::transient(format!("token request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(CoreError::auth_failure(format!(
            "token endpoint returned {}",
            response.status()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| CoreError::transient(format!("token response not JSON: {e}")))?;

    body.get("token")
        .or_else(|| body.get("access_token"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::auth_failure("token response missing token field"))
}

fn capture(haystack: &str, pattern: &str) -> Option<String> {
    regex::Regex::new(pattern)
        .ok()?
        .captures(haystack)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Default timeout for every registry HTTP request (§5 resource model).
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_matches_exact_host() {
        let creds = vec![RegistryCredential {
            host_pattern: "ghcr.io".into(),
            username: "u".into(),
            secret: "s".into(),
        }];
        assert!(select_credential("ghcr.io", &creds).is_some());
        assert!(select_credential("docker.io", &creds).is_none());
    }

    #[test]
    fn credential_matches_wildcard_suffix() {
        let creds = vec![RegistryCredential {
            host_pattern: "*.example.com".into(),
            username: "u".into(),
            secret: "s".into(),
        }];
        assert!(select_credential("registry.example.com", &creds).is_some());
    }

    #[test]
    fn capture_extracts_realm_and_service() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#;
        assert_eq!(
            capture(header, r#"realm="([^"]+)""#).as_deref(),
            Some("https://auth.docker.io/token")
        );
        assert_eq!(
            capture(header, r#"service="([^"]+)""#).as_deref(),
            Some("registry.docker.io")
        );
    }
}
