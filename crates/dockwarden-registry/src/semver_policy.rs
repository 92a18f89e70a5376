//! Semver-based "newer version" discovery.
//!
//! Tags that fail to parse as semver are ignored. Only strictly greater versions
//! count as newer. Pre-release tags are eligible only when the current version is
//! itself a pre-release of the same `major.minor.patch` base (decided in
//! DESIGN.md's Open Question 2).

use semver::Version;

/// Parse `tag` as a semver version, tolerating a leading `v` (a very common tag
/// convention, e.g. `v1.20.0`) that the `semver` crate itself rejects.
pub fn parse_tag(tag: &str) -> Option<Version> {
    let normalized = tag.strip_prefix('v').unwrap_or(tag);
    Version::parse(normalized).ok()
}

/// Returns every tag in `tags` whose parsed version is strictly greater than
/// `current`, sorted newest first. Unparseable tags are ignored. Pre-release
/// candidates are filtered out unless `current` is itself a pre-release sharing
/// the same `major.minor.patch`.
pub fn newer_versions(current: &str, tags: &[String]) -> Vec<String> {
    let Some(current_version) = parse_tag(current) else {
        return Vec::new();
    };

    let mut candidates: Vec<(Version, String)> = tags
        .iter()
        .filter_map(|tag| parse_tag(tag).map(|v| (v, tag.clone())))
        .filter(|(v, _)| v > &current_version)
        .filter(|(v, _)| pre_release_eligible(&current_version, v))
        .collect();

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.into_iter().map(|(_, tag)| tag).collect()
}

fn pre_release_eligible(current: &Version, candidate: &Version) -> bool {
    if candidate.pre.is_empty() {
        return true;
    }
    current.major == candidate.major
        && current.minor == candidate.minor
        && current.patch == candidate.patch
        && !current.pre.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn returns_only_strictly_greater_sorted_newest_first() {
        let result = newer_versions("1.20.0", &tags(&["1.20.0", "1.20.1", "1.21.0", "not-semver"]));
        assert_eq!(result, vec!["1.21.0".to_string(), "1.20.1".to_string()]);
    }

    #[test]
    fn unparseable_current_yields_no_candidates() {
        let result = newer_versions("latest", &tags(&["1.0.0"]));
        assert!(result.is_empty());
    }

    #[test]
    fn stable_current_never_surfaces_prerelease() {
        let result = newer_versions("2.3.0", &tags(&["2.4.0-rc1", "2.3.1"]));
        assert_eq!(result, vec!["2.3.1".to_string()]);
    }

    #[test]
    fn prerelease_current_surfaces_prerelease_of_same_base() {
        let result = newer_versions("2.3.0-rc1", &tags(&["2.3.0-rc2", "2.3.0", "2.4.0-rc1"]));
        assert_eq!(
            result,
            vec!["2.3.0".to_string(), "2.3.0-rc2".to_string()]
        );
    }

    #[test]
    fn leading_v_prefix_is_tolerated() {
        assert_eq!(parse_tag("v1.2.3").unwrap().to_string(), "1.2.3");
    }
}
