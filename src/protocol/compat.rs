//! Version and plugin compatibility negotiation.
//!
//! # Rules
//! - The peer must report both a version and a plugin list, otherwise sync is
//!   suspended with an `Unknown` status.
//! - Majors must match and the peer minor must lie in `[cp_minor - 2, cp_minor]`.
//! - The peer plugin set must be a superset of the control plane's. Plugins
//!   present on both sides must agree on `major.minor` when both carry a version.
//!
//! # Design Decisions
//! - Pure function, re-evaluated before every push
//! - Plugin lists are compared with two cursors walking from the end of both
//!   name-sorted lists

use crate::protocol::types::{PluginDescriptor, SyncStatus};

/// How many minor versions a data plane may lag behind its control plane.
pub const MAX_MINOR_LAG: u64 = 2;

/// Outcome of a compatibility evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    pub ok: bool,
    pub reason: Option<String>,
    pub status: SyncStatus,
}

impl Compatibility {
    fn compatible() -> Self {
        Self {
            ok: true,
            reason: None,
            status: SyncStatus::Normal,
        }
    }

    fn incompatible(status: SyncStatus, reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            status,
        }
    }
}

/// Extract `(major, minor)` from a version string such as `2.8.1` or `3.0.0-rc1`.
pub fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = leading_number(parts.next()?)?;
    let minor = leading_number(parts.next()?)?;
    Some((major, minor))
}

fn leading_number(part: &str) -> Option<u64> {
    let digits: &str = part
        .find(|c: char| !c.is_ascii_digit())
        .map_or(part, |end| &part[..end]);
    digits.parse().ok()
}

/// Compare control plane and data plane metadata.
///
/// `cp_plugins` and `dp_plugins` must both be sorted ascending by name.
pub fn evaluate(
    cp_version: &str,
    cp_plugins: &[PluginDescriptor],
    dp_version: Option<&str>,
    dp_plugins: Option<&[PluginDescriptor]>,
) -> Compatibility {
    let (dp_version, dp_plugins) = match (dp_version, dp_plugins) {
        (Some(version), Some(plugins)) => (version, plugins),
        _ => {
            return Compatibility::incompatible(
                SyncStatus::Unknown,
                "no version information".to_string(),
            )
        }
    };

    if let Some(verdict) = check_versions(cp_version, dp_version) {
        return verdict;
    }

    check_plugins(cp_plugins, dp_plugins)
}

fn check_versions(cp_version: &str, dp_version: &str) -> Option<Compatibility> {
    let Some((cp_major, cp_minor)) = major_minor(cp_version) else {
        return Some(Compatibility::incompatible(
            SyncStatus::VersionIncompatible,
            format!("control plane version '{}' is not parseable", cp_version),
        ));
    };
    let Some((dp_major, dp_minor)) = major_minor(dp_version) else {
        return Some(Compatibility::incompatible(
            SyncStatus::VersionIncompatible,
            format!("data plane version '{}' is not parseable", dp_version),
        ));
    };

    if cp_major != dp_major {
        return Some(Compatibility::incompatible(
            SyncStatus::VersionIncompatible,
            format!(
                "data plane major version {} differs from control plane major version {}",
                dp_major, cp_major
            ),
        ));
    }

    if dp_minor > cp_minor {
        return Some(Compatibility::incompatible(
            SyncStatus::VersionIncompatible,
            format!(
                "data plane version {} is newer than control plane version {}",
                dp_version, cp_version
            ),
        ));
    }

    if dp_minor + MAX_MINOR_LAG < cp_minor {
        return Some(Compatibility::incompatible(
            SyncStatus::VersionIncompatible,
            format!(
                "data plane version {} is more than {} minor versions behind control plane version {}",
                dp_version, MAX_MINOR_LAG, cp_version
            ),
        ));
    }

    None
}

fn check_plugins(cp_plugins: &[PluginDescriptor], dp_plugins: &[PluginDescriptor]) -> Compatibility {
    let mut i = cp_plugins.len();
    let mut j = dp_plugins.len();

    while i > 0 && j > 0 {
        let cp = &cp_plugins[i - 1];
        let dp = &dp_plugins[j - 1];

        if cp.name == dp.name {
            // a version without a parseable major.minor counts as no version
            let cp_v = cp.version.as_deref().filter(|v| major_minor(v).is_some());
            let dp_v = dp.version.as_deref().filter(|v| major_minor(v).is_some());
            if let (Some(cp_v), Some(dp_v)) = (cp_v, dp_v) {
                if major_minor(cp_v) != major_minor(dp_v) {
                    return Compatibility::incompatible(
                        SyncStatus::PluginVersionIncompatible,
                        format!(
                            "data plane plugin {} version {} differs from control plane version {}",
                            cp.name, dp_v, cp_v
                        ),
                    );
                }
            }
            i -= 1;
            j -= 1;
        } else if cp.name < dp.name {
            // extra plugin on the data plane
            j -= 1;
        } else {
            break;
        }
    }

    if i > 0 {
        return Compatibility::incompatible(
            SyncStatus::PluginSetIncompatible,
            format!(
                "data plane is missing plugin {} installed on the control plane",
                cp_plugins[i - 1].name
            ),
        );
    }

    Compatibility::compatible()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugins(list: &[(&str, Option<&str>)]) -> Vec<PluginDescriptor> {
        let mut out: Vec<_> = list
            .iter()
            .map(|(name, version)| PluginDescriptor::new(*name, *version))
            .collect();
        crate::protocol::types::sort_plugins(&mut out);
        out
    }

    fn versions_only(cp: &str, dp: &str) -> Compatibility {
        evaluate(cp, &[], Some(dp), Some(&[]))
    }

    #[test]
    fn parses_major_minor() {
        assert_eq!(major_minor("2.8.0"), Some((2, 8)));
        assert_eq!(major_minor("3.10.1.0-enterprise"), Some((3, 10)));
        assert_eq!(major_minor("3.0-rc1"), Some((3, 0)));
        assert_eq!(major_minor("3"), None);
        assert_eq!(major_minor("x.y"), None);
    }

    #[test]
    fn two_minor_lag_is_the_boundary() {
        assert!(versions_only("2.8.0", "2.8.3").ok);
        assert!(versions_only("2.8.0", "2.7.0").ok);
        assert!(versions_only("2.8.0", "2.6.0").ok);

        let too_old = versions_only("2.8.0", "2.5.0");
        assert!(!too_old.ok);
        assert_eq!(too_old.status, SyncStatus::VersionIncompatible);
    }

    #[test]
    fn newer_minor_or_other_major_is_rejected() {
        assert_eq!(
            versions_only("2.8.0", "2.9.0").status,
            SyncStatus::VersionIncompatible
        );
        assert_eq!(
            versions_only("2.8.0", "3.8.0").status,
            SyncStatus::VersionIncompatible
        );
        assert_eq!(
            versions_only("3.1.0", "2.9.0").status,
            SyncStatus::VersionIncompatible
        );
    }

    #[test]
    fn low_minor_does_not_underflow() {
        assert!(versions_only("3.0.0", "3.0.0").ok);
        assert!(versions_only("3.1.0", "3.0.0").ok);
    }

    #[test]
    fn missing_peer_metadata_suspends() {
        let verdict = evaluate("2.8.0", &[], None, Some(&[]));
        assert!(!verdict.ok);
        assert_eq!(verdict.status, SyncStatus::Unknown);
        assert_eq!(verdict.reason.as_deref(), Some("no version information"));

        let verdict = evaluate("2.8.0", &[], Some("2.8.0"), None);
        assert_eq!(verdict.status, SyncStatus::Unknown);
    }

    #[test]
    fn missing_plugin_is_plugin_set_incompatible() {
        let cp = plugins(&[("acl", None), ("key-auth", None), ("rate-limiting", None)]);
        let dp = plugins(&[("acl", None), ("rate-limiting", None)]);
        let verdict = evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp));
        assert_eq!(verdict.status, SyncStatus::PluginSetIncompatible);
        assert!(verdict.reason.unwrap().contains("key-auth"));
    }

    #[test]
    fn missing_first_plugin_is_detected() {
        let cp = plugins(&[("acl", None), ("cors", None)]);
        let dp = plugins(&[("cors", None), ("zipkin", None)]);
        let verdict = evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp));
        assert_eq!(verdict.status, SyncStatus::PluginSetIncompatible);
    }

    #[test]
    fn extra_peer_plugins_are_fine() {
        let cp = plugins(&[("cors", Some("2.8.0"))]);
        let dp = plugins(&[("acl", None), ("cors", Some("2.8.1")), ("zipkin", None)]);
        let verdict = evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp));
        assert!(verdict.ok);
        assert_eq!(verdict.status, SyncStatus::Normal);
    }

    #[test]
    fn plugin_major_minor_mismatch() {
        let cp = plugins(&[("rate-limiting", Some("2.1.0"))]);
        let dp = plugins(&[("rate-limiting", Some("3.0.2"))]);
        let verdict = evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp));
        assert_eq!(verdict.status, SyncStatus::PluginVersionIncompatible);
    }

    #[test]
    fn plugin_patch_difference_is_ignored() {
        let cp = plugins(&[("rate-limiting", Some("2.1.0"))]);
        let dp = plugins(&[("rate-limiting", Some("2.1.9"))]);
        assert!(evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp)).ok);
    }

    #[test]
    fn versionless_plugins_are_skipped() {
        let cp = plugins(&[("custom", Some("1.0.0")), ("rate-limiting", None)]);
        let dp = plugins(&[("custom", None), ("rate-limiting", Some("9.9.9"))]);
        assert!(evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp)).ok);
    }

    #[test]
    fn unparseable_plugin_versions_are_skipped() {
        let cp = plugins(&[("acl", Some("1")), ("cors", Some("dev")), ("jwt", Some("2.0.0"))]);
        let dp = plugins(&[("acl", Some("2")), ("cors", Some("1.4.0")), ("jwt", Some("latest"))]);
        assert!(evaluate("2.8.0", &cp, Some("2.8.0"), Some(&dp)).ok);
    }

    #[test]
    fn version_check_runs_before_plugin_check() {
        let cp = plugins(&[("acl", None)]);
        let verdict = evaluate("2.8.0", &cp, Some("2.1.0"), Some(&[]));
        assert_eq!(verdict.status, SyncStatus::VersionIncompatible);
    }
}
