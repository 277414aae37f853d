//! Version ordering for package versions.
//!
//! Chrome package versions are one to four dot-separated integers ("1.2",
//! "3.0.1.7"), which semver rejects. Versions are compared as semver when both
//! sides parse, otherwise numerically component by component (missing trailing
//! components count as zero), and as plain strings as a last resort.

use std::cmp::Ordering;

use semver::Version;

fn dotted(version: &str) -> Option<Vec<u64>> {
    let parts: Option<Vec<u64>> = version.split('.').map(|p| p.parse().ok()).collect();
    parts.filter(|p| !p.is_empty())
}

fn compare_dotted(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Order two version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.trim(), b.trim());
    if let (Ok(x), Ok(y)) = (Version::parse(a), Version::parse(b)) {
        return x.cmp(&y);
    }
    match (dotted(a), dotted(b)) {
        (Some(x), Some(y)) => compare_dotted(&x, &y),
        _ => a.cmp(b),
    }
}

/// True when `latest` is strictly newer than `current`.
pub fn is_newer(latest: &str, current: &str) -> bool {
    compare_versions(latest, current) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_versions() {
        assert!(is_newer("2.0", "1.0"));
        assert!(is_newer("1.10", "1.9"));
        assert!(is_newer("1.0.0.1", "1.0"));
        assert!(!is_newer("1.0", "1.0.0.0"));
        assert!(!is_newer("1.9", "1.10"));
    }

    #[test]
    fn test_semver_versions() {
        assert!(is_newer("1.2.4", "1.2.3"));
        assert!(is_newer("1.0.0", "1.0.0-beta.2"));
        assert!(!is_newer("1.0.0-beta.2", "1.0.0"));
    }

    #[test]
    fn test_equal_is_not_newer() {
        for v in ["1", "1.0", "0.0.1", "3.2.1.0", "1.0.0-rc.1"] {
            assert!(!is_newer(v, v), "{v} should not be newer than itself");
            assert_eq!(compare_versions(v, v), Ordering::Equal);
        }
    }

    #[test]
    fn test_non_numeric_falls_back_to_string_order() {
        assert!(is_newer("beta", "alpha"));
        assert!(!is_newer("", "1.0"));
    }

    #[test]
    fn test_no_update_iff_latest_not_greater() {
        let versions = ["0.9", "1.0", "1.0.1", "1.1", "2.0", "10.0"];
        for current in versions {
            for latest in versions {
                let newer = is_newer(latest, current);
                let ordering = compare_versions(latest, current);
                assert_eq!(newer, ordering == Ordering::Greater);
                assert_eq!(!newer, ordering != Ordering::Greater);
            }
        }
        assert!(is_newer("10.0", "2.0"));
    }
}
