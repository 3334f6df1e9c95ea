//! Resolution and release-version helpers.

use std::cmp::Ordering;

/// Version assigned to releases that do not carry an explicit `vN` marker.
pub const DEFAULT_VERSION: &str = "v0";

/// Normalize a resolution string to the `<height>p` / `4k` form.
///
/// `"1920x1080"` becomes `"1080p"`, `"720"` becomes `"720p"`, `"4K"` becomes
/// `"4k"`. Anything unrecognized is returned lower-cased and trimmed, and an
/// empty input stays empty.
pub fn normalize_resolution(resolution: &str) -> String {
    let lowered = resolution.trim().to_lowercase();
    if lowered.is_empty() {
        return lowered;
    }

    if let Some((_, height)) = lowered.split_once('x') {
        if !height.is_empty() && height.chars().all(|c| c.is_ascii_digit()) {
            return format!("{}p", height.trim_start_matches('0'));
        }
    }

    if lowered.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}p", lowered);
    }

    lowered
}

/// Compare two release version strings such as `"v0"`, `"v2"` or `"v0.2"`.
///
/// A leading `v` is ignored and the remainder is compared component-wise as
/// dot-separated integers; missing components count as zero. Components that
/// are not numeric fall back to string comparison.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = strip_prefix(a).split('.').collect();
    let right: Vec<&str> = strip_prefix(b).split('.').collect();

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");

        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn strip_prefix(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolution() {
        assert_eq!(normalize_resolution("1920x1080"), "1080p");
        assert_eq!(normalize_resolution("1280x720"), "720p");
        assert_eq!(normalize_resolution("1080P"), "1080p");
        assert_eq!(normalize_resolution("720"), "720p");
        assert_eq!(normalize_resolution("4K"), "4k");
        assert_eq!(normalize_resolution(""), "");
        assert_eq!(normalize_resolution("  "), "");
    }

    #[test]
    fn test_compare_version_strings() {
        assert_eq!(compare_version_strings("v1", "v0"), Ordering::Greater);
        assert_eq!(compare_version_strings("v0", "v1"), Ordering::Less);
        assert_eq!(compare_version_strings("v0", "v0"), Ordering::Equal);
        assert_eq!(compare_version_strings("v0.2", "v1"), Ordering::Less);
    }

    #[test]
    fn test_compare_version_strings_uneven_components() {
        assert_eq!(compare_version_strings("v1.0", "v1"), Ordering::Equal);
        assert_eq!(compare_version_strings("v1.1", "v1"), Ordering::Greater);
        assert_eq!(compare_version_strings("v10", "v9"), Ordering::Greater);
        assert_eq!(compare_version_strings("2", "v1"), Ordering::Greater);
    }
}
