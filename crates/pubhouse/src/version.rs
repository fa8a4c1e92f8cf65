//! Semantic version parsing and ordering

use semver::Version;
use std::cmp::Reverse;

use crate::error::{ArchiveError, Result};

/// Parse a version string, rejecting anything that is not a semantic version
pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw).map_err(|e| ArchiveError::InvalidVersion {
        version: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Sort items by semantic version, highest first
///
/// Items whose version does not parse sort after every valid version. The order of
/// items with equal versions is unspecified.
pub fn sort_by_version_desc<T, F>(items: &mut [T], version_of: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by_cached_key(|item| Reverse(Version::parse(version_of(item)).ok()));
}

/// Highest semantic version among the items, if any parses
pub fn max_by_version<'a, T, I, F>(items: I, version_of: F) -> Option<&'a T>
where
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> &str,
{
    items
        .into_iter()
        .filter_map(|item| Version::parse(version_of(item)).ok().map(|v| (v, item)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, item)| item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert!(parse_version("1.2.3-beta.1+build.7").is_ok());
        assert!(matches!(
            parse_version("1.2"),
            Err(ArchiveError::InvalidVersion { .. })
        ));
        assert!(parse_version("v1.0.0").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_sort_uses_semver_not_lexical_order() {
        let mut versions = vec!["1.10.0", "1.9.0", "2.0.0-dev.1", "garbage", "2.0.0", "1.0.0"];
        sort_by_version_desc(&mut versions, |v| *v);

        assert_eq!(
            versions,
            vec!["2.0.0", "2.0.0-dev.1", "1.10.0", "1.9.0", "1.0.0", "garbage"]
        );
    }

    #[test]
    fn test_max_by_version() {
        let versions = ["1.0.0", "2.0.0", "1.5.0"];
        assert_eq!(max_by_version(&versions, |v| *v), Some(&"2.0.0"));

        let empty: [&str; 0] = [];
        assert_eq!(max_by_version(&empty, |v| *v), None);
    }
}
