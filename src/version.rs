//! Semantic version parsing and ordering.
//!
//! Accepts the lenient form found in image tags (`v1.7`, `1.7.3`,
//! `25.1.0-rc1`) and normalizes it into a strict semantic version.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::OphopError;

/// A parsed, totally ordered software version.
///
/// Grammar: `[v]MAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]`. Missing minor and
/// patch components are zero. Build metadata is ignored by ordering and
/// equality. The original text is kept for display.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parsed: semver::Version,
}

impl Version {
    /// Parse a version string, failing with `InvalidVersionFormat`.
    pub fn parse(input: &str) -> Result<Self, OphopError> {
        let invalid = || OphopError::InvalidVersionFormat(input.to_string());

        let raw = input.trim();
        let body = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(raw);

        let (rest, build) = match body.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (body, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty()
            || parts.len() > 3
            || parts
                .iter()
                .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid());
        }

        let mut normalized = format!(
            "{}.{}.{}",
            parts[0],
            parts.get(1).unwrap_or(&"0"),
            parts.get(2).unwrap_or(&"0")
        );
        if let Some(pre) = pre {
            normalized.push('-');
            normalized.push_str(pre);
        }
        if let Some(build) = build {
            normalized.push('+');
            normalized.push_str(build);
        }

        let parsed = semver::Version::parse(&normalized).map_err(|_| invalid())?;

        Ok(Self {
            raw: raw.to_string(),
            parsed,
        })
    }

    /// The text this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The normalized semantic version.
    pub const fn semver(&self) -> &semver::Version {
        &self.parsed
    }
}

/// Compare two versions by semantic-version precedence.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = &self.parsed;
        let b = &other.parsed;
        (a.major, a.minor, a.patch)
            .cmp(&(b.major, b.minor, b.patch))
            .then_with(|| a.pre.cmp(&b.pre))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parsed.major.hash(state);
        self.parsed.minor.hash(state);
        self.parsed.patch.hash(state);
        self.parsed.pre.hash(state);
    }
}

impl FromStr for Version {
    type Err = OphopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_full_version() {
        let version = v("1.7.3");
        assert_eq!(version.semver(), &semver::Version::new(1, 7, 3));
        assert_eq!(version.to_string(), "1.7.3");
    }

    #[test]
    fn test_parse_short_and_prefixed_forms() {
        assert_eq!(v("1.7"), v("1.7.0"));
        assert_eq!(v("v1.7"), v("1.7.0"));
        assert_eq!(v("2"), v("2.0.0"));
        assert_eq!(v("v25.1.0").as_str(), "v25.1.0");
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "v", "latest", "1..2", "1.2.3.4", "1.x", "a1.2", "1.2-", "-rc1"] {
            assert!(
                matches!(
                    Version::parse(input),
                    Err(OphopError::InvalidVersionFormat(_))
                ),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_compare_numeric_not_lexical() {
        assert_eq!(compare(&v("1.10.0"), &v("1.9.9")), Ordering::Greater);
        assert_eq!(compare(&v("1.5"), &v("1.7")), Ordering::Less);
        assert_eq!(compare(&v("v1.5"), &v("1.5.0")), Ordering::Equal);
    }

    #[test]
    fn test_prerelease_orders_before_release() {
        assert!(v("23.10.0-rc1") < v("23.10.0"));
        assert!(v("23.10.0-alpha") < v("23.10.0-beta"));
        assert!(v("23.10.0-rc1") > v("23.9.9"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(v("1.7.0+abc"), v("1.7.0+def"));
        assert_eq!(compare(&v("1.7.0+abc"), &v("1.7.0")), Ordering::Equal);
    }

    #[test]
    fn test_from_str() {
        let version: Version = "3.0.1".parse().unwrap();
        assert_eq!(version, v("3.0.1"));
    }

    #[test]
    fn test_serialize_as_raw_string() {
        let json = serde_json::to_string(&v("v1.7")).unwrap();
        assert_eq!(json, "\"v1.7\"");
    }
}
