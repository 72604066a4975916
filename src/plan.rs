//! Upgrade hop planning.
//!
//! A hop reference is an image reference or a bare tag:
//! `reference = [prefix ":"] tag`. The tag is everything after the last `:`
//! and must parse as a [`Version`].

use serde::Serialize;
use tracing::debug;

use crate::error::OphopError;
use crate::version::Version;

/// One step of a planned upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hop {
    pub target_version: Version,
    pub reference: String,
}

impl Hop {
    /// Build a hop from a single reference.
    pub fn from_reference(reference: &str) -> Result<Self, OphopError> {
        let tag = version_tag(reference)?;
        let target_version = Version::parse(tag)
            .map_err(|_| OphopError::InvalidVersionFormat(reference.to_string()))?;

        Ok(Self {
            target_version,
            reference: reference.trim().to_string(),
        })
    }
}

/// Ordered upgrade hops. Insertion order is upgrade order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HopSequence {
    hops: Vec<Hop>,
}

impl HopSequence {
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn first(&self) -> Option<&Hop> {
        self.hops.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hop> {
        self.hops.iter()
    }
}

impl<'a> IntoIterator for &'a HopSequence {
    type Item = &'a Hop;
    type IntoIter = std::slice::Iter<'a, Hop>;

    fn into_iter(self) -> Self::IntoIter {
        self.hops.iter()
    }
}

/// Extract the trailing version tag from a reference.
///
/// `quay.io/acme/operator:23.10.1` yields `23.10.1`, a bare `1.7.3` yields
/// itself. Digest references and references with an empty tag are rejected.
pub fn version_tag(reference: &str) -> Result<&str, OphopError> {
    let invalid = || OphopError::InvalidVersionFormat(reference.to_string());

    let reference = reference.trim();
    if reference.is_empty() || reference.contains('@') {
        return Err(invalid());
    }

    let tag = reference
        .rsplit_once(':')
        .map_or(reference, |(_, tag)| tag);
    if tag.is_empty() || tag.contains('/') {
        return Err(invalid());
    }

    Ok(tag)
}

/// Plan the hop sequence from caller-supplied references.
///
/// Fails on the first entry whose tag does not parse; nothing is mutated
/// before planning succeeds.
pub fn plan<S: AsRef<str>>(raw: &[S]) -> Result<HopSequence, OphopError> {
    let hops = raw
        .iter()
        .map(|entry| Hop::from_reference(entry.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Planned {} upgrade hops", hops.len());
    Ok(HopSequence { hops })
}
