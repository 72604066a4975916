//! Pre-run eligibility check evaluated by the caller.

use crate::plan::HopSequence;
use crate::version::Version;

/// Whether a run should go ahead, and why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<String>,
}

impl Eligibility {
    const fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
        }
    }

    /// Decide whether to run.
    ///
    /// `starting` is the version the run bootstraps with. Runs starting below
    /// `min_start` are skipped, as are empty hop lists unless `allow_empty`.
    pub fn evaluate(
        hops: &HopSequence,
        starting: Option<&Version>,
        min_start: Option<&Version>,
        allow_empty: bool,
    ) -> Self {
        if hops.is_empty() && !allow_empty {
            return Self::skip("upgrade hop list is empty");
        }

        if let (Some(starting), Some(min)) = (starting, min_start)
            && starting < min
        {
            return Self::skip(format!(
                "starting version {starting} is below the minimum {min}"
            ));
        }

        Self::eligible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_empty_hops_skipped_by_default() {
        let hops = plan::<&str>(&[]).unwrap();
        let result = Eligibility::evaluate(&hops, None, None, false);
        assert!(!result.eligible);
        assert_eq!(result.reason.as_deref(), Some("upgrade hop list is empty"));
    }

    #[test]
    fn test_empty_hops_allowed() {
        let hops = plan::<&str>(&[]).unwrap();
        let result = Eligibility::evaluate(&hops, Some(&v("2.0")), None, true);
        assert!(result.eligible);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_starting_version_below_minimum() {
        let hops = plan(&["op:1.6.0", "op:1.8.0"]).unwrap();
        let result = Eligibility::evaluate(&hops, Some(&v("1.6.0")), Some(&v("1.7")), false);
        assert!(!result.eligible);
        assert_eq!(
            result.reason.as_deref(),
            Some("starting version 1.6.0 is below the minimum 1.7")
        );
    }

    #[test]
    fn test_starting_version_at_minimum() {
        let hops = plan(&["op:1.7.0", "op:1.8.0"]).unwrap();
        let result = Eligibility::evaluate(&hops, Some(&v("1.7.0")), Some(&v("1.7")), false);
        assert!(result.eligible);
    }
}
