//! SemVer 2.0 parsing and precedence, isolated from the rest of the domain
//! model so resolver code never has to reason about string formats.

use crate::error::CoreError;
use semver::Version as SemVer;

/// Parses a version string under SemVer 2.0 rules.
///
/// Parse failure is a distinct condition from ordering: callers that scan a
/// list of stored versions should skip an unparseable entry rather than
/// treat it as equal to anything.
pub fn parse(raw: &str) -> Result<SemVer, CoreError> {
	SemVer::parse(raw).map_err(|e| CoreError::validation(format!("invalid version '{raw}': {e}")))
}

/// A version is stable iff it carries no pre-release identifier.
pub fn is_stable(version: &SemVer) -> bool {
	version.pre.is_empty()
}

/// Returns the version with maximal SemVer precedence among `versions`,
/// skipping any value that parses but fails a caller-supplied filter, and
/// silently skipping nothing else since `versions` is already parsed.
pub fn max_by_precedence<'a, I: IntoIterator<Item = &'a SemVer>>(versions: I) -> Option<&'a SemVer> {
	versions.into_iter().max()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prerelease_sorts_below_release() {
		let pre = parse("1.0.0-beta").unwrap();
		let full = parse("1.0.0").unwrap();
		assert!(pre < full);
	}

	#[test]
	fn build_metadata_is_ignored_for_precedence() {
		let a = parse("1.0.0+build.1").unwrap();
		let b = parse("1.0.0+build.2").unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn numeric_precedence_is_total() {
		let versions = ["1.2.3", "1.10.0", "1.9.9", "2.0.0-alpha.1", "2.0.0-alpha.2", "2.0.0"];
		let mut parsed: Vec<_> = versions.iter().map(|v| parse(v).unwrap()).collect();
		parsed.sort();
		let sorted: Vec<String> = parsed.iter().map(|v| v.to_string()).collect();
		assert_eq!(
			sorted,
			vec!["1.2.3", "1.9.9", "1.10.0", "2.0.0-alpha.1", "2.0.0-alpha.2", "2.0.0"]
		);
	}

	#[test]
	fn unparseable_is_an_error_not_an_equivalence() {
		assert!(parse("not-a-version").is_err());
	}

	#[test]
	fn stability_classification() {
		assert!(is_stable(&parse("1.0.0").unwrap()));
		assert!(!is_stable(&parse("1.0.0-beta.1").unwrap()));
	}
}
