use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, Result};
use crate::oci_digest::OciDigest;

/// Reference under which a manifest is pushed to a repository.
///
/// According to the distribution specification, a `<reference>` MUST be either (a) the digest of
/// the manifest or (b) a tag, and a tag MUST be at most 128 characters in length and match
/// `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`.
#[derive(Debug, PartialEq)]
pub enum Reference {
    Digest(OciDigest),
    Tag(String),
}

impl std::str::FromStr for Reference {
    type Err = Error;

    /// Convert [`&str`] to a [`Reference`] first by attempting to convert into [`OciDigest`]
    /// then if that doesn't work, checking that the string is a valid distribution tag.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(dgst) = OciDigest::try_from(s) {
            return Ok(Self::Digest(dgst));
        }
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap());

        if RE.is_match(s) {
            return Ok(Self::Tag(String::from(s)));
        }

        Err(Error::InvalidInput(format!("reference {s:?}")))
    }
}

/// Check a repository name against the distribution specification's `<name>` grammar.
pub(crate) fn validate_repo_name(name: &str) -> Result<()> {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*(/[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*)*$")
            .unwrap()
    });

    if RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("repository name {name:?}")))
    }
}

/// Reject empty identifiers on write paths that do not require a full digest.
pub(crate) fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("empty {what}")));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::tag("0.0.1", true)]
    #[case::latest("latest", true)]
    #[case::digest("sha256:404cdd7bc109c432f8cc2443b45bcfe95980f5107215c645236e577929ac3e52", false)]
    fn reference_kind(#[case] s: &str, #[case] is_tag: bool) {
        let r: Reference = s.parse().unwrap();
        assert_eq!(matches!(r, Reference::Tag(_)), is_tag);
    }

    #[rstest]
    #[case::empty("")]
    #[case::leading_dot(".hidden")]
    #[case::colon("a:b")]
    #[case::too_long(&"a".repeat(129))]
    fn invalid_references(#[case] s: &str) {
        assert!(matches!(
            s.parse::<Reference>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[rstest]
    #[case::simple("alpine", true)]
    #[case::nested("c3/aux/debian/base-amd64", true)]
    #[case::separators("a.b_c__d--e", true)]
    #[case::empty("", false)]
    #[case::uppercase("InexistentRepo", false)]
    #[case::trailing_slash("repo/", false)]
    #[case::double_slash("a//b", false)]
    fn repo_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_repo_name(name).is_ok(), valid);
    }
}
