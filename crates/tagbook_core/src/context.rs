//! Request-scoped caller identity and cancellation.
use std::collections::HashMap;

use globset::{GlobBuilder, GlobMatcher};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};

/// Identity and repository read policy of the caller, as resolved by the authorization layer in
/// front of the metadata store.
///
/// The read policy maps repository-name glob patterns to allow/deny decisions. When several
/// patterns match a repository the longest one wins; a repository matched by no pattern is not
/// readable.
#[derive(Clone, Debug, Default)]
pub struct AccessControlContext {
    username: String,
    is_admin: bool,
    read_patterns: Vec<ReadPattern>,
}

#[derive(Clone, Debug)]
struct ReadPattern {
    pattern: String,
    matcher: GlobMatcher,
    allowed: bool,
}

impl AccessControlContext {
    pub fn new<S: Into<String>>(username: S, read_glob_patterns: HashMap<String, bool>) -> Self {
        let read_patterns = read_glob_patterns
            .into_iter()
            .filter_map(|(pattern, allowed)| {
                // `*` stays within one path component, `**` crosses `/`
                let glob = GlobBuilder::new(&pattern).literal_separator(true).build();
                match glob {
                    Ok(glob) => Some(ReadPattern {
                        matcher: glob.compile_matcher(),
                        pattern,
                        allowed,
                    }),
                    Err(e) => {
                        tracing::warn!("ignoring invalid repository glob {pattern:?}: {e}");
                        None
                    }
                }
            })
            .collect();

        Self {
            username: username.into(),
            is_admin: false,
            read_patterns,
        }
    }

    /// Caller bypasses the read policy.
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }

    pub fn can_read_repo(&self, repo: &str) -> bool {
        if self.is_admin {
            return true;
        }

        self.read_patterns
            .iter()
            .filter(|p| p.matcher.is_match(repo))
            .max_by_key(|p| p.pattern.len())
            .map(|p| p.allowed)
            .unwrap_or(false)
    }
}

/// Ambient context threaded through every [`crate::MetaDb`] operation.
///
/// A context without an [`AccessControlContext`] means access control is disabled: every
/// repository is readable and the caller is anonymous.
#[derive(Clone, Debug)]
pub struct RequestContext {
    access: Option<AccessControlContext>,
    cancellation: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    pub fn background() -> Self {
        Self {
            access: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_access(mut self, access: AccessControlContext) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn access(&self) -> Option<&AccessControlContext> {
        self.access.as_ref()
    }

    /// Empty when the caller is anonymous.
    pub fn username(&self) -> &str {
        self.access.as_ref().map(|a| a.username()).unwrap_or("")
    }

    pub fn can_read_repo(&self, repo: &str) -> bool {
        match &self.access {
            Some(access) => access.can_read_repo(repo),
            None => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Username of a non-anonymous caller, or [`Error::PermissionDenied`].
    pub(crate) fn require_user(&self) -> Result<&str> {
        match self.username() {
            "" => Err(Error::PermissionDenied(String::from(
                "anonymous callers have no user data",
            ))),
            username => Ok(username),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    fn patterns(ps: &[(&str, bool)]) -> HashMap<String, bool> {
        ps.iter().map(|(p, a)| (p.to_string(), *a)).collect()
    }

    #[rstest]
    #[case::exact("repo1", &[("repo1", true)], true)]
    #[case::unmatched("repo2", &[("repo1", true)], false)]
    #[case::wildcard("team/app", &[("team/*", true)], true)]
    #[case::star_stays_in_component("team/private/secret", &[("team/*", true)], false)]
    #[case::double_star_crosses_components("team/a/b", &[("team/**", true)], true)]
    #[case::top_level_star("team/app", &[("*", true)], false)]
    #[case::longest_pattern_denies("team/secret", &[("team/*", true), ("team/secret", false)], false)]
    #[case::longest_pattern_allows("team/app", &[("**", false), ("team/app", true)], true)]
    #[case::no_patterns("repo1", &[], false)]
    fn read_policy(#[case] repo: &str, #[case] ps: &[(&str, bool)], #[case] expected: bool) {
        let ac = AccessControlContext::new("user", patterns(ps));
        assert_eq!(ac.can_read_repo(repo), expected);
    }

    #[test]
    fn admin_reads_everything() {
        let ac = AccessControlContext::new("root", HashMap::new()).admin();
        assert!(ac.can_read_repo("anything/at/all"));
    }

    #[test]
    fn background_context_is_anonymous_and_unrestricted() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.username(), "");
        assert!(ctx.can_read_repo("repo"));
        assert!(ctx.require_user().is_err());
    }

    #[test]
    fn cancelled_context_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = RequestContext::background().with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }
}
