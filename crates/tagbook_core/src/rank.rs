//! Relevance of a repository name to a search string.

/// Rank how well `search` matches the repository name `repo`.
///
/// Both strings are split into `/`-delimited components and the search components are aligned
/// against every contiguous run of repository components. All aligned components but the last
/// must be equal; the last one must contain the final search component. Returns `0` for an exact
/// match, `-1` when no alignment exists, and otherwise the best (lowest) score over all
/// alignments.
///
/// An alignment scores `(position + 1) * weight`, where `position` is the byte offset of the
/// final search component within its repository component and `weight` depends on how many
/// repository components remain unmatched before (`prefix`) and after (`suffix`) the run:
///
/// | prefix | suffix | search components | weight         |
/// |--------|--------|-------------------|----------------|
/// | 0      | 0      | any               | 1              |
/// | any    | 0      | 1                 | 1              |
/// | 0      | > 0    | any               | 10             |
/// | > 0    | any    | otherwise         | 400 * prefix   |
///
/// Scores too large for an `i32` saturate at `i32::MAX`.
pub fn rank_repo_name(search: &str, repo: &str) -> i32 {
    let search = search.trim_matches('/');
    if search == repo {
        return 0;
    }

    let search_parts: Vec<&str> = search.split('/').collect();
    let repo_parts: Vec<&str> = repo.split('/').collect();
    if search_parts.len() > repo_parts.len() {
        return -1;
    }

    let (last, leading) = match search_parts.split_last() {
        Some(split) => split,
        None => return -1,
    };

    let mut best: Option<i32> = None;
    for start in 0..=(repo_parts.len() - search_parts.len()) {
        let end = start + leading.len();
        if repo_parts[start..end] != *leading {
            continue;
        }

        let position = match repo_parts[end].find(last) {
            Some(p) => p as i64,
            None => continue,
        };

        let prefix = start as i64;
        let suffix = repo_parts.len() - end - 1;
        let weight = if suffix == 0 && (prefix == 0 || search_parts.len() == 1) {
            1
        } else if prefix == 0 {
            10
        } else {
            400i64.saturating_mul(prefix)
        };

        let score = (position + 1)
            .saturating_mul(weight)
            .min(i64::from(i32::MAX)) as i32;
        best = Some(best.map_or(score, |b| b.min(score)));
    }

    best.unwrap_or(-1)
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::exact("alpine", "alpine", 0)]
    #[case::exact_nested("test/alpine", "test/alpine", 0)]
    #[case::longer_search("test/alpine", "alpine", -1)]
    #[case::last_component("alpine", "test/alpine", 1)]
    #[case::first_component("test", "test/alpine", 10)]
    #[case::substring_of_last("pine", "test/alpine", 3)]
    #[case::best_alignment_wins("pine", "alpine/alpine", 3)]
    #[case::substring_of_first("pine", "alpine/test", 30)]
    #[case::longer_partial_search("test/pine", "alpine", -1)]
    #[case::leading_run("repo/test", "repo/test/alpine", 10)]
    #[case::leading_mismatch("repo/test/golang", "repo/test2/alpine", -1)]
    #[case::full_run_partial_last("repo/test/pine", "repo/test/alpine", 3)]
    #[case::middle_component("debian", "c3/debian/base-amd64", 400)]
    #[case::trailing_run("debian/base-amd64", "c3/debian/base-amd64", 400)]
    #[case::trailing_run_deeper("debian/base-amd64", "c3/aux/debian/base-amd64", 800)]
    #[case::middle_run("aux/debian", "c3/aux/debian/base-amd64", 400)]
    #[case::slashes_trimmed("/alpine/", "alpine", 0)]
    #[case::no_match("golang", "test/alpine", -1)]
    #[case::case_sensitive("Alpine", "alpine", -1)]
    fn golden_ranks(#[case] search: &str, #[case] repo: &str, #[case] expected: i32) {
        assert_eq!(rank_repo_name(search, repo), expected);
    }

    #[test]
    fn relevance_ordering() {
        let mut repos = vec!["alpine/test", "notalpine", "unmached/repo", "alpine"];
        repos.retain(|r| rank_repo_name("pine", r) != -1);
        repos.sort_by_key(|r| rank_repo_name("pine", r));
        assert_eq!(repos, vec!["alpine", "notalpine", "alpine/test"]);
    }

    #[test]
    fn long_names_saturate() {
        let repo = format!("{}{}needle/tail", "x/".repeat(3000), "a".repeat(3000));
        assert_eq!(rank_repo_name("needle", &repo), i32::MAX);

        let repo = format!("{}needle", "x/".repeat(3000));
        assert_eq!(rank_repo_name("needle", &repo), 1);
    }
}
