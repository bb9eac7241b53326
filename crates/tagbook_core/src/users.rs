use std::collections::BTreeSet;

use chrono::Utc;

use crate::backend::{MetaBackendExt, Table};
use crate::context::RequestContext;
use crate::errors::{Error, Result};
use crate::metadb::MetaDb;
use crate::reference::require_non_empty;
use crate::types::{ApiKeyDetails, RepoMetadata, ToggleState, UserData};

#[derive(Clone, Copy, Debug)]
enum Social {
    Star,
    Bookmark,
}

impl Social {
    fn set_mut(self, data: &mut UserData) -> &mut BTreeSet<String> {
        match self {
            Social::Star => &mut data.starred_repos,
            Social::Bookmark => &mut data.bookmarked_repos,
        }
    }
}

/// Starred and bookmarked repositories of the requesting user.
#[derive(Clone, Debug, Default)]
pub(crate) struct SocialState {
    starred: BTreeSet<String>,
    bookmarked: BTreeSet<String>,
}

impl SocialState {
    pub(crate) fn is_starred(&self, repo: &str) -> bool {
        self.starred.contains(repo)
    }

    pub(crate) fn is_bookmarked(&self, repo: &str) -> bool {
        self.bookmarked.contains(repo)
    }

    pub(crate) fn annotate(&self, meta: &mut RepoMetadata) {
        meta.is_starred = self.is_starred(&meta.name);
        meta.is_bookmarked = self.is_bookmarked(&meta.name);
    }
}

impl MetaDb {
    async fn load_user(&self, username: &str) -> Result<Option<UserData>> {
        self.backend.get_record(Table::UserData, username).await
    }

    pub(crate) async fn social_state(&self, ctx: &RequestContext) -> Result<SocialState> {
        let username = ctx.username();
        if username.is_empty() {
            return Ok(SocialState::default());
        }
        Ok(self
            .load_user(username)
            .await?
            .map(|data| SocialState {
                starred: data.starred_repos,
                bookmarked: data.bookmarked_repos,
            })
            .unwrap_or_default())
    }

    pub async fn get_user_data(&self, ctx: &RequestContext) -> Result<UserData> {
        let username = ctx.require_user()?;
        self.load_user(username)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user data of {username:?}")))
    }

    pub async fn set_user_data(&self, ctx: &RequestContext, data: &UserData) -> Result<()> {
        let username = ctx.require_user()?;
        self.backend
            .put_record(Table::UserData, username, data)
            .await
    }

    /// Delete the caller's record together with the lookup entries of its API keys.
    #[tracing::instrument(skip(self, ctx), fields(user = ctx.username()))]
    pub async fn delete_user_data(&self, ctx: &RequestContext) -> Result<()> {
        let username = ctx.require_user()?;
        if let Some(data) = self.load_user(username).await? {
            for hash in data.api_keys.keys() {
                self.backend.delete(Table::ApiKeys, hash).await?;
            }
        }
        self.backend.delete(Table::UserData, username).await
    }

    pub async fn get_user_groups(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self.get_user_data(ctx).await?.groups)
    }

    pub async fn set_user_groups(&self, ctx: &RequestContext, groups: Vec<String>) -> Result<()> {
        let username = ctx.require_user()?;
        self.backend
            .update_record(Table::UserData, username, |old: Option<UserData>| {
                let mut data = old.unwrap_or_default();
                data.groups = groups.clone();
                Ok(Some(data))
            })
            .await
    }

    /// Register an API key for the caller under `hash`.
    #[tracing::instrument(skip(self, ctx, details), fields(user = ctx.username()))]
    pub async fn add_user_api_key(
        &self,
        ctx: &RequestContext,
        hash: &str,
        details: &ApiKeyDetails,
    ) -> Result<()> {
        let username = ctx.require_user()?;
        require_non_empty("api key hash", hash)?;

        self.backend
            .update_record(Table::UserData, username, |old: Option<UserData>| {
                let mut data = old.unwrap_or_default();
                data.api_keys.insert(hash.to_string(), details.clone());
                Ok(Some(data))
            })
            .await?;

        self.backend
            .put_record(Table::ApiKeys, hash, &username.to_string())
            .await
    }

    /// Username owning the API key registered under `hash`.
    pub async fn get_user_api_key_info(&self, hash: &str) -> Result<String> {
        self.backend
            .get_record::<String>(Table::ApiKeys, hash)
            .await?
            .ok_or_else(|| Error::NotFound(String::from("api key")))
    }

    pub async fn update_user_api_key_last_used(
        &self,
        ctx: &RequestContext,
        hash: &str,
    ) -> Result<()> {
        let username = ctx.require_user()?;
        let now = Utc::now();
        self.backend
            .update_record(Table::UserData, username, |old: Option<UserData>| {
                let mut data =
                    old.ok_or_else(|| Error::NotFound(format!("user data of {username:?}")))?;
                let details = data
                    .api_keys
                    .get_mut(hash)
                    .ok_or_else(|| Error::NotFound(String::from("api key")))?;
                details.last_used = now;
                Ok(Some(data))
            })
            .await
    }

    /// Revoke the caller's API key identified by `key_id`, which may be either the key hash or
    /// the key's UUID. Unknown keys are ignored.
    #[tracing::instrument(skip(self, ctx), fields(user = ctx.username()))]
    pub async fn delete_user_api_key(&self, ctx: &RequestContext, key_id: &str) -> Result<()> {
        let username = ctx.require_user()?;
        let mut removed: Vec<String> = Vec::new();
        self.backend
            .update_record(Table::UserData, username, |old: Option<UserData>| {
                removed.clear();
                let mut data = match old {
                    Some(data) => data,
                    None => return Ok(None),
                };
                removed.extend(
                    data.api_keys
                        .iter()
                        .filter(|(hash, details)| *hash == key_id || details.uuid == key_id)
                        .map(|(hash, _)| hash.clone()),
                );
                if removed.is_empty() {
                    return Ok(None);
                }
                data.api_keys.retain(|hash, _| !removed.contains(hash));
                Ok(Some(data))
            })
            .await?;

        for hash in removed {
            self.backend.delete(Table::ApiKeys, &hash).await?;
        }
        Ok(())
    }

    /// Repositories the caller starred. Anonymous callers have none.
    pub async fn get_starred_repos(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self.social_state(ctx).await?.starred.into_iter().collect())
    }

    /// Repositories the caller bookmarked. Anonymous callers have none.
    pub async fn get_bookmarked_repos(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self.social_state(ctx).await?.bookmarked.into_iter().collect())
    }

    /// The record of `repo` with the caller's star and bookmark flags set.
    pub async fn get_user_repo_meta(&self, ctx: &RequestContext, repo: &str) -> Result<RepoMetadata> {
        let mut meta = self.load_repo(repo).await?;
        self.social_state(ctx).await?.annotate(&mut meta);
        Ok(meta)
    }

    /// Star `repo` for the caller, or remove the star if present, keeping the repository's star
    /// count in step.
    pub async fn toggle_star_repo(&self, ctx: &RequestContext, repo: &str) -> Result<ToggleState> {
        self.toggle(ctx, repo, Social::Star).await
    }

    /// Bookmark `repo` for the caller, or remove the bookmark if present.
    pub async fn toggle_bookmark_repo(
        &self,
        ctx: &RequestContext,
        repo: &str,
    ) -> Result<ToggleState> {
        self.toggle(ctx, repo, Social::Bookmark).await
    }

    #[tracing::instrument(skip(self, ctx), fields(user = ctx.username()))]
    async fn toggle(&self, ctx: &RequestContext, repo: &str, social: Social) -> Result<ToggleState> {
        let username = ctx.require_user()?;
        if !ctx.can_read_repo(repo) {
            return Err(Error::PermissionDenied(format!(
                "{username:?} cannot read {repo:?}"
            )));
        }
        // the repository must exist before the user record is touched
        self.load_repo(repo).await?;

        let mut state = ToggleState::NotChanged;
        self.backend
            .update_record(Table::UserData, username, |old: Option<UserData>| {
                let mut data = old.unwrap_or_default();
                let set = social.set_mut(&mut data);
                state = if set.remove(repo) {
                    ToggleState::Removed
                } else {
                    set.insert(repo.to_string());
                    ToggleState::Added
                };
                Ok(Some(data))
            })
            .await?;

        if let Social::Bookmark = social {
            return Ok(state);
        }

        let counted = self
            .update_existing_repo(repo, |meta| {
                match state {
                    ToggleState::Added => meta.stars += 1,
                    ToggleState::Removed => meta.stars = meta.stars.saturating_sub(1),
                    ToggleState::NotChanged => {}
                }
                Ok(())
            })
            .await;

        if let Err(e) = counted {
            tracing::warn!("reverting star of {repo:?}: {e}");
            self.backend
                .update_record(Table::UserData, username, |old: Option<UserData>| {
                    let mut data = match old {
                        Some(data) => data,
                        None => return Ok(None),
                    };
                    match state {
                        ToggleState::Added => data.starred_repos.remove(repo),
                        ToggleState::Removed => data.starred_repos.insert(repo.to_string()),
                        ToggleState::NotChanged => false,
                    };
                    Ok(Some(data))
                })
                .await?;
            return Err(e);
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use oci_spec::image::MediaType;

    use super::*;
    use crate::context::AccessControlContext;
    use crate::test_support::*;

    fn user_ctx(username: &str, repos: &[&str]) -> RequestContext {
        let patterns: HashMap<String, bool> =
            repos.iter().map(|r| (r.to_string(), true)).collect();
        RequestContext::background().with_access(AccessControlContext::new(username, patterns))
    }

    #[tokio::test]
    async fn user_data_and_api_keys_crud() {
        let db = metadb().await;
        let ctx = user_ctx("test", &[]);
        let mut details = ApiKeyDetails {
            label: String::from("apiKey"),
            scopes: vec![String::from("repo")],
            uuid: String::from("id"),
            ..Default::default()
        };

        db.add_user_api_key(&ctx, "id", &details).await.unwrap();

        let mut profile = db.get_user_data(&ctx).await.unwrap();
        profile.groups = vec![String::from("group1"), String::from("group2")];
        db.set_user_data(&ctx, &profile).await.unwrap();

        let profile = db.get_user_data(&ctx).await.unwrap();
        assert_eq!(profile.groups, vec!["group1", "group2"]);
        assert_eq!(profile.api_keys["id"].label, "apiKey");
        assert_eq!(profile.api_keys["id"].scopes, vec!["repo"]);

        let last_used = profile.api_keys["id"].last_used;
        db.update_user_api_key_last_used(&ctx, "id").await.unwrap();
        let profile = db.get_user_data(&ctx).await.unwrap();
        assert!(profile.api_keys["id"].last_used > last_used);
        assert_eq!(db.get_user_groups(&ctx).await.unwrap(), vec!["group1", "group2"]);

        details.uuid = String::from("key");
        db.add_user_api_key(&ctx, "key", &details).await.unwrap();
        assert_eq!(db.get_user_api_key_info("key").await.unwrap(), "test");

        db.delete_user_api_key(&ctx, "id").await.unwrap();
        let profile = db.get_user_data(&ctx).await.unwrap();
        assert_eq!(profile.api_keys.len(), 1);
        assert!(db.get_user_api_key_info("id").await.unwrap_err().is_not_found());

        db.delete_user_api_key(&ctx, "key").await.unwrap();
        db.delete_user_api_key(&ctx, "key").await.unwrap();
        assert!(db.get_user_data(&ctx).await.unwrap().api_keys.is_empty());

        db.delete_user_data(&ctx).await.unwrap();
        assert!(db.get_user_api_key_info("key").await.is_err());
        assert!(db.get_user_data(&ctx).await.unwrap_err().is_not_found());
        assert!(db.get_user_groups(&ctx).await.unwrap_err().is_not_found());

        db.set_user_groups(&ctx, vec![String::from("group1")])
            .await
            .unwrap();
        assert_eq!(db.get_user_groups(&ctx).await.unwrap(), vec!["group1"]);
    }

    #[tokio::test]
    async fn api_key_lookup_survives_only_with_its_owner() {
        let db = metadb().await;
        let ctx = user_ctx("owner", &[]);
        db.add_user_api_key(&ctx, "hash", &ApiKeyDetails::default())
            .await
            .unwrap();
        db.delete_user_data(&ctx).await.unwrap();
        assert!(db.get_user_api_key_info("hash").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn anonymous_callers_have_no_user_data() {
        let db = metadb().await;
        let anonymous = user_ctx("", &["repo1"]);
        assert!(matches!(
            db.get_user_data(&anonymous).await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            db.add_user_api_key(&anonymous, "hash", &ApiKeyDetails::default())
                .await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(db.get_starred_repos(&anonymous).await.unwrap().is_empty());
        assert!(db.get_bookmarked_repos(&anonymous).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_star_toggles_keep_counter_and_users_in_step() {
        let db = metadb().await;
        let d = digest_of("fake-manifest1");
        db.set_repo_reference("repo1", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();

        let toggle_all = |users: Vec<String>| {
            let handles: Vec<_> = users
                .into_iter()
                .map(|user| {
                    let db = db.clone();
                    tokio::spawn(async move {
                        let ctx = user_ctx(&user, &["repo1"]);
                        db.toggle_star_repo(&ctx, "repo1").await.unwrap()
                    })
                })
                .collect();
            async move {
                let mut states = Vec::new();
                for h in handles {
                    states.push(h.await.unwrap());
                }
                states
            }
        };

        let first: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
        let states = toggle_all(first.clone()).await;
        assert!(states.iter().all(|s| *s == ToggleState::Added));
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 16);

        // half of the stargazers leave while newcomers arrive
        let mut second: Vec<String> = first.iter().step_by(2).cloned().collect();
        second.extend((16..20).map(|i| format!("user{i}")));
        toggle_all(second).await;

        let mut starring = 0;
        for i in 0..20 {
            let ctx = user_ctx(&format!("user{i}"), &["repo1"]);
            let starred = db.get_starred_repos(&ctx).await.unwrap();
            if starred.iter().any(|r| r == "repo1") {
                starring += 1;
            }
        }
        assert_eq!(starring, 12);
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), starring);
    }

    #[tokio::test]
    async fn stars_for_users() {
        let db = metadb().await;
        let d = digest_of("fake-manifest1");
        db.set_repo_reference("repo1", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();
        db.set_repo_reference("repo2", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();

        let user1 = user_ctx("user1", &["repo1", "repo2"]);
        let user2 = user_ctx("user2", &["repo1", "repo2"]);
        let anonymous = user_ctx("", &["repo1", "repo2"]);

        assert_eq!(
            db.toggle_star_repo(&user1, "repo1").await.unwrap(),
            ToggleState::Added
        );
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 1);
        assert_eq!(db.get_starred_repos(&user1).await.unwrap(), vec!["repo1"]);
        assert!(db.get_starred_repos(&user2).await.unwrap().is_empty());

        assert_eq!(
            db.toggle_star_repo(&user2, "repo1").await.unwrap(),
            ToggleState::Added
        );
        assert_eq!(
            db.toggle_star_repo(&user2, "repo2").await.unwrap(),
            ToggleState::Added
        );
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 2);
        assert_eq!(db.get_repo_stars("repo2").await.unwrap(), 1);
        assert_eq!(
            db.get_starred_repos(&user2).await.unwrap(),
            vec!["repo1", "repo2"]
        );

        assert!(matches!(
            db.toggle_star_repo(&anonymous, "repo1").await,
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 2);

        assert_eq!(
            db.toggle_star_repo(&user1, "repo1").await.unwrap(),
            ToggleState::Removed
        );
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 1);
        assert!(db.get_starred_repos(&user1).await.unwrap().is_empty());
        assert_eq!(
            db.toggle_star_repo(&user1, "repo1").await.unwrap(),
            ToggleState::Added
        );
    }

    #[tokio::test]
    async fn toggles_require_read_access_and_an_existing_repo() {
        let db = metadb().await;
        db.set_repo_reference("repo1", "0.0.1", &digest_of("m"), MediaType::ImageManifest)
            .await
            .unwrap();
        let user = user_ctx("user1", &["repo1", "missing"]);

        assert!(matches!(
            db.toggle_star_repo(&user_ctx("user1", &[]), "repo1").await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(db
            .toggle_star_repo(&user, "missing")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(db.get_starred_repos(&user).await.unwrap().is_empty());
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bookmarks_do_not_touch_star_count() {
        let db = metadb().await;
        db.set_repo_reference("repo1", "0.0.1", &digest_of("m"), MediaType::ImageManifest)
            .await
            .unwrap();
        let user = user_ctx("user1", &["repo1"]);

        assert_eq!(
            db.toggle_bookmark_repo(&user, "repo1").await.unwrap(),
            ToggleState::Added
        );
        assert_eq!(db.get_bookmarked_repos(&user).await.unwrap(), vec!["repo1"]);
        assert_eq!(db.get_repo_stars("repo1").await.unwrap(), 0);

        let meta = db.get_user_repo_meta(&user, "repo1").await.unwrap();
        assert!(meta.is_bookmarked);
        assert!(!meta.is_starred);

        assert_eq!(
            db.toggle_bookmark_repo(&user, "repo1").await.unwrap(),
            ToggleState::Removed
        );
        assert!(db.get_bookmarked_repos(&user).await.unwrap().is_empty());
    }
}
