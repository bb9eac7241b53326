//! # Search
//!
//! Every search and filter entry point runs the same pipeline over a full scan of repository
//! records: access control, name matching and ranking, platform and state filtering, then
//! pagination. Manifests and indexes referenced by candidate tags are loaded at most once per
//! request and the ones needed to render the returned page are handed back alongside it.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::backend::{MetaBackendExt, Table};
use crate::context::RequestContext;
use crate::errors::{Error, Result};
use crate::filter::Filter;
use crate::images::{index_manifest_digests, ImageSummary};
use crate::metadb::MetaDb;
use crate::pagination::{
    DetailedRepoMeta, PageFinder, PageInfo, PageInput, RepoPageFinder, TagPageFinder,
};
use crate::rank::rank_repo_name;
use crate::types::{Descriptor, IndexData, ManifestData, ManifestMetadata, RepoMetadata};

/// One page of search results.
#[derive(Clone, Debug, Default)]
pub struct SearchResults {
    pub repos: Vec<RepoMetadata>,
    /// Every manifest referenced by a returned tag, directly or through an index.
    pub manifests: HashMap<String, ManifestData>,
    /// Every index referenced by a returned tag.
    pub indexes: HashMap<String, IndexData>,
    pub page: PageInfo,
}

/// Request-scoped cache of the blobs referenced by candidate tags. Misses are cached too.
#[derive(Default)]
struct ImageCache {
    manifests: HashMap<String, Option<(ManifestData, ImageSummary)>>,
    indexes: HashMap<String, Option<(IndexData, Vec<String>)>>,
}

impl ImageCache {
    async fn load_manifest(&mut self, db: &MetaDb, digest: &str) -> Result<bool> {
        if !self.manifests.contains_key(digest) {
            let data: Option<ManifestData> =
                db.backend.get_record(Table::ManifestData, digest).await?;
            let entry = data.map(|data| {
                let summary = ImageSummary::from(&data);
                (data, summary)
            });
            self.manifests.insert(digest.to_string(), entry);
        }
        Ok(matches!(self.manifests.get(digest), Some(Some(_))))
    }

    /// Digests of the stored manifests `descriptor` stands for, or `None` when the manifest or
    /// index it points at is not stored.
    async fn resolve(&mut self, db: &MetaDb, descriptor: &Descriptor) -> Result<Option<Vec<String>>> {
        let digest = descriptor.digest.as_str();
        if !descriptor.is_index() {
            let found = self.load_manifest(db, digest).await?;
            return Ok(found.then(|| vec![digest.to_string()]));
        }

        if !self.indexes.contains_key(digest) {
            let data: Option<IndexData> = db.backend.get_record(Table::IndexData, digest).await?;
            let entry = data.map(|data| {
                let constituents = index_manifest_digests(&data);
                (data, constituents)
            });
            self.indexes.insert(digest.to_string(), entry);
        }
        let constituents = match self.indexes.get(digest) {
            Some(Some((_, constituents))) => constituents.clone(),
            _ => return Ok(None),
        };

        let mut found = Vec::with_capacity(constituents.len());
        for constituent in constituents {
            if self.load_manifest(db, &constituent).await? {
                found.push(constituent);
            }
        }
        Ok(Some(found))
    }

    fn manifest(&self, digest: &str) -> Option<&ManifestData> {
        match self.manifests.get(digest) {
            Some(Some((data, _))) => Some(data),
            _ => None,
        }
    }

    fn summaries(&self, digests: &[String]) -> Vec<ImageSummary> {
        digests
            .iter()
            .filter_map(|d| match self.manifests.get(d) {
                Some(Some((_, summary))) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    /// Assemble the blob maps needed to render the tags of `repos`.
    fn into_results(self, repos: Vec<RepoMetadata>, page: PageInfo) -> SearchResults {
        let mut manifests = HashMap::new();
        let mut indexes = HashMap::new();

        for descriptor in repos.iter().flat_map(|r| r.tags.values()) {
            let digests = if descriptor.is_index() {
                match self.indexes.get(&descriptor.digest) {
                    Some(Some((data, constituents))) => {
                        indexes.insert(descriptor.digest.clone(), data.clone());
                        constituents.as_slice()
                    }
                    _ => continue,
                }
            } else {
                std::slice::from_ref(&descriptor.digest)
            };
            for digest in digests {
                if let Some(data) = self.manifest(digest) {
                    manifests.insert(digest.clone(), data.clone());
                }
            }
        }

        SearchResults {
            repos,
            manifests,
            indexes,
            page,
        }
    }
}

fn latest(summaries: &[ImageSummary]) -> Option<DateTime<Utc>> {
    summaries.iter().filter_map(|s| s.last_updated).max()
}

/// Split a tag search query of the form `<repo>:<tag prefix>`.
fn parse_tag_query(query: &str) -> Result<(&str, &str)> {
    let mut parts = query.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(repo), Some(tag), None) => {
            let repo = repo.trim().trim_matches('/');
            if repo.is_empty() {
                return Err(Error::InvalidQuery(format!(
                    "no repository in tag query {query:?}"
                )));
            }
            Ok((repo, tag.trim()))
        }
        _ => Err(Error::InvalidQuery(format!(
            "expected <repo>:<tag> in tag query {query:?}"
        ))),
    }
}

impl MetaDb {
    /// Repository records the caller may read, in name order.
    async fn visible_repos(&self, ctx: &RequestContext) -> Result<Vec<RepoMetadata>> {
        ctx.check_cancelled()?;
        let records = self.backend.scan(Table::RepoMeta).await?;
        let mut repos = Vec::with_capacity(records.len());
        for (name, bytes) in records {
            if !ctx.can_read_repo(&name) {
                continue;
            }
            match serde_json::from_slice::<RepoMetadata>(&bytes) {
                Ok(meta) => repos.push(meta),
                Err(e) => tracing::warn!("skipping unreadable repository record {name:?}: {e}"),
            }
        }
        Ok(repos)
    }

    async fn repo_pipeline<R>(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        mut finder: RepoPageFinder,
        mut rank_of: R,
    ) -> Result<SearchResults>
    where
        R: FnMut(&RepoMetadata) -> Option<i32>,
    {
        let social = self.social_state(ctx).await?;
        let mut images = ImageCache::default();

        for mut meta in self.visible_repos(ctx).await? {
            ctx.check_cancelled()?;
            let rank = match rank_of(&meta) {
                Some(rank) => rank,
                None => continue,
            };

            let mut summaries = Vec::new();
            for descriptor in meta.tags.values() {
                match images.resolve(self, descriptor).await? {
                    Some(digests) => summaries.extend(images.summaries(&digests)),
                    None => tracing::warn!(
                        "{}: no stored blob for {}",
                        meta.name,
                        descriptor.digest
                    ),
                }
            }
            if !filter.accepts_repo(&summaries) {
                continue;
            }

            social.annotate(&mut meta);
            if !filter.accepts_state(meta.has_signatures(), meta.is_starred, meta.is_bookmarked) {
                continue;
            }

            let mut detailed = DetailedRepoMeta::new(meta);
            detailed.rank = rank;
            detailed.last_updated = latest(&summaries);
            finder.add(detailed);
        }

        let (repos, page) = finder.page();
        Ok(images.into_results(repos, page))
    }

    async fn tag_pipeline<R, T>(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        mut finder: TagPageFinder,
        mut rank_of: R,
        mut keep_tag: T,
    ) -> Result<SearchResults>
    where
        R: FnMut(&RepoMetadata) -> Option<i32>,
        T: FnMut(&RepoMetadata, &str, &[(&str, &ManifestData)]) -> bool,
    {
        let social = self.social_state(ctx).await?;
        let mut images = ImageCache::default();

        for mut meta in self.visible_repos(ctx).await? {
            ctx.check_cancelled()?;
            let rank = match rank_of(&meta) {
                Some(rank) => rank,
                None => continue,
            };
            social.annotate(&mut meta);

            let mut kept = BTreeMap::new();
            let mut last_updated = None;
            for (tag, descriptor) in &meta.tags {
                let digests = match images.resolve(self, descriptor).await? {
                    Some(digests) => digests,
                    None => {
                        tracing::warn!("{}:{tag}: no stored blob for {}", meta.name, descriptor.digest);
                        continue;
                    }
                };

                let summaries = images.summaries(&digests);
                if !filter.accepts_tag(&summaries) {
                    continue;
                }
                let is_signed = meta.is_signed(&descriptor.digest)
                    || digests.iter().any(|d| meta.is_signed(d));
                if !filter.accepts_state(is_signed, meta.is_starred, meta.is_bookmarked) {
                    continue;
                }
                let manifests: Vec<(&str, &ManifestData)> = digests
                    .iter()
                    .filter_map(|d| images.manifest(d).map(|data| (d.as_str(), data)))
                    .collect();
                if !keep_tag(&meta, tag, &manifests) {
                    continue;
                }

                last_updated = last_updated.max(latest(&summaries));
                kept.insert(tag.clone(), descriptor.clone());
            }
            if kept.is_empty() {
                continue;
            }
            meta.tags = kept;

            let mut detailed = DetailedRepoMeta::new(meta);
            detailed.rank = rank;
            detailed.last_updated = last_updated;
            finder.add(detailed);
        }

        let (repos, page) = finder.page();
        Ok(images.into_results(repos, page))
    }

    /// Repositories whose name matches `text`, ranked by relevance.
    #[tracing::instrument(skip(self, ctx, filter))]
    pub async fn search_repos(
        &self,
        ctx: &RequestContext,
        text: &str,
        filter: &Filter,
        page: &PageInput,
    ) -> Result<SearchResults> {
        let finder = RepoPageFinder::new(page)?;
        self.repo_pipeline(ctx, filter, finder, |meta| {
            let rank = rank_repo_name(text, &meta.name);
            (rank >= 0).then_some(rank)
        })
        .await
    }

    /// Tags of one repository starting with a prefix, queried as `<repo>:<tag prefix>`.
    ///
    /// An empty prefix matches every tag of the repository.
    #[tracing::instrument(skip(self, ctx, filter))]
    pub async fn search_tags(
        &self,
        ctx: &RequestContext,
        query: &str,
        filter: &Filter,
        page: &PageInput,
    ) -> Result<SearchResults> {
        let (repo, tag_prefix) = parse_tag_query(query)?;
        let finder = TagPageFinder::new(page)?;
        self.tag_pipeline(
            ctx,
            filter,
            finder,
            |meta| (meta.name == repo).then_some(0),
            |_, tag, _| tag.starts_with(tag_prefix),
        )
        .await
    }

    /// Repositories accepted by `predicate`.
    pub async fn filter_repos<P>(
        &self,
        ctx: &RequestContext,
        predicate: P,
        page: &PageInput,
    ) -> Result<SearchResults>
    where
        P: Fn(&RepoMetadata) -> bool,
    {
        let finder = RepoPageFinder::new(page)?;
        self.repo_pipeline(ctx, &Filter::default(), finder, |meta| {
            predicate(meta).then_some(0)
        })
        .await
    }

    /// Tags whose manifest is accepted by `predicate`. A tag pointing at an index is kept when
    /// any of its stored manifests is accepted.
    pub async fn filter_tags<P>(
        &self,
        ctx: &RequestContext,
        predicate: P,
        filter: &Filter,
        page: &PageInput,
    ) -> Result<SearchResults>
    where
        P: Fn(&RepoMetadata, &ManifestMetadata) -> bool,
    {
        let finder = TagPageFinder::new(page)?;
        self.tag_pipeline(
            ctx,
            filter,
            finder,
            |_| Some(0),
            |meta, _, manifests| {
                manifests.iter().any(|(digest, data)| {
                    predicate(meta, &ManifestMetadata::join(data, meta, digest))
                })
            },
        )
        .await
    }

    /// One page of the readable repositories accepted by `predicate`, without their blobs.
    pub async fn get_multiple_repo_meta<P>(
        &self,
        ctx: &RequestContext,
        predicate: P,
        page: &PageInput,
    ) -> Result<Vec<RepoMetadata>>
    where
        P: Fn(&RepoMetadata) -> bool,
    {
        let mut finder = RepoPageFinder::new(page)?;
        let social = self.social_state(ctx).await?;
        for mut meta in self.visible_repos(ctx).await? {
            ctx.check_cancelled()?;
            if !predicate(&meta) {
                continue;
            }
            social.annotate(&mut meta);
            finder.add(DetailedRepoMeta::new(meta));
        }
        Ok(finder.page().0)
    }
}
