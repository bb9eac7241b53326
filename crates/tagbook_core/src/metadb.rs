use std::sync::Arc;

use oci_spec::image::MediaType;

use crate::backend::{MetaBackend, MetaBackendExt, Table};
use crate::errors::{Error, Result};
use crate::oci_digest::OciDigest;
use crate::reference::{require_non_empty, validate_repo_name, Reference};
use crate::signatures::{SignatureVerifier, UnconfiguredVerifier};
use crate::types::{
    Descriptor, IndexData, ManifestData, ManifestMetadata, RepoMetadata,
};

/// Schema version written by this release.
pub const SCHEMA_VERSION: &str = "V1";

const VERSION_KEY: &str = "version";

/// Entry point to the metadata store.
///
/// Every mutation of a repository is a single atomic read-modify-write of that repository's
/// record, so concurrent writers to the same repository never lose updates. No operation spans
/// more than one record atomically.
#[derive(Clone)]
pub struct MetaDb {
    pub(crate) backend: Arc<dyn MetaBackend>,
    pub(crate) verifier: Arc<dyn SignatureVerifier>,
}

impl MetaDb {
    /// Open the store held by `backend`, recording the schema version on first use.
    pub async fn open(backend: Arc<dyn MetaBackend>) -> Result<Self> {
        let mut found: Option<String> = None;
        backend
            .update_record(Table::Version, VERSION_KEY, |old: Option<String>| {
                found = old.clone();
                match old {
                    Some(_) => Ok(None),
                    None => Ok(Some(String::from(SCHEMA_VERSION))),
                }
            })
            .await?;

        match found {
            Some(v) if v != SCHEMA_VERSION => return Err(Error::UnsupportedSchemaVersion(v)),
            Some(_) => tracing::debug!("opened metadata store at schema {SCHEMA_VERSION}"),
            None => tracing::info!("initialized metadata store at schema {SCHEMA_VERSION}"),
        }

        Ok(Self {
            backend,
            verifier: Arc::new(UnconfiguredVerifier),
        })
    }

    /// Use `verifier` to establish signature trust in
    /// [`MetaDb::update_signatures_validity`].
    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn backend(&self) -> &Arc<dyn MetaBackend> {
        &self.backend
    }

    pub(crate) async fn load_repo(&self, repo: &str) -> Result<RepoMetadata> {
        self.backend
            .get_record::<RepoMetadata>(Table::RepoMeta, repo)
            .await?
            .ok_or_else(|| Error::NotFound(format!("repository {repo:?}")))
    }

    /// Atomically apply `f` to the record of `repo`, failing with [`Error::NotFound`] if there is
    /// no such record.
    pub(crate) async fn update_existing_repo<F>(&self, repo: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&mut RepoMetadata) -> Result<()> + Send,
    {
        self.backend
            .update_record(Table::RepoMeta, repo, |old: Option<RepoMetadata>| {
                let mut meta = old.ok_or_else(|| Error::NotFound(format!("repository {repo:?}")))?;
                f(&mut meta)?;
                Ok(Some(meta))
            })
            .await
    }

    /// Atomically apply `f` to the record of `repo`, creating an empty record first if needed.
    pub(crate) async fn upsert_repo<F>(&self, repo: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&mut RepoMetadata) -> Result<()> + Send,
    {
        self.backend
            .update_record(Table::RepoMeta, repo, |old: Option<RepoMetadata>| {
                let mut meta = old.unwrap_or_else(|| RepoMetadata::new(repo));
                f(&mut meta)?;
                Ok(Some(meta))
            })
            .await
    }

    /// Point `reference` of `repo` at `digest`, creating the repository if needed.
    ///
    /// A `reference` that is itself a digest (a push by digest) records the manifest in the
    /// repository's statistics without adding a tag.
    #[tracing::instrument(skip(self))]
    pub async fn set_repo_reference(
        &self,
        repo: &str,
        reference: &str,
        digest: &str,
        media_type: MediaType,
    ) -> Result<()> {
        validate_repo_name(repo)?;
        let reference: Reference = reference.parse()?;
        let digest = OciDigest::try_from(digest)
            .map_err(Error::into_input_error)?
            .to_string();

        self.upsert_repo(repo, |meta| {
            if let Reference::Tag(tag) = &reference {
                meta.tags
                    .insert(tag.clone(), Descriptor::new(digest.clone(), media_type.clone()));
            }
            meta.statistics.entry(digest.clone()).or_default();
            Ok(())
        })
        .await
    }

    /// Remove `tag` from `repo`. Absent tags and repositories are ignored.
    #[tracing::instrument(skip(self))]
    pub async fn delete_repo_tag(&self, repo: &str, tag: &str) -> Result<()> {
        self.backend
            .update_record(Table::RepoMeta, repo, |old: Option<RepoMetadata>| match old {
                Some(mut meta) => Ok(meta.tags.remove(tag).map(|_| meta)),
                None => Ok(None),
            })
            .await
    }

    pub async fn get_repo_meta(&self, repo: &str) -> Result<RepoMetadata> {
        self.load_repo(repo).await
    }

    /// Replace the record of `repo` wholesale.
    pub async fn set_repo_meta(&self, repo: &str, mut meta: RepoMetadata) -> Result<()> {
        require_non_empty("repository name", repo)?;
        meta.name = repo.to_string();
        self.backend.put_record(Table::RepoMeta, repo, &meta).await
    }

    pub async fn set_manifest_data(&self, digest: &str, data: &ManifestData) -> Result<()> {
        require_non_empty("manifest digest", digest)?;
        self.backend
            .put_record(Table::ManifestData, digest, data)
            .await
    }

    pub async fn get_manifest_data(&self, digest: &str) -> Result<ManifestData> {
        self.backend
            .get_record(Table::ManifestData, digest)
            .await?
            .ok_or_else(|| Error::NotFound(format!("manifest {digest:?}")))
    }

    pub async fn set_index_data(&self, digest: &str, data: &IndexData) -> Result<()> {
        require_non_empty("index digest", digest)?;
        self.backend.put_record(Table::IndexData, digest, data).await
    }

    pub async fn get_index_data(&self, digest: &str) -> Result<IndexData> {
        self.backend
            .get_record(Table::IndexData, digest)
            .await?
            .ok_or_else(|| Error::NotFound(format!("index {digest:?}")))
    }

    /// Store a manifest's content together with the download count and signatures `repo`
    /// records for it, creating the repository if needed.
    #[tracing::instrument(skip(self, meta))]
    pub async fn set_manifest_meta(
        &self,
        repo: &str,
        digest: &str,
        meta: ManifestMetadata,
    ) -> Result<()> {
        require_non_empty("repository name", repo)?;
        self.set_manifest_data(
            digest,
            &ManifestData {
                manifest_blob: meta.manifest_blob,
                config_blob: meta.config_blob,
            },
        )
        .await?;

        self.upsert_repo(repo, |repo_meta| {
            repo_meta
                .statistics
                .entry(digest.to_string())
                .or_default()
                .download_count = meta.download_count;
            repo_meta
                .signatures
                .insert(digest.to_string(), meta.signatures.clone());
            Ok(())
        })
        .await
    }

    /// A manifest's content joined with what `repo` records about it.
    pub async fn get_manifest_meta(&self, repo: &str, digest: &str) -> Result<ManifestMetadata> {
        let data = self.get_manifest_data(digest).await?;
        let repo_meta = match self.load_repo(repo).await {
            Ok(m) => m,
            Err(Error::NotFound(_)) => RepoMetadata::new(repo),
            Err(e) => return Err(e),
        };
        Ok(ManifestMetadata::join(&data, &repo_meta, digest))
    }

    pub async fn increment_repo_stars(&self, repo: &str) -> Result<()> {
        self.update_existing_repo(repo, |meta| {
            meta.stars += 1;
            Ok(())
        })
        .await
    }

    /// Decrement the star count of `repo`, stopping at zero.
    pub async fn decrement_repo_stars(&self, repo: &str) -> Result<()> {
        self.update_existing_repo(repo, |meta| {
            meta.stars = meta.stars.saturating_sub(1);
            Ok(())
        })
        .await
    }

    pub async fn get_repo_stars(&self, repo: &str) -> Result<u64> {
        Ok(self.load_repo(repo).await?.stars)
    }

    /// Count one download of the manifest `reference` (a tag or a digest) resolves to.
    #[tracing::instrument(skip(self))]
    pub async fn increment_image_downloads(&self, repo: &str, reference: &str) -> Result<()> {
        self.update_existing_repo(repo, |meta| {
            let digest = match meta.tags.get(reference) {
                Some(descriptor) => descriptor.digest.clone(),
                None => reference.to_string(),
            };
            let stats = meta
                .statistics
                .get_mut(&digest)
                .ok_or_else(|| Error::NotFound(format!("manifest {digest:?} in {repo:?}")))?;
            stats.download_count += 1;
            Ok(())
        })
        .await
    }
}
