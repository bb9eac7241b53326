use crate::errors::{Error, Result};
use crate::images::manifest_artifact_type;
use crate::metadb::MetaDb;
use crate::reference::require_non_empty;
use crate::types::ReferrerInfo;

impl MetaDb {
    /// Attach `referrer` to `subject_digest` in `repo`, creating the repository if needed.
    ///
    /// Referrers are a set keyed by artifact digest; adding a known referrer is a no-op. When the
    /// referrer carries no artifact type and its manifest is stored, the type is read from the
    /// manifest.
    #[tracing::instrument(skip(self, referrer), fields(referrer = %referrer.digest))]
    pub async fn set_referrer(
        &self,
        repo: &str,
        subject_digest: &str,
        mut referrer: ReferrerInfo,
    ) -> Result<()> {
        require_non_empty("repository name", repo)?;
        require_non_empty("subject digest", subject_digest)?;
        require_non_empty("referrer digest", &referrer.digest)?;

        if referrer.artifact_type.is_empty() {
            match self.get_manifest_data(&referrer.digest).await {
                Ok(data) => referrer.artifact_type = manifest_artifact_type(&data),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.upsert_repo(repo, |meta| {
            let referrers = meta
                .referrers
                .entry(subject_digest.to_string())
                .or_default();
            if !referrers.iter().any(|r| r.digest == referrer.digest) {
                referrers.push(referrer.clone());
            }
            Ok(())
        })
        .await
    }

    /// Detach the referrer `referrer_digest` from `subject_digest`. Unknown referrers, subjects and
    /// repositories are ignored.
    #[tracing::instrument(skip(self))]
    pub async fn delete_referrer(
        &self,
        repo: &str,
        subject_digest: &str,
        referrer_digest: &str,
    ) -> Result<()> {
        match self
            .update_existing_repo(repo, |meta| {
                if let Some(referrers) = meta.referrers.get_mut(subject_digest) {
                    referrers.retain(|r| r.digest != referrer_digest);
                }
                Ok(())
            })
            .await
        {
            Err(Error::NotFound(_)) => Ok(()),
            res => res,
        }
    }

    /// Referrers of `subject_digest`, restricted to `artifact_types` when it is non-empty.
    pub async fn get_referrers_info(
        &self,
        repo: &str,
        subject_digest: &str,
        artifact_types: &[String],
    ) -> Result<Vec<ReferrerInfo>> {
        let meta = self.load_repo(repo).await?;
        Ok(meta
            .referrers
            .get(subject_digest)
            .map(|referrers| {
                referrers
                    .iter()
                    .filter(|r| artifact_types.is_empty() || artifact_types.contains(&r.artifact_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use oci_spec::image::MediaType;

    use super::*;
    use crate::test_support::*;
    use crate::types::ManifestData;

    #[tokio::test]
    async fn referrers_set_get_delete() {
        let db = metadb().await;
        let image = TestImage::new("linux", "amd64");
        let subject = image.digest();
        db.set_manifest_data(&subject, &image.data()).await.unwrap();
        db.set_repo_reference("repo", "tag", &subject, MediaType::ImageManifest)
            .await
            .unwrap();

        let a1 = digest_of("artifact1");
        let a2 = digest_of("artifact2");
        for a in [&a1, &a2] {
            db.set_referrer("repo", &subject, ReferrerInfo::new(a.as_str(), MediaType::ImageManifest))
                .await
                .unwrap();
        }

        let referrers = db.get_referrers_info("repo", &subject, &[]).await.unwrap();
        assert_eq!(referrers.len(), 2);
        assert!(referrers.contains(&ReferrerInfo::new(a1.as_str(), MediaType::ImageManifest)));
        assert!(referrers.contains(&ReferrerInfo::new(a2.as_str(), MediaType::ImageManifest)));

        db.delete_referrer("repo", &subject, &a1).await.unwrap();
        db.delete_referrer("repo", &subject, &a2).await.unwrap();
        db.delete_referrer("repo", &subject, &a2).await.unwrap();
        db.delete_referrer("missing", &subject, &a2).await.unwrap();
        assert!(db
            .get_referrers_info("repo", &subject, &[])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn referrer_on_empty_repo_creates_it_once() {
        let db = metadb().await;
        let subject = digest_of("referredDigest");
        let referrer = digest_of("referrerDigest");
        assert!(db.get_repo_meta("repo").await.is_err());

        for _ in 0..2 {
            db.set_referrer(
                "repo",
                &subject,
                ReferrerInfo::new(referrer.as_str(), MediaType::ImageManifest),
            )
            .await
            .unwrap();
        }

        let meta = db.get_repo_meta("repo").await.unwrap();
        assert_eq!(meta.referrers[&subject].len(), 1);
        assert_eq!(meta.referrers[&subject][0].digest, referrer);
    }

    #[tokio::test]
    async fn referrers_filtered_by_artifact_type() {
        let db = metadb().await;
        let subject = digest_of("referredDigest");

        db.set_manifest_data(
            "goodManifest",
            &ManifestData {
                manifest_blob: br#"{"artifactType": "unwantedType"}"#.to_vec(),
                config_blob: b"{}".to_vec(),
            },
        )
        .await
        .unwrap();

        db.set_referrer(
            "repo",
            &subject,
            ReferrerInfo::new("inexistentManifestDigest", MediaType::ImageManifest),
        )
        .await
        .unwrap();
        db.set_referrer(
            "repo",
            &subject,
            ReferrerInfo::new("goodManifestUnwanted", MediaType::ImageManifest)
                .with_artifact_type("unwantedType"),
        )
        .await
        .unwrap();
        db.set_referrer(
            "repo",
            &subject,
            ReferrerInfo::new("goodManifest", MediaType::ImageManifest)
                .with_artifact_type("wantedType"),
        )
        .await
        .unwrap();

        let wanted = db
            .get_referrers_info("repo", &subject, &[String::from("wantedType")])
            .await
            .unwrap();
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].artifact_type, "wantedType");
        assert_eq!(wanted[0].digest, "goodManifest");

        assert_eq!(
            db.get_referrers_info("repo", &subject, &[]).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn referrer_artifact_type_read_from_stored_manifest() {
        let db = metadb().await;
        let subject = digest_of("subject");
        let artifact = digest_of("sbom");
        db.set_manifest_data(
            &artifact,
            &ManifestData {
                manifest_blob: br#"{"config":{"mediaType":"application/x.sbom"}}"#.to_vec(),
                config_blob: b"{}".to_vec(),
            },
        )
        .await
        .unwrap();

        db.set_referrer(
            "repo",
            &subject,
            ReferrerInfo::new(artifact.as_str(), MediaType::ImageManifest),
        )
        .await
        .unwrap();

        let sboms = db
            .get_referrers_info("repo", &subject, &[String::from("application/x.sbom")])
            .await
            .unwrap();
        assert_eq!(sboms.len(), 1);
    }
}
