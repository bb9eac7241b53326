//! Signature bookkeeping and trust evaluation.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oci_spec::image::MediaType;
use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::metadb::MetaDb;
use crate::reference::require_non_empty;
use crate::types::{LayerInfo, ManifestData, SignatureInfo, SignatureMetadata};

/// Descriptor of the manifest a signature claims to cover.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedDescriptor {
    pub digest: String,
    pub media_type: MediaType,
    pub size: u64,
}

/// What a verifier establishes about one signature layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Verification {
    pub signer: String,
    pub date: Option<DateTime<Utc>>,
    pub is_trusted: bool,
}

/// External authority deciding whether a signature is authentic.
///
/// Cryptographic verification and trust store management live outside the metadata store; the
/// store only records the outcome.
#[async_trait]
pub trait SignatureVerifier: Send + Sync + 'static {
    /// Verify one layer of a signature produced by `signature_type` (eg `cosign`, `notation`)
    /// over `signed`.
    async fn verify(
        &self,
        signature_type: &str,
        layer: &LayerInfo,
        signed: &SignedDescriptor,
    ) -> Result<Verification>;
}

/// Verifier used when none is configured; every verification fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredVerifier;

#[async_trait]
impl SignatureVerifier for UnconfiguredVerifier {
    async fn verify(
        &self,
        _signature_type: &str,
        _layer: &LayerInfo,
        _signed: &SignedDescriptor,
    ) -> Result<Verification> {
        Err(Error::Verification(String::from("no verifier configured")))
    }
}

#[derive(Deserialize)]
struct MediaTypeDoc {
    #[serde(default, rename = "mediaType")]
    media_type: Option<MediaType>,
}

fn signed_descriptor(digest: &str, data: Option<&ManifestData>) -> SignedDescriptor {
    let (media_type, size) = match data {
        Some(data) => (
            serde_json::from_slice::<MediaTypeDoc>(&data.manifest_blob)
                .ok()
                .and_then(|d| d.media_type)
                .unwrap_or(MediaType::ImageManifest),
            data.manifest_blob.len() as u64,
        ),
        None => (MediaType::ImageManifest, 0),
    };
    SignedDescriptor {
        digest: digest.to_string(),
        media_type,
        size,
    }
}

type LayerKey = (String, String, usize);

impl MetaDb {
    /// Record a signature of `signed_digest` in `repo`.
    ///
    /// Signatures may arrive before the manifest they sign is referenced, so the repository
    /// record is created if needed. Re-adding a known signature is a no-op.
    #[tracing::instrument(skip(self, signature), fields(tool = %signature.signature_type))]
    pub async fn add_manifest_signature(
        &self,
        repo: &str,
        signed_digest: &str,
        signature: SignatureMetadata,
    ) -> Result<()> {
        require_non_empty("repository name", repo)?;
        require_non_empty("signed manifest digest", signed_digest)?;
        require_non_empty("signature type", &signature.signature_type)?;

        self.upsert_repo(repo, |meta| {
            let by_tool = meta
                .signatures
                .entry(signed_digest.to_string())
                .or_default();
            let sigs = by_tool
                .entry(signature.signature_type.clone())
                .or_default();
            if !sigs
                .iter()
                .any(|s| s.signature_manifest_digest == signature.signature_digest)
            {
                sigs.push(SignatureInfo {
                    signature_manifest_digest: signature.signature_digest.clone(),
                    layers_info: signature.layers_info.clone(),
                });
            }
            Ok(())
        })
        .await
    }

    /// Remove the first signature of `signed_digest` made by the same tool with the same digest.
    ///
    /// Fails with [`Error::NotFound`] when nothing about `signed_digest` is recorded; deleting an
    /// unknown signature of a known manifest succeeds.
    #[tracing::instrument(skip(self, signature), fields(tool = %signature.signature_type))]
    pub async fn delete_signature(
        &self,
        repo: &str,
        signed_digest: &str,
        signature: SignatureMetadata,
    ) -> Result<()> {
        self.update_existing_repo(repo, |meta| {
            let by_tool = meta.signatures.get_mut(signed_digest).ok_or_else(|| {
                Error::NotFound(format!("signatures of {signed_digest:?} in {repo:?}"))
            })?;
            if let Some(sigs) = by_tool.get_mut(&signature.signature_type) {
                if let Some(i) = sigs
                    .iter()
                    .position(|s| s.signature_manifest_digest == signature.signature_digest)
                {
                    sigs.remove(i);
                }
            }
            Ok(())
        })
        .await
    }

    /// Recompute signer, date and trust of every signature layer of `signed_digest`.
    ///
    /// A layer the verifier rejects has its fields cleared; that never fails the call.
    #[tracing::instrument(skip(self))]
    pub async fn update_signatures_validity(&self, repo: &str, signed_digest: &str) -> Result<()> {
        let meta = self.load_repo(repo).await?;
        let by_tool = match meta.signatures.get(signed_digest) {
            Some(by_tool) => by_tool,
            None => return Ok(()),
        };

        let data = match self.get_manifest_data(signed_digest).await {
            Ok(d) => Some(d),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let signed = signed_descriptor(signed_digest, data.as_ref());

        let mut outcomes: HashMap<LayerKey, Verification> = HashMap::new();
        for (tool, sigs) in by_tool {
            for sig in sigs {
                for (i, layer) in sig.layers_info.iter().enumerate() {
                    let outcome = match self.verifier.verify(tool, layer, &signed).await {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(
                                "signature {} layer {:?} of {signed_digest} failed verification: {e}",
                                sig.signature_manifest_digest,
                                layer.layer_digest,
                            );
                            Verification::default()
                        }
                    };
                    outcomes.insert(
                        (tool.clone(), sig.signature_manifest_digest.clone(), i),
                        outcome,
                    );
                }
            }
        }

        self.update_existing_repo(repo, |meta| {
            let by_tool = match meta.signatures.get_mut(signed_digest) {
                Some(by_tool) => by_tool,
                None => return Ok(()),
            };
            for (tool, sigs) in by_tool.iter_mut() {
                for sig in sigs.iter_mut() {
                    for (i, layer) in sig.layers_info.iter_mut().enumerate() {
                        let key = (tool.clone(), sig.signature_manifest_digest.clone(), i);
                        match outcomes.get(&key) {
                            Some(v) => {
                                layer.signer = v.signer.clone();
                                layer.date = v.date;
                                layer.is_trusted = v.is_trusted;
                            }
                            // added after verification started
                            None => layer.clear_verification(),
                        }
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::*;

    struct TrustLayersWithKey(&'static str);

    #[async_trait]
    impl SignatureVerifier for TrustLayersWithKey {
        async fn verify(
            &self,
            _signature_type: &str,
            layer: &LayerInfo,
            signed: &SignedDescriptor,
        ) -> Result<Verification> {
            if layer.signature_key == self.0 {
                Ok(Verification {
                    signer: format!("signer of {}", signed.digest),
                    date: DateTime::<Utc>::from_timestamp(1_700_000_000, 0),
                    is_trusted: true,
                })
            } else {
                Err(Error::Verification(String::from("untrusted key")))
            }
        }
    }

    fn cosign(digest: &str, keys: &[&str]) -> SignatureMetadata {
        SignatureMetadata {
            signature_type: String::from("cosign"),
            signature_digest: digest.to_string(),
            layers_info: keys
                .iter()
                .map(|k| LayerInfo {
                    layer_digest: format!("layer-{k}"),
                    signature_key: k.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn add_signature_before_reference() {
        let db = metadb().await;
        let d = digest_of("fake-manifest1");

        db.add_manifest_signature("repo1", &d, cosign("digest", &[]))
            .await
            .unwrap();
        db.add_manifest_signature("repo1", &d, cosign("digest", &[]))
            .await
            .unwrap();
        db.set_repo_reference("repo1", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();
        db.set_manifest_data(&d, &ManifestData::default())
            .await
            .unwrap();

        let meta = db.get_repo_meta("repo1").await.unwrap();
        let sigs = &meta.signatures[&d]["cosign"];
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].signature_manifest_digest, "digest");
        assert_eq!(meta.tags["0.0.1"].digest, d);
    }

    #[tokio::test]
    async fn signatures_of_one_tool_accumulate_in_order() {
        let db = metadb().await;
        let d = digest_of("m");
        for sig in ["first", "second", "third"] {
            db.add_manifest_signature("repo1", &d, cosign(sig, &[]))
                .await
                .unwrap();
        }
        let meta = db.get_repo_meta("repo1").await.unwrap();
        let order: Vec<&str> = meta.signatures[&d]["cosign"]
            .iter()
            .map(|s| s.signature_manifest_digest.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn delete_signature() {
        let db = metadb().await;
        let d = digest_of("fake-manifest1");
        db.set_repo_reference("repo1", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();
        db.add_manifest_signature("repo1", &d, cosign("digest", &[]))
            .await
            .unwrap();

        db.delete_signature("repo1", &d, cosign("digest", &[]))
            .await
            .unwrap();
        let meta = db.get_repo_meta("repo1").await.unwrap();
        assert!(meta.signatures[&d]["cosign"].is_empty());

        db.delete_signature("repo1", &d, cosign("unknown", &[]))
            .await
            .unwrap();
        assert!(db
            .delete_signature("repo1", "badDigest", cosign("digest", &[]))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(db
            .delete_signature("badRepo", &d, cosign("digest", &[]))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn untrusted_signature_layers_are_cleared() {
        let db = metadb().await;
        let d = digest_of("dig");
        db.set_repo_reference("repo1", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();
        db.set_manifest_data(
            &d,
            &ManifestData {
                manifest_blob: b"Bad Manifest".to_vec(),
                config_blob: b"Bad Manifest".to_vec(),
            },
        )
        .await
        .unwrap();

        let mut sig = cosign(&d, &["key"]);
        sig.layers_info[0].signer = String::from("stale signer");
        db.add_manifest_signature("repo1", &d, sig).await.unwrap();

        db.update_signatures_validity("repo1", &d).await.unwrap();

        let meta = db.get_repo_meta("repo1").await.unwrap();
        let layer = &meta.signatures[&d]["cosign"][0].layers_info[0];
        assert!(layer.signer.is_empty());
        assert_eq!(layer.date, None);
        assert!(!layer.is_trusted);
    }

    #[tokio::test]
    async fn validity_is_recomputed_per_layer() {
        let db = metadb()
            .await
            .with_verifier(Arc::new(TrustLayersWithKey("trusted")));
        let image = TestImage::new("linux", "amd64");
        let d = image.digest();
        db.set_manifest_data(&d, &image.data()).await.unwrap();
        db.set_repo_reference("repo", "0.0.1", &d, MediaType::ImageManifest)
            .await
            .unwrap();
        db.add_manifest_signature("repo", &d, cosign("sig", &["trusted", "rogue"]))
            .await
            .unwrap();

        db.update_signatures_validity("repo", &d).await.unwrap();

        let meta = db.get_repo_meta("repo").await.unwrap();
        let layers = &meta.signatures[&d]["cosign"][0].layers_info;
        assert_eq!(layers[0].signer, format!("signer of {d}"));
        assert!(layers[0].is_trusted);
        assert!(layers[0].date.is_some());
        assert!(layers[1].signer.is_empty());
        assert!(!layers[1].is_trusted);

        db.update_signatures_validity("repo", &digest_of("unsigned"))
            .await
            .unwrap();
        assert!(db
            .update_signatures_validity("missing", &d)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
