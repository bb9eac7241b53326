use std::sync::Arc;

use serde_json::json;

use crate::memory::MemoryBackend;
use crate::metadb::MetaDb;
use crate::oci_digest::OciDigest;
use crate::types::{IndexData, ManifestData};

pub(crate) async fn metadb() -> MetaDb {
    MetaDb::open(Arc::new(MemoryBackend::new())).await.unwrap()
}

pub(crate) fn digest_of(s: &str) -> String {
    OciDigest::from(s.as_bytes()).to_string()
}

/// Single-platform image whose blobs are valid OCI JSON.
pub(crate) struct TestImage {
    os: String,
    arch: String,
    created: Option<String>,
}

impl TestImage {
    pub(crate) fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            created: None,
        }
    }

    pub(crate) fn created(mut self, rfc3339: &str) -> Self {
        self.created = Some(rfc3339.to_string());
        self
    }

    fn config_blob(&self) -> Vec<u8> {
        let mut config = json!({
            "os": self.os,
            "architecture": self.arch,
            "rootfs": {"type": "layers", "diff_ids": []},
        });
        if let Some(created) = &self.created {
            config["created"] = json!(created);
        }
        serde_json::to_vec(&config).unwrap()
    }

    fn manifest_blob(&self) -> Vec<u8> {
        let config = self.config_blob();
        serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": OciDigest::from(config.as_slice()).to_string(),
                "size": config.len(),
            },
            "layers": [],
        }))
        .unwrap()
    }

    pub(crate) fn data(&self) -> ManifestData {
        ManifestData {
            manifest_blob: self.manifest_blob(),
            config_blob: self.config_blob(),
        }
    }

    pub(crate) fn digest(&self) -> String {
        OciDigest::from(self.manifest_blob().as_slice()).to_string()
    }

    fn platform(&self) -> serde_json::Value {
        json!({"os": self.os, "architecture": self.arch})
    }
}

/// Image index over a set of [`TestImage`]s.
pub(crate) struct TestIndex {
    blob: Vec<u8>,
}

impl TestIndex {
    pub(crate) fn new(images: &[&TestImage]) -> Self {
        let manifests: Vec<serde_json::Value> = images
            .iter()
            .map(|image| {
                json!({
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": image.digest(),
                    "size": image.manifest_blob().len(),
                    "platform": image.platform(),
                })
            })
            .collect();
        let blob = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": manifests,
        }))
        .unwrap();
        Self { blob }
    }

    pub(crate) fn data(&self) -> IndexData {
        IndexData {
            index_blob: self.blob.clone(),
        }
    }

    pub(crate) fn digest(&self) -> String {
        OciDigest::from(self.blob.as_slice()).to_string()
    }
}
