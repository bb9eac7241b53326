//! # Entity Model
//!
//! Records persisted through a [`crate::MetaBackend`]. Repository records and blob records are
//! independently keyed: a repository refers to manifests and indexes by digest only, and either
//! side may be written first.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use oci_spec::image::MediaType;
use serde::{Deserialize, Serialize};

/// Target of a tag: the digest of a manifest or index together with its media type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub digest: String,
    pub media_type: MediaType,
}

impl Descriptor {
    pub fn new<S: Into<String>>(digest: S, media_type: MediaType) -> Self {
        Self {
            digest: digest.into(),
            media_type,
        }
    }

    /// Whether this descriptor points at a multi-platform index rather than a single manifest.
    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

pub(crate) fn is_index_media_type(media_type: &MediaType) -> bool {
    match media_type {
        MediaType::ImageIndex => true,
        MediaType::Other(s) => s == "application/vnd.docker.distribution.manifest.list.v2+json",
        _ => false,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorStatistics {
    pub download_count: u64,
}

/// Per-layer verification record of a signature.
///
/// `signer`, `date` and `is_trusted` are empty until a validity update pass fills them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub layer_digest: String,
    #[serde(default)]
    pub layer_content: Vec<u8>,
    #[serde(default)]
    pub signature_key: String,
    #[serde(default)]
    pub signer: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_trusted: bool,
}

impl LayerInfo {
    pub(crate) fn clear_verification(&mut self) {
        self.signer.clear();
        self.date = None;
        self.is_trusted = false;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature_manifest_digest: String,
    #[serde(default)]
    pub layers_info: Vec<LayerInfo>,
}

/// Signatures attached to one manifest, keyed by signing tool (eg `cosign`, `notation`).
pub type ManifestSignatures = BTreeMap<String, Vec<SignatureInfo>>;

/// Signature as reported by a registry write: which tool produced it and where it lives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignatureMetadata {
    pub signature_type: String,
    pub signature_digest: String,
    pub layers_info: Vec<LayerInfo>,
}

/// Artifact declaring a subject digest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferrerInfo {
    pub digest: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub artifact_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ReferrerInfo {
    pub fn new<S: Into<String>>(digest: S, media_type: MediaType) -> Self {
        Self {
            digest: digest.into(),
            media_type,
            artifact_type: String::new(),
            size: 0,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_artifact_type<S: Into<String>>(mut self, artifact_type: S) -> Self {
        self.artifact_type = artifact_type.into();
        self
    }
}

/// Durable per-repository record; the unit of atomicity for every repository mutation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, Descriptor>,
    /// Keyed by manifest digest.
    #[serde(default)]
    pub statistics: BTreeMap<String, DescriptorStatistics>,
    /// Keyed by manifest digest.
    #[serde(default)]
    pub signatures: BTreeMap<String, ManifestSignatures>,
    /// Keyed by subject digest.
    #[serde(default)]
    pub referrers: BTreeMap<String, Vec<ReferrerInfo>>,
    #[serde(default)]
    pub stars: u64,

    /// Whether the requesting user starred this repository; never persisted.
    #[serde(skip)]
    pub is_starred: bool,
    /// Whether the requesting user bookmarked this repository; never persisted.
    #[serde(skip)]
    pub is_bookmarked: bool,
}

impl RepoMetadata {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn download_count(&self) -> u64 {
        self.statistics.values().map(|s| s.download_count).sum()
    }

    pub fn is_signed(&self, digest: &str) -> bool {
        self.signatures
            .get(digest)
            .map(|by_tool| by_tool.values().any(|sigs| !sigs.is_empty()))
            .unwrap_or(false)
    }

    pub fn has_signatures(&self) -> bool {
        self.signatures.keys().any(|digest| self.is_signed(digest))
    }
}

/// Content-addressed manifest blob plus the image configuration blob it references.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    #[serde(default)]
    pub manifest_blob: Vec<u8>,
    #[serde(default)]
    pub config_blob: Vec<u8>,
}

/// Content-addressed index blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexData {
    #[serde(default)]
    pub index_blob: Vec<u8>,
}

/// A manifest's content joined with the repository-scoped data recorded about it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManifestMetadata {
    pub manifest_blob: Vec<u8>,
    pub config_blob: Vec<u8>,
    pub download_count: u64,
    pub signatures: ManifestSignatures,
}

impl ManifestMetadata {
    pub(crate) fn join(data: &ManifestData, repo: &RepoMetadata, digest: &str) -> Self {
        Self {
            manifest_blob: data.manifest_blob.clone(),
            config_blob: data.config_blob.clone(),
            download_count: repo
                .statistics
                .get(digest)
                .map(|s| s.download_count)
                .unwrap_or(0),
            signatures: repo.signatures.get(digest).cloned().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyDetails {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator_ua: String,
    #[serde(default)]
    pub generated_by: String,
    #[serde(default)]
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub uuid: String,
}

/// Per-user record: group membership, API keys and social state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub groups: Vec<String>,
    /// Keyed by API key hash.
    #[serde(default)]
    pub api_keys: BTreeMap<String, ApiKeyDetails>,
    #[serde(default)]
    pub starred_repos: BTreeSet<String>,
    #[serde(default)]
    pub bookmarked_repos: BTreeSet<String>,
}

/// Transition reported by star and bookmark toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ToggleState {
    NotChanged,
    Added,
    Removed,
}
