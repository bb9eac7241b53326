//! Lenient views over stored manifest, config and index blobs.
//!
//! Blobs are stored exactly as pushed, so they may be partial documents (eg `{}`) or lack fields
//! the image spec marks as required. Extraction never fails: missing or malformed fields read as
//! empty.
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{IndexData, ManifestData};

#[derive(Debug, Default, Deserialize)]
struct ConfigDoc {
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    history: Vec<HistoryDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryDoc {
    #[serde(default)]
    created: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexDoc {
    #[serde(default)]
    manifests: Vec<IndexEntryDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexEntryDoc {
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestDoc {
    #[serde(default, rename = "artifactType")]
    artifact_type: Option<String>,
    #[serde(default)]
    config: Option<ConfigDescriptorDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDescriptorDoc {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Platform and age of a single-platform image, extracted from its config blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageSummary {
    pub os: String,
    pub arch: String,
    /// Latest of the config creation time and the history entry creation times.
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&ManifestData> for ImageSummary {
    fn from(data: &ManifestData) -> Self {
        let config: ConfigDoc = match serde_json::from_slice(&data.config_blob) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("unparseable image config: {e}");
                ConfigDoc::default()
            }
        };

        let last_updated = config
            .history
            .iter()
            .filter_map(|h| h.created.as_deref().and_then(parse_time))
            .chain(config.created.as_deref().and_then(parse_time))
            .max();

        Self {
            os: config.os.unwrap_or_default(),
            arch: config.architecture.unwrap_or_default(),
            last_updated,
        }
    }
}

/// Digests of the manifests an index refers to, in index order.
pub fn index_manifest_digests(data: &IndexData) -> Vec<String> {
    match serde_json::from_slice::<IndexDoc>(&data.index_blob) {
        Ok(doc) => doc
            .manifests
            .into_iter()
            .map(|m| m.digest)
            .filter(|d| !d.is_empty())
            .collect(),
        Err(e) => {
            tracing::debug!("unparseable image index: {e}");
            Vec::new()
        }
    }
}

/// Artifact type of a manifest: its `artifactType` field, falling back to the config media type.
pub fn manifest_artifact_type(data: &ManifestData) -> String {
    let doc: ManifestDoc = serde_json::from_slice(&data.manifest_blob).unwrap_or_default();
    doc.artifact_type
        .filter(|t| !t.is_empty())
        .or_else(|| doc.config.and_then(|c| c.media_type))
        .unwrap_or_default()
}
