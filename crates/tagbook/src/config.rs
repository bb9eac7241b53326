use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use tagbook_backend_dynamodb::DynamoDbConfig;
use tagbook_backend_redb::RedbConfig;
use tagbook_core::{MemoryBackend, MetaBackend};

#[derive(Clone, Deserialize)]
pub struct Config {
    pub backend: MetaBackendConfig,
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum MetaBackendConfig {
    Memory,
    Redb(RedbConfig),
    DynamoDb(DynamoDbConfig),
}

impl MetaBackendConfig {
    pub async fn new_backend(&self) -> Result<Arc<dyn MetaBackend>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryBackend::new()),
            Self::Redb(cfg) => Arc::new(cfg.new_backend()?),
            Self::DynamoDb(cfg) => Arc::new(cfg.new_backend().await?),
        })
    }
}
