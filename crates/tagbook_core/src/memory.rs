//! In-memory metadata backend for tests and ephemeral deployments
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{MetaBackend, Mutator, Table};
use crate::errors::Result;

/// Tables held in process memory. Clones share the same underlying tables.
#[derive(Clone)]
pub struct MemoryBackend {
    tables: Arc<RwLock<HashMap<Table, BTreeMap<String, Vec<u8>>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaBackend for MemoryBackend {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get_mut(&table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn update(&self, table: Table, key: &str, mutator: &mut Mutator<'_>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let t = tables.entry(table).or_default();
        if let Some(new) = mutator(t.get(key).map(|v| v.as_slice()))? {
            t.insert(key.to_string(), new);
        }
        Ok(())
    }

    async fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
