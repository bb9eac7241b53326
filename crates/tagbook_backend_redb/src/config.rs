use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::backend::RedbBackend;
use super::errors::Result;

/// Location of the single-file database.
#[derive(Clone, Debug, Deserialize)]
pub struct RedbConfig {
    path: PathBuf,
}

impl RedbConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Open the database file, creating it if needed.
    pub fn new_backend(&self) -> Result<RedbBackend> {
        tracing::debug!("opening redb database at {}", self.path.display());
        let db = redb::Database::create(&self.path)?;
        RedbBackend::new(Arc::new(db))
    }
}
