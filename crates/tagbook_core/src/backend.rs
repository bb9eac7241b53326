//! # Backend Abstraction
//!
//! Defines the storage seam between [`crate::MetaDb`] and the physical key-value stores that hold
//! its records.
//!
//! A backend is a set of logical [`Table`]s, each mapping string keys to opaque byte values. The
//! metadata layer never relies on anything beyond the operations of [`MetaBackend`], so every
//! conforming implementation is a drop-in substitute for every other.
//!
//! ## Known Implementations
//!
//! ### [`crate::MemoryBackend`]
//!
//! Process-local tables behind a single lock. Used by tests and ephemeral deployments.
//!
//! ### tagbook_backend_redb
//!
//! Embedded single-file store. Every [`MetaBackend::update`] runs inside one write transaction.
//!
//! ### tagbook_backend_dynamodb
//!
//! Managed cloud table. [`MetaBackend::update`] is implemented with optimistic concurrency: a
//! version attribute is compared on write and the read-modify-write is retried on conflict.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Result;

/// Logical tables of the metadata store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// Repository name -> [`crate::types::RepoMetadata`].
    RepoMeta,
    /// Manifest digest -> [`crate::types::ManifestData`].
    ManifestData,
    /// Index digest -> [`crate::types::IndexData`].
    IndexData,
    /// Username -> [`crate::types::UserData`].
    UserData,
    /// API key hash -> owning username.
    ApiKeys,
    /// Store-wide bookkeeping such as the schema version.
    Version,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::RepoMeta,
        Table::ManifestData,
        Table::IndexData,
        Table::UserData,
        Table::ApiKeys,
        Table::Version,
    ];

    /// Stable name used by backends to derive physical table names.
    pub fn name(&self) -> &'static str {
        match self {
            Table::RepoMeta => "RepoMetadataTable",
            Table::ManifestData => "ManifestDataTable",
            Table::IndexData => "IndexDataTable",
            Table::UserData => "UserDataTable",
            Table::ApiKeys => "ApiKeyTable",
            Table::Version => "VersionTable",
        }
    }
}

/// Read-modify-write callback passed to [`MetaBackend::update`].
///
/// Receives the current value (`None` when the key is absent) and returns the value to store, or
/// `None` to leave the key untouched. Returning an error aborts the update without writing and
/// the error is handed back to the caller of [`MetaBackend::update`] unchanged.
pub type Mutator<'a> = dyn FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>> + Send + 'a;

/// Durable key-value storage for the metadata store.
#[async_trait]
pub trait MetaBackend: Send + Sync + 'static {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, table: Table, key: &str) -> Result<()>;

    /// Atomically replace the value under `key` with the result of `mutator`.
    ///
    /// No concurrent writer to the same key may interleave between the read handed to `mutator`
    /// and the write of its result. Implementations may invoke `mutator` more than once (eg after
    /// losing an optimistic concurrency race), so it must derive its result from its input alone.
    async fn update(&self, table: Table, key: &str, mutator: &mut Mutator<'_>) -> Result<()>;

    /// Every key-value pair of `table`, ordered by key.
    async fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Typed convenience layer over [`MetaBackend`], storing records as JSON.
#[async_trait]
pub trait MetaBackendExt: MetaBackend {
    async fn get_record<T: DeserializeOwned + Send>(
        &self,
        table: Table,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(table, key).await? {
            Some(bs) => Ok(Some(serde_json::from_slice(&bs)?)),
            None => Ok(None),
        }
    }

    async fn put_record<T: Serialize + Sync>(
        &self,
        table: Table,
        key: &str,
        record: &T,
    ) -> Result<()> {
        self.put(table, key, serde_json::to_vec(record)?).await
    }

    /// Atomic read-modify-write of a JSON record; see [`MetaBackend::update`].
    async fn update_record<T, F>(&self, table: Table, key: &str, mut f: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(Option<T>) -> Result<Option<T>> + Send,
    {
        let mut mutator = |old: Option<&[u8]>| -> Result<Option<Vec<u8>>> {
            let old = match old {
                Some(bs) => Some(serde_json::from_slice::<T>(bs)?),
                None => None,
            };
            match f(old)? {
                Some(new) => Ok(Some(serde_json::to_vec(&new)?)),
                None => Ok(None),
            }
        };
        self.update(table, key, &mut mutator).await
    }
}

impl<B: MetaBackend + ?Sized> MetaBackendExt for B {}
