use std::sync::Arc;

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use tokio::runtime::{Handle, RuntimeFlavor};

use tagbook_core::{MetaBackend, Mutator, Table};

use super::errors::Result;

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(table.name())
}

/// [`MetaBackend`] over an embedded redb database, one redb table per [`Table`].
///
/// redb serializes write transactions, so [`MetaBackend::update`] runs its read and write inside
/// a single write transaction. Transactions block on file IO, so they run on the blocking pool,
/// or via [`tokio::task::block_in_place`] where the caller's mutator has to be borrowed.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<redb::Database>,
}

impl RedbBackend {
    /// Wrap `db`, creating any missing tables.
    pub fn new(db: Arc<redb::Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        for table in Table::ALL {
            write_txn.open_table(definition(table))?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn get_inline(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(definition(table))?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put_inline(&self, table: Table, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(definition(table))?;
            t.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_inline(&self, table: Table, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(definition(table))?;
            t.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_inline(&self, table: Table, key: &str, mutator: &mut Mutator<'_>) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let changed = {
            let mut t = write_txn.open_table(definition(table))?;
            let old = t.get(key)?.map(|v| v.value().to_vec());
            match mutator(old.as_deref())? {
                Some(new) => {
                    t.insert(key, new.as_slice())?;
                    true
                }
                None => false,
            }
        };

        if changed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(RedbBackend) -> Result<T> + Send + 'static,
    {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || f(backend)).await?
    }

    fn scan_inline(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(definition(table))?;
        let mut records = Vec::new();
        for item in t.iter()? {
            let (k, v) = item?;
            records.push((k.value().to_string(), v.value().to_vec()));
        }
        Ok(records)
    }
}

#[async_trait]
impl MetaBackend for RedbBackend {
    async fn get(&self, table: Table, key: &str) -> tagbook_core::Result<Option<Vec<u8>>> {
        let key = key.to_string();
        Ok(self.blocking(move |b| b.get_inline(table, &key)).await?)
    }

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> tagbook_core::Result<()> {
        let key = key.to_string();
        Ok(self
            .blocking(move |b| b.put_inline(table, &key, &value))
            .await?)
    }

    async fn delete(&self, table: Table, key: &str) -> tagbook_core::Result<()> {
        let key = key.to_string();
        Ok(self.blocking(move |b| b.delete_inline(table, &key)).await?)
    }

    async fn update(
        &self,
        table: Table,
        key: &str,
        mutator: &mut Mutator<'_>,
    ) -> tagbook_core::Result<()> {
        // block_in_place is unavailable on a current-thread runtime
        let res = match Handle::current().runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.update_inline(table, key, mutator))
            }
            _ => self.update_inline(table, key, mutator),
        };
        Ok(res?)
    }

    async fn scan(&self, table: Table) -> tagbook_core::Result<Vec<(String, Vec<u8>)>> {
        tracing::debug!("scanning {}", table.name());
        Ok(self.blocking(move |b| b.scan_inline(table)).await?)
    }
}
