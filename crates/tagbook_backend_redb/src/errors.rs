use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tagbook error: {0}")]
    TagbookError(#[from] tagbook_core::Error),

    #[error("redb database error: {0}")]
    DatabaseError(#[from] redb::DatabaseError),
    #[error("redb transaction error: {0}")]
    TransactionError(#[from] redb::TransactionError),
    #[error("redb table error: {0}")]
    TableError(#[from] redb::TableError),
    #[error("redb storage error: {0}")]
    StorageError(#[from] redb::StorageError),
    #[error("redb commit error: {0}")]
    CommitError(#[from] redb::CommitError),

    #[error("blocking redb task failed: {0}")]
    BlockingTaskError(#[from] tokio::task::JoinError),
}

impl From<Error> for tagbook_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::TagbookError(e) => e,
            _ => tagbook_core::Error::BackendError(Box::new(e)),
        }
    }
}
