use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    #[error("invalid paging: {0}")]
    InvalidPaging(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("signature verification failed: {0}")]
    Verification(String),

    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    BackendError(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Collapse digest parsing failures into the caller-facing input error.
    pub(crate) fn into_input_error(self) -> Error {
        match self {
            Error::InvalidDigest(s) | Error::UnsupportedDigestAlgorithm(s) => {
                Error::InvalidInput(format!("digest {s:?}"))
            }
            e => e,
        }
    }
}
