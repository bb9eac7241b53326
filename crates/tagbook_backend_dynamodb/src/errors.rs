//! DynamoDB backend errors

use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::{
    create_table::CreateTableError, delete_item::DeleteItemError, get_item::GetItemError,
    scan::ScanError, update_item::UpdateItemError,
};
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tagbook error: {0}")]
    TagbookError(#[from] tagbook_core::Error),

    #[error("aws sdk get item error")]
    AWSSDKGetItemError(#[from] SdkError<GetItemError>),
    #[error("aws sdk update item error")]
    AWSSDKUpdateItemError(#[from] SdkError<UpdateItemError>),
    #[error("aws sdk delete item error")]
    AWSSDKDeleteItemError(#[from] SdkError<DeleteItemError>),
    #[error("aws sdk scan error")]
    AWSSDKScanError(#[from] SdkError<ScanError>),
    #[error("aws sdk create table error")]
    AWSSDKCreateTableError(#[from] SdkError<CreateTableError>),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    #[error("malformed item in {table}: {reason}")]
    MalformedItem { table: String, reason: String },

    #[error("gave up updating {key:?} in {table} after {attempts} conflicting writes")]
    TooManyConflicts {
        table: String,
        key: String,
        attempts: usize,
    },
}

impl From<Error> for tagbook_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::TagbookError(e) => e,
            _ => tagbook_core::Error::BackendError(Box::new(e)),
        }
    }
}
