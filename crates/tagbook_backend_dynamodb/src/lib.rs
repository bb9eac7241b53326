mod config;
pub use config::DynamoDbConfig;
mod errors;
pub use errors::{Error, Result};
mod item;
pub(crate) mod logging;
mod store;
pub use store::DynamoDbBackend;
