mod backend;
mod config;
mod errors;

pub use backend::RedbBackend;
pub use config::RedbConfig;
pub use errors::{Error, Result};
