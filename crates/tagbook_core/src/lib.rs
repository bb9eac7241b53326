pub mod errors;
pub use errors::{Error, Result};

mod oci_digest;
pub use oci_digest::OciDigest;

mod context;
pub use context::{AccessControlContext, RequestContext};

pub mod types;

pub mod backend;
pub use backend::{MetaBackend, MetaBackendExt, Mutator, Table};

mod memory;
pub use memory::MemoryBackend;

mod images;
pub use images::ImageSummary;

mod rank;
pub use rank::rank_repo_name;

mod filter;
pub use filter::Filter;

pub mod pagination;
pub use pagination::{PageInfo, PageInput, SortCriteria};

mod reference;
pub use reference::Reference;

mod metadb;
pub use metadb::{MetaDb, SCHEMA_VERSION};

mod signatures;
pub use signatures::{SignatureVerifier, SignedDescriptor, UnconfiguredVerifier, Verification};

mod referrers;
mod users;

mod search;
pub use search::SearchResults;

#[cfg(test)]
mod test_support;
