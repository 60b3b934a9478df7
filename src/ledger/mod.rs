//! The key-value ledger the registry runs against.
//!
//! [`LedgerAccessor`] is the whole surface the engine needs: point reads and
//! writes, rich queries, and composite-key helpers. [`MemoryLedger`] is the
//! reference backend used by the CLI and tests; it stages each invocation in a
//! [`Transaction`] so the writes of one operation land together or not at all.

use crate::composite::{self, CompositeKeyError};

mod memory;
pub mod selector;
mod snapshot;

pub use memory::{MemoryLedger, Transaction, VersionedValue};
pub use snapshot::{compute_state_root, load_state, save_state, LedgerSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("invalid rich query: {0}")]
    Query(String),
    #[error("ledger state is corrupt: {0}")]
    Corrupt(String),
    #[error("ledger state i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// One hit of a rich query: the primary key and the stored bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    pub key: String,
    pub value: Vec<u8>,
}

/// Finite, single-pass result sequence of [`LedgerAccessor::range_query`].
pub type QueryResults<'a> = Box<dyn Iterator<Item = Result<QueryRecord, StorageError>> + 'a>;

pub trait LedgerAccessor {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    /// Runs a backend-defined rich query. The query string is not interpreted
    /// by the caller.
    fn range_query(&self, query: &str) -> Result<QueryResults<'_>, StorageError>;

    fn create_composite_key(&self, index: &str, parts: &[&str]) -> Result<String, CompositeKeyError> {
        composite::build_key(index, parts)
    }

    fn split_composite_key(&self, key: &str) -> Result<(String, Vec<String>), CompositeKeyError> {
        composite::split_key(key)
    }
}
