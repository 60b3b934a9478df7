//! Vendor registry over a versioned key-value ledger.
//!
//! The crate is split along the seams of the data it manages:
//!
//! * [`composite`]: the composite-key codec behind the secondary index.
//! * [`record`]: the vendor aggregate and its JSON encoding.
//! * [`ledger`]: the [`LedgerAccessor`](ledger::LedgerAccessor) capability the
//!   engine runs against, plus an in-memory reference ledger with
//!   per-invocation transactions and a rich-query selector.
//! * [`query`]: typed result sets for rich queries.
//! * [`registry`]: the engine that keeps each primary record and its index
//!   entry consistent across create, append, read, delete and query.

pub mod composite;
pub mod error;
pub mod ledger;
pub mod query;
pub mod record;
pub mod registry;

pub use error::RegistryError;
pub use ledger::{LedgerAccessor, MemoryLedger, StorageError};
pub use record::{Account, Approver, SubRecord, SubRecordKind, Vendor};
pub use registry::{IdentityPolicy, Operation, RegistryConfig, RegistryEngine, Response};
