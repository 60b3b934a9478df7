use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::selector::RichQuery;
use super::{LedgerAccessor, QueryRecord, QueryResults, StorageError};
use crate::composite::{self, CompositeKeyError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedValue {
    #[serde(with = "super::snapshot::hex_bytes")]
    pub value: Vec<u8>,
    /// Height of the commit that last wrote this key.
    pub version: u64,
}

/// In-memory ledger. Writes issued directly against it commit one by one;
/// writes issued inside [`MemoryLedger::transact`] commit together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    pub(crate) height: u64,
    pub(crate) state: BTreeMap<String, VersionedValue>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn version_of(&self, key: &str) -> Option<u64> {
        self.state.get(key).map(|v| v.version)
    }

    /// Runs `f` against a staged view of the ledger. The staged writes are
    /// committed at a single new height when `f` returns `Ok` and dropped
    /// when it returns `Err`.
    pub fn transact<T, E>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut tx = Transaction {
            committed: &*self,
            writes: BTreeMap::new(),
        };
        let out = f(&mut tx)?;
        let writes = tx.writes;
        self.commit(writes);
        Ok(out)
    }

    /// Committed entries whose composite key starts with `index` and the given
    /// leading components, in key order.
    pub fn scan_partial_composite_key(
        &self,
        index: &str,
        parts: &[&str],
    ) -> Result<Vec<QueryRecord>, CompositeKeyError> {
        let prefix = composite::build_partial_key(index, parts)?;
        let (start, end) = composite::partial_key_range(&prefix);
        Ok(self
            .state
            .range(start..end)
            .map(|(key, entry)| QueryRecord {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    fn commit(&mut self, writes: BTreeMap<String, Option<Vec<u8>>>) {
        if writes.is_empty() {
            return;
        }
        self.height += 1;
        for (key, write) in writes {
            match write {
                Some(value) => {
                    self.state.insert(
                        key,
                        VersionedValue {
                            value,
                            version: self.height,
                        },
                    );
                }
                None => {
                    self.state.remove(&key);
                }
            }
        }
    }

    fn query_committed(&self, query: &str) -> Result<QueryResults<'_>, StorageError> {
        let RichQuery {
            selector,
            limit,
            skip,
        } = RichQuery::parse(query)?;
        let hits = self
            .state
            .iter()
            .filter(move |(_, entry)| selector.matches_bytes(&entry.value))
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, entry)| {
                Ok(QueryRecord {
                    key: key.clone(),
                    value: entry.value.clone(),
                })
            });
        Ok(Box::new(hits))
    }
}

impl LedgerAccessor for MemoryLedger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.get(key).map(|entry| entry.value.clone()))
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.commit(BTreeMap::from([(key.to_string(), Some(value))]));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        if self.state.contains_key(key) {
            self.commit(BTreeMap::from([(key.to_string(), None)]));
        }
        Ok(())
    }

    fn range_query(&self, query: &str) -> Result<QueryResults<'_>, StorageError> {
        self.query_committed(query)
    }
}

/// Staged view over a [`MemoryLedger`]. Point reads see the transaction's own
/// writes; rich queries see committed state only.
pub struct Transaction<'a> {
    committed: &'a MemoryLedger,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl Transaction<'_> {
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }
}

impl LedgerAccessor for Transaction<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.committed.get(key),
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn range_query(&self, query: &str) -> Result<QueryResults<'_>, StorageError> {
        self.committed.query_committed(query)
    }
}
