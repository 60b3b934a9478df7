//! Result-set assembly for rich queries.
//!
//! Hits are collected into typed `{Key, Record}` pairs and serialized once.
//! Collection is all-or-nothing: the first failing hit discards everything
//! buffered so far.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::ledger::{QueryRecord, StorageError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Record")]
    pub record: Value,
}

impl QueryResult {
    fn from_record(hit: QueryRecord) -> Result<Self> {
        let record = serde_json::from_slice(&hit.value).map_err(|e| {
            RegistryError::MalformedRecord(format!("query hit {:?} is not a JSON document: {e}", hit.key))
        })?;
        Ok(QueryResult {
            key: hit.key,
            record,
        })
    }
}

pub fn collect_results<I>(hits: I) -> Result<Vec<QueryResult>>
where
    I: IntoIterator<Item = std::result::Result<QueryRecord, StorageError>>,
{
    hits.into_iter()
        .map(|hit| QueryResult::from_record(hit?))
        .collect()
}

/// Serializes the result set as a JSON array, `[]` when empty.
pub fn to_json_array(results: &[QueryResult]) -> Result<Vec<u8>> {
    serde_json::to_vec(results).map_err(|e| RegistryError::MalformedRecord(e.to_string()))
}
