use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{MemoryLedger, StorageError, VersionedValue};

/// Serialized form of a [`MemoryLedger`], as kept in the CLI state file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub height: u64,
    pub entries: BTreeMap<String, VersionedValue>,
    /// Hex SHA-256 root over every `(key, version, value)` entry.
    pub state_root: String,
}

impl MemoryLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            height: self.height,
            entries: self.state.clone(),
            state_root: hex::encode(compute_state_root(&self.state)),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, StorageError> {
        let root = hex::encode(compute_state_root(&snapshot.entries));
        if root != snapshot.state_root {
            return Err(StorageError::Corrupt(format!(
                "state root mismatch: recorded {}, computed {root}",
                snapshot.state_root
            )));
        }
        if let Some((key, entry)) = snapshot
            .entries
            .iter()
            .find(|(_, entry)| entry.version > snapshot.height)
        {
            return Err(StorageError::Corrupt(format!(
                "key {key:?} has version {} above height {}",
                entry.version, snapshot.height
            )));
        }
        Ok(MemoryLedger {
            height: snapshot.height,
            state: snapshot.entries,
        })
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(&self.state)
    }
}

/// Loads a ledger from `path`; a missing file is an empty ledger.
pub fn load_state(path: &Path) -> Result<MemoryLedger, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(MemoryLedger::new()),
        Err(err) => return Err(err.into()),
    };
    let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?;
    MemoryLedger::from_snapshot(snapshot)
}

/// Writes the ledger to `path` through a sibling temp file and a rename, so a
/// crash never leaves a half-written state file behind.
pub fn save_state(path: &Path, ledger: &MemoryLedger) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(&ledger.snapshot())
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// SHA-256 merkle root over `(key, version, value)` leaves in key order. An
/// odd node at the end of a level is paired with itself.
pub fn compute_state_root(entries: &BTreeMap<String, VersionedValue>) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = entries
        .iter()
        .map(|(key, entry)| -> [u8; 32] {
            Sha256::new()
                .chain_update(b"entry")
                .chain_update((key.len() as u64).to_le_bytes())
                .chain_update(key.as_bytes())
                .chain_update(entry.version.to_le_bytes())
                .chain_update((entry.value.len() as u64).to_le_bytes())
                .chain_update(&entry.value)
                .finalize()
                .into()
        })
        .collect();
    if level.is_empty() {
        return Sha256::digest(b"vendor-ledger-empty").into();
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| -> [u8; 32] {
                Sha256::new()
                    .chain_update(b"node")
                    .chain_update(pair[0])
                    .chain_update(pair[pair.len() - 1])
                    .finalize()
                    .into()
            })
            .collect();
    }
    level[0]
}

pub(crate) mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
