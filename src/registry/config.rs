use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::record::SubRecordKind;

pub const DEFAULT_INDEX_NAME: &str = "vendor~name";

/// Per-deployment registry settings. The engine reads nothing else.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub kind: SubRecordKind,
    pub identity: IdentityPolicy,
    pub index_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: SubRecordKind::Approver,
            identity: IdentityPolicy::Supplied,
            index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn approver() -> Self {
        Self::default()
    }

    pub fn account() -> Self {
        Self {
            kind: SubRecordKind::Account,
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: IdentityPolicy) -> Self {
        self.identity = identity;
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Where a new vendor's primary key comes from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// The caller's vendor code is the key.
    #[default]
    Supplied,
    /// A random UUID v4, joined to `prefix` with a dash unless the prefix is empty.
    Generated { prefix: String },
}

impl IdentityPolicy {
    pub fn resolve<R: RngCore + ?Sized>(&self, vendor_code: &str, rng: &mut R) -> String {
        match self {
            IdentityPolicy::Supplied => vendor_code.to_string(),
            IdentityPolicy::Generated { prefix } => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
                if prefix.is_empty() {
                    id.to_string()
                } else {
                    format!("{prefix}-{id}")
                }
            }
        }
    }
}
