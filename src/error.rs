use crate::composite::CompositeKeyError;
use crate::ledger::StorageError;

/// Failure of a single registry invocation. Every variant is terminal for the
/// operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("incorrect number of arguments for {operation}: expecting {expected}, got {actual}")]
    Arity {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("argument {field} must be an integer, got {value:?}")]
    Type { field: &'static str, value: String },
    #[error("vendor already exists: {0}")]
    AlreadyExists(String),
    #[error("vendor does not exist: {0}")]
    NotFound(String),
    #[error("malformed vendor record: {0}")]
    MalformedRecord(String),
    #[error("malformed composite key: {0}")]
    MalformedKey(String),
    #[error("cannot encode composite key: {0}")]
    Encoding(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("received unknown function invocation: {0}")]
    UnknownOperation(String),
}

impl From<CompositeKeyError> for RegistryError {
    fn from(err: CompositeKeyError) -> Self {
        match err {
            CompositeKeyError::Malformed { .. } => RegistryError::MalformedKey(err.to_string()),
            CompositeKeyError::NoComponents { .. } => RegistryError::Arity {
                operation: "composite key",
                expected: 1,
                actual: 0,
            },
            other => RegistryError::Encoding(other.to_string()),
        }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
