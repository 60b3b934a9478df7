//! Composite keys for the secondary index.
//!
//! A key is laid out as `U+0000 index U+0000 part_1 U+0000 ... part_n U+0000`,
//! the same shape the ledger uses natively, so keys sharing leading components
//! sort next to each other and can be scanned as a range. Components may not
//! contain the separator or the range sentinel `U+10FFFF`; those are rejected
//! rather than escaped so that encoded keys stay byte-compatible with
//! ledger-native ones.

pub const SEPARATOR: char = '\u{0}';
pub const RANGE_SENTINEL: char = '\u{10FFFF}';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositeKeyError {
    #[error("composite key for index {index} needs at least one component")]
    NoComponents { index: String },
    #[error("composite key index name must not be empty")]
    EmptyIndexName,
    #[error("key must not be empty")]
    EmptyKey,
    #[error("component {component:?} contains reserved code point U+{code:04X}")]
    ReservedCodePoint { component: String, code: u32 },
    #[error("malformed composite key {key:?}: {reason}")]
    Malformed { key: String, reason: &'static str },
}

/// Builds the full index key for `index` and its ordered components.
pub fn build_key<S: AsRef<str>>(index: &str, parts: &[S]) -> Result<String, CompositeKeyError> {
    if parts.is_empty() {
        return Err(CompositeKeyError::NoComponents {
            index: index.to_string(),
        });
    }
    build_partial_key(index, parts)
}

/// Builds a key prefix from `index` and zero or more leading components.
///
/// With every component supplied this is identical to [`build_key`]; with
/// fewer it is the prefix shared by all full keys starting with them.
pub fn build_partial_key<S: AsRef<str>>(
    index: &str,
    parts: &[S],
) -> Result<String, CompositeKeyError> {
    if index.is_empty() {
        return Err(CompositeKeyError::EmptyIndexName);
    }
    check_component(index)?;

    let capacity = 2 + index.len() + parts.iter().map(|p| p.as_ref().len() + 1).sum::<usize>();
    let mut key = String::with_capacity(capacity);
    key.push(SEPARATOR);
    key.push_str(index);
    key.push(SEPARATOR);
    for part in parts {
        let part = part.as_ref();
        check_component(part)?;
        key.push_str(part);
        key.push(SEPARATOR);
    }
    Ok(key)
}

/// Splits a full key back into its index name and components.
pub fn split_key(key: &str) -> Result<(String, Vec<String>), CompositeKeyError> {
    let malformed = |reason| CompositeKeyError::Malformed {
        key: key.to_string(),
        reason,
    };

    let body = key
        .strip_prefix(SEPARATOR)
        .ok_or_else(|| malformed("missing leading separator"))?
        .strip_suffix(SEPARATOR)
        .ok_or_else(|| malformed("missing trailing separator"))?;
    if body.contains(RANGE_SENTINEL) {
        return Err(malformed("contains range sentinel"));
    }

    let mut pieces = body.split(SEPARATOR);
    let index = match pieces.next() {
        Some(index) if !index.is_empty() => index.to_string(),
        _ => return Err(malformed("empty index name")),
    };
    let parts: Vec<String> = pieces.map(str::to_string).collect();
    if parts.is_empty() {
        return Err(malformed("no components"));
    }
    Ok((index, parts))
}

/// Half-open `[start, end)` range covering every key that begins with `prefix`.
pub fn partial_key_range(prefix: &str) -> (String, String) {
    let mut end = String::with_capacity(prefix.len() + RANGE_SENTINEL.len_utf8());
    end.push_str(prefix);
    end.push(RANGE_SENTINEL);
    (prefix.to_string(), end)
}

/// Plain (non-composite) keys must be non-empty and must not start with the
/// separator, otherwise they would land in the composite-key namespace.
pub fn validate_simple_key(key: &str) -> Result<(), CompositeKeyError> {
    match key.chars().next() {
        None => Err(CompositeKeyError::EmptyKey),
        Some(SEPARATOR) => Err(CompositeKeyError::ReservedCodePoint {
            component: key.to_string(),
            code: SEPARATOR as u32,
        }),
        _ => Ok(()),
    }
}

fn check_component(component: &str) -> Result<(), CompositeKeyError> {
    match component
        .chars()
        .find(|c| *c == SEPARATOR || *c == RANGE_SENTINEL)
    {
        Some(c) => Err(CompositeKeyError::ReservedCodePoint {
            component: component.to_string(),
            code: c as u32,
        }),
        None => Ok(()),
    }
}
