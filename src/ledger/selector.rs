//! Rich-query selectors for the in-memory ledger.
//!
//! A query is a JSON object `{"selector": {...}, "limit": n, "skip": n}`.
//! Selectors follow the document-store convention: field names (dotted for
//! nesting) map to a literal for equality or to an object of `$`-operators.
//! Several fields in one object are ANDed. Only JSON documents are candidates.

use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::StorageError;

#[derive(Clone, Debug, PartialEq)]
pub struct RichQuery {
    pub selector: Selector,
    pub limit: Option<usize>,
    pub skip: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQuery {
    selector: Value,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    skip: Option<usize>,
}

impl RichQuery {
    pub fn parse(query: &str) -> Result<Self, StorageError> {
        let raw: RawQuery =
            serde_json::from_str(query).map_err(|e| StorageError::Query(e.to_string()))?;
        let selector = Selector::parse(&raw.selector).map_err(StorageError::Query)?;
        Ok(RichQuery {
            selector,
            limit: raw.limit,
            skip: raw.skip.unwrap_or(0),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Field { path: Vec<String>, condition: Condition },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    ElemMatch(Box<Selector>),
}

impl Selector {
    pub fn parse(selector: &Value) -> Result<Self, String> {
        match selector {
            Value::Object(fields) => parse_object(&[], fields),
            other => Err(format!("selector must be an object, got {other}")),
        }
    }

    /// Matches raw stored bytes; anything that is not a JSON object never matches.
    pub fn matches_bytes(&self, bytes: &[u8]) -> bool {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(doc @ Value::Object(_)) => self.matches(&doc),
            _ => false,
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Selector::And(all) => all.iter().all(|s| s.matches(doc)),
            Selector::Or(any) => any.iter().any(|s| s.matches(doc)),
            Selector::Field { path, condition } => condition.matches(resolve(doc, path)),
        }
    }
}

fn parse_object(path: &[String], fields: &Map<String, Value>) -> Result<Selector, String> {
    let mut clauses = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        match name.as_str() {
            "$and" => clauses.push(Selector::And(parse_list(path, name, value)?)),
            "$or" => clauses.push(Selector::Or(parse_list(path, name, value)?)),
            op if op.starts_with('$') => clauses.push(Selector::Field {
                path: path.to_vec(),
                condition: parse_operator(path, op, value)?,
            }),
            field => {
                let mut nested = path.to_vec();
                nested.extend(field.split('.').map(str::to_string));
                clauses.push(parse_field(nested, value)?);
            }
        }
    }
    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Selector::And(clauses),
    })
}

fn parse_field(path: Vec<String>, value: &Value) -> Result<Selector, String> {
    match value {
        Value::Object(fields) if !fields.is_empty() => parse_object(&path, fields),
        literal => Ok(Selector::Field {
            path,
            condition: Condition::Eq(literal.clone()),
        }),
    }
}

fn parse_list(path: &[String], op: &str, value: &Value) -> Result<Vec<Selector>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("{op} expects an array"))?;
    items
        .iter()
        .map(|item| match item {
            Value::Object(fields) => parse_object(path, fields),
            other => Err(format!("{op} entries must be objects, got {other}")),
        })
        .collect()
}

fn parse_operator(path: &[String], op: &str, arg: &Value) -> Result<Condition, String> {
    let list = || {
        arg.as_array()
            .cloned()
            .ok_or_else(|| format!("{op} expects an array"))
    };
    Ok(match op {
        "$eq" => Condition::Eq(arg.clone()),
        "$ne" => Condition::Ne(arg.clone()),
        "$gt" => Condition::Gt(arg.clone()),
        "$gte" => Condition::Gte(arg.clone()),
        "$lt" => Condition::Lt(arg.clone()),
        "$lte" => Condition::Lte(arg.clone()),
        "$in" => Condition::In(list()?),
        "$nin" => Condition::Nin(list()?),
        "$exists" => Condition::Exists(
            arg.as_bool()
                .ok_or_else(|| "$exists expects a boolean".to_string())?,
        ),
        "$elemMatch" => match arg {
            Value::Object(fields) if !fields.is_empty() => {
                Condition::ElemMatch(Box::new(parse_object(&[], fields)?))
            }
            _ => return Err("$elemMatch expects a non-empty object".to_string()),
        },
        other => {
            return Err(format!(
                "unsupported operator {other} on field {:?}",
                path.join(".")
            ))
        }
    })
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Condition::Exists(wanted), value) => value.is_some() == *wanted,
            (_, None) => false,
            (Condition::Eq(expected), Some(v)) => v == expected,
            (Condition::Ne(expected), Some(v)) => v != expected,
            (Condition::Gt(bound), Some(v)) => compare(v, bound) == Some(Ordering::Greater),
            (Condition::Gte(bound), Some(v)) => {
                matches!(compare(v, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            (Condition::Lt(bound), Some(v)) => compare(v, bound) == Some(Ordering::Less),
            (Condition::Lte(bound), Some(v)) => {
                matches!(compare(v, bound), Some(Ordering::Less | Ordering::Equal))
            }
            (Condition::In(options), Some(v)) => options.contains(v),
            (Condition::Nin(options), Some(v)) => !options.contains(v),
            (Condition::ElemMatch(inner), Some(Value::Array(items))) => {
                items.iter().any(|item| inner.matches(item))
            }
            (Condition::ElemMatch(_), Some(_)) => false,
        }
    }
}

/// Ordering between two scalars of the same JSON type; mixed types don't compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, segment| current.get(segment))
}
