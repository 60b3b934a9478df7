//! The vendor aggregate and its byte encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    #[serde(rename = "vendorID")]
    pub vendor_id: String,
    pub vendor_code: String,
    pub registration_date: String,
    pub business_registration_number: String,
    pub status: String,
    pub processing_status: String,
    pub sub_records: Vec<SubRecord>,
}

impl Vendor {
    /// Variant of the stored sub-records. `None` only for an aggregate that
    /// was never created through the registry.
    pub fn kind(&self) -> Option<SubRecordKind> {
        self.sub_records.first().map(SubRecord::kind)
    }

    /// First component of the secondary index key.
    ///
    /// Approver vendors are indexed by business registration number, account
    /// vendors by the account number they were created with. Both are fixed
    /// at creation because sub-records are append-only.
    pub fn index_attribute(&self) -> Option<&str> {
        match self.sub_records.first()? {
            SubRecord::Approver(_) => Some(self.business_registration_number.as_str()),
            SubRecord::Account(account) => Some(account.account_number.as_str()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubRecord {
    Approver(Approver),
    Account(Account),
}

impl SubRecord {
    pub fn kind(&self) -> SubRecordKind {
        match self {
            SubRecord::Approver(_) => SubRecordKind::Approver,
            SubRecord::Account(_) => SubRecordKind::Account,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approver {
    #[serde(rename = "approverID")]
    pub approver_id: String,
    #[serde(rename = "approvalDate")]
    pub approval_date: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_number: String,
    pub sequence: i64,
    pub bank_code: String,
    pub country_code: String,
    pub owner: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubRecordKind {
    #[default]
    Approver,
    Account,
}

impl SubRecordKind {
    /// Number of string arguments one sub-record occupies in an invocation.
    pub fn field_count(self) -> usize {
        match self {
            SubRecordKind::Approver => 2,
            SubRecordKind::Account => 5,
        }
    }

    /// Builds a sub-record from exactly [`Self::field_count`] arguments.
    /// Callers check the count beforehand.
    pub fn parse_fields(self, fields: &[String]) -> Result<SubRecord> {
        match (self, fields) {
            (SubRecordKind::Approver, [approver_id, approval_date]) => {
                Ok(SubRecord::Approver(Approver {
                    approver_id: approver_id.clone(),
                    approval_date: approval_date.clone(),
                }))
            }
            (SubRecordKind::Account, [account_number, sequence, bank_code, country_code, owner]) => {
                let sequence = sequence
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| RegistryError::Type {
                        field: "sequence",
                        value: sequence.clone(),
                    })?;
                Ok(SubRecord::Account(Account {
                    account_number: account_number.clone(),
                    sequence,
                    bank_code: bank_code.clone(),
                    country_code: country_code.clone(),
                    owner: owner.clone(),
                }))
            }
            _ => Err(RegistryError::Arity {
                operation: "sub-record",
                expected: self.field_count(),
                actual: fields.len(),
            }),
        }
    }
}

impl fmt::Display for SubRecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubRecordKind::Approver => f.write_str("approver"),
            SubRecordKind::Account => f.write_str("account"),
        }
    }
}

impl std::str::FromStr for SubRecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "approver" => Ok(SubRecordKind::Approver),
            "account" => Ok(SubRecordKind::Account),
            other => Err(format!("unknown sub-record kind {other:?} (expected approver|account)")),
        }
    }
}

pub fn encode(vendor: &Vendor) -> Result<Vec<u8>> {
    serde_json::to_vec(vendor).map_err(|e| RegistryError::MalformedRecord(e.to_string()))
}

/// Decodes stored bytes, rejecting aggregates that break the sub-record rules:
/// at least one entry, all of a single variant.
pub fn decode(bytes: &[u8]) -> Result<Vendor> {
    let vendor: Vendor =
        serde_json::from_slice(bytes).map_err(|e| RegistryError::MalformedRecord(e.to_string()))?;
    let kind = vendor.kind().ok_or_else(|| {
        RegistryError::MalformedRecord(format!("vendor {} has no sub-records", vendor.vendor_id))
    })?;
    if let Some(stray) = vendor.sub_records.iter().find(|r| r.kind() != kind) {
        return Err(RegistryError::MalformedRecord(format!(
            "vendor {} mixes {kind} and {} sub-records",
            vendor.vendor_id,
            stray.kind()
        )));
    }
    Ok(vendor)
}
