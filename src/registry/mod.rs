//! The registry engine.
//!
//! Each operation takes the flat string argument list of an invocation,
//! validates it before touching the ledger, and then runs one linear sequence
//! of ledger calls. The engine keeps no state between calls: everything lives
//! in the [`LedgerAccessor`] handed to each operation, and atomicity across
//! the primary record and its index entry is whatever that accessor provides.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use tracing::{debug, info, warn};

use crate::composite;
use crate::error::{RegistryError, Result};
use crate::ledger::LedgerAccessor;
use crate::query;
use crate::record::{self, Vendor};

mod config;

pub use config::{ConfigError, IdentityPolicy, RegistryConfig, DEFAULT_INDEX_NAME};

/// Value stored under every secondary-index key.
pub const INDEX_MARKER: [u8; 1] = [0x00];

/// vendorCode, registrationDate, businessRegistrationNumber, status, processingStatus.
const SCALAR_FIELDS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    AppendSubRecord,
    Read,
    Delete,
    Query,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::AppendSubRecord => "appendSubRecord",
            Operation::Read => "read",
            Operation::Delete => "delete",
            Operation::Query => "query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = RegistryError;

    /// Accepts the canonical names plus the legacy chaincode function names.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" | "initAcc" => Ok(Operation::Create),
            "appendSubRecord" | "addApprover" => Ok(Operation::AppendSubRecord),
            "read" | "getAccount" => Ok(Operation::Read),
            "delete" => Ok(Operation::Delete),
            "query" | "queryAccount" => Ok(Operation::Query),
            other => Err(RegistryError::UnknownOperation(other.to_string())),
        }
    }
}

/// Outcome of an invocation as seen by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Success(Vec<u8>),
    Error(String),
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }
}

pub struct RegistryEngine {
    config: RegistryConfig,
}

impl RegistryEngine {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Dispatches `function` and folds the outcome into a [`Response`].
    pub fn invoke<L>(&self, ledger: &mut L, function: &str, args: &[String]) -> Response
    where
        L: LedgerAccessor + ?Sized,
    {
        match self.execute(ledger, function, args) {
            Ok(payload) => Response::Success(payload),
            Err(err) => {
                warn!(function, error = %err, "invocation rejected");
                Response::Error(err.to_string())
            }
        }
    }

    pub fn execute<L>(&self, ledger: &mut L, function: &str, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        match function.parse::<Operation>()? {
            Operation::Create => self.create(ledger, args),
            Operation::AppendSubRecord => self.append_sub_record(ledger, args),
            Operation::Read => self.read(&*ledger, args),
            Operation::Delete => self.delete(ledger, args),
            Operation::Query => self.query(&*ledger, args),
        }
    }

    /// Creates a vendor with its first sub-record and its index entry. The
    /// payload is the vendor ID the record was stored under.
    pub fn create<L>(&self, ledger: &mut L, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        self.create_with_rng(ledger, args, &mut rand::thread_rng())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(operation = "create"))]
    pub fn create_with_rng<L, R>(&self, ledger: &mut L, args: &[String], rng: &mut R) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
        R: RngCore + ?Sized,
    {
        let kind = self.config.kind;
        check_arity(Operation::Create, args, SCALAR_FIELDS + kind.field_count())?;
        let (scalars, fields) = args.split_at(SCALAR_FIELDS);
        let [vendor_code, registration_date, business_registration_number, status, processing_status] =
            scalars
        else {
            return Err(RegistryError::Arity {
                operation: Operation::Create.name(),
                expected: SCALAR_FIELDS + kind.field_count(),
                actual: args.len(),
            });
        };
        let sub_record = kind.parse_fields(fields)?;

        let vendor_id = self.config.identity.resolve(vendor_code, rng);
        composite::validate_simple_key(&vendor_id)?;
        let vendor = Vendor {
            vendor_id: vendor_id.clone(),
            vendor_code: vendor_code.clone(),
            registration_date: registration_date.clone(),
            business_registration_number: business_registration_number.clone(),
            status: status.clone(),
            processing_status: processing_status.clone(),
            sub_records: vec![sub_record],
        };
        let index_key = self.index_key(&*ledger, &vendor)?;
        let bytes = record::encode(&vendor)?;
        debug!(%vendor_id, %kind, "create arguments accepted");

        if ledger.get(&vendor_id)?.is_some() {
            return Err(RegistryError::AlreadyExists(vendor_id));
        }
        ledger.put(&vendor_id, bytes)?;
        ledger.put(&index_key, INDEX_MARKER.to_vec())?;

        info!(%vendor_id, "vendor created");
        Ok(vendor_id.into_bytes())
    }

    /// Appends one sub-record to an existing vendor and rewrites the whole
    /// aggregate. The index entry is left alone. The payload is the new record.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = "appendSubRecord"))]
    pub fn append_sub_record<L>(&self, ledger: &mut L, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        let kind = self.config.kind;
        check_arity(Operation::AppendSubRecord, args, 1 + kind.field_count())?;
        let (vendor_id, fields) = (&args[0], &args[1..]);
        let sub_record = kind.parse_fields(fields)?;
        composite::validate_simple_key(vendor_id)?;

        let stored = ledger
            .get(vendor_id)?
            .ok_or_else(|| RegistryError::NotFound(vendor_id.clone()))?;
        let mut vendor = record::decode(&stored)?;
        if vendor.kind() != Some(kind) {
            return Err(RegistryError::MalformedRecord(format!(
                "vendor {vendor_id} does not hold {kind} sub-records"
            )));
        }
        vendor.sub_records.push(sub_record);

        let bytes = record::encode(&vendor)?;
        ledger.put(vendor_id, bytes.clone())?;

        info!(%vendor_id, sub_records = vendor.sub_records.len(), "sub-record appended");
        Ok(bytes)
    }

    /// Returns the stored bytes exactly as written.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = "read"))]
    pub fn read<L>(&self, ledger: &L, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        check_arity(Operation::Read, args, 1)?;
        let vendor_id = &args[0];
        composite::validate_simple_key(vendor_id)?;
        ledger
            .get(vendor_id)?
            .ok_or_else(|| RegistryError::NotFound(vendor_id.clone()))
    }

    /// Removes a vendor and its index entry.
    ///
    /// The record is decoded before anything is deleted, so a record that
    /// cannot be decoded is left fully in place rather than losing its
    /// primary key while its index entry survives.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = "delete"))]
    pub fn delete<L>(&self, ledger: &mut L, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        check_arity(Operation::Delete, args, 1)?;
        let vendor_id = &args[0];
        composite::validate_simple_key(vendor_id)?;

        let stored = ledger
            .get(vendor_id)?
            .ok_or_else(|| RegistryError::NotFound(vendor_id.clone()))?;
        let mut vendor = record::decode(&stored)?;
        vendor.vendor_id = vendor_id.clone();
        let index_key = self.index_key(&*ledger, &vendor)?;

        ledger.delete(vendor_id)?;
        ledger.delete(&index_key)?;

        info!(%vendor_id, "vendor deleted");
        Ok(Vec::new())
    }

    /// Runs a rich query and returns the hits as a JSON array of
    /// `{"Key": .., "Record": ..}` objects.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = "query"))]
    pub fn query<L>(&self, ledger: &L, args: &[String]) -> Result<Vec<u8>>
    where
        L: LedgerAccessor + ?Sized,
    {
        check_arity(Operation::Query, args, 1)?;
        let results = query::collect_results(ledger.range_query(&args[0])?)?;
        debug!(hits = results.len(), "query materialized");
        query::to_json_array(&results)
    }

    fn index_key<L>(&self, ledger: &L, vendor: &Vendor) -> Result<String>
    where
        L: LedgerAccessor + ?Sized,
    {
        let attribute = vendor.index_attribute().ok_or_else(|| {
            RegistryError::MalformedRecord(format!("vendor {} has no sub-records", vendor.vendor_id))
        })?;
        Ok(ledger.create_composite_key(&self.config.index_name, &[attribute, vendor.vendor_id.as_str()])?)
    }
}

fn check_arity(operation: Operation, args: &[String], expected: usize) -> Result<()> {
    if args.len() != expected {
        debug!(%operation, expected, actual = args.len(), "arity mismatch");
        return Err(RegistryError::Arity {
            operation: operation.name(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::ledger::{MemoryLedger, QueryResults, StorageError};
    use crate::record::SubRecord;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn scenario_a() -> Vec<String> {
        args(&["V1", "2023-01-01", "1000000001", "ACTIVE", "DONE", "A1", "2023-01-02"])
    }

    fn index_key_for(attribute: &str, vendor_id: &str) -> String {
        composite::build_key(DEFAULT_INDEX_NAME, &[attribute, vendor_id]).unwrap()
    }

    #[test]
    fn create_writes_record_and_index_marker() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        let payload = engine.create(&mut ledger, &scenario_a()).unwrap();
        assert_eq!(payload, b"V1");

        let vendor = record::decode(&ledger.get("V1").unwrap().unwrap()).unwrap();
        assert_eq!(vendor.status, "ACTIVE");
        assert_eq!(vendor.sub_records.len(), 1);
        assert_eq!(
            ledger.get(&index_key_for("1000000001", "V1")).unwrap(),
            Some(vec![0x00])
        );
    }

    #[test]
    fn arity_and_type_are_checked_before_ledger_access() {
        let engine = RegistryEngine::new(RegistryConfig::account());
        let mut ledger = FailingLedger;

        let err = engine.create(&mut ledger, &args(&["V1"])).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Arity {
                expected: 10,
                actual: 1,
                ..
            }
        ));

        let err = engine
            .create(
                &mut ledger,
                &args(&["V1", "d", "b", "s", "p", "110", "first", "004", "KR", "ACME"]),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::Type { field: "sequence", .. }));

        let err = engine
            .append_sub_record(&mut ledger, &args(&["V1", "110", "x", "004", "KR", "ACME"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Type { .. }));

        for op in ["read", "delete", "query"] {
            let err = engine.execute(&mut ledger, op, &[]).unwrap_err();
            assert!(matches!(err, RegistryError::Arity { expected: 1, actual: 0, .. }));
        }
    }

    #[test]
    fn storage_failures_surface_as_storage_errors() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = FailingLedger;
        assert!(matches!(
            engine.create(&mut ledger, &scenario_a()),
            Err(RegistryError::Storage(_))
        ));
        assert!(matches!(
            engine.read(&ledger, &args(&["V1"])),
            Err(RegistryError::Storage(_))
        ));
        assert!(matches!(
            engine.query(&ledger, &args(&[r#"{"selector":{}}"#])),
            Err(RegistryError::Storage(_))
        ));
        assert!(matches!(
            engine.append_sub_record(&mut ledger, &args(&["V1", "A2", "2023-01-05"])),
            Err(RegistryError::Storage(_))
        ));
        assert!(matches!(
            engine.delete(&mut ledger, &args(&["V1"])),
            Err(RegistryError::Storage(_))
        ));
    }

    #[test]
    fn append_over_undecodable_record_fails_without_writing() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        engine.create(&mut ledger, &scenario_a()).unwrap();
        ledger.put("V1", b"{bad".to_vec()).unwrap();
        let height = ledger.height();

        let err = engine
            .append_sub_record(&mut ledger, &args(&["V1", "A2", "2023-01-05"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedRecord(_)));
        assert_eq!(ledger.get("V1").unwrap(), Some(b"{bad".to_vec()));
        assert_eq!(ledger.height(), height);
    }

    #[test]
    fn delete_of_absent_vendor_is_not_found() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        engine.create(&mut ledger, &scenario_a()).unwrap();

        let err = engine.delete(&mut ledger, &args(&["V9"])).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "V9"));
        assert!(ledger.get("V1").unwrap().is_some());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn empty_vendor_id_is_rejected_before_ledger_access() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = FailingLedger;

        let mut no_code = scenario_a();
        no_code[0] = String::new();
        let err = engine.create(&mut ledger, &no_code).unwrap_err();
        assert!(matches!(err, RegistryError::Encoding(_)));

        let err = engine.read(&ledger, &args(&[""])).unwrap_err();
        assert!(matches!(err, RegistryError::Encoding(_)));
        let err = engine.delete(&mut ledger, &args(&[""])).unwrap_err();
        assert!(matches!(err, RegistryError::Encoding(_)));
    }

    #[test]
    fn append_rejects_missing_vendor_and_wrong_variant() {
        let approvers = RegistryEngine::new(RegistryConfig::approver());
        let accounts = RegistryEngine::new(RegistryConfig::account());
        let mut ledger = MemoryLedger::new();

        let err = approvers
            .append_sub_record(&mut ledger, &args(&["V9", "A2", "2023-01-05"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "V9"));

        approvers.create(&mut ledger, &scenario_a()).unwrap();
        let err = accounts
            .append_sub_record(&mut ledger, &args(&["V1", "110", "1", "004", "KR", "ACME"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedRecord(_)));
    }

    #[test]
    fn account_vendors_are_indexed_by_first_account_number() {
        let engine = RegistryEngine::new(RegistryConfig::account());
        let mut ledger = MemoryLedger::new();
        engine
            .create(
                &mut ledger,
                &args(&["V7", "2023-02-01", "2000000002", "ACTIVE", "NEW", "110-1", "1", "004", "KR", "ACME"]),
            )
            .unwrap();
        engine
            .append_sub_record(&mut ledger, &args(&["V7", "220-2", "2", "088", "KR", "ACME"]))
            .unwrap();

        let vendor = record::decode(&engine.read(&ledger, &args(&["V7"])).unwrap()).unwrap();
        let numbers: Vec<&str> = vendor
            .sub_records
            .iter()
            .map(|r| match r {
                SubRecord::Account(a) => a.account_number.as_str(),
                SubRecord::Approver(_) => panic!("unexpected approver"),
            })
            .collect();
        assert_eq!(numbers, vec!["110-1", "220-2"]);
        assert!(ledger.get(&index_key_for("110-1", "V7")).unwrap().is_some());

        engine.delete(&mut ledger, &args(&["V7"])).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn generated_identity_returns_new_key() {
        let engine = RegistryEngine::new(RegistryConfig::approver().with_identity(
            IdentityPolicy::Generated {
                prefix: "acc".into(),
            },
        ));
        let mut ledger = MemoryLedger::new();
        let mut rng = StdRng::seed_from_u64(42);

        let first = engine.create_with_rng(&mut ledger, &scenario_a(), &mut rng).unwrap();
        let second = engine.create_with_rng(&mut ledger, &scenario_a(), &mut rng).unwrap();
        let first = String::from_utf8(first).unwrap();
        let second = String::from_utf8(second).unwrap();
        assert!(first.starts_with("acc-"));
        assert_ne!(first, second);

        let vendor = record::decode(&ledger.get(&first).unwrap().unwrap()).unwrap();
        assert_eq!(vendor.vendor_id, first);
        assert_eq!(vendor.vendor_code, "V1");
        assert!(ledger.get(&index_key_for("1000000001", &first)).unwrap().is_some());
    }

    #[test]
    fn delete_keeps_undecodable_record_and_index() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        engine.create(&mut ledger, &scenario_a()).unwrap();
        ledger.put("V1", b"{ corrupted".to_vec()).unwrap();

        let err = engine.delete(&mut ledger, &args(&["V1"])).unwrap_err();
        assert!(matches!(err, RegistryError::MalformedRecord(_)));
        assert!(ledger.get("V1").unwrap().is_some());
        assert!(ledger.get(&index_key_for("1000000001", "V1")).unwrap().is_some());
    }

    #[test]
    fn read_passes_stored_bytes_through() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        ledger.put("raw", b"anything at all".to_vec()).unwrap();
        assert_eq!(
            engine.read(&ledger, &args(&["raw"])).unwrap(),
            b"anything at all"
        );
    }

    #[test]
    fn keys_in_composite_namespace_are_rejected() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        engine.create(&mut ledger, &scenario_a()).unwrap();
        let index_key = index_key_for("1000000001", "V1");
        let err = engine.read(&ledger, &[index_key]).unwrap_err();
        assert!(matches!(err, RegistryError::Encoding(_)));

        let mut bad = scenario_a();
        bad[2] = "10\u{0}01".into();
        let err = engine.create(&mut ledger, &bad).unwrap_err();
        assert!(matches!(err, RegistryError::Encoding(_)));
    }

    #[test]
    fn invoke_dispatches_legacy_names_and_reports_errors() {
        let engine = RegistryEngine::new(RegistryConfig::approver());
        let mut ledger = MemoryLedger::new();
        assert!(engine.invoke(&mut ledger, "initAcc", &scenario_a()).is_success());
        assert!(engine
            .invoke(&mut ledger, "addApprover", &args(&["V1", "A2", "2023-01-05"]))
            .is_success());
        assert!(engine.invoke(&mut ledger, "getAccount", &args(&["V1"])).is_success());

        match engine.invoke(&mut ledger, "transfer", &[]) {
            Response::Error(message) => assert!(message.contains("unknown function")),
            other => panic!("unexpected {other:?}"),
        }
        match engine.invoke(&mut ledger, "create", &scenario_a()) {
            Response::Error(message) => assert_eq!(message, "vendor already exists: V1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    struct FailingLedger;

    impl LedgerAccessor for FailingLedger {
        fn get(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, StorageError> {
            Err(StorageError::Backend("unreachable peer".into()))
        }

        fn put(&mut self, _key: &str, _value: Vec<u8>) -> std::result::Result<(), StorageError> {
            Err(StorageError::Backend("unreachable peer".into()))
        }

        fn delete(&mut self, _key: &str) -> std::result::Result<(), StorageError> {
            Err(StorageError::Backend("unreachable peer".into()))
        }

        fn range_query(&self, _query: &str) -> std::result::Result<QueryResults<'_>, StorageError> {
            Err(StorageError::Backend("unreachable peer".into()))
        }
    }
}
