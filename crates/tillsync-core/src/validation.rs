//! # Validation Module
//!
//! Coerces loosely-typed vendor JSON into [`RemoteTransaction`].
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Collection envelope (tillsync-sync::client)                  │
//! │  └── Unparseable page body → fatal for the pass                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE, one record at a time                            │
//! │  ├── Missing id / amount / creation time → RecordError                 │
//! │  └── Numbers-as-strings, epoch millis, "0" close dates → coerced       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (json_valid(products))                                      │
//! │  └── NOT NULL / non-empty constraints                                  │
//! │                                                                         │
//! │  A bad record never aborts the pass at layers 2 or 3.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use serde_json::json;
//! use tillsync_core::validation::coerce_transaction;
//!
//! let tx = coerce_transaction(&json!({
//!     "transaction_id": 1001,
//!     "paid_amount": "250",
//!     "date_created": "1709280000000",
//!     "date_close": "0",
//!     "products": [{"product_id": 7, "num": 1}],
//! }))
//! .unwrap();
//!
//! assert_eq!(tx.transaction_id, "1001");
//! assert!(tx.is_open());
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::amount::PaidAmount;
use crate::error::ValidationError;
use crate::types::RemoteTransaction;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Names
// =============================================================================

// First match wins; the later names are vendor aliases.
const ID_FIELDS: &[&str] = &["transaction_id", "id"];
const CLIENT_FIELDS: &[&str] = &["client_id"];
const AMOUNT_FIELDS: &[&str] = &["paid_amount", "payed_sum"];
const PRODUCTS_FIELDS: &[&str] = &["products"];
const CREATED_FIELDS: &[&str] = &["date_created", "date_create"];
const CLOSE_FIELDS: &[&str] = &["date_close"];
const TABLE_FIELDS: &[&str] = &["table_id"];
const PAY_TYPE_FIELDS: &[&str] = &["pay_type", "payment_type"];

/// Epoch values at or above this are milliseconds, below are seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

// =============================================================================
// Record Coercion
// =============================================================================

/// Coerces one vendor record.
///
/// ## Rules
/// - id: non-empty string or integer
/// - paid amount: decimal string or JSON number, kept verbatim
/// - products: any JSON value (serialized) or a string holding the payload;
///   missing/null becomes `[]`
/// - timestamps: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or epoch
///   seconds/milliseconds as number or numeric string
/// - `date_close` of `null`, `""`, `0` or `"0"` means still open
/// - integer optionals accept numbers or numeric strings; `""`/`null` → None
pub fn coerce_transaction(value: &Value) -> ValidationResult<RemoteTransaction> {
    let record = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let transaction_id = coerce_id(pick(record, ID_FIELDS), "transaction_id")?;
    let client_id = coerce_optional_text(pick(record, CLIENT_FIELDS), "client_id")?;
    let paid_amount = coerce_amount(pick(record, AMOUNT_FIELDS))?;
    let products = coerce_products(pick(record, PRODUCTS_FIELDS))?;
    let date_created = coerce_timestamp(pick(record, CREATED_FIELDS), "date_created")?
        .ok_or_else(|| ValidationError::required("date_created"))?;
    let date_close = coerce_timestamp(pick(record, CLOSE_FIELDS), "date_close")?;
    let table_id = coerce_optional_int(pick(record, TABLE_FIELDS), "table_id")?;
    let pay_type = coerce_optional_int(pick(record, PAY_TYPE_FIELDS), "pay_type")?;

    Ok(RemoteTransaction {
        transaction_id,
        client_id,
        paid_amount,
        products,
        date_created,
        date_close,
        table_id,
        pay_type,
    })
}

/// Reads the id of a record that may otherwise be invalid.
///
/// Used to attach an id to a [`RecordError`](crate::types::RecordError) and
/// to keep an observed-but-invalid row from being treated as deleted.
pub fn peek_transaction_id(value: &Value) -> Option<String> {
    let record = value.as_object()?;
    coerce_id(pick(record, ID_FIELDS), "transaction_id").ok()
}

// =============================================================================
// Field Coercers
// =============================================================================

fn pick<'a>(record: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| record.get(*name))
        .filter(|value| !value.is_null())
}

fn coerce_id(value: Option<&Value>, field: &str) -> ValidationResult<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(Value::String(_)) | None => Err(ValidationError::required(field)),
        Some(_) => Err(ValidationError::wrong_type(field, "a string or integer")),
    }
}

fn coerce_optional_text(value: Option<&Value>, field: &str) -> ValidationResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ValidationError::wrong_type(field, "a string or number")),
    }
}

fn coerce_amount(value: Option<&Value>) -> ValidationResult<PaidAmount> {
    match value {
        None => Err(ValidationError::required("paid_amount")),
        Some(Value::String(s)) => PaidAmount::parse(s),
        // arbitrary_precision keeps the number's literal text, trailing zeros included
        Some(Value::Number(n)) => PaidAmount::parse(&n.to_string()),
        Some(_) => Err(ValidationError::wrong_type(
            "paid_amount",
            "a decimal string or number",
        )),
    }
}

fn coerce_products(value: Option<&Value>) -> ValidationResult<String> {
    match value {
        None => Ok("[]".to_string()),
        // Already-serialized payloads are stored as received; the cache's
        // json_valid() constraint rejects malformed ones per record.
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => serde_json::to_string(other)
            .map_err(|e| ValidationError::invalid("products", e.to_string())),
    }
}

fn coerce_optional_int(value: Option<&Value>, field: &str) -> ValidationResult<Option<i64>> {
    match value {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ValidationError::invalid(field, format!("expected an integer, got {}", n))),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .map(Some)
                .map_err(|_| ValidationError::invalid(field, format!("expected an integer, got '{}'", s)))
        }
        Some(_) => Err(ValidationError::wrong_type(field, "an integer or numeric string")),
    }
}

fn coerce_timestamp(value: Option<&Value>, field: &str) -> ValidationResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(Value::Number(n)) => {
            let epoch = n
                .as_i64()
                .ok_or_else(|| ValidationError::invalid(field, format!("expected an epoch integer, got {}", n)))?;
            from_epoch(epoch, field)
        }
        Some(Value::String(s)) => parse_timestamp_text(s.trim(), field),
        Some(_) => Err(ValidationError::wrong_type(field, "a timestamp string or epoch number")),
    }
}

fn parse_timestamp_text(text: &str, field: &str) -> ValidationResult<Option<DateTime<Utc>>> {
    if text.is_empty() {
        return Ok(None);
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        let epoch: i64 = text
            .parse()
            .map_err(|_| ValidationError::invalid(field, format!("epoch out of range: '{}'", text)))?;
        return from_epoch(epoch, field);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Some(Utc.from_utc_datetime(&naive)));
        }
    }

    Err(ValidationError::invalid(
        field,
        format!("unrecognized timestamp '{}'", text),
    ))
}

fn from_epoch(epoch: i64, field: &str) -> ValidationResult<Option<DateTime<Utc>>> {
    // 0 is the vendor's "not set" marker
    if epoch == 0 {
        return Ok(None);
    }

    let parsed = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    };

    parsed
        .map(Some)
        .ok_or_else(|| ValidationError::invalid(field, format!("epoch out of range: {}", epoch)))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "transaction_id": "1001",
            "client_id": "77",
            "paid_amount": "250.00",
            "products": [{"product_id": 1, "num": 2}],
            "date_created": "2024-03-01T08:00:00Z",
            "date_close": null,
            "table_id": 4,
            "pay_type": "1",
        })
    }

    #[test]
    fn test_coerce_well_formed_record() {
        let tx = coerce_transaction(&base()).unwrap();
        assert_eq!(tx.transaction_id, "1001");
        assert_eq!(tx.client_id.as_deref(), Some("77"));
        assert_eq!(tx.paid_amount.as_str(), "250.00");
        let products: Value = serde_json::from_str(&tx.products).unwrap();
        assert_eq!(products, json!([{"product_id": 1, "num": 2}]));
        assert_eq!(tx.date_created, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert!(tx.is_open());
        assert_eq!(tx.table_id, Some(4));
        assert_eq!(tx.pay_type, Some(1));
    }

    #[test]
    fn test_vendor_aliases_and_loose_types() {
        let tx = coerce_transaction(&json!({
            "id": 55,
            "payed_sum": 1999.9,
            "date_create": 1709280000000i64,
            "date_close": "1709283600000",
            "table_id": "",
            "payment_type": 2,
        }))
        .unwrap();

        assert_eq!(tx.transaction_id, "55");
        assert_eq!(tx.paid_amount.as_str(), "1999.9");
        assert_eq!(tx.date_created.timestamp_millis(), 1_709_280_000_000);
        assert_eq!(tx.date_close.map(|d| d.timestamp()), Some(1_709_283_600));
        assert_eq!(tx.table_id, None);
        assert_eq!(tx.pay_type, Some(2));
        assert_eq!(tx.products, "[]");
        assert_eq!(tx.client_id, None);
    }

    #[test]
    fn test_zero_close_means_open() {
        for close in [json!(0), json!("0"), json!(""), Value::Null] {
            let mut record = base();
            record["date_close"] = close;
            assert!(coerce_transaction(&record).unwrap().is_open());
        }
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let mut record = base();
        record["date_created"] = json!("2024-03-01 08:30:15");
        let tx = coerce_transaction(&record).unwrap();
        assert_eq!(tx.date_created, Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap());
    }

    #[test]
    fn test_epoch_seconds_accepted() {
        let mut record = base();
        record["date_created"] = json!(1_709_280_000);
        let tx = coerce_transaction(&record).unwrap();
        assert_eq!(tx.date_created.timestamp(), 1_709_280_000);
    }

    #[test]
    fn test_missing_identifier_rejected() {
        let mut record = base();
        record.as_object_mut().unwrap().remove("transaction_id");
        assert_eq!(
            coerce_transaction(&record).unwrap_err(),
            ValidationError::Required {
                field: "transaction_id".into()
            }
        );

        record["transaction_id"] = json!("   ");
        assert!(coerce_transaction(&record).is_err());
    }

    #[test]
    fn test_missing_amount_and_creation_rejected() {
        let mut record = base();
        record.as_object_mut().unwrap().remove("paid_amount");
        assert!(matches!(
            coerce_transaction(&record),
            Err(ValidationError::Required { .. })
        ));

        let mut record = base();
        record["date_created"] = json!("0");
        assert!(matches!(
            coerce_transaction(&record),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_bad_field_types_rejected() {
        let mut record = base();
        record["table_id"] = json!("four");
        assert!(coerce_transaction(&record).is_err());

        let mut record = base();
        record["date_created"] = json!("yesterday");
        assert!(coerce_transaction(&record).is_err());

        let mut record = base();
        record["paid_amount"] = json!({"value": 1});
        assert!(coerce_transaction(&record).is_err());

        assert_eq!(
            coerce_transaction(&json!([1, 2])).unwrap_err(),
            ValidationError::NotAnObject
        );
    }

    #[test]
    fn test_string_products_kept_verbatim() {
        let mut record = base();
        record["products"] = json!("not json at all");
        let tx = coerce_transaction(&record).unwrap();
        assert_eq!(tx.products, "not json at all");
    }

    #[test]
    fn test_numeric_amount_keeps_literal_digits() {
        let record: Value = serde_json::from_str(
            r#"{"transaction_id": 1, "paid_amount": 1999.90, "date_created": "2024-03-01 10:00:00"}"#,
        )
        .unwrap();
        let tx = coerce_transaction(&record).unwrap();
        assert_eq!(tx.paid_amount.as_str(), "1999.90");

        let record: Value = serde_json::from_str(
            r#"{"transaction_id": 2, "paid_amount": 12345678901234567.89, "date_created": "2024-03-01 10:00:00"}"#,
        )
        .unwrap();
        let tx = coerce_transaction(&record).unwrap();
        assert_eq!(tx.paid_amount.as_str(), "12345678901234567.89");
    }

    #[test]
    fn test_peek_id_on_invalid_record() {
        let record = json!({ "transaction_id": 9, "paid_amount": "abc" });
        assert!(coerce_transaction(&record).is_err());
        assert_eq!(peek_transaction_id(&record).as_deref(), Some("9"));
        assert_eq!(peek_transaction_id(&json!({ "paid_amount": "1" })), None);
    }
}
