//! Dynamic decoding for the ledger's open-ended `Value` variant.
//!
//! Mirrors the teacher's manual, positional decoding style in
//! `watchers/evm.rs::parse_deposit_log` (typed extraction, explicit errors,
//! never a panic on a mismatched shape) but walks a labeled `Record` instead
//! of a fixed byte layout.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ledger::pb;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("field '{0}' missing from record")]
    MissingField(String),
    #[error("field '{field}' has variant {found}, expected {expected}")]
    WrongVariant {
        field: String,
        found: &'static str,
        expected: &'static str,
    },
    #[error("malformed numeric value: {0}")]
    Numeric(String),
    #[error("malformed timestamp")]
    Timestamp,
}

/// A decoded ledger value. One arm per branch of the wire `Value` oneof.
#[derive(Debug, Clone)]
pub enum LedgerValue {
    Text(String),
    Party(String),
    Numeric(String),
    ContractId(String),
    Timestamp(DateTime<Utc>),
    Record(Vec<(String, LedgerValue)>),
    Optional(Option<Box<LedgerValue>>),
    Variant(String, Box<LedgerValue>),
    Int64(i64),
}

impl LedgerValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            LedgerValue::Text(_) => "Text",
            LedgerValue::Party(_) => "Party",
            LedgerValue::Numeric(_) => "Numeric",
            LedgerValue::ContractId(_) => "ContractId",
            LedgerValue::Timestamp(_) => "Timestamp",
            LedgerValue::Record(_) => "Record",
            LedgerValue::Optional(_) => "Optional",
            LedgerValue::Variant(..) => "Variant",
            LedgerValue::Int64(_) => "Int64",
        }
    }

    pub fn from_wire(value: &pb::Value) -> Option<Self> {
        use pb::value::Sum;
        let sum = value.sum.as_ref()?;
        Some(match sum {
            Sum::Text(s) => LedgerValue::Text(s.clone()),
            Sum::Party(s) => LedgerValue::Party(s.clone()),
            Sum::Numeric(s) => LedgerValue::Numeric(s.clone()),
            Sum::ContractId(s) => LedgerValue::ContractId(s.clone()),
            Sum::Timestamp(ts) => {
                let dt = DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)?;
                LedgerValue::Timestamp(dt)
            }
            Sum::Record(r) => LedgerValue::Record(
                r.fields
                    .iter()
                    .filter_map(|f| {
                        f.value
                            .as_ref()
                            .and_then(LedgerValue::from_wire)
                            .map(|v| (f.label.clone(), v))
                    })
                    .collect(),
            ),
            Sum::Optional(inner) => {
                LedgerValue::Optional(LedgerValue::from_wire(inner).map(Box::new))
            }
            Sum::Variant(v) => {
                let inner = match v.value.as_ref() {
                    Some(boxed) => LedgerValue::from_wire(boxed)?,
                    None => return None,
                };
                LedgerValue::Variant(v.constructor.clone(), Box::new(inner))
            }
            Sum::Int64(i) => LedgerValue::Int64(*i),
        })
    }

    pub fn extract_text(&self, field: &str) -> Result<&str, DecodeError> {
        match self {
            LedgerValue::Text(s) | LedgerValue::Party(s) | LedgerValue::ContractId(s) => Ok(s),
            other => Err(DecodeError::WrongVariant {
                field: field.to_string(),
                found: other.variant_name(),
                expected: "Text",
            }),
        }
    }

    pub fn extract_numeric(&self, field: &str) -> Result<bigdecimal::BigDecimal, DecodeError> {
        match self {
            LedgerValue::Numeric(s) => s
                .parse()
                .map_err(|_| DecodeError::Numeric(s.clone())),
            other => Err(DecodeError::WrongVariant {
                field: field.to_string(),
                found: other.variant_name(),
                expected: "Numeric",
            }),
        }
    }

    pub fn extract_timestamp(&self, field: &str) -> Result<DateTime<Utc>, DecodeError> {
        match self {
            LedgerValue::Timestamp(ts) => Ok(*ts),
            other => Err(DecodeError::WrongVariant {
                field: field.to_string(),
                found: other.variant_name(),
                expected: "Timestamp",
            }),
        }
    }

    pub fn extract_record(&self, field: &str) -> Result<&[(String, LedgerValue)], DecodeError> {
        match self {
            LedgerValue::Record(fields) => Ok(fields),
            other => Err(DecodeError::WrongVariant {
                field: field.to_string(),
                found: other.variant_name(),
                expected: "Record",
            }),
        }
    }
}

/// Walks a decoded `Record`'s labeled fields by name, the way
/// `parse_deposit_log` walks a fixed byte layout by offset.
pub struct RecordExtractor<'a> {
    fields: &'a [(String, LedgerValue)],
}

impl<'a> RecordExtractor<'a> {
    pub fn new(fields: &'a [(String, LedgerValue)]) -> Self {
        Self { fields }
    }

    fn get(&self, label: &str) -> Result<&'a LedgerValue, DecodeError> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
            .ok_or_else(|| DecodeError::MissingField(label.to_string()))
    }

    pub fn text(&self, label: &str) -> Result<String, DecodeError> {
        self.get(label)?.extract_text(label).map(str::to_string)
    }

    pub fn numeric(&self, label: &str) -> Result<bigdecimal::BigDecimal, DecodeError> {
        self.get(label)?.extract_numeric(label)
    }

    pub fn timestamp(&self, label: &str) -> Result<DateTime<Utc>, DecodeError> {
        self.get(label)?.extract_timestamp(label)
    }

    pub fn record(&self, label: &str) -> Result<RecordExtractor<'a>, DecodeError> {
        self.get(label)?.extract_record(label).map(RecordExtractor::new)
    }

    pub fn optional_text(&self, label: &str) -> Result<Option<String>, DecodeError> {
        match self.get(label) {
            Ok(LedgerValue::Optional(inner)) => match inner {
                Some(boxed) => Ok(Some(boxed.extract_text(label)?.to_string())),
                None => Ok(None),
            },
            Ok(other) => Ok(Some(other.extract_text(label)?.to_string())),
            Err(DecodeError::MissingField(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Vec<(String, LedgerValue)> {
        vec![
            ("owner".to_string(), LedgerValue::Party("alice".to_string())),
            ("amount".to_string(), LedgerValue::Numeric("12.5".to_string())),
            ("note".to_string(), LedgerValue::Optional(None)),
        ]
    }

    #[test]
    fn test_record_extractor_reads_text_and_numeric() {
        let fields = sample_record();
        let ext = RecordExtractor::new(&fields);
        assert_eq!(ext.text("owner").unwrap(), "alice");
        assert_eq!(ext.numeric("amount").unwrap().to_string(), "12.5");
    }

    #[test]
    fn test_record_extractor_missing_field_errors() {
        let fields = sample_record();
        let ext = RecordExtractor::new(&fields);
        assert!(matches!(ext.text("missing"), Err(DecodeError::MissingField(_))));
    }

    #[test]
    fn test_record_extractor_wrong_variant_errors() {
        let fields = sample_record();
        let ext = RecordExtractor::new(&fields);
        assert!(matches!(ext.numeric("owner"), Err(DecodeError::WrongVariant { .. })));
    }

    #[test]
    fn test_record_extractor_optional_none() {
        let fields = sample_record();
        let ext = RecordExtractor::new(&fields);
        assert_eq!(ext.optional_text("note").unwrap(), None);
    }
}
