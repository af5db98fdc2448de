//! Result validation: required sections, required fields, ISIN format and
//! numeric coercion of transaction amounts.
//!
//! Validation is fail-soft. Every rule is checked regardless of earlier
//! failures and each violation is one [`ValidationError`]; the orchestrator
//! turns their `Display` text into `ExtractionResult::errors`.
//!
//! A section that is present but not a JSON object is treated as an empty
//! section, so each of its required fields is reported missing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Header fields that must be present and non-blank.
pub const HEADER_FIELDS: [&str; 6] = [
    "contract_note_no",
    "trade_date",
    "settlement_no",
    "settlement_date",
    "client_id",
    "client_name",
];

/// Transaction fields coerced to numbers when the model returned strings.
pub const NUMERIC_FIELDS: [&str; 8] = [
    "buy_quantity",
    "sell_quantity",
    "total_quantity",
    "buy_weighted_average_price",
    "sell_weighted_average_price",
    "buy_net_payable_receivable",
    "sell_net_payable_receivable",
    "total_net_payable_receivable",
];

/// Keys that must exist in the `obligations` section.
pub const OBLIGATION_FIELDS: [&str; 7] = [
    "pay_out_obligation",
    "taxable_value_of_supply",
    "gst_details",
    "securities_transaction_tax",
    "stamp_duty",
    "net_amount_receivable_by_client",
    "net_amount_to_be_credited_in_bank",
];

/// Keys that must exist in `obligations.taxable_value_of_supply`.
pub const TAXABLE_VALUE_FIELDS: [&str; 4] = [
    "total_brokerage",
    "exchange_transaction_charges",
    "sebi_turnover_fees",
    "total_taxable_value",
];

/// Keys that must exist in `obligations.gst_details`.
pub const GST_FIELDS: [&str; 12] = [
    "cgst_rate",
    "cgst_brokerage_amount",
    "cgst_charges_amount",
    "cgst_total_amount",
    "sgst_rate",
    "sgst_brokerage_amount",
    "sgst_charges_amount",
    "sgst_total_amount",
    "igst_rate",
    "igst_brokerage_amount",
    "igst_charges_amount",
    "igst_total_amount",
];

static RE_ISIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}[0-9A-Z]{10}$").unwrap());

/// One violated rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No data extracted from PDF")]
    NoData,

    #[error("Missing header section")]
    MissingHeader,

    #[error("Missing required header field: {0}")]
    MissingHeaderField(&'static str),

    #[error("Missing transactions section")]
    MissingTransactions,

    #[error("Transactions should be a list")]
    TransactionsNotList,

    #[error("Transaction {index}: Missing ISIN")]
    MissingIsin { index: usize },

    #[error("Transaction {index}: Invalid ISIN format: {isin}")]
    InvalidIsin { index: usize, isin: String },

    #[error("Transaction {index}: Missing security name")]
    MissingSecurityName { index: usize },

    #[error("Transaction {index}: Invalid numeric value for {field}: {value}")]
    InvalidNumeric {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("Missing obligations section")]
    MissingObligations,

    #[error("Missing obligations field: {0}")]
    MissingObligationField(&'static str),

    #[error("Missing taxable value field: {0}")]
    MissingTaxableValueField(&'static str),

    #[error("Missing GST detail field: {0}")]
    MissingGstField(&'static str),
}

/// Check `data` against the contract-note rules.
///
/// Numeric transaction fields given as strings are rewritten in place. An
/// empty mapping yields only [`ValidationError::NoData`].
pub fn validate(data: &mut Map<String, Value>) -> Vec<ValidationError> {
    if data.is_empty() {
        return vec![ValidationError::NoData];
    }

    let mut errors = Vec::new();

    // ── Header ───────────────────────────────────────────────────────────────
    match data.get("header") {
        None => errors.push(ValidationError::MissingHeader),
        Some(header) => {
            for field in HEADER_FIELDS {
                if header.get(field).is_none_or(is_blank) {
                    errors.push(ValidationError::MissingHeaderField(field));
                }
            }
        }
    }

    // ── Transactions ─────────────────────────────────────────────────────────
    match data.get_mut("transactions") {
        None => errors.push(ValidationError::MissingTransactions),
        Some(Value::Array(transactions)) => {
            for (index, transaction) in transactions.iter_mut().enumerate() {
                validate_transaction(transaction, index, &mut errors);
            }
        }
        Some(_) => errors.push(ValidationError::TransactionsNotList),
    }

    // ── Obligations ──────────────────────────────────────────────────────────
    match data.get("obligations") {
        None => errors.push(ValidationError::MissingObligations),
        Some(obligations) => validate_obligations(obligations, &mut errors),
    }

    errors
}

fn validate_transaction(transaction: &mut Value, index: usize, errors: &mut Vec<ValidationError>) {
    match transaction.get("isin") {
        None | Some(Value::Null) => errors.push(ValidationError::MissingIsin { index }),
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(ValidationError::MissingIsin { index })
        }
        Some(Value::String(s)) => {
            if !RE_ISIN.is_match(s) {
                errors.push(ValidationError::InvalidIsin {
                    index,
                    isin: s.clone(),
                });
            }
        }
        Some(other) => errors.push(ValidationError::InvalidIsin {
            index,
            isin: other.to_string(),
        }),
    }

    if transaction.get("security_name").is_none_or(is_blank) {
        errors.push(ValidationError::MissingSecurityName { index });
    }

    let Some(record) = transaction.as_object_mut() else {
        return;
    };
    for field in NUMERIC_FIELDS {
        let Some(value) = record.get_mut(field) else {
            continue;
        };
        match value {
            Value::Null | Value::Number(_) => {}
            Value::String(s) => match coerce_number(s) {
                Some(n) => *value = Value::Number(n),
                None => errors.push(ValidationError::InvalidNumeric {
                    index,
                    field,
                    value: s.clone(),
                }),
            },
            other => errors.push(ValidationError::InvalidNumeric {
                index,
                field,
                value: other.to_string(),
            }),
        }
    }
}

fn validate_obligations(obligations: &Value, errors: &mut Vec<ValidationError>) {
    for field in OBLIGATION_FIELDS {
        if obligations.get(field).is_none() {
            errors.push(ValidationError::MissingObligationField(field));
        }
    }

    if let Some(tvs) = obligations.get("taxable_value_of_supply") {
        for field in TAXABLE_VALUE_FIELDS {
            if tvs.get(field).is_none() {
                errors.push(ValidationError::MissingTaxableValueField(field));
            }
        }
    }

    if let Some(gst) = obligations.get("gst_details") {
        for field in GST_FIELDS {
            if gst.get(field).is_none() {
                errors.push(ValidationError::MissingGstField(field));
            }
        }
    }
}

/// Null, `false`, whitespace-only strings and empty containers are blank.
/// Numbers, including zero, are not.
fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(_) => false,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Parse `" 1,23,456.50 "` style amounts. Integers stay integers.
fn coerce_number(raw: &str) -> Option<Number> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Number::from(i));
    }
    let f = cleaned.parse::<f64>().ok()?;
    if f.is_finite() {
        Number::from_f64(f)
    } else {
        None
    }
}
