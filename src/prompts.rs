//! Prompts and prompt composition for contract-note extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the directive wording and the built-in
//!    schema live in exactly one place.
//!
//! 2. **Testability**: unit tests inspect composed prompts directly without
//!    a model round trip, so prompt regressions are easy to catch.
//!
//! Production deployments usually keep prompts and schemas in files next to
//! `config.json` ([`PromptAssets::load`]); the constants here back
//! [`PromptAssets::builtin`] for library callers that have no asset files.

use crate::config::ExtractorConfig;
use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default system prompt used by [`PromptAssets::builtin`].
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a financial data extraction engine for Indian brokerage contract notes.

Read the attached contract note and return a single JSON object with exactly three keys:

1. "header": contract_note_no, trade_date, settlement_no, settlement_date,
   client_id, client_name. Copy values exactly as printed.
2. "transactions": one object per security (ISIN). Use 12-character ISINs,
   the security name as printed, and plain numbers for quantities, prices and
   amounts (no currency symbols, no thousands separators).
3. "obligations": the bill summary: pay-out obligation, taxable value of
   supply, GST breakdown (CGST/SGST/IGST), securities transaction tax, stamp
   duty and the net amounts.

Rules:
- Output JSON only. No commentary, no Markdown fences.
- Use 0 for amounts that are printed as blank or nil.
- Use null for values that do not appear in the document."#;

/// Compact schema used by [`PromptAssets::builtin`]. Mirrors the fields the
/// validator requires.
pub const DEFAULT_COMPACT_SCHEMA: &str = r#"{
  "header": {
    "contract_note_no": "", "trade_date": "", "settlement_no": "",
    "settlement_date": "", "client_id": "", "client_name": ""
  },
  "transactions": [{
    "isin": "", "security_name": "",
    "buy_quantity": 0, "buy_weighted_average_price": 0, "buy_net_payable_receivable": 0,
    "sell_quantity": 0, "sell_weighted_average_price": 0, "sell_net_payable_receivable": 0,
    "total_quantity": 0, "total_net_payable_receivable": 0
  }],
  "obligations": {
    "pay_out_obligation": 0,
    "taxable_value_of_supply": {
      "total_brokerage": 0, "exchange_transaction_charges": 0,
      "sebi_turnover_fees": 0, "total_taxable_value": 0
    },
    "gst_details": {
      "cgst_rate": 0, "cgst_brokerage_amount": 0, "cgst_charges_amount": 0, "cgst_total_amount": 0,
      "sgst_rate": 0, "sgst_brokerage_amount": 0, "sgst_charges_amount": 0, "sgst_total_amount": 0,
      "igst_rate": 0, "igst_brokerage_amount": 0, "igst_charges_amount": 0, "igst_total_amount": 0
    },
    "securities_transaction_tax": 0,
    "stamp_duty": 0,
    "net_amount_receivable_by_client": 0,
    "net_amount_to_be_credited_in_bank": 0
  }
}"#;

/// Lead-in of the compact directive; the minified schema follows it.
const COMPACT_DIRECTIVE: &str = "Extract contract note data. Return JSON only:";

/// Schema-free directive used when the compact one would exceed the budget.
pub const ULTRA_COMPACT_DIRECTIVE: &str =
    "Extract contract note data. Return JSON with header, transactions, obligations.";

/// Which directive variant was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    /// Directive plus minified schema.
    Compact,
    /// Terse directive without schema.
    UltraCompact,
}

/// Prompt text and output schema, loaded once per extractor.
#[derive(Debug, Clone)]
pub struct PromptAssets {
    /// Base instruction for the system role.
    pub system_prompt: String,
    /// Output schema embedded in the compact directive.
    pub schema: Value,
}

impl PromptAssets {
    /// Built-in prompt and schema; no file access.
    pub fn builtin() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            // The constant is covered by `builtin_schema_is_valid_json`.
            schema: serde_json::from_str(DEFAULT_COMPACT_SCHEMA).unwrap_or(Value::Null),
        }
    }

    /// Load the system prompt and schema named in the `files` section.
    ///
    /// The system prompt is required. The schema falls back from
    /// `compact_schema` to `full_schema` to an empty object.
    pub fn load(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let prompt_path = config.system_prompt_path();
        let system_prompt = std::fs::read_to_string(&prompt_path).map_err(|_| {
            ExtractError::AssetNotFound {
                path: prompt_path.clone(),
            }
        })?;
        debug!("Loaded system prompt from {}", prompt_path.display());

        let compact = config.resolve(&config.files.compact_schema);
        let full = config.resolve(&config.files.full_schema);
        let schema = match read_schema(&compact)? {
            Some(schema) => schema,
            None => {
                warn!(
                    "Compact schema not found: {}, trying full schema",
                    compact.display()
                );
                match read_schema(&full)? {
                    Some(schema) => schema,
                    None => {
                        warn!("No schema file found; prompts will carry an empty schema");
                        Value::Object(Default::default())
                    }
                }
            }
        };

        Ok(Self {
            system_prompt,
            schema,
        })
    }
}

/// Read a schema file. `Ok(None)` when the file does not exist.
fn read_schema(path: &Path) -> Result<Option<Value>, ExtractError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ExtractError::AssetParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ExtractError::AssetParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

/// The instruction payload for one model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    /// System-role text: base instruction plus position prompt.
    pub system: String,
    /// User-role text sent next to the uploaded document.
    pub directive: String,
    pub variant: PromptVariant,
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Join the base instruction and the optional position prompt.
pub fn system_instruction(base: &str, position: Option<&str>) -> String {
    match position.map(str::trim).filter(|p| !p.is_empty()) {
        Some(position) => format!("{base}\n\n{position}"),
        None => base.to_string(),
    }
}

/// The compact directive: lead-in plus schema without insignificant whitespace.
pub fn compact_directive(schema: &Value) -> String {
    // Serialising a `Value` cannot fail.
    let schema_text = serde_json::to_string(schema).unwrap_or_default();
    format!("{COMPACT_DIRECTIVE}\n\n{schema_text}")
}

/// Build the system instruction and directive for one request.
///
/// The compact variant is used while `system + directive` stays within
/// `max_prompt_tokens` estimated tokens; otherwise the schema is dropped.
pub fn compose(
    base: &str,
    position: Option<&str>,
    schema: &Value,
    max_prompt_tokens: usize,
) -> ComposedPrompt {
    let system = system_instruction(base, position);
    let compact = compact_directive(schema);
    let estimated = estimate_tokens(&format!("{compact}{system}"));
    info!(
        "Estimated prompt tokens: {}, max: {}",
        estimated, max_prompt_tokens
    );

    if estimated <= max_prompt_tokens {
        debug!("Using compact prompt");
        ComposedPrompt {
            system,
            directive: compact,
            variant: PromptVariant::Compact,
        }
    } else {
        warn!("Prompt too long, using ultra-compact directive");
        ComposedPrompt {
            system,
            directive: ULTRA_COMPACT_DIRECTIVE.to_string(),
            variant: PromptVariant::UltraCompact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_schema_is_valid_json() {
        let v: Value = serde_json::from_str(DEFAULT_COMPACT_SCHEMA).unwrap();
        assert!(v.get("header").is_some());
        assert!(v.get("transactions").unwrap().is_array());
        assert!(v["obligations"].get("gst_details").is_some());
        assert_eq!(PromptAssets::builtin().schema, v);
    }

    #[test]
    fn estimate_is_chars_div_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("₹₹₹₹"), 1);
    }

    #[test]
    fn position_prompt_appended_after_blank_line() {
        assert_eq!(system_instruction("base", Some("pos")), "base\n\npos");
        assert_eq!(system_instruction("base", None), "base");
        assert_eq!(system_instruction("base", Some("   ")), "base");
    }

    #[test]
    fn compact_directive_minifies_schema() {
        let d = compact_directive(&json!({"header": {"a": ""}, "transactions": []}));
        assert!(d.ends_with(r#"{"header":{"a":""},"transactions":[]}"#), "got: {d}");
        assert!(d.starts_with(COMPACT_DIRECTIVE));
    }

    #[test]
    fn compose_uses_compact_within_budget() {
        let p = compose("sys", Some("pos"), &json!({"header": {}}), 1000);
        assert_eq!(p.variant, PromptVariant::Compact);
        assert_eq!(p.system, "sys\n\npos");
        assert!(p.directive.contains(r#"{"header":{}}"#));
    }

    #[test]
    fn compose_downgrades_over_budget() {
        let long_system = "x".repeat(400); // 100 estimated tokens
        let p = compose(&long_system, None, &json!({"header": {}}), 100);
        assert_eq!(p.variant, PromptVariant::UltraCompact);
        assert_eq!(p.directive, ULTRA_COMPACT_DIRECTIVE);
        assert_eq!(p.system, long_system);
    }

    #[test]
    fn compose_boundary_is_inclusive() {
        let schema = json!({});
        let system = "y".repeat(40);
        let total = estimate_tokens(&format!("{}{}", compact_directive(&schema), system));
        let p = compose(&system, None, &schema, total);
        assert_eq!(p.variant, PromptVariant::Compact);
        let p = compose(&system, None, &schema, total - 1);
        assert_eq!(p.variant, PromptVariant::UltraCompact);
    }

    #[test]
    fn load_falls_back_to_full_schema() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("minimal_system_prompt.md"), "short prompt").unwrap();
        std::fs::write(dir.path().join("full_schema.json"), r#"{"header":{"x":""}}"#).unwrap();
        let config = ExtractorConfig::builder()
            .base_dir(dir.path())
            .build()
            .unwrap();

        let assets = PromptAssets::load(&config).unwrap();
        assert_eq!(assets.system_prompt, "short prompt");
        assert_eq!(assets.schema, json!({"header": {"x": ""}}));
    }

    #[test]
    fn load_without_schemas_uses_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("minimal_system_prompt.md"), "p").unwrap();
        let config = ExtractorConfig::builder()
            .base_dir(dir.path())
            .build()
            .unwrap();
        assert_eq!(PromptAssets::load(&config).unwrap().schema, json!({}));
    }

    #[test]
    fn load_requires_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractorConfig::builder()
            .base_dir(dir.path())
            .build()
            .unwrap();
        let err = PromptAssets::load(&config).unwrap_err();
        assert!(matches!(err, ExtractError::AssetNotFound { .. }));
    }

    #[test]
    fn load_rejects_invalid_schema() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("minimal_system_prompt.md"), "p").unwrap();
        std::fs::write(dir.path().join("compact_schema.json"), "{oops").unwrap();
        let config = ExtractorConfig::builder()
            .base_dir(dir.path())
            .build()
            .unwrap();
        let err = PromptAssets::load(&config).unwrap_err();
        assert!(matches!(err, ExtractError::AssetParse { .. }));
    }
}
