//! The result envelope returned for every extraction.
//!
//! [`ExtractionResult`] serialises with a stable field order
//! (`success, data, errors, warnings, metadata`) and is also the format written
//! by [`crate::extract::save_result`].

use crate::prompts::PromptVariant;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bytes per MiB, the unit of every `*_file_size_mb` field.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert a byte count to MiB.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Outcome of one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// True iff `errors` is empty.
    pub success: bool,

    /// `header`, `transactions` and `obligations` as returned by the model,
    /// with numeric transaction fields coerced. Empty when nothing was
    /// extracted.
    pub data: Map<String, Value>,

    /// Extraction and validation errors, in the order they were found.
    pub errors: Vec<String>,

    /// Informational notes (reduction applied, fallback model used, …).
    pub warnings: Vec<String>,

    pub metadata: ExtractionMetadata,
}

impl ExtractionResult {
    /// Number of transaction records in `data`; 0 when absent or not a list.
    pub fn transaction_count(&self) -> usize {
        self.data
            .get("transactions")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// A string field of the `header` section, if present.
    pub fn header_field(&self, field: &str) -> Option<&str> {
        self.data.get("header")?.get(field)?.as_str()
    }
}

/// Provenance of an [`ExtractionResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// RFC 3339 local time at which the result was assembled.
    pub extraction_timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,

    /// Model whose answer was used; the requested model when none answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Handle of the uploaded document at the model service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,

    pub total_transactions: usize,

    /// Number of entries in `errors`.
    pub validation_errors: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_file_size_mb: Option<f64>,

    /// Size of the uploaded document. Equal to the original size when no
    /// reduction happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduced_file_size_mb: Option<f64>,

    pub file_reduced: bool,

    /// The generation-5 model answered empty and the fallback model was used.
    pub fallback_used: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_variant: Option<PromptVariant>,
}
