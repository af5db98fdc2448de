//! # contract-note-extractor
//!
//! Extract structured data (header, transactions, obligations) from brokerage
//! contract-note PDFs by handing the document to a hosted language model.
//!
//! ## Why this crate?
//!
//! Contract notes differ between brokers in layout, column order and wording,
//! so template-based parsers break on every new format. This crate does not
//! parse the PDF at all: it uploads it, asks the model for JSON shaped like a
//! compact schema, and then does the part a model cannot be trusted with:
//! repairing truncated or fenced output, checking required fields and ISINs,
//! and coercing amounts to numbers.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     read the file, check the %PDF magic
//!  ├─ 2. Reduce    keep pages 1-2 and the last two when over the size limit (pdfium)
//!  ├─ 3. Upload    Files API, purpose "user_data"
//!  ├─ 4. Generate  chat completion; gpt-5 empty answer → gpt-4o fallback
//!  ├─ 5. Recover   strip fences, repair truncated JSON
//!  └─ 6. Validate  required fields, ISIN format, numeric coercion
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contract_note_extractor::{save_result, ExtractionRequest, Extractor, ExtractorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key from OPENAI_API_KEY
//!     let config = ExtractorConfig::from_file("config.json")?;
//!     let extractor = Extractor::from_config(config, None)?;
//!     let result = extractor
//!         .extract("contract_note.pdf", &ExtractionRequest::default())
//!         .await;
//!     if !result.success {
//!         eprintln!("errors: {:?}", result.errors);
//!     }
//!     save_result(&result, "contract_note_extracted.json").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cnx` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! contract-note-extractor = { version = "0.3", default-features = false }
//! ```
//!
//! ## Choosing a Model
//!
//! | Model | Notes |
//! |-------|-------|
//! | `gpt-4o` | Default; reliable JSON, reads scanned pages |
//! | `gpt-4o-mini` | Cheaper; occasionally drops obligation fields |
//! | `gpt-5`, `gpt-5-mini` | No temperature; empty answers fall back to `openai.fallback_model` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractorConfig, ExtractorConfigBuilder};
pub use error::{ExtractError, GenerationError, ParseError, ReductionError, UploadError};
pub use extract::{extract_sync, save_result, ExtractionRequest, Extractor};
pub use output::{ExtractionMetadata, ExtractionResult};
pub use pipeline::gateway::{CompletionRequest, FileHandle, ModelService, RequestProfile};
pub use pipeline::openai::OpenAiService;
pub use pipeline::validate::ValidationError;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptAssets, PromptVariant};
