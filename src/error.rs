//! Error types for the contract-note-extractor library.
//!
//! Two families of errors reflect two distinct failure modes:
//!
//! * [`ExtractError`] (**set-up**): the extractor cannot be built or its output
//!   cannot be written (missing config, missing API key, unreadable prompt
//!   asset). Returned as `Err(ExtractError)` from constructors and
//!   [`crate::extract::save_result`].
//!
//! * Stage errors ([`ReductionError`], [`UploadError`], [`GenerationError`]
//!   and [`ParseError`]) describe why one pipeline stage failed for one
//!   document. They never escape [`crate::extract::Extractor::extract`]; the
//!   orchestrator turns them into entries of
//!   [`crate::output::ExtractionResult::errors`].
//!
//! Validation problems live in [`crate::pipeline::validate::ValidationError`]
//! because they are accumulated, not propagated.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal set-up and I/O errors returned by the library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The configuration file does not exist.
    #[error("Configuration file not found: '{path}'\nCreate it or pass --config <FILE>.")]
    ConfigNotFound { path: PathBuf },

    /// The configuration file exists but is not valid JSON for this crate.
    #[error("Configuration file '{path}' is invalid: {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required prompt file referenced from the configuration is missing.
    #[error("Required prompt file not found: '{path}'\nCheck the `files` section of the configuration.")]
    AssetNotFound { path: PathBuf },

    /// A schema file exists but does not contain valid JSON.
    #[error("Schema file '{path}' is not valid JSON: {detail}")]
    AssetParse { path: PathBuf, detail: String },

    /// No API key in the configured environment variable.
    #[error("OpenAI API key not found. Set {env_var} or pass --api-key.")]
    ApiKeyMissing { env_var: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the result file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The document could not be page-trimmed.
#[derive(Debug, Error)]
pub enum ReductionError {
    /// No pdfium shared library could be bound.
    #[error("pdfium library unavailable: {0}\nSet PDFIUM_LIB_PATH=/path/to/libpdfium.")]
    PdfiumUnavailable(String),

    /// pdfium could not parse the source document.
    #[error("document could not be parsed: {0}")]
    Unparseable(String),

    /// Copying pages into the reduced document failed.
    #[error("copying page {page} failed: {detail}")]
    PageCopy { page: usize, detail: String },

    /// The reduced document could not be serialised.
    #[error("reduced document could not be saved: {0}")]
    Save(String),

    /// The temporary file for the reduced document could not be written.
    #[error("temporary file error: {0}")]
    TempFile(#[from] std::io::Error),

    /// The blocking pdfium task panicked.
    #[error("reduction task failed: {0}")]
    Task(String),
}

/// The document could not be transferred to the model service.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Network-level failure (DNS, TLS, connection reset, timeout).
    #[error("upload transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("upload rejected (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The service answered 2xx but returned no file identifier.
    #[error("upload response carried no file id")]
    MissingId,
}

/// The chat-completion call raised.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The HTTP call exceeded the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service rejected the request.
    #[error("API error (HTTP {status}{}): {message}", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The service answered 2xx with a body that is not a chat completion.
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(", {c}")).unwrap_or_default()
}

impl GenerationError {
    /// True when the service refused the request because the prompt plus
    /// document exceed the model's context window.
    pub fn is_token_limit(&self) -> bool {
        match self {
            GenerationError::Api { code, message, .. } => {
                let msg = message.to_lowercase();
                code.as_deref() == Some("context_length_exceeded")
                    || msg.contains("token size")
                    || msg.contains("exceeds the maximum limit")
                    || msg.contains("maximum context length")
            }
            _ => false,
        }
    }

    /// True when the account has run out of credit. Never worth retrying.
    pub fn is_quota(&self) -> bool {
        matches!(self, GenerationError::Api { code: Some(c), .. } if c == "insufficient_quota")
    }

    /// Transient failures that a retry with backoff may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transport(_) | GenerationError::Timeout { .. } => true,
            GenerationError::Api { status, .. } => {
                (*status == 429 && !self.is_quota()) || *status >= 500
            }
            GenerationError::InvalidResponse(_) => false,
        }
    }
}

/// The model output could not be turned into a JSON object.
///
/// Never propagated past [`crate::pipeline::recover::recover_json`]; it only
/// feeds the log line explaining why the mapping came back empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing but whitespace and fences.
    #[error("response is empty after cleaning")]
    Empty,

    /// JSON parsed but the top level is not an object.
    #[error("top-level JSON value is a {0}, expected an object")]
    NotAnObject(&'static str),

    /// Every candidate substring failed to parse.
    #[error("malformed JSON: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>, message: &str) -> GenerationError {
        GenerationError::Api {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn token_limit_detected_from_message() {
        let e = api(400, None, "Request token size exceeds the maximum limit");
        assert!(e.is_token_limit());
        assert!(!e.is_transient());
    }

    #[test]
    fn token_limit_detected_from_code() {
        let e = api(400, Some("context_length_exceeded"), "too long");
        assert!(e.is_token_limit());
    }

    #[test]
    fn quota_is_not_transient() {
        let e = api(429, Some("insufficient_quota"), "You exceeded your current quota");
        assert!(e.is_quota());
        assert!(!e.is_transient());
        assert!(api(429, Some("rate_limit_exceeded"), "slow down").is_transient());
    }

    #[test]
    fn server_errors_and_timeouts_are_transient() {
        assert!(api(503, None, "overloaded").is_transient());
        assert!(GenerationError::Timeout { secs: 30 }.is_transient());
        assert!(!GenerationError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn api_display_includes_code() {
        let e = api(400, Some("invalid_request_error"), "bad file");
        let msg = e.to_string();
        assert!(msg.contains("HTTP 400, invalid_request_error"), "got: {msg}");
        let e = api(500, None, "boom");
        assert_eq!(e.to_string(), "API error (HTTP 500): boom");
    }

    #[test]
    fn api_key_missing_names_env_var() {
        let e = ExtractError::ApiKeyMissing {
            env_var: "OPENAI_API_KEY".into(),
        };
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }
}
