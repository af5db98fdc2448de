//! Configuration types for contract-note extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractorConfig`]. It is
//! normally read from a `config.json` whose four sections mirror the four
//! concerns of the pipeline:
//!
//! ```json
//! {
//!   "openai":        { "default_model": "gpt-4o", "max_tokens": 4096, "temperature": 0.1 },
//!   "extraction":    { "use_minimal_prompts": true, "max_prompt_tokens": 4000 },
//!   "pdf_reduction": { "enabled": true, "max_file_size_mb": 50 },
//!   "files":         { "system_prompt": "minimal_system_prompt.md", "compact_schema": "compact_schema.json" }
//! }
//! ```
//!
//! Every field has a default, so a partial file (or no file at all, via
//! [`ExtractorConfig::default`]) is valid. Library callers who never touch a
//! file use [`ExtractorConfig::builder`] instead.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Model that replaces an empty generation-5 answer.
pub const DEFAULT_FALLBACK_MODEL: &str = "gpt-4o";

/// Complete extractor configuration.
///
/// # Example
/// ```rust
/// use contract_note_extractor::ExtractorConfig;
///
/// let config = ExtractorConfig::builder()
///     .model("gpt-4o")
///     .max_file_size_mb(20.0)
///     .build()
///     .unwrap();
/// assert!(config.pdf_reduction.enabled);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Model service parameters.
    pub openai: OpenAiSettings,
    /// Prompt and batch behaviour.
    pub extraction: ExtractionSettings,
    /// Page trimming of oversized documents.
    pub pdf_reduction: PdfReductionSettings,
    /// Prompt and schema asset locations.
    pub files: FileSettings,
    /// Directory that relative `files` entries resolve against. Set by
    /// [`ExtractorConfig::from_file`]; the current directory otherwise.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// `openai` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    /// Environment variable holding the API key. Default: `OPENAI_API_KEY`.
    pub api_key_env_var: String,

    /// API root. Default: `https://api.openai.com/v1`.
    pub base_url: String,

    /// Model used when the caller does not name one. Default: `gpt-4o`.
    pub default_model: String,

    /// Completion-length cap. Sent as `max_tokens` to legacy models and as
    /// `max_completion_tokens` to the gpt-5 family. Default: 4096.
    pub max_tokens: u32,

    /// Sampling temperature for legacy models. Default: 0.1.
    ///
    /// Never sent to gpt-5 models; the service rejects it for that family.
    pub temperature: f32,

    /// Legacy model tried once when a gpt-5 model answers with empty text.
    pub fallback_model: String,

    /// Per-HTTP-call timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Retries for transient transport failures. Default: 0.
    ///
    /// Quota and context-length rejections are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Delete the uploaded document from the service once extraction is
    /// done. Default: true.
    pub delete_uploaded_files: bool,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key_env_var: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            request_timeout_secs: 120,
            max_retries: 0,
            retry_backoff_ms: 500,
            delete_uploaded_files: true,
        }
    }
}

/// `extraction` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Use `files.system_prompt` (short) instead of `files.full_system_prompt`.
    pub use_minimal_prompts: bool,

    /// Budget, in estimated tokens (`chars / 4`), for system prompt plus
    /// compact directive. Above it the schema-free directive is used.
    pub max_prompt_tokens: usize,

    /// Documents processed at once by [`crate::Extractor::extract_batch`]. Default: 4.
    pub concurrency: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            use_minimal_prompts: true,
            max_prompt_tokens: 4000,
            concurrency: 4,
        }
    }
}

/// `pdf_reduction` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfReductionSettings {
    /// Trim oversized documents to their first and last two pages. Default: true.
    pub enabled: bool,

    /// Size above which a document is trimmed, in MiB. Default: 50.
    pub max_file_size_mb: f64,
}

impl Default for PdfReductionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size_mb: 50.0,
        }
    }
}

/// `files` section: paths of externally maintained prompt assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub system_prompt: PathBuf,
    pub full_system_prompt: PathBuf,
    pub compact_schema: PathBuf,
    pub full_schema: PathBuf,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            system_prompt: PathBuf::from("minimal_system_prompt.md"),
            full_system_prompt: PathBuf::from("system_prompt.md"),
            compact_schema: PathBuf::from("compact_schema.json"),
            full_schema: PathBuf::from("full_schema.json"),
        }
    }
}

impl ExtractorConfig {
    /// Create a new builder for `ExtractorConfig`.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read and validate a JSON configuration file.
    ///
    /// Relative asset paths in the `files` section are resolved against the
    /// directory containing `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ExtractError::ConfigParse {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                }
            }
        })?;

        let mut config: ExtractorConfig =
            serde_json::from_str(&text).map_err(|e| ExtractError::ConfigParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!("Loaded configuration from {}", path.display());

        ExtractorConfigBuilder { config }.build()
    }

    /// Resolve an asset path from the `files` section.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        }
    }

    /// The system-prompt file selected by `extraction.use_minimal_prompts`.
    pub fn system_prompt_path(&self) -> PathBuf {
        if self.extraction.use_minimal_prompts {
            self.resolve(&self.files.system_prompt)
        } else {
            self.resolve(&self.files.full_system_prompt)
        }
    }
}

/// Builder for [`ExtractorConfig`].
#[derive(Debug)]
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.openai.default_model = model.into();
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.openai.fallback_model = model.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.openai.base_url = url.into();
        self
    }

    pub fn api_key_env_var(mut self, var: impl Into<String>) -> Self {
        self.config.openai.api_key_env_var = var.into();
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.openai.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.openai.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.openai.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.openai.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.openai.retry_backoff_ms = ms;
        self
    }

    pub fn delete_uploaded_files(mut self, v: bool) -> Self {
        self.config.openai.delete_uploaded_files = v;
        self
    }

    pub fn use_minimal_prompts(mut self, v: bool) -> Self {
        self.config.extraction.use_minimal_prompts = v;
        self
    }

    pub fn max_prompt_tokens(mut self, n: usize) -> Self {
        self.config.extraction.max_prompt_tokens = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.extraction.concurrency = n.max(1);
        self
    }

    pub fn reduction_enabled(mut self, v: bool) -> Self {
        self.config.pdf_reduction.enabled = v;
        self
    }

    pub fn max_file_size_mb(mut self, mb: f64) -> Self {
        self.config.pdf_reduction.max_file_size_mb = mb;
        self
    }

    pub fn files(mut self, files: FileSettings) -> Self {
        self.config.files = files;
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = dir.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractorConfig, ExtractError> {
        let c = &self.config;
        if c.openai.default_model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "openai.default_model must not be empty".into(),
            ));
        }
        if c.openai.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "openai.max_tokens must be ≥ 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&c.openai.temperature) {
            return Err(ExtractError::InvalidConfig(format!(
                "openai.temperature must be 0.0–2.0, got {}",
                c.openai.temperature
            )));
        }
        if c.extraction.max_prompt_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "extraction.max_prompt_tokens must be ≥ 1".into(),
            ));
        }
        if c.extraction.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "extraction.concurrency must be ≥ 1".into(),
            ));
        }
        let mb = c.pdf_reduction.max_file_size_mb;
        if mb.is_nan() || mb <= 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "pdf_reduction.max_file_size_mb must be > 0, got {}",
                mb
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractorConfig::default();
        assert_eq!(c.openai.default_model, "gpt-4o");
        assert_eq!(c.openai.temperature, 0.1);
        assert_eq!(c.openai.fallback_model, DEFAULT_FALLBACK_MODEL);
        assert!(c.pdf_reduction.enabled);
        assert_eq!(c.pdf_reduction.max_file_size_mb, 50.0);
        assert!(c.extraction.use_minimal_prompts);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"openai": {{"default_model": "gpt-5-mini", "max_tokens": 8000}},
                "pdf_reduction": {{"max_file_size_mb": 10}}}}"#
        )
        .unwrap();

        let c = ExtractorConfig::from_file(&path).unwrap();
        assert_eq!(c.openai.default_model, "gpt-5-mini");
        assert_eq!(c.openai.max_tokens, 8000);
        assert_eq!(c.openai.temperature, 0.1);
        assert_eq!(c.pdf_reduction.max_file_size_mb, 10.0);
        assert!(c.pdf_reduction.enabled);
        assert_eq!(c.base_dir, dir.path());
    }

    #[test]
    fn relative_assets_resolve_against_config_dir() {
        let c = ExtractorConfig::builder()
            .base_dir("/etc/cnx")
            .build()
            .unwrap();
        assert_eq!(
            c.system_prompt_path(),
            PathBuf::from("/etc/cnx/minimal_system_prompt.md")
        );
        assert_eq!(
            c.resolve(Path::new("/abs/schema.json")),
            PathBuf::from("/abs/schema.json")
        );
    }

    #[test]
    fn full_prompt_selected_when_minimal_disabled() {
        let c = ExtractorConfig::builder()
            .use_minimal_prompts(false)
            .build()
            .unwrap();
        assert!(c.system_prompt_path().ends_with("system_prompt.md"));
        assert!(!c.system_prompt_path().ends_with("minimal_system_prompt.md"));
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let err = ExtractorConfig::from_file("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ExtractError::ConfigNotFound { .. }));
    }

    #[test]
    fn invalid_json_is_config_parse() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{ not json").unwrap();
        let err = ExtractorConfig::from_file(f.path()).unwrap_err();
        assert!(matches!(err, ExtractError::ConfigParse { .. }));
    }

    #[test]
    fn builder_rejects_non_positive_threshold() {
        let err = ExtractorConfig::builder()
            .max_file_size_mb(0.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_file_size_mb"));
    }

    #[test]
    fn builder_clamps_temperature_and_concurrency() {
        let c = ExtractorConfig::builder()
            .temperature(9.0)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.openai.temperature, 2.0);
        assert_eq!(c.extraction.concurrency, 1);
    }
}
