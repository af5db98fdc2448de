//! Extraction entry points: one document, a batch, or bytes already in memory.
//!
//! ## Why return a result instead of `Err`?
//!
//! Every per-document failure (unreadable file, reduction, upload, model
//! error, unparseable answer, failed validation) ends up in
//! [`ExtractionResult::errors`]. A batch of fifty notes should report the one
//! bad scan next to forty-nine good results, and the envelope written by
//! [`save_result`] is the same whatever happened. Only set-up problems
//! (config, prompt files, API key) and writing the output file return
//! `Err(ExtractError)`.
//!
//! ## Steps
//!
//! ```text
//! input ──▶ reduce? ──▶ upload ──▶ generate ──▶ recover ──▶ validate
//!          (> limit)              (ladder)     (repair)    (coerce)
//!                     └──────────── cleanup (always) ────────────┘
//! ```

use crate::config::ExtractorConfig;
use crate::error::{ExtractError, ReductionError};
use crate::output::{bytes_to_mb, ExtractionResult};
use crate::pipeline::gateway::{self, FileHandle, ModelService};
use crate::pipeline::input::{self, LoadedDocument};
use crate::pipeline::openai::OpenAiService;
use crate::pipeline::reduce::{self, ReducedDocument};
use crate::pipeline::{recover, validate};
use crate::progress::ProgressCallback;
use crate::prompts::{self, PromptAssets};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-call overrides of the configured prompts and model.
#[derive(Debug, Clone, Default)]
pub struct ExtractionRequest {
    /// Replaces the system prompt loaded from the `files` section.
    pub system_prompt: Option<String>,
    /// Appended to the system prompt after a blank line.
    pub position_prompt: Option<String>,
    /// Replaces `openai.default_model`.
    pub model: Option<String>,
}

impl ExtractionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_position_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.position_prompt = Some(prompt.into());
        self
    }
}

/// Runs the extraction pipeline against a [`ModelService`].
///
/// Cheap to share: wrap it in an `Arc` or borrow it from concurrent tasks.
pub struct Extractor {
    config: ExtractorConfig,
    prompts: PromptAssets,
    service: Arc<dyn ModelService>,
    progress: Option<ProgressCallback>,
}

impl Extractor {
    /// Assemble an extractor from its parts. Tests pass a fake service here.
    pub fn new(config: ExtractorConfig, prompts: PromptAssets, service: Arc<dyn ModelService>) -> Self {
        Self {
            config,
            prompts,
            service,
            progress: None,
        }
    }

    /// Load prompt assets from `config` and connect to OpenAI.
    ///
    /// `api_key` overrides the environment variable named by
    /// `openai.api_key_env_var`.
    pub fn from_config(config: ExtractorConfig, api_key: Option<String>) -> Result<Self, ExtractError> {
        let prompts = PromptAssets::load(&config)?;
        let service = OpenAiService::from_settings(&config.openai, api_key)?;
        Ok(Self::new(config, prompts, Arc::new(service)))
    }

    /// Attach a progress callback for [`Extractor::extract_batch`].
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn prompts(&self) -> &PromptAssets {
        &self.prompts
    }

    /// Extract one PDF from disk.
    pub async fn extract(&self, path: impl AsRef<Path>, request: &ExtractionRequest) -> ExtractionResult {
        let path = path.as_ref();
        info!("Starting extraction: {}", path.display());
        match input::load_local(path).await {
            Ok(doc) => self.run(doc, request).await,
            Err(e) => {
                error!("{}", e);
                let mut result = ExtractionResult::default();
                result.metadata.pdf_path = Some(path.display().to_string());
                result.errors.push(e.to_string());
                finish(result)
            }
        }
    }

    /// Extract a PDF held in memory. `name` is used for the upload and for
    /// `metadata.pdf_path`.
    pub async fn extract_bytes(
        &self,
        name: &str,
        bytes: Vec<u8>,
        request: &ExtractionRequest,
    ) -> ExtractionResult {
        info!("Starting extraction: {} ({} bytes)", name, bytes.len());
        if let Err(e) = input::check_magic(&bytes, Path::new(name)) {
            let mut result = ExtractionResult::default();
            result.metadata.pdf_path = Some(name.to_string());
            result.errors.push(e.to_string());
            return finish(result);
        }
        self.run(LoadedDocument::from_bytes(name, bytes), request)
            .await
    }

    /// Extract several PDFs, at most `extraction.concurrency` at a time.
    ///
    /// Results come back in the order of `paths`.
    pub async fn extract_batch(&self, paths: &[PathBuf], request: &ExtractionRequest) -> Vec<ExtractionResult> {
        let total = paths.len();
        if let Some(cb) = &self.progress {
            cb.on_batch_start(total);
        }

        let mut indexed: Vec<(usize, ExtractionResult)> =
            stream::iter(paths.iter().enumerate().map(|(index, path)| async move {
                if let Some(cb) = &self.progress {
                    cb.on_document_start(index, total, &input::file_name(path));
                }
                let result = self.extract(path, request).await;
                if let Some(cb) = &self.progress {
                    cb.on_document_complete(index, total, result.success, result.transaction_count());
                }
                (index, result)
            }))
            .buffer_unordered(self.config.extraction.concurrency.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let results: Vec<ExtractionResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let succeeded = results.iter().filter(|r| r.success).count();
        info!("Batch complete: {}/{} succeeded", succeeded, total);
        if let Some(cb) = &self.progress {
            cb.on_batch_complete(total, succeeded);
        }
        results
    }

    async fn run(&self, doc: LoadedDocument, request: &ExtractionRequest) -> ExtractionResult {
        let start = Instant::now();
        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.openai.default_model.clone());

        let mut result = ExtractionResult::default();
        let original_mb = bytes_to_mb(doc.size());
        result.metadata.pdf_path = Some(match &doc.path {
            Some(p) => p.display().to_string(),
            None => doc.name.clone(),
        });
        result.metadata.model_used = Some(model.clone());
        result.metadata.original_file_size_mb = Some(original_mb);
        result.metadata.reduced_file_size_mb = Some(original_mb);

        let mut reduced: Option<ReducedDocument> = None;
        let uploaded = self
            .run_stages(doc, request, &model, &mut result, &mut reduced)
            .await;

        // ── Cleanup ──────────────────────────────────────────────────────────
        if let Some(reduced) = reduced {
            let path = reduced.path().to_path_buf();
            match reduced.file.close() {
                Ok(()) => info!("Cleaned up temporary file: {}", path.display()),
                Err(e) => {
                    warn!("Failed to clean up temporary file {}: {}", path.display(), e);
                    result
                        .warnings
                        .push(format!("Failed to remove temporary file {}: {}", path.display(), e));
                }
            }
        }
        if let Some(handle) = uploaded {
            if self.config.openai.delete_uploaded_files {
                if let Err(e) = self.service.delete_file(&handle).await {
                    warn!("Failed to delete uploaded file {}: {}", handle.id, e);
                    result
                        .warnings
                        .push(format!("Failed to delete uploaded file {}: {}", handle.id, e));
                }
            }
        }

        let result = finish(result);
        info!(
            "Extraction finished in {}ms: success={}, {} transactions, {} errors",
            start.elapsed().as_millis(),
            result.success,
            result.metadata.total_transactions,
            result.errors.len()
        );
        result
    }

    /// Reduce, upload, generate, recover and validate. Returns the upload
    /// handle so the caller can clean it up; terminal failures return early
    /// with the reason recorded in `result.errors`.
    async fn run_stages(
        &self,
        doc: LoadedDocument,
        request: &ExtractionRequest,
        model: &str,
        result: &mut ExtractionResult,
        reduced: &mut Option<ReducedDocument>,
    ) -> Option<FileHandle> {
        // ── Step 1: Size check and reduction ─────────────────────────────────
        let original_size = doc.size();
        let original_mb = bytes_to_mb(original_size);
        let limits = &self.config.pdf_reduction;
        info!("PDF file size: {:.2}MB", original_mb);
        debug!(
            "PDF reduction enabled: {}, threshold: {}MB",
            limits.enabled, limits.max_file_size_mb
        );

        let mut upload_bytes = doc.bytes;
        if limits.enabled && original_mb > limits.max_file_size_mb {
            info!(
                "PDF size exceeds threshold ({}MB), reducing size...",
                limits.max_file_size_mb
            );
            let outcome = match reduce::reduce_document(upload_bytes.clone()).await {
                Ok(r) => tokio::fs::read(r.path())
                    .await
                    .map(|bytes| (r, bytes))
                    .map_err(ReductionError::from),
                Err(e) => Err(e),
            };
            let (doc_reduced, bytes) = match outcome {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Failed to reduce PDF size: {}", e);
                    result.errors.push(format!("PDF size reduction failed: {}", e));
                    return None;
                }
            };

            if record_reduction(result, original_size, doc_reduced.reduced_size) {
                upload_bytes = bytes;
            }
            *reduced = Some(doc_reduced);
        }

        // ── Step 2: Upload ───────────────────────────────────────────────────
        let handle = match self.service.upload(&doc.name, upload_bytes).await {
            Ok(h) => h,
            Err(e) => {
                error!("Failed to upload PDF: {}", e);
                result
                    .errors
                    .push(format!("Failed to upload PDF to OpenAI: {}", e));
                return None;
            }
        };
        result.metadata.file_id = Some(handle.id.clone());

        // ── Step 3: Prompt and generation ────────────────────────────────────
        let base = request
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.prompts.system_prompt);
        let prompt = prompts::compose(
            base,
            request.position_prompt.as_deref(),
            &self.prompts.schema,
            self.config.extraction.max_prompt_tokens,
        );
        result.metadata.prompt_variant = Some(prompt.variant);

        let text = match gateway::generate(
            self.service.as_ref(),
            &handle,
            &prompt,
            model,
            &self.config.openai,
        )
        .await
        {
            Ok(outcome) => {
                result.metadata.model_used = Some(outcome.model_used);
                result.metadata.fallback_used = outcome.fallback_used;
                result.warnings.extend(outcome.warnings);
                outcome.text
            }
            Err(e) => {
                error!("OpenAI extraction failed: {}", e);
                result.errors.push(format!("OpenAI extraction failed: {}", e));
                if e.is_token_limit() {
                    result.warnings.push(
                        "PDF is too large for the model's context window; enable pdf_reduction \
                         or lower max_file_size_mb"
                            .to_string(),
                    );
                }
                None
            }
        };

        // ── Step 4: Recover and validate ─────────────────────────────────────
        let mut data = text.as_deref().map(recover::recover_json).unwrap_or_default();
        let violations = validate::validate(&mut data);
        result
            .errors
            .extend(violations.iter().map(ToString::to_string));
        result.data = data;

        Some(handle)
    }
}

/// Note the outcome of a reduction. Returns true when the reduced document
/// should be uploaded instead of the original.
fn record_reduction(result: &mut ExtractionResult, original_size: u64, reduced_size: u64) -> bool {
    let original_mb = bytes_to_mb(original_size);
    if reduced_size < original_size {
        let reduced_mb = bytes_to_mb(reduced_size);
        result.warnings.push(format!(
            "PDF was reduced from {:.2}MB to {:.2}MB",
            original_mb, reduced_mb
        ));
        result.metadata.file_reduced = true;
        result.metadata.reduced_file_size_mb = Some(reduced_mb);
        true
    } else {
        warn!("Reduced PDF is not smaller than the original; uploading the original");
        result.warnings.push(format!(
            "PDF reduction did not shrink the file ({:.2}MB); the original was uploaded",
            original_mb
        ));
        false
    }
}

/// Fill the derived fields of the envelope.
fn finish(mut result: ExtractionResult) -> ExtractionResult {
    result.metadata.extraction_timestamp = chrono::Local::now().to_rfc3339();
    result.metadata.total_transactions = result.transaction_count();
    result.metadata.validation_errors = result.errors.len();
    result.success = result.errors.is_empty();
    result
}

/// Write `result` as pretty-printed JSON.
///
/// Uses atomic write (temp file + rename) so readers never see a partial
/// file.
pub async fn save_result(result: &ExtractionResult, path: impl AsRef<Path>) -> Result<(), ExtractError> {
    let path = path.as_ref();
    let write_err = |e: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(result)
        .map_err(|e| ExtractError::Internal(format!("serialising result: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Results saved to: {}", path.display());
    Ok(())
}

/// Synchronous wrapper around [`Extractor::extract`].
///
/// Creates a temporary tokio runtime internally; do not call from async code.
pub fn extract_sync(
    extractor: &Extractor,
    path: impl AsRef<Path>,
    request: &ExtractionRequest,
) -> Result<ExtractionResult, ExtractError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(extractor.extract(path, request)))
}
