//! Model gateway: the model-service seam, request profiles and the fallback ladder.
//!
//! All prompt text lives in [`crate::prompts`] and all HTTP in
//! [`crate::pipeline::openai`]; this module only decides *which* model is asked
//! with *which* parameters, and what happens when it answers with nothing.
//!
//! ## Why a ladder?
//!
//! Generation-5 models occasionally return an empty completion for a file
//! input (the whole token budget goes to hidden reasoning). Re-asking a legacy
//! model with the same messages usually succeeds. The ladder is an ordered list
//! of attempts tried until one produces text, so further rungs can be added
//! without touching the orchestrator.
//!
//! ```text
//! Primary ──text──▶ done
//!    │ empty (gpt-5 family)
//!    ▼
//! Fallback (legacy profile) ──text──▶ done
//!    │ empty / error
//!    ▼
//! no text
//! ```

use crate::config::OpenAiSettings;
use crate::error::{GenerationError, UploadError};
use crate::prompts::ComposedPrompt;
use async_trait::async_trait;
use tracing::{error, info, warn};

/// Identifier prefix of the generation-5 model family.
pub const NEW_GENERATION_PREFIX: &str = "gpt-5";

/// Opaque handle of a document stored at the model service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub id: String,
}

/// One chat request: system instruction, uploaded file and directive text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub file_id: String,
    pub directive: String,
    pub profile: RequestProfile,
}

/// Length and sampling parameters, by model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestProfile {
    /// `max_tokens` plus `temperature`.
    Legacy { max_tokens: u32, temperature: f32 },
    /// `max_completion_tokens`; the service rejects `temperature` here.
    NewGeneration { max_completion_tokens: u32 },
}

/// Model families with distinct request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Legacy,
    NewGeneration,
}

impl ModelFamily {
    pub fn classify(model: &str) -> Self {
        if model.starts_with(NEW_GENERATION_PREFIX) {
            ModelFamily::NewGeneration
        } else {
            ModelFamily::Legacy
        }
    }

    /// Request parameters for this family from configuration.
    pub fn profile(self, settings: &OpenAiSettings) -> RequestProfile {
        match self {
            ModelFamily::Legacy => RequestProfile::Legacy {
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
            ModelFamily::NewGeneration => RequestProfile::NewGeneration {
                max_completion_tokens: settings.max_tokens,
            },
        }
    }

    /// Whether an empty answer from this family moves on to the next rung.
    pub fn falls_back_on_empty(self) -> bool {
        matches!(self, ModelFamily::NewGeneration)
    }
}

/// A hosted model able to read an uploaded PDF.
///
/// Implemented by [`crate::pipeline::openai::OpenAiService`]; tests substitute
/// a scripted fake.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Store `bytes` at the service and return its handle.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileHandle, UploadError>;

    /// Run one chat completion and return the text of the first choice.
    /// A missing or null message content is returned as an empty string.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;

    /// Remove an uploaded document. Services without deletion keep the default.
    async fn delete_file(&self, _file: &FileHandle) -> Result<(), UploadError> {
        Ok(())
    }
}

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub model: String,
    pub profile: RequestProfile,
}

/// Attempts for `model`, in order.
///
/// Generation-5 models get the configured fallback model as a second rung,
/// with the request profile of the fallback model's own family; every other
/// model is tried once.
pub fn fallback_ladder(model: &str, settings: &OpenAiSettings) -> Vec<Attempt> {
    let family = ModelFamily::classify(model);
    let mut ladder = vec![Attempt {
        model: model.to_string(),
        profile: family.profile(settings),
    }];
    if family.falls_back_on_empty() && settings.fallback_model != model {
        ladder.push(Attempt {
            model: settings.fallback_model.clone(),
            profile: ModelFamily::classify(&settings.fallback_model).profile(settings),
        });
    }
    ladder
}

/// What the ladder produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutcome {
    /// Non-empty model output, or `None` when every rung came back empty.
    pub text: Option<String>,
    /// Model of the rung that answered; the primary model when none did.
    pub model_used: String,
    pub fallback_used: bool,
    pub warnings: Vec<String>,
}

/// Walk the ladder for `model` until one attempt yields text.
///
/// An error from the primary attempt is returned as `Err`; it is terminal for
/// this document. Errors from later rungs only add a warning.
pub async fn generate(
    service: &dyn ModelService,
    file: &FileHandle,
    prompt: &ComposedPrompt,
    model: &str,
    settings: &OpenAiSettings,
) -> Result<GenerationOutcome, GenerationError> {
    let ladder = fallback_ladder(model, settings);
    let mut outcome = GenerationOutcome {
        model_used: model.to_string(),
        ..Default::default()
    };

    for (rung, attempt) in ladder.iter().enumerate() {
        let request = CompletionRequest {
            model: attempt.model.clone(),
            system: prompt.system.clone(),
            file_id: file.id.clone(),
            directive: prompt.directive.clone(),
            profile: attempt.profile,
        };
        let is_primary = rung == 0;
        if !is_primary {
            info!("Attempting fallback extraction with {}...", attempt.model);
        }

        let text = match service.complete(&request).await {
            Ok(t) => t,
            Err(e) if is_primary => return Err(e),
            Err(e) => {
                error!("Fallback extraction failed: {}", e);
                outcome
                    .warnings
                    .push(format!("Fallback model {} failed: {}", attempt.model, e));
                return Ok(outcome);
            }
        };
        info!("{} response received: {} characters", attempt.model, text.len());

        if !text.trim().is_empty() {
            if !is_primary {
                info!("Successfully used {} fallback", attempt.model);
                outcome.fallback_used = true;
                outcome.model_used = attempt.model.clone();
                outcome.warnings.push(format!(
                    "{} returned an empty response; used fallback model {}",
                    model, attempt.model
                ));
            }
            outcome.text = Some(text);
            return Ok(outcome);
        }

        match ladder.get(rung + 1) {
            Some(next) => warn!(
                "{} returned empty response, trying fallback to {}",
                attempt.model, next.model
            ),
            None if is_primary => warn!("Empty response received from {}", attempt.model),
            None => {
                error!("Fallback model also returned empty response");
                outcome.warnings.push(format!(
                    "Fallback model {} also returned an empty response",
                    attempt.model
                ));
            }
        }
    }

    Ok(outcome)
}
