//! OpenAI implementation of [`ModelService`]: Files API upload, Chat
//! Completions with a file content part, and file deletion.
//!
//! ## Retry Strategy
//!
//! HTTP 429 (rate limit) and 5xx answers, timeouts and dropped connections are
//! transient. They are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`) up to `max_retries` times. Quota
//! exhaustion and context-length rejections are never retried: asking again
//! cannot succeed.

use crate::config::OpenAiSettings;
use crate::error::{ExtractError, GenerationError, UploadError};
use crate::pipeline::gateway::{CompletionRequest, FileHandle, ModelService, RequestProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Files API purpose for documents referenced from chat messages.
pub const UPLOAD_PURPOSE: &str = "user_data";

/// HTTP client for the OpenAI REST API.
#[derive(Debug, Clone)]
pub struct OpenAiService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl OpenAiService {
    /// Create a service with an explicit key.
    pub fn new(api_key: impl Into<String>, settings: &OpenAiSettings) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout_secs: settings.request_timeout_secs,
            max_retries: settings.max_retries,
            retry_backoff_ms: settings.retry_backoff_ms,
        })
    }

    /// Create a service, taking the key from `api_key` or else from the
    /// environment variable named by `settings.api_key_env_var`.
    pub fn from_settings(
        settings: &OpenAiSettings,
        api_key: Option<String>,
    ) -> Result<Self, ExtractError> {
        let key = resolve_api_key(settings, api_key)?;
        Self::new(key, settings)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    async fn with_retries<T, E, F, Fut>(
        &self,
        what: &str,
        transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && transient(&e) => {
                    let backoff = self.retry_backoff_ms * 2u64.pow(attempt);
                    attempt += 1;
                    warn!(
                        "{}: retry {}/{} after {}ms ({})",
                        what, attempt, self.max_retries, backoff, e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upload_once(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileHandle, UploadError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", UPLOAD_PURPOSE)
            .part("file", part);

        let resp = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        if !status.is_success() {
            let (_, message) = parse_error_body(&body);
            return Err(UploadError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let file: FileObject = serde_json::from_str(&body).map_err(|_| UploadError::MissingId)?;
        match file.id {
            Some(id) if !id.is_empty() => Ok(FileHandle { id }),
            _ => Err(UploadError::MissingId),
        }
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let resp = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&ChatBody::from_request(request))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            let (code, message) = parse_error_body(&body);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            info!("Token usage: {}", usage);
        }
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::InvalidResponse("no choices in response".into()))?;

        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() {
            warn!(
                "Empty content from {} (finish_reason: {:?}, refusal: {:?})",
                request.model, choice.finish_reason, choice.message.refusal
            );
        }
        Ok(content)
    }

    fn transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ModelService for OpenAiService {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileHandle, UploadError> {
        let handle = self
            .with_retries("upload", upload_is_transient, || {
                self.upload_once(file_name, bytes.clone())
            })
            .await?;
        info!("PDF uploaded successfully: {}", handle.id);
        Ok(handle)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        debug!("Chat completion with {} ({:?})", request.model, request.profile);
        self.with_retries(&request.model, GenerationError::is_transient, || {
            self.complete_once(request)
        })
        .await
    }

    async fn delete_file(&self, file: &FileHandle) -> Result<(), UploadError> {
        let resp = self
            .client
            .delete(self.url(&format!("files/{}", file.id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (_, message) = parse_error_body(&body);
            return Err(UploadError::Api {
                status: status.as_u16(),
                message,
            });
        }
        debug!("Deleted uploaded file {}", file.id);
        Ok(())
    }
}

/// The API key from `explicit`, else from the configured environment variable.
pub fn resolve_api_key(
    settings: &OpenAiSettings,
    explicit: Option<String>,
) -> Result<String, ExtractError> {
    explicit
        .or_else(|| std::env::var(&settings.api_key_env_var).ok())
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ExtractError::ApiKeyMissing {
            env_var: settings.api_key_env_var.clone(),
        })
}

fn upload_is_transient(e: &UploadError) -> bool {
    match e {
        UploadError::Transport(_) => true,
        UploadError::Api { status, .. } => *status == 429 || *status >= 500,
        UploadError::MissingId => false,
    }
}

/// Pull `(code, message)` out of an `{"error": {...}}` body, falling back to
/// the raw text.
fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => {
            let code = match error.code {
                Some(Value::String(s)) => Some(s),
                Some(Value::Null) | None => error.kind,
                Some(other) => Some(other.to_string()),
            };
            (code, error.message.unwrap_or_default())
        }
        Err(_) => (None, body.trim().to_string()),
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> ChatBody<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        let (max_tokens, max_completion_tokens, temperature) = match request.profile {
            RequestProfile::Legacy {
                max_tokens,
                temperature,
            } => (Some(max_tokens), None, Some(temperature)),
            RequestProfile::NewGeneration {
                max_completion_tokens,
            } => (None, Some(max_completion_tokens), None),
        };
        Self {
            model: &request.model,
            messages: vec![
                ChatMessage::System {
                    content: &request.system,
                },
                ChatMessage::User {
                    content: vec![
                        ContentPart::File {
                            file: FileRef {
                                file_id: &request.file_id,
                            },
                        },
                        ContentPart::Text {
                            text: &request.directive,
                        },
                    ],
                },
            ],
            max_tokens,
            max_completion_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart<'a>> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentPart<'a> {
    File { file: FileRef<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileRef<'a> {
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<Value>,
}
