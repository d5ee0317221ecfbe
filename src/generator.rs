//! Text generation collaborator.
//!
//! The self-modification controller asks a [`TextGenerator`] for proposals
//! and repairs. Implementations must enforce their own request timeout; the
//! controller never cancels an issued request.
//!
//! - [`OpenAiGenerator`]: OpenAI-compatible chat completions over HTTP
//! - [`StaticGenerator`]: fixed responses, for the demo binary and tests
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: required by [`OpenAiGenerator::new`]

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GovernorError;

/// Per-request generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Replaces the generator's default system prompt when set.
    pub system_override: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
            system_override: None,
        }
    }
}

/// Raw output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// The model's text, unparsed.
    pub raw_text: String,
}

/// Trait for text generation backends.
///
/// Thread-safe and object-safe so it can be shared as `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::Generation`] on transport failure, non-2xx
    /// status, or an unusable response.
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<Generation, GovernorError>;
}

// ============================================================================
// Static Generator
// ============================================================================

/// Returns queued responses in order, then repeats the fallback.
///
/// Records every prompt it receives.
pub struct StaticGenerator {
    queued: Mutex<VecDeque<String>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl StaticGenerator {
    /// A generator that always answers `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: response.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A generator that answers `responses` in order, then the last one forever.
    pub fn sequence<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queued: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let fallback = queued.back().cloned().unwrap_or_default();
        Self {
            queued: Mutex::new(queued),
            fallback,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Every prompt received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: GenerationOptions,
    ) -> Result<Generation, GovernorError> {
        self.prompts.lock().push(prompt.to_string());
        let raw_text = self
            .queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Generation { raw_text })
    }
}

// ============================================================================
// OpenAI Generator
// ============================================================================

const DEFAULT_SYSTEM_PROMPT: &str =
    "You maintain the behavioural configuration of an autonomous social agent. \
     Follow the requested response format exactly.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
///
/// ## Example
///
/// ```no_run
/// use molt_governor::OpenAiGenerator;
/// use std::time::Duration;
///
/// let generator = OpenAiGenerator::new("gpt-4o-mini")
///     .expect("OPENAI_API_KEY set")
///     .with_timeout(Duration::from_secs(60));
/// ```
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    /// Create a generator for `model`, reading `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::ConfigError`] if `OPENAI_API_KEY` is unset.
    pub fn new(model: impl Into<String>) -> Result<Self, GovernorError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            GovernorError::ConfigError("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self::with_api_key(model, api_key))
    }

    /// Create a generator with an explicit key.
    pub fn with_api_key(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Point at a different OpenAI-compatible endpoint (no trailing slash).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<Generation, GovernorError> {
        let system = options
            .system_override
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| GovernorError::Generation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GovernorError::Generation(format!(
                "API error {status}: {error_text}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GovernorError::Generation(format!("failed to parse response: {e}")))?;

        let raw_text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GovernorError::Generation("no choices in response".to_string()))?;

        debug!(
            model = %self.model,
            chars = raw_text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(Generation { raw_text })
    }
}
