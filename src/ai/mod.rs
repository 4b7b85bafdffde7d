//! Generation and speech collaborators.
//!
//! The companion never talks to a model directly; it goes through the traits in
//! this module so the turn logic can be driven by scripted fakes in tests.
//!
//! - `gemini` - native Gemini client: SSE text streaming, `setReminder` tool, TTS
//! - `providers` - provider auto-detection plus rig-backed OpenAI / Anthropic / Ollama
//! - `persona` - system instruction for the active persona and mood
//! - `retry` - quota-aware exponential backoff around any generator
//!
//! ```rust,no_run
//! use korema::ai::{GenerationRequest, ProviderClient, StreamHandle, TextGenerator};
//! use korema::config::CompanionConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CompanionConfig::from_env()?;
//! let client = ProviderClient::from_env(&config)?;
//! let (handle, _snapshots) = StreamHandle::channel();
//! let request = GenerationRequest::new("hello");
//! let reply = client.generate(&request, handle).await?;
//! # Ok(())
//! # }
//! ```
pub mod gemini;
pub mod persona;
pub mod providers;
pub mod retry;

pub use gemini::{GeminiClient, GeminiConfig};
pub use providers::ProviderClient;
pub use retry::{RetryPolicy, Retrying};

use crate::audio::AudioClip;
use crate::types::{AiModel, Mood, Persona};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================
// Error Types
// ============================================

/// Failure reported by a generation collaborator.
///
/// Classification is by message content, because that is all the upstream
/// services reliably give us across providers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ChatError(String);

impl ChatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    /// Transient rate-limit / quota exhaustion.
    pub fn is_quota(&self) -> bool {
        let lower = self.0.to_lowercase();
        lower.contains("quota") || lower.contains("429")
    }

    /// Missing or rejected credential; the user has to pick a key again.
    pub fn is_credential(&self) -> bool {
        let lower = self.0.to_lowercase();
        lower.contains("entity was not found") || lower.contains("key")
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::new(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::new(err.to_string())
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::new(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

// ============================================
// Requests
// ============================================

/// Everything a text generator needs for one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Attached image as a `data:` URL.
    pub image: Option<String>,
    pub persona: Persona,
    pub mood: Mood,
    pub model: AiModel,
    pub code_mode: bool,
    pub strict_code_mode: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            persona: Persona::default(),
            mood: Mood::default(),
            model: AiModel::default(),
            code_mode: false,
            strict_code_mode: false,
        }
    }

    /// Strict code mode always runs on the pro model.
    pub fn effective_model(&self) -> AiModel {
        if self.strict_code_mode {
            AiModel::Pro
        } else {
            self.model
        }
    }

    pub fn system_instruction(&self) -> String {
        persona::system_instruction(self.persona, self.mood, self.code_mode || self.strict_code_mode)
    }
}

// ============================================
// Streaming
// ============================================

/// Function call surfaced by the model mid-stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Full text accumulated so far (not a delta).
    Snapshot(String),
    ToolCall(ToolCall),
    /// A new attempt begins; anything derived from earlier snapshots is stale.
    Restarted,
}

type EventSink = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Accumulates streamed pieces and republishes the full-so-far text.
///
/// Cloning yields a handle with its own copy of the buffer, so a retried
/// attempt can start over from the text the handle was cloned with.
#[derive(Clone)]
pub struct StreamHandle {
    buffer: String,
    sink: EventSink,
}

impl StreamHandle {
    pub fn new(sink: impl Fn(StreamEvent) + Send + Sync + 'static) -> Self {
        Self {
            buffer: String::new(),
            sink: Arc::new(sink),
        }
    }

    /// Handle whose events land in an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self::new(move |event| {
            // receiver gone means nobody is rendering this turn any more
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    pub fn append(&mut self, piece: &str) {
        if piece.is_empty() {
            return;
        }
        self.buffer.push_str(piece);
        (self.sink)(StreamEvent::Snapshot(self.buffer.clone()));
    }

    pub fn replace(&mut self, content: String) {
        self.buffer = content;
        (self.sink)(StreamEvent::Snapshot(self.buffer.clone()));
    }

    pub fn restart(&self) {
        (self.sink)(StreamEvent::Restarted);
    }

    pub fn tool_call(&self, call: ToolCall) {
        (self.sink)(StreamEvent::ToolCall(call));
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}

// ============================================
// Collaborator traits
// ============================================

/// Streams a reply into `handle` and returns the final accumulated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest, handle: StreamHandle) -> ChatResult<String>;
}

/// Turns text into audio. `None` means no audio (including on failure).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, persona: Persona) -> Option<AudioClip>;
}

/// Synthesizer for sessions without a speech backend: always text-only.
pub struct NoSpeech;

#[async_trait]
impl SpeechSynthesizer for NoSpeech {
    async fn synthesize(&self, _text: &str, _persona: Persona) -> Option<AudioClip> {
        None
    }
}
