//! Contract traits for providers, models, and tools.
//!
//! The engine stores implementations as `Arc<dyn Trait>` and dispatches
//! dynamically.
//!
//! # Design Decisions
//!
//! - **Explicit `Pin<Box<dyn Future>>`** instead of `#[async_trait]`, so the
//!   real signature is visible at every impl site.
//! - **`Send + Sync` on trait definition**: errors appear at the impl site,
//!   not scattered across every usage site.
//! - **`Arc<dyn Trait>`** over generics: providers are registered at runtime
//!   and looked up by string id, which needs dynamic dispatch anyway.
//!
//! # Connections
//!
//! - [`Provider`] is what the [`ProviderRegistry`](crate::registry::ProviderRegistry)
//!   stores. It hands out one model type per [`ModelKind`].
//! - [`LanguageModel`] and [`ImageModel`] are what the engine invokes.
//! - [`Tool`] is executed by the prompt tool-use stream transform.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::cancellation::AbortSignal;
use crate::errors::{ProviderError, ToolError};
use crate::messages::{
    ImageRequest, ImageResult, LanguageModelRequest, Message, TextResult, ToolSpec,
};
use crate::models::ModelKind;
use crate::stream::ChunkStream;

/// Boxed future returned by provider and model calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// Per-invocation information handed to [`Tool::execute`].
#[derive(Debug, Clone, Default)]
pub struct ToolCallOptions {
    /// Id of this invocation, as reported in `tool-call` chunks.
    pub tool_call_id: String,
    /// Conversation that led to the call.
    pub messages: Vec<Message>,
    /// Caller's abort signal, forwarded untouched.
    pub abort_signal: Option<AbortSignal>,
}

/// A callable tool.
///
/// # Example
///
/// ```rust
/// use std::future::Future;
/// use std::pin::Pin;
/// use ai_core::errors::ToolError;
/// use ai_core::traits::{Tool, ToolCallOptions};
/// use serde_json::Value;
///
/// struct EchoTool;
///
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echoes input back" }
///     fn input_schema(&self) -> Value { serde_json::json!({"type": "object"}) }
///     fn execute(
///         &self,
///         input: Value,
///         _options: ToolCallOptions,
///     ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
///         Box::pin(async move { Ok(input) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value;

    /// Spec sent to models with native tool support.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
        }
    }

    /// Run the tool with decoded input.
    fn execute(
        &self,
        input: Value,
        options: ToolCallOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A text model: the engine's target for text and object operations.
pub trait LanguageModel: Send + Sync {
    /// Id of the provider that produced this model.
    fn provider(&self) -> &str;

    /// Model id within the provider.
    fn model_id(&self) -> &str;

    /// Generate a complete response.
    fn generate(&self, request: LanguageModelRequest) -> ProviderFuture<'_, TextResult>;

    /// Start a streamed response.
    ///
    /// Failures after the stream started are reported as `error` chunks.
    fn stream(&self, request: LanguageModelRequest) -> ProviderFuture<'_, ChunkStream>;
}

/// An image model.
pub trait ImageModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Largest `n` the model accepts in one request.
    fn max_images_per_call(&self) -> u32 {
        1
    }

    fn generate(&self, request: ImageRequest) -> ProviderFuture<'_, ImageResult>;
}

/// A text embedding model.
pub trait EmbeddingModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    fn embed(&self, values: Vec<String>) -> ProviderFuture<'_, Vec<Vec<f32>>>;
}

/// A speech-to-text model.
pub trait TranscriptionModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    fn transcribe(&self, audio: Vec<u8>, media_type: String) -> ProviderFuture<'_, String>;
}

/// A text-to-speech model.
pub trait SpeechModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model_id(&self) -> &str;

    fn speak(&self, text: String) -> ProviderFuture<'_, Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A configured provider: hands out models by id, one resolver per kind.
///
/// Only [`language_model`](Provider::language_model) is mandatory. The
/// other kinds default to [`ProviderError::UnsupportedModelKind`].
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. `"openai"`).
    fn id(&self) -> &str;

    fn language_model(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>, ProviderError>;

    fn embedding_model(&self, _model_id: &str) -> Result<Arc<dyn EmbeddingModel>, ProviderError> {
        Err(unsupported(self.id(), ModelKind::Embedding))
    }

    fn image_model(&self, _model_id: &str) -> Result<Arc<dyn ImageModel>, ProviderError> {
        Err(unsupported(self.id(), ModelKind::Image))
    }

    fn transcription_model(
        &self,
        _model_id: &str,
    ) -> Result<Arc<dyn TranscriptionModel>, ProviderError> {
        Err(unsupported(self.id(), ModelKind::Transcription))
    }

    fn speech_model(&self, _model_id: &str) -> Result<Arc<dyn SpeechModel>, ProviderError> {
        Err(unsupported(self.id(), ModelKind::Speech))
    }
}

fn unsupported(provider: &str, kind: ModelKind) -> ProviderError {
    ProviderError::UnsupportedModelKind {
        provider: provider.to_string(),
        kind,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
