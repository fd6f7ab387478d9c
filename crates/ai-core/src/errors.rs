//! Error types for the ai-core engine.
//!
//! This module defines the full error taxonomy:
//!
//! - [`AiCoreError`] — top-level enum returned by every operation
//! - [`ModelResolutionError`] / [`ImageModelResolutionError`] — model id
//!   could not be turned into a handle
//! - [`ProviderError`] — failures reported by a provider or model
//! - [`ToolError`] — tool executor failures
//! - [`RecursiveCallError`] — continuation requests that could not run
//! - [`PluginError`] — hook failures raised by plugins
//! - [`ConfigError`] — configuration loading errors
//!
//! All types derive `Serialize` so errors can be embedded in `error` and
//! `tool-error` stream chunks.

use serde::Serialize;

use crate::models::ModelKind;

// -- ProviderError --

/// Provider and model failure taxonomy.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum ProviderError {
    /// Provider rate limit exceeded.
    /// Retryable by default.
    #[error("{message}")]
    RateLimit {
        message: String,
        provider: Option<String>,
        retry_after: Option<f64>,
    },

    /// Invalid or missing credentials.
    #[error("{message}")]
    Authentication {
        message: String,
        provider: Option<String>,
    },

    /// Malformed request rejected by the provider.
    #[error("{message}")]
    InvalidRequest {
        message: String,
        provider: Option<String>,
    },

    /// Provider service unavailable.
    /// Retryable by default.
    #[error("{message}")]
    Unavailable {
        message: String,
        provider: Option<String>,
        status_code: Option<u16>,
    },

    /// Request timed out before the provider responded.
    /// Retryable by default.
    #[error("{message}")]
    Timeout {
        message: String,
        provider: Option<String>,
    },

    /// The caller's abort signal fired.
    #[error("request aborted: {reason}")]
    Aborted { reason: String },

    /// The provider has no model with this id.
    #[error("no such {kind} model '{model_id}'")]
    NoSuchModel { model_id: String, kind: ModelKind },

    /// The provider does not offer models of this kind at all.
    #[error("provider '{provider}' does not support {kind} models")]
    UnsupportedModelKind { provider: String, kind: ModelKind },

    /// Generic provider error.
    #[error("{message}")]
    Other {
        message: String,
        provider: Option<String>,
        retryable: bool,
    },
}

impl ProviderError {
    /// Whether the caller should consider retrying the request.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Unavailable { .. } => true,
            Self::Timeout { .. } => true,
            Self::Other { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Seconds to wait before retrying, if the provider said so.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// -- Model resolution --

/// A model identifier could not be resolved to a model handle.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("cannot resolve {kind} model '{model_id}': {reason}")]
pub struct ModelResolutionError {
    pub model_id: String,
    pub provider_id: Option<String>,
    pub kind: ModelKind,
    pub reason: String,
}

impl ModelResolutionError {
    /// No provider is registered under `provider_id`.
    pub fn provider_not_found(model_id: &str, provider_id: &str, kind: ModelKind) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider_id: Some(provider_id.to_string()),
            kind,
            reason: format!("no provider registered under '{provider_id}'"),
        }
    }

    /// No resolve-model hook produced a handle.
    pub fn unresolved(model_id: &str, kind: ModelKind) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider_id: None,
            kind,
            reason: "no plugin resolved the model".into(),
        }
    }
}

/// Image-specific resolution failure.
///
/// Wraps the generic error so callers matching on image generation get a
/// distinct type while [`AiCoreError::is_model_resolution`] still groups both.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("image model resolution failed: {0}")]
pub struct ImageModelResolutionError(#[source] pub ModelResolutionError);

impl From<ModelResolutionError> for ImageModelResolutionError {
    fn from(err: ModelResolutionError) -> Self {
        Self(err)
    }
}

// -- ToolError --

/// Tool execution errors.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum ToolError {
    /// Tool execution failed.
    #[error("tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// Arguments did not match what the tool expects.
    #[error("invalid tool input: {message}")]
    InvalidInput { message: String },

    /// The abort signal fired while the tool was running.
    #[error("tool execution aborted")]
    Aborted,

    /// Catch-all for other tool errors.
    #[error("{message}")]
    Other { message: String },
}

// -- RecursiveCallError --

/// A continuation request could not be completed.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum RecursiveCallError {
    /// The context was not created by an engine, so there is nothing to re-enter.
    #[error("recursive call is not available on this context")]
    Unavailable,

    /// The logical call already issued `limit` continuations.
    #[error("maximum recursion depth {limit} exceeded")]
    DepthExceeded { limit: usize },

    /// The continuation ran and failed.
    #[error("recursive call failed: {message}")]
    Failed { message: String },
}

// -- PluginError --

/// A plugin hook failed.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("plugin '{plugin}' failed: {message}")]
pub struct PluginError {
    pub plugin: String,
    pub message: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

// -- ConfigError --

/// Configuration loading errors.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum ConfigError {
    /// A required configuration field is missing.
    #[error("missing required config: {field}")]
    Missing { field: String },

    /// The document could not be parsed.
    #[error("invalid config: {message}")]
    Parse { message: String },

    /// The config file could not be read.
    #[error("cannot read config file {path}: {message}")]
    Io { path: String, message: String },
}

// -- AiCoreError --

/// Top-level error enum wrapping all component errors.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum AiCoreError {
    /// A language (or other non-image) model could not be resolved.
    #[error(transparent)]
    ModelResolution(#[from] ModelResolutionError),

    /// An image model could not be resolved.
    #[error(transparent)]
    ImageModelResolution(#[from] ImageModelResolutionError),

    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A tool failed outside of a stream (streams capture this as a chunk).
    #[error("tool '{tool_name}' ({tool_call_id}) failed: {source}")]
    ToolExecution {
        tool_call_id: String,
        tool_name: String,
        source: ToolError,
    },

    /// A continuation request failed.
    #[error(transparent)]
    RecursiveCall(#[from] RecursiveCallError),

    /// A plugin hook failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Model output for an object request was not valid JSON.
    #[error("object generation failed: {message}")]
    ObjectGeneration { message: String, text: String },

    /// Parameters reaching the provider call do not fit the operation.
    #[error("operation '{operation}' cannot run with '{found}' parameters")]
    InvalidParams { operation: String, found: String },

    /// A result transform changed the result into a variant the operation
    /// cannot return.
    #[error("operation '{operation}' produced an unexpected '{found}' result")]
    UnexpectedResult { operation: String, found: String },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AiCoreError {
    /// `true` for both the generic and the image-specific resolution error.
    pub fn is_model_resolution(&self) -> bool {
        matches!(self, Self::ModelResolution(_) | Self::ImageModelResolution(_))
    }

    /// JSON form used inside `error` chunks.
    pub fn to_chunk_value(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .unwrap_or_else(|_| serde_json::Value::String(self.to_string()))
    }
}
