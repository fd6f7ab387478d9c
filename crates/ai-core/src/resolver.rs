//! Model resolver -- model-identifier strings to concrete model handles.
//!
//! A full id (`provider|model`) is looked up directly in the registry. A
//! bare id is combined with the fallback provider id first. When the
//! provider options say `mode = "chat"`, the fallback providers `openai` and
//! `azure` are swapped for their chat-completions variants `openai-chat` and
//! `azure-chat`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{ImageModelResolutionError, ModelResolutionError};
use crate::middleware::{wrap_language_model, LanguageModelMiddleware};
use crate::registry::{format_model_id, parse_model_id, ProviderRegistry};
use crate::traits::{EmbeddingModel, ImageModel, LanguageModel, SpeechModel, TranscriptionModel};

/// Fallback provider id after the chat-mode rewrite.
pub fn effective_provider_id(provider_id: &str, provider_options: &HashMap<String, Value>) -> String {
    let chat_mode = provider_options.get("mode").and_then(Value::as_str) == Some("chat");
    match provider_id {
        "openai" | "azure" if chat_mode => format!("{provider_id}-chat"),
        other => other.to_string(),
    }
}

/// `model_id` unchanged if it is already a full id, otherwise joined with
/// `fallback_provider_id`.
pub fn qualify_model_id(model_id: &str, fallback_provider_id: &str) -> String {
    match parse_model_id(model_id) {
        Some(_) => model_id.to_string(),
        None => format_model_id(fallback_provider_id, model_id),
    }
}

/// Resolves model ids through a shared [`ProviderRegistry`].
#[derive(Clone)]
pub struct ModelResolver {
    registry: Arc<ProviderRegistry>,
}

impl ModelResolver {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Resolve a language model and wrap it with `middlewares`.
    pub fn resolve_language_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
        provider_options: &HashMap<String, Value>,
        middlewares: &[Arc<dyn LanguageModelMiddleware>],
    ) -> Result<Arc<dyn LanguageModel>, ModelResolutionError> {
        let provider_id = effective_provider_id(fallback_provider_id, provider_options);
        let full_id = qualify_model_id(model_id, &provider_id);
        log::debug!("resolving language model '{full_id}'");
        let model = self.registry.language_model(&full_id)?;
        Ok(wrap_language_model(model, middlewares))
    }

    pub fn resolve_image_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> Result<Arc<dyn ImageModel>, ImageModelResolutionError> {
        let full_id = qualify_model_id(model_id, fallback_provider_id);
        Ok(self.registry.image_model(&full_id)?)
    }

    pub fn resolve_embedding_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> Result<Arc<dyn EmbeddingModel>, ModelResolutionError> {
        self.registry
            .embedding_model(&qualify_model_id(model_id, fallback_provider_id))
    }

    pub fn resolve_transcription_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> Result<Arc<dyn TranscriptionModel>, ModelResolutionError> {
        self.registry
            .transcription_model(&qualify_model_id(model_id, fallback_provider_id))
    }

    pub fn resolve_speech_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> Result<Arc<dyn SpeechModel>, ModelResolutionError> {
        self.registry
            .speech_model(&qualify_model_id(model_id, fallback_provider_id))
    }
}
