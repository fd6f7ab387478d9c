//! Language-model middleware.
//!
//! A middleware wraps a resolved [`LanguageModel`] in another
//! `LanguageModel`. [`wrap_language_model`] applies a list in order, so the
//! last middleware ends up outermost.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{LanguageModelRequest, TextResult};
use crate::stream::ChunkStream;
use crate::traits::{LanguageModel, ProviderFuture};

/// Wraps a language model.
pub trait LanguageModelMiddleware: Send + Sync {
    fn name(&self) -> &str;

    fn wrap(&self, model: Arc<dyn LanguageModel>) -> Arc<dyn LanguageModel>;
}

/// Apply `middlewares` to `model` in list order.
pub fn wrap_language_model(
    model: Arc<dyn LanguageModel>,
    middlewares: &[Arc<dyn LanguageModelMiddleware>],
) -> Arc<dyn LanguageModel> {
    middlewares.iter().fold(model, |model, middleware| {
        log::debug!(
            "wrapping {}|{} with middleware '{}'",
            model.provider(),
            model.model_id(),
            middleware.name()
        );
        middleware.wrap(model)
    })
}

// ---------------------------------------------------------------------------
// DefaultSettingsMiddleware
// ---------------------------------------------------------------------------

/// Settings filled into requests that leave them unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultSettings {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Merged key by key; request values win.
    #[serde(default)]
    pub provider_options: HashMap<String, Value>,
}

impl DefaultSettings {
    fn apply(&self, request: &mut LanguageModelRequest) {
        request.temperature = request.temperature.or(self.temperature);
        request.top_p = request.top_p.or(self.top_p);
        request.max_output_tokens = request.max_output_tokens.or(self.max_output_tokens);
        for (key, value) in &self.provider_options {
            request
                .provider_options
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Fills unset sampling settings and provider options on every request.
#[derive(Debug, Clone, Default)]
pub struct DefaultSettingsMiddleware {
    settings: DefaultSettings,
}

impl DefaultSettingsMiddleware {
    pub fn new(settings: DefaultSettings) -> Self {
        Self { settings }
    }
}

impl LanguageModelMiddleware for DefaultSettingsMiddleware {
    fn name(&self) -> &str {
        "default-settings"
    }

    fn wrap(&self, model: Arc<dyn LanguageModel>) -> Arc<dyn LanguageModel> {
        Arc::new(DefaultSettingsModel {
            inner: model,
            settings: self.settings.clone(),
        })
    }
}

struct DefaultSettingsModel {
    inner: Arc<dyn LanguageModel>,
    settings: DefaultSettings,
}

impl LanguageModel for DefaultSettingsModel {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn generate(&self, mut request: LanguageModelRequest) -> ProviderFuture<'_, TextResult> {
        self.settings.apply(&mut request);
        self.inner.generate(request)
    }

    fn stream(&self, mut request: LanguageModelRequest) -> ProviderFuture<'_, ChunkStream> {
        self.settings.apply(&mut request);
        self.inner.stream(request)
    }
}
