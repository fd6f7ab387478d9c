//! Test fakes for providers, models, tools and plugins.
//!
//! Concrete, predictable implementations of the crate's traits. Every fake
//! is constructed with its scripted outputs and records what it was asked to
//! do, so tests can assert both results and interactions.
//!
//! # Design Decisions
//!
//! - **Concrete fakes, not mock frameworks**: the fakes are plain code that
//!   can be read and changed directly.
//! - **`Mutex` interior mutability**: fakes are shared as `Arc<dyn Trait>`
//!   and must be `Send + Sync`.
//! - **Scripted responses**: outputs are consumed in order; an exhausted
//!   script falls back to a fixed default.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream;
use serde_json::{json, Value};

use crate::context::RequestContext;
use crate::errors::{AiCoreError, PluginError, ProviderError, ToolError};
use crate::messages::{
    FinishReason, GeneratedImage, ImageRequest, ImageResult, LanguageModelRequest, TextResult,
    Usage,
};
use crate::params::{CallParams, CallResult};
use crate::plugin::{HookFuture, HookKind, Plugin, PluginOrdering};
use crate::stream::{ChunkStream, StreamChunk};
use crate::traits::{ImageModel, LanguageModel, Provider, ProviderFuture, Tool, ToolCallOptions};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Stream scripts
// ---------------------------------------------------------------------------

/// Chunks of one streamed step emitting `parts` as text deltas.
///
/// `start-step`, `text-start`, the deltas, `text-end`, `finish-step` and
/// `finish`, all with finish reason `stop` and `usage`.
pub fn text_script(parts: &[&str], usage: Usage) -> Vec<StreamChunk> {
    let id = "text-0";
    let mut chunks = vec![
        StreamChunk::start_step(),
        StreamChunk::TextStart { id: id.into() },
    ];
    chunks.extend(parts.iter().map(|part| StreamChunk::text_delta(id, *part)));
    chunks.push(StreamChunk::TextEnd { id: id.into() });
    chunks.push(StreamChunk::finish_step(FinishReason::Stop, usage.clone()));
    chunks.push(StreamChunk::finish(FinishReason::Stop, usage));
    chunks
}

// ---------------------------------------------------------------------------
// FakeLanguageModel
// ---------------------------------------------------------------------------

/// A language model with scripted texts and stream scripts.
///
/// # Usage
///
/// ```rust
/// use ai_core::testing::FakeLanguageModel;
/// use ai_core::traits::LanguageModel;
///
/// let model = FakeLanguageModel::new("fake", "small").with_texts(["hello"]);
/// assert_eq!(model.provider(), "fake");
/// assert_eq!(model.call_count(), 0);
/// ```
pub struct FakeLanguageModel {
    provider: String,
    model_id: String,
    /// Consumed by `generate`, then by streams without a script.
    texts: Mutex<VecDeque<String>>,
    scripts: Mutex<VecDeque<Vec<StreamChunk>>>,
    failure: Option<ProviderError>,
    requests: Mutex<Vec<LanguageModelRequest>>,
}

impl FakeLanguageModel {
    /// A model answering `"ok"` to everything.
    pub fn new(provider: &str, model_id: &str) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            texts: Mutex::new(VecDeque::new()),
            scripts: Mutex::new(VecDeque::new()),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_texts<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.texts).extend(texts.into_iter().map(Into::into));
        self
    }

    /// Streams returned by successive `stream` calls.
    pub fn with_stream_scripts<I>(self, scripts: I) -> Self
    where
        I: IntoIterator<Item = Vec<StreamChunk>>,
    {
        lock(&self.scripts).extend(scripts);
        self
    }

    /// Fail every call with `error`.
    pub fn failing(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<LanguageModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_text(&self) -> String {
        lock(&self.texts).pop_front().unwrap_or_else(|| "ok".to_string())
    }
}

impl LanguageModel for FakeLanguageModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, request: LanguageModelRequest) -> ProviderFuture<'_, TextResult> {
        lock(&self.requests).push(request);
        let outcome = match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(TextResult::from_text(self.next_text())),
        };
        Box::pin(async move { outcome })
    }

    fn stream(&self, request: LanguageModelRequest) -> ProviderFuture<'_, ChunkStream> {
        lock(&self.requests).push(request);
        let outcome = match &self.failure {
            Some(err) => Err(err.clone()),
            None => {
                let script = lock(&self.scripts)
                    .pop_front()
                    .unwrap_or_else(|| text_script(&[&self.next_text()], Usage::default()));
                Ok(Box::pin(stream::iter(script)) as ChunkStream)
            }
        };
        Box::pin(async move { outcome })
    }
}

// ---------------------------------------------------------------------------
// FakeImageModel
// ---------------------------------------------------------------------------

/// An image model returning `n` placeholder PNGs per request.
pub struct FakeImageModel {
    provider: String,
    model_id: String,
    max_images_per_call: u32,
    requests: Mutex<Vec<ImageRequest>>,
}

impl FakeImageModel {
    pub fn new(provider: &str, model_id: &str) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            max_images_per_call: 1,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_images_per_call(mut self, max: u32) -> Self {
        self.max_images_per_call = max;
        self
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        lock(&self.requests).clone()
    }
}

impl ImageModel for FakeImageModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_images_per_call(&self) -> u32 {
        self.max_images_per_call
    }

    fn generate(&self, request: ImageRequest) -> ProviderFuture<'_, ImageResult> {
        let images = (0..request.n)
            .map(|_| GeneratedImage {
                base64: "iVBORw0KGgo=".into(),
                media_type: "image/png".into(),
            })
            .collect();
        lock(&self.requests).push(request);
        Box::pin(async move {
            Ok(ImageResult {
                images,
                ..Default::default()
            })
        })
    }
}

// ---------------------------------------------------------------------------
// FakeProvider
// ---------------------------------------------------------------------------

/// A provider serving registered models, or fresh fakes for any other id.
pub struct FakeProvider {
    id: String,
    language_models: Mutex<HashMap<String, Arc<dyn LanguageModel>>>,
    image_models: Mutex<HashMap<String, Arc<dyn ImageModel>>>,
}

impl FakeProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            language_models: Mutex::new(HashMap::new()),
            image_models: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `model` for its own model id.
    pub fn with_language_model(self, model: Arc<dyn LanguageModel>) -> Self {
        lock(&self.language_models).insert(model.model_id().to_string(), model);
        self
    }

    pub fn with_image_model(self, model: Arc<dyn ImageModel>) -> Self {
        lock(&self.image_models).insert(model.model_id().to_string(), model);
        self
    }
}

impl Provider for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn language_model(&self, model_id: &str) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        Ok(lock(&self.language_models)
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| Arc::new(FakeLanguageModel::new(&self.id, model_id))))
    }

    fn image_model(&self, model_id: &str) -> Result<Arc<dyn ImageModel>, ProviderError> {
        Ok(lock(&self.image_models)
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| Arc::new(FakeImageModel::new(&self.id, model_id))))
    }
}

// ---------------------------------------------------------------------------
// FakeTool
// ---------------------------------------------------------------------------

/// A tool that echoes its input unless given scripted outputs.
///
/// # Usage
///
/// ```rust
/// use ai_core::testing::FakeTool;
/// use ai_core::traits::Tool;
///
/// let tool = FakeTool::new("echo", "echoes input");
/// assert_eq!(tool.name(), "echo");
/// ```
pub struct FakeTool {
    tool_name: String,
    tool_description: String,
    outputs: Mutex<VecDeque<Value>>,
    failure: Option<ToolError>,
    /// Every input passed to `execute`.
    calls: Mutex<Vec<Value>>,
}

impl FakeTool {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            tool_name: name.into(),
            tool_description: description.into(),
            outputs: Mutex::new(VecDeque::new()),
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Outputs returned by successive calls before falling back to echoing.
    pub fn with_outputs(self, outputs: impl IntoIterator<Item = Value>) -> Self {
        lock(&self.outputs).extend(outputs);
        self
    }

    /// Fail every call with `error`.
    pub fn failing(mut self, error: ToolError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        lock(&self.calls).clone()
    }
}

impl Tool for FakeTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.tool_description
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn execute(
        &self,
        input: Value,
        _options: ToolCallOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        lock(&self.calls).push(input.clone());
        let outcome = match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(lock(&self.outputs).pop_front().unwrap_or(input)),
        };
        Box::pin(async move { outcome })
    }
}

// ---------------------------------------------------------------------------
// RecordingPlugin
// ---------------------------------------------------------------------------

/// Shared log written by [`RecordingPlugin`]s.
pub type HookLog = Arc<Mutex<Vec<String>>>;

pub fn hook_log() -> HookLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of `log`; entries read `"{plugin}:{hook}"`.
pub fn log_entries(log: &HookLog) -> Vec<String> {
    lock(log).clone()
}

/// A plugin that records every lifecycle hook it runs and can fail one.
///
/// Declares every hook except `resolve_model` and `stream_transform`, and
/// passes values through unchanged.
pub struct RecordingPlugin {
    name: String,
    ordering: PluginOrdering,
    log: HookLog,
    fail_on: Option<HookKind>,
}

impl RecordingPlugin {
    pub fn new(name: &str, log: HookLog) -> Self {
        Self {
            name: name.into(),
            ordering: PluginOrdering::Normal,
            log,
            fail_on: None,
        }
    }

    pub fn with_ordering(mut self, ordering: PluginOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Record, then fail with a [`PluginError`] whenever `hook` runs.
    pub fn failing_on(mut self, hook: HookKind) -> Self {
        self.fail_on = Some(hook);
        self
    }

    fn record(&self, hook: HookKind) -> Result<(), AiCoreError> {
        lock(&self.log).push(format!("{}:{}", self.name, hook.as_str()));
        if self.fail_on == Some(hook) {
            return Err(PluginError::new(&self.name, format!("{} failed", hook.as_str())).into());
        }
        Ok(())
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordering(&self) -> PluginOrdering {
        self.ordering
    }

    fn implements(&self, hook: HookKind) -> bool {
        !matches!(hook, HookKind::ResolveModel | HookKind::StreamTransform)
    }

    fn configure_context<'a>(&'a self, _ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        let outcome = self.record(HookKind::ConfigureContext);
        Box::pin(async move { outcome })
    }

    fn transform_params<'a>(
        &'a self,
        params: CallParams,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallParams> {
        let outcome = self.record(HookKind::TransformParams).map(|()| params);
        Box::pin(async move { outcome })
    }

    fn transform_result<'a>(
        &'a self,
        result: CallResult,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallResult> {
        let outcome = self.record(HookKind::TransformResult).map(|()| result);
        Box::pin(async move { outcome })
    }

    fn on_request_start<'a>(&'a self, _ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        let outcome = self.record(HookKind::OnRequestStart);
        Box::pin(async move { outcome })
    }

    fn on_request_end<'a>(
        &'a self,
        _result: &'a CallResult,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        let outcome = self.record(HookKind::OnRequestEnd);
        Box::pin(async move { outcome })
    }

    fn on_error<'a>(
        &'a self,
        _error: &'a AiCoreError,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        let outcome = self.record(HookKind::OnError);
        Box::pin(async move { outcome })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
