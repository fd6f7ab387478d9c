//! PluginEngine -- drives one call through the plugin lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! created ─configure─→ context-configured ─start hooks─→ started
//!   ─resolve─→ model-resolved ─transform params─→ params-transformed
//!   ─invoke─→ invoked ─transform result─→ result-transformed ─end hooks─→ completed
//!
//! any failure from the start hooks to the result transform ─→ error
//! ```
//!
//! 1. `configure_context` (sequential). A failure here propagates directly.
//! 2. `on_request_start` (parallel).
//! 3. Model resolution, skipped when the context carries a concrete handle.
//!    Plugin `resolve_model` hooks run first; the fallback resolver, if
//!    any, is consulted only when none of them produced a model.
//! 4. `transform_params` (sequential chain).
//! 5. Streaming operations only: stream transforms are collected and
//!    spliced between the provider stream and the caller.
//! 6. Provider invocation.
//! 7. `transform_result` (sequential chain).
//! 8. `on_request_end` (parallel).
//! 9. Failures in steps 2–7 fire `on_error` (parallel) and are returned
//!    unchanged. Failures of the `on_error` hooks themselves are logged.
//!
//! # Recursive continuation
//!
//! The engine attaches a [`ContinuationHandler`] to every context it runs.
//! [`RequestContext::recursive_call`] re-enters the lifecycle on the same
//! context with new parameters. At most `max_recursion_depth` continuations
//! are allowed per logical call.

use std::sync::Arc;

use crate::context::{ContinuationHandler, ContinuationRequest, RequestContext};
use crate::errors::{
    AiCoreError, ImageModelResolutionError, ModelResolutionError, RecursiveCallError,
};
use crate::hooks::PluginManager;
use crate::messages::{ImageResult, ObjectResult};
use crate::models::{LifecycleState, ModelHandle, ModelKind, ModelRef, OperationKind};
use crate::params::{CallParams, CallResult, ImageParams, ObjectParams};
use crate::plugin::{HookFuture, Plugin};
use crate::stream::{apply_transforms, StreamHandle, StreamTransform};
use crate::traits::{ImageModel, LanguageModel};

/// Continuations allowed per logical call unless configured otherwise.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 10;

struct EngineInner {
    manager: PluginManager,
    max_recursion_depth: usize,
    /// Runs after every plugin resolver, outside the ordering buckets.
    fallback_resolver: Option<Arc<dyn Plugin>>,
}

/// Lifecycle driver over a [`PluginManager`]. Cheap to clone.
#[derive(Clone)]
pub struct PluginEngine {
    inner: Arc<EngineInner>,
}

impl PluginEngine {
    pub fn new(manager: PluginManager) -> Self {
        Self::with_max_recursion_depth(manager, DEFAULT_MAX_RECURSION_DEPTH)
    }

    pub fn with_max_recursion_depth(manager: PluginManager, max_recursion_depth: usize) -> Self {
        Self::with_fallback_resolver(manager, max_recursion_depth, None)
    }

    /// An engine whose `fallback_resolver` resolves model ids no plugin
    /// claimed. Its `resolve_model` hook is the only one called on it.
    pub fn with_fallback_resolver(
        manager: PluginManager,
        max_recursion_depth: usize,
        fallback_resolver: Option<Arc<dyn Plugin>>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                manager,
                max_recursion_depth,
                fallback_resolver,
            }),
        }
    }

    pub fn manager(&self) -> &PluginManager {
        &self.inner.manager
    }

    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.inner.manager.use_plugin(plugin);
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.inner.max_recursion_depth
    }

    pub fn fallback_resolver(&self) -> Option<&Arc<dyn Plugin>> {
        self.inner.fallback_resolver.as_ref()
    }

    /// Run `op` on `ctx` with `params` through every lifecycle step.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        op: OperationKind,
        params: CallParams,
    ) -> Result<CallResult, AiCoreError> {
        ctx.set_operation(op);
        if !ctx.has_continuation_handler() {
            ctx.attach_continuation_handler(Arc::new(Reentry {
                engine: self.clone(),
                op,
            }));
        }
        let manager = &self.inner.manager;

        manager.configure_context(ctx).await?;
        transition(ctx, LifecycleState::ContextConfigured);

        let result = match self.run_steps(ctx, op, params).await {
            Ok(result) => result,
            Err(err) => {
                transition(ctx, LifecycleState::Error);
                log::debug!("[{}] {} failed: {err}", ctx.request_id(), op.as_str());
                if let Err(hook_err) = manager.on_error(&err, ctx).await {
                    log::error!(
                        "[{}] on_error hook failed while handling '{err}': {hook_err}",
                        ctx.request_id()
                    );
                }
                return Err(err);
            }
        };

        manager.on_request_end(&result, ctx).await?;
        transition(ctx, LifecycleState::Completed);
        Ok(result)
    }

    /// Steps 2–7.
    async fn run_steps(
        &self,
        ctx: &RequestContext,
        op: OperationKind,
        params: CallParams,
    ) -> Result<CallResult, AiCoreError> {
        let manager = &self.inner.manager;

        transition(ctx, LifecycleState::Started);
        manager.on_request_start(ctx).await?;

        let model = self.resolve_model(ctx, op).await?;
        transition(ctx, LifecycleState::ModelResolved);

        let params = manager.transform_params(params, ctx).await?;
        transition(ctx, LifecycleState::ParamsTransformed);

        let transforms = if op.is_streaming() {
            manager.collect_stream_transforms(&params, ctx)
        } else {
            Vec::new()
        };
        let result = invoke(op, model, params, transforms).await?;
        transition(ctx, LifecycleState::Invoked);

        let result = manager.transform_result(result, ctx).await?;
        transition(ctx, LifecycleState::ResultTransformed);
        Ok(result)
    }

    async fn resolve_model(
        &self,
        ctx: &RequestContext,
        op: OperationKind,
    ) -> Result<ModelHandle, AiCoreError> {
        let kind = op.model_kind();
        let handle = match ctx.model() {
            ModelRef::Handle(handle) => handle.clone(),
            ModelRef::Id(id) => match self.resolve_model_id(id, kind, ctx).await? {
                Some(handle) => handle,
                None => {
                    let err = ModelResolutionError::unresolved(id, kind);
                    return Err(match op {
                        OperationKind::GenerateImage => ImageModelResolutionError::from(err).into(),
                        _ => err.into(),
                    });
                }
            },
        };

        if handle.kind() != kind {
            return Err(ModelResolutionError {
                model_id: handle.model_id().to_string(),
                provider_id: Some(handle.provider().to_string()),
                kind,
                reason: format!("{} needs a {kind} model, got a {} model", op.as_str(), handle.kind()),
            }
            .into());
        }
        Ok(handle)
    }

    async fn resolve_model_id(
        &self,
        id: &str,
        kind: ModelKind,
        ctx: &RequestContext,
    ) -> Result<Option<ModelHandle>, AiCoreError> {
        if let Some(handle) = self.inner.manager.resolve_model(id, kind, ctx).await? {
            return Ok(Some(handle));
        }
        match &self.inner.fallback_resolver {
            Some(fallback) => {
                log::debug!("[{}] no plugin resolved '{id}', using {}", ctx.request_id(), fallback.name());
                fallback.resolve_model(id, kind, ctx).await
            }
            None => Ok(None),
        }
    }
}

fn transition(ctx: &RequestContext, state: LifecycleState) {
    log::debug!("[{}] {:?} -> {:?}", ctx.request_id(), ctx.state(), state);
    ctx.set_state(state);
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

async fn invoke(
    op: OperationKind,
    model: ModelHandle,
    params: CallParams,
    transforms: Vec<StreamTransform>,
) -> Result<CallResult, AiCoreError> {
    match (op, model, params) {
        (OperationKind::GenerateText, ModelHandle::Language(m), CallParams::Text(p)) => {
            Ok(CallResult::Text(m.generate(p.to_request()).await?))
        }
        (OperationKind::StreamText, ModelHandle::Language(m), CallParams::Text(p)) => {
            let stream = m.stream(p.to_request()).await?;
            Ok(CallResult::Stream(StreamHandle::new(apply_transforms(stream, transforms))))
        }
        (OperationKind::GenerateObject, ModelHandle::Language(m), CallParams::Object(p)) => {
            generate_object(m.as_ref(), &p).await.map(CallResult::Object)
        }
        (OperationKind::StreamObject, ModelHandle::Language(m), CallParams::Object(p)) => {
            let stream = m.stream(p.to_request()).await?;
            Ok(CallResult::Stream(StreamHandle::new(apply_transforms(stream, transforms))))
        }
        (OperationKind::GenerateImage, ModelHandle::Image(m), CallParams::Image(p)) => {
            generate_images(m.as_ref(), &p).await.map(CallResult::Image)
        }
        (op, _, params) => Err(AiCoreError::InvalidParams {
            operation: op.as_str().to_string(),
            found: params.kind().to_string(),
        }),
    }
}

async fn generate_object(
    model: &dyn LanguageModel,
    params: &ObjectParams,
) -> Result<ObjectResult, AiCoreError> {
    let result = model.generate(params.to_request()).await?;
    let object = serde_json::from_str(json_body(&result.text)).map_err(|err| {
        AiCoreError::ObjectGeneration {
            message: err.to_string(),
            text: result.text.clone(),
        }
    })?;
    Ok(ObjectResult {
        object,
        text: result.text,
        finish_reason: result.finish_reason,
        usage: result.usage,
        response: result.response,
    })
}

/// Text with surrounding whitespace and a Markdown code fence removed.
fn json_body(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Generate `params.n` images, split into batches the model accepts.
async fn generate_images(
    model: &dyn ImageModel,
    params: &ImageParams,
) -> Result<ImageResult, AiCoreError> {
    if params.n == 0 {
        return Err(AiCoreError::InvalidParams {
            operation: OperationKind::GenerateImage.as_str().to_string(),
            found: "n = 0".to_string(),
        });
    }
    let per_call = model.max_images_per_call().max(1);
    let mut remaining = params.n;
    let mut merged = ImageResult::default();

    while remaining > 0 {
        let mut request = params.to_request();
        request.n = remaining.min(per_call);
        remaining -= request.n;

        let batch = model.generate(request).await?;
        merged.images.extend(batch.images);
        merged.warnings.extend(batch.warnings);
        merged.response = batch.response;
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Re-entry
// ---------------------------------------------------------------------------

/// Continuation handler attached to every context the engine runs.
struct Reentry {
    engine: PluginEngine,
    op: OperationKind,
}

impl ContinuationHandler for Reentry {
    fn continue_call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: ContinuationRequest,
    ) -> HookFuture<'a, CallResult> {
        Box::pin(async move {
            let limit = self.engine.max_recursion_depth();
            if request.depth > limit {
                log::warn!(
                    "[{}] continuation {} exceeds the limit of {limit}",
                    ctx.request_id(),
                    request.depth
                );
                return Err(RecursiveCallError::DepthExceeded { limit }.into());
            }
            log::debug!("[{}] continuation {} of {limit}", ctx.request_id(), request.depth);

            let was_recursive = ctx.set_recursive_call(true);
            let previous = ctx.replace_original_params(request.params.clone());
            let outcome = self.engine.run(ctx, self.op, request.params).await;
            ctx.replace_original_params(previous);
            ctx.set_recursive_call(was_recursive);
            outcome
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{PluginError, ProviderError};
    use crate::messages::{FinishReason, TextResult, Usage};
    use crate::params::TextParams;
    use crate::plugin::{HookKind, PluginBuilder, PluginOrdering};
    use crate::stream::{collect_chunks, text_of, ChunkStream, StreamChunk};
    use crate::testing::{
        hook_log, log_entries, text_script, FakeImageModel, FakeLanguageModel, RecordingPlugin,
    };
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    fn language(model: &Arc<FakeLanguageModel>) -> ModelRef {
        ModelRef::from(model.clone() as Arc<dyn LanguageModel>)
    }

    fn text_ctx(model: ModelRef, prompt: &str) -> (RequestContext, CallParams) {
        let params: CallParams = TextParams::from_prompt(prompt).into();
        (RequestContext::new("openai", model, params.clone()), params)
    }

    fn unwrap_text(result: CallResult) -> TextResult {
        match result {
            CallResult::Text(r) => r,
            other => panic!("expected text result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_lifecycle_order() {
        let log = hook_log();
        let engine = PluginEngine::new(PluginManager::with_plugins([
            Arc::new(RecordingPlugin::new("rec", log.clone())) as Arc<dyn Plugin>,
        ]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o").with_texts(["hello"]));
        let (ctx, params) = text_ctx(language(&model), "hi");

        let result = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();
        assert_eq!(unwrap_text(result).text, "hello");
        assert_eq!(
            log_entries(&log),
            vec![
                "rec:configure_context",
                "rec:on_request_start",
                "rec:transform_params",
                "rec:transform_result",
                "rec:on_request_end",
            ]
        );
        assert_eq!(ctx.state(), LifecycleState::Completed);
    }

    #[tokio::test]
    async fn start_hook_error_skips_provider_and_reaches_on_error() {
        let log = hook_log();
        let engine = PluginEngine::new(PluginManager::with_plugins([
            Arc::new(RecordingPlugin::new("audit", log.clone()).failing_on(HookKind::OnRequestStart))
                as Arc<dyn Plugin>,
            Arc::new(RecordingPlugin::new("observer", log.clone())),
        ]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o"));
        let (ctx, params) = text_ctx(language(&model), "hi");

        let err = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap_err();
        assert_eq!(err.to_string(), "plugin 'audit' failed: on_request_start failed");
        assert_eq!(model.call_count(), 0);
        assert_eq!(ctx.state(), LifecycleState::Error);
        let entries = log_entries(&log);
        assert!(entries.contains(&"audit:on_error".to_string()));
        assert!(entries.contains(&"observer:on_error".to_string()));
        assert!(!entries.iter().any(|e| e.ends_with("transform_params")));
    }

    #[tokio::test]
    async fn failing_on_error_hook_does_not_replace_error() {
        let engine = PluginEngine::new(PluginManager::with_plugins([
            Arc::new(RecordingPlugin::new("noisy", hook_log()).failing_on(HookKind::OnError))
                as Arc<dyn Plugin>,
        ]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o").failing(ProviderError::Timeout {
            message: "slow".into(),
            provider: Some("openai".into()),
        }));
        let (ctx, params) = text_ctx(language(&model), "hi");
        let err = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::Provider(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn configure_failure_propagates_without_on_error() {
        let log = hook_log();
        let engine = PluginEngine::new(PluginManager::with_plugins([
            Arc::new(RecordingPlugin::new("cfg", log.clone()).failing_on(HookKind::ConfigureContext))
                as Arc<dyn Plugin>,
        ]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o"));
        let (ctx, params) = text_ctx(language(&model), "hi");
        assert!(engine.run(&ctx, OperationKind::GenerateText, params).await.is_err());
        assert_eq!(log_entries(&log), vec!["cfg:configure_context"]);
    }

    #[tokio::test]
    async fn model_ids_resolve_through_first_wins_hook() {
        let model = Arc::new(FakeLanguageModel::new("custom", "m").with_texts(["from custom"]));
        let resolved = model.clone();
        let engine = PluginEngine::new(PluginManager::with_plugins([Arc::new(
            PluginBuilder::new("resolver")
                .resolve_model(move |id, kind, _| {
                    (id == "custom|m" && kind == ModelKind::Language)
                        .then(|| ModelHandle::Language(resolved.clone()))
                })
                .build(),
        ) as Arc<dyn Plugin>]));
        let (ctx, params) = text_ctx(ModelRef::from("custom|m"), "hi");
        let result = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();
        assert_eq!(unwrap_text(result).text, "from custom");
    }

    #[tokio::test]
    async fn unresolved_ids_fail_with_kind_specific_errors() {
        let engine = PluginEngine::new(PluginManager::new());
        let (ctx, params) = text_ctx(ModelRef::from("nobody|m"), "hi");
        let err = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::ModelResolution(_)));

        let params: CallParams = ImageParams::new("a cat").into();
        let ctx = RequestContext::new("openai", ModelRef::from("dall-e"), params.clone());
        let err = engine.run(&ctx, OperationKind::GenerateImage, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::ImageModelResolution(_)));
        assert!(err.is_model_resolution());
    }

    #[tokio::test]
    async fn wrong_handle_kind_is_a_resolution_error() {
        let engine = PluginEngine::new(PluginManager::new());
        let image: Arc<dyn ImageModel> = Arc::new(FakeImageModel::new("openai", "dall-e"));
        let (ctx, params) = text_ctx(ModelRef::from(image), "hi");
        let err = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::ModelResolution(_)));
    }

    #[tokio::test]
    async fn params_of_the_wrong_family_are_rejected() {
        let engine = PluginEngine::new(PluginManager::new());
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o"));
        let (ctx, params) = text_ctx(language(&model), "hi");
        let err = engine.run(&ctx, OperationKind::GenerateObject, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn object_generation_parses_json_and_sends_schema() {
        let engine = PluginEngine::new(PluginManager::new());
        let model = Arc::new(
            FakeLanguageModel::new("openai", "gpt-4o")
                .with_texts(["```json\n{\"name\": \"Ada\"}\n```", "not json"]),
        );
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let params: CallParams =
            ObjectParams::new(TextParams::from_prompt("who?"), schema.clone()).into();
        let ctx = RequestContext::new("openai", language(&model), params.clone());

        match engine.run(&ctx, OperationKind::GenerateObject, params.clone()).await.unwrap() {
            CallResult::Object(r) => assert_eq!(r.object, json!({"name": "Ada"})),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            model.requests()[0].response_format,
            Some(crate::messages::ResponseFormat::Json { schema: Some(ref s), .. }) if *s == schema
        ));

        let err = engine.run(&ctx, OperationKind::GenerateObject, params).await.unwrap_err();
        match err {
            AiCoreError::ObjectGeneration { text, .. } => assert_eq!(text, "not json"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn images_are_generated_in_batches() {
        let engine = PluginEngine::new(PluginManager::new());
        let model = Arc::new(FakeImageModel::new("openai", "dall-e").with_max_images_per_call(2));
        let mut image = ImageParams::new("a cat");
        image.n = 5;
        let params: CallParams = image.into();
        let ctx = RequestContext::new(
            "openai",
            ModelRef::from(model.clone() as Arc<dyn ImageModel>),
            params.clone(),
        );
        match engine.run(&ctx, OperationKind::GenerateImage, params).await.unwrap() {
            CallResult::Image(r) => assert_eq!(r.images.len(), 5),
            other => panic!("unexpected {other:?}"),
        }
        let sizes: Vec<u32> = model.requests().iter().map(|r| r.n).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn zero_images_are_rejected_before_the_provider() {
        let engine = PluginEngine::new(PluginManager::new());
        let model = Arc::new(FakeImageModel::new("openai", "dall-e"));
        let mut image = ImageParams::new("a cat");
        image.n = 0;
        let params: CallParams = image.into();
        let ctx = RequestContext::new(
            "openai",
            ModelRef::from(model.clone() as Arc<dyn ImageModel>),
            params.clone(),
        );
        let err = engine.run(&ctx, OperationKind::GenerateImage, params).await.unwrap_err();
        assert!(matches!(
            err,
            AiCoreError::InvalidParams { ref operation, .. } if operation == "generate_image"
        ));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn fallback_resolver_runs_after_every_plugin_resolver() {
        let late: Arc<dyn LanguageModel> =
            Arc::new(FakeLanguageModel::new("other", "special").with_texts(["late"]));
        let fallback_model: Arc<dyn LanguageModel> =
            Arc::new(FakeLanguageModel::new("openai", "gpt-4o").with_texts(["fallback"]));
        let fallback_calls = Arc::new(Mutex::new(Vec::new()));

        let late_resolver = PluginBuilder::new("late-resolver")
            .ordering(PluginOrdering::Post)
            .resolve_model(move |id, _, _| {
                (id == "other|special").then(|| ModelHandle::Language(late.clone()))
            })
            .build();
        let seen = fallback_calls.clone();
        let fallback = PluginBuilder::new("fallback")
            .resolve_model(move |id, _, _| {
                seen.lock().unwrap().push(id.to_string());
                (id == "gpt-4o").then(|| ModelHandle::Language(fallback_model.clone()))
            })
            .build();
        let engine = PluginEngine::with_fallback_resolver(
            PluginManager::with_plugins([Arc::new(late_resolver) as Arc<dyn Plugin>]),
            DEFAULT_MAX_RECURSION_DEPTH,
            Some(Arc::new(fallback)),
        );

        let (ctx, params) = text_ctx(ModelRef::from("other|special"), "hi");
        let result = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();
        assert_eq!(unwrap_text(result).text, "late");
        assert!(fallback_calls.lock().unwrap().is_empty());

        let (ctx, params) = text_ctx(ModelRef::from("gpt-4o"), "hi");
        let result = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();
        assert_eq!(unwrap_text(result).text, "fallback");

        let (ctx, params) = text_ctx(ModelRef::from("nowhere"), "hi");
        let err = engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap_err();
        assert!(matches!(err, AiCoreError::ModelResolution(_)));
        assert_eq!(*fallback_calls.lock().unwrap(), ["gpt-4o", "nowhere"]);
    }

    #[tokio::test]
    async fn stream_transforms_are_spliced_for_streaming_ops_only() {
        let upper = PluginBuilder::new("upper")
            .stream_transform(|_, _| {
                Some(Box::new(|input: ChunkStream| -> ChunkStream {
                    Box::pin(input.map(|chunk| match chunk {
                        StreamChunk::TextDelta { id, text } => StreamChunk::TextDelta {
                            id,
                            text: text.to_uppercase(),
                        },
                        other => other,
                    }))
                }))
            })
            .build();
        let engine = PluginEngine::new(PluginManager::with_plugins([
            Arc::new(upper) as Arc<dyn Plugin>,
        ]));
        let model = Arc::new(
            FakeLanguageModel::new("openai", "gpt-4o")
                .with_stream_scripts([text_script(&["he", "llo"], Usage::new(1, 2))]),
        );
        let (ctx, params) = text_ctx(language(&model), "hi");
        let handle = match engine.run(&ctx, OperationKind::StreamText, params).await.unwrap() {
            CallResult::Stream(handle) => handle,
            other => panic!("unexpected {other:?}"),
        };
        let chunks = collect_chunks(handle.into_stream()).await;
        assert_eq!(text_of(&chunks), "HELLO");
        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Finish { finish_reason: FinishReason::Stop, .. })
        ));
    }

    #[tokio::test]
    async fn recursive_call_reenters_on_same_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = seen.clone();
        let engine = PluginEngine::new(PluginManager::with_plugins([Arc::new(
            PluginBuilder::new("observer")
                .ordering(PluginOrdering::Pre)
                .on_request_start(move |ctx| {
                    let observed = observed.clone();
                    async move {
                        let prompt = ctx.original_params().text().unwrap().messages[0].text();
                        observed.lock().unwrap().push((
                            ctx.request_id().to_string(),
                            ctx.is_recursive_call(),
                            prompt,
                        ));
                        Ok(())
                    }
                })
                .build(),
        ) as Arc<dyn Plugin>]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o").with_texts(["first", "second"]));
        let (ctx, params) = text_ctx(language(&model), "outer");

        engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();
        let nested = ctx
            .recursive_call(TextParams::from_prompt("inner").into())
            .await
            .unwrap();
        assert_eq!(unwrap_text(nested).text, "second");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, seen[1].0);
        assert_eq!((seen[0].1, seen[0].2.as_str()), (false, "outer"));
        assert_eq!((seen[1].1, seen[1].2.as_str()), (true, "inner"));
        assert!(!ctx.is_recursive_call());
        assert_eq!(ctx.original_params().text().unwrap().messages[0].text(), "outer");
    }

    #[tokio::test]
    async fn continuations_beyond_limit_fail() {
        let engine = PluginEngine::with_max_recursion_depth(PluginManager::new(), 2);
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o"));
        let (ctx, params) = text_ctx(language(&model), "hi");
        engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();

        for _ in 0..2 {
            ctx.recursive_call(TextParams::from_prompt("again").into())
                .await
                .unwrap();
        }
        let err = ctx
            .recursive_call(TextParams::from_prompt("again").into())
            .await
            .unwrap_err();
        assert!(matches!(err, RecursiveCallError::DepthExceeded { limit: 2 }));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn nested_failures_become_failed_recursive_errors() {
        let engine = PluginEngine::new(PluginManager::with_plugins([Arc::new(
            PluginBuilder::new("reject-nested")
                .on_request_start(|ctx| async move {
                    if ctx.is_recursive_call() {
                        return Err(PluginError::new("reject-nested", "no continuations").into());
                    }
                    Ok(())
                })
                .build(),
        ) as Arc<dyn Plugin>]));
        let model = Arc::new(FakeLanguageModel::new("openai", "gpt-4o"));
        let (ctx, params) = text_ctx(language(&model), "hi");
        engine.run(&ctx, OperationKind::GenerateText, params).await.unwrap();

        let err = ctx.recursive_call(TextParams::default().into()).await.unwrap_err();
        match err {
            RecursiveCallError::Failed { message } => assert!(message.contains("no continuations")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_body_strips_fences() {
        assert_eq!(json_body("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(json_body("```json\n[1]\n```"), "[1]");
        assert_eq!(json_body("```\n[2]\n```"), "[2]");
    }
}
