//! RuntimeExecutor -- the public entry point for text, object and image
//! operations.
//!
//! The executor owns a [`PluginEngine`] preloaded with the built-in plugins:
//!
//! - `prompt-tool-use`, when the config has a `prompt_tool_use` section.
//! - `logging`, when `logging = true`.
//!
//! [`ModelResolverPlugin`] is not one of them. It is the engine's fallback
//! resolver and only sees model ids that no plugin resolved, whatever their
//! ordering.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ai_core::config::ExecutorConfig;
//! use ai_core::executor::RuntimeExecutor;
//! use ai_core::params::TextParams;
//! use ai_core::registry::ProviderRegistry;
//! use ai_core::testing::{FakeLanguageModel, FakeProvider};
//!
//! # tokio_test_block_on(async {
//! let registry = Arc::new(ProviderRegistry::new());
//! let model = Arc::new(FakeLanguageModel::new("fake", "small").with_texts(["hello"]));
//! registry.register_provider("fake", Arc::new(FakeProvider::new("fake").with_language_model(model)), &[]);
//!
//! let executor = RuntimeExecutor::builder(ExecutorConfig::new("fake"))
//!     .registry(registry)
//!     .build();
//! let result = executor.generate_text("small", TextParams::from_prompt("hi")).await.unwrap();
//! assert_eq!(result.text, "hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ExecutorConfig;
use crate::context::RequestContext;
use crate::engine::PluginEngine;
use crate::errors::AiCoreError;
use crate::hooks::PluginManager;
use crate::messages::{ImageResult, ObjectResult, TextResult};
use crate::middleware::LanguageModelMiddleware;
use crate::models::{ModelHandle, ModelKind, ModelRef, OperationKind};
use crate::params::{CallParams, CallResult, ImageParams, ObjectParams, TextParams};
use crate::plugin::{HookFuture, HookKind, Plugin};
use crate::plugins::{LoggingPlugin, PromptToolUsePlugin};
use crate::registry::ProviderRegistry;
use crate::resolver::ModelResolver;
use crate::stream::ChunkStream;

// ---------------------------------------------------------------------------
// ModelResolverPlugin
// ---------------------------------------------------------------------------

pub const MODEL_RESOLVER_PLUGIN: &str = "model-resolver";

/// Resolves model ids through the registry. Installed as the engine's
/// fallback resolver, so it never runs ahead of a plugin.
pub struct ModelResolverPlugin {
    resolver: ModelResolver,
    provider_options: HashMap<String, Value>,
    middlewares: Vec<Arc<dyn LanguageModelMiddleware>>,
}

impl ModelResolverPlugin {
    pub fn new(
        resolver: ModelResolver,
        provider_options: HashMap<String, Value>,
        middlewares: Vec<Arc<dyn LanguageModelMiddleware>>,
    ) -> Self {
        Self {
            resolver,
            provider_options,
            middlewares,
        }
    }
}

impl Plugin for ModelResolverPlugin {
    fn name(&self) -> &str {
        MODEL_RESOLVER_PLUGIN
    }

    fn implements(&self, hook: HookKind) -> bool {
        hook == HookKind::ResolveModel
    }

    fn resolve_model<'a>(
        &'a self,
        model_id: &'a str,
        kind: ModelKind,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, Option<ModelHandle>> {
        Box::pin(async move {
            let handle = match kind {
                ModelKind::Language => ModelHandle::Language(self.resolver.resolve_language_model(
                    model_id,
                    ctx.provider_id(),
                    &self.provider_options,
                    &self.middlewares,
                )?),
                ModelKind::Image => {
                    ModelHandle::Image(self.resolver.resolve_image_model(model_id, ctx.provider_id())?)
                }
                _ => return Ok(None),
            };
            Ok(Some(handle))
        })
    }
}

// ---------------------------------------------------------------------------
// RuntimeExecutor
// ---------------------------------------------------------------------------

/// Runs operations through the plugin engine.
#[derive(Clone)]
pub struct RuntimeExecutor {
    engine: PluginEngine,
    registry: Arc<ProviderRegistry>,
    config: ExecutorConfig,
}

impl RuntimeExecutor {
    pub fn builder(config: ExecutorConfig) -> RuntimeExecutorBuilder {
        RuntimeExecutorBuilder::new(config)
    }

    pub fn engine(&self) -> &PluginEngine {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.engine.use_plugin(plugin);
    }

    /// A fresh context for one logical call.
    pub fn new_context(&self, model: impl Into<ModelRef>, params: CallParams) -> RequestContext {
        RequestContext::new(self.config.provider_id.clone(), model.into(), params)
    }

    /// Run `op` on a caller-built context.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        op: OperationKind,
        params: CallParams,
    ) -> Result<CallResult, AiCoreError> {
        self.engine.run(ctx, op, params).await
    }

    async fn call(
        &self,
        model: ModelRef,
        op: OperationKind,
        params: CallParams,
    ) -> Result<CallResult, AiCoreError> {
        let ctx = self.new_context(model, params.clone());
        self.engine.run(&ctx, op, params).await
    }

    pub async fn generate_text(
        &self,
        model: impl Into<ModelRef>,
        params: TextParams,
    ) -> Result<TextResult, AiCoreError> {
        let op = OperationKind::GenerateText;
        match self.call(model.into(), op, params.into()).await? {
            CallResult::Text(result) => Ok(result),
            other => Err(unexpected(op, &other)),
        }
    }

    pub async fn stream_text(
        &self,
        model: impl Into<ModelRef>,
        params: TextParams,
    ) -> Result<ChunkStream, AiCoreError> {
        let op = OperationKind::StreamText;
        match self.call(model.into(), op, params.into()).await? {
            CallResult::Stream(handle) => Ok(handle.into_stream()),
            other => Err(unexpected(op, &other)),
        }
    }

    pub async fn generate_object(
        &self,
        model: impl Into<ModelRef>,
        params: ObjectParams,
    ) -> Result<ObjectResult, AiCoreError> {
        let op = OperationKind::GenerateObject;
        match self.call(model.into(), op, params.into()).await? {
            CallResult::Object(result) => Ok(result),
            other => Err(unexpected(op, &other)),
        }
    }

    pub async fn stream_object(
        &self,
        model: impl Into<ModelRef>,
        params: ObjectParams,
    ) -> Result<ChunkStream, AiCoreError> {
        let op = OperationKind::StreamObject;
        match self.call(model.into(), op, params.into()).await? {
            CallResult::Stream(handle) => Ok(handle.into_stream()),
            other => Err(unexpected(op, &other)),
        }
    }

    pub async fn generate_image(
        &self,
        model: impl Into<ModelRef>,
        params: ImageParams,
    ) -> Result<ImageResult, AiCoreError> {
        let op = OperationKind::GenerateImage;
        match self.call(model.into(), op, params.into()).await? {
            CallResult::Image(result) => Ok(result),
            other => Err(unexpected(op, &other)),
        }
    }
}

fn unexpected(op: OperationKind, result: &CallResult) -> AiCoreError {
    AiCoreError::UnexpectedResult {
        operation: op.as_str().to_string(),
        found: result.kind().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`RuntimeExecutor`].
pub struct RuntimeExecutorBuilder {
    config: ExecutorConfig,
    registry: Option<Arc<ProviderRegistry>>,
    plugins: Vec<Arc<dyn Plugin>>,
    middlewares: Vec<Arc<dyn LanguageModelMiddleware>>,
}

impl RuntimeExecutorBuilder {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            registry: None,
            plugins: Vec::new(),
            middlewares: Vec::new(),
        }
    }

    /// Registry shared with the application. A private empty one is used
    /// otherwise.
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Middleware applied to every language model the executor resolves.
    pub fn middleware(mut self, middleware: Arc<dyn LanguageModelMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn build(self) -> RuntimeExecutor {
        let registry = self.registry.unwrap_or_default();
        let manager = PluginManager::new();

        let fallback: Arc<dyn Plugin> = Arc::new(ModelResolverPlugin::new(
            ModelResolver::new(registry.clone()),
            self.config.provider_options.clone(),
            self.middlewares,
        ));
        if let Some(tool_use) = &self.config.prompt_tool_use {
            manager.use_plugin(Arc::new(PromptToolUsePlugin::new(tool_use.clone())));
        }
        if self.config.logging {
            manager.use_plugin(Arc::new(LoggingPlugin::new()));
        }
        for plugin in self.plugins {
            manager.use_plugin(plugin);
        }
        log::debug!("executor built with plugins {:?}", manager.names());

        RuntimeExecutor {
            engine: PluginEngine::with_fallback_resolver(
                manager,
                self.config.max_recursion_depth,
                Some(fallback),
            ),
            registry,
            config: self.config,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ImageModelResolutionError, ProviderError};
    use crate::messages::{FinishReason, Message, Role, Usage};
    use crate::models::ToolSet;
    use crate::plugin::{PluginBuilder, PluginOrdering};
    use crate::plugins::PromptToolUseConfig;
    use crate::stream::{collect_chunks, text_of, StreamChunk};
    use crate::testing::{
        text_script, FakeImageModel, FakeLanguageModel, FakeProvider, FakeTool,
    };
    use crate::traits::{ImageModel, LanguageModel};
    use serde_json::json;

    fn executor_with(
        model: Arc<FakeLanguageModel>,
        configure: impl FnOnce(&mut ExecutorConfig),
    ) -> RuntimeExecutor {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register_provider(
            "fake",
            Arc::new(FakeProvider::new("fake").with_language_model(model)),
            &["f"],
        );
        let mut config = ExecutorConfig::new("fake");
        configure(&mut config);
        RuntimeExecutor::builder(config).registry(registry).build()
    }

    #[tokio::test]
    async fn generate_text_resolves_bare_and_full_ids() {
        let model = Arc::new(FakeLanguageModel::new("fake", "small").with_texts(["one", "two", "three"]));
        let executor = executor_with(model.clone(), |_| {});

        assert_eq!(executor.generate_text("small", TextParams::from_prompt("a")).await.unwrap().text, "one");
        assert_eq!(executor.generate_text("fake|small", TextParams::from_prompt("b")).await.unwrap().text, "two");
        assert_eq!(executor.generate_text("f|small", TextParams::from_prompt("c")).await.unwrap().text, "three");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn unknown_provider_is_a_model_resolution_error() {
        let executor = executor_with(Arc::new(FakeLanguageModel::new("fake", "m")), |_| {});
        let err = executor
            .generate_text("nowhere|m", TextParams::from_prompt("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AiCoreError::ModelResolution(_)));

        let err = executor
            .generate_image("nowhere|img", ImageParams::new("cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, AiCoreError::ImageModelResolution(ImageModelResolutionError(_))));
        assert!(err.is_model_resolution());
    }

    #[tokio::test]
    async fn user_resolver_wins_over_registry() {
        let registry_model = Arc::new(FakeLanguageModel::new("fake", "m").with_texts(["registry"]));
        let executor = executor_with(registry_model, |_| {});
        let custom: Arc<dyn LanguageModel> =
            Arc::new(FakeLanguageModel::new("custom", "m").with_texts(["custom"]));
        executor.use_plugin(Arc::new(
            PluginBuilder::new("custom-resolver")
                .resolve_model(move |id, _, _| {
                    (id == "special").then(|| ModelHandle::Language(custom.clone()))
                })
                .build(),
        ));

        let text = executor.generate_text("special", TextParams::from_prompt("x")).await.unwrap().text;
        assert_eq!(text, "custom");
        let text = executor.generate_text("m", TextParams::from_prompt("x")).await.unwrap().text;
        assert_eq!(text, "registry");
    }

    #[tokio::test]
    async fn post_ordered_user_resolver_runs_before_registry_fallback() {
        let executor = executor_with(Arc::new(FakeLanguageModel::new("fake", "m")), |_| {});
        let special: Arc<dyn LanguageModel> =
            Arc::new(FakeLanguageModel::new("other", "special").with_texts(["special"]));
        executor.use_plugin(Arc::new(
            PluginBuilder::new("late-resolver")
                .ordering(PluginOrdering::Post)
                .resolve_model(move |id, _, _| {
                    (id == "other|special").then(|| ModelHandle::Language(special.clone()))
                })
                .build(),
        ));

        let text = executor
            .generate_text("other|special", TextParams::from_prompt("x"))
            .await
            .unwrap()
            .text;
        assert_eq!(text, "special");

        let err = executor
            .generate_text("other|missing", TextParams::from_prompt("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AiCoreError::ModelResolution(_)));
    }

    #[tokio::test]
    async fn concrete_handles_skip_resolution() {
        let executor = executor_with(Arc::new(FakeLanguageModel::new("fake", "m")), |_| {});
        let handle: Arc<dyn LanguageModel> =
            Arc::new(FakeLanguageModel::new("elsewhere", "direct").with_texts(["direct"]));
        let text = executor.generate_text(handle, TextParams::from_prompt("x")).await.unwrap().text;
        assert_eq!(text, "direct");
    }

    #[tokio::test]
    async fn generate_object_parses_fenced_json() {
        let model = Arc::new(FakeLanguageModel::new("fake", "m").with_texts(["```json\n{\"a\": 1}\n```"]));
        let executor = executor_with(model, |_| {});
        let result = executor
            .generate_object(
                "m",
                ObjectParams::new(TextParams::from_prompt("give"), json!({"type": "object"})),
            )
            .await
            .unwrap();
        assert_eq!(result.object, json!({"a": 1}));
    }

    #[tokio::test]
    async fn generate_image_uses_image_model() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register_provider("fake", Arc::new(FakeProvider::new("fake")), &[]);
        let executor = RuntimeExecutor::builder(ExecutorConfig::new("fake"))
            .registry(registry)
            .build();
        let mut params = ImageParams::new("cat");
        params.n = 3;
        let result = executor.generate_image("img", params).await.unwrap();
        assert_eq!(result.images.len(), 3);

        let direct: Arc<dyn ImageModel> = Arc::new(FakeImageModel::new("x", "y"));
        assert!(executor.generate_image(direct, ImageParams::new("dog")).await.is_ok());
    }

    #[tokio::test]
    async fn result_of_wrong_kind_is_unexpected() {
        let executor = executor_with(Arc::new(FakeLanguageModel::new("fake", "m")), |_| {});
        executor.use_plugin(Arc::new(
            PluginBuilder::new("to-image")
                .transform_result(|_, _| Ok(CallResult::Image(ImageResult::default())))
                .build(),
        ));
        let err = executor.generate_text("m", TextParams::from_prompt("x")).await.unwrap_err();
        assert!(matches!(
            err,
            AiCoreError::UnexpectedResult { ref operation, ref found }
                if operation == "generate_text" && found == "image"
        ));
    }

    #[tokio::test]
    async fn stream_text_without_tools_passes_chunks_through() {
        let model = Arc::new(
            FakeLanguageModel::new("fake", "m").with_stream_scripts([text_script(&["he", "llo"], Usage::new(1, 2))]),
        );
        let executor = executor_with(model, |c| {
            c.prompt_tool_use = Some(PromptToolUseConfig::default());
        });
        let chunks = collect_chunks(executor.stream_text("m", TextParams::from_prompt("x")).await.unwrap()).await;
        assert_eq!(text_of(&chunks), "hello");
    }

    #[tokio::test]
    async fn prompted_tool_use_round_trip() {
        let block = r#"<tool_use><name>echo</name><arguments>{"x":1}</arguments></tool_use>"#;
        let model = Arc::new(FakeLanguageModel::new("fake", "m").with_stream_scripts([
            text_script(&["Let me check. ", block], Usage::new(10, 5)),
            text_script(&["x is 1"], Usage::new(20, 3)),
        ]));
        let executor = executor_with(model.clone(), |c| {
            c.prompt_tool_use = Some(PromptToolUseConfig::default());
            c.logging = true;
        });
        let tool = Arc::new(FakeTool::new("echo", "Echo"));
        let params = TextParams::from_prompt("what is x?")
            .with_system("Be brief.")
            .with_tools(ToolSet::new().with(tool.clone()));

        let chunks = collect_chunks(executor.stream_text("m", params).await.unwrap()).await;

        assert_eq!(tool.calls().len(), 1);
        assert_eq!(tool.calls()[0], json!({"x": 1}));
        assert!(text_of(&chunks).ends_with("x is 1"));
        assert_eq!(chunks.iter().filter(|c| c.kind() == "finish").count(), 1);
        assert!(chunks.iter().any(|c| matches!(
            c,
            StreamChunk::FinishStep { finish_reason: FinishReason::ToolCalls, .. }
        )));

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].prompt[0].text().contains("<name>echo</name>"));
        assert!(requests[0].prompt[0].text().ends_with("Be brief."));

        let followup: Vec<&Message> = requests[1].prompt.iter().filter(|m| m.role != Role::System).collect();
        assert_eq!(followup.len(), 3);
        assert_eq!(followup[1].role, Role::Assistant);
        assert_eq!(followup[1].text(), format!("Let me check. {block}"));
        assert!(followup[2].text().starts_with("<tool_use_result>"));
    }

    #[tokio::test]
    async fn continuation_depth_is_bounded() {
        let block = r#"<tool_use><name>echo</name><arguments>{}</arguments></tool_use>"#;
        let model = Arc::new(FakeLanguageModel::new("fake", "m").with_stream_scripts([
            text_script(&[block], Usage::new(1, 1)),
            text_script(&[block], Usage::new(1, 1)),
            text_script(&[block], Usage::new(1, 1)),
        ]));
        let executor = executor_with(model.clone(), |c| {
            c.prompt_tool_use = Some(PromptToolUseConfig::default());
            c.max_recursion_depth = 1;
        });
        let params = TextParams::from_prompt("loop")
            .with_tools(ToolSet::new().with(Arc::new(FakeTool::new("echo", "Echo"))));

        let chunks = collect_chunks(executor.stream_text("m", params).await.unwrap()).await;
        let error = chunks
            .iter()
            .find_map(|c| match c {
                StreamChunk::Error { error } => Some(error.to_string()),
                _ => None,
            })
            .expect("depth error chunk");
        assert!(error.contains("DepthExceeded"));
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_reaches_caller() {
        let model = Arc::new(FakeLanguageModel::new("fake", "m").failing(ProviderError::Unavailable {
            message: "down".into(),
            provider: Some("fake".into()),
            status_code: Some(503),
        }));
        let executor = executor_with(model, |c| c.logging = true);
        let err = executor.generate_text("m", TextParams::from_prompt("x")).await.unwrap_err();
        assert!(matches!(err, AiCoreError::Provider(ProviderError::Unavailable { .. })));
    }

    #[test]
    fn builder_installs_configured_plugins() {
        let mut config = ExecutorConfig::new("fake");
        config.prompt_tool_use = Some(PromptToolUseConfig::default());
        config.logging = true;
        let executor = RuntimeExecutor::builder(config).build();
        assert_eq!(executor.engine().manager().names(), ["logging", "prompt-tool-use"]);
        assert_eq!(
            executor.engine().fallback_resolver().map(|r| r.name()),
            Some(MODEL_RESOLVER_PLUGIN)
        );
        assert!(executor.registry().provider_ids().is_empty());
    }
}
