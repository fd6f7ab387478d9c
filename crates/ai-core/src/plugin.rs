//! Plugin contract.
//!
//! A plugin contributes to the request lifecycle through hooks. Each hook has
//! a no-op default, and [`Plugin::implements`] declares which ones the
//! plugin actually provides so the manager can skip the rest.
//!
//! # Hooks
//!
//! | Hook                | Strategy           | Runs                         |
//! |---------------------|--------------------|------------------------------|
//! | `configure_context` | sequential         | before anything else         |
//! | `on_request_start`  | parallel-fire      | after context configuration  |
//! | `resolve_model`     | first-wins         | when given a model id        |
//! | `transform_params`  | sequential-chain   | before invocation            |
//! | `stream_transform`  | collected, chained | streaming operations only    |
//! | `transform_result`  | sequential-chain   | after invocation             |
//! | `on_request_end`    | parallel-fire      | after the result transform   |
//! | `on_error`          | parallel-fire      | when any step above fails    |

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::errors::AiCoreError;
use crate::models::{ModelHandle, ModelKind};
use crate::params::{CallParams, CallResult};
use crate::stream::StreamTransform;

/// Boxed future returned by plugin hooks.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AiCoreError>> + Send + 'a>>;

/// Hooks a plugin can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    ResolveModel,
    ConfigureContext,
    TransformParams,
    TransformResult,
    OnRequestStart,
    OnRequestEnd,
    OnError,
    StreamTransform,
}

impl HookKind {
    pub const ALL: [HookKind; 8] = [
        HookKind::ResolveModel,
        HookKind::ConfigureContext,
        HookKind::TransformParams,
        HookKind::TransformResult,
        HookKind::OnRequestStart,
        HookKind::OnRequestEnd,
        HookKind::OnError,
        HookKind::StreamTransform,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResolveModel => "resolve_model",
            Self::ConfigureContext => "configure_context",
            Self::TransformParams => "transform_params",
            Self::TransformResult => "transform_result",
            Self::OnRequestStart => "on_request_start",
            Self::OnRequestEnd => "on_request_end",
            Self::OnError => "on_error",
            Self::StreamTransform => "stream_transform",
        }
    }
}

/// Bucket a plugin is sorted into. Effective order is pre, normal, post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginOrdering {
    Pre,
    #[default]
    Normal,
    Post,
}

/// A lifecycle plugin.
///
/// Plugins are immutable once registered; per-call state belongs on the
/// [`RequestContext`].
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    fn ordering(&self) -> PluginOrdering {
        PluginOrdering::Normal
    }

    /// Whether this plugin provides `hook`. Hooks not declared here are
    /// never called.
    fn implements(&self, hook: HookKind) -> bool;

    /// Turn a model id into a handle, or pass with `None`.
    fn resolve_model<'a>(
        &'a self,
        _model_id: &'a str,
        _kind: ModelKind,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, Option<ModelHandle>> {
        Box::pin(async { Ok(None) })
    }

    fn configure_context<'a>(&'a self, _ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn transform_params<'a>(
        &'a self,
        params: CallParams,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallParams> {
        Box::pin(async move { Ok(params) })
    }

    fn transform_result<'a>(
        &'a self,
        result: CallResult,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallResult> {
        Box::pin(async move { Ok(result) })
    }

    fn on_request_start<'a>(&'a self, _ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn on_request_end<'a>(
        &'a self,
        _result: &'a CallResult,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn on_error<'a>(
        &'a self,
        _error: &'a AiCoreError,
        _ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Per-call stream rewrite for streaming operations.
    fn stream_transform(
        &self,
        _params: &CallParams,
        _ctx: &RequestContext,
    ) -> Option<StreamTransform> {
        None
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Constructor producing a plugin from configuration.
pub type PluginFactory<C> = Box<dyn Fn(C) -> Arc<dyn Plugin> + Send + Sync>;

/// Wrap a ready plugin value for registration.
pub fn define_plugin<P: Plugin + 'static>(plugin: P) -> Arc<dyn Plugin> {
    Arc::new(plugin)
}

/// Turn a constructor into a [`PluginFactory`].
///
/// ```rust
/// use ai_core::plugin::{define_plugin_factory, Plugin, PluginBuilder};
///
/// let factory = define_plugin_factory(|name: String| PluginBuilder::new(name).build());
/// let plugin = factory("audit".to_string());
/// assert_eq!(plugin.name(), "audit");
/// ```
pub fn define_plugin_factory<C, P, F>(factory: F) -> PluginFactory<C>
where
    F: Fn(C) -> P + Send + Sync + 'static,
    P: Plugin + 'static,
{
    Box::new(move |config| Arc::new(factory(config)) as Arc<dyn Plugin>)
}

type BoxedHook<T> = Pin<Box<dyn Future<Output = Result<T, AiCoreError>> + Send>>;
type ResolveFn = Arc<dyn Fn(&str, ModelKind, &RequestContext) -> Option<ModelHandle> + Send + Sync>;
type ContextFn = Arc<dyn Fn(RequestContext) -> BoxedHook<()> + Send + Sync>;
type ParamsFn = Arc<dyn Fn(CallParams, RequestContext) -> BoxedHook<CallParams> + Send + Sync>;
type ResultFn =
    Arc<dyn Fn(CallResult, &RequestContext) -> Result<CallResult, AiCoreError> + Send + Sync>;
type EndFn = Arc<dyn Fn(&CallResult, &RequestContext) -> Result<(), AiCoreError> + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&AiCoreError, &RequestContext) + Send + Sync>;
type StreamFn = Arc<dyn Fn(&CallParams, &RequestContext) -> Option<StreamTransform> + Send + Sync>;

/// Closure-based plugin builder for lightweight plugins.
///
/// Only hooks given a closure are declared in `implements`.
///
/// ```rust
/// use ai_core::plugin::{HookKind, Plugin, PluginBuilder, PluginOrdering};
///
/// let plugin = PluginBuilder::new("tagger")
///     .ordering(PluginOrdering::Pre)
///     .on_request_start(|ctx| async move {
///         ctx.set_metadata("tagged", serde_json::json!(true));
///         Ok(())
///     })
///     .build();
///
/// assert!(plugin.implements(HookKind::OnRequestStart));
/// assert!(!plugin.implements(HookKind::OnError));
/// ```
pub struct PluginBuilder {
    name: String,
    ordering: PluginOrdering,
    resolve_model: Option<ResolveFn>,
    configure_context: Option<ContextFn>,
    transform_params: Option<ParamsFn>,
    transform_result: Option<ResultFn>,
    on_request_start: Option<ContextFn>,
    on_request_end: Option<EndFn>,
    on_error: Option<ErrorFn>,
    stream_transform: Option<StreamFn>,
}

impl PluginBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordering: PluginOrdering::Normal,
            resolve_model: None,
            configure_context: None,
            transform_params: None,
            transform_result: None,
            on_request_start: None,
            on_request_end: None,
            on_error: None,
            stream_transform: None,
        }
    }

    pub fn ordering(mut self, ordering: PluginOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn resolve_model<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, ModelKind, &RequestContext) -> Option<ModelHandle> + Send + Sync + 'static,
    {
        self.resolve_model = Some(Arc::new(f));
        self
    }

    pub fn configure_context<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AiCoreError>> + Send + 'static,
    {
        self.configure_context = Some(Arc::new(move |ctx| -> BoxedHook<()> { Box::pin(f(ctx)) }));
        self
    }

    pub fn transform_params<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CallParams, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallParams, AiCoreError>> + Send + 'static,
    {
        self.transform_params = Some(Arc::new(move |params, ctx| -> BoxedHook<CallParams> {
            Box::pin(f(params, ctx))
        }));
        self
    }

    pub fn transform_result<F>(mut self, f: F) -> Self
    where
        F: Fn(CallResult, &RequestContext) -> Result<CallResult, AiCoreError>
            + Send
            + Sync
            + 'static,
    {
        self.transform_result = Some(Arc::new(f));
        self
    }

    pub fn on_request_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AiCoreError>> + Send + 'static,
    {
        self.on_request_start = Some(Arc::new(move |ctx| -> BoxedHook<()> { Box::pin(f(ctx)) }));
        self
    }

    pub fn on_request_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallResult, &RequestContext) -> Result<(), AiCoreError> + Send + Sync + 'static,
    {
        self.on_request_end = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&AiCoreError, &RequestContext) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn stream_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallParams, &RequestContext) -> Option<StreamTransform> + Send + Sync + 'static,
    {
        self.stream_transform = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> ClosurePlugin {
        ClosurePlugin { hooks: self }
    }
}

/// Plugin produced by [`PluginBuilder`].
pub struct ClosurePlugin {
    hooks: PluginBuilder,
}

impl Plugin for ClosurePlugin {
    fn name(&self) -> &str {
        &self.hooks.name
    }

    fn ordering(&self) -> PluginOrdering {
        self.hooks.ordering
    }

    fn implements(&self, hook: HookKind) -> bool {
        let h = &self.hooks;
        match hook {
            HookKind::ResolveModel => h.resolve_model.is_some(),
            HookKind::ConfigureContext => h.configure_context.is_some(),
            HookKind::TransformParams => h.transform_params.is_some(),
            HookKind::TransformResult => h.transform_result.is_some(),
            HookKind::OnRequestStart => h.on_request_start.is_some(),
            HookKind::OnRequestEnd => h.on_request_end.is_some(),
            HookKind::OnError => h.on_error.is_some(),
            HookKind::StreamTransform => h.stream_transform.is_some(),
        }
    }

    fn resolve_model<'a>(
        &'a self,
        model_id: &'a str,
        kind: ModelKind,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, Option<ModelHandle>> {
        let handle = self
            .hooks
            .resolve_model
            .as_ref()
            .and_then(|f| f(model_id, kind, ctx));
        Box::pin(async move { Ok(handle) })
    }

    fn configure_context<'a>(&'a self, ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        match &self.hooks.configure_context {
            Some(f) => f(ctx.clone()),
            None => Box::pin(async { Ok(()) }),
        }
    }

    fn transform_params<'a>(
        &'a self,
        params: CallParams,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallParams> {
        match &self.hooks.transform_params {
            Some(f) => f(params, ctx.clone()),
            None => Box::pin(async move { Ok(params) }),
        }
    }

    fn transform_result<'a>(
        &'a self,
        result: CallResult,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallResult> {
        let result = match &self.hooks.transform_result {
            Some(f) => f(result, ctx),
            None => Ok(result),
        };
        Box::pin(async move { result })
    }

    fn on_request_start<'a>(&'a self, ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        match &self.hooks.on_request_start {
            Some(f) => f(ctx.clone()),
            None => Box::pin(async { Ok(()) }),
        }
    }

    fn on_request_end<'a>(
        &'a self,
        result: &'a CallResult,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        let outcome = match &self.hooks.on_request_end {
            Some(f) => f(result, ctx),
            None => Ok(()),
        };
        Box::pin(async move { outcome })
    }

    fn on_error<'a>(
        &'a self,
        error: &'a AiCoreError,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        if let Some(f) = &self.hooks.on_error {
            f(error, ctx);
        }
        Box::pin(async { Ok(()) })
    }

    fn stream_transform(&self, params: &CallParams, ctx: &RequestContext) -> Option<StreamTransform> {
        self.hooks
            .stream_transform
            .as_ref()
            .and_then(|f| f(params, ctx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
