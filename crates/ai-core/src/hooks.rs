//! PluginManager -- ordered plugin storage and hook dispatch strategies.
//!
//! # Ordering
//!
//! Plugins are kept sorted into three buckets, `pre`, `normal` and `post`.
//! The effective order is pre ++ normal ++ post, with insertion order kept
//! inside each bucket. Registering a name that already exists replaces the
//! earlier plugin; the replacement goes to the end of its bucket.
//!
//! # Dispatch Strategies
//!
//! | Strategy          | Hooks                                            | Behaviour                               |
//! |-------------------|--------------------------------------------------|-----------------------------------------|
//! | First-wins        | `resolve_model`                                  | stop at the first `Some`                |
//! | Sequential-chain  | `transform_params`, `transform_result`           | left-to-right fold                      |
//! | Context-configure | `configure_context`                              | awaited in order                        |
//! | Parallel-fire     | `on_request_start`, `on_request_end`, `on_error` | all run; first error to complete wins   |
//! | Collection        | `stream_transform`                               | ordered list, composed by the engine    |
//!
//! Hook futures are polled on the calling task; "parallel" means concurrently
//! polled, not spawned.
//!
//! # Connections
//!
//! - [`Plugin`](crate::plugin::Plugin) defines the hooks dispatched here.
//! - [`PluginEngine`](crate::engine::PluginEngine) drives the lifecycle
//!   through these methods.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::context::RequestContext;
use crate::errors::AiCoreError;
use crate::models::{ModelHandle, ModelKind};
use crate::params::{CallParams, CallResult};
use crate::plugin::{HookFuture, HookKind, Plugin, PluginOrdering};
use crate::stream::StreamTransform;

/// Registered plugin counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginStats {
    pub total: usize,
    pub by_ordering: BTreeMap<PluginOrdering, usize>,
    /// Plugins declaring each hook, keyed by hook name.
    pub by_hook: BTreeMap<&'static str, usize>,
}

// ---------------------------------------------------------------------------
// PluginManager
// ---------------------------------------------------------------------------

/// Ordered set of plugins with one dispatch method per hook.
///
/// # Example
///
/// ```rust
/// use ai_core::hooks::PluginManager;
/// use ai_core::plugin::{PluginBuilder, PluginOrdering};
/// use std::sync::Arc;
///
/// let manager = PluginManager::new();
/// manager.use_plugin(Arc::new(PluginBuilder::new("late").ordering(PluginOrdering::Post).build()));
/// manager.use_plugin(Arc::new(PluginBuilder::new("early").ordering(PluginOrdering::Pre).build()));
/// assert_eq!(manager.names(), vec!["early", "late"]);
/// ```
#[derive(Default)]
pub struct PluginManager {
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager from plugins, registered in iteration order.
    pub fn with_plugins<I>(plugins: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Plugin>>,
    {
        let manager = Self::new();
        for plugin in plugins {
            manager.use_plugin(plugin);
        }
        manager
    }

    /// Register a plugin and re-sort.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) {
        let mut plugins = self.lock();
        let before = plugins.len();
        plugins.retain(|p| p.name() != plugin.name());
        if plugins.len() != before {
            log::warn!("plugin '{}' registered twice, replacing the earlier one", plugin.name());
        }
        plugins.push(plugin);
        // Stable sort keeps insertion order inside each bucket.
        plugins.sort_by_key(|p| p.ordering());
    }

    /// Remove a plugin by name.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let mut plugins = self.lock();
        let index = plugins.iter().position(|p| p.name() == name)?;
        Some(plugins.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.lock().iter().find(|p| p.name() == name).cloned()
    }

    /// All plugins in effective order.
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> PluginStats {
        let plugins = self.lock();
        let mut stats = PluginStats {
            total: plugins.len(),
            ..Default::default()
        };
        for plugin in plugins.iter() {
            *stats.by_ordering.entry(plugin.ordering()).or_default() += 1;
            for hook in HookKind::ALL {
                if plugin.implements(hook) {
                    *stats.by_hook.entry(hook.as_str()).or_default() += 1;
                }
            }
        }
        stats
    }

    // -- first-wins --

    /// First `Some` from `resolve_model` wins; later plugins are not invoked.
    pub async fn resolve_model(
        &self,
        model_id: &str,
        kind: ModelKind,
        ctx: &RequestContext,
    ) -> Result<Option<ModelHandle>, AiCoreError> {
        for plugin in self.snapshot(HookKind::ResolveModel) {
            if let Some(handle) = plugin.resolve_model(model_id, kind, ctx).await? {
                log::debug!("plugin '{}' resolved model '{model_id}'", plugin.name());
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    // -- sequential --

    pub async fn configure_context(&self, ctx: &RequestContext) -> Result<(), AiCoreError> {
        for plugin in self.snapshot(HookKind::ConfigureContext) {
            plugin.configure_context(ctx).await?;
        }
        Ok(())
    }

    pub async fn transform_params(
        &self,
        params: CallParams,
        ctx: &RequestContext,
    ) -> Result<CallParams, AiCoreError> {
        let mut current = params;
        for plugin in self.snapshot(HookKind::TransformParams) {
            current = plugin.transform_params(current, ctx).await?;
        }
        Ok(current)
    }

    pub async fn transform_result(
        &self,
        result: CallResult,
        ctx: &RequestContext,
    ) -> Result<CallResult, AiCoreError> {
        let mut current = result;
        for plugin in self.snapshot(HookKind::TransformResult) {
            current = plugin.transform_result(current, ctx).await?;
        }
        Ok(current)
    }

    // -- parallel-fire --

    pub async fn on_request_start(&self, ctx: &RequestContext) -> Result<(), AiCoreError> {
        let plugins = self.snapshot(HookKind::OnRequestStart);
        drain_all(
            HookKind::OnRequestStart,
            plugins
                .iter()
                .map(|p| (p.name(), p.on_request_start(ctx)))
                .collect(),
        )
        .await
    }

    pub async fn on_request_end(
        &self,
        result: &CallResult,
        ctx: &RequestContext,
    ) -> Result<(), AiCoreError> {
        let plugins = self.snapshot(HookKind::OnRequestEnd);
        drain_all(
            HookKind::OnRequestEnd,
            plugins
                .iter()
                .map(|p| (p.name(), p.on_request_end(result, ctx)))
                .collect(),
        )
        .await
    }

    pub async fn on_error(&self, error: &AiCoreError, ctx: &RequestContext) -> Result<(), AiCoreError> {
        let plugins = self.snapshot(HookKind::OnError);
        drain_all(
            HookKind::OnError,
            plugins
                .iter()
                .map(|p| (p.name(), p.on_error(error, ctx)))
                .collect(),
        )
        .await
    }

    // -- collection --

    /// Stream transforms of every plugin that offers one for this call, in
    /// plugin order.
    pub fn collect_stream_transforms(
        &self,
        params: &CallParams,
        ctx: &RequestContext,
    ) -> Vec<StreamTransform> {
        self.snapshot(HookKind::StreamTransform)
            .iter()
            .filter_map(|p| p.stream_transform(params, ctx))
            .collect()
    }

    /// Plugins declaring `hook`, cloned so no lock is held across awaits.
    fn snapshot(&self, hook: HookKind) -> Vec<Arc<dyn Plugin>> {
        self.lock()
            .iter()
            .filter(|p| p.implements(hook))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Plugin>>> {
        self.plugins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run every hook future to completion and return the first error to finish.
async fn drain_all(hook: HookKind, futures: Vec<(&str, HookFuture<'_, ()>)>) -> Result<(), AiCoreError> {
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .map(|(name, fut)| async move { (name, fut.await) })
        .collect();

    let mut first_error = None;
    while let Some((name, outcome)) = pending.next().await {
        if let Err(err) = outcome {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                log::debug!("{} hook of '{name}' also failed: {err}", hook.as_str());
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
