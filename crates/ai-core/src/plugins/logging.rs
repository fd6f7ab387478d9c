//! Request lifecycle logging through the `log` facade.

use chrono::Utc;

use crate::context::RequestContext;
use crate::errors::AiCoreError;
use crate::params::CallResult;
use crate::plugin::{HookFuture, HookKind, Plugin, PluginOrdering};

pub const PLUGIN_NAME: &str = "logging";

/// Logs every request start, completion and failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlugin;

impl LoggingPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn elapsed_ms(ctx: &RequestContext) -> i64 {
    (Utc::now() - ctx.started_at()).num_milliseconds()
}

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn ordering(&self) -> PluginOrdering {
        PluginOrdering::Pre
    }

    fn implements(&self, hook: HookKind) -> bool {
        matches!(
            hook,
            HookKind::OnRequestStart | HookKind::OnRequestEnd | HookKind::OnError
        )
    }

    fn on_request_start<'a>(&'a self, ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        Box::pin(async move {
            log::info!(
                "request {} started: provider={} model={} recursive={}",
                ctx.request_id(),
                ctx.provider_id(),
                ctx.model().model_id(),
                ctx.is_recursive_call()
            );
            Ok(())
        })
    }

    fn on_request_end<'a>(
        &'a self,
        result: &'a CallResult,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, ()> {
        Box::pin(async move {
            log::info!(
                "request {} finished with {} result in {}ms",
                ctx.request_id(),
                result.kind(),
                elapsed_ms(ctx)
            );
            Ok(())
        })
    }

    fn on_error<'a>(&'a self, error: &'a AiCoreError, ctx: &'a RequestContext) -> HookFuture<'a, ()> {
        Box::pin(async move {
            log::error!(
                "request {} failed after {}ms: {error}",
                ctx.request_id(),
                elapsed_ms(ctx)
            );
            Ok(())
        })
    }
}
