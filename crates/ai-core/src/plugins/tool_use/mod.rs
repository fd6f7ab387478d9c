//! Prompt-based tool calling for models without native tool support.
//!
//! [`PromptToolUsePlugin`] moves the tools of a streaming call out of the
//! native request and into the system prompt, then installs a
//! [`ToolUseTransform`] that executes the `<tool_use>` blocks the model
//! writes and continues the conversation with their results.
//!
//! # Connections
//!
//! - Tools are parked on [`RequestContext::set_active_tools`] by
//!   `transform_params` and picked up again by `stream_transform`.
//! - Continuations go through [`RequestContext::recursive_call`], which
//!   re-runs this plugin for the follow-up request.

pub mod parser;
pub mod prompt;
pub mod transform;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::plugin::{HookFuture, HookKind, Plugin};
use crate::params::CallParams;
use crate::stream::{ChunkStream, StreamTransform};

pub use parser::{parse_tool_use, ToolUseResult, ToolUseStatus};
pub use prompt::{build_system_prompt, format_tool_result};
pub use transform::ToolUseTransform;

pub const PLUGIN_NAME: &str = "prompt-tool-use";

fn default_enabled() -> bool {
    true
}

/// `[prompt_tool_use]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptToolUseConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Replaces the built-in system prompt template.
    #[serde(default)]
    pub system_prompt_template: Option<String>,
}

impl Default for PromptToolUseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_prompt_template: None,
        }
    }
}

/// Injects tool descriptions into the prompt and runs the tools the model
/// asks for.
#[derive(Debug, Clone, Default)]
pub struct PromptToolUsePlugin {
    config: PromptToolUseConfig,
}

impl PromptToolUsePlugin {
    pub fn new(config: PromptToolUseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromptToolUseConfig {
        &self.config
    }

    fn applies_to(&self, ctx: &RequestContext) -> bool {
        self.config.enabled && ctx.operation().is_some_and(|op| op.is_streaming())
    }
}

impl Plugin for PromptToolUsePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn implements(&self, hook: HookKind) -> bool {
        matches!(hook, HookKind::TransformParams | HookKind::StreamTransform)
    }

    fn transform_params<'a>(
        &'a self,
        mut params: CallParams,
        ctx: &'a RequestContext,
    ) -> HookFuture<'a, CallParams> {
        Box::pin(async move {
            if !self.applies_to(ctx) {
                return Ok(params);
            }
            let Some(text) = params.text_mut() else {
                return Ok(params);
            };
            if text.tools.is_empty() {
                return Ok(params);
            }

            let tools = std::mem::take(&mut text.tools);
            text.tool_choice = None;
            text.system = Some(build_system_prompt(
                &tools,
                text.system.as_deref(),
                self.config.system_prompt_template.as_deref(),
            ));
            log::debug!(
                "request {}: prompting for tools {:?}",
                ctx.request_id(),
                tools.names()
            );
            ctx.set_active_tools(Some(tools));
            Ok(params)
        })
    }

    fn stream_transform(&self, _params: &CallParams, ctx: &RequestContext) -> Option<StreamTransform> {
        if !self.applies_to(ctx) {
            return None;
        }
        let tools = ctx.active_tools().filter(|tools| !tools.is_empty())?;
        let transform = ToolUseTransform::new(ctx.clone(), tools, ctx.original_params());
        Some(Box::new(move |stream: ChunkStream| transform.apply(stream)))
    }
}
