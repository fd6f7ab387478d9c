//! Stream transform that runs prompted tool calls and continues the
//! conversation.
//!
//! # State machine
//!
//! ```text
//! text-delta   ──append to buffer──────────────────────────→ forward
//! finish-step  ──no valid <tool_use> blocks────────────────→ forward
//! finish-step  ──blocks found──→ run tools ──→ recursive call ──→ forward
//!                                                 continuation chunks
//! ```
//!
//! Chunks produced for a finish-step are queued and drained before the
//! upstream is polled again. While a continuation stream is attached its
//! chunks (except `finish`) are forwarded first.

use std::collections::VecDeque;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use super::parser::{parse_tool_use, ToolUseResult, ToolUseStatus};
use super::prompt::format_tool_result;
use crate::context::RequestContext;
use crate::errors::AiCoreError;
use crate::messages::{FinishReason, Message};
use crate::models::ToolSet;
use crate::params::{CallParams, CallResult};
use crate::stream::{ChunkStream, StreamChunk};
use crate::traits::ToolCallOptions;

/// Text appended after an `error` chunk when the continuation fails.
pub const CONTINUATION_FAILED_TEXT: &str = "\n\n[continuation failed, please retry]";

/// Per-call tool-use transform.
///
/// `params` is the caller's original parameter snapshot: the continuation
/// is built from its conversation.
pub struct ToolUseTransform {
    ctx: RequestContext,
    tools: ToolSet,
    params: CallParams,
}

impl ToolUseTransform {
    pub fn new(ctx: RequestContext, tools: ToolSet, params: CallParams) -> Self {
        Self { ctx, tools, params }
    }

    /// Wrap `upstream`.
    pub fn apply(self, upstream: ChunkStream) -> ChunkStream {
        let state = TransformState {
            upstream,
            transform: self,
            text_buffer: String::new(),
            step_id: String::from("0"),
            pending: VecDeque::new(),
            continuation: None,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let chunk = state.next_chunk().await?;
            Some((chunk, state))
        }))
    }
}

struct TransformState {
    upstream: ChunkStream,
    transform: ToolUseTransform,
    text_buffer: String,
    /// Id of the latest text part, reused for injected text.
    step_id: String,
    pending: VecDeque<StreamChunk>,
    continuation: Option<ChunkStream>,
}

impl TransformState {
    async fn next_chunk(&mut self) -> Option<StreamChunk> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }

            if let Some(continuation) = self.continuation.as_mut() {
                match continuation.next().await {
                    Some(StreamChunk::Finish { .. }) => continue,
                    Some(chunk) => return Some(chunk),
                    None => {
                        self.continuation = None;
                        continue;
                    }
                }
            }

            let chunk = self.upstream.next().await?;
            match &chunk {
                StreamChunk::TextStart { id } => self.step_id = id.clone(),
                StreamChunk::TextDelta { id, text } => {
                    self.step_id = id.clone();
                    self.text_buffer.push_str(text);
                }
                StreamChunk::FinishStep { .. } => {
                    self.on_finish_step(chunk).await;
                    continue;
                }
                _ => {}
            }
            return Some(chunk);
        }
    }

    async fn on_finish_step(&mut self, chunk: StreamChunk) {
        let StreamChunk::FinishStep {
            usage,
            response,
            provider_metadata,
            ..
        } = chunk.clone()
        else {
            self.pending.push_back(chunk);
            return;
        };

        let mut calls = parse_tool_use(&self.text_buffer, &self.transform.tools);
        if calls.is_empty() {
            self.pending.push_back(chunk);
            return;
        }

        self.pending.push_back(StreamChunk::FinishStep {
            finish_reason: FinishReason::ToolCalls,
            usage: usage.clone(),
            response: response.clone(),
            provider_metadata: provider_metadata.clone(),
        });
        self.pending.push_back(StreamChunk::start_step());

        let mut result_blocks = Vec::with_capacity(calls.len());
        for call in &mut calls {
            result_blocks.push(self.invoke(call).await);
        }

        self.pending.push_back(StreamChunk::FinishStep {
            finish_reason: FinishReason::Stop,
            usage,
            response,
            provider_metadata,
        });

        let assistant_text = std::mem::take(&mut self.text_buffer);
        self.continue_conversation(assistant_text, result_blocks.join("\n"))
            .await;
    }

    /// Run one tool, queue its chunks, and return its result block.
    async fn invoke(&mut self, call: &mut ToolUseResult) -> String {
        self.pending.push_back(StreamChunk::ToolCall {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });

        let Some(tool) = self.transform.tools.get(&call.tool_name).cloned() else {
            call.status = ToolUseStatus::Error;
            return format_tool_result(&call.tool_name, &json!({"error": "unknown tool"}));
        };

        let options = ToolCallOptions {
            tool_call_id: call.id.clone(),
            messages: self
                .transform
                .params
                .text()
                .map(|text| text.messages.clone())
                .unwrap_or_default(),
            abort_signal: self.transform.params.abort_signal().cloned(),
        };

        call.status = ToolUseStatus::Invoking;
        log::debug!("invoking tool '{}' ({})", call.tool_name, call.id);
        match tool.execute(call.arguments.clone(), options).await {
            Ok(output) => {
                call.status = ToolUseStatus::Done;
                let block = format_tool_result(&call.tool_name, &output);
                self.pending.push_back(StreamChunk::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                    output,
                });
                block
            }
            Err(source) => {
                call.status = ToolUseStatus::Error;
                log::warn!("tool '{}' ({}) failed: {source}", call.tool_name, call.id);
                let block = format_tool_result(&call.tool_name, &json!({"error": source.to_string()}));
                let error = AiCoreError::ToolExecution {
                    tool_call_id: call.id.clone(),
                    tool_name: call.tool_name.clone(),
                    source,
                };
                self.pending.push_back(StreamChunk::ToolError {
                    tool_call_id: call.id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                    error: error.to_chunk_value(),
                });
                block
            }
        }
    }

    async fn continue_conversation(&mut self, assistant_text: String, results: String) {
        let mut params = self.transform.params.clone();
        if let Some(text) = params.text_mut() {
            text.messages.push(Message::assistant(assistant_text));
            text.messages.push(Message::user(results));
            text.tools = self.transform.tools.clone();
        }

        match self.transform.ctx.recursive_call(params).await {
            Ok(CallResult::Stream(handle)) => self.continuation = Some(handle.into_stream()),
            Ok(CallResult::Text(result)) => self
                .pending
                .push_back(StreamChunk::text_delta(self.step_id.clone(), result.text)),
            Ok(other) => {
                let error = AiCoreError::UnexpectedResult {
                    operation: self
                        .transform
                        .ctx
                        .operation()
                        .map_or("stream_text", |op| op.as_str())
                        .to_string(),
                    found: other.kind().to_string(),
                };
                self.pending.push_back(StreamChunk::Error {
                    error: error.to_chunk_value(),
                });
            }
            Err(err) => {
                log::error!(
                    "continuation for request {} failed: {err}",
                    self.transform.ctx.request_id()
                );
                self.pending.push_back(StreamChunk::Error {
                    error: serde_json::to_value(&err).unwrap_or_else(|_| Value::String(err.to_string())),
                });
                self.pending
                    .push_back(StreamChunk::text_delta(self.step_id.clone(), CONTINUATION_FAILED_TEXT));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContinuationHandler, ContinuationRequest};
    use crate::errors::{RecursiveCallError, ToolError};
    use crate::messages::{Role, Usage};
    use crate::models::ModelRef;
    use crate::params::TextParams;
    use crate::stream::{collect_chunks, StreamHandle};
    use crate::testing::FakeTool;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Answers every continuation with a fixed stream and records params.
    struct ScriptedContinuation {
        seen: Mutex<Vec<CallParams>>,
        fail: bool,
    }

    impl ScriptedContinuation {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl ContinuationHandler for ScriptedContinuation {
        fn continue_call<'a>(
            &'a self,
            _ctx: &'a RequestContext,
            request: ContinuationRequest,
        ) -> Pin<Box<dyn Future<Output = Result<CallResult, AiCoreError>> + Send + 'a>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request.params);
                if self.fail {
                    return Err(RecursiveCallError::DepthExceeded { limit: 0 }.into());
                }
                Ok(CallResult::Stream(StreamHandle::from_stream(stream::iter(vec![
                    StreamChunk::text_delta("t2", "done"),
                    StreamChunk::finish_step(FinishReason::Stop, Usage::new(3, 4)),
                    StreamChunk::finish(FinishReason::Stop, Usage::new(3, 4)),
                ]))))
            })
        }
    }

    fn upstream(text: &str) -> ChunkStream {
        Box::pin(stream::iter(vec![
            StreamChunk::TextStart { id: "t1".into() },
            StreamChunk::text_delta("t1", text),
            StreamChunk::TextEnd { id: "t1".into() },
            StreamChunk::finish_step(FinishReason::Stop, Usage::new(10, 5)),
            StreamChunk::finish(FinishReason::Stop, Usage::new(10, 5)),
        ]))
    }

    fn setup(tool: FakeTool, handler: Arc<ScriptedContinuation>) -> (ToolUseTransform, Arc<FakeTool>) {
        let tool = Arc::new(tool);
        let tools = ToolSet::new().with(tool.clone());
        let params: CallParams = TextParams::from_prompt("use the tool").with_tools(tools.clone()).into();
        let ctx = RequestContext::new("fake", ModelRef::from("m"), params.clone());
        ctx.attach_continuation_handler(handler);
        (ToolUseTransform::new(ctx, tools, params), tool)
    }

    const ECHO_BLOCK: &str = r#"Calling.<tool_use><name>echo</name><arguments>{"x":1}</arguments></tool_use>"#;

    #[tokio::test]
    async fn runs_tool_and_forwards_continuation() {
        let handler = ScriptedContinuation::new(false);
        let (transform, tool) = setup(FakeTool::new("echo", "Echo"), handler.clone());

        let chunks = collect_chunks(transform.apply(upstream(ECHO_BLOCK))).await;
        let kinds: Vec<_> = chunks.iter().map(StreamChunk::kind).collect();
        assert_eq!(
            kinds,
            [
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "start-step",
                "tool-call",
                "tool-result",
                "finish-step",
                "text-delta",
                "finish-step",
                "finish",
            ]
        );

        assert!(matches!(
            &chunks[3],
            StreamChunk::FinishStep { finish_reason: FinishReason::ToolCalls, .. }
        ));
        match &chunks[6] {
            StreamChunk::ToolResult { tool_call_id, output, .. } => {
                assert_eq!(tool_call_id, "echo-0");
                assert_eq!(output, &json!({"x": 1}));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &chunks[7] {
            StreamChunk::FinishStep { usage, finish_reason, .. } => {
                assert_eq!(usage, &Usage::new(10, 5));
                assert_eq!(*finish_reason, FinishReason::Stop);
            }
            other => panic!("unexpected {other:?}"),
        }
        // only the upstream finish survives
        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Finish { total_usage, .. }) if total_usage == &Usage::new(10, 5)
        ));
        assert_eq!(tool.calls().len(), 1);

        let seen = handler.seen.lock().unwrap();
        let text = seen[0].text().unwrap();
        assert_eq!(text.messages.len(), 3);
        assert_eq!(text.messages[1].role, Role::Assistant);
        assert_eq!(text.messages[1].text(), ECHO_BLOCK);
        assert_eq!(text.messages[2].role, Role::User);
        assert_eq!(
            text.messages[2].text(),
            format_tool_result("echo", &json!({"x": 1}))
        );
        assert!(text.tools.contains("echo"));
    }

    #[tokio::test]
    async fn unknown_tool_passes_finish_step_through() {
        let handler = ScriptedContinuation::new(false);
        let (transform, tool) = setup(FakeTool::new("echo", "Echo"), handler.clone());
        let text = "<tool_use><name>other</name><arguments>{}</arguments></tool_use>";

        let chunks = collect_chunks(transform.apply(upstream(text))).await;
        assert!(chunks.iter().all(|c| c.kind() != "tool-call"));
        assert_eq!(
            chunks[3],
            StreamChunk::finish_step(FinishReason::Stop, Usage::new(10, 5))
        );
        assert_eq!(chunks.len(), 5);
        assert!(tool.calls().is_empty());
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_tool_emits_tool_error_and_still_continues() {
        let handler = ScriptedContinuation::new(false);
        let failing = FakeTool::new("echo", "Echo").failing(ToolError::ExecutionFailed {
            message: "boom".into(),
        });
        let (transform, _tool) = setup(failing, handler.clone());

        let chunks = collect_chunks(transform.apply(upstream(ECHO_BLOCK))).await;
        let error = chunks
            .iter()
            .find_map(|c| match c {
                StreamChunk::ToolError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .expect("tool-error chunk");
        assert!(error.to_string().contains("boom"));

        let seen = handler.seen.lock().unwrap();
        let results = seen[0].text().unwrap().messages[2].text();
        assert!(results.contains(r#"{"error":"tool execution failed: boom"}"#));
    }

    #[tokio::test]
    async fn failure_in_a_batch_does_not_stop_later_tools() {
        let handler = ScriptedContinuation::new(false);
        let bad = Arc::new(FakeTool::new("bad", "Fails").failing(ToolError::ExecutionFailed {
            message: "boom".into(),
        }));
        let echo = Arc::new(FakeTool::new("echo", "Echo"));
        let tools = ToolSet::new().with(bad.clone()).with(echo.clone());
        let params: CallParams = TextParams::from_prompt("use both").with_tools(tools.clone()).into();
        let ctx = RequestContext::new("fake", ModelRef::from("m"), params.clone());
        ctx.attach_continuation_handler(handler.clone());
        let transform = ToolUseTransform::new(ctx, tools, params);

        let text = concat!(
            r#"<tool_use><name>bad</name><arguments>{}</arguments></tool_use>"#,
            r#"<tool_use><name>echo</name><arguments>{"y":2}</arguments></tool_use>"#,
        );
        let chunks = collect_chunks(transform.apply(upstream(text))).await;
        let tool_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.kind().starts_with("tool-"))
            .map(|c| match c {
                StreamChunk::ToolCall { tool_name, .. } => format!("tool-call:{tool_name}"),
                other => other.kind().to_string(),
            })
            .collect();
        assert_eq!(
            tool_chunks,
            ["tool-call:bad", "tool-error", "tool-call:echo", "tool-result"]
        );
        assert_eq!(bad.calls().len(), 1);
        assert_eq!(echo.calls(), vec![json!({"y": 2})]);

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let results = seen[0].text().unwrap().messages[2].text();
        assert_eq!(
            results,
            [
                format_tool_result("bad", &json!({"error": "tool execution failed: boom"})),
                format_tool_result("echo", &json!({"y": 2})),
            ]
            .join("\n")
        );
    }

    #[tokio::test]
    async fn failed_continuation_emits_error_and_notice() {
        let handler = ScriptedContinuation::new(true);
        let (transform, _tool) = setup(FakeTool::new("echo", "Echo"), handler);

        let chunks = collect_chunks(transform.apply(upstream(ECHO_BLOCK))).await;
        let n = chunks.len();
        assert!(matches!(&chunks[n - 3], StreamChunk::Error { .. }));
        assert_eq!(
            chunks[n - 2],
            StreamChunk::text_delta("t1", CONTINUATION_FAILED_TEXT)
        );
        assert_eq!(chunks[n - 1].kind(), "finish");
    }
}
