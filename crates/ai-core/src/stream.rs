//! Stream chunks: the wire contract between the engine and its caller.
//!
//! [`StreamChunk`] is a closed tagged union. It serializes with a kebab-case
//! `type` tag and camelCase fields, so consumers written against a provider's
//! native streaming contract keep working when stream transforms are spliced
//! in.

use std::fmt;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;

use crate::messages::{FinishReason, ResponseMetadata, Usage};

/// A boxed stream of chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Per-call rewrite of a chunk stream, composed between provider and caller.
pub type StreamTransform = Box<dyn FnOnce(ChunkStream) -> ChunkStream + Send>;

/// One unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamChunk {
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        text: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningDelta {
        id: String,
        text: String,
    },
    StartStep {
        #[serde(default)]
        request: Value,
        #[serde(default)]
        warnings: Vec<Value>,
    },
    FinishStep {
        finish_reason: FinishReason,
        #[serde(default)]
        usage: Usage,
        #[serde(default)]
        response: ResponseMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        output: Value,
    },
    ToolError {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        error: Value,
    },
    Error {
        error: Value,
    },
    Finish {
        finish_reason: FinishReason,
        #[serde(default)]
        total_usage: Usage,
    },
}

impl StreamChunk {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::StartStep { .. } => "start-step",
            Self::FinishStep { .. } => "finish-step",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::ToolError { .. } => "tool-error",
            Self::Error { .. } => "error",
            Self::Finish { .. } => "finish",
        }
    }

    pub fn text_delta(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn start_step() -> Self {
        Self::StartStep {
            request: Value::Null,
            warnings: Vec::new(),
        }
    }

    pub fn finish_step(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::FinishStep {
            finish_reason,
            usage,
            response: ResponseMetadata::default(),
            provider_metadata: None,
        }
    }

    pub fn finish(finish_reason: FinishReason, total_usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            total_usage,
        }
    }
}

/// A chunk stream wrapped so it can sit inside shared results.
///
/// Hooks observe results by reference from `Send` futures, which needs the
/// result to be `Sync`. The stream itself is only `Send`, so it lives behind
/// a mutex until the caller takes it out.
pub struct StreamHandle {
    stream: Mutex<ChunkStream>,
}

impl StreamHandle {
    pub fn new(stream: ChunkStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Wrap any chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamChunk> + Send + 'static,
    {
        Self::new(Box::pin(stream))
    }

    /// Take the stream out.
    pub fn into_stream(self) -> ChunkStream {
        self.stream.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transform to the wrapped stream.
    pub fn map_stream(self, transform: StreamTransform) -> Self {
        Self::new(transform(self.into_stream()))
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamHandle(..)")
    }
}

/// Compose transforms around `stream`, first transform innermost.
pub fn apply_transforms(stream: ChunkStream, transforms: Vec<StreamTransform>) -> ChunkStream {
    transforms
        .into_iter()
        .fold(stream, |stream, transform| transform(stream))
}

/// Drain a stream into a vector.
pub async fn collect_chunks(stream: ChunkStream) -> Vec<StreamChunk> {
    stream.collect().await
}

/// Concatenated text of every `text-delta` chunk.
pub fn text_of(chunks: &[StreamChunk]) -> String {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::TextDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunk_wire_shape_uses_kebab_tags_and_camel_fields() {
        let chunk = StreamChunk::ToolCall {
            tool_call_id: "echo-0".into(),
            tool_name: "echo".into(),
            input: json!({"x": 1}),
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({"type": "tool-call", "toolCallId": "echo-0", "toolName": "echo", "input": {"x": 1}})
        );
        assert_eq!(chunk.kind(), "tool-call");
    }

    #[test]
    fn finish_step_deserializes_with_defaults() {
        let chunk: StreamChunk =
            serde_json::from_value(json!({"type": "finish-step", "finishReason": "stop"})).unwrap();
        assert_eq!(chunk, StreamChunk::finish_step(FinishReason::Stop, Usage::default()));
    }

    #[test]
    fn finish_serializes_total_usage() {
        let chunk = StreamChunk::finish(FinishReason::Length, Usage::new(1, 2));
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["type"], "finish");
        assert_eq!(value["finishReason"], "length");
        assert_eq!(value["totalUsage"]["totalTokens"], 3);
    }

    #[tokio::test]
    async fn transforms_compose_in_order() {
        let source: ChunkStream = Box::pin(tokio_stream::iter(vec![StreamChunk::text_delta("t", "a")]));
        let append = |suffix: &'static str| -> StreamTransform {
            Box::new(move |input: ChunkStream| -> ChunkStream {
                Box::pin(input.map(move |chunk| match chunk {
                    StreamChunk::TextDelta { id, text } => StreamChunk::TextDelta {
                        id,
                        text: format!("{text}{suffix}"),
                    },
                    other => other,
                }))
            })
        };
        let out = apply_transforms(source, vec![append("1"), append("2")]);
        let chunks = collect_chunks(out).await;
        assert_eq!(text_of(&chunks), "a12");
    }

    #[tokio::test]
    async fn stream_handle_round_trips_stream() {
        let handle = StreamHandle::from_stream(tokio_stream::iter(vec![
            StreamChunk::text_delta("t", "hi"),
            StreamChunk::finish(FinishReason::Stop, Usage::default()),
        ]));
        let chunks = collect_chunks(handle.into_stream()).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].kind(), "finish");
    }
}
