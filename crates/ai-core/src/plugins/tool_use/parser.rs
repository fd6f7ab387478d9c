//! Extraction of `<tool_use>` blocks from buffered model text.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::ToolSet;

const OPEN_TAG: &str = "<tool_use>";
const CLOSE_TAG: &str = "</tool_use>";

/// Progress of one parsed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseStatus {
    Pending,
    Invoking,
    Done,
    Error,
}

/// One tool invocation found in model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUseResult {
    /// `{tool_name}-{index}`, unique within one parse.
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolUseStatus,
}

/// Parse every complete `<tool_use>` block in `text`.
///
/// Blocks naming a tool outside `tools` are dropped with a warning.
/// Arguments that are not valid JSON are kept as the raw string; a block
/// without arguments gets an empty object. Parsing stops at the first
/// unclosed block.
pub fn parse_tool_use(text: &str, tools: &ToolSet) -> Vec<ToolUseResult> {
    let mut results = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_TAG) {
        let after_open = &rest[start + OPEN_TAG.len()..];
        let Some(end) = after_open.find(CLOSE_TAG) else {
            break;
        };
        let block = &after_open[..end];
        rest = &after_open[end + CLOSE_TAG.len()..];

        let Some(name) = tag_content(block, "name").map(str::trim) else {
            log::warn!("tool_use block without a name, skipping");
            continue;
        };
        if !tools.contains(name) {
            log::warn!("model called unknown tool '{name}', skipping");
            continue;
        }

        let arguments = match tag_content(block, "arguments").map(str::trim) {
            None | Some("") => Value::Object(Map::new()),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        };

        results.push(ToolUseResult {
            id: format!("{name}-{}", results.len()),
            tool_name: name.to_string(),
            arguments,
            status: ToolUseStatus::Pending,
        });
    }

    results
}

/// Text between `<tag>` and `</tag>`, if both are present.
fn tag_content<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let len = block[start..].find(&close)?;
    Some(&block[start..start + len])
}
