//! Tool-use system prompt and markup formatting.
//!
//! Tools are described to the model in the system prompt. The model calls
//! them with
//!
//! ```text
//! <tool_use>
//!   <name>NAME</name>
//!   <arguments>JSON</arguments>
//! </tool_use>
//! ```
//!
//! and receives each outcome in a `<tool_use_result>` block.

use serde_json::Value;

use crate::models::ToolSet;

pub const TOOL_USE_EXAMPLES_PLACEHOLDER: &str = "{{ TOOL_USE_EXAMPLES }}";
pub const AVAILABLE_TOOLS_PLACEHOLDER: &str = "{{ AVAILABLE_TOOLS }}";
pub const USER_SYSTEM_PROMPT_PLACEHOLDER: &str = "{{ USER_SYSTEM_PROMPT }}";

/// Template used when no custom one is configured.
pub const DEFAULT_SYSTEM_PROMPT_TEMPLATE: &str = r#"You can call tools to help with the user's request. To call a tool, write a tool_use block in your reply:

<tool_use>
  <name>{tool name}</name>
  <arguments>{JSON object matching the tool's input schema}</arguments>
</tool_use>

Each call's outcome comes back in a tool_use_result block in the next user message. Read it and continue from there.

## Examples

{{ TOOL_USE_EXAMPLES }}

## Available tools

{{ AVAILABLE_TOOLS }}

## Rules

1. Only call tools listed under "Available tools", with their exact names.
2. The arguments must be one valid JSON object.
3. You may write several tool_use blocks in one reply. They run in the order written.
4. Never write a tool_use_result block yourself.
5. When no tool is needed, answer directly.

{{ USER_SYSTEM_PROMPT }}"#;

const TOOL_USE_EXAMPLES: &str = r#"User: What is the weather in Paris?
Assistant: <tool_use>
  <name>get_weather</name>
  <arguments>{"city": "Paris"}</arguments>
</tool_use>

User: <tool_use_result>
  <name>get_weather</name>
  <result>{"temperature": 18, "sky": "clear"}</result>
</tool_use_result>
Assistant: It is 18°C with a clear sky in Paris."#;

/// XML listing of `tools`: name, description and input schema.
pub fn available_tools(tools: &ToolSet) -> String {
    let mut out = String::from("<tools>\n");
    for tool in tools.iter() {
        out.push_str("<tool>\n");
        out.push_str(&format!("  <name>{}</name>\n", tool.name()));
        out.push_str(&format!("  <description>{}</description>\n", tool.description()));
        out.push_str(&format!("  <arguments>{}</arguments>\n", tool.input_schema()));
        out.push_str("</tool>\n");
    }
    out.push_str("</tools>");
    out
}

/// Fill `template` (or the default one) for `tools` and the caller's own
/// system prompt.
pub fn build_system_prompt(
    tools: &ToolSet,
    user_system_prompt: Option<&str>,
    template: Option<&str>,
) -> String {
    template
        .unwrap_or(DEFAULT_SYSTEM_PROMPT_TEMPLATE)
        .replace(TOOL_USE_EXAMPLES_PLACEHOLDER, TOOL_USE_EXAMPLES)
        .replace(AVAILABLE_TOOLS_PLACEHOLDER, &available_tools(tools))
        .replace(USER_SYSTEM_PROMPT_PLACEHOLDER, user_system_prompt.unwrap_or_default())
        .trim_end()
        .to_string()
}

/// One `<tool_use_result>` block.
pub fn format_tool_result(tool_name: &str, result: &Value) -> String {
    format!(
        "<tool_use_result>\n  <name>{tool_name}</name>\n  <result>{result}</result>\n</tool_use_result>"
    )
}
