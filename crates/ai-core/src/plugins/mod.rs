//! Built-in plugins.

pub mod logging;
pub mod tool_use;

pub use logging::LoggingPlugin;
pub use tool_use::{PromptToolUseConfig, PromptToolUsePlugin};
