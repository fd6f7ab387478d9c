//! ai-core: provider-agnostic orchestration engine for LLM operations.
//!
//! Text generation, text streaming, structured-object generation and image
//! generation all run through one plugin lifecycle. Providers register in a
//! shared registry; plugins resolve models, rewrite parameters and results,
//! and splice transforms into streams.
//!
//! # Crate Organization
//!
//! - `errors` -- All error types (AiCoreError, ProviderError, etc.)
//! - `messages` -- Chat messages, requests and results
//! - `models` -- Model kinds, handles, references and tool sets
//! - `traits` -- Provider, model and tool contracts
//! - `cancellation` -- AbortSignal passed through to providers and tools
//! - `stream` -- Stream chunks and stream transforms
//! - `params` -- Operation parameters and results
//! - `context` -- Per-call RequestContext and recursive continuation
//! - `registry` -- ProviderRegistry with aliases
//! - `resolver` -- ModelResolver from id strings to models
//! - `middleware` -- Language-model middleware
//! - `plugin` -- Plugin contract and builders
//! - `hooks` -- PluginManager hook dispatch strategies
//! - `engine` -- PluginEngine request lifecycle
//! - `plugins` -- Built-in prompt tool-use and logging plugins
//! - `config` -- ExecutorConfig loading
//! - `executor` -- RuntimeExecutor public entry point
//! - `testing` -- Fakes for tests

pub mod cancellation;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod hooks;
pub mod messages;
pub mod middleware;
pub mod models;
pub mod params;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod stream;
pub mod testing;
pub mod traits;

pub use config::ExecutorConfig;
pub use context::RequestContext;
pub use engine::PluginEngine;
pub use errors::AiCoreError;
pub use executor::RuntimeExecutor;
pub use hooks::PluginManager;
pub use models::{ModelHandle, ModelRef, ToolSet};
pub use params::{CallParams, CallResult, ImageParams, ObjectParams, TextParams};
pub use plugin::{define_plugin, define_plugin_factory, Plugin, PluginBuilder};
pub use registry::ProviderRegistry;
pub use stream::StreamChunk;
