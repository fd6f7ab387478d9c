//! Core data models shared by the engine, plugins, and resolvers.
//!
//! - [`ModelKind`] / [`OperationKind`] — what is being resolved and invoked
//! - [`ModelHandle`] / [`ModelRef`] — resolved models and caller references
//! - [`LifecycleState`] — engine state machine positions
//! - [`ToolSet`] — named tools handed to a call

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::messages::ToolSpec;
use crate::traits::{ImageModel, LanguageModel, Tool};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of model a provider can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Language,
    Embedding,
    Image,
    Transcription,
    Speech,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Language => "language",
            Self::Embedding => "embedding",
            Self::Image => "image",
            Self::Transcription => "transcription",
            Self::Speech => "speech",
        };
        f.write_str(name)
    }
}

/// Operation performed by one engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    GenerateText,
    StreamText,
    GenerateObject,
    StreamObject,
    GenerateImage,
}

impl OperationKind {
    /// Streaming operations get stream transforms spliced in.
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::StreamText | Self::StreamObject)
    }

    /// The model kind this operation resolves.
    pub fn model_kind(self) -> ModelKind {
        match self {
            Self::GenerateImage => ModelKind::Image,
            _ => ModelKind::Language,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateText => "generate_text",
            Self::StreamText => "stream_text",
            Self::GenerateObject => "generate_object",
            Self::StreamObject => "stream_object",
            Self::GenerateImage => "generate_image",
        }
    }
}

/// Position of a call in the engine lifecycle.
///
/// ```text
/// Created → ContextConfigured → Started → ModelResolved → ParamsTransformed
///         → Invoked → ResultTransformed → Completed
///                    (Error reachable from Started onwards)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Created,
    ContextConfigured,
    Started,
    ModelResolved,
    ParamsTransformed,
    Invoked,
    ResultTransformed,
    Completed,
    Error,
}

// ---------------------------------------------------------------------------
// Model handles
// ---------------------------------------------------------------------------

/// A resolved, ready-to-invoke model.
#[derive(Clone)]
pub enum ModelHandle {
    Language(Arc<dyn LanguageModel>),
    Image(Arc<dyn ImageModel>),
}

impl ModelHandle {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Language(_) => ModelKind::Language,
            Self::Image(_) => ModelKind::Image,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Language(m) => m.provider(),
            Self::Image(m) => m.provider(),
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            Self::Language(m) => m.model_id(),
            Self::Image(m) => m.model_id(),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind())
            .field("provider", &self.provider())
            .field("model_id", &self.model_id())
            .finish()
    }
}

/// What the caller passes as `model`: an identifier or a concrete handle.
#[derive(Debug, Clone)]
pub enum ModelRef {
    Id(String),
    Handle(ModelHandle),
}

impl ModelRef {
    /// The identifier, or the handle's own model id.
    pub fn model_id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Handle(handle) => handle.model_id(),
        }
    }
}

impl From<&str> for ModelRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<ModelHandle> for ModelRef {
    fn from(handle: ModelHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<Arc<dyn LanguageModel>> for ModelRef {
    fn from(model: Arc<dyn LanguageModel>) -> Self {
        Self::Handle(ModelHandle::Language(model))
    }
}

impl From<Arc<dyn ImageModel>> for ModelRef {
    fn from(model: Arc<dyn ImageModel>) -> Self {
        Self::Handle(ModelHandle::Image(model))
    }
}

// ---------------------------------------------------------------------------
// ToolSet
// ---------------------------------------------------------------------------

/// Tools available to a call, keyed by tool name.
///
/// Iteration order is by name so prompts built from a set are stable.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool under its own name, replacing any tool with that name.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.insert(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Specs for every tool, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

impl FromIterator<Arc<dyn Tool>> for ToolSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tool>>>(iter: I) -> Self {
        let mut set = Self::new();
        for tool in iter {
            set.insert(tool);
        }
        set
    }
}
