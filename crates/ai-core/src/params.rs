//! Operation parameters and results.
//!
//! [`CallParams`] and [`CallResult`] are the values that flow through the
//! sequential-chain hooks. Both are closed unions over the operation
//! families the engine knows about.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::cancellation::AbortSignal;
use crate::messages::{
    ImageRequest, ImageResult, LanguageModelRequest, Message, ObjectResult, ResponseFormat,
    TextResult, ToolChoice,
};
use crate::models::ToolSet;
use crate::stream::StreamHandle;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameters of a text generation (streaming or not).
#[derive(Debug, Clone, Default)]
pub struct TextParams {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: ToolSet,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub provider_options: HashMap<String, Value>,
    pub abort_signal: Option<AbortSignal>,
}

impl TextParams {
    /// Parameters for a single user message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    /// Build the provider request. The system prompt becomes the first message.
    pub fn to_request(&self) -> LanguageModelRequest {
        let mut prompt = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = self.system.as_deref().filter(|s| !s.is_empty()) {
            prompt.push(Message::system(system));
        }
        prompt.extend(self.messages.iter().cloned());

        LanguageModelRequest {
            prompt,
            tools: self.tools.specs(),
            tool_choice: self.tool_choice.clone(),
            response_format: None,
            temperature: self.temperature,
            top_p: self.top_p,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: self.stop_sequences.clone(),
            provider_options: self.provider_options.clone(),
            abort_signal: self.abort_signal.clone(),
        }
    }
}

/// Parameters of a structured-object generation.
#[derive(Debug, Clone, Default)]
pub struct ObjectParams {
    pub text: TextParams,
    /// JSON Schema the object must satisfy.
    pub schema: Value,
    pub schema_name: Option<String>,
    pub schema_description: Option<String>,
}

impl ObjectParams {
    pub fn new(text: TextParams, schema: Value) -> Self {
        Self {
            text,
            schema,
            schema_name: None,
            schema_description: None,
        }
    }

    /// Text request with a JSON response format carrying the schema.
    pub fn to_request(&self) -> LanguageModelRequest {
        let mut request = self.text.to_request();
        request.response_format = Some(ResponseFormat::Json {
            schema: Some(self.schema.clone()),
            name: self.schema_name.clone(),
            description: self.schema_description.clone(),
        });
        request
    }
}

/// Parameters of an image generation.
#[derive(Debug, Clone)]
pub struct ImageParams {
    pub prompt: String,
    /// Images to generate. Zero is rejected with `InvalidParams`.
    pub n: u32,
    pub size: Option<String>,
    pub aspect_ratio: Option<String>,
    pub seed: Option<u64>,
    pub provider_options: HashMap<String, Value>,
    pub abort_signal: Option<AbortSignal>,
}

impl ImageParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            n: 1,
            size: None,
            aspect_ratio: None,
            seed: None,
            provider_options: HashMap::new(),
            abort_signal: None,
        }
    }

    pub fn to_request(&self) -> ImageRequest {
        ImageRequest {
            prompt: self.prompt.clone(),
            n: self.n,
            size: self.size.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            seed: self.seed,
            provider_options: self.provider_options.clone(),
            abort_signal: self.abort_signal.clone(),
        }
    }
}

/// Parameters of any operation.
#[derive(Debug, Clone)]
pub enum CallParams {
    Text(TextParams),
    Object(ObjectParams),
    Image(ImageParams),
}

impl CallParams {
    /// Text parameters of a text or object call.
    pub fn text(&self) -> Option<&TextParams> {
        match self {
            Self::Text(p) => Some(p),
            Self::Object(p) => Some(&p.text),
            Self::Image(_) => None,
        }
    }

    pub fn text_mut(&mut self) -> Option<&mut TextParams> {
        match self {
            Self::Text(p) => Some(p),
            Self::Object(p) => Some(&mut p.text),
            Self::Image(_) => None,
        }
    }

    pub fn abort_signal(&self) -> Option<&AbortSignal> {
        match self {
            Self::Image(p) => p.abort_signal.as_ref(),
            other => other.text().and_then(|p| p.abort_signal.as_ref()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Object(_) => "object",
            Self::Image(_) => "image",
        }
    }
}

impl From<TextParams> for CallParams {
    fn from(params: TextParams) -> Self {
        Self::Text(params)
    }
}

impl From<ObjectParams> for CallParams {
    fn from(params: ObjectParams) -> Self {
        Self::Object(params)
    }
}

impl From<ImageParams> for CallParams {
    fn from(params: ImageParams) -> Self {
        Self::Image(params)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of any operation, as seen by result hooks.
pub enum CallResult {
    Text(TextResult),
    Stream(StreamHandle),
    Object(ObjectResult),
    Image(ImageResult),
}

impl CallResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Stream(_) => "stream",
            Self::Object(_) => "object",
            Self::Image(_) => "image",
        }
    }
}

impl fmt::Debug for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(r) => f.debug_tuple("Text").field(r).finish(),
            Self::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
            Self::Object(r) => f.debug_tuple("Object").field(r).finish(),
            Self::Image(r) => f.debug_tuple("Image").field(r).finish(),
        }
    }
}
