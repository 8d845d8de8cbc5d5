//! Model capability
//!
//! A model turns a transcript into either a final assistant message or a set of
//! tool-call requests. Streaming models deliver the same result incrementally.

use std::collections::HashMap;
use std::pin::Pin;

use agent_core::{Message, OpaqueValue, ToolCall};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tool::ToolSpec;

/// Generation parameters forwarded to the model untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Provider-specific parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, OpaqueValue>,
}

/// Token usage reported by a model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Everything the model sees for one call
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub transcript: Vec<Message>,
    pub options: GenerationOptions,
    /// Tools the model may ask for in this run
    pub tools: Vec<ToolSpec>,
}

/// A complete model answer
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// The assistant message; tool calls, if any, live on `message.tool_calls`
    pub message: Message,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// A final text answer
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            usage: None,
        }
    }

    /// A request to run tools
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            message: Message::assistant_with_tool_calls("", calls),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_final(&self) -> bool {
        !self.message.has_tool_calls()
    }
}

/// Incremental piece of a streamed model answer
#[derive(Debug, Clone)]
pub enum ModelDelta {
    /// A chunk of assistant text
    Text(String),
    /// The structured result; always the last item of a well-formed stream
    Finished(ModelResponse),
}

/// A lazy, finite, non-restartable sequence of deltas
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta>> + Send>>;

/// A language model backend
#[async_trait]
pub trait Model: Send + Sync {
    /// Model name, as recorded on runs
    fn name(&self) -> &str;

    /// Provider name, as recorded on runs
    fn provider(&self) -> &str {
        "unknown"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse>;

    /// Stream the answer.
    ///
    /// The default implementation calls [`Model::generate`] and replays the
    /// result as one text delta followed by the finished response.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let response = self.generate(request).await?;
        let mut items = Vec::with_capacity(2);
        if !response.message.content.is_empty() {
            items.push(Ok(ModelDelta::Text(response.message.content.clone())));
        }
        items.push(Ok(ModelDelta::Finished(response)));
        Ok(Box::pin(stream::iter(items)))
    }
}
