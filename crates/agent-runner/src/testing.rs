//! Scripted models, tools and hooks shared by the unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_core::{OpaqueValue, Run, ToolCall};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream;

use crate::error::{Result, RuntimeError};
use crate::hooks::{HookContext, PostHook, PreHook, SummaryHook, SummaryInput};
use crate::model::{Model, ModelDelta, ModelRequest, ModelResponse, ModelStream};
use crate::tool::{Tool, ToolError};

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, OpaqueValue::from(arguments))
}

/// Replays a fixed list of responses and records every request
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
    chunk_size: Option<usize>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelResponse>>) -> Self {
        Self {
            name: "scripted".to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            chunk_size: None,
        }
    }

    pub fn final_text(text: &str) -> Self {
        Self::new(vec![Ok(ModelResponse::text(text))])
    }

    /// The same answer for every call
    pub fn repeating(text: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(ModelResponse::text(text))).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stream text in chunks of `size` characters
    pub fn with_chunks(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn next(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RuntimeError::model("script exhausted")))
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "test"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.next(request).await
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let response = self.next(request).await?;
        let size = self.chunk_size.unwrap_or(usize::MAX);
        let chars: Vec<char> = response.message.content.chars().collect();
        let mut items: Vec<Result<ModelDelta>> = chars
            .chunks(size.max(1))
            .map(|chunk| Ok(ModelDelta::Text(chunk.iter().collect())))
            .collect();
        items.push(Ok(ModelDelta::Finished(response)));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Returns its arguments
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn description(&self) -> &str {
        "Echoes its arguments"
    }

    async fn call(&self, arguments: OpaqueValue) -> std::result::Result<OpaqueValue, ToolError> {
        Ok(arguments)
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    async fn call(&self, _arguments: OpaqueValue) -> std::result::Result<OpaqueValue, ToolError> {
        Err(ToolError::failed("tool failed"))
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    async fn call(&self, _arguments: OpaqueValue) -> std::result::Result<OpaqueValue, ToolError> {
        panic!("tool crashed")
    }
}

/// Replaces the outbound message text
pub struct RewriteHook {
    text: String,
}

impl RewriteHook {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl PreHook for RewriteHook {
    async fn run(&self, context: &mut HookContext) -> anyhow::Result<()> {
        context.message.content = self.text.clone();
        Ok(())
    }
}

/// Writes one session-data entry
pub struct SessionDataHook {
    key: String,
    value: serde_json::Value,
}

impl SessionDataHook {
    pub fn new(key: &str, value: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }
}

#[async_trait]
impl PreHook for SessionDataHook {
    async fn run(&self, context: &mut HookContext) -> anyhow::Result<()> {
        context
            .session_data
            .insert(self.key.clone(), OpaqueValue::from(self.value.clone()));
        Ok(())
    }
}

/// Records the message a pre-hook saw, or the status a post-hook saw
#[derive(Clone, Default)]
pub struct RecordingHook {
    seen: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PreHook for RecordingHook {
    async fn run(&self, context: &mut HookContext) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(context.message.content.clone());
        Ok(())
    }
}

#[async_trait]
impl PostHook for RecordingHook {
    async fn run(&self, _context: &HookContext, run: &Run) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(run.status.as_str().to_string());
        Ok(())
    }
}

pub struct FailingPreHook;

#[async_trait]
impl PreHook for FailingPreHook {
    async fn run(&self, _context: &mut HookContext) -> anyhow::Result<()> {
        Err(anyhow!("pre hook rejected the message"))
    }
}

/// Fails after an optional delay
pub struct FailingPostHook {
    delay: Duration,
}

impl FailingPostHook {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PostHook for FailingPostHook {
    async fn run(&self, _context: &HookContext, _run: &Run) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        Err(anyhow!("post hook failed"))
    }
}

/// Always proposes the same summary and counts its calls
#[derive(Clone)]
pub struct FixedSummaryHook {
    text: String,
    calls: Arc<Mutex<Vec<SummaryInput>>>,
}

impl FixedSummaryHook {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> Vec<SummaryInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummaryHook for FixedSummaryHook {
    async fn summarize(&self, input: &SummaryInput) -> anyhow::Result<Option<String>> {
        self.calls.lock().unwrap().push(input.clone());
        Ok(Some(self.text.clone()))
    }
}

pub struct FailingSummaryHook;

#[async_trait]
impl SummaryHook for FailingSummaryHook {
    async fn summarize(&self, _input: &SummaryInput) -> anyhow::Result<Option<String>> {
        Err(anyhow!("summarizer unavailable"))
    }
}
