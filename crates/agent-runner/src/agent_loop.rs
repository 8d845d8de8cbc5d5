//! The agent-model-tool loop
//!
//! One attempt walks `Building -> AwaitingModel -> HandlingToolCalls ->
//! ExecutingTools -> AwaitingModel ...` until the model returns a final message
//! or something fails. Everything the attempt produces is written to a
//! [`TraceRecorder`] as it happens, so a timed-out or cancelled attempt still
//! leaves an auditable trail.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use agent_core::{Message, Run, ToolCall, ToolExecution};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};
use crate::model::{GenerationOptions, Model, ModelDelta, ModelRequest, ModelResponse, Usage};
use crate::tool::{Tool, ToolError, ToolSet};

/// Item of a streamed invocation
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of assistant text
    Delta(String),
    /// The model asked for a tool
    ToolCall(ToolCall),
    /// A tool finished
    ToolResult(ToolExecution),
    /// The run is finalized and persisted; always the last item
    Completed(Box<Run>),
}

/// Where a streaming loop sends its events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Result<StreamEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Result<StreamEvent>>) -> Self {
        Self { tx }
    }

    /// Send an event; a dropped receiver is not an error for the run
    pub async fn send(&self, event: StreamEvent) {
        if self.tx.send(Ok(event)).await.is_err() {
            debug!("Stream receiver dropped");
        }
    }
}

/// What one attempt has produced so far
#[derive(Debug, Clone, Default)]
pub struct LoopTrace {
    /// Messages produced after the user message
    pub messages: Vec<Message>,
    pub tool_executions: Vec<ToolExecution>,
    pub model_calls: u32,
    pub usage: Usage,
}

/// Shared handle to the current attempt's trace
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    inner: Arc<Mutex<LoopTrace>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopTrace> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        *self.lock() = LoopTrace::default();
    }

    fn push_message(&self, message: Message) {
        self.lock().messages.push(message);
    }

    fn push_execution(&self, execution: ToolExecution) {
        self.lock().tool_executions.push(execution);
    }

    fn model_call(&self, usage: Option<Usage>) {
        let mut trace = self.lock();
        trace.model_calls += 1;
        if let Some(usage) = usage {
            trace.usage.add(usage);
        }
    }

    pub fn snapshot(&self) -> LoopTrace {
        self.lock().clone()
    }
}

/// States of one attempt
#[derive(Debug)]
enum LoopState {
    Building,
    AwaitingModel,
    HandlingToolCalls(Vec<ToolCall>),
    ExecutingTools(Vec<PlannedCall>),
    Done(Message),
}

/// A requested call after permission checks
enum PlannedCall {
    Execute(ToolCall, Arc<dyn Tool>),
    Rejected(ToolCall, RuntimeError),
}

impl std::fmt::Debug for PlannedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute(call, _) => f.debug_tuple("Execute").field(&call.name).finish(),
            Self::Rejected(call, err) => f.debug_tuple("Rejected").field(&call.name).field(err).finish(),
        }
    }
}

/// Everything one attempt needs besides the transcript
pub struct AgentLoop {
    model: Arc<dyn Model>,
    tools: ToolSet,
    generation: GenerationOptions,
    max_tool_calls: Option<usize>,
    events: Option<EventSink>,
    trace: TraceRecorder,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn Model>, tools: ToolSet, generation: GenerationOptions) -> Self {
        Self {
            model,
            tools,
            generation,
            max_tool_calls: None,
            events: None,
            trace: TraceRecorder::new(),
        }
    }

    pub fn with_max_tool_calls(mut self, max: Option<usize>) -> Self {
        self.max_tool_calls = max;
        self
    }

    /// Stream model output to `sink` instead of waiting for whole answers
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    /// Run one attempt from `base`, which ends with the user message.
    ///
    /// Returns the final assistant message.
    pub async fn run(&self, base: &[Message], cancel: CancellationToken) -> Result<Message> {
        let mut state = LoopState::Building;
        let mut transcript: Vec<Message> = Vec::new();
        let mut tool_calls_used = 0usize;

        loop {
            state = match state {
                LoopState::Building => {
                    self.trace.reset();
                    transcript = base.to_vec();
                    tool_calls_used = 0;
                    LoopState::AwaitingModel
                }
                LoopState::AwaitingModel => {
                    if cancel.is_cancelled() {
                        return Err(RuntimeError::Cancelled);
                    }
                    let response = self.call_model(&transcript).await?;
                    self.trace.model_call(response.usage);

                    let message = response.message;
                    self.trace.push_message(message.clone());
                    transcript.push(message.clone());

                    if message.has_tool_calls() {
                        LoopState::HandlingToolCalls(message.tool_calls.clone())
                    } else if message.content.is_empty() && message.payload.is_none() {
                        return Err(RuntimeError::NoResponseFromModel);
                    } else {
                        LoopState::Done(message)
                    }
                }
                LoopState::HandlingToolCalls(calls) => {
                    let planned = self.plan(calls).await;
                    let permitted = planned
                        .iter()
                        .filter(|p| matches!(p, PlannedCall::Execute(..)))
                        .count();

                    if let Some(limit) = self.max_tool_calls {
                        let requested = tool_calls_used + permitted;
                        if requested > limit {
                            warn!(limit, requested, "Tool call limit exceeded");
                            return Err(RuntimeError::ToolCallLimitExceeded { limit, requested });
                        }
                    }
                    tool_calls_used += permitted;
                    LoopState::ExecutingTools(planned)
                }
                LoopState::ExecutingTools(planned) => {
                    if cancel.is_cancelled() {
                        return Err(RuntimeError::Cancelled);
                    }
                    for message in self.execute(planned).await? {
                        self.trace.push_message(message.clone());
                        transcript.push(message);
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(message) => return Ok(message),
            };
        }
    }

    async fn call_model(&self, transcript: &[Message]) -> Result<ModelResponse> {
        let request = ModelRequest {
            transcript: transcript.to_vec(),
            options: self.generation.clone(),
            tools: self.tools.specs(),
        };
        debug!(model = self.model.name(), messages = request.transcript.len(), "Calling model");

        let Some(sink) = &self.events else {
            return self.model.generate(request).await;
        };

        let mut stream = self.model.stream(request).await?;
        let mut buffered = String::new();
        let mut finished = None;
        while let Some(item) = stream.next().await {
            match item? {
                ModelDelta::Text(text) => {
                    buffered.push_str(&text);
                    sink.send(StreamEvent::Delta(text)).await;
                }
                ModelDelta::Finished(response) => {
                    finished = Some(response);
                    break;
                }
            }
        }

        match finished {
            Some(mut response) => {
                if response.message.content.is_empty() {
                    response.message.content = buffered;
                }
                Ok(response)
            }
            None if !buffered.is_empty() => Ok(ModelResponse::text(buffered)),
            None => Err(RuntimeError::NoResponseFromModel),
        }
    }

    async fn plan(&self, calls: Vec<ToolCall>) -> Vec<PlannedCall> {
        let mut planned = Vec::with_capacity(calls.len());
        for call in calls {
            if let Some(sink) = &self.events {
                sink.send(StreamEvent::ToolCall(call.clone())).await;
            }
            match self.tools.permit(&call.name) {
                Ok(tool) => planned.push(PlannedCall::Execute(call, tool)),
                Err(err) => {
                    debug!(tool = %call.name, error = %err, "Rejecting tool call");
                    planned.push(PlannedCall::Rejected(call, err));
                }
            }
        }
        planned
    }

    /// Run permitted calls concurrently; results come back in request order
    async fn execute(&self, planned: Vec<PlannedCall>) -> Result<Vec<Message>> {
        let mut set = JoinSet::new();
        for (index, entry) in planned.iter().enumerate() {
            if let PlannedCall::Execute(call, tool) = entry {
                let call = call.clone();
                let tool = Arc::clone(tool);
                set.spawn(async move {
                    let started = Instant::now();
                    let result = tool.call(call.arguments.clone()).await;
                    (index, result, started.elapsed().as_millis() as u64)
                });
            }
        }

        let mut outputs: Vec<Option<(std::result::Result<_, ToolError>, u64)>> =
            (0..planned.len()).map(|_| None).collect();
        let mut join_failure = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result, duration_ms)) => outputs[index] = Some((result, duration_ms)),
                Err(e) => join_failure = Some(e.to_string()),
            }
        }

        let mut messages = Vec::with_capacity(planned.len());
        for (entry, output) in planned.into_iter().zip(outputs) {
            match entry {
                PlannedCall::Rejected(call, err) => {
                    messages.push(Message::tool_result(&call.id, format!("Error: {}", err), None));
                }
                PlannedCall::Execute(call, _) => {
                    let Some((result, duration_ms)) = output else {
                        return Err(RuntimeError::ToolInfrastructure {
                            tool: call.name,
                            message: join_failure.unwrap_or_else(|| "tool task was lost".to_string()),
                        });
                    };
                    let (execution, message) = match result {
                        Ok(value) => (
                            ToolExecution::succeeded(&call, value.clone(), duration_ms),
                            Message::tool_result(&call.id, value.to_string(), Some(value)),
                        ),
                        Err(e) => {
                            debug!(tool = %call.name, error = %e, "Tool returned an error");
                            (
                                ToolExecution::failed(&call, e.to_string(), duration_ms),
                                Message::tool_result(&call.id, format!("Error: {}", e), None),
                            )
                        }
                    };
                    self.trace.push_execution(execution.clone());
                    if let Some(sink) = &self.events {
                        sink.send(StreamEvent::ToolResult(execution)).await;
                    }
                    messages.push(message);
                }
            }
        }
        Ok(messages)
    }
}
