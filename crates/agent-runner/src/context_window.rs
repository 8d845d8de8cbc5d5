//! Context window compaction
//!
//! History is kept newest-first until a message or token cap would be
//! exceeded; everything older is dropped and may be folded into the session's
//! rolling summary by the agent's summary hook.

use agent_core::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hooks::{RegisteredSummaryHook, SummaryInput};

const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:";

/// History caps; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWindowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl ContextWindowConfig {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_messages.is_none() && self.max_tokens.is_none()
    }
}

/// Rough token cost of a message: a quarter of its characters, at least one
pub fn estimate_tokens(message: &Message) -> usize {
    let mut chars = message.content.chars().count();
    for call in &message.tool_calls {
        chars += call.name.chars().count();
        chars += call.arguments.to_string().chars().count();
    }
    chars.div_ceil(4).max(1)
}

/// Result of splitting history against the caps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compaction {
    /// Kept messages, in their original order
    pub retained: Vec<Message>,
    /// Dropped messages, in their original order
    pub dropped: Vec<Message>,
}

/// Split `history` into retained and dropped messages.
///
/// System messages are always retained and do not count against the caps.
/// A tool result whose requesting assistant message was dropped is dropped too.
pub fn compact(history: &[Message], config: &ContextWindowConfig) -> Compaction {
    if config.is_unlimited() {
        return Compaction {
            retained: history.to_vec(),
            dropped: Vec::new(),
        };
    }

    // Index of the oldest non-system message that is kept.
    let mut cutoff = history.len();
    let mut count = 0usize;
    let mut tokens = 0usize;
    for (index, message) in history.iter().enumerate().rev() {
        if message.is_system() {
            continue;
        }
        let cost = estimate_tokens(message);
        let over_messages = config.max_messages.is_some_and(|max| count + 1 > max);
        let over_tokens = config.max_tokens.is_some_and(|max| tokens + cost > max);
        if over_messages || over_tokens {
            break;
        }
        count += 1;
        tokens += cost;
        cutoff = index;
    }

    // Skip tool results orphaned by the cut.
    while let Some(message) = history.get(cutoff) {
        if message.role == MessageRole::Tool {
            cutoff += 1;
        } else if message.is_system() && cutoff < history.len() {
            cutoff += 1;
        } else {
            break;
        }
    }

    let mut compaction = Compaction::default();
    for (index, message) in history.iter().enumerate() {
        if message.is_system() || index >= cutoff {
            compaction.retained.push(message.clone());
        } else {
            compaction.dropped.push(message.clone());
        }
    }
    compaction
}

/// History prepared for one invocation
#[derive(Debug, Clone, Default)]
pub struct PreparedHistory {
    /// Summary message (if any) followed by the retained messages
    pub messages: Vec<Message>,
    /// The session summary after this preparation
    pub summary: Option<String>,
    /// Whether `summary` differs from what the session had
    pub summary_changed: bool,
    pub dropped_count: usize,
}

/// Applies the configured caps and runs the summary hook
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextWindowManager {
    config: ContextWindowConfig,
}

impl ContextWindowManager {
    pub fn new(config: ContextWindowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ContextWindowConfig {
        self.config
    }

    /// Compact `history` and refresh the summary.
    ///
    /// A failing summary hook is logged and leaves the summary as it was.
    pub async fn prepare(
        &self,
        history: &[Message],
        existing_summary: Option<&str>,
        summary_hook: Option<&RegisteredSummaryHook>,
        override_config: Option<ContextWindowConfig>,
    ) -> PreparedHistory {
        let config = override_config.unwrap_or(self.config);
        let Compaction { retained, dropped } = compact(history, &config);
        let mut summary = existing_summary.map(str::to_string);
        let mut summary_changed = false;

        if !dropped.is_empty() {
            debug!(
                dropped = dropped.len(),
                retained = retained.len(),
                "History exceeds context window"
            );
            if let Some(registered) = summary_hook {
                let input = SummaryInput {
                    existing_summary: summary.clone(),
                    dropped: dropped.clone(),
                    retained: retained.clone(),
                    config,
                };
                match registered.hook.summarize(&input).await {
                    Ok(Some(updated)) if !updated.is_empty() => {
                        summary_changed = summary.as_deref() != Some(updated.as_str());
                        summary = Some(updated);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(hook = %registered.name, error = %format!("{:#}", e), "Summary hook failed, keeping existing summary")
                    }
                }
            }
        }

        let mut messages = Vec::with_capacity(retained.len() + 1);
        if let Some(text) = summary.as_deref().filter(|s| !s.is_empty()) {
            messages.push(Message::system(format!("{}\n{}", SUMMARY_PREFIX, text)));
        }
        messages.extend(retained);

        PreparedHistory {
            messages,
            summary,
            summary_changed,
            dropped_count: dropped.len(),
        }
    }
}
