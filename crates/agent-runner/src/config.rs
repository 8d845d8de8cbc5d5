//! Runtime configuration
//!
//! Defaults come from the environment; every value can still be overridden
//! per request through [`crate::RunRequest`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agent_core::FileStorage;
use tracing::{info, warn};

use crate::context_window::ContextWindowConfig;
use crate::error::Result;
use crate::policy::ExecutionPolicy;

pub const DEFAULT_DATA_DIR: &str = ".agent-data";
pub const DEFAULT_STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Root directory of the file store
    pub data_dir: PathBuf,
    /// History caps used when a request sets none
    pub context_window: ContextWindowConfig,
    /// Policy used when a request sets none
    pub default_policy: ExecutionPolicy,
    /// Capacity of the channel behind `stream`
    pub stream_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            context_window: ContextWindowConfig::default(),
            default_policy: ExecutionPolicy::default(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from `AGENT_RUNNER_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("AGENT_RUNNER_DATA_DIR")
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let context_window = ContextWindowConfig {
            max_messages: env_number(&lookup, "AGENT_RUNNER_MAX_HISTORY_MESSAGES"),
            max_tokens: env_number(&lookup, "AGENT_RUNNER_MAX_HISTORY_TOKENS"),
        };

        let default_policy = ExecutionPolicy {
            timeout: env_number(&lookup, "AGENT_RUNNER_TIMEOUT_SECS").map(Duration::from_secs),
            retries: env_number(&lookup, "AGENT_RUNNER_RETRIES").unwrap_or(0),
            propagate_cancellation: env_flag(&lookup, "AGENT_RUNNER_PROPAGATE_CANCELLATION", true),
            max_tool_calls: env_number(&lookup, "AGENT_RUNNER_MAX_TOOL_CALLS"),
        };

        let stream_buffer = env_number::<usize>(&lookup, "AGENT_RUNNER_STREAM_BUFFER")
            .filter(|size| *size > 0)
            .unwrap_or(defaults.stream_buffer);

        Self {
            data_dir,
            context_window,
            default_policy,
            stream_buffer,
        }
    }

    /// Open the file store under `data_dir`
    pub async fn open_storage(&self) -> Result<FileStorage> {
        info!("Using data directory: {:?}", self.data_dir);
        Ok(FileStorage::open(&self.data_dir).await?)
    }
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                warn!("Ignoring {}={:?}: not a boolean", name, other);
                default
            }
        },
        None => default,
    }
}

fn env_number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}
