//! Inference adapter boundary
//!
//! Everything the orchestration layer knows about the LLM backend goes
//! through these types: a message list in, an `InferenceResponse` out, and a
//! closed set of error kinds. Backends classify their own failures so callers
//! never inspect error messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown inference failure: {0}")]
    Unknown(String),
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Declaration of a tool bound to a request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    Human(String),
    Ai {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of a tool call; `call_id` must match the originating `ToolCall::id`
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage::System(text.into())
    }

    pub fn human(text: impl Into<String>) -> Self {
        ChatMessage::Human(text.into())
    }

    pub fn ai(text: impl Into<String>) -> Self {
        ChatMessage::Ai {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl InferenceResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat model that optionally calls tools
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<InferenceResponse, InferenceError>;
}

/// Extract the outermost `{ ... }` object from model text, tolerating
/// markdown fences and surrounding prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let body = match text.find("```json") {
        Some(start) => {
            let after = &text[start + 7..];
            &after[..after.find("```").unwrap_or(after.len())]
        }
        None => text,
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }

    serde_json::from_str::<Value>(&body[start..=end])
        .ok()
        .filter(Value::is_object)
}
