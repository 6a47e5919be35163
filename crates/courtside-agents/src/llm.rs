//! LLM runtime abstraction
//!
//! The controller never depends on vendor message objects: an agent is a
//! (system prompt, tool set) pairing over this trait, which exposes chat
//! completion with tool calls and structured JSON output. Tool-validation
//! errors surface back to the caller for recording instead of aborting the
//! request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use courtside_types::{CourtsideError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a runtime conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Declared tool: name, description, JSON argument schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One completion step: either final text or a batch of tool calls.
#[derive(Debug, Clone)]
pub enum LlmReply {
    Final(String),
    ToolCalls(Vec<ToolCall>),
}

/// Chat completion with tool calling plus structured JSON output.
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        temperature: f32,
    ) -> Result<LlmReply>;

    /// Structured JSON completion (used by the planner).
    async fn structured(&self, system: &str, prompt: &str) -> Result<Value>;
}

/// Deterministic runtime for tests: replies are consumed in order from
/// queues; an exhausted queue is an LLM error (exercising the
/// controller's fallbacks).
#[derive(Default)]
pub struct ScriptedRuntime {
    chat_replies: Mutex<VecDeque<LlmReply>>,
    structured_replies: Mutex<VecDeque<Value>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, reply: LlmReply) {
        self.chat_replies
            .lock()
            .expect("scripted runtime lock")
            .push_back(reply);
    }

    pub fn push_structured(&self, value: Value) {
        self.structured_replies
            .lock()
            .expect("scripted runtime lock")
            .push_back(value);
    }
}

#[async_trait]
impl LlmRuntime for ScriptedRuntime {
    async fn chat(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _temperature: f32,
    ) -> Result<LlmReply> {
        self.chat_replies
            .lock()
            .expect("scripted runtime lock")
            .pop_front()
            .ok_or_else(|| CourtsideError::Llm("scripted runtime has no chat reply queued".to_string()))
    }

    async fn structured(&self, _system: &str, _prompt: &str) -> Result<Value> {
        self.structured_replies
            .lock()
            .expect("scripted runtime lock")
            .pop_front()
            .ok_or_else(|| {
                CourtsideError::Llm("scripted runtime has no structured reply queued".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_runtime_pops_in_order_then_errors() {
        let runtime = ScriptedRuntime::new();
        runtime.push_chat(LlmReply::Final("one".to_string()));
        runtime.push_chat(LlmReply::Final("two".to_string()));
        match runtime.chat("", &[], &[], 0.0).await.unwrap() {
            LlmReply::Final(text) => assert_eq!(text, "one"),
            _ => panic!("expected final"),
        }
        match runtime.chat("", &[], &[], 0.0).await.unwrap() {
            LlmReply::Final(text) => assert_eq!(text, "two"),
            _ => panic!("expected final"),
        }
        assert!(runtime.chat("", &[], &[], 0.0).await.is_err());
    }

    #[tokio::test]
    async fn structured_queue_is_independent() {
        let runtime = ScriptedRuntime::new();
        runtime.push_structured(json!({"workflow": []}));
        assert_eq!(
            runtime.structured("", "").await.unwrap(),
            json!({"workflow": []})
        );
        assert!(runtime.structured("", "").await.is_err());
    }
}
