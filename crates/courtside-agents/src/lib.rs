//! Courtside conversational core
//!
//! The matchup multi-agent layer: a vendor-neutral LLM runtime trait, the
//! specialist agents and their tool contracts, and the per-turn controller
//! that plans a workflow, drives the agents over a shared per-matchup
//! context with tool-call recording, and synthesizes the final answer.

pub mod controller;
pub mod encode;
pub mod llm;
pub mod plan;
pub mod tools;

pub use controller::{ControllerOptions, MatchupController, TurnOutcome};
pub use llm::{ChatMessage, LlmReply, LlmRuntime, Role, ScriptedRuntime, ToolCall, ToolSpec};
pub use plan::{PlanStep, TurnPlan};
pub use tools::ToolContext;
