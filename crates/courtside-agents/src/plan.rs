//! Turn plans and labeled JSON extraction
//!
//! The planner returns a JSON turn plan (narrative, ordered workflow,
//! synthesis instructions). Anything unparseable falls back to a fixed
//! deterministic plan. Stats output may embed a labeled
//! `AuditResultsJSON:` block whose high-severity contradictions drive the
//! bounded re-inspection loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, Role};

pub const AGENT_PLANNER: &str = "planner";
pub const AGENT_MODEL_INSPECTOR: &str = "model_inspector";
pub const AGENT_STATS: &str = "stats_agent";
pub const AGENT_RESEARCH: &str = "research_media_agent";
pub const AGENT_EXPERIMENTER: &str = "experimenter";
pub const AGENT_SYNTHESIZER: &str = "final_synthesizer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub agent: String,
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnPlan {
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub workflow: Vec<PlanStep>,
    #[serde(default)]
    pub final_synthesis_instructions: String,
}

impl TurnPlan {
    /// Best-effort decode of a planner reply; steps missing an agent name
    /// are dropped.
    pub fn from_value(value: &Value) -> Option<TurnPlan> {
        let mut plan: TurnPlan = serde_json::from_value(value.clone()).ok()?;
        plan.workflow.retain(|s| !s.agent.is_empty());
        if plan.workflow.is_empty() {
            return None;
        }
        Some(plan)
    }

    /// Fixed deterministic plan used when the planner output is unusable.
    pub fn default_plan(user_message: &str) -> TurnPlan {
        TurnPlan {
            narrative: format!(
                "User asked: {}. Gather core model context, stats and news, then synthesize.",
                user_message
            ),
            workflow: vec![
                PlanStep {
                    agent: AGENT_MODEL_INSPECTOR.to_string(),
                    instruction: "Explain model prediction drivers and any anomalies.".to_string(),
                },
                PlanStep {
                    agent: AGENT_STATS.to_string(),
                    instruction: "Summarize matchup stats, lineups, injuries, trends.".to_string(),
                },
                PlanStep {
                    agent: AGENT_RESEARCH.to_string(),
                    instruction: "Summarize news/injury updates and context.".to_string(),
                },
            ],
            final_synthesis_instructions:
                "Answer the user's question directly, cite relevant agent findings, keep it concise."
                    .to_string(),
        }
    }
}

/// Conservative keyword check for first-turn outcome questions.
pub fn looks_like_outcome_question(message: &str) -> bool {
    let lowered = message.trim().to_lowercase();
    if lowered.is_empty() {
        return false;
    }
    const KEYS: [&str; 14] = [
        "who wins",
        "who's gonna win",
        "whos gonna win",
        "who will win",
        "who do you like",
        "pick",
        "winner",
        "win probability",
        "moneyline",
        "ml",
        "favored",
        "underdog",
        "who covers",
        "cover",
    ];
    KEYS.iter().any(|k| lowered.contains(k))
}

/// No assistant messages yet means first turn.
pub fn is_first_turn(conversation: &[ChatMessage]) -> bool {
    !conversation.iter().any(|m| m.role == Role::Assistant)
}

/// Extract a single JSON object appearing after a label line like
/// `AuditResultsJSON: { ... }`. Slices from the first `{` after the label
/// to the last matching `}` and strips code fences if present.
pub fn extract_labeled_json(text: &str, label: &str) -> Option<Value> {
    let idx = text.find(label)?;
    let tail = &text[idx + label.len()..];
    let start = tail.find('{')?;
    let end = tail.rfind('}')?;
    if end <= start {
        return None;
    }
    let blob = tail[start..=end]
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(blob).ok()
}

/// High-severity contradictions from a stats audit block.
pub fn high_severity_contradictions(audit: &Value) -> Vec<Value> {
    audit
        .get("contradictions")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|c| {
                    c.get("severity")
                        .and_then(|s| s.as_str())
                        .map(|s| s.trim().eq_ignore_ascii_case("high"))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_decodes_and_drops_empty_steps() {
        let value = json!({
            "narrative": "n",
            "workflow": [
                {"agent": "stats_agent", "instruction": "stats"},
                {"agent": "", "instruction": "ghost"},
            ],
            "final_synthesis_instructions": "answer",
        });
        let plan = TurnPlan::from_value(&value).unwrap();
        assert_eq!(plan.workflow.len(), 1);
        assert_eq!(plan.workflow[0].agent, "stats_agent");
    }

    #[test]
    fn unusable_plan_is_none() {
        assert!(TurnPlan::from_value(&json!({"workflow": []})).is_none());
        assert!(TurnPlan::from_value(&json!("not a plan")).is_none());
    }

    #[test]
    fn outcome_question_detection() {
        assert!(looks_like_outcome_question("who wins tonight?"));
        assert!(looks_like_outcome_question("Give me your PICK"));
        assert!(!looks_like_outcome_question("how did the third quarter go"));
        assert!(!looks_like_outcome_question(""));
    }

    #[test]
    fn first_turn_checks_assistant_messages() {
        assert!(is_first_turn(&[ChatMessage::user("hi")]));
        assert!(!is_first_turn(&[
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]));
    }

    #[test]
    fn labeled_json_extraction_handles_fences() {
        let text = "analysis...\nAuditResultsJSON: ```json\n{\"contradictions\": [{\"severity\": \"high\", \"claim\": \"pace\"}]}\n```\ndone";
        let audit = extract_labeled_json(text, "AuditResultsJSON:").unwrap();
        let high = high_severity_contradictions(&audit);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0]["claim"], "pace");
    }

    #[test]
    fn missing_label_or_braces_is_none() {
        assert!(extract_labeled_json("no label here", "AuditResultsJSON:").is_none());
        assert!(extract_labeled_json("AuditResultsJSON: no braces", "AuditResultsJSON:").is_none());
    }
}
