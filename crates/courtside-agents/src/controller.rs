//! Matchup controller
//!
//! Code-level orchestrator for the matchup multi-agent workflow: per user
//! turn it bootstraps the shared context, asks the planner for a turn
//! plan, applies guardrails, drives the specialist agents with recorded
//! tool calls, runs the bounded contradiction loop, and synthesizes the
//! final answer. Tool and LLM failures degrade the answer, never abort
//! the turn.

use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use courtside_infra::espn::EspnClient;
use courtside_infra::news::SearchBackend;
use courtside_infra::repos::{
    ConfigRepository, GameRepository, HistoryEntry, PredictionRepository, SharedContextRepository,
    ToolCacheRepository,
};
use courtside_infra::store::DocumentStore;
use courtside_train::PredictionService;
use courtside_types::{LeagueConfig, Result};

use crate::encode::encode_tool_output;
use crate::llm::{ChatMessage, LlmReply, LlmRuntime, Role};
use crate::plan::{
    extract_labeled_json, high_severity_contradictions, is_first_turn, looks_like_outcome_question,
    PlanStep, TurnPlan, AGENT_EXPERIMENTER, AGENT_MODEL_INSPECTOR, AGENT_PLANNER, AGENT_RESEARCH,
    AGENT_STATS, AGENT_SYNTHESIZER,
};
use crate::tools::stats::CACHEABLE_STATS_TOOLS;
use crate::tools::{experimenter, inspector, news, stats, MatchupTool, ToolContext};

const TOOL_CACHE_TTL_SECONDS: i64 = 12 * 60 * 60;
const STATS_AUDIT_INSTRUCTION: &str =
    "Execute the Model Inspector's AuditChecklistJSON audits for this matchup using your tools. Report supports/contradicts/inconclusive + implications.";

const PLANNER_SYSTEM: &str = "You plan a basketball matchup analysis turn. Reply with JSON: \
{\"narrative\": str, \"workflow\": [{\"agent\": str, \"instruction\": str}], \
\"final_synthesis_instructions\": str}. Agents: model_inspector, stats_agent, \
research_media_agent, experimenter.";
const INSPECTOR_SYSTEM: &str = "You are the model inspector. Explain the ensemble's prediction \
drivers from its artifacts, list checks for the stats agent as AuditChecklistJSON, and never \
swap home/away.";
const STATS_SYSTEM: &str = "You are the stats specialist. Use your tools for every number. When \
auditing model claims, emit an AuditResultsJSON: {\"contradictions\": [{\"severity\": ..., \
\"claim\": ..., \"evidence\": ...}]} block.";
const RESEARCH_SYSTEM: &str = "You are the research/media specialist. Summarize relevant news \
and injury context with sources.";
const EXPERIMENTER_SYSTEM: &str = "You are the experimenter. Mutate roster buckets and re-run \
the prediction to test scenarios; report snapshot ids.";
const SYNTHESIZER_SYSTEM: &str = "You are the final synthesizer. Answer the user's question \
directly from the specialists' findings, grounded in the baseline probability.";

/// Per-turn options.
pub struct ControllerOptions {
    pub force_web_refresh: bool,
    pub max_tool_rounds: usize,
    /// Per-tool-call timeout; a timed-out tool returns a structured error
    /// and the turn continues.
    pub tool_timeout: std::time::Duration,
    pub search_backend: SearchBackend,
    pub espn: Option<EspnClient>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            force_web_refresh: false,
            max_tool_rounds: 6,
            tool_timeout: std::time::Duration::from_secs(30),
            search_backend: SearchBackend::default(),
            espn: None,
        }
    }
}

/// What a turn returns to the web layer.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub turn_plan: Value,
    pub agent_actions: Vec<Value>,
}

pub struct MatchupController {
    store: Arc<DocumentStore>,
    cfg: LeagueConfig,
    runtime: Arc<dyn LlmRuntime>,
    artifact_root: PathBuf,
    repo: SharedContextRepository,
    tool_cache: ToolCacheRepository,
}

impl MatchupController {
    pub fn new(
        store: Arc<DocumentStore>,
        cfg: LeagueConfig,
        runtime: Arc<dyn LlmRuntime>,
        artifact_root: PathBuf,
    ) -> Self {
        let repo = SharedContextRepository::new(Arc::clone(&store), &cfg);
        let tool_cache = ToolCacheRepository::new(Arc::clone(&store), &cfg, TOOL_CACHE_TTL_SECONDS);
        Self {
            store,
            cfg,
            runtime,
            artifact_root,
            repo,
            tool_cache,
        }
    }

    /// Handle one user turn end to end.
    pub async fn handle_user_message(
        &self,
        game_id: &str,
        user_message: &str,
        conversation_history: &[ChatMessage],
        options: &ControllerOptions,
    ) -> Result<TurnOutcome> {
        // 1) Shared context exists with baseline fields populated.
        self.repo.ensure_initialized(game_id).await?;
        self.bootstrap_baseline(game_id).await?;
        let shared = self
            .repo
            .get(game_id)
            .await?
            .unwrap_or_else(|| json!({ "game_id": game_id }));

        let mut agent_actions: Vec<Value> = Vec::new();

        // 2) Planner -> JSON turn plan, deterministic fallback when
        // unusable.
        let planner_slice = Self::shared_context_for_agent(AGENT_PLANNER, &shared);
        let planner_prompt = format!(
            "## User Message\n{}\n\n## Shared Context\n{}\n\n## Conversation\n{}",
            user_message,
            encode_tool_output(&planner_slice),
            encode_tool_output(&serde_json::to_value(
                Self::conversation_for_agent(AGENT_PLANNER, conversation_history)
            )?),
        );
        let mut plan = match self.runtime.structured(PLANNER_SYSTEM, &planner_prompt).await {
            Ok(value) => TurnPlan::from_value(&value)
                .unwrap_or_else(|| TurnPlan::default_plan(user_message)),
            Err(e) => {
                tracing::warn!(error = %e, "planner failed; using deterministic plan");
                TurnPlan::default_plan(user_message)
            }
        };
        self.record_agent_output(
            game_id,
            AGENT_PLANNER,
            &serde_json::to_string_pretty(&plan)?,
            &mut agent_actions,
        )
        .await?;

        // 3) Guardrails on the plan.
        if is_first_turn(conversation_history) && looks_like_outcome_question(user_message) {
            Self::apply_first_turn_guardrail(&mut plan);
        }
        Self::apply_audit_guardrail(&mut plan);

        // 4) Execute workflow steps, tool calls recorded as they happen.
        let tool_ctx = ToolContext::new(
            Arc::clone(&self.store),
            self.cfg.clone(),
            game_id,
            self.artifact_root.clone(),
            options.search_backend.clone(),
            options.espn.clone(),
        )
        .await?;

        let mut workflow_outputs: Vec<(String, String)> = Vec::new();
        let mut did_contradiction_requeue = false;
        let steps = plan.workflow.clone();
        for step in &steps {
            let shared_now = self.repo.get(game_id).await?.unwrap_or_else(|| shared.clone());
            let output = self
                .run_agent(
                    game_id,
                    &step.agent,
                    &step.instruction,
                    &shared_now,
                    conversation_history,
                    &workflow_outputs,
                    user_message,
                    options,
                    &tool_ctx,
                    &mut agent_actions,
                )
                .await;
            upsert_output(&mut workflow_outputs, &step.agent, output.clone());

            // 5) Bounded contradiction loop: after stats executes, one
            // re-queue of the model inspector on high-severity findings.
            if step.agent == AGENT_STATS && !did_contradiction_requeue {
                let high = extract_labeled_json(&output, "AuditResultsJSON:")
                    .map(|audit| high_severity_contradictions(&audit))
                    .unwrap_or_default();
                if !high.is_empty() {
                    did_contradiction_requeue = true;
                    let packet = json!({
                        "version": 1,
                        "game_id": game_id,
                        "contradictions": high,
                    });
                    let instruction = format!(
                        "Investigate the following high-severity contradiction(s) found by Stats.\n\
                         Focus on the base model(s) implicated. Reconcile by locating the exact \
                         base-model feature values, checking whether the evidence measures the same \
                         construct/window, correcting any swapped home/away interpretation, and \
                         explicitly concluding what to trust.\n\nContradictionPacketJSON:\n{}",
                        packet
                    );
                    let shared_now =
                        self.repo.get(game_id).await?.unwrap_or_else(|| shared.clone());
                    let output = self
                        .run_agent(
                            game_id,
                            AGENT_MODEL_INSPECTOR,
                            &instruction,
                            &shared_now,
                            conversation_history,
                            &workflow_outputs,
                            user_message,
                            options,
                            &tool_ctx,
                            &mut agent_actions,
                        )
                        .await;
                    // The investigation replaces the prior inspector output
                    // for synthesis.
                    upsert_output(&mut workflow_outputs, AGENT_MODEL_INSPECTOR, output);
                }
            }
        }

        // 6) Final synthesis with deterministic fallback.
        let shared_full = self.repo.get(game_id).await?.unwrap_or_else(|| shared.clone());
        let synth_slice = Self::shared_context_for_agent(AGENT_SYNTHESIZER, &shared_full);
        let mut synth_prompt = format!(
            "## User Message\n{}\n\n## Synthesis Instructions\n{}\n\n## Shared Context\n{}\n",
            user_message,
            plan.final_synthesis_instructions,
            encode_tool_output(&synth_slice),
        );
        for (agent, output) in &workflow_outputs {
            synth_prompt.push_str(&format!("\n## {} Output\n{}\n", agent, output));
        }
        let response = match self
            .runtime
            .chat(
                SYNTHESIZER_SYSTEM,
                &[ChatMessage::user(synth_prompt)],
                &[],
                0.2,
            )
            .await
        {
            Ok(LlmReply::Final(text)) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => {
                self.record_tool_event(
                    game_id,
                    AGENT_SYNTHESIZER,
                    "final_synthesis_error",
                    &json!({}),
                    &json!({"error": "synthesizer unavailable, deterministic fallback used"}),
                    &mut agent_actions,
                )
                .await?;
                Self::synthesize_fallback(user_message, &shared_full, &workflow_outputs)
            }
        };
        self.record_agent_output(game_id, AGENT_SYNTHESIZER, &response, &mut agent_actions)
            .await?;

        Ok(TurnOutcome {
            response,
            turn_plan: serde_json::to_value(&plan)?,
            agent_actions,
        })
    }

    /// Populate baseline read-through fields: game metadata and the
    /// selected ensemble's probability for this game. Agents never rewrite
    /// these.
    async fn bootstrap_baseline(&self, game_id: &str) -> Result<()> {
        let games = GameRepository::new(Arc::clone(&self.store), &self.cfg);
        let game = games.require(game_id).await?;
        let mut fields = json!({
            "game": {
                "game_id": game.game_id,
                "date": game.date.iso(),
                "season": game.season,
                "home": {"name": game.home.name, "team_id": game.home.team_id},
                "away": {"name": game.away.name, "team_id": game.away.team_id},
            },
        });

        let predictions = PredictionRepository::new(Arc::clone(&self.store), &self.cfg);
        let mut p_home: Option<f64> = predictions
            .get(game_id)
            .await?
            .map(|doc| doc.home_win_prob / 100.0);
        if p_home.is_none() {
            // Best-effort: run the selected ensemble once so the baseline
            // anchor exists.
            let configs = ConfigRepository::classifier(Arc::clone(&self.store), &self.cfg);
            if configs.selected().await?.map(|c| c.ensemble).unwrap_or(false) {
                let service = PredictionService::new(
                    Arc::clone(&self.store),
                    self.cfg.clone(),
                    self.artifact_root.clone(),
                );
                match service.predict_game(game_id).await {
                    Ok(doc) => p_home = Some(doc.home_win_prob / 100.0),
                    Err(e) => tracing::warn!(error = %e, "baseline prediction unavailable"),
                }
            }
        }
        if let (Some(p), Some(obj)) = (p_home, fields.as_object_mut()) {
            obj.insert("ensemble_model".to_string(), json!({ "p_home": p }));
        }
        self.repo.update_fields(game_id, &fields).await
    }

    /// First-turn outcome questions get full coverage: inspector, stats,
    /// research at the head of the workflow, in that order.
    fn apply_first_turn_guardrail(plan: &mut TurnPlan) {
        let desired = [
            (
                AGENT_MODEL_INSPECTOR,
                "Explain the model prediction drivers; include AuditChecklistJSON.",
            ),
            (AGENT_STATS, STATS_AUDIT_INSTRUCTION),
            (
                AGENT_RESEARCH,
                "Summarize relevant news/injury context and recency; cite sources/links.",
            ),
        ];
        let mut new_workflow: Vec<PlanStep> = Vec::new();
        for (agent, instruction) in desired {
            let existing = plan.workflow.iter().find(|s| s.agent == agent);
            new_workflow.push(PlanStep {
                agent: agent.to_string(),
                instruction: existing
                    .map(|s| s.instruction.clone())
                    .unwrap_or_else(|| instruction.to_string()),
            });
        }
        for step in &plan.workflow {
            if !new_workflow.iter().any(|s| s.agent == step.agent) {
                new_workflow.push(step.clone());
            }
        }
        plan.workflow = new_workflow;
    }

    /// If the inspector runs without stats scheduled, stats follows it to
    /// execute the audit checklist.
    fn apply_audit_guardrail(plan: &mut TurnPlan) {
        let has_stats = plan.workflow.iter().any(|s| s.agent == AGENT_STATS);
        if has_stats {
            return;
        }
        if let Some(pos) = plan
            .workflow
            .iter()
            .position(|s| s.agent == AGENT_MODEL_INSPECTOR)
        {
            plan.workflow.insert(
                pos + 1,
                PlanStep {
                    agent: AGENT_STATS.to_string(),
                    instruction: STATS_AUDIT_INSTRUCTION.to_string(),
                },
            );
        }
    }

    /// Minimal shared-context slice per agent; the full context never goes
    /// to every agent.
    fn shared_context_for_agent(agent: &str, shared: &Value) -> Value {
        let game_id = shared.get("game_id").cloned().unwrap_or(Value::Null);
        let game = shared.get("game").cloned().unwrap_or(Value::Null);
        let p_home = shared
            .get("ensemble_model")
            .and_then(|e| e.get("p_home"))
            .cloned()
            .unwrap_or(Value::Null);
        match agent {
            AGENT_MODEL_INSPECTOR => json!({
                "game_id": game_id,
                "ensemble_model": {"p_home": p_home},
            }),
            AGENT_STATS | AGENT_EXPERIMENTER => json!({
                "game_id": game_id,
                "game": game,
            }),
            AGENT_RESEARCH => json!({
                "game_id": game_id,
                "game": game,
                "market_snapshot": shared.get("market_snapshot").cloned().unwrap_or(Value::Null),
            }),
            AGENT_PLANNER => json!({
                "game_id": game_id,
                "game": game,
                "ensemble_model": {"p_home": p_home},
                "market_snapshot": shared.get("market_snapshot").cloned().unwrap_or(Value::Null),
                "latest_by_agent": shared.get("latest_by_agent").cloned().unwrap_or(json!({})),
            }),
            AGENT_SYNTHESIZER => {
                let mut full = shared.clone();
                if let Some(obj) = full.as_object_mut() {
                    obj.remove("history");
                    obj.remove("latest_by_agent");
                }
                full
            }
            _ => json!({ "game_id": game_id, "game": game }),
        }
    }

    /// Minimal conversation slice per agent.
    fn conversation_for_agent(agent: &str, conversation: &[ChatMessage]) -> Vec<ChatMessage> {
        match agent {
            AGENT_MODEL_INSPECTOR | AGENT_STATS | AGENT_EXPERIMENTER => Vec::new(),
            AGENT_RESEARCH => {
                let start = conversation.len().saturating_sub(2);
                conversation[start..].to_vec()
            }
            _ => conversation.to_vec(),
        }
    }

    fn system_prompt_for(agent: &str) -> &'static str {
        match agent {
            AGENT_MODEL_INSPECTOR => INSPECTOR_SYSTEM,
            AGENT_STATS => STATS_SYSTEM,
            AGENT_RESEARCH => RESEARCH_SYSTEM,
            AGENT_EXPERIMENTER => EXPERIMENTER_SYSTEM,
            _ => SYNTHESIZER_SYSTEM,
        }
    }

    fn toolset_for(
        agent: &str,
        ctx: &Arc<ToolContext>,
        options: &ControllerOptions,
    ) -> Vec<Arc<dyn MatchupTool>> {
        match agent {
            AGENT_MODEL_INSPECTOR => inspector::toolset(ctx),
            AGENT_STATS => stats::toolset(ctx),
            AGENT_RESEARCH => news::toolset(ctx, options.force_web_refresh),
            AGENT_EXPERIMENTER => experimenter::toolset(ctx),
            _ => Vec::new(),
        }
    }

    fn agent_user_prompt(
        agent: &str,
        instruction: &str,
        user_message: &str,
        shared_slice: &Value,
        conversation: &[ChatMessage],
        prior_outputs: &[(String, String)],
    ) -> String {
        let mut parts = vec![
            "## User Message".to_string(),
            user_message.to_string(),
            String::new(),
            "## Instruction".to_string(),
            instruction.to_string(),
            String::new(),
            "## Shared Context".to_string(),
            encode_tool_output(shared_slice),
        ];

        if agent == AGENT_MODEL_INSPECTOR {
            let home = shared_slice
                .get("game")
                .and_then(|g| g.get("home"))
                .cloned()
                .unwrap_or(Value::Null);
            let away = shared_slice
                .get("game")
                .and_then(|g| g.get("away"))
                .cloned()
                .unwrap_or(Value::Null);
            parts.push(String::new());
            parts.push("## Home/Away grounding (critical)".to_string());
            parts.push(format!("- Home: {}", home));
            parts.push(format!("- Away: {}", away));
            parts.push("- Use this mapping consistently. Do not swap home/away mid-report.".to_string());
        }
        if agent == AGENT_STATS {
            parts.push(String::new());
            parts.push("## Tool argument hints".to_string());
            parts.push(
                "- Valid `window` examples: \"days5\", \"games10\", \"games12\", \"season\"."
                    .to_string(),
            );
        }
        if agent == AGENT_EXPERIMENTER {
            parts.push(String::new());
            parts.push("- Valid `bucket` values: \"injured\", \"bench\", \"starter\".".to_string());
            parts.push("- Roster changes persist platform-wide until changed again.".to_string());
        }

        if !conversation.is_empty() {
            parts.push(String::new());
            parts.push("## Conversation".to_string());
            for message in conversation {
                parts.push(format!("{:?}: {}", message.role, message.content));
            }
        }

        // Cross-agent dependencies: the inspector's checklist feeds stats,
        // stats feeds research, scenario output feeds the inspector.
        let prior = |name: &str| {
            prior_outputs
                .iter()
                .find(|(agent, _)| agent == name)
                .map(|(_, output)| output.clone())
        };
        if agent == AGENT_STATS {
            if let Some(output) = prior(AGENT_MODEL_INSPECTOR) {
                parts.push(String::new());
                parts.push("## Model Inspector Output (this turn)".to_string());
                parts.push(output);
            }
        }
        if agent == AGENT_RESEARCH {
            if let Some(output) = prior(AGENT_STATS) {
                parts.push(String::new());
                parts.push("## Stats Agent Output (this turn)".to_string());
                parts.push(output);
            }
        }
        if agent == AGENT_MODEL_INSPECTOR {
            if let Some(output) = prior(AGENT_EXPERIMENTER) {
                parts.push(String::new());
                parts.push("## Experimenter Output (this turn)".to_string());
                parts.push(output);
            }
        }

        parts.join("\n")
    }

    /// Drive one agent's tool loop; every tool call is recorded as it
    /// happens so the UI can stream progress.
    #[allow(clippy::too_many_arguments)]
    async fn run_agent(
        &self,
        game_id: &str,
        agent: &str,
        instruction: &str,
        shared: &Value,
        conversation: &[ChatMessage],
        prior_outputs: &[(String, String)],
        user_message: &str,
        options: &ControllerOptions,
        tool_ctx: &Arc<ToolContext>,
        agent_actions: &mut Vec<Value>,
    ) -> String {
        let shared_slice = Self::shared_context_for_agent(agent, shared);
        let conversation_slice = Self::conversation_for_agent(agent, conversation);
        let tools = Self::toolset_for(agent, tool_ctx, options);
        let specs: Vec<_> = tools.iter().map(|t| t.spec().clone()).collect();
        let system = Self::system_prompt_for(agent);

        let mut messages = vec![ChatMessage::user(Self::agent_user_prompt(
            agent,
            instruction,
            user_message,
            &shared_slice,
            &conversation_slice,
            prior_outputs,
        ))];

        for _round in 0..options.max_tool_rounds {
            let reply = match self.runtime.chat(system, &messages, &specs, 0.2).await {
                Ok(reply) => reply,
                Err(e) => {
                    let output = format!("[ERROR] {} failed: {}", agent, e);
                    let _ = self
                        .record_agent_output(game_id, agent, &output, agent_actions)
                        .await;
                    return output;
                }
            };
            match reply {
                LlmReply::Final(text) => {
                    let _ = self
                        .record_agent_output(game_id, agent, &text, agent_actions)
                        .await;
                    return text;
                }
                LlmReply::ToolCalls(calls) => {
                    messages.push(ChatMessage {
                        role: Role::Assistant,
                        content: String::new(),
                        tool_calls: calls.clone(),
                        tool_call_id: None,
                    });
                    for call in calls {
                        let encoded = self
                            .execute_tool(
                                game_id,
                                agent,
                                &tools,
                                &call.name,
                                &call.arguments,
                                options.tool_timeout,
                                agent_actions,
                            )
                            .await;
                        messages.push(ChatMessage::tool_result(call.id.clone(), encoded));
                    }
                }
            }
        }

        let output = format!("[ERROR] {} exceeded the tool-call budget", agent);
        let _ = self
            .record_agent_output(game_id, agent, &output, agent_actions)
            .await;
        output
    }

    /// Execute one tool call: cache lookup for deterministic stats tools,
    /// immediate history recording, JSON error objects on failure, and the
    /// token-efficient encoding back to the model.
    #[allow(clippy::too_many_arguments)]
    async fn execute_tool(
        &self,
        game_id: &str,
        agent: &str,
        tools: &[Arc<dyn MatchupTool>],
        name: &str,
        args: &Value,
        timeout: std::time::Duration,
        agent_actions: &mut Vec<Value>,
    ) -> String {
        let cacheable = agent == AGENT_STATS && CACHEABLE_STATS_TOOLS.contains(&name);

        let mut cache_hit = false;
        let mut output: Option<Value> = None;
        if cacheable {
            if let Ok(Some(hit)) = self.tool_cache.get(game_id, name, args).await {
                output = Some(hit);
                cache_hit = true;
            }
        }

        let output = match output {
            Some(value) => value,
            None => {
                let result = match tools.iter().find(|t| t.spec().name == name) {
                    Some(tool) => {
                        match tokio::time::timeout(timeout, tool.invoke(args.clone())).await {
                            Ok(result) => result,
                            Err(_) => Err(courtside_types::CourtsideError::Tool(format!(
                                "tool {} timed out after {:?}",
                                name, timeout
                            ))),
                        }
                    }
                    None => Err(courtside_types::CourtsideError::Tool(format!(
                        "unknown tool {}",
                        name
                    ))),
                };
                match result {
                    Ok(value) => {
                        if cacheable {
                            let _ = self.tool_cache.set(game_id, name, args, &value).await;
                        }
                        value
                    }
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
        };

        // Recorded history annotates cache hits; the model sees the same
        // payload either way.
        let recorded = if cache_hit {
            json!({"cached": true, "value": output})
        } else {
            output.clone()
        };
        let _ = self
            .record_tool_event(game_id, agent, name, args, &recorded, agent_actions)
            .await;

        encode_tool_output(&output)
    }

    async fn record_agent_output(
        &self,
        game_id: &str,
        agent: &str,
        output: &str,
        agent_actions: &mut Vec<Value>,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        self.repo
            .append_history(
                game_id,
                &HistoryEntry {
                    agent: agent.to_string(),
                    system: String::new(),
                    tools: Vec::new(),
                    output: Some(output.to_string()),
                    timestamp: timestamp.clone(),
                },
            )
            .await?;
        agent_actions.push(json!({
            "kind": "agent_output",
            "agent": agent,
            "timestamp": timestamp,
            "text": output,
        }));
        Ok(())
    }

    async fn record_tool_event(
        &self,
        game_id: &str,
        agent: &str,
        tool_name: &str,
        args: &Value,
        output: &Value,
        agent_actions: &mut Vec<Value>,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        self.repo
            .append_history(
                game_id,
                &HistoryEntry {
                    agent: agent.to_string(),
                    system: String::new(),
                    tools: vec![json!({"name": tool_name, "args": args, "output": output})],
                    output: None,
                    timestamp: timestamp.clone(),
                },
            )
            .await?;
        agent_actions.push(json!({
            "kind": "tool_call",
            "agent": agent,
            "timestamp": timestamp,
            "name": tool_name,
            "args": args,
            "output": output,
        }));
        Ok(())
    }

    /// Implied American moneyline for a probability.
    fn american_odds(p: f64) -> Option<i64> {
        if p <= 0.0 || p >= 1.0 {
            return None;
        }
        if p >= 0.5 {
            Some(-((p / (1.0 - p)) * 100.0).round() as i64)
        } else {
            Some((((1.0 - p) / p) * 100.0).round() as i64)
        }
    }

    /// Deterministic synthesis grounded in the baseline probability and
    /// market snapshot, with excerpted specialist outputs.
    fn synthesize_fallback(
        user_message: &str,
        shared: &Value,
        workflow_outputs: &[(String, String)],
    ) -> String {
        let home = shared
            .pointer("/game/home/name")
            .and_then(|v| v.as_str())
            .unwrap_or("home");
        let away = shared
            .pointer("/game/away/name")
            .and_then(|v| v.as_str())
            .unwrap_or("away");
        let p_home = shared.pointer("/ensemble_model/p_home").and_then(|v| v.as_f64());

        let mut out = String::new();
        out.push_str(&format!("Question: {}\n\n", user_message));
        match p_home {
            Some(p) => {
                out.push_str(&format!(
                    "Baseline model: {} win probability {:.1}% vs {} {:.1}%.",
                    home,
                    p * 100.0,
                    away,
                    (1.0 - p) * 100.0
                ));
                if let (Some(home_ml), Some(away_ml)) =
                    (Self::american_odds(p), Self::american_odds(1.0 - p))
                {
                    out.push_str(&format!(
                        " Implied moneylines: {} {:+}, {} {:+}.",
                        home, home_ml, away, away_ml
                    ));
                }
                out.push('\n');
            }
            None => out.push_str("No baseline model probability is available for this game.\n"),
        }
        if let Some(snapshot) = shared.get("market_snapshot").filter(|v| !v.is_null()) {
            out.push_str(&format!("Market snapshot: {}\n", snapshot));
        }
        for (agent, output) in workflow_outputs {
            if output.starts_with("[ERROR]") {
                continue;
            }
            let excerpt: String = output.chars().take(300).collect();
            out.push_str(&format!("\n{}: {}\n", agent, excerpt));
        }
        out
    }
}

/// Replace an agent's output in place, preserving workflow order.
fn upsert_output(outputs: &mut Vec<(String, String)>, agent: &str, output: String) {
    match outputs.iter_mut().find(|(name, _)| name == agent) {
        Some(entry) => entry.1 = output,
        None => outputs.push((agent.to_string(), output)),
    }
}
