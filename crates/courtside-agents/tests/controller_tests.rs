//! Controller integration tests: first-turn guardrails, the bounded
//! contradiction loop, tool-call recording, tool caching, and the
//! deterministic synthesis fallback.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use courtside_agents::{
    ChatMessage, ControllerOptions, LlmReply, MatchupController, ScriptedRuntime, ToolCall,
};
use courtside_core::games::{Game, TeamBox};
use courtside_infra::repos::{GameRepository, PredictionDoc, PredictionRepository};
use courtside_infra::store::DocumentStore;
use courtside_types::{GameDate, LeagueConfig};

fn team_box(name: &str, points: f64) -> TeamBox {
    TeamBox {
        name: name.to_string(),
        points,
        fg_made: 40.0,
        fg_att: 88.0,
        assists: 24.0,
        turnovers: 13.0,
        rebounds: 42.0,
        ..TeamBox::default()
    }
}

fn game(id: &str, day: u32, home: &str, away: &str, hp: f64, ap: f64) -> Game {
    Game {
        game_id: id.to_string(),
        date: GameDate::new(2024, 1, day),
        season: "2023-2024".to_string(),
        home: team_box(home, hp),
        away: team_box(away, ap),
        home_won: Some(hp > ap),
        game_type: None,
        venue_guid: None,
    }
}

async fn seeded_store() -> Arc<DocumentStore> {
    let store = Arc::new(DocumentStore::in_memory().await.unwrap());
    let cfg = LeagueConfig::nba();
    let games = GameRepository::new(Arc::clone(&store), &cfg);
    games.upsert(&game("g1", 2, "BOS", "NYK", 112.0, 104.0)).await.unwrap();
    games.upsert(&game("g2", 5, "NYK", "BOS", 99.0, 105.0)).await.unwrap();
    games.upsert(&game("target", 10, "BOS", "NYK", 0.0, 0.0)).await.unwrap();

    let predictions = PredictionRepository::new(Arc::clone(&store), &cfg);
    predictions
        .upsert(&PredictionDoc {
            game_id: "target".to_string(),
            home_win_prob: 61.0,
            away_win_prob: 39.0,
            predicted_winner: "BOS".to_string(),
            features_dict: [("elo|none|raw|diff".to_string(), 42.0)].into_iter().collect(),
            base_outputs: [("p_lr".to_string(), 0.64)].into_iter().collect(),
            meta_feature_values: [("p_lr".to_string(), 0.64)].into_iter().collect(),
            config_id: None,
            created_at: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();
    store
}

fn controller(store: Arc<DocumentStore>, runtime: Arc<ScriptedRuntime>) -> MatchupController {
    MatchupController::new(
        store,
        LeagueConfig::nba(),
        runtime,
        std::env::temp_dir().join("courtside-test-artifacts"),
    )
}

#[tokio::test]
async fn first_turn_outcome_question_runs_full_coverage_with_contradiction_loop() {
    let store = seeded_store().await;
    let runtime = Arc::new(ScriptedRuntime::new());

    // Planner only schedules research; the guardrail must put
    // inspector -> stats -> research at the head.
    runtime.push_structured(json!({
        "narrative": "light plan",
        "workflow": [{"agent": "research_media_agent", "instruction": "check news"}],
        "final_synthesis_instructions": "answer",
    }));

    // Inspector: one tool call, then final with a checklist.
    runtime.push_chat(LlmReply::ToolCalls(vec![ToolCall {
        id: "c1".to_string(),
        name: "get_prediction_doc".to_string(),
        arguments: json!({"game_id": "target"}),
    }]));
    runtime.push_chat(LlmReply::Final(
        "Model favors BOS. AuditChecklistJSON: {\"checks\": [\"pace\"]}".to_string(),
    ));
    // Stats: one tool call, then a high-severity contradiction.
    runtime.push_chat(LlmReply::ToolCalls(vec![ToolCall {
        id: "c2".to_string(),
        name: "get_team_stats".to_string(),
        arguments: json!({"team_id": "BOS", "window": "season"}),
    }]));
    runtime.push_chat(LlmReply::Final(
        "Pace disagrees. AuditResultsJSON: {\"contradictions\": [{\"severity\": \"high\", \"claim\": \"pace driver\"}]}"
            .to_string(),
    ));
    // Re-queued inspector investigation.
    runtime.push_chat(LlmReply::Final("Reconciled: trust the stats evidence.".to_string()));
    // Research.
    runtime.push_chat(LlmReply::Final("No significant news.".to_string()));
    // No synthesizer reply queued: the deterministic fallback must answer.

    let controller = controller(Arc::clone(&store), Arc::clone(&runtime));
    let outcome = controller
        .handle_user_message(
            "target",
            "who wins tonight?",
            &[ChatMessage::user("who wins tonight?")],
            &ControllerOptions::default(),
        )
        .await
        .unwrap();

    // Guardrail rewrote the workflow head.
    let workflow = outcome.turn_plan["workflow"].as_array().unwrap();
    assert_eq!(workflow[0]["agent"], "model_inspector");
    assert_eq!(workflow[1]["agent"], "stats_agent");
    assert_eq!(workflow[2]["agent"], "research_media_agent");

    // Fallback synthesis carries the stored baseline probability.
    assert!(outcome.response.contains("61.0%"), "response: {}", outcome.response);
    assert!(outcome.response.contains("BOS"));

    // Exactly one re-invocation of the inspector.
    let inspector_outputs = outcome
        .agent_actions
        .iter()
        .filter(|a| a["kind"] == "agent_output" && a["agent"] == "model_inspector")
        .count();
    assert_eq!(inspector_outputs, 2);

    // Every tool call is in the chronological stream.
    let tool_calls: Vec<&Value> = outcome
        .agent_actions
        .iter()
        .filter(|a| a["kind"] == "tool_call")
        .collect();
    assert!(tool_calls.iter().any(|a| a["name"] == "get_prediction_doc"));
    assert!(tool_calls.iter().any(|a| a["name"] == "get_team_stats"));

    // The investigation output replaced the first inspector output for
    // synthesis.
    assert!(outcome.response.contains("Reconciled"));
}

#[tokio::test]
async fn inspector_without_stats_gets_stats_inserted() {
    let store = seeded_store().await;
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.push_structured(json!({
        "narrative": "inspect only",
        "workflow": [{"agent": "model_inspector", "instruction": "inspect"}],
        "final_synthesis_instructions": "answer",
    }));
    runtime.push_chat(LlmReply::Final("inspection done".to_string()));
    runtime.push_chat(LlmReply::Final("audits executed, nothing notable".to_string()));
    runtime.push_chat(LlmReply::Final("final answer".to_string()));

    let controller = controller(Arc::clone(&store), Arc::clone(&runtime));
    let outcome = controller
        .handle_user_message(
            "target",
            "explain the model reasoning",
            &[
                ChatMessage::user("earlier question"),
                ChatMessage::assistant("earlier answer"),
                ChatMessage::user("explain the model reasoning"),
            ],
            &ControllerOptions::default(),
        )
        .await
        .unwrap();

    let workflow = outcome.turn_plan["workflow"].as_array().unwrap();
    assert_eq!(workflow.len(), 2);
    assert_eq!(workflow[0]["agent"], "model_inspector");
    assert_eq!(workflow[1]["agent"], "stats_agent");
    assert_eq!(outcome.response, "final answer");
}

#[tokio::test]
async fn repeated_stats_tool_call_is_served_from_cache_with_annotation() {
    let store = seeded_store().await;

    let run_turn = |store: Arc<DocumentStore>, conversation: Vec<ChatMessage>| async move {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.push_structured(json!({
            "narrative": "stats only",
            "workflow": [{"agent": "stats_agent", "instruction": "check records"}],
            "final_synthesis_instructions": "answer",
        }));
        runtime.push_chat(LlmReply::ToolCalls(vec![ToolCall {
            id: "c1".to_string(),
            name: "get_team_stats".to_string(),
            arguments: json!({"team_id": "BOS", "window": "season"}),
        }]));
        runtime.push_chat(LlmReply::Final("records checked".to_string()));
        runtime.push_chat(LlmReply::Final("done".to_string()));
        let controller = controller(store, Arc::clone(&runtime));
        controller
            .handle_user_message(
                "target",
                "how are the teams trending?",
                &conversation,
                &ControllerOptions::default(),
            )
            .await
            .unwrap()
    };

    let not_first_turn = vec![
        ChatMessage::user("hello"),
        ChatMessage::assistant("hi"),
        ChatMessage::user("how are the teams trending?"),
    ];
    let first = run_turn(Arc::clone(&store), not_first_turn.clone()).await;
    let second = run_turn(Arc::clone(&store), not_first_turn).await;

    let tool_output = |outcome: &courtside_agents::controller::TurnOutcome| -> Value {
        outcome
            .agent_actions
            .iter()
            .find(|a| a["kind"] == "tool_call" && a["name"] == "get_team_stats")
            .unwrap()["output"]
            .clone()
    };
    let first_output = tool_output(&first);
    let second_output = tool_output(&second);
    // Second call records a cache-hit annotation around the same value.
    assert!(first_output.get("cached").is_none());
    assert_eq!(second_output["cached"], true);
    assert_eq!(second_output["value"], first_output);
}

#[tokio::test]
async fn planner_failure_falls_back_to_the_deterministic_plan() {
    let store = seeded_store().await;
    let runtime = Arc::new(ScriptedRuntime::new());
    // No structured reply queued: planner fails, deterministic plan runs
    // inspector -> stats -> research. No chat replies either, so every
    // agent degrades and the fallback synthesizer still answers.
    let controller = controller(Arc::clone(&store), Arc::clone(&runtime));
    let outcome = controller
        .handle_user_message(
            "target",
            "thoughts?",
            &[
                ChatMessage::user("x"),
                ChatMessage::assistant("y"),
                ChatMessage::user("thoughts?"),
            ],
            &ControllerOptions::default(),
        )
        .await
        .unwrap();

    let workflow = outcome.turn_plan["workflow"].as_array().unwrap();
    assert_eq!(workflow.len(), 3);
    assert!(outcome.response.contains("61.0%"));
    // Agent errors are surfaced in the action stream, not in the answer.
    assert!(outcome
        .agent_actions
        .iter()
        .any(|a| a["kind"] == "agent_output"
            && a["text"].as_str().unwrap_or("").starts_with("[ERROR]")));
    assert!(!outcome.response.contains("[ERROR]"));
}
