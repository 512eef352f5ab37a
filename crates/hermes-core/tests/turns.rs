//! Whole-turn behaviour against a scripted model

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hermes_core::web::WebSearch;
use hermes_core::{
    Agent, AgentConfig, AgentEvent, ConversationStore, Message, ModelGateway, ModelReply, Phase,
    Role, ToolCallRequest, ToolDispatcher, ToolError, ToolResult, TransportError, TurnError,
    TurnOutcome,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Plays back scripted replies, then repeats `fallback` forever.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply, TransportError>>>,
    fallback: Option<ModelReply>,
    calls: AtomicUsize,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<ModelReply, TransportError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn always(reply: ModelReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for ScriptedModel {
    async fn complete(&self, history: &[Message]) -> Result<ModelReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(history.len());
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => Ok(ModelReply::text("(script exhausted)")),
        }
    }
}

/// Search that never answers on its own.
struct HangingSearch;

#[async_trait]
impl WebSearch for HangingSearch {
    async fn search(&self, _query: &str) -> Result<Value, ToolError> {
        std::future::pending().await
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

fn tool_reply(calls: Vec<ToolCallRequest>) -> ModelReply {
    ModelReply {
        content: None,
        tool_calls: calls,
    }
}

fn agent(model: &Arc<ScriptedModel>, config: AgentConfig) -> Agent<Arc<ScriptedModel>> {
    Agent::new(Arc::clone(model), ToolDispatcher::new(), config)
}

fn tool_results(store: &ConversationStore) -> Vec<(String, ToolResult)> {
    store
        .snapshot()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| {
            let result = serde_json::from_str(m.content.as_deref().unwrap()).unwrap();
            (m.tool_call_id.clone().unwrap(), result)
        })
        .collect()
}

#[tokio::test]
async fn test_one_result_per_call_in_order() {
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_reply(vec![
            call("c1", "execute_sandbox_a", json!({"code": "return 1+1"})),
            call("c2", "no_such_tool", json!({})),
            call("c3", "generate_code", json!({"language": "sql", "description": "users"})),
        ])),
        Ok(ModelReply::text("two")),
    ]));
    let agent = agent(&model, AgentConfig::default());
    let mut store = ConversationStore::new();

    let outcome = agent
        .send(&mut store, "1+1?", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Done {
            reply: "two".into(),
            rounds: 1
        }
    );

    let results = tool_results(&store);
    let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);

    assert_eq!(results[0].1, ToolResult::success(json!(2)));
    assert!(!results[1].1.ok);
    assert!(results[1].1.error_message.as_deref().unwrap().contains("unknown tool"));
    assert!(results[2].1.ok);

    // user, assistant(calls), 3 x tool, assistant(final)
    assert_eq!(store.len(), 6);
    assert_eq!(model.seen.lock().unwrap().clone(), vec![1, 5]);
}

#[tokio::test]
async fn test_budget_exceeded_keeps_rounds_paired() {
    let model = Arc::new(ScriptedModel::always(tool_reply(vec![call(
        "again",
        "execute_sandbox_a",
        json!({"code": "1"}),
    )])));
    let config = AgentConfig {
        max_rounds: 3,
        ..AgentConfig::default()
    };
    let agent = agent(&model, config);
    let mut store = ConversationStore::new();

    let outcome = agent
        .send(&mut store, "loop forever", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::BudgetExceeded { rounds: 3 });
    assert_eq!(model.calls(), 3);
    assert_eq!(store.len(), 1 + 3 * 2);
    assert!(store.unresolved_calls().is_empty());
    assert_eq!(store.phase(), Phase::AwaitingModel);
}

#[tokio::test]
async fn test_turn_deadline() {
    let model = Arc::new(ScriptedModel::always(tool_reply(vec![call(
        "slow",
        "search",
        json!({"query": "anything"}),
    )])));
    let config = AgentConfig {
        turn_deadline: Some(Duration::from_millis(100)),
        ..AgentConfig::default()
    };
    let dispatcher = ToolDispatcher::new().with_search(Arc::new(HangingSearch));
    let agent = Agent::new(Arc::clone(&model), dispatcher, config);
    let mut store = ConversationStore::new();

    let outcome = agent
        .send(&mut store, "search", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::BudgetExceeded { rounds: 0 });
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_cancel_mid_round_leaves_store_untouched() {
    let model = Arc::new(ScriptedModel::new(vec![Ok(tool_reply(vec![
        call("fast", "execute_sandbox_a", json!({"code": "1"})),
        call("stuck", "search", json!({"query": "forever"})),
    ]))]));
    let dispatcher = ToolDispatcher::new().with_search(Arc::new(HangingSearch));
    let agent = Agent::new(Arc::clone(&model), dispatcher, AgentConfig::default());
    let mut store = ConversationStore::new();
    store.append(Message::user("earlier")).unwrap();
    store
        .append(Message::assistant(Some("earlier reply".into()), vec![]))
        .unwrap();
    let before = store.snapshot().to_vec();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut results_seen = 0;
    let outcome = agent
        .send(&mut store, "now search", &cancel, |event| {
            if let AgentEvent::ToolCall { name, .. } = &event {
                if name == "search" {
                    trigger.cancel();
                }
            }
            if matches!(event, AgentEvent::ToolResult { .. }) {
                results_seen += 1;
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(results_seen, 1);
    // only the new user message survives
    assert_eq!(store.len(), before.len() + 1);
    assert_eq!(&store.snapshot()[..before.len()], before.as_slice());
    assert_eq!(store.phase(), Phase::AwaitingModel);
}

#[tokio::test]
async fn test_transport_failure_keeps_only_user_message() {
    let model = Arc::new(ScriptedModel::new(vec![Err(TransportError::Status {
        status: 502,
        body: "bad gateway".into(),
    })]));
    let agent = agent(&model, AgentConfig::default());
    let mut store = ConversationStore::new();

    let err = agent
        .send(&mut store, "hello?", &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Transport(TransportError::Status { status: 502, .. })));
    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].role, Role::User);

    // the store can go straight back to the model
    let outcome = agent
        .resume(&mut store, &CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert!(matches!(outcome, TurnOutcome::Done { .. }));
}

#[tokio::test]
async fn test_observations_precede_result() {
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_reply(vec![call(
            "log",
            "execute_sandbox_a",
            json!({"code": "print(\"step 1\"); print(\"step 2\"); 3"}),
        )])),
        Ok(ModelReply::text("3")),
    ]));
    let agent = agent(&model, AgentConfig::default());
    let mut store = ConversationStore::new();
    let mut lines = Vec::new();
    let mut result_index = None;

    agent
        .send(&mut store, "count", &CancellationToken::new(), |event| match event {
            AgentEvent::Observation { line, .. } => lines.push(line),
            AgentEvent::ToolResult { ok, .. } => {
                assert!(ok);
                result_index = Some(lines.len());
            }
            _ => {}
        })
        .await
        .unwrap();

    assert_eq!(lines, vec!["step 1".to_string(), "step 2".to_string()]);
    assert_eq!(result_index, Some(2));
}

#[tokio::test]
async fn test_sandbox_timeout_is_a_tool_failure() {
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_reply(vec![call(
            "spin",
            "execute_sandbox_a",
            json!({"code": "loop { }"}),
        )])),
        Ok(ModelReply::text("gave up")),
    ]));
    let dispatcher = ToolDispatcher::new().with_timeouts(hermes_core::ToolTimeouts {
        script: Duration::from_millis(100),
        python: Duration::from_millis(100),
    });
    let agent = Agent::new(Arc::clone(&model), dispatcher, AgentConfig::default());
    let mut store = ConversationStore::new();

    let outcome = agent
        .send(&mut store, "spin", &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Done { rounds: 1, .. }));
    let results = tool_results(&store);
    assert!(!results[0].1.ok);
    assert!(results[0].1.error_message.as_deref().unwrap().contains("timed out"));
}
