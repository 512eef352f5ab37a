//! Agent orchestration loop
//!
//! Handles the model ↔ tool cycle for one user turn. Frontends provide a
//! callback for status updates and a cancellation token; the loop handles
//! the rest.
//!
//! Each tool round is staged in a [`ToolRound`] and committed to the store
//! only once every call has a result, so a cancelled or expired round never
//! leaves half-answered calls in the history.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::conversation::{ConversationError, ConversationStore, Message, Phase, ToolRound};
use crate::dispatcher::ToolDispatcher;
use crate::gateway::{ModelGateway, ModelReply, TransportError};

/// Default maximum tool rounds per turn
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Length of the previews carried by events
const PREVIEW_CHARS: usize = 100;

/// Events emitted during a turn for UI updates
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Waiting for the model
    Thinking,
    /// Text the model sent alongside tool calls
    Narration(String),
    /// A tool is about to run
    ToolCall { name: String, preview: String },
    /// A line the running tool logged
    Observation { name: String, line: String },
    /// Tool finished
    ToolResult {
        name: String,
        ok: bool,
        preview: String,
    },
    /// Final text response
    Response(String),
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Done { reply: String, rounds: usize },
    /// `max_rounds` or `turn_deadline` reached before a final reply
    BudgetExceeded { rounds: usize },
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_rounds: usize,
    /// Wall-clock limit for the whole turn
    pub turn_deadline: Option<Duration>,
    /// Limit for a single model call
    pub model_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: MAX_TOOL_ROUNDS,
            turn_deadline: None,
            model_timeout: Duration::from_secs(60),
        }
    }
}

pub struct Agent<G> {
    gateway: G,
    dispatcher: ToolDispatcher,
    config: AgentConfig,
}

impl<G: ModelGateway> Agent<G> {
    pub fn new(gateway: G, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        Self {
            gateway,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Append a user message and run the loop until it settles.
    pub async fn send<F>(
        &self,
        store: &mut ConversationStore,
        text: &str,
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(AgentEvent),
    {
        store.append(Message::user(text))?;
        self.resume(store, cancel, on_event).await
    }

    /// Run the loop on the existing history. A finished history makes no
    /// model call.
    pub async fn resume<F>(
        &self,
        store: &mut ConversationStore,
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(AgentEvent),
    {
        let span = info_span!("turn", turn_id = %Uuid::new_v4());
        self.run(store, cancel, on_event).instrument(span).await
    }

    async fn run<F>(
        &self,
        store: &mut ConversationStore,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<TurnOutcome, TurnError>
    where
        F: FnMut(AgentEvent),
    {
        let deadline = self.config.turn_deadline.map(|d| Instant::now() + d);
        let mut rounds = 0;

        loop {
            match store.phase() {
                Phase::Idle => {
                    let reply = store.last_reply().unwrap_or_default().to_string();
                    return Ok(TurnOutcome::Done { reply, rounds });
                }
                Phase::Unresolved => {
                    let count = store.unresolved_calls().len();
                    return Err(ConversationError::Unresolved(count).into());
                }
                Phase::AwaitingModel => {}
            }

            if rounds >= self.config.max_rounds {
                warn!(rounds, "Tool round budget exhausted");
                return Ok(TurnOutcome::BudgetExceeded { rounds });
            }

            on_event(AgentEvent::Thinking);
            let reply = match guarded(cancel, deadline, self.call_model(store.snapshot())).await {
                Ok(reply) => reply.inspect_err(|e| warn!(error = %e, "Model call failed"))?,
                Err(stop) => return Ok(stop.outcome(rounds)),
            };

            if reply.tool_calls.is_empty() {
                let text = reply.content.clone().unwrap_or_default();
                store.append(reply.into_message())?;
                info!(rounds, "Turn complete");
                on_event(AgentEvent::Response(text.clone()));
                return Ok(TurnOutcome::Done {
                    reply: text,
                    rounds,
                });
            }

            if let Some(text) = &reply.content {
                on_event(AgentEvent::Narration(text.clone()));
            }

            let mut round = ToolRound::new(reply.into_message());
            let calls = round.calls().to_vec();
            info!(round = rounds + 1, calls = calls.len(), "Resolving tool calls");

            for call in &calls {
                on_event(AgentEvent::ToolCall {
                    name: call.name.clone(),
                    preview: preview(&call.arguments),
                });

                let dispatch = self.dispatcher.dispatch(&call.name, &call.arguments);
                let dispatch = match guarded(cancel, deadline, dispatch).await {
                    Ok(dispatch) => dispatch,
                    Err(stop) => {
                        info!(tool = %call.name, "Discarding unfinished tool round");
                        return Ok(stop.outcome(rounds));
                    }
                };

                for line in dispatch.observations {
                    on_event(AgentEvent::Observation {
                        name: call.name.clone(),
                        line,
                    });
                }

                let content = dispatch.result.to_content();
                on_event(AgentEvent::ToolResult {
                    name: call.name.clone(),
                    ok: dispatch.result.ok,
                    preview: preview(&content),
                });
                round.resolve(&call.id, content)?;
            }

            store.commit(round)?;
            rounds += 1;
        }
    }

    async fn call_model(&self, history: &[Message]) -> Result<ModelReply, TransportError> {
        let timeout = self.config.model_timeout;
        match tokio::time::timeout(timeout, self.gateway.complete(history)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

/// Why a guarded step did not finish
enum Interrupt {
    Cancelled,
    Deadline,
}

impl Interrupt {
    fn outcome(self, rounds: usize) -> TurnOutcome {
        match self {
            Interrupt::Cancelled => {
                info!("Turn cancelled");
                TurnOutcome::Cancelled
            }
            Interrupt::Deadline => {
                warn!(rounds, "Turn deadline reached");
                TurnOutcome::BudgetExceeded { rounds }
            }
        }
    }
}

/// Run `step` unless the turn is cancelled or its deadline passes first.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    step: impl Future<Output = T>,
) -> Result<T, Interrupt> {
    let expiry = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = expiry => Err(Interrupt::Deadline),
        out = step => Ok(out),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
