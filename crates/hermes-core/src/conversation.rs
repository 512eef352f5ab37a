//! Conversation history
//!
//! An ordered message log that enforces tool-call pairing: once an assistant
//! message requests tool calls, the only thing that may follow is one `tool`
//! message per requested call, in any order, each answering a call exactly
//! once. Until every call is answered the history must not go back to the
//! model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("tool result for '{0}' does not answer an unresolved call")]
    UnexpectedResult(String),

    #[error("tool call '{0}' already has a result")]
    DuplicateResult(String),

    #[error("{0} tool call(s) are still awaiting results")]
    Unresolved(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Arguments exactly as the model sent them (a JSON document, unparsed)
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// May be absent on assistant messages that only carry tool calls
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// What the history needs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing to do: empty, or ended by a final assistant reply
    Idle,
    /// Last message is a user message or a fully answered tool round
    AwaitingModel,
    /// Tool calls of the last assistant message still lack results
    Unresolved,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    /// Calls of the most recent assistant message
    round: Vec<String>,
    /// Subset of `round` still waiting for a result
    pending: Vec<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, rejecting anything that would break pairing.
    pub fn append(&mut self, message: Message) -> Result<(), ConversationError> {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.clone().unwrap_or_default();
                if let Some(pos) = self.pending.iter().position(|p| *p == id) {
                    self.pending.remove(pos);
                } else if self.round.contains(&id) {
                    return Err(ConversationError::DuplicateResult(id));
                } else {
                    return Err(ConversationError::UnexpectedResult(id));
                }
            }
            Role::User | Role::Assistant => {
                if !self.pending.is_empty() {
                    return Err(ConversationError::Unresolved(self.pending.len()));
                }
                self.round = message.tool_calls.iter().map(|c| c.id.clone()).collect();
                self.pending = self.round.clone();
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Commit a finished tool round. Nothing is appended unless the round is
    /// complete and the history can accept it.
    pub fn commit(&mut self, round: ToolRound) -> Result<(), ConversationError> {
        if !self.pending.is_empty() {
            return Err(ConversationError::Unresolved(self.pending.len()));
        }
        let missing = round.missing();
        if missing > 0 {
            return Err(ConversationError::Unresolved(missing));
        }
        let ToolRound { assistant, results } = round;
        self.append(assistant)?;
        for message in results.into_iter().flatten() {
            self.append(message)?;
        }
        Ok(())
    }

    /// The full history, in order
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.round.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn unresolved_calls(&self) -> &[String] {
        &self.pending
    }

    pub fn phase(&self) -> Phase {
        if !self.pending.is_empty() {
            return Phase::Unresolved;
        }
        match self.messages.last() {
            None => Phase::Idle,
            Some(m) if m.role == Role::Assistant => Phase::Idle,
            Some(_) => Phase::AwaitingModel,
        }
    }

    /// Content of the final assistant reply, if the history ends with one
    pub fn last_reply(&self) -> Option<&str> {
        match self.messages.last() {
            Some(m) if m.role == Role::Assistant && !m.has_tool_calls() => {
                Some(m.content.as_deref().unwrap_or(""))
            }
            _ => None,
        }
    }
}

/// A tool round being resolved: the assistant message plus the results
/// collected so far, one slot per requested call.
#[derive(Debug, Clone)]
pub struct ToolRound {
    assistant: Message,
    results: Vec<Option<Message>>,
}

impl ToolRound {
    pub fn new(assistant: Message) -> Self {
        let results = vec![None; assistant.tool_calls.len()];
        Self { assistant, results }
    }

    pub fn calls(&self) -> &[ToolCallRequest] {
        &self.assistant.tool_calls
    }

    /// Record the result for `call_id`.
    pub fn resolve(
        &mut self,
        call_id: &str,
        content: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let mut seen = false;
        for (call, slot) in self.assistant.tool_calls.iter().zip(self.results.iter_mut()) {
            if call.id != call_id {
                continue;
            }
            seen = true;
            if slot.is_none() {
                *slot = Some(Message::tool(call_id, content));
                return Ok(());
            }
        }
        if seen {
            Err(ConversationError::DuplicateResult(call_id.to_string()))
        } else {
            Err(ConversationError::UnexpectedResult(call_id.to_string()))
        }
    }

    pub fn missing(&self) -> usize {
        self.results.iter().filter(|r| r.is_none()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "search".to_string(),
            arguments: r#"{"query":"rust"}"#.to_string(),
        }
    }

    #[test]
    fn test_phases() {
        let mut store = ConversationStore::new();
        assert_eq!(store.phase(), Phase::Idle);

        store.append(Message::user("hi")).unwrap();
        assert_eq!(store.phase(), Phase::AwaitingModel);

        store
            .append(Message::assistant(None, vec![call("a"), call("b")]))
            .unwrap();
        assert_eq!(store.phase(), Phase::Unresolved);
        assert_eq!(store.unresolved_calls(), ["a", "b"]);

        store.append(Message::tool("b", "{}")).unwrap();
        store.append(Message::tool("a", "{}")).unwrap();
        assert_eq!(store.phase(), Phase::AwaitingModel);

        store
            .append(Message::assistant(Some("done".into()), vec![]))
            .unwrap();
        assert_eq!(store.phase(), Phase::Idle);
        assert_eq!(store.last_reply(), Some("done"));
    }

    #[test]
    fn test_rejects_unknown_result() {
        let mut store = ConversationStore::new();
        store.append(Message::user("hi")).unwrap();
        let err = store.append(Message::tool("x", "{}")).unwrap_err();
        assert_eq!(err, ConversationError::UnexpectedResult("x".into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_result() {
        let mut store = ConversationStore::new();
        store
            .append(Message::assistant(None, vec![call("a"), call("b")]))
            .unwrap();
        store.append(Message::tool("a", "{}")).unwrap();
        let err = store.append(Message::tool("a", "{}")).unwrap_err();
        assert_eq!(err, ConversationError::DuplicateResult("a".into()));
    }

    #[test]
    fn test_rejects_message_while_unresolved() {
        let mut store = ConversationStore::new();
        store.append(Message::assistant(None, vec![call("a")])).unwrap();
        let err = store.append(Message::user("again")).unwrap_err();
        assert_eq!(err, ConversationError::Unresolved(1));
    }

    #[test]
    fn test_result_for_older_round_is_rejected() {
        let mut store = ConversationStore::new();
        store.append(Message::assistant(None, vec![call("a")])).unwrap();
        store.append(Message::tool("a", "{}")).unwrap();
        store.append(Message::assistant(None, vec![call("b")])).unwrap();
        let err = store.append(Message::tool("a", "{}")).unwrap_err();
        assert_eq!(err, ConversationError::UnexpectedResult("a".into()));
    }

    #[test]
    fn test_commit_complete_round() {
        let mut store = ConversationStore::new();
        store.append(Message::user("hi")).unwrap();

        let mut round = ToolRound::new(Message::assistant(None, vec![call("a"), call("b")]));
        round.resolve("b", "second").unwrap();
        round.resolve("a", "first").unwrap();
        store.commit(round).unwrap();

        let ids: Vec<_> = store.snapshot()[2..]
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.phase(), Phase::AwaitingModel);
    }

    #[test]
    fn test_commit_incomplete_round_changes_nothing() {
        let mut store = ConversationStore::new();
        store.append(Message::user("hi")).unwrap();

        let mut round = ToolRound::new(Message::assistant(None, vec![call("a"), call("b")]));
        round.resolve("a", "first").unwrap();
        let err = store.commit(round).unwrap_err();

        assert_eq!(err, ConversationError::Unresolved(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_round_rejects_foreign_and_repeated_ids() {
        let mut round = ToolRound::new(Message::assistant(None, vec![call("a")]));
        assert!(round.resolve("z", "{}").is_err());
        round.resolve("a", "{}").unwrap();
        assert_eq!(
            round.resolve("a", "{}").unwrap_err(),
            ConversationError::DuplicateResult("a".into())
        );
        assert!(round.is_complete());
    }

    #[test]
    fn test_clear() {
        let mut store = ConversationStore::new();
        store.append(Message::assistant(None, vec![call("a")])).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.phase(), Phase::Idle);
        store.append(Message::user("fresh")).unwrap();
    }
}
