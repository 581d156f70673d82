//! The core models for managing a stateful chat with an LLM.
use crate::openai::ChatTurn;

#[derive(Debug, Default, Clone)]
pub struct Transcript(Vec<ChatTurn>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_messages(messages: Vec<ChatTurn>) -> Self {
        Self(messages)
    }

    pub fn messages(&self) -> &[ChatTurn] {
        &self.0
    }

    pub fn push(&mut self, msg: ChatTurn) {
        self.0.push(msg)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatTurn> {
        self.0.iter()
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The assistant finished its reply.
    Completed(ChatTurn),
    /// The user stopped the reply. Holds whatever text had arrived.
    Cancelled(Option<ChatTurn>),
}
