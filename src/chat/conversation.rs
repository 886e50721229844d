use std::collections::VecDeque;

use crate::llm::ChatMessage;

/// Three user/assistant exchanges.
pub const HISTORY_TURN_LIMIT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: VecDeque<ChatMessage>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_limit(HISTORY_TURN_LIMIT)
    }
}

impl ConversationHistory {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit + 2),
            limit,
        }
    }

    /// Appends one exchange, user turn first, then drops the oldest turns
    /// beyond the limit.
    pub fn record_exchange(&mut self, user_text: impl Into<String>, reply: impl Into<String>) {
        self.turns.push_back(ChatMessage::user(user_text));
        self.turns.push_back(ChatMessage::assistant(reply));
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ChatMessage> {
        self.turns.iter()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Process-wide chat state guarded by the service mutex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub history: ConversationHistory,
    pub active_mode: Option<String>,
}

/// System prompt first, then stored history, then the current user turn.
pub fn build_outbound_messages(
    system_prompt: String,
    history: Vec<ChatMessage>,
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history);
    messages.push(ChatMessage::user(user_text));
    messages
}
