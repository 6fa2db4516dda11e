//! Conversation history window
//!
//! Ordered (human, ai) turns for one customer, newest last, bounded to the
//! most recent N pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::inference::ChatMessage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Human,
    Ai,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Human => "human",
            TurnRole::Ai => "ai",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "ai" | "agent" | "assistant" => TurnRole::Ai,
            _ => TurnRole::Human,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Human, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Ai, text)
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            TurnRole::Human => ChatMessage::human(self.text.clone()),
            TurnRole::Ai => ChatMessage::ai(self.text.clone()),
        }
    }
}

/// Bounded turn window for a single customer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    updated_at: Option<DateTime<Utc>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: impl IntoIterator<Item = ConversationTurn>) -> Self {
        let turns: VecDeque<ConversationTurn> = turns.into_iter().collect();
        let updated_at = turns.back().map(|t| t.timestamp);
        Self { turns, updated_at }
    }

    /// Append one resolved (human, ai) exchange
    pub fn push_pair(&mut self, human: impl Into<String>, ai: impl Into<String>) {
        self.turns.push_back(ConversationTurn::human(human));
        self.turns.push_back(ConversationTurn::ai(ai));
        self.updated_at = Some(Utc::now());
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Drop the oldest entries until at most `max_pairs` pairs remain
    pub fn trim_to_recent(&mut self, max_pairs: usize) {
        let keep = max_pairs.saturating_mul(2);
        while self.turns.len() > keep {
            self.turns.pop_front();
        }
    }

    pub fn into_vec(self) -> Vec<ConversationTurn> {
        self.turns.into()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.updated_at = Some(Utc::now());
    }
}
