//! Conversation history
//!
//! Ordered sequence of turns owned by the session coordinator. Append-only,
//! except that the last assistant turn may grow in place while a response is
//! streaming; once finalized it is immutable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    /// The human user
    User,
    /// The avatar assistant
    Assistant,
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    /// Unique turn ID
    pub id: Uuid,

    /// Speaker role
    pub role: ConversationRole,

    /// Turn text; for a streaming assistant turn this is the accumulated
    /// content so far
    pub content: String,

    /// Whether the turn content is complete
    pub is_final: bool,

    /// When the turn was created
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: ConversationRole, content: String, is_final: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            is_final,
            created_at: Utc::now(),
        }
    }
}

/// Ordered conversation turns owned by the coordinator
///
/// Presentation layers receive read-only snapshots via [`Self::turns`].
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a finalized user turn
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns
            .push(ConversationTurn::new(ConversationRole::User, content.into(), true));
    }

    /// Append a finalized assistant turn (welcome message, canned replies)
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::new(
            ConversationRole::Assistant,
            content.into(),
            true,
        ));
    }

    /// Append a placeholder assistant turn for a response about to stream
    pub fn begin_assistant(&mut self, placeholder: impl Into<String>) {
        self.turns.push(ConversationTurn::new(
            ConversationRole::Assistant,
            placeholder.into(),
            false,
        ));
    }

    /// Replace the in-progress assistant turn's content with the accumulated
    /// text received so far
    ///
    /// No-op if the last turn is not an unfinalized assistant turn — a late
    /// chunk from a superseded stream must never touch a finalized turn.
    pub fn update_streaming(&mut self, accumulated: &str) {
        if let Some(turn) = self.turns.last_mut()
            && turn.role == ConversationRole::Assistant
            && !turn.is_final
        {
            turn.content.clear();
            turn.content.push_str(accumulated);
        }
    }

    /// Finalize the in-progress assistant turn with the full response text
    pub fn finalize_assistant(&mut self, full_text: &str) {
        if let Some(turn) = self.turns.last_mut()
            && turn.role == ConversationRole::Assistant
            && !turn.is_final
        {
            turn.content.clear();
            turn.content.push_str(full_text);
            turn.is_final = true;
        }
    }

    /// Read-only view of all turns
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The most recent turn, if any
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent finalized user turn's content, if any
    #[must_use]
    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == ConversationRole::User)
            .map(|t| t.content.as_str())
    }
}
