//! Shared conversation data structures used by the provider abstraction,
//! the iteration controller, and the judge-output parser.

use serde::{Deserialize, Serialize};

/// The role a [`ChatMessage`] plays within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The immutable system prompt (SP). At most one per conversation, first.
    System,
    /// A user-authored turn (task preamble + UQ/UP/history render into these).
    User,
    /// A prior model response, used when replaying history back to a provider.
    Assistant,
}

impl Role {
    /// Returns the wire-level string used by OpenAI-compatible chat APIs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single turn in a chat-style conversation passed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking in this turn.
    pub role: Role,
    /// The turn's text content.
    pub content: String,
}

impl ChatMessage {
    /// Builds a system-role message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Builds a user-role message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Builds an assistant-role message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
