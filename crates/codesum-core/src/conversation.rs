//! Request and response shapes at the pipeline boundary.

use codesum_llm::Message;
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn. Only user and assistant turns are accepted from
/// callers; system instructions come from the configured template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(&self.content),
            TurnRole::Assistant => Message::assistant(&self.content),
        }
    }
}

/// Convert a caller-supplied history into chat messages, preserving order.
#[must_use]
pub fn history_messages(history: &[ConversationTurn]) -> Vec<Message> {
    history.iter().map(ConversationTurn::to_message).collect()
}

/// One question about one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub repository_url: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// The new user turn. When absent the configured default question is asked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl AskRequest {
    #[must_use]
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            history: Vec::new(),
            question: None,
        }
    }

    #[must_use]
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }
}

/// Synthesized answer plus the HEAD commit the snapshot was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub commit_message: String,
    pub commit_author: String,
    pub answer: String,
}
