//! JSON messages exchanged with the walkthrough client.

use crate::emotion::DEFAULT_EMOTION;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Supplies the full document; only the first non-empty one is kept.
    Init,
    /// Asks for the next turn of the walkthrough.
    Next,
}

/// A message from the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundEvent {
    pub action: Action,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default, alias = "summary")]
    pub document: Option<String>,
}

impl InboundEvent {
    pub fn init(document: impl Into<String>) -> Self {
        Self {
            action: Action::Init,
            emotion: None,
            document: Some(document.into()),
        }
    }

    pub fn next() -> Self {
        Self {
            action: Action::Next,
            emotion: None,
            document: None,
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    /// The reported emotion, `"neutral"` when absent.
    pub fn emotion_label(&self) -> &str {
        self.emotion.as_deref().unwrap_or(DEFAULT_EMOTION)
    }
}

/// A message to the client. Every turn ends with `End`, `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Message {
        text: String,
    },
    End {
        section: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<String>,
    },
    Complete,
    Error {
        error: String,
    },
}

impl Outbound {
    pub fn message(text: impl Into<String>) -> Self {
        Outbound::Message { text: text.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Outbound::Error {
            error: error.into(),
        }
    }
}
