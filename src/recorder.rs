//! Turn-by-turn transcript of one call.
//!
//! Append-only. Assistant transcript deltas coalesce into one open turn
//! until a boundary closes it: a caller turn, the authoritative
//! `transcript.done` text, or the end of a response cycle. Barge-in stops
//! further deltas from joining the turn but still lets the interrupted
//! response's `transcript.done` settle its text. Two adjacent assistant
//! turns therefore always belong to distinct response cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Caller => "Caller",
            Self::Assistant => "Assistant",
        }
    }
}

/// One contiguous utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// When the turn started.
    pub timestamp: DateTime<Utc>,
}

/// State of the last assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum AssistantTurn {
    #[default]
    Closed,
    /// Accepting deltas.
    Streaming,
    /// Cut off by the caller; waiting only for its final transcript.
    Interrupted,
}

#[derive(Debug, Default)]
pub struct ConversationRecorder {
    turns: Vec<ConversationTurn>,
    last_assistant: AssistantTurn,
}

impl ConversationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed caller transcription. Closes any open assistant turn.
    pub fn caller(&mut self, text: &str) {
        self.last_assistant = AssistantTurn::Closed;
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.turns.push(ConversationTurn {
            role: Role::Caller,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Incremental assistant transcript text.
    pub fn assistant_delta(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if self.last_assistant == AssistantTurn::Streaming {
            if let Some(turn) = self.turns.last_mut() {
                turn.text.push_str(delta);
                return;
            }
        }
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            text: delta.to_string(),
            timestamp: Utc::now(),
        });
        self.last_assistant = AssistantTurn::Streaming;
    }

    /// Authoritative transcript of the finished utterance. Replaces the open
    /// or interrupted turn's accumulated deltas (or appends one if none
    /// arrived) and closes it.
    pub fn assistant_done(&mut self, transcript: &str) {
        let transcript = transcript.trim();
        let last = std::mem::take(&mut self.last_assistant);
        if last != AssistantTurn::Closed {
            if let Some(turn) = self.turns.last_mut() {
                if !transcript.is_empty() {
                    turn.text = transcript.to_string();
                }
                return;
            }
        }
        if transcript.is_empty() {
            return;
        }
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            text: transcript.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// The response cycle finished.
    pub fn boundary(&mut self) {
        self.last_assistant = AssistantTurn::Closed;
    }

    /// The caller started talking over the assistant. Later deltas start a
    /// new turn; the pending final transcript still lands on this one.
    pub fn interrupt(&mut self) {
        if self.last_assistant == AssistantTurn::Streaming {
            self.last_assistant = AssistantTurn::Interrupted;
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Plain dialogue, one `Role: text` line per turn.
    pub fn render_dialogue(&self) -> String {
        render_dialogue(&self.turns)
    }
}

pub fn render_dialogue(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}
