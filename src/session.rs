//! Conversation state for a single chat session
//!
//! Holds the message log, the opaque history token the backend hands back
//! on every reply, and what the session is currently doing. None of this
//! depends on the terminal UI, so it can be driven directly from tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::client::{ChatReply, TransportError};

/// A chat message in the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Server-side conversation context, replayed verbatim on the next request.
///
/// The client never looks inside it. It is array-shaped on the wire and
/// empty for the first request of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryToken(Vec<serde_json::Value>);

impl HistoryToken {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<serde_json::Value>> for HistoryToken {
    fn from(entries: Vec<serde_json::Value>) -> Self {
        Self(entries)
    }
}

/// Identifies one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Identifies one voice capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture-{}", self.0)
    }
}

/// What the session is doing right now.
///
/// Listening and waiting for a reply are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Listening(CaptureId),
    /// `stale` is set when the log was cleared while this request was in
    /// flight; its outcome gets dropped on arrival.
    Pending { ticket: Ticket, stale: bool },
}

/// Why the session refused an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("message is empty")]
    Empty,
    #[error("still waiting for the previous reply")]
    Busy,
}

/// A request the caller must now send to the backend
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub ticket: Ticket,
    pub message: String,
    pub history: HistoryToken,
}

#[derive(Debug)]
pub struct Session {
    messages: Vec<ChatMessage>,
    history: HistoryToken,
    activity: Activity,
    next_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            history: HistoryToken::default(),
            activity: Activity::Idle,
            next_id: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn history(&self) -> &HistoryToken {
        &self.history
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.activity, Activity::Pending { .. })
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.activity, Activity::Listening(_))
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Append the user's message and move to Pending.
    ///
    /// Submitting while listening ends the capture; the caller is expected
    /// to stop the recognizer.
    pub fn append_user_message(&mut self, text: &str) -> Result<Outgoing, Rejected> {
        let message = text.trim();
        if message.is_empty() {
            return Err(Rejected::Empty);
        }
        if self.is_pending() {
            return Err(Rejected::Busy);
        }

        self.messages.push(ChatMessage {
            role: ChatRole::User,
            content: message.to_string(),
        });

        let ticket = Ticket(self.next_id());
        self.activity = Activity::Pending {
            ticket,
            stale: false,
        };

        Ok(Outgoing {
            ticket,
            message: message.to_string(),
            history: self.history.clone(),
        })
    }

    /// Take ownership of the pending request if `ticket` answers it.
    ///
    /// Returns `Some(stale)` when it does and moves back to Idle.
    fn settle(&mut self, ticket: Ticket) -> Option<bool> {
        match self.activity {
            Activity::Pending { ticket: current, stale } if current == ticket => {
                self.activity = Activity::Idle;
                Some(stale)
            }
            _ => None,
        }
    }

    /// Returns true if the reply was recorded.
    pub fn complete_with_assistant_reply(
        &mut self,
        ticket: Ticket,
        reply: String,
        history: HistoryToken,
    ) -> bool {
        match self.settle(ticket) {
            Some(false) => {
                self.messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: reply,
                });
                self.history = history;
                true
            }
            _ => false,
        }
    }

    /// Record a failed exchange as an assistant message.
    ///
    /// The user message that triggered it stays in the log.
    pub fn complete_with_error(&mut self, ticket: Ticket, error_text: String) -> bool {
        match self.settle(ticket) {
            Some(false) => {
                self.messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: error_text,
                });
                true
            }
            _ => false,
        }
    }

    pub fn complete(&mut self, ticket: Ticket, outcome: Result<ChatReply, TransportError>) -> bool {
        match outcome {
            Ok(reply) => {
                self.complete_with_assistant_reply(ticket, reply.response, reply.conversation_history)
            }
            Err(err) => self.complete_with_error(ticket, format!("Error: {}", err)),
        }
    }

    /// Empty the log and forget the history token together.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.history = HistoryToken::default();
        if let Activity::Pending { ticket, .. } = self.activity {
            self.activity = Activity::Pending { ticket, stale: true };
        }
    }

    pub fn begin_listening(&mut self) -> Result<CaptureId, Rejected> {
        if self.is_pending() {
            return Err(Rejected::Busy);
        }
        let capture = CaptureId(self.next_id());
        self.activity = Activity::Listening(capture);
        Ok(capture)
    }

    /// Stop the current capture, if any. Safe to call repeatedly.
    pub fn stop_listening(&mut self) -> Option<CaptureId> {
        match self.activity {
            Activity::Listening(capture) => {
                self.activity = Activity::Idle;
                Some(capture)
            }
            _ => None,
        }
    }

    /// Returns true if `capture` was the live capture.
    pub fn finish_listening(&mut self, capture: CaptureId) -> bool {
        match self.activity {
            Activity::Listening(current) if current == capture => {
                self.activity = Activity::Idle;
                true
            }
            _ => false,
        }
    }
}
