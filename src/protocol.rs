//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::chat::ChatSession;
use crate::domain::{LearningModule, Theme, DEFAULT_QUESTION_COUNT};
use crate::puzzle::{AnswerOutcome, PuzzleState};
use crate::session::SessionSnapshot;

fn default_question_count() -> usize {
    DEFAULT_QUESTION_COUNT
}

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Start (or restart) generation; becomes the connection's active session.
    Generate(GenerateIn),
    SubmitAnswer {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        #[serde(rename = "chosenOption")]
        chosen_option: String,
    },
    AdvanceLevel,
    Evaluate {
        answer: String,
    },
    ChatSend {
        message: String,
    },
    /// Fetch a snapshot; with `sessionId`, also switch the active session.
    GetSession {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },
}

impl ClientWsMessage {
    /// Wire tag, for logs (payloads carry learner text and stay out of them).
    pub fn kind(&self) -> &'static str {
        match self {
            ClientWsMessage::Ping => "ping",
            ClientWsMessage::Generate(_) => "generate",
            ClientWsMessage::SubmitAnswer { .. } => "submit_answer",
            ClientWsMessage::AdvanceLevel => "advance_level",
            ClientWsMessage::Evaluate { .. } => "evaluate",
            ClientWsMessage::ChatSend { .. } => "chat_send",
            ClientWsMessage::GetSession { .. } => "get_session",
        }
    }
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionSnapshot,
    },
    AnswerResult {
        outcome: AnswerOutcome,
        puzzle: PuzzleState,
    },
    /// Puzzle changed outside a request/response pair (delayed reveal).
    Puzzle {
        puzzle: PuzzleState,
    },
    ChatFragment {
        text: String,
    },
    ChatDone {
        reply: String,
        failed: bool,
        chat: ChatSession,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct GenerateIn {
    /// Regenerate into an existing session instead of creating one.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(rename = "sourceText")]
    pub source_text: String,
    #[serde(default)]
    pub theme: Theme,
    pub modules: Vec<LearningModule>,
    #[serde(rename = "questionCount", default = "default_question_count")]
    pub question_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "questionIndex")]
    pub question_index: usize,
    #[serde(rename = "chosenOption")]
    pub chosen_option: String,
}
#[derive(Debug, Serialize)]
pub struct AnswerOut {
    pub outcome: AnswerOutcome,
    pub puzzle: PuzzleState,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateIn {
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatIn {
    pub message: String,
}
#[derive(Debug, Serialize)]
pub struct ChatOut {
    pub reply: String,
    pub failed: bool,
    pub chat: ChatSession,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub provider: String,
    pub sessions: usize,
}
