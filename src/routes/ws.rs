//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic.
//!
//! Outgoing messages go through a per-connection outbox drained by a writer task,
//! so a request can emit several messages (chat fragments, a delayed reveal)
//! while the reader keeps going. The connection remembers its active session.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, instrument};

use crate::error::StudyError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, GenerateIn, ServerWsMessage};
use crate::state::AppState;

type Outbox = UnboundedSender<Message>;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "study_aid_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn push(outbox: &Outbox, msg: &ServerWsMessage) {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  // A closed outbox means the writer is gone; the reader loop ends on its own.
  let _ = outbox.send(Message::Text(out));
}

fn push_error(outbox: &Outbox, e: &StudyError) {
  push(outbox, &ServerWsMessage::Error { message: e.to_string() });
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
  info!(target: "study_aid_backend", "WebSocket connected");
  let (mut sink, mut stream) = socket.split();
  let (outbox, mut outgoing) = mpsc::unbounded_channel::<Message>();

  let writer = tokio::spawn(async move {
    while let Some(msg) = outgoing.recv().await {
      if let Err(e) = sink.send(msg).await {
        error!(target: "study_aid_backend", error = %e, "WS send error");
        break;
      }
    }
  });

  let mut active: Option<String> = None;
  while let Some(Ok(msg)) = stream.next().await {
    match msg {
      Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
        Ok(incoming) => {
          debug!(target: "study_aid_backend", kind = incoming.kind(), "WS received");
          handle_client_ws(incoming, &state, &mut active, &outbox).await;
        }
        Err(e) => push(&outbox, &ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
      },
      Message::Ping(payload) => { let _ = outbox.send(Message::Pong(payload)); }
      Message::Close(_) => break,
      _ => {}
    }
    if writer.is_finished() {
      break;
    }
  }

  drop(outbox);
  let _ = writer.await;
  info!(target: "study_aid_backend", "WebSocket disconnected");
}

/// Dispatch one client message; replies are pushed to `outbox`.
#[instrument(level = "info", skip_all, fields(kind = msg.kind(), active = ?active))]
async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>, active: &mut Option<String>, outbox: &Outbox) {
  if let ClientWsMessage::Ping = msg {
    push(outbox, &ServerWsMessage::Pong);
    return;
  }

  if let ClientWsMessage::Generate(GenerateIn { session_id, source_text, theme, modules, question_count }) = msg {
    let target = session_id.or_else(|| active.clone());
    match start_generation(state, target.as_deref(), source_text, theme, modules, question_count).await {
      Ok(session) => {
        info!(target: "study", id = %session.id, "WS generation served");
        *active = Some(session.id.clone());
        push(outbox, &ServerWsMessage::Session { session });
      }
      Err(e) => push_error(outbox, &e),
    }
    return;
  }

  if let ClientWsMessage::GetSession { session_id: Some(id) } = &msg {
    *active = Some(id.clone());
  }
  let Some(id) = active.clone() else {
    push(outbox, &ServerWsMessage::Error { message: "No active session; send `generate` first.".into() });
    return;
  };

  let reply = match msg {
    ClientWsMessage::GetSession { .. } => get_session(state, &id).await.map(|session| ServerWsMessage::Session { session }),

    ClientWsMessage::SubmitAnswer { question_index, chosen_option } => {
      submit_answer(state, &id, question_index, &chosen_option).await.map(|receipt| {
        let st = state.clone();
        let later = outbox.clone();
        let reveal = receipt.reveal;
        tokio::spawn(async move {
          if let Some(puzzle) = complete_reveal(&st, reveal).await {
            push(&later, &ServerWsMessage::Puzzle { puzzle });
          }
        });
        info!(target: "study", %id, correct = receipt.outcome.correct, "WS submit_answer recorded");
        ServerWsMessage::AnswerResult { outcome: receipt.outcome, puzzle: receipt.puzzle }
      })
    }

    ClientWsMessage::AdvanceLevel => advance_level(state, &id).await.map(|puzzle| ServerWsMessage::Puzzle { puzzle }),

    ClientWsMessage::Evaluate { answer } => {
      evaluate_scenario(state, &id, &answer).await.map(|puzzle| ServerWsMessage::Puzzle { puzzle })
    }

    ClientWsMessage::ChatSend { message } => {
      let fragments = outbox.clone();
      send_chat(state, &id, &message, move |text| {
        push(&fragments, &ServerWsMessage::ChatFragment { text: text.to_string() });
      })
      .await
      .map(|ChatReply { reply, failed, chat }| ServerWsMessage::ChatDone { reply, failed, chat })
    }

    ClientWsMessage::Ping | ClientWsMessage::Generate(_) => return,
  };

  match reply {
    Ok(m) => push(outbox, &m),
    Err(e) => push_error(outbox, &e),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::{json, Value};
  use tokio::sync::mpsc::UnboundedReceiver;

  use super::*;
  use crate::config::{Prompts, Settings};
  use crate::provider::testing::ScriptedProvider;

  struct Client {
    state: Arc<AppState>,
    active: Option<String>,
    outbox: Outbox,
    inbox: UnboundedReceiver<Message>,
  }

  impl Client {
    fn new(reveal_delay_ms: u64) -> Self {
      let settings = Settings { reveal_delay_ms, ..Settings::default() };
      let state = Arc::new(AppState::with_provider(Arc::new(ScriptedProvider::happy()), Prompts::default(), settings));
      let (outbox, inbox) = mpsc::unbounded_channel();
      Self { state, active: None, outbox, inbox }
    }

    async fn send(&mut self, raw: Value) {
      let msg: ClientWsMessage = serde_json::from_value(raw).unwrap();
      handle_client_ws(msg, &self.state, &mut self.active, &self.outbox).await;
    }

    async fn next(&mut self) -> Value {
      match tokio::time::timeout(Duration::from_secs(2), self.inbox.recv()).await {
        Ok(Some(Message::Text(txt))) => serde_json::from_str(&txt).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
      }
    }

    async fn generate(&mut self, modules: Value) -> Value {
      self.send(json!({ "type": "generate", "sourceText": "Plants need light.", "modules": modules })).await;
      let msg = self.next().await;
      assert_eq!(msg["type"], "session");
      msg
    }
  }

  #[tokio::test]
  async fn generate_sets_the_active_session() {
    let mut c = Client::new(0);
    let msg = c.generate(json!(["summary", "puzzle_learning"])).await;
    assert_eq!(msg["session"]["view"], "DASHBOARD");
    assert_eq!(c.active.as_deref(), msg["session"]["id"].as_str());

    c.send(json!({ "type": "get_session" })).await;
    let again = c.next().await;
    assert_eq!(again["type"], "session");
    assert_eq!(again["session"]["id"], msg["session"]["id"]);
  }

  #[tokio::test]
  async fn answer_result_precedes_the_revealed_puzzle() {
    let mut c = Client::new(30);
    c.generate(json!(["puzzle_learning"])).await;

    c.send(json!({ "type": "submit_answer", "questionIndex": 0, "chosenOption": "A" })).await;
    let first = c.next().await;
    assert_eq!(first["type"], "answer_result");
    assert_eq!(first["outcome"]["correct"], true);
    assert_eq!(first["puzzle"]["level1"]["currentQuestionIndex"], 0);
    assert_eq!(first["puzzle"]["level1"]["userAnswers"][0], "A");

    let second = c.next().await;
    assert_eq!(second["type"], "puzzle");
    assert_eq!(second["puzzle"]["level1"]["currentQuestionIndex"], 1);
  }

  #[tokio::test]
  async fn chat_fragments_stream_before_done() {
    let mut c = Client::new(0);
    c.generate(json!(["chat"])).await;

    c.send(json!({ "type": "chat_send", "message": "Why light?" })).await;
    let mut texts = Vec::new();
    for _ in 0..3 {
      let msg = c.next().await;
      assert_eq!(msg["type"], "chat_fragment");
      texts.push(msg["text"].as_str().unwrap().to_string());
    }
    assert_eq!(texts, vec!["Hel", "lo", "!"]);

    let done = c.next().await;
    assert_eq!(done["type"], "chat_done");
    assert_eq!(done["reply"], "Hello!");
    assert_eq!(done["failed"], false);
    assert_eq!(done["chat"]["history"].as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn failures_come_back_as_error_messages() {
    let mut c = Client::new(0);

    c.send(json!({ "type": "advance_level" })).await;
    let msg = c.next().await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "No active session; send `generate` first.");

    c.send(json!({ "type": "generate", "sourceText": "  ", "modules": ["summary"] })).await;
    let msg = c.next().await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "Please provide text to learn.");
    assert!(c.active.is_none());

    c.generate(json!(["puzzle_learning"])).await;
    c.send(json!({ "type": "advance_level" })).await;
    let msg = c.next().await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], StudyError::LevelIncomplete.to_string());

    c.send(json!({ "type": "ping" })).await;
    assert_eq!(c.next().await["type"], "pong");
  }
}
