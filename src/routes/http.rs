//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.
//! Errors convert into `{"error": message}` with a 400/404/409 status.

use std::sync::Arc;
use axum::{extract::{Path, State}, Json};
use tracing::{info, instrument};

use crate::error::StudyError;
use crate::logic::*;
use crate::protocol::*;
use crate::puzzle::PuzzleState;
use crate::session::SessionSnapshot;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthOut> {
  let sessions = state.session_count().await;
  Json(HealthOut { ok: true, provider: state.provider.name().to_string(), sessions })
}

#[instrument(level = "info", skip(state, body), fields(session_id = ?body.session_id, text_len = body.source_text.len(), modules = ?body.modules))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateIn>,
) -> Result<Json<SessionSnapshot>, StudyError> {
  let snapshot = start_generation(
    &state,
    body.session_id.as_deref(),
    body.source_text,
    body.theme,
    body.modules,
    body.question_count,
  )
  .await?;
  info!(target: "study", id = %snapshot.id, "HTTP generation served");
  Ok(Json(snapshot))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, StudyError> {
  Ok(Json(get_session(&state, &id).await?))
}

/// Records the answer and schedules the reveal; clients poll the session to see
/// the cursor move.
#[instrument(level = "info", skip(state, body), fields(%id, question_index = body.question_index))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, StudyError> {
  let receipt = submit_answer(&state, &id, body.question_index, &body.chosen_option).await?;
  let st = state.clone();
  let reveal = receipt.reveal;
  tokio::spawn(async move {
    complete_reveal(&st, reveal).await;
  });
  info!(target: "study", %id, correct = receipt.outcome.correct, "HTTP submit_answer recorded");
  Ok(Json(AnswerOut { outcome: receipt.outcome, puzzle: receipt.puzzle }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_advance(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<PuzzleState>, StudyError> {
  Ok(Json(advance_level(&state, &id).await?))
}

#[instrument(level = "info", skip(state, body), fields(%id, answer_len = body.answer.len()))]
pub async fn http_post_evaluate(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<EvaluateIn>,
) -> Result<Json<PuzzleState>, StudyError> {
  Ok(Json(evaluate_scenario(&state, &id, &body.answer).await?))
}

#[instrument(level = "info", skip(state, body), fields(%id, message_len = body.message.len()))]
pub async fn http_post_chat(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<ChatIn>,
) -> Result<Json<ChatOut>, StudyError> {
  let ChatReply { reply, failed, chat } = send_chat(&state, &id, &body.message, |_| {}).await?;
  Ok(Json(ChatOut { reply, failed, chat }))
}
