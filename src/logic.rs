//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Starting a generation (validation, fan-out, dashboard install)
//!   - Level-1 answers and the delayed reveal of the next question
//!   - Level advances (flashcards, scenario, finish) and scenario evaluation
//!   - Streaming chat exchanges
//!
//! Every operation follows the same shape: lock the session, run the pure
//! transition, release the lock, call the provider, lock again and install the
//! result under an epoch check.
//!
//! The provider call and the install run on a spawned task that owns its inputs.
//! The caller only waits on it, so a dropped request (client gone, timeout)
//! cannot leave a busy marker behind.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::chat::{ChatSession, ExchangeRequest};
use crate::content;
use crate::domain::{LearningModule, Theme};
use crate::error::{Result, StudyError};
use crate::orchestrator::{self, GenerationRequest};
use crate::puzzle::{AdvanceStep, AnswerOutcome, EvaluationRequest, Level1, PuzzleState};
use crate::session::SessionSnapshot;
use crate::state::{AppState, SessionHandle};

/// Result of a recorded answer, plus what is needed to reveal the next question.
#[derive(Debug, Clone)]
pub struct AnswerReceipt {
  pub outcome: AnswerOutcome,
  /// Puzzle in the "answered but not advanced" state.
  pub puzzle: PuzzleState,
  pub reveal: RevealTicket,
}

#[derive(Debug, Clone)]
pub struct RevealTicket {
  pub session_id: String,
  pub question_index: usize,
  pub epoch: u64,
  pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
  pub reply: String,
  pub failed: bool,
  pub chat: ChatSession,
}

/// Run `work` on its own task and wait for it.
async fn detached<T: Send + 'static>(work: impl Future<Output = Result<T>> + Send + 'static) -> Result<T> {
  joined(tokio::spawn(work.in_current_span())).await
}

async fn joined<T>(task: JoinHandle<Result<T>>) -> Result<T> {
  task.await.map_err(|e| {
    error!(target: "study", error = %e, "Provider-backed task died");
    StudyError::Interrupted
  })?
}

/// Validate, enter `Generating`, fan out, and show the dashboard.
///
/// With no `session_id` a new session is created, but only once the input is valid.
#[instrument(level = "info", skip(state, source_text), fields(session_id = ?session_id, text_len = source_text.len(), %theme, ?modules))]
pub async fn start_generation(
  state: &AppState,
  session_id: Option<&str>,
  source_text: String,
  theme: Theme,
  modules: Vec<LearningModule>,
  question_count: usize,
) -> Result<SessionSnapshot> {
  let req = GenerationRequest::new(source_text, theme, modules, question_count, state.settings.max_source_chars)?;

  let handle = match session_id {
    Some(id) => state.session(id).await?,
    None => state.create_session().await.1,
  };

  let epoch = handle.lock().await.begin_generation(&req)?;
  detached(run_generation(state.clone(), handle, epoch, req)).await
}

async fn run_generation(state: AppState, handle: SessionHandle, epoch: u64, req: GenerationRequest) -> Result<SessionSnapshot> {
  let output = orchestrator::generate(state.provider.as_ref(), &state.prompts, &req).await;

  let mut session = handle.lock().await;
  if !session.finish_generation(epoch, output) {
    warn!(target: "study", id = %session.id(), epoch, "Generation result superseded; discarded");
  }
  info!(target: "study", id = %session.id(), view = ?session.view(), "Generation finished");
  Ok(session.snapshot())
}

#[instrument(level = "debug", skip(state), fields(%session_id))]
pub async fn get_session(state: &AppState, session_id: &str) -> Result<SessionSnapshot> {
  let handle = state.session(session_id).await?;
  let session = handle.lock().await;
  Ok(session.snapshot())
}

/// Record a Level-1 answer. The cursor stays on the question until
/// `complete_reveal` runs with the returned ticket.
#[instrument(level = "info", skip(state, chosen), fields(%session_id))]
pub async fn submit_answer(
  state: &AppState,
  session_id: &str,
  question_index: usize,
  chosen: &str,
) -> Result<AnswerReceipt> {
  let handle = state.session(session_id).await?;
  let mut session = handle.lock().await;
  let epoch = session.epoch();
  let puzzle = session.puzzle_mut()?;
  let outcome = puzzle.submit_answer(question_index, chosen)?;
  info!(
    target: "study",
    correct = outcome.correct,
    score = outcome.score,
    answered = puzzle.level1().map(Level1::answered_count),
    "Answer recorded"
  );

  Ok(AnswerReceipt {
    outcome,
    puzzle: puzzle.clone(),
    reveal: RevealTicket {
      session_id: session_id.to_string(),
      question_index,
      epoch,
      delay: Duration::from_millis(state.settings.reveal_delay_ms),
    },
  })
}

/// Wait out the reveal delay, then move past the answered question.
/// Returns the new puzzle state, or `None` when nothing changed (session gone,
/// restarted, or the cursor already moved).
#[instrument(level = "debug", skip(state, ticket), fields(session_id = %ticket.session_id, question_index = ticket.question_index))]
pub async fn complete_reveal(state: &AppState, ticket: RevealTicket) -> Option<PuzzleState> {
  tokio::time::sleep(ticket.delay).await;
  let handle = state.session(&ticket.session_id).await.ok()?;
  let mut session = handle.lock().await;
  let puzzle = session.puzzle_for_epoch(ticket.epoch).ok()?;
  if !puzzle.reveal_next(ticket.question_index) {
    debug!(target: "study", "Reveal skipped; cursor already moved");
    return None;
  }
  Some(puzzle.clone())
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn advance_level(state: &AppState, session_id: &str) -> Result<PuzzleState> {
  let handle = state.session(session_id).await?;

  let (step, epoch, text, theme) = {
    let mut session = handle.lock().await;
    let epoch = session.epoch();
    let text = session.source_text().to_string();
    let theme = session.theme();
    let step = session.puzzle_mut()?.begin_advance()?;
    (step, epoch, text, theme)
  };

  detached(run_advance(state.clone(), handle, step, epoch, text, theme)).await
}

async fn run_advance(
  state: AppState,
  handle: SessionHandle,
  step: AdvanceStep,
  epoch: u64,
  text: String,
  theme: Theme,
) -> Result<PuzzleState> {
  let provider = state.provider.as_ref();
  match step {
    AdvanceStep::FetchFlashcards => {
      let cards = content::flashcards(provider, &text, theme, state.settings.flashcard_count).await;
      handle.lock().await.puzzle_for_epoch(epoch)?.complete_flashcards(cards)?;
    }
    AdvanceStep::FetchScenario => {
      let scenario = content::scenario(provider, &text, theme).await;
      handle.lock().await.puzzle_for_epoch(epoch)?.complete_scenario(scenario)?;
    }
    AdvanceStep::Finished => {}
  }

  let mut session = handle.lock().await;
  let puzzle = session.puzzle_for_epoch(epoch)?;
  info!(
    target: "study",
    phase = ?puzzle.phase(),
    score = puzzle.level1().map(|l| l.score),
    "Puzzle advanced"
  );
  Ok(puzzle.clone())
}

/// One-shot scenario evaluation. Empty answers and repeat submissions are
/// rejected before any provider call.
#[instrument(level = "info", skip(state, answer), fields(%session_id, answer_len = answer.len()))]
pub async fn evaluate_scenario(state: &AppState, session_id: &str, answer: &str) -> Result<PuzzleState> {
  let handle = state.session(session_id).await?;

  let (request, epoch, text) = {
    let mut session = handle.lock().await;
    let epoch = session.epoch();
    let text = session.source_text().to_string();
    let request = session.puzzle_mut()?.begin_evaluation(answer)?;
    (request, epoch, text)
  };

  detached(run_evaluation(state.clone(), handle, request, epoch, text)).await
}

async fn run_evaluation(
  state: AppState,
  handle: SessionHandle,
  request: EvaluationRequest,
  epoch: u64,
  text: String,
) -> Result<PuzzleState> {
  let feedback =
    content::evaluation(state.provider.as_ref(), &text, &request.scenario, &request.user_answer).await;

  let mut session = handle.lock().await;
  let puzzle = session.puzzle_for_epoch(epoch)?;
  puzzle.complete_evaluation(request.user_answer, feedback)?;
  info!(target: "study", "Scenario evaluated");
  Ok(puzzle.clone())
}

/// Run one chat exchange. Each fragment is appended to the session (so snapshots
/// show the reply growing) and handed to `on_fragment` in arrival order.
///
/// The stream is consumed by a spawned task; if this future is dropped the
/// exchange still runs to the end and is recorded in the history.
#[instrument(level = "info", skip(state, message, on_fragment), fields(%session_id, message_len = message.len()))]
pub async fn send_chat(
  state: &AppState,
  session_id: &str,
  message: &str,
  mut on_fragment: impl FnMut(&str) + Send,
) -> Result<ChatReply> {
  let handle = state.session(session_id).await?;

  let (request, epoch) = {
    let mut session = handle.lock().await;
    let epoch = session.epoch();
    (session.chat_mut()?.begin_exchange(message)?, epoch)
  };

  let (fragments_tx, mut fragments_rx) = mpsc::unbounded_channel::<String>();
  let exchange = tokio::spawn(run_exchange(state.clone(), handle, request, epoch, fragments_tx).in_current_span());
  while let Some(fragment) = fragments_rx.recv().await {
    on_fragment(&fragment);
  }
  joined(exchange).await
}

async fn run_exchange(
  state: AppState,
  handle: SessionHandle,
  request: ExchangeRequest,
  epoch: u64,
  fragments_tx: UnboundedSender<String>,
) -> Result<ChatReply> {
  let start = std::time::Instant::now();
  let mut failed = false;
  let mut fragments = 0usize;
  match state.provider.chat_stream(&request.system, &request.history).await {
    Ok(mut stream) => {
      while let Some(item) = stream.next().await {
        match item {
          Ok(fragment) if fragment.is_empty() => {}
          Ok(fragment) => {
            handle.lock().await.chat_for_epoch(epoch)?.append_fragment(&fragment);
            // Nobody listening once the caller is gone; the history still grows.
            let _ = fragments_tx.send(fragment);
            fragments += 1;
          }
          Err(e) => {
            error!(target: "study", error = %e, fragments, "Chat stream broke off");
            failed = true;
            break;
          }
        }
      }
    }
    Err(e) => {
      error!(target: "study", error = %e, "Chat request failed");
      failed = true;
    }
  }

  let mut session = handle.lock().await;
  let chat = session.chat_for_epoch(epoch)?;
  chat.finish_exchange(failed);
  info!(target: "study", elapsed = ?start.elapsed(), fragments, failed, "Chat exchange finished");
  Ok(ChatReply { reply: chat.last_reply().unwrap_or_default().to_string(), failed, chat: chat.clone() })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::chat::ChatRole;
  use crate::config::{Prompts, Settings};
  use crate::domain::View;
  use crate::placeholders;
  use crate::provider::testing::ScriptedProvider;

  fn state_with(provider: ScriptedProvider) -> (AppState, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let settings = Settings { reveal_delay_ms: 0, ..Settings::default() };
    (AppState::with_provider(provider.clone(), Prompts::default(), settings), provider)
  }

  async fn generate(state: &AppState, modules: Vec<LearningModule>) -> SessionSnapshot {
    start_generation(state, None, "Photosynthesis turns light into sugar.".into(), Theme::Jungle, modules, 5)
      .await
      .unwrap()
  }

  async fn answer_and_reveal(state: &AppState, id: &str, index: usize, chosen: &str) -> AnswerReceipt {
    let receipt = submit_answer(state, id, index, chosen).await.unwrap();
    complete_reveal(state, receipt.reveal.clone()).await.unwrap();
    receipt
  }

  #[tokio::test]
  async fn invalid_input_creates_no_session_and_calls_nothing() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let err = start_generation(&st, None, "   ".into(), Theme::Focus, vec![LearningModule::Summary], 5).await;
    assert!(matches!(err, Err(StudyError::EmptySourceText)));
    let err = start_generation(&st, None, "text".into(), Theme::Focus, vec![], 5).await;
    assert!(matches!(err, Err(StudyError::NoModulesSelected)));
    assert_eq!(p.total_calls(), 0);
    assert_eq!(st.session_count().await, 0);
  }

  #[tokio::test]
  async fn full_puzzle_walkthrough() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let snap = generate(&st, vec![LearningModule::PuzzleLearning]).await;
    assert_eq!(snap.view, View::Dashboard);
    let id = snap.id;

    for i in 0..5 {
      let receipt = answer_and_reveal(&st, &id, i, "A").await;
      assert!(receipt.outcome.correct);
      let l1 = receipt.puzzle.level1().unwrap();
      assert_eq!(l1.current_question_index, i, "answer shown before the cursor moves");
      assert!(l1.user_answers[i].is_some());
    }

    let puzzle = advance_level(&st, &id).await.unwrap();
    assert_eq!(puzzle.level1().unwrap().score, 5);
    assert_eq!(puzzle.current_level(), 2);
    assert_eq!(puzzle.level2().unwrap().flashcards.len(), 8);

    let puzzle = advance_level(&st, &id).await.unwrap();
    assert_eq!(puzzle.current_level(), 3);
    assert!(!puzzle.level3().unwrap().is_evaluated);

    let puzzle = evaluate_scenario(&st, &id, "Mix the acid slowly").await.unwrap();
    let l3 = puzzle.level3().unwrap();
    assert!(l3.is_evaluated);
    assert_eq!(l3.feedback, "You are on the right track.");

    let again = evaluate_scenario(&st, &id, "Another try").await;
    assert!(matches!(again, Err(StudyError::AlreadyEvaluated)));
    assert_eq!(p.calls_to("evaluate"), 1);

    let puzzle = advance_level(&st, &id).await.unwrap();
    assert!(puzzle.is_finished());
    assert!(matches!(advance_level(&st, &id).await, Err(StudyError::AlreadyFinished)));
  }

  #[tokio::test]
  async fn malformed_quiz_yields_placeholder_question() {
    let mut provider = ScriptedProvider::happy();
    provider.quiz = Some(r#"{"oops": true}"#.into());
    let (st, _) = state_with(provider);
    let snap = generate(&st, vec![LearningModule::PuzzleLearning, LearningModule::Summary]).await;
    let puzzle = snap.puzzle.unwrap();
    let l1 = puzzle.level1().unwrap();
    assert_eq!(l1.questions, placeholders::quiz());
    assert_eq!(snap.content.summary.as_deref(), Some("A short summary."));
  }

  #[tokio::test]
  async fn empty_scenario_answer_makes_no_provider_call() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::PuzzleLearning]).await.id;
    for i in 0..5 {
      answer_and_reveal(&st, &id, i, "B").await;
    }
    advance_level(&st, &id).await.unwrap();
    advance_level(&st, &id).await.unwrap();

    assert!(matches!(evaluate_scenario(&st, &id, "").await, Err(StudyError::EmptyAnswer)));
    assert_eq!(p.calls_to("evaluate"), 0);
    let snap = get_session(&st, &id).await.unwrap();
    assert!(!snap.puzzle.unwrap().level3().unwrap().is_evaluated);
  }

  #[tokio::test]
  async fn advance_before_level1_is_done_is_rejected() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::PuzzleLearning]).await.id;
    answer_and_reveal(&st, &id, 0, "A").await;
    assert!(matches!(advance_level(&st, &id).await, Err(StudyError::LevelIncomplete)));
    assert_eq!(p.calls_to("flashcards"), 0);
  }

  #[tokio::test]
  async fn failed_level_fetches_use_placeholders() {
    let mut provider = ScriptedProvider::happy();
    provider.flashcards = None;
    provider.scenario = Some("{}".into());
    let (st, _) = state_with(provider);
    let id = generate(&st, vec![LearningModule::PuzzleLearning]).await.id;
    for i in 0..5 {
      answer_and_reveal(&st, &id, i, "A").await;
    }
    let puzzle = advance_level(&st, &id).await.unwrap();
    assert_eq!(puzzle.level2().unwrap().flashcards, placeholders::flashcards());
    assert!(puzzle.busy().is_none());
    let puzzle = advance_level(&st, &id).await.unwrap();
    assert_eq!(puzzle.level3().unwrap().scenario, placeholders::scenario().scenario);
  }

  #[tokio::test]
  async fn reveal_is_dropped_after_regeneration() {
    let (st, _) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::PuzzleLearning]).await.id;
    let receipt = submit_answer(&st, &id, 0, "A").await.unwrap();

    start_generation(&st, Some(&id), "New text".into(), Theme::Space, vec![LearningModule::PuzzleLearning], 5)
      .await
      .unwrap();
    assert!(complete_reveal(&st, receipt.reveal).await.is_none());

    let snap = get_session(&st, &id).await.unwrap();
    let puzzle = snap.puzzle.unwrap();
    let l1 = puzzle.level1().unwrap();
    assert_eq!(l1.current_question_index, 0);
    assert!(l1.user_answers.iter().all(Option::is_none));
  }

  #[tokio::test]
  async fn puzzle_actions_need_the_puzzle_module() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let snap = generate(&st, vec![LearningModule::Summary, LearningModule::Chat]).await;
    assert_eq!(snap.modules, vec![LearningModule::Summary, LearningModule::Chat]);
    assert_eq!(snap.view, View::Dashboard);
    assert!(snap.puzzle.is_none());
    assert!(matches!(submit_answer(&st, &snap.id, 0, "A").await, Err(StudyError::ModuleNotSelected(_))));
    assert!(matches!(advance_level(&st, &snap.id).await, Err(StudyError::ModuleNotSelected(_))));
    assert_eq!(p.total_calls(), 1);
  }

  #[tokio::test]
  async fn chat_fragments_arrive_in_order() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::Chat]).await.id;

    let mut seen = Vec::new();
    let reply = send_chat(&st, &id, "What is chlorophyll?", |f| seen.push(f.to_string())).await.unwrap();
    assert_eq!(seen, vec!["Hel", "lo", "!"]);
    assert_eq!(reply.reply, "Hello!");
    assert!(!reply.failed);
    assert!(!reply.chat.pending);
    assert_eq!(reply.chat.history.len(), 2);

    send_chat(&st, &id, "And then?", |_| {}).await.unwrap();
    let history = p.last_chat_history().unwrap();
    assert_eq!(history.len(), 3, "prior exchange plus the new message");
    assert_eq!(history[1].role, ChatRole::Model);
    assert_eq!(history[1].text, "Hello!");
  }

  #[tokio::test]
  async fn chat_failure_mid_stream_appends_notice() {
    let mut provider = ScriptedProvider::happy();
    provider.chat = Some(vec![Ok("Part".into()), Err("connection reset".into())]);
    let (st, _) = state_with(provider);
    let id = generate(&st, vec![LearningModule::Chat]).await.id;

    let reply = send_chat(&st, &id, "hi", |_| {}).await.unwrap();
    assert!(reply.failed);
    assert_eq!(reply.chat.history.len(), 3);
    assert_eq!(reply.chat.history[1].text, "Part");
    assert_eq!(reply.reply, placeholders::CHAT_REPLY);
  }

  #[tokio::test]
  async fn empty_chat_message_is_rejected() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::Chat]).await.id;
    assert!(matches!(send_chat(&st, &id, " ", |_| {}).await, Err(StudyError::EmptyMessage)));
    assert_eq!(p.calls_to("chat"), 0);
  }

  // The caller gives up long before the provider answers.
  const CALLER_TIMEOUT: Duration = Duration::from_millis(20);
  const PROVIDER_DELAY: Duration = Duration::from_millis(100);

  async fn let_background_work_finish() {
    tokio::time::sleep(Duration::from_millis(400)).await;
  }

  #[tokio::test]
  async fn dropped_advance_and_evaluate_still_complete() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::PuzzleLearning]).await.id;
    for i in 0..5 {
      answer_and_reveal(&st, &id, i, "A").await;
    }

    p.set_delay(PROVIDER_DELAY);
    assert!(tokio::time::timeout(CALLER_TIMEOUT, advance_level(&st, &id)).await.is_err());
    let_background_work_finish().await;

    let snap = get_session(&st, &id).await.unwrap();
    assert!(!snap.busy);
    assert!(snap.loading_text.is_none());
    let puzzle = snap.puzzle.unwrap();
    assert_eq!(puzzle.current_level(), 2);
    assert_eq!(puzzle.level2().unwrap().flashcards.len(), 8);

    p.set_delay(Duration::ZERO);
    let puzzle = advance_level(&st, &id).await.unwrap();
    assert_eq!(puzzle.current_level(), 3);

    p.set_delay(PROVIDER_DELAY);
    let dropped = tokio::time::timeout(CALLER_TIMEOUT, evaluate_scenario(&st, &id, "Mix slowly")).await;
    assert!(dropped.is_err());
    let_background_work_finish().await;

    let snap = get_session(&st, &id).await.unwrap();
    assert!(!snap.busy);
    let puzzle = snap.puzzle.unwrap();
    assert!(puzzle.level3().unwrap().is_evaluated);
    p.set_delay(Duration::ZERO);
    assert!(advance_level(&st, &id).await.unwrap().is_finished());
  }

  #[tokio::test]
  async fn dropped_chat_is_recorded_and_chat_stays_usable() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::Chat]).await.id;

    p.set_delay(PROVIDER_DELAY);
    let dropped = tokio::time::timeout(CALLER_TIMEOUT, send_chat(&st, &id, "Why green?", |_| {})).await;
    assert!(dropped.is_err());
    let_background_work_finish().await;

    let chat = get_session(&st, &id).await.unwrap().chat.unwrap();
    assert!(!chat.pending);
    assert_eq!(chat.history.len(), 2);
    assert_eq!(chat.history[1].text, "Hello!");

    p.set_delay(Duration::ZERO);
    let reply = send_chat(&st, &id, "And sugar?", |_| {}).await.unwrap();
    assert_eq!(reply.chat.history.len(), 4);
  }

  #[tokio::test]
  async fn dropped_generation_still_reaches_the_dashboard() {
    let (st, p) = state_with(ScriptedProvider::happy());
    let id = generate(&st, vec![LearningModule::Summary]).await.id;

    p.set_delay(PROVIDER_DELAY);
    let dropped = tokio::time::timeout(
      CALLER_TIMEOUT,
      start_generation(&st, Some(&id), "Mitochondria make ATP.".into(), Theme::Space, vec![LearningModule::PuzzleLearning], 5),
    )
    .await;
    assert!(dropped.is_err());
    let_background_work_finish().await;

    let snap = get_session(&st, &id).await.unwrap();
    assert_eq!(snap.view, View::Dashboard);
    assert_eq!(snap.modules, vec![LearningModule::PuzzleLearning]);
    assert!(snap.puzzle.is_some());

    p.set_delay(Duration::ZERO);
    let snap = start_generation(&st, Some(&id), "Again.".into(), Theme::Focus, vec![LearningModule::Summary], 5)
      .await
      .unwrap();
    assert_eq!(snap.view, View::Dashboard);
  }

  #[tokio::test]
  async fn unknown_session_is_reported() {
    let (st, _) = state_with(ScriptedProvider::happy());
    assert!(matches!(get_session(&st, "missing").await, Err(StudyError::UnknownSession(_))));
  }
}
