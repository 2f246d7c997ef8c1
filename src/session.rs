//! A single learner's study session: view state, generated artifacts, the puzzle
//! engine and the chat sub-session.
//!
//! `epoch` increases with every generation. Work started under an older epoch
//! (a slow level fetch, a pending reveal timer) is discarded when it completes,
//! because the state it belonged to has been replaced.

use serde::Serialize;

use crate::chat::ChatSession;
use crate::domain::{GeneratedContent, LearningModule, Theme, View};
use crate::error::{Result, StudyError};
use crate::orchestrator::{GenerationOutput, GenerationRequest};
use crate::puzzle::PuzzleState;

const GENERATING_TEXT: &str = "Generating your learning modules...";

#[derive(Debug)]
pub struct StudySession {
  id: String,
  view: View,
  source_text: String,
  theme: Theme,
  modules: Vec<LearningModule>,
  content: GeneratedContent,
  puzzle: Option<PuzzleState>,
  chat: Option<ChatSession>,
  epoch: u64,
}

/// Serializable view of a session for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
  pub id: String,
  pub view: View,
  pub theme: Theme,
  pub modules: Vec<LearningModule>,
  pub active_module: Option<LearningModule>,
  pub content: GeneratedContent,
  pub puzzle: Option<PuzzleState>,
  pub chat: Option<ChatSession>,
  pub busy: bool,
  pub loading_text: Option<String>,
}

impl StudySession {
  pub fn new(id: String) -> Self {
    Self {
      id,
      view: View::Setup,
      source_text: String::new(),
      theme: Theme::default(),
      modules: Vec::new(),
      content: GeneratedContent::default(),
      puzzle: None,
      chat: None,
      epoch: 0,
    }
  }

  pub fn id(&self) -> &str { &self.id }
  pub fn view(&self) -> View { self.view }
  pub fn source_text(&self) -> &str { &self.source_text }
  pub fn theme(&self) -> Theme { self.theme }
  pub fn epoch(&self) -> u64 { self.epoch }

  /// Enter `Generating`, discarding every artifact of the previous run.
  pub fn begin_generation(&mut self, req: &GenerationRequest) -> Result<u64> {
    if self.view == View::Generating {
      return Err(StudyError::Busy);
    }
    self.epoch += 1;
    self.view = View::Generating;
    self.source_text = req.source_text().to_string();
    self.theme = req.theme();
    self.modules = req.modules().to_vec();
    self.content = GeneratedContent::default();
    self.puzzle = None;
    self.chat = None;
    Ok(self.epoch)
  }

  /// Install the fan-out result and show the dashboard. Returns false when the
  /// result belongs to a superseded generation.
  pub fn finish_generation(&mut self, epoch: u64, output: GenerationOutput) -> bool {
    if epoch != self.epoch || self.view != View::Generating {
      return false;
    }
    self.content = output.content;
    self.puzzle = output.puzzle;
    self.chat = output.chat;
    self.view = View::Dashboard;
    true
  }

  fn ensure_dashboard(&self) -> Result<()> {
    if self.view == View::Dashboard { Ok(()) } else { Err(StudyError::Busy) }
  }

  pub fn puzzle(&self) -> Option<&PuzzleState> {
    self.puzzle.as_ref()
  }

  pub fn puzzle_mut(&mut self) -> Result<&mut PuzzleState> {
    self.ensure_dashboard()?;
    self.puzzle
      .as_mut()
      .ok_or_else(|| StudyError::ModuleNotSelected(LearningModule::PuzzleLearning.label().to_string()))
  }

  /// Puzzle access for completing work begun under `epoch`.
  pub fn puzzle_for_epoch(&mut self, epoch: u64) -> Result<&mut PuzzleState> {
    if epoch != self.epoch {
      return Err(StudyError::SessionRestarted);
    }
    self.puzzle_mut()
  }

  pub fn chat_mut(&mut self) -> Result<&mut ChatSession> {
    self.ensure_dashboard()?;
    self.chat
      .as_mut()
      .ok_or_else(|| StudyError::ModuleNotSelected(LearningModule::Chat.label().to_string()))
  }

  pub fn chat_for_epoch(&mut self, epoch: u64) -> Result<&mut ChatSession> {
    if epoch != self.epoch {
      return Err(StudyError::SessionRestarted);
    }
    self.chat_mut()
  }

  /// Text for the global busy indicator, if any request is in flight.
  pub fn loading_text(&self) -> Option<String> {
    if self.view == View::Generating {
      return Some(GENERATING_TEXT.to_string());
    }
    if let Some(pending) = self.puzzle().and_then(PuzzleState::busy) {
      return Some(pending.loading_text().to_string());
    }
    None
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    let loading_text = self.loading_text();
    let chat_pending = self.chat.as_ref().is_some_and(|c| c.pending);
    SessionSnapshot {
      id: self.id.clone(),
      view: self.view,
      theme: self.theme,
      modules: self.modules.clone(),
      active_module: self.modules.first().copied(),
      content: self.content.clone(),
      puzzle: self.puzzle.clone(),
      chat: self.chat.clone(),
      busy: loading_text.is_some() || chat_pending,
      loading_text,
    }
  }
}
