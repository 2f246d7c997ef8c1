//! Puzzle-learning progression engine.
//!
//! A pure state machine over three levels:
//! - `Level1`: multiple-choice knowledge check (answers, score, question cursor)
//! - `Level2`: flashcard review
//! - `Level3`: one scenario question evaluated by the provider
//! - `Finished`: terminal
//!
//! Level transitions that need provider content are split in two: `begin_*`
//! validates and marks the state busy, the caller fetches content without holding
//! any lock, then `complete_*` installs it. While busy, every other action is
//! rejected. Progression is forward-only.

use serde::Serialize;

use crate::domain::{Difficulty, Flashcard, Question, Scenario};
use crate::error::{Result, StudyError};
use crate::util::is_blank;

// ============================================================================
// Phase and pending fetches
// ============================================================================

/// Where the learner is, derived from `current_level` and `is_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Level1,
  Level2,
  Level3,
  Finished,
}

/// Provider request currently in flight for this puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingFetch {
  Flashcards,
  Scenario,
  Evaluation,
}

impl PendingFetch {
  /// Busy-indicator text shown while the fetch runs.
  #[must_use]
  pub const fn loading_text(&self) -> &'static str {
    match self {
      Self::Flashcards => "Creating flashcards...",
      Self::Scenario => "Generating scenario...",
      Self::Evaluation => "AI is evaluating your answer...",
    }
  }
}

/// What the caller must do after `begin_advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStep {
  FetchFlashcards,
  FetchScenario,
  /// Level 3 was already evaluated; the puzzle is now finished.
  Finished,
}

// ============================================================================
// Level records
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Level1 {
  pub questions: Vec<Question>,
  pub current_question_index: usize,
  /// Index-aligned with `questions`; `Some` once answered.
  pub user_answers: Vec<Option<String>>,
  pub score: usize,
  pub difficulty: Difficulty,
}

impl Level1 {
  /// Derived: the cursor has moved past the last question.
  #[must_use]
  pub fn is_complete(&self) -> bool {
    self.current_question_index >= self.questions.len()
  }

  pub fn answered_count(&self) -> usize {
    self.user_answers.iter().filter(|a| a.is_some()).count()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Level2 {
  pub flashcards: Vec<Flashcard>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Level3 {
  pub scenario: String,
  pub question: String,
  pub user_answer: String,
  pub feedback: String,
  pub is_evaluated: bool,
}

/// Result of a recorded Level-1 answer, for immediate correct/incorrect reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
  pub question_index: usize,
  pub correct: bool,
  pub correct_option: String,
  pub score: usize,
}

/// Inputs for the one-shot scenario evaluation request.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
  pub scenario: Scenario,
  pub user_answer: String,
}

// ============================================================================
// PuzzleState
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleState {
  current_level: u8,
  is_finished: bool,
  level1: Option<Level1>,
  level2: Option<Level2>,
  level3: Option<Level3>,
  busy: Option<PendingFetch>,
}

impl PuzzleState {
  /// Fresh puzzle at Level 1 seeded with the initial question batch.
  pub fn new(questions: Vec<Question>, difficulty: Difficulty) -> Self {
    let user_answers = vec![None; questions.len()];
    Self {
      current_level: 1,
      is_finished: false,
      level1: Some(Level1 { questions, current_question_index: 0, user_answers, score: 0, difficulty }),
      level2: None,
      level3: None,
      busy: None,
    }
  }

  pub fn current_level(&self) -> u8 { self.current_level }
  pub fn is_finished(&self) -> bool { self.is_finished }
  pub fn level1(&self) -> Option<&Level1> { self.level1.as_ref() }
  pub fn level2(&self) -> Option<&Level2> { self.level2.as_ref() }
  pub fn level3(&self) -> Option<&Level3> { self.level3.as_ref() }
  pub fn busy(&self) -> Option<PendingFetch> { self.busy }

  #[must_use]
  pub fn phase(&self) -> Phase {
    if self.is_finished {
      return Phase::Finished;
    }
    match self.current_level {
      1 => Phase::Level1,
      2 => Phase::Level2,
      _ => Phase::Level3,
    }
  }

  fn ensure_idle(&self) -> Result<()> {
    if self.busy.is_some() { Err(StudyError::Busy) } else { Ok(()) }
  }

  fn ensure_level(&self, level: u8, action: &'static str) -> Result<()> {
    if self.is_finished || self.current_level != level {
      return Err(StudyError::WrongLevel { level: self.current_level, action });
    }
    Ok(())
  }

  // --- Level 1 ---

  /// Record an answer for the current question. Any rejection leaves the state
  /// untouched; a second answer for the same index is rejected.
  pub fn submit_answer(&mut self, question_index: usize, chosen: &str) -> Result<AnswerOutcome> {
    self.ensure_idle()?;
    self.ensure_level(1, "submit answer")?;
    let l1 = self
      .level1
      .as_mut()
      .ok_or(StudyError::WrongLevel { level: 1, action: "submit answer" })?;

    let question = l1.questions.get(question_index).ok_or(StudyError::QuestionOutOfRange(question_index))?;
    if l1.user_answers[question_index].is_some() {
      return Err(StudyError::AlreadyAnswered(question_index));
    }
    if question_index != l1.current_question_index {
      return Err(StudyError::NotCurrentQuestion { requested: question_index, current: l1.current_question_index });
    }
    if !question.has_option(chosen) {
      return Err(StudyError::UnknownOption(chosen.to_string()));
    }

    let correct = question.is_correct(chosen);
    let correct_option = question.correct_option.clone();
    l1.user_answers[question_index] = Some(chosen.to_string());
    if correct {
      l1.score += 1;
    }
    Ok(AnswerOutcome { question_index, correct, correct_option, score: l1.score })
  }

  /// Second half of an answer: move the cursor past `question_index` once the
  /// reveal delay has elapsed. Returns false (no change) when the cursor is not
  /// on that question or it is still unanswered.
  pub fn reveal_next(&mut self, question_index: usize) -> bool {
    if self.current_level != 1 {
      return false;
    }
    let Some(l1) = self.level1.as_mut() else { return false };
    let answered = l1.user_answers.get(question_index).is_some_and(Option::is_some);
    if l1.current_question_index != question_index || !answered {
      return false;
    }
    l1.current_question_index += 1;
    true
  }

  // --- Level transitions ---

  /// Validate an advance request and mark the needed fetch as pending.
  pub fn begin_advance(&mut self) -> Result<AdvanceStep> {
    self.ensure_idle()?;
    if self.is_finished {
      return Err(StudyError::AlreadyFinished);
    }
    match self.current_level {
      1 => {
        if !self.level1.as_ref().is_some_and(Level1::is_complete) {
          return Err(StudyError::LevelIncomplete);
        }
        self.busy = Some(PendingFetch::Flashcards);
        Ok(AdvanceStep::FetchFlashcards)
      }
      2 => {
        self.busy = Some(PendingFetch::Scenario);
        Ok(AdvanceStep::FetchScenario)
      }
      _ => {
        if !self.level3.as_ref().is_some_and(|l3| l3.is_evaluated) {
          return Err(StudyError::LevelIncomplete);
        }
        self.is_finished = true;
        Ok(AdvanceStep::Finished)
      }
    }
  }

  fn take_pending(&mut self, expected: PendingFetch, action: &'static str) -> Result<()> {
    if self.busy != Some(expected) {
      return Err(StudyError::WrongLevel { level: self.current_level, action });
    }
    self.busy = None;
    Ok(())
  }

  pub fn complete_flashcards(&mut self, flashcards: Vec<Flashcard>) -> Result<()> {
    self.take_pending(PendingFetch::Flashcards, "install flashcards")?;
    self.level2 = Some(Level2 { flashcards });
    self.current_level = 2;
    Ok(())
  }

  pub fn complete_scenario(&mut self, scenario: Scenario) -> Result<()> {
    self.take_pending(PendingFetch::Scenario, "install scenario")?;
    self.level3 = Some(Level3 {
      scenario: scenario.scenario,
      question: scenario.question,
      user_answer: String::new(),
      feedback: String::new(),
      is_evaluated: false,
    });
    self.current_level = 3;
    Ok(())
  }

  // --- Level 3 ---

  /// Validate a scenario answer and mark the evaluation as pending.
  /// One-shot: rejected once the scenario has been evaluated.
  pub fn begin_evaluation(&mut self, user_answer: &str) -> Result<EvaluationRequest> {
    self.ensure_idle()?;
    self.ensure_level(3, "evaluate answer")?;
    let l3 = self.level3.as_ref().ok_or(StudyError::WrongLevel { level: 3, action: "evaluate answer" })?;
    if l3.is_evaluated {
      return Err(StudyError::AlreadyEvaluated);
    }
    if is_blank(user_answer) {
      return Err(StudyError::EmptyAnswer);
    }
    let request = EvaluationRequest {
      scenario: Scenario { scenario: l3.scenario.clone(), question: l3.question.clone() },
      user_answer: user_answer.trim().to_string(),
    };
    self.busy = Some(PendingFetch::Evaluation);
    Ok(request)
  }

  pub fn complete_evaluation(&mut self, user_answer: String, feedback: String) -> Result<()> {
    self.take_pending(PendingFetch::Evaluation, "install feedback")?;
    if let Some(l3) = self.level3.as_mut() {
      l3.user_answer = user_answer;
      l3.feedback = feedback;
      l3.is_evaluated = true;
    }
    Ok(())
  }
}
