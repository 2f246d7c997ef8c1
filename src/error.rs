//! Error types for the study-aid backend.
//!
//! Two families:
//! - [`ProviderError`] covers failed or malformed provider responses. These never
//!   reach the UI; the content layer swaps them for placeholders.
//! - [`StudyError`] covers input validation and state conflicts. These are
//!   detected before any provider call and leave state untouched.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};

/// A specialized `Result` type for engine and session operations.
pub type Result<T> = std::result::Result<T, StudyError>;

/// Failure of a single provider request.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
  /// Transport-level failure (connect, timeout, body read).
  #[error("provider request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// Provider answered with a non-success status.
  #[error("provider HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// Response did not match the declared schema.
  #[error("malformed {artifact} response: {reason}")]
  Malformed { artifact: &'static str, reason: String },

  /// Streaming response broke off or carried an unreadable event.
  #[error("chat stream error: {0}")]
  Stream(String),

  /// No provider is configured (missing API key).
  #[error("content provider disabled: {0}")]
  Disabled(&'static str),
}

impl ProviderError {
  pub fn malformed(artifact: &'static str, reason: impl Into<String>) -> Self {
    Self::Malformed { artifact, reason: reason.into() }
  }
}

/// User-facing validation and state-conflict errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StudyError {
  #[error("Please provide text to learn.")]
  EmptySourceText,

  #[error("Source text is too long ({len} characters, limit {max}).")]
  SourceTextTooLong { len: usize, max: usize },

  #[error("Please select at least one module.")]
  NoModulesSelected,

  #[error("Module '{0}' was selected more than once.")]
  DuplicateModule(String),

  #[error("Unsupported question count {0}; choose 5, 10 or 15.")]
  InvalidQuestionCount(usize),

  #[error("Unknown session: {0}")]
  UnknownSession(String),

  #[error("The session was restarted; please try again.")]
  SessionRestarted,

  #[error("Module '{0}' is not part of this session.")]
  ModuleNotSelected(String),

  #[error("Please wait for the current request to finish.")]
  Busy,

  #[error("Action not available at level {level}: {action}")]
  WrongLevel { level: u8, action: &'static str },

  #[error("Question {0} does not exist.")]
  QuestionOutOfRange(usize),

  #[error("Question {0} has already been answered.")]
  AlreadyAnswered(usize),

  #[error("Question {requested} is not the current question ({current}).")]
  NotCurrentQuestion { requested: usize, current: usize },

  #[error("'{0}' is not one of the offered options.")]
  UnknownOption(String),

  #[error("Finish the current level before advancing.")]
  LevelIncomplete,

  #[error("Puzzle learning is already complete.")]
  AlreadyFinished,

  #[error("Please write an answer before submitting.")]
  EmptyAnswer,

  #[error("This scenario has already been evaluated.")]
  AlreadyEvaluated,

  #[error("Please type a message.")]
  EmptyMessage,

  /// The background task running a provider-backed step died.
  #[error("The request could not be completed; please try again.")]
  Interrupted,
}

impl StudyError {
  /// HTTP status used when the error crosses the REST boundary.
  pub fn status_code(&self) -> StatusCode {
    match self {
      StudyError::UnknownSession(_) => StatusCode::NOT_FOUND,
      StudyError::Busy
      | StudyError::SessionRestarted
      | StudyError::AlreadyAnswered(_)
      | StudyError::AlreadyEvaluated
      | StudyError::AlreadyFinished
      | StudyError::LevelIncomplete
      | StudyError::WrongLevel { .. }
      | StudyError::NotCurrentQuestion { .. } => StatusCode::CONFLICT,
      StudyError::Interrupted => StatusCode::INTERNAL_SERVER_ERROR,
      _ => StatusCode::BAD_REQUEST,
    }
  }
}

impl IntoResponse for StudyError {
  fn into_response(self) -> Response {
    let body = serde_json::json!({ "error": self.to_string() });
    (self.status_code(), Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_messages_are_user_facing() {
    assert_eq!(StudyError::NoModulesSelected.to_string(), "Please select at least one module.");
    assert!(StudyError::InvalidQuestionCount(7).to_string().contains('7'));
  }

  #[test]
  fn status_codes() {
    assert_eq!(StudyError::UnknownSession("x".into()).status_code(), StatusCode::NOT_FOUND);
    assert_eq!(StudyError::Busy.status_code(), StatusCode::CONFLICT);
    assert_eq!(StudyError::EmptyAnswer.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(StudyError::Interrupted.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn malformed_display_names_artifact() {
    let e = ProviderError::malformed("quiz", "expected an array");
    assert_eq!(e.to_string(), "malformed quiz response: expected an array");
  }
}
