//! The content-provider boundary.
//!
//! `ContentProvider` models the six request types the engine needs. Structured
//! responses arrive as raw JSON text and go through the `parse_*` functions below,
//! which enforce the declared schema. Any violation is a `ProviderError::Malformed`
//! and is turned into a placeholder by `crate::content`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::chat::ChatMessage;
use crate::domain::{Difficulty, Flashcard, MindMapNode, Question, Scenario, Theme};
use crate::error::ProviderError;

/// Incremental text fragments of one chat reply, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

pub const OPTIONS_PER_QUESTION: usize = 4;

#[async_trait]
pub trait ContentProvider: Send + Sync {
  /// Short identifier for logs.
  fn name(&self) -> &str;

  async fn summarize(&self, text: &str, theme: Theme) -> Result<String, ProviderError>;

  async fn mind_map(&self, text: &str, theme: Theme) -> Result<MindMapNode, ProviderError>;

  async fn quiz_questions(
    &self,
    text: &str,
    theme: Theme,
    difficulty: Difficulty,
    count: usize,
  ) -> Result<Vec<Question>, ProviderError>;

  async fn flashcards(&self, text: &str, theme: Theme, count: usize) -> Result<Vec<Flashcard>, ProviderError>;

  async fn scenario(&self, text: &str, theme: Theme) -> Result<Scenario, ProviderError>;

  async fn evaluate_scenario(
    &self,
    text: &str,
    scenario: &Scenario,
    user_answer: &str,
  ) -> Result<String, ProviderError>;

  /// Send the last message of `history` under `system` and stream the reply.
  async fn chat_stream(&self, system: &str, history: &[ChatMessage]) -> Result<FragmentStream, ProviderError>;
}

/// Installed when no API key is configured. Every call fails, so every artifact
/// degrades to its placeholder and the service stays interactive.
pub struct DisabledProvider;

const DISABLED_REASON: &str = "OPENAI_API_KEY not set";

#[async_trait]
impl ContentProvider for DisabledProvider {
  fn name(&self) -> &str { "disabled" }

  async fn summarize(&self, _text: &str, _theme: Theme) -> Result<String, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn mind_map(&self, _text: &str, _theme: Theme) -> Result<MindMapNode, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn quiz_questions(&self, _text: &str, _theme: Theme, _difficulty: Difficulty, _count: usize) -> Result<Vec<Question>, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn flashcards(&self, _text: &str, _theme: Theme, _count: usize) -> Result<Vec<Flashcard>, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn scenario(&self, _text: &str, _theme: Theme) -> Result<Scenario, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn evaluate_scenario(&self, _text: &str, _scenario: &Scenario, _user_answer: &str) -> Result<String, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }

  async fn chat_stream(&self, _system: &str, _history: &[ChatMessage]) -> Result<FragmentStream, ProviderError> {
    Err(ProviderError::Disabled(DISABLED_REASON))
  }
}

// --- Response-shape parsing ---

/// Parse model output as JSON, tolerating a surrounding ```json fence.
pub fn parse_json_value(raw: &str, artifact: &'static str) -> Result<Value, ProviderError> {
  let trimmed = strip_code_fence(raw.trim());
  if trimmed.is_empty() {
    return Err(ProviderError::malformed(artifact, "empty response"));
  }
  serde_json::from_str::<Value>(trimmed).map_err(|e| ProviderError::malformed(artifact, format!("JSON parse error: {e}")))
}

fn strip_code_fence(s: &str) -> &str {
  let Some(rest) = s.strip_prefix("```") else { return s };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// List payloads may be a bare array or a JSON-mode envelope object
/// (`{"<key>": [...]}`, or any object whose only field is an array).
fn list_items(value: Value, envelope_key: &str, artifact: &'static str) -> Result<Vec<Value>, ProviderError> {
  match value {
    Value::Array(items) => Ok(items),
    Value::Object(mut map) => {
      if let Some(Value::Array(items)) = map.remove(envelope_key) {
        return Ok(items);
      }
      if map.len() == 1 {
        if let Some((_, Value::Array(items))) = map.into_iter().next() {
          return Ok(items);
        }
      }
      Err(ProviderError::malformed(artifact, "expected an array"))
    }
    _ => Err(ProviderError::malformed(artifact, "expected an array")),
  }
}

fn from_value<T: DeserializeOwned>(v: Value, artifact: &'static str) -> Result<T, ProviderError> {
  serde_json::from_value(v).map_err(|e| ProviderError::malformed(artifact, e.to_string()))
}

/// Quiz: non-empty list; each question has text, exactly four options, and an
/// answer that is one of them. Extra questions beyond `count` are dropped.
pub fn parse_quiz(raw: &str, count: usize) -> Result<Vec<Question>, ProviderError> {
  const ARTIFACT: &str = "quiz";
  let items = list_items(parse_json_value(raw, ARTIFACT)?, "questions", ARTIFACT)?;
  if items.is_empty() {
    return Err(ProviderError::malformed(ARTIFACT, "no questions"));
  }
  let mut questions = Vec::with_capacity(items.len().min(count));
  for (i, item) in items.into_iter().take(count).enumerate() {
    let q: Question = from_value(item, ARTIFACT)?;
    if q.text.trim().is_empty() {
      return Err(ProviderError::malformed(ARTIFACT, format!("question {i} has no text")));
    }
    if q.options.len() != OPTIONS_PER_QUESTION {
      return Err(ProviderError::malformed(
        ARTIFACT,
        format!("question {i} has {} options, expected {OPTIONS_PER_QUESTION}", q.options.len()),
      ));
    }
    if !q.has_option(&q.correct_option) {
      return Err(ProviderError::malformed(ARTIFACT, format!("question {i} answer is not among its options")));
    }
    questions.push(q);
  }
  Ok(questions)
}

/// Flashcards: at least `count` non-empty pairs; surplus cards are dropped.
pub fn parse_flashcards(raw: &str, count: usize) -> Result<Vec<Flashcard>, ProviderError> {
  const ARTIFACT: &str = "flashcards";
  let items = list_items(parse_json_value(raw, ARTIFACT)?, "flashcards", ARTIFACT)?;
  if items.len() < count {
    return Err(ProviderError::malformed(ARTIFACT, format!("got {} cards, expected {count}", items.len())));
  }
  items
    .into_iter()
    .take(count)
    .map(|item| {
      let card: Flashcard = from_value(item, ARTIFACT)?;
      if card.term.trim().is_empty() || card.definition.trim().is_empty() {
        return Err(ProviderError::malformed(ARTIFACT, "empty term or definition"));
      }
      Ok(card)
    })
    .collect()
}

pub fn parse_mind_map(raw: &str) -> Result<MindMapNode, ProviderError> {
  const ARTIFACT: &str = "mind map";
  let value = parse_json_value(raw, ARTIFACT)?;
  if !value.is_object() {
    return Err(ProviderError::malformed(ARTIFACT, "expected an object"));
  }
  let node: MindMapNode = from_value(value, ARTIFACT)?;
  if node.topic.trim().is_empty() {
    return Err(ProviderError::malformed(ARTIFACT, "root topic is empty"));
  }
  Ok(node)
}

pub fn parse_scenario(raw: &str) -> Result<Scenario, ProviderError> {
  const ARTIFACT: &str = "scenario";
  let s: Scenario = from_value(parse_json_value(raw, ARTIFACT)?, ARTIFACT)?;
  if s.scenario.trim().is_empty() || s.question.trim().is_empty() {
    return Err(ProviderError::malformed(ARTIFACT, "scenario or question is empty"));
  }
  Ok(s)
}

/// Free-text responses must at least be non-empty.
pub fn parse_text(raw: &str, artifact: &'static str) -> Result<String, ProviderError> {
  let t = raw.trim();
  if t.is_empty() {
    Err(ProviderError::malformed(artifact, "empty response"))
  } else {
    Ok(t.to_string())
  }
}
