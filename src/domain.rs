//! Domain models used by the backend: themes, learning modules, view states and
//! the generated artifacts (questions, flashcards, mind map, scenario).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Presentation/tone directive for generated text.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
  Space,
  Jungle,
  Aquatic,
  Action,
  /// Non-thematic mode: clear and professional output.
  #[default]
  #[serde(rename = "deep focus", alias = "focus", alias = "deep_focus")]
  Focus,
}

impl Theme {
  pub fn as_str(&self) -> &'static str {
    match self {
      Theme::Space => "space",
      Theme::Jungle => "jungle",
      Theme::Aquatic => "aquatic",
      Theme::Action => "action",
      Theme::Focus => "deep focus",
    }
  }

  /// Every theme except `Focus` is interpolated into the prompt as a creative theme.
  pub fn is_thematic(&self) -> bool {
    !matches!(self, Theme::Focus)
  }
}

impl fmt::Display for Theme {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One of the four selectable learning artifacts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LearningModule {
  Summary,
  Chat,
  MindMap,
  PuzzleLearning,
}

impl LearningModule {
  /// Dashboard label.
  pub fn label(&self) -> &'static str {
    match self {
      LearningModule::Summary => "Summary",
      LearningModule::Chat => "Chat with the Content",
      LearningModule::MindMap => "Mind Map",
      LearningModule::PuzzleLearning => "Puzzle Learning",
    }
  }
}

impl fmt::Display for LearningModule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Top-level view of a study session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum View {
  #[default]
  Setup,
  Generating,
  Dashboard,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
  #[default]
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

/// Allowed Level-1 batch sizes.
pub const QUESTION_COUNT_OPTIONS: [usize; 3] = [5, 10, 15];
pub const DEFAULT_QUESTION_COUNT: usize = 5;

/// Multiple-choice knowledge-check question.
/// Wire names follow the provider schema: `question`, `options`, `answer`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
  #[serde(rename = "question")]
  pub text: String,
  #[serde(default)]
  pub options: Vec<String>,
  #[serde(rename = "answer", default)]
  pub correct_option: String,
}

impl Question {
  pub fn is_correct(&self, chosen: &str) -> bool {
    self.correct_option == chosen
  }

  pub fn has_option(&self, option: &str) -> bool {
    self.options.iter().any(|o| o == option)
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flashcard {
  pub term: String,
  pub definition: String,
}

/// Recursive mind-map node; only the root topic is required.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MindMapNode {
  pub topic: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<MindMapNode>,
}

impl MindMapNode {
  pub fn leaf(topic: impl Into<String>) -> Self {
    Self { topic: topic.into(), children: Vec::new() }
  }

  /// Depth of the tree (a lone root has depth 1).
  pub fn depth(&self) -> usize {
    1 + self.children.iter().map(MindMapNode::depth).max().unwrap_or(0)
  }
}

/// Level-3 problem: a short real-world scenario plus one direct question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
  pub scenario: String,
  pub question: String,
}

/// Non-interactive artifacts produced by the initial fan-out.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mind_map: Option<MindMapNode>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn theme_wire_names() {
    assert_eq!(serde_json::to_string(&Theme::Focus).unwrap(), "\"deep focus\"");
    let t: Theme = serde_json::from_str("\"focus\"").unwrap();
    assert_eq!(t, Theme::Focus);
    let t: Theme = serde_json::from_str("\"jungle\"").unwrap();
    assert!(t.is_thematic());
  }

  #[test]
  fn question_uses_provider_field_names() {
    let q: Question = serde_json::from_str(
      r#"{"question":"2+2?","options":["1","2","3","4"],"answer":"4"}"#,
    )
    .unwrap();
    assert_eq!(q.text, "2+2?");
    assert!(q.is_correct("4"));
    assert!(q.has_option("1"));
    assert!(!q.has_option("5"));
  }

  #[test]
  fn mind_map_children_are_optional() {
    let n: MindMapNode = serde_json::from_str(r#"{"topic":"root"}"#).unwrap();
    assert!(n.children.is_empty());
    assert_eq!(n.depth(), 1);
    let n: MindMapNode =
      serde_json::from_str(r#"{"topic":"r","children":[{"topic":"a","children":[{"topic":"b"}]}]}"#).unwrap();
    assert_eq!(n.depth(), 3);
  }

  #[test]
  fn view_serializes_screaming() {
    assert_eq!(serde_json::to_string(&View::Dashboard).unwrap(), "\"DASHBOARD\"");
  }
}
