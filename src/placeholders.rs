//! Placeholder content substituted when a provider request fails or returns a
//! malformed response. The UI renders these like real content, so every
//! artifact stays well-formed.

use crate::domain::{Flashcard, MindMapNode, Question, Scenario};

pub const SUMMARY: &str = "Error: Could not generate a summary for the provided text. Please try again.";
pub const EVALUATION: &str = "Sorry, I was unable to evaluate your answer at this time. Please try again.";
pub const CHAT_REPLY: &str = "I'm having trouble connecting. Please try again.";

pub fn summary() -> String {
  SUMMARY.to_string()
}

pub fn mind_map() -> MindMapNode {
  MindMapNode {
    topic: "Error Generating Mind Map".into(),
    children: vec![MindMapNode::leaf("Please try again.")],
  }
}

/// A single unanswerable question: no options, empty answer.
pub fn quiz() -> Vec<Question> {
  vec![Question {
    text: "Failed to generate questions. Please try again.".into(),
    options: Vec::new(),
    correct_option: String::new(),
  }]
}

pub fn flashcards() -> Vec<Flashcard> {
  vec![Flashcard {
    term: "Error".into(),
    definition: "Failed to generate flashcards. Please try again.".into(),
  }]
}

pub fn scenario() -> Scenario {
  Scenario {
    scenario: "Failed to generate a scenario.".into(),
    question: "Please try advancing to this level again.".into(),
  }
}

pub fn evaluation() -> String {
  EVALUATION.to_string()
}
