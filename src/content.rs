//! Provider calls with placeholder fallback.
//!
//! Each function returns usable content no matter what the provider does: failures
//! and schema violations are logged and replaced by the matching placeholder.
//! Callers (orchestrator fan-out, level transitions) therefore never fail.

use tracing::{error, info, instrument};

use crate::domain::{Difficulty, Flashcard, MindMapNode, Question, Scenario, Theme};
use crate::placeholders;
use crate::provider::ContentProvider;

#[instrument(level = "info", skip(provider, text), fields(provider = %provider.name(), text_len = text.len(), %theme))]
pub async fn summary(provider: &dyn ContentProvider, text: &str, theme: Theme) -> String {
  let start = std::time::Instant::now();
  match provider.summarize(text, theme).await {
    Ok(s) => {
      info!(target: "study", elapsed = ?start.elapsed(), summary_len = s.len(), "Summary generated");
      s
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Summary generation failed; using placeholder");
      placeholders::summary()
    }
  }
}

#[instrument(level = "info", skip(provider, text), fields(provider = %provider.name(), text_len = text.len(), %theme))]
pub async fn mind_map(provider: &dyn ContentProvider, text: &str, theme: Theme) -> MindMapNode {
  let start = std::time::Instant::now();
  match provider.mind_map(text, theme).await {
    Ok(node) => {
      info!(target: "study", elapsed = ?start.elapsed(), depth = node.depth(), "Mind map generated");
      node
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Mind map generation failed; using placeholder");
      placeholders::mind_map()
    }
  }
}

#[instrument(level = "info", skip(provider, text), fields(provider = %provider.name(), text_len = text.len(), %theme, difficulty = difficulty.as_str()))]
pub async fn quiz_questions(
  provider: &dyn ContentProvider,
  text: &str,
  theme: Theme,
  difficulty: Difficulty,
  count: usize,
) -> Vec<Question> {
  let start = std::time::Instant::now();
  match provider.quiz_questions(text, theme, difficulty, count).await {
    Ok(qs) => {
      info!(target: "study", elapsed = ?start.elapsed(), questions = qs.len(), "Level-1 questions generated");
      qs
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Question generation failed; using placeholder");
      placeholders::quiz()
    }
  }
}

#[instrument(level = "info", skip(provider, text), fields(provider = %provider.name(), text_len = text.len(), %theme))]
pub async fn flashcards(provider: &dyn ContentProvider, text: &str, theme: Theme, count: usize) -> Vec<Flashcard> {
  let start = std::time::Instant::now();
  match provider.flashcards(text, theme, count).await {
    Ok(cards) => {
      info!(target: "study", elapsed = ?start.elapsed(), cards = cards.len(), "Flashcards generated");
      cards
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Flashcard generation failed; using placeholder");
      placeholders::flashcards()
    }
  }
}

#[instrument(level = "info", skip(provider, text), fields(provider = %provider.name(), text_len = text.len(), %theme))]
pub async fn scenario(provider: &dyn ContentProvider, text: &str, theme: Theme) -> Scenario {
  let start = std::time::Instant::now();
  match provider.scenario(text, theme).await {
    Ok(s) => {
      info!(target: "study", elapsed = ?start.elapsed(), "Scenario generated");
      s
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Scenario generation failed; using placeholder");
      placeholders::scenario()
    }
  }
}

#[instrument(level = "info", skip(provider, text, scenario, user_answer), fields(provider = %provider.name(), text_len = text.len(), answer_len = user_answer.len()))]
pub async fn evaluation(provider: &dyn ContentProvider, text: &str, scenario: &Scenario, user_answer: &str) -> String {
  let start = std::time::Instant::now();
  match provider.evaluate_scenario(text, scenario, user_answer).await {
    Ok(feedback) => {
      info!(target: "study", elapsed = ?start.elapsed(), feedback_len = feedback.len(), "Scenario answer evaluated");
      feedback
    }
    Err(e) => {
      error!(target: "study", elapsed = ?start.elapsed(), error = %e, "Evaluation failed; using placeholder");
      placeholders::evaluation()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::testing::ScriptedProvider;

  #[tokio::test]
  async fn failures_become_placeholders() {
    let p = ScriptedProvider::failing();
    assert_eq!(summary(&p, "t", Theme::Focus).await, placeholders::SUMMARY);
    assert_eq!(mind_map(&p, "t", Theme::Focus).await, placeholders::mind_map());
    assert_eq!(flashcards(&p, "t", Theme::Focus, 8).await, placeholders::flashcards());
    assert_eq!(scenario(&p, "t", Theme::Focus).await, placeholders::scenario());
    let s = placeholders::scenario();
    assert_eq!(evaluation(&p, "t", &s, "answer").await, placeholders::EVALUATION);
  }

  #[tokio::test]
  async fn malformed_quiz_falls_back_to_single_empty_question() {
    let mut p = ScriptedProvider::happy();
    p.quiz = Some(r#"{"question":"only one","options":["a","b","c","d"],"answer":"a"}"#.into());
    let qs = quiz_questions(&p, "t", Theme::Focus, Difficulty::Easy, 5).await;
    assert_eq!(qs.len(), 1);
    assert!(qs[0].options.is_empty());
    assert!(qs[0].correct_option.is_empty());
  }

  #[tokio::test]
  async fn valid_content_passes_through() {
    let p = ScriptedProvider::happy();
    assert_eq!(summary(&p, "t", Theme::Space).await, "A short summary.");
    assert_eq!(flashcards(&p, "t", Theme::Space, 8).await.len(), 8);
    assert_eq!(quiz_questions(&p, "t", Theme::Space, Difficulty::Easy, 5).await.len(), 5);
  }
}
