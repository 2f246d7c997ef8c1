//! Loading agent configuration (prompts + engine settings) from TOML.
//!
//! See `AgentConfig`, `Prompts` and `Settings` for expected schema. Every field is
//! optional; anything missing falls back to the built-in defaults.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Theme;
use crate::util::fill_template;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub settings: Settings,
}

/// Engine knobs that are not prompt text.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Pause between recording a Level-1 answer and moving to the next question.
  pub reveal_delay_ms: u64,
  /// Number of term/definition pairs requested for Level 2.
  pub flashcard_count: usize,
  /// Upper bound on the source text accepted by `generate`.
  pub max_source_chars: usize,
  /// In-memory session store capacity; the oldest session is evicted beyond it.
  pub max_sessions: usize,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      reveal_delay_ms: 1000,
      flashcard_count: 8,
      max_source_chars: 100_000,
      max_sessions: 256,
    }
  }
}

/// Prompts used by the content provider. Defaults target general study material.
/// You can override them in TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Shared preamble
  pub base_system: String,
  pub focus_directive: String,
  pub theme_directive_template: String,
  // Initial fan-out
  pub summary_user_template: String,
  pub mind_map_user_template: String,
  pub quiz_user_template: String,
  // Level transitions
  pub flashcards_user_template: String,
  pub scenario_user_template: String,
  pub evaluation_system: String,
  pub evaluation_user_template: String,
  // Chat
  pub chat_system_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      base_system: "You are an expert educator and content creator. Your goal is to transform the provided text into an engaging learning aid. {theme_directive}".into(),
      focus_directive: "Your response should be clear, professional, and direct, suitable for deep study.".into(),
      theme_directive_template: "Your response MUST be in a creative and engaging \"{theme}\" theme.".into(),
      summary_user_template: "Analyze the following text and generate a comprehensive summary. The summary should capture the key points and main ideas of the text in a clear and concise manner.\n\nTEXT: \"\"\"{text}\"\"\"".into(),
      mind_map_user_template: "Analyze the following text and generate a hierarchical mind map structure. The mind map should represent the main topics, sub-topics, and key details from the text. Return JSON {\"topic\": string, \"children\": [{\"topic\": string, \"children\": [...]}]}. Respond with ONLY the JSON object.\n\nTEXT: \"\"\"{text}\"\"\"".into(),
      quiz_user_template: "Based on the following text, create a {difficulty} level practice test with exactly {count} multiple-choice questions. Each question must have 4 options and you must indicate the single correct answer, copied verbatim from the options. Return JSON {\"questions\": [{\"question\": string, \"options\": [string, string, string, string], \"answer\": string}]}.\n\nTEXT: \"\"\"{text}\"\"\"".into(),
      flashcards_user_template: "Based on the following text, identify {count} key terms or concepts. For each one, provide a concise, one-sentence definition. Return JSON {\"flashcards\": [{\"term\": string, \"definition\": string}]}.\n\nTEXT: \"\"\"{text}\"\"\"".into(),
      scenario_user_template: "Analyze the provided text. Create a VERY BRIEF (1-2 sentences) real-world scenario based on the text. Then, formulate a SINGLE, DIRECT question for the user to answer. The goal is a quick application of knowledge, not a long story. Return JSON {\"scenario\": string, \"question\": string}.\n\nTEXT: \"\"\"{text}\"\"\"".into(),
      evaluation_system: "You are an expert, empathetic tutor. Your task is to evaluate a student's answer to a scenario-based question. The student's answer might be short or informally phrased. Focus on the essence and the core concepts the student is trying to convey, rather than nitpicking grammar or wording. Be a supportive mentor.".into(),
      evaluation_user_template: "First, state whether the student is on the right track in a friendly tone. Then, provide constructive, encouraging feedback. Acknowledge the correct parts of their thinking and gently guide them on areas for improvement or concepts they might have missed, always referring back to the source material.\n\nSOURCE TEXT: \"\"\"{text}\"\"\"\n\nSCENARIO: \"{scenario}\"\n\nQUESTION: \"{question}\"\n\nSTUDENT'S ANSWER: \"{answer}\"\n\nEVALUATION:".into(),
      chat_system_template: "You are a helpful study assistant. Your goal is to answer questions and discuss the provided text in detail. Maintain a helpful and encouraging tone, using a \"{theme}\" theme in your responses. THE DOCUMENT YOU ARE DISCUSSING IS: \"\"\"{text}\"\"\"".into(),
    }
  }
}

impl Prompts {
  /// Neutral directive for `Theme::Focus`, creative directive otherwise.
  pub fn theme_directive(&self, theme: Theme) -> String {
    if theme.is_thematic() {
      fill_template(&self.theme_directive_template, &[("theme", theme.as_str())])
    } else {
      self.focus_directive.clone()
    }
  }

  /// System preamble shared by every content request.
  pub fn base_system_for(&self, theme_directive: &str) -> String {
    fill_template(&self.base_system, &[("theme_directive", theme_directive)])
  }

  /// System instruction for a chat session keyed to the source text and theme.
  pub fn chat_system(&self, text: &str, theme: Theme) -> String {
    fill_template(&self.chat_system_template, &[("theme", theme.as_str()), ("text", text)])
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "study_aid_backend", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "study_aid_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "study_aid_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  toml::from_str::<AgentConfig>(s)
}
