//! Initial content fan-out.
//!
//! A `GenerationRequest` can only be built from valid input, so validation always
//! happens before any provider call or session change. `generate` then issues one
//! request per selected module, joins them all, and assembles the dashboard
//! content. Every per-module future is infallible (placeholder fallback), so one
//! failing module never affects the others.

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{info, instrument};

use crate::chat::ChatSession;
use crate::config::Prompts;
use crate::content;
use crate::domain::{
  Difficulty, GeneratedContent, LearningModule, MindMapNode, Question, Theme, QUESTION_COUNT_OPTIONS,
};
use crate::error::{Result, StudyError};
use crate::provider::ContentProvider;
use crate::puzzle::PuzzleState;
use crate::util::is_blank;

/// Level-1 batches are always generated at this difficulty.
pub const LEVEL1_DIFFICULTY: Difficulty = Difficulty::Easy;

#[derive(Clone, Debug)]
pub struct GenerationRequest {
  source_text: String,
  theme: Theme,
  modules: Vec<LearningModule>,
  question_count: usize,
}

impl GenerationRequest {
  /// Validate user input. Modules keep the order the user selected them in.
  pub fn new(
    source_text: String,
    theme: Theme,
    modules: Vec<LearningModule>,
    question_count: usize,
    max_source_chars: usize,
  ) -> Result<Self> {
    if is_blank(&source_text) {
      return Err(StudyError::EmptySourceText);
    }
    let len = source_text.chars().count();
    if len > max_source_chars {
      return Err(StudyError::SourceTextTooLong { len, max: max_source_chars });
    }
    if modules.is_empty() {
      return Err(StudyError::NoModulesSelected);
    }
    for (i, m) in modules.iter().enumerate() {
      if modules[..i].contains(m) {
        return Err(StudyError::DuplicateModule(m.label().to_string()));
      }
    }
    if !QUESTION_COUNT_OPTIONS.contains(&question_count) {
      return Err(StudyError::InvalidQuestionCount(question_count));
    }
    Ok(Self { source_text, theme, modules, question_count })
  }

  pub fn source_text(&self) -> &str { &self.source_text }
  pub fn theme(&self) -> Theme { self.theme }
  pub fn modules(&self) -> &[LearningModule] { &self.modules }
  pub fn question_count(&self) -> usize { self.question_count }

  pub fn includes(&self, module: LearningModule) -> bool {
    self.modules.contains(&module)
  }
}

/// Everything the dashboard needs once the fan-out has settled.
#[derive(Debug)]
pub struct GenerationOutput {
  pub content: GeneratedContent,
  pub puzzle: Option<PuzzleState>,
  pub chat: Option<ChatSession>,
}

enum Artifact {
  Summary(String),
  MindMap(MindMapNode),
  Questions(Vec<Question>),
}

#[instrument(
  level = "info",
  skip(provider, prompts, req),
  fields(provider = %provider.name(), text_len = req.source_text.len(), theme = %req.theme, modules = ?req.modules)
)]
pub async fn generate(provider: &dyn ContentProvider, prompts: &Prompts, req: &GenerationRequest) -> GenerationOutput {
  let start = std::time::Instant::now();
  let text = req.source_text.as_str();
  let theme = req.theme;

  let mut tasks: Vec<BoxFuture<'_, Artifact>> = Vec::new();
  for module in &req.modules {
    match module {
      LearningModule::Summary => {
        tasks.push(content::summary(provider, text, theme).map(Artifact::Summary).boxed());
      }
      LearningModule::MindMap => {
        tasks.push(content::mind_map(provider, text, theme).map(Artifact::MindMap).boxed());
      }
      LearningModule::PuzzleLearning => {
        tasks.push(
          content::quiz_questions(provider, text, theme, LEVEL1_DIFFICULTY, req.question_count())
            .map(Artifact::Questions)
            .boxed(),
        );
      }
      // Interactive: created now, used later.
      LearningModule::Chat => {}
    }
  }

  let chat = req
    .includes(LearningModule::Chat)
    .then(|| ChatSession::new(prompts.chat_system(text, theme), theme));

  let mut out = GenerationOutput { content: GeneratedContent::default(), puzzle: None, chat };
  for artifact in join_all(tasks).await {
    match artifact {
      Artifact::Summary(s) => out.content.summary = Some(s),
      Artifact::MindMap(m) => out.content.mind_map = Some(m),
      Artifact::Questions(qs) => out.puzzle = Some(PuzzleState::new(qs, LEVEL1_DIFFICULTY)),
    }
  }

  info!(
    target: "study",
    elapsed = ?start.elapsed(),
    summary = out.content.summary.is_some(),
    mind_map = out.content.mind_map.is_some(),
    puzzle = out.puzzle.is_some(),
    chat = out.chat.is_some(),
    "Generation fan-out settled"
  );
  out
}
