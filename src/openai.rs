//! Minimal OpenAI-compatible client implementing `ContentProvider`.
//!
//! We only call chat.completions and request either plain text, a strict JSON
//! object, or a streamed (SSE) reply for chat. Calls are instrumented and log
//! model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::chat::{ChatMessage, ChatRole};
use crate::config::Prompts;
use crate::domain::{Difficulty, Flashcard, MindMapNode, Question, Scenario, Theme};
use crate::error::ProviderError;
use crate::provider::{
  parse_flashcards, parse_mind_map, parse_quiz, parse_scenario, parse_text, ContentProvider, FragmentStream,
};
use crate::util::{fill_template, trunc_for_log};

const CLIENT_UA: &str = "study-aid-backend/0.1";

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(60);

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, prompts })
  }

  fn system_for(&self, theme: Theme) -> String {
    self.prompts.base_system_for(&self.prompts.theme_directive(theme))
  }

  async fn post(&self, req: &ChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
    let url = format!("{}/chat/completions", self.base_url);
    let res = self.client.post(&url)
      .header(USER_AGENT, CLIENT_UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(req).send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(ProviderError::Status { status, message });
    }
    Ok(res)
  }

  /// Single (non-streamed) completion; returns the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn complete(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
    json_mode: bool,
  ) -> Result<String, ProviderError> {
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: json_mode.then(|| ResponseFormat { r#type: "json_object".into() }),
      stream: None,
    };

    let start = std::time::Instant::now();
    let body: ChatCompletionResponse = self.post(&req).await?.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    debug!(elapsed = ?start.elapsed(), response_len = text.len(), "OpenAI completion received");
    Ok(text)
  }
}

#[async_trait]
impl ContentProvider for OpenAI {
  fn name(&self) -> &str { "openai" }

  async fn summarize(&self, text: &str, theme: Theme) -> Result<String, ProviderError> {
    let user = fill_template(&self.prompts.summary_user_template, &[("text", text)]);
    let raw = self.complete(&self.system_for(theme), &user, 0.4, false).await?;
    parse_text(&raw, "summary")
  }

  async fn mind_map(&self, text: &str, theme: Theme) -> Result<MindMapNode, ProviderError> {
    let user = fill_template(&self.prompts.mind_map_user_template, &[("text", text)]);
    let raw = self.complete(&self.system_for(theme), &user, 0.3, true).await?;
    parse_mind_map(&raw)
  }

  async fn quiz_questions(
    &self,
    text: &str,
    theme: Theme,
    difficulty: Difficulty,
    count: usize,
  ) -> Result<Vec<Question>, ProviderError> {
    let count_s = count.to_string();
    let user = fill_template(
      &self.prompts.quiz_user_template,
      &[("difficulty", difficulty.as_str()), ("count", &count_s), ("text", text)],
    );
    let raw = self.complete(&self.system_for(theme), &user, 0.5, true).await?;
    parse_quiz(&raw, count)
  }

  async fn flashcards(&self, text: &str, theme: Theme, count: usize) -> Result<Vec<Flashcard>, ProviderError> {
    let count_s = count.to_string();
    let user = fill_template(&self.prompts.flashcards_user_template, &[("count", &count_s), ("text", text)]);
    let raw = self.complete(&self.system_for(theme), &user, 0.4, true).await?;
    parse_flashcards(&raw, count)
  }

  async fn scenario(&self, text: &str, theme: Theme) -> Result<Scenario, ProviderError> {
    let user = fill_template(&self.prompts.scenario_user_template, &[("text", text)]);
    let raw = self.complete(&self.system_for(theme), &user, 0.8, true).await?;
    parse_scenario(&raw)
  }

  async fn evaluate_scenario(
    &self,
    text: &str,
    scenario: &Scenario,
    user_answer: &str,
  ) -> Result<String, ProviderError> {
    let user = fill_template(
      &self.prompts.evaluation_user_template,
      &[
        ("text", text),
        ("scenario", &scenario.scenario),
        ("question", &scenario.question),
        ("answer", user_answer),
      ],
    );
    let raw = self.complete(&self.prompts.evaluation_system, &user, 0.3, false).await?;
    parse_text(&raw, "evaluation")
  }

  #[instrument(level = "info", skip(self, system, history), fields(model = %self.model, turns = history.len()))]
  async fn chat_stream(&self, system: &str, history: &[ChatMessage]) -> Result<FragmentStream, ProviderError> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessageReq { role: "system".into(), content: system.into() });
    for m in history {
      let role = match m.role {
        ChatRole::User => "user",
        ChatRole::Model => "assistant",
      };
      messages.push(ChatMessageReq { role: role.into(), content: m.text.clone() });
    }
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages,
      temperature: 0.7,
      response_format: None,
      stream: Some(true),
    };
    let res = self.post(&req).await?;
    Ok(sse_fragments(res.bytes_stream()))
  }
}

// --- SSE decoding ---

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
  Fragment(String),
  Done,
}

/// Decode one SSE line. Comments, blank lines, non-data fields and deltas
/// without text yield `None`.
fn parse_sse_line(line: &str) -> Option<Result<SseEvent, ProviderError>> {
  let data = line.strip_prefix("data:")?.trim();
  if data == "[DONE]" {
    return Some(Ok(SseEvent::Done));
  }
  match serde_json::from_str::<StreamChunk>(data) {
    Ok(chunk) => {
      let text = chunk.choices.into_iter().next().and_then(|c| c.delta.content).unwrap_or_default();
      if text.is_empty() { None } else { Some(Ok(SseEvent::Fragment(text))) }
    }
    Err(e) => Some(Err(ProviderError::Stream(format!("bad event: {e}")))),
  }
}

struct SseState<S> {
  inner: S,
  buf: Vec<u8>,
  queue: VecDeque<Result<String, ProviderError>>,
  done: bool,
}

impl<S> SseState<S> {
  /// Move every complete line out of the buffer into the fragment queue.
  fn drain_lines(&mut self, flush: bool) {
    loop {
      let line = match self.buf.iter().position(|b| *b == b'\n') {
        Some(pos) => {
          let line: Vec<u8> = self.buf.drain(..=pos).collect();
          line
        }
        None if flush && !self.buf.is_empty() => std::mem::take(&mut self.buf),
        None => return,
      };
      let line = String::from_utf8_lossy(&line);
      match parse_sse_line(line.trim_end_matches(['\r', '\n'])) {
        Some(Ok(SseEvent::Fragment(t))) => self.queue.push_back(Ok(t)),
        Some(Ok(SseEvent::Done)) => {
          self.done = true;
          self.buf.clear();
          return;
        }
        Some(Err(e)) => {
          self.queue.push_back(Err(e));
          self.done = true;
          self.buf.clear();
          return;
        }
        None => {}
      }
    }
  }
}

/// Turn a chunked SSE body into text fragments in arrival order. Lines may be
/// split across chunks, so bytes are buffered until a newline arrives.
fn sse_fragments<S, B>(bytes: S) -> FragmentStream
where
  S: Stream<Item = reqwest::Result<B>> + Send + 'static,
  B: AsRef<[u8]> + Send + 'static,
{
  let state = SseState { inner: Box::pin(bytes), buf: Vec::new(), queue: VecDeque::new(), done: false };
  Box::pin(stream::unfold(state, |mut st| async move {
    loop {
      if let Some(item) = st.queue.pop_front() {
        return Some((item, st));
      }
      if st.done {
        return None;
      }
      match st.inner.next().await {
        Some(Ok(chunk)) => {
          st.buf.extend_from_slice(chunk.as_ref());
          st.drain_lines(false);
        }
        Some(Err(e)) => {
          st.done = true;
          return Some((Err(ProviderError::Http(e)), st));
        }
        None => {
          st.drain_lines(true);
          st.done = true;
        }
      }
    }
  }))
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  stream: Option<bool>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamChunk { #[serde(default)] choices: Vec<StreamChoice> }
#[derive(Deserialize)]
struct StreamChoice { #[serde(default)] delta: StreamDelta }
#[derive(Deserialize, Default)]
struct StreamDelta { #[serde(default)] content: Option<String> }

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
