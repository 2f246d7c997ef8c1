//! Chat sub-session keyed to a source text and theme.
//!
//! One exchange at a time: `begin_exchange` appends the user message plus an empty
//! model message and marks the session pending; fragments are appended to that
//! model message in arrival order; `finish_exchange` clears the pending flag.

use serde::{Deserialize, Serialize};

use crate::domain::Theme;
use crate::error::{Result, StudyError};
use crate::placeholders;
use crate::util::is_blank;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
  User,
  Model,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
  pub role: ChatRole,
  pub text: String,
}

impl ChatMessage {
  pub fn user(text: impl Into<String>) -> Self {
    Self { role: ChatRole::User, text: text.into() }
  }

  pub fn model(text: impl Into<String>) -> Self {
    Self { role: ChatRole::Model, text: text.into() }
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
  /// System instruction sent with every exchange; not part of the snapshot.
  #[serde(skip)]
  system: String,
  pub theme: Theme,
  pub history: Vec<ChatMessage>,
  pub pending: bool,
}

/// What the provider needs to run one exchange.
#[derive(Clone, Debug)]
pub struct ExchangeRequest {
  pub system: String,
  /// Full history up to and including the new user message.
  pub history: Vec<ChatMessage>,
}

impl ChatSession {
  pub fn new(system: String, theme: Theme) -> Self {
    Self { system, theme, history: Vec::new(), pending: false }
  }

  pub fn begin_exchange(&mut self, message: &str) -> Result<ExchangeRequest> {
    if is_blank(message) {
      return Err(StudyError::EmptyMessage);
    }
    if self.pending {
      return Err(StudyError::Busy);
    }
    self.history.push(ChatMessage::user(message));
    let request = ExchangeRequest { system: self.system.clone(), history: self.history.clone() };
    self.history.push(ChatMessage::model(""));
    self.pending = true;
    Ok(request)
  }

  /// Append a fragment to the in-progress model message. Ignored when idle.
  pub fn append_fragment(&mut self, fragment: &str) {
    if !self.pending {
      return;
    }
    if let Some(last) = self.history.last_mut() {
      if last.role == ChatRole::Model {
        last.text.push_str(fragment);
      }
    }
  }

  /// Close the exchange. On failure the connection notice replaces an empty
  /// reply, or follows a partial one.
  pub fn finish_exchange(&mut self, failed: bool) {
    if !self.pending {
      return;
    }
    if failed {
      match self.history.last_mut() {
        Some(last) if last.role == ChatRole::Model && last.text.is_empty() => {
          last.text = placeholders::CHAT_REPLY.to_string();
        }
        _ => self.history.push(ChatMessage::model(placeholders::CHAT_REPLY)),
      }
    }
    self.pending = false;
  }

  /// Text of the latest model message.
  pub fn last_reply(&self) -> Option<&str> {
    self.history.iter().rev().find(|m| m.role == ChatRole::Model).map(|m| m.text.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn session() -> ChatSession {
    ChatSession::new("system".into(), Theme::Focus)
  }

  #[test]
  fn fragments_append_in_order() {
    let mut c = session();
    let req = c.begin_exchange("hi").unwrap();
    assert_eq!(req.history, vec![ChatMessage::user("hi")]);
    c.append_fragment("Hel");
    c.append_fragment("lo");
    c.finish_exchange(false);
    assert_eq!(c.history.len(), 2);
    assert_eq!(c.last_reply(), Some("Hello"));
    assert!(!c.pending);
  }

  #[test]
  fn second_exchange_rejected_while_pending() {
    let mut c = session();
    c.begin_exchange("one").unwrap();
    assert!(matches!(c.begin_exchange("two"), Err(StudyError::Busy)));
    assert_eq!(c.history.len(), 2);
  }

  #[test]
  fn empty_message_rejected_without_change() {
    let mut c = session();
    assert!(matches!(c.begin_exchange("   "), Err(StudyError::EmptyMessage)));
    assert!(c.history.is_empty());
    assert!(!c.pending);
  }

  #[test]
  fn failure_before_any_fragment_fills_placeholder() {
    let mut c = session();
    c.begin_exchange("hi").unwrap();
    c.finish_exchange(true);
    assert_eq!(c.history.len(), 2);
    assert_eq!(c.last_reply(), Some(placeholders::CHAT_REPLY));
  }

  #[test]
  fn failure_mid_stream_keeps_partial_reply() {
    let mut c = session();
    c.begin_exchange("hi").unwrap();
    c.append_fragment("partial");
    c.finish_exchange(true);
    assert_eq!(c.history.len(), 3);
    assert_eq!(c.history[1].text, "partial");
    assert_eq!(c.history[2].text, placeholders::CHAT_REPLY);
  }

  #[test]
  fn fragments_ignored_when_idle() {
    let mut c = session();
    c.append_fragment("stray");
    assert!(c.history.is_empty());
  }
}
