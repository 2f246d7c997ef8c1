//! Application state: in-memory session store, prompts, settings and the content provider.
//!
//! This module owns:
//!   - the session store (by id, with insertion order for eviction)
//!   - the prompts struct (from TOML or defaults)
//!   - engine settings (reveal delay, flashcard count, limits)
//!   - the content provider (OpenAI when configured, disabled otherwise)
//!
//! Each session sits behind its own mutex. Locks are held for state transitions
//! only, never across a provider call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_agent_config_from_env, Prompts, Settings};
use crate::error::{Result, StudyError};
use crate::openai::OpenAI;
use crate::provider::{ContentProvider, DisabledProvider};
use crate::session::StudySession;

pub type SessionHandle = Arc<Mutex<StudySession>>;

#[derive(Default)]
struct SessionStore {
  by_id: HashMap<String, SessionHandle>,
  order: VecDeque<String>,
}

/// Cheap to clone: provider-backed steps run on spawned tasks that own a copy.
#[derive(Clone)]
pub struct AppState {
  sessions: Arc<RwLock<SessionStore>>,
  pub provider: Arc<dyn ContentProvider>,
  pub prompts: Arc<Prompts>,
  pub settings: Settings,
}

impl AppState {
  /// Build state from env: load config, init the provider.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let cfg = load_agent_config_from_env().unwrap_or_default();

    let provider: Arc<dyn ContentProvider> = match OpenAI::from_env(cfg.prompts.clone()) {
      Some(oa) => {
        info!(target: "study_aid_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        Arc::new(oa)
      }
      None => {
        warn!(target: "study_aid_backend", "OpenAI disabled (no OPENAI_API_KEY). Every artifact will be a placeholder.");
        Arc::new(DisabledProvider)
      }
    };

    info!(
      target: "study_aid_backend",
      reveal_delay_ms = cfg.settings.reveal_delay_ms,
      flashcard_count = cfg.settings.flashcard_count,
      max_sessions = cfg.settings.max_sessions,
      "Engine settings"
    );

    Self::with_provider(provider, cfg.prompts, cfg.settings)
  }

  pub fn with_provider(provider: Arc<dyn ContentProvider>, prompts: Prompts, settings: Settings) -> Self {
    Self {
      sessions: Arc::new(RwLock::new(SessionStore::default())),
      provider,
      prompts: Arc::new(prompts),
      settings,
    }
  }

  /// Create an empty session (view `Setup`), evicting the oldest beyond capacity.
  #[instrument(level = "debug", skip(self))]
  pub async fn create_session(&self) -> (String, SessionHandle) {
    let id = Uuid::new_v4().to_string();
    let handle = Arc::new(Mutex::new(StudySession::new(id.clone())));
    let mut store = self.sessions.write().await;
    store.by_id.insert(id.clone(), handle.clone());
    store.order.push_back(id.clone());
    while store.order.len() > self.settings.max_sessions.max(1) {
      if let Some(old) = store.order.pop_front() {
        store.by_id.remove(&old);
        info!(target: "study_aid_backend", evicted = %old, "Session store full; evicted oldest session");
      }
    }
    (id, handle)
  }

  #[instrument(level = "debug", skip(self), fields(%id))]
  pub async fn session(&self, id: &str) -> Result<SessionHandle> {
    let store = self.sessions.read().await;
    store.by_id.get(id).cloned().ok_or_else(|| StudyError::UnknownSession(id.to_string()))
  }

  pub async fn session_count(&self) -> usize {
    self.sessions.read().await.by_id.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::testing::ScriptedProvider;

  fn state(max_sessions: usize) -> AppState {
    let settings = Settings { max_sessions, ..Settings::default() };
    AppState::with_provider(Arc::new(ScriptedProvider::happy()), Prompts::default(), settings)
  }

  #[tokio::test]
  async fn sessions_are_found_by_id() {
    let st = state(4);
    let (id, _) = st.create_session().await;
    let handle = st.session(&id).await.unwrap();
    assert_eq!(handle.lock().await.id(), id);
    assert!(matches!(st.session("nope").await, Err(StudyError::UnknownSession(_))));
  }

  #[tokio::test]
  async fn oldest_session_is_evicted() {
    let st = state(2);
    let (first, _) = st.create_session().await;
    st.create_session().await;
    st.create_session().await;
    assert_eq!(st.session_count().await, 2);
    assert!(st.session(&first).await.is_err());
  }
}
