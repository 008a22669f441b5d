//! Test doubles shared by unit and integration tests.
//!
//! Enabled under `cfg(test)` and with the `test-helpers` feature.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CoordError, Result};
use crate::terminal::TerminalMux;

/// One key event recorded by [`ScriptedMux`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentKeys {
    Literal { session: String, text: String },
    Submit { session: String },
    Clear { session: String },
}

impl SentKeys {
    pub fn session(&self) -> &str {
        match self {
            SentKeys::Literal { session, .. }
            | SentKeys::Submit { session }
            | SentKeys::Clear { session } => session,
        }
    }
}

#[derive(Default)]
struct ScriptState {
    screens: BTreeMap<String, String>,
    after_send: HashMap<String, VecDeque<String>>,
    idle: HashMap<String, Duration>,
    failing: HashSet<String>,
    sent: Vec<SentKeys>,
    captures: HashMap<String, usize>,
}

/// In-memory terminal whose screens are set by the test and which records every
/// key sent. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedMux {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedMux {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates or replaces a session with the given screen.
    pub fn set_screen(&self, session: &str, screen: &str) {
        self.state()
            .screens
            .insert(session.to_string(), screen.to_string());
    }

    pub fn remove_session(&self, session: &str) {
        self.state().screens.remove(session);
    }

    /// Screen the session switches to after the next key sent to it. Queued screens
    /// apply one per send.
    pub fn queue_screen_after_send(&self, session: &str, screen: &str) {
        self.state()
            .after_send
            .entry(session.to_string())
            .or_default()
            .push_back(screen.to_string());
    }

    pub fn set_idle(&self, session: &str, idle: Duration) {
        self.state().idle.insert(session.to_string(), idle);
    }

    /// Makes every send to `session` fail.
    pub fn fail_sends_to(&self, session: &str) {
        self.state().failing.insert(session.to_string());
    }

    pub fn sent(&self) -> Vec<SentKeys> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, session: &str) -> Vec<SentKeys> {
        self.state()
            .sent
            .iter()
            .filter(|keys| keys.session() == session)
            .cloned()
            .collect()
    }

    /// Concatenated literal text typed into `session`.
    pub fn typed(&self, session: &str) -> String {
        self.sent_to(session)
            .into_iter()
            .filter_map(|keys| match keys {
                SentKeys::Literal { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn capture_count(&self, session: &str) -> usize {
        self.state().captures.get(session).copied().unwrap_or(0)
    }

    fn record_send(&self, keys: SentKeys) -> Result<()> {
        let mut state = self.state();
        let session = keys.session().to_string();
        if state.failing.contains(&session) || !state.screens.contains_key(&session) {
            return Err(CoordError::Terminal {
                session,
                details: "can't find session".to_string(),
            });
        }
        state.sent.push(keys);
        if let Some(next) = state
            .after_send
            .get_mut(&session)
            .and_then(VecDeque::pop_front)
        {
            state.screens.insert(session, next);
        }
        Ok(())
    }
}

impl TerminalMux for ScriptedMux {
    fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.state().screens.keys().cloned().collect())
    }

    fn capture(&self, session: &str, lines: usize) -> Result<String> {
        let mut state = self.state();
        *state.captures.entry(session.to_string()).or_default() += 1;
        let screen = state
            .screens
            .get(session)
            .ok_or_else(|| CoordError::Terminal {
                session: session.to_string(),
                details: "can't find session".to_string(),
            })?;
        let all: Vec<&str> = screen.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }

    fn send_literal(&self, session: &str, text: &str) -> Result<()> {
        self.record_send(SentKeys::Literal {
            session: session.to_string(),
            text: text.to_string(),
        })
    }

    fn send_submit(&self, session: &str) -> Result<()> {
        self.record_send(SentKeys::Submit {
            session: session.to_string(),
        })
    }

    fn clear_input(&self, session: &str) -> Result<()> {
        self.record_send(SentKeys::Clear {
            session: session.to_string(),
        })
    }

    fn idle_for(&self, session: &str) -> Result<Option<Duration>> {
        Ok(self.state().idle.get(session).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_screen_applies_after_send() {
        let mux = ScriptedMux::new();
        mux.set_screen("w1", "before");
        mux.queue_screen_after_send("w1", "after");

        assert_eq!(mux.capture("w1", 10).unwrap(), "before");
        mux.send_literal("w1", "1").unwrap();
        assert_eq!(mux.capture("w1", 10).unwrap(), "after");
        assert_eq!(mux.capture_count("w1"), 2);
    }

    #[test]
    fn capture_returns_tail_lines() {
        let mux = ScriptedMux::new();
        mux.set_screen("w1", "a\nb\nc\nd");
        assert_eq!(mux.capture("w1", 2).unwrap(), "c\nd");
    }

    #[test]
    fn sends_to_unknown_or_failing_sessions_error() {
        let mux = ScriptedMux::new();
        assert!(mux.send_submit("ghost").is_err());

        mux.set_screen("w1", "");
        mux.fail_sends_to("w1");
        assert!(mux.send_literal("w1", "x").is_err());
        assert!(mux.sent().is_empty());
    }
}
