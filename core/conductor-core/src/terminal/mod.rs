//! Terminal-session collaborator.
//!
//! Agents run inside named terminal sessions. The router types tasks into them and
//! the automation engine reads their screens and answers prompts. Nothing else about
//! the multiplexer is assumed.

mod tmux;

pub use tmux::TmuxMux;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub trait TerminalMux: Send + Sync {
    /// Names of all live sessions.
    fn list_sessions(&self) -> Result<Vec<String>>;

    /// The last `lines` lines of the session's scrollback, including the visible screen.
    fn capture(&self, session: &str, lines: usize) -> Result<String>;

    /// Types `text` verbatim, without submitting it.
    fn send_literal(&self, session: &str, text: &str) -> Result<()>;

    /// Presses Enter.
    fn send_submit(&self, session: &str) -> Result<()>;

    /// Discards whatever is in the input line without interrupting the agent.
    fn clear_input(&self, session: &str) -> Result<()>;

    /// Time since the session last produced output. `None` when the multiplexer
    /// can't tell.
    fn idle_for(&self, session: &str) -> Result<Option<Duration>>;
}

impl<T: TerminalMux + ?Sized> TerminalMux for Arc<T> {
    fn list_sessions(&self) -> Result<Vec<String>> {
        (**self).list_sessions()
    }

    fn capture(&self, session: &str, lines: usize) -> Result<String> {
        (**self).capture(session, lines)
    }

    fn send_literal(&self, session: &str, text: &str) -> Result<()> {
        (**self).send_literal(session, text)
    }

    fn send_submit(&self, session: &str) -> Result<()> {
        (**self).send_submit(session)
    }

    fn clear_input(&self, session: &str) -> Result<()> {
        (**self).clear_input(session)
    }

    fn idle_for(&self, session: &str) -> Result<Option<Duration>> {
        (**self).idle_for(session)
    }
}
