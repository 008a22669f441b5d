use std::process::Command;
use std::time::Duration;

use chrono::Utc;

use super::TerminalMux;
use crate::error::{CoordError, Result};

/// [`TerminalMux`] over the `tmux` command-line client.
#[derive(Debug, Clone)]
pub struct TmuxMux {
    binary: String,
}

impl Default for TmuxMux {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }
}

impl TmuxMux {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, session: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|err| CoordError::Terminal {
                session: session.to_string(),
                details: format!("failed to run {}: {}", self.binary, err),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        Err(CoordError::Terminal {
            session: session.to_string(),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl TerminalMux for TmuxMux {
    fn list_sessions(&self) -> Result<Vec<String>> {
        match self.run("*", &["list-sessions", "-F", "#{session_name}"]) {
            Ok(output) => Ok(parse_session_names(&output)),
            // No server means no sessions, not a failure.
            Err(CoordError::Terminal { details, .. })
                if details.contains("no server running")
                    || details.contains("error connecting") =>
            {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn capture(&self, session: &str, lines: usize) -> Result<String> {
        let start = format!("-{}", lines);
        self.run(
            session,
            &["capture-pane", "-t", session, "-p", "-J", "-S", &start],
        )
    }

    fn send_literal(&self, session: &str, text: &str) -> Result<()> {
        self.run(session, &["send-keys", "-t", session, "-l", text])
            .map(|_| ())
    }

    fn send_submit(&self, session: &str) -> Result<()> {
        self.run(session, &["send-keys", "-t", session, "Enter"])
            .map(|_| ())
    }

    fn clear_input(&self, session: &str) -> Result<()> {
        self.run(session, &["send-keys", "-t", session, "Escape"])?;
        self.run(session, &["send-keys", "-t", session, "C-u"])
            .map(|_| ())
    }

    fn idle_for(&self, session: &str) -> Result<Option<Duration>> {
        let output = self.run(
            session,
            &["display-message", "-p", "-t", session, "#{window_activity}"],
        )?;
        Ok(parse_idle(&output, Utc::now().timestamp()))
    }
}

fn parse_session_names(output: &str) -> Vec<String> {
    let mut sessions: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    sessions.sort();
    sessions.dedup();
    sessions
}

/// `window_activity` is a Unix timestamp in seconds.
fn parse_idle(output: &str, now_secs: i64) -> Option<Duration> {
    let last_activity: i64 = output.trim().parse().ok()?;
    if last_activity <= 0 {
        return None;
    }
    let idle = now_secs.saturating_sub(last_activity).max(0);
    Some(Duration::from_secs(idle as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_names_skips_blanks_and_sorts() {
        let raw = "worker-2\n\nautoconfirm\nworker-1\n  \nworker-1\n";
        assert_eq!(
            parse_session_names(raw),
            vec!["autoconfirm", "worker-1", "worker-2"]
        );
    }

    #[test]
    fn parse_idle_handles_activity_timestamps() {
        assert_eq!(
            parse_idle("1700000000\n", 1_700_000_005),
            Some(Duration::from_secs(5))
        );
        // Clock skew never yields a negative idle time.
        assert_eq!(
            parse_idle("1700000010", 1_700_000_005),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_idle("", 1_700_000_005), None);
        assert_eq!(parse_idle("garbage", 1_700_000_005), None);
        assert_eq!(parse_idle("0", 1_700_000_005), None);
    }

    #[test]
    fn missing_binary_is_a_terminal_error() {
        let mux = TmuxMux::with_binary("/nonexistent/tmux-binary");
        let err = mux.capture("worker-1", 20).unwrap_err();
        assert!(matches!(err, CoordError::Terminal { ref session, .. } if session == "worker-1"));
    }
}
