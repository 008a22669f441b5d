//! Preconditions for answering a prompt without a human.

use std::time::Duration;

use crate::config::AutomationSettings;
use crate::error::Result;
use crate::prompt::{OperationKind, PromptEvidence};
use crate::registry::{Conflict, RegistryConflicts};
use crate::terminal::TerminalMux;

/// Lines at the bottom of the raw capture checked for the typing prefix.
const TYPING_SCAN_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Output changed too recently; someone may be working in the session.
    SessionActive { idle: Duration },
    /// Not on the allow-list; left for manual approval.
    Unsafe(OperationKind),
    Conflict(Conflict),
    /// Prompt gone or replaced between the gate and the send.
    PromptChanged,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SessionActive { idle } => {
                write!(f, "session active (idle {}ms)", idle.as_millis())
            }
            SkipReason::Unsafe(kind) => write!(f, "{} requires manual approval", kind),
            SkipReason::Conflict(conflict) => write!(f, "conflict: {}", conflict),
            SkipReason::PromptChanged => f.write_str("prompt changed before confirm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Pass,
    /// A human is mid-input; keep the prompt pending and look again next poll.
    WaitForTyping,
    Skip(SkipReason),
}

pub struct SafetyGates<'a> {
    settings: &'a AutomationSettings,
    conflicts: Option<&'a RegistryConflicts>,
}

impl<'a> SafetyGates<'a> {
    pub fn new(settings: &'a AutomationSettings, conflicts: Option<&'a RegistryConflicts>) -> Self {
        Self {
            settings,
            conflicts,
        }
    }

    /// Runs the gates in order: idle, typing, allow-list, registry conflict.
    pub fn evaluate<M: TerminalMux + ?Sized>(
        &self,
        mux: &M,
        session: &str,
        screen: &str,
        evidence: &PromptEvidence,
    ) -> Result<GateVerdict> {
        // Unknown idle time counts as idle: tmux without activity tracking would
        // otherwise block every confirmation.
        if let Some(idle) = mux.idle_for(session)? {
            if idle < self.settings.idle_threshold() {
                return Ok(GateVerdict::Skip(SkipReason::SessionActive { idle }));
            }
        }

        if is_typing(screen, &self.settings.typing_prefix) {
            return Ok(GateVerdict::WaitForTyping);
        }

        if !self.settings.is_safe(evidence.operation_kind) {
            return Ok(GateVerdict::Skip(SkipReason::Unsafe(evidence.operation_kind)));
        }

        if let Some(conflicts) = self.conflicts {
            if let Some(conflict) = conflicts.check(session, &evidence.raw_command_text) {
                return Ok(GateVerdict::Skip(SkipReason::Conflict(conflict)));
            }
        }

        Ok(GateVerdict::Pass)
    }
}

/// A line near the bottom starting with the typing prefix means a human is composing
/// input there.
pub fn is_typing(screen: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    let lines: Vec<&str> = screen.lines().collect();
    let start = lines.len().saturating_sub(TYPING_SCAN_LINES);
    lines[start..]
        .iter()
        .any(|line| line.trim().trim_start_matches(['>', '❯']).trim().starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptShape;
    use crate::testing::ScriptedMux;

    fn evidence(kind: OperationKind) -> PromptEvidence {
        PromptEvidence::active(PromptShape::NumberedOptions, kind, "edit main.rs")
    }

    fn settings() -> AutomationSettings {
        AutomationSettings {
            safe_operations: vec![OperationKind::Read, OperationKind::Edit],
            ..AutomationSettings::default()
        }
    }

    #[test]
    fn recent_activity_skips() {
        let settings = settings();
        let mux = ScriptedMux::new();
        mux.set_screen("w1", "");
        mux.set_idle("w1", Duration::from_millis(500));

        let verdict = SafetyGates::new(&settings, None)
            .evaluate(&mux, "w1", "", &evidence(OperationKind::Edit))
            .unwrap();
        assert!(matches!(verdict, GateVerdict::Skip(SkipReason::SessionActive { .. })));
    }

    #[test]
    fn typing_waits_and_unsafe_skips() {
        let settings = settings();
        let mux = ScriptedMux::new();
        mux.set_screen("w1", "");
        mux.set_idle("w1", Duration::from_secs(10));
        let gates = SafetyGates::new(&settings, None);

        let typing = "❯ 1. Yes\n2. No\nEsc to cancel\n> ## still writing a reply";
        assert_eq!(
            gates.evaluate(&mux, "w1", typing, &evidence(OperationKind::Edit)).unwrap(),
            GateVerdict::WaitForTyping
        );
        assert_eq!(
            gates.evaluate(&mux, "w1", "", &evidence(OperationKind::Bash)).unwrap(),
            GateVerdict::Skip(SkipReason::Unsafe(OperationKind::Bash))
        );
        assert_eq!(
            gates.evaluate(&mux, "w1", "", &evidence(OperationKind::Read)).unwrap(),
            GateVerdict::Pass
        );
    }

    #[test]
    fn registry_conflict_skips() {
        let temp = tempfile::tempdir().unwrap();
        let registry = temp.path().join("registry.json");
        std::fs::write(
            &registry,
            r#"{"environment_usage": {"env_w1": {"status": "in_use", "group": "g7"}}}"#,
        )
        .unwrap();
        let conflicts = RegistryConflicts::new(&registry);
        let settings = settings();
        let mux = ScriptedMux::new();
        mux.set_screen("w1", "");

        let verdict = SafetyGates::new(&settings, Some(&conflicts))
            .evaluate(&mux, "w1", "", &evidence(OperationKind::Edit))
            .unwrap();
        assert!(matches!(verdict, GateVerdict::Skip(SkipReason::Conflict(_))));
    }

    #[test]
    fn typing_prefix_only_counts_near_the_bottom() {
        let mut screen = "## an old note\n".to_string();
        screen.push_str(&"line\n".repeat(TYPING_SCAN_LINES));
        assert!(!is_typing(&screen, "##"));
        assert!(is_typing("a\nb\n##draft", "##"));
        assert!(!is_typing("##draft", ""));
    }
}
