//! Confirmation-prompt detection over captured terminal text.
//!
//! [`PromptDetector::detect`] is a pure function of the capture. It answers one of
//! three things:
//!
//! - [`Detection::Active`]: a prompt is on screen and still waiting for input
//! - [`Detection::AlreadyAnswered`]: a prompt is visible but the agent moved on
//! - [`Detection::None`]: nothing, or nothing certain
//!
//! Ambiguity always resolves to `None`. A missed prompt costs a few seconds of a
//! human's attention; a false positive types keys into someone else's work.
//!
//! # Module Structure
//!
//! - `screen`: control-sequence stripping and the tail window
//! - `liveness`: cancel-hint position, trailing content, cursor adjacency
//! - `matchers`: one [`PromptMatcher`] per prompt layout
//! - `patterns`: compiled regexes and literal markers

pub mod liveness;
mod matchers;
mod patterns;
mod screen;

pub use matchers::{
    classify_operation, default_matchers, AcceptEditsMatcher, ContinuationMatcher,
    NumberedOptionsMatcher, PlanModeMatcher, PromptMatcher,
};
pub use screen::{strip_control_sequences, ScreenTail, TAIL_WINDOW};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Captures with fewer non-empty lines than this can't hold a full prompt.
const MIN_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Grep,
    Glob,
    Edit,
    Write,
    Bash,
    AcceptEdits,
    PlanConfirm,
    Continue,
    Confirm,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Read,
        OperationKind::Grep,
        OperationKind::Glob,
        OperationKind::Edit,
        OperationKind::Write,
        OperationKind::Bash,
        OperationKind::AcceptEdits,
        OperationKind::PlanConfirm,
        OperationKind::Continue,
        OperationKind::Confirm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Grep => "grep",
            OperationKind::Glob => "glob",
            OperationKind::Edit => "edit",
            OperationKind::Write => "write",
            OperationKind::Bash => "bash",
            OperationKind::AcceptEdits => "accept_edits",
            OperationKind::PlanConfirm => "plan_confirm",
            OperationKind::Continue => "continue",
            OperationKind::Confirm => "confirm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn risk(&self) -> RiskLevel {
        match self {
            OperationKind::Read | OperationKind::Grep | OperationKind::Glob => RiskLevel::Low,
            OperationKind::Edit
            | OperationKind::AcceptEdits
            | OperationKind::PlanConfirm
            | OperationKind::Confirm
            | OperationKind::Continue => RiskLevel::Medium,
            OperationKind::Write | OperationKind::Bash => RiskLevel::High,
        }
    }

    /// Operations that modify files or run commands.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Edit | OperationKind::Write | OperationKind::Bash
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptShape {
    AcceptEdits,
    NumberedOptions,
    PlanMode,
    Continuation,
}

/// What a matcher saw. Produced per detection pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEvidence {
    pub shape: PromptShape,
    pub operation_kind: OperationKind,
    pub raw_command_text: String,
    pub is_active: bool,
}

impl PromptEvidence {
    pub fn active(shape: PromptShape, operation_kind: OperationKind, command: &str) -> Self {
        Self {
            shape,
            operation_kind,
            raw_command_text: command.to_string(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Active(PromptEvidence),
    AlreadyAnswered(PromptEvidence),
    None,
}

impl Detection {
    pub fn active(&self) -> Option<&PromptEvidence> {
        match self {
            Detection::Active(evidence) => Some(evidence),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Detection::None)
    }
}

/// Ordered set of prompt-shape matchers. The first active match wins.
pub struct PromptDetector {
    matchers: Vec<Box<dyn PromptMatcher>>,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self {
            matchers: default_matchers(),
        }
    }
}

impl PromptDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a matcher, consulted after the built-in ones.
    pub fn with_matcher(mut self, matcher: impl PromptMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn detect(&self, capture: &str) -> Detection {
        let tail = ScreenTail::from_capture(capture);
        if tail.len() < MIN_LINES {
            return Detection::None;
        }
        if liveness::shows_busy_status(tail.lines()) {
            trace!("Screen shows a busy status; no prompt");
            return Detection::None;
        }

        let mut answered = None;
        for matcher in &self.matchers {
            let Some(evidence) = matcher.evaluate(&tail) else {
                continue;
            };
            trace!(matcher = matcher.name(), active = evidence.is_active, "Prompt shape matched");
            if evidence.is_active {
                return Detection::Active(evidence);
            }
            answered.get_or_insert(evidence);
        }

        answered.map_or(Detection::None, Detection::AlreadyAnswered)
    }
}
