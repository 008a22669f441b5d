//! "Is this prompt still waiting?" heuristics.
//!
//! Kept apart from the shape matchers: scrollback is full of prompts that were
//! already answered, and these checks are what tell a live one from a stale one.

use super::patterns::{
    BUSY_WORDS, CANCEL_HINTS, CURSOR, FOOTER_WORDS, RE_CURSOR_OPTION, RULE_GLYPH, TOGGLE_GLYPH,
};

/// Lines allowed below the cancel hint before the prompt counts as scrolled past.
pub const CANCEL_HINT_MAX_DISTANCE: usize = 5;

/// Lines at the bottom inspected for a busy status.
const BUSY_STATUS_LINES: usize = 3;

/// Lines at the bottom in which a cancel hint counts as a live affordance.
const AFFORDANCE_LINES: usize = 5;

/// Lines this short after a cancel hint are wrapped footer fragments.
const TRIVIAL_LINE_CHARS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Still waiting. `cancel_line` indexes the hint inside the inspected window.
    Waiting { cancel_line: usize },
    /// A prompt was here but has been answered or scrolled away.
    Answered { cancel_line: usize },
    /// No evidence either way.
    Inconclusive,
}

pub fn has_cancel_hint(line: &str) -> bool {
    let lower = line.to_lowercase();
    CANCEL_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Index of the last cancel hint in `window`.
pub fn cancel_hint_index(window: &[String]) -> Option<usize> {
    window.iter().rposition(|line| has_cancel_hint(line))
}

pub fn cancel_hint_is_recent(window: &[String], index: usize) -> bool {
    window.len().saturating_sub(index + 1) <= CANCEL_HINT_MAX_DISTANCE
}

/// Footer decoration or status-bar text that may follow a live prompt.
pub fn is_trivial_trailer(line: &str) -> bool {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();

    trimmed.is_empty()
        || trimmed.starts_with(RULE_GLYPH)
        || trimmed == "?"
        || lower.contains("for shortcuts")
        || (trimmed.starts_with(CURSOR) && trimmed.chars().count() <= 3)
        || trimmed.contains("⏵⏵")
        || lower.contains("accept edits")
        || lower.contains("esc to interrupt")
        || lower.contains("ctrl+")
        || FOOTER_WORDS.contains(&lower.as_str())
        || trimmed.chars().count() <= TRIVIAL_LINE_CHARS
}

/// True when something substantive was printed after the cancel hint, which means
/// the prompt was answered and the agent moved on.
pub fn has_content_after(window: &[String], cancel_line: usize) -> bool {
    window
        .iter()
        .skip(cancel_line + 1)
        .any(|line| !is_trivial_trailer(line))
}

/// The strongest "still waiting" signal: the selection cursor sits on a numbered
/// option. Static help text never has it.
pub fn cursor_on_numbered_option(window: &[String]) -> bool {
    window.iter().any(|line| RE_CURSOR_OPTION.is_match(line))
}

/// Combines hint position, trailing content, and cursor adjacency for a numbered
/// option prompt.
pub fn numbered_prompt_liveness(window: &[String]) -> Liveness {
    let Some(cancel_line) = cancel_hint_index(window) else {
        return Liveness::Inconclusive;
    };
    if !cancel_hint_is_recent(window, cancel_line) || has_content_after(window, cancel_line) {
        return Liveness::Answered { cancel_line };
    }
    if !cursor_on_numbered_option(window) {
        return Liveness::Inconclusive;
    }
    Liveness::Waiting { cancel_line }
}

/// The agent is working: a busy word near the bottom and no cancel hint to answer.
pub fn shows_busy_status(lines: &[String]) -> bool {
    let affordance_start = lines.len().saturating_sub(AFFORDANCE_LINES);
    if lines[affordance_start..]
        .iter()
        .any(|line| has_cancel_hint(line))
    {
        return false;
    }

    let status_start = lines.len().saturating_sub(BUSY_STATUS_LINES);
    lines[status_start..].iter().any(|line| {
        let lower = line.to_lowercase();
        BUSY_WORDS.iter().any(|word| lower.contains(word))
    })
}

/// Toggle line of the "accept edits" prompt.
pub fn is_accept_edits_toggle(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("accept edits") && (line.contains(TOGGLE_GLYPH) || lower.contains("shift+tab"))
}
