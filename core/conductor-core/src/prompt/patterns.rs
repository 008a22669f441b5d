//! Compiled patterns and literal markers for agent terminal screens.
//!
//! Update these when the agent CLI changes its prompt layout.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Control Sequences
// ═══════════════════════════════════════════════════════════════════════════════

/// OSC sequences (window titles, hyperlinks), terminated by BEL or ST.
pub static RE_OSC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").unwrap());
/// CSI sequences and two-byte escapes.
pub static RE_ANSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|[@-Z\\-_])").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Prompt Shapes
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor sitting on a numbered Yes/No option.
pub static RE_CURSOR_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"❯\s*\d+\.\s*(?:Yes|No)\b").unwrap());
/// Cursor sitting on a numbered Yes option (plan mode).
pub static RE_CURSOR_YES_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"❯\s*\d+\.\s*Yes\b").unwrap());
pub static RE_FIRST_YES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b1\.\s?Yes\b").unwrap());
pub static RE_SECOND_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b2\.\s?(?:Yes|No)\b").unwrap());
/// Tool invocation header, e.g. `Bash(cargo test)` or `Write(src/lib.rs)`.
pub static RE_TOOL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(Bash|Write|Read|Edit|Update|Grep|Glob)\((.+)\)").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Literal Markers
// ═══════════════════════════════════════════════════════════════════════════════

pub const CURSOR: char = '❯';
pub const TOGGLE_GLYPH: char = '⏵';
pub const RULE_GLYPH: char = '─';

/// Matched case-insensitively.
pub const CANCEL_HINTS: &[&str] = &["esc to cancel", "tab to amend"];

pub const BUSY_WORDS: &[&str] = &[
    "reading",
    "writing",
    "searching",
    "running",
    "executing",
    "analyzing",
    "processing",
    "loading",
    "fetching",
];

pub const CONTINUATION_PHRASES: &[&str] = &[
    "what should claude do",
    "what would you like me to do",
    "what should i do next",
    "how would you like me to proceed",
];

pub const PLAN_QUESTION: &str = "Would you like to proceed?";
pub const PLAN_KEYWORDS: &[&str] = &["clear context", "auto-accept", "manually approve"];

/// Single help words the prompt footer wraps onto their own line.
pub const FOOTER_WORDS: &[&str] = &["explain", "cancel", "help", "amend", "options", "proceed"];
