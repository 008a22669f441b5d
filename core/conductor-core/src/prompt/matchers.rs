//! Named prompt-shape matchers.
//!
//! Each matcher recognises one prompt layout from co-occurring literal markers and
//! returns typed evidence. Adding a shape means adding a matcher; the liveness
//! heuristics and the engine's safety gates are untouched.

use super::liveness::{is_accept_edits_toggle, numbered_prompt_liveness, Liveness};
use super::patterns::{
    CONTINUATION_PHRASES, CURSOR, PLAN_KEYWORDS, PLAN_QUESTION, RE_CURSOR_YES_OPTION,
    RE_FIRST_YES, RE_SECOND_OPTION, RE_TOOL_CALL, RULE_GLYPH,
};
use super::screen::ScreenTail;
use super::{OperationKind, PromptEvidence, PromptShape};

const NUMBERED_WINDOW: usize = 15;
const PLAN_WINDOW: usize = 10;
/// Trailing characters searched for a `>` input cursor.
const CURSOR_SCAN_CHARS: usize = 20;

pub trait PromptMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evidence for this shape, active or already answered; `None` if the shape is
    /// absent or ambiguous.
    fn evaluate(&self, tail: &ScreenTail) -> Option<PromptEvidence>;
}

/// Plan-mode confirmation: the proceed question, plan keywords, and the cursor on a
/// numbered Yes option.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanModeMatcher;

impl PromptMatcher for PlanModeMatcher {
    fn name(&self) -> &'static str {
        "plan_mode"
    }

    fn evaluate(&self, tail: &ScreenTail) -> Option<PromptEvidence> {
        let window = tail.last(PLAN_WINDOW);
        let text = ScreenTail::joined(window);
        if !text.contains(PLAN_QUESTION) {
            return None;
        }
        let cursor_on_yes = window.iter().any(|line| RE_CURSOR_YES_OPTION.is_match(line));
        let has_keyword = PLAN_KEYWORDS.iter().any(|keyword| text.contains(keyword));
        if !(cursor_on_yes && has_keyword) {
            return None;
        }
        Some(PromptEvidence::active(
            PromptShape::PlanMode,
            OperationKind::PlanConfirm,
            "plan mode confirmation",
        ))
    }
}

/// Permission prompt with numbered options and a cancel hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumberedOptionsMatcher;

impl PromptMatcher for NumberedOptionsMatcher {
    fn name(&self) -> &'static str {
        "numbered_options"
    }

    fn evaluate(&self, tail: &ScreenTail) -> Option<PromptEvidence> {
        let window = tail.last(NUMBERED_WINDOW);
        let text = ScreenTail::joined(window);
        if !(RE_FIRST_YES.is_match(&text) && RE_SECOND_OPTION.is_match(&text)) {
            return None;
        }

        let (cancel_line, is_active) = match numbered_prompt_liveness(window) {
            Liveness::Waiting { cancel_line } => (cancel_line, true),
            Liveness::Answered { cancel_line } => (cancel_line, false),
            Liveness::Inconclusive => return None,
        };

        let (operation_kind, raw_command_text) = classify_operation(&window[..=cancel_line]);
        Some(PromptEvidence {
            shape: PromptShape::NumberedOptions,
            operation_kind,
            raw_command_text,
            is_active,
        })
    }
}

/// Binary "accept edits" toggle at the very bottom of the screen.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptEditsMatcher;

impl PromptMatcher for AcceptEditsMatcher {
    fn name(&self) -> &'static str {
        "accept_edits"
    }

    fn evaluate(&self, tail: &ScreenTail) -> Option<PromptEvidence> {
        let lines = tail.lines();
        lines.iter().enumerate().find_map(|(index, line)| {
            if !is_accept_edits_toggle(line) {
                return None;
            }
            // One trailing line is the input cursor.
            let after = lines[index + 1..]
                .iter()
                .filter(|l| !l.starts_with(RULE_GLYPH))
                .count();
            if after > 1 {
                return None;
            }
            let command = if line.to_lowercase().contains("files") {
                line.as_str()
            } else {
                "accept edits"
            };
            Some(PromptEvidence::active(
                PromptShape::AcceptEdits,
                OperationKind::AcceptEdits,
                command,
            ))
        })
    }
}

/// The agent stopped and asks what to do next, with an input cursor showing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinuationMatcher;

impl PromptMatcher for ContinuationMatcher {
    fn name(&self) -> &'static str {
        "continuation"
    }

    fn evaluate(&self, tail: &ScreenTail) -> Option<PromptEvidence> {
        let text = ScreenTail::joined(tail.lines());
        let lower = text.to_lowercase();
        if !CONTINUATION_PHRASES
            .iter()
            .any(|phrase| lower.contains(phrase))
        {
            return None;
        }

        let tail_chars: String = {
            let chars: Vec<char> = text.chars().collect();
            let start = chars.len().saturating_sub(CURSOR_SCAN_CHARS);
            chars[start..].iter().collect()
        };
        if !(text.contains(CURSOR) || tail_chars.contains('>')) {
            return None;
        }

        Some(PromptEvidence::active(
            PromptShape::Continuation,
            OperationKind::Continue,
            "continuation prompt",
        ))
    }
}

/// The built-in matchers, strongest evidence first.
pub fn default_matchers() -> Vec<Box<dyn PromptMatcher>> {
    vec![
        Box::new(PlanModeMatcher),
        Box::new(NumberedOptionsMatcher),
        Box::new(AcceptEditsMatcher),
        Box::new(ContinuationMatcher),
    ]
}

/// Operation kind and command text from the lines preceding a cancel hint.
pub fn classify_operation(context: &[String]) -> (OperationKind, String) {
    let lower = ScreenTail::joined(context).to_lowercase();

    if lower.contains("edit") {
        if let Some(file) = edit_target(context) {
            return (OperationKind::Edit, format!("edit {}", file));
        }
        if let Some(arg) = tool_argument(context, &["Edit", "Update"]) {
            return (OperationKind::Edit, format!("edit {}", arg));
        }
        return (OperationKind::Edit, "edit file".to_string());
    }
    if lower.contains("bash") || lower.contains("command") || lower.contains("execute") {
        let command = tool_argument(context, &["Bash"]).unwrap_or_else(|| "run command".into());
        return (OperationKind::Bash, command);
    }
    if lower.contains("write") {
        let text = tool_argument(context, &["Write"])
            .map(|arg| format!("write {}", arg))
            .unwrap_or_else(|| "write file".into());
        return (OperationKind::Write, text);
    }
    if lower.contains("read") {
        let text = tool_argument(context, &["Read"])
            .map(|arg| format!("read {}", arg))
            .unwrap_or_else(|| "read file".into());
        return (OperationKind::Read, text);
    }
    if lower.contains("grep") {
        let text = tool_argument(context, &["Grep"]).unwrap_or_else(|| "search files".into());
        return (OperationKind::Grep, text);
    }
    if lower.contains("glob") {
        let text = tool_argument(context, &["Glob"]).unwrap_or_else(|| "list files".into());
        return (OperationKind::Glob, text);
    }
    (OperationKind::Confirm, "confirm action".to_string())
}

/// File name from "... make this edit to src/main.rs?".
fn edit_target(context: &[String]) -> Option<String> {
    context
        .iter()
        .filter(|line| line.to_lowercase().contains("edit to"))
        .find_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            words
                .windows(3)
                .find(|w| w[0].eq_ignore_ascii_case("edit") && w[1].eq_ignore_ascii_case("to"))
                .map(|w| w[2].trim_end_matches('?').to_string())
                .filter(|file| !file.is_empty())
        })
}

fn tool_argument(context: &[String], tools: &[&str]) -> Option<String> {
    context.iter().rev().find_map(|line| {
        let captures = RE_TOOL_CALL.captures(line)?;
        let tool = captures.get(1)?.as_str();
        if !tools.contains(&tool) {
            return None;
        }
        let argument = captures.get(2)?.as_str().trim();
        (!argument.is_empty()).then(|| argument.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(text: &str) -> ScreenTail {
        ScreenTail::from_capture(text)
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(|l| l.trim().to_string()).collect()
    }

    #[test]
    fn plan_mode_needs_cursor_and_keyword() {
        let screen = "Here is the plan.\n\
                      Would you like to proceed?\n\
                      ❯ 1. Yes, and auto-accept edits\n\
                      2. Yes, and manually approve edits\n\
                      3. No, keep planning";
        let evidence = PlanModeMatcher.evaluate(&tail(screen)).unwrap();
        assert_eq!(evidence.operation_kind, OperationKind::PlanConfirm);
        assert!(evidence.is_active);

        let no_cursor = screen.replace('❯', " ");
        assert!(PlanModeMatcher.evaluate(&tail(&no_cursor)).is_none());
    }

    #[test]
    fn numbered_prompt_reports_answered_evidence() {
        let screen = "Bash(rm -rf target)\n\
                      Do you want to proceed?\n\
                      ❯ 1. Yes\n\
                      2. No\n\
                      Esc to cancel\n\
                      Removed target directory and rebuilt";
        let evidence = NumberedOptionsMatcher.evaluate(&tail(screen)).unwrap();
        assert!(!evidence.is_active);
        assert_eq!(evidence.operation_kind, OperationKind::Bash);
    }

    #[test]
    fn accept_edits_allows_one_trailing_line() {
        let screen = "Changes ready\n\
                      ⏵⏵ accept edits on (shift+tab to cycle) · 2 files +10 -3\n\
                      ────────\n\
                      >";
        let evidence = AcceptEditsMatcher.evaluate(&tail(screen)).unwrap();
        assert_eq!(evidence.operation_kind, OperationKind::AcceptEdits);
        assert!(evidence.raw_command_text.contains("2 files"));

        let scrolled = format!("{}\nmore output\neven more", screen);
        assert!(AcceptEditsMatcher.evaluate(&tail(&scrolled)).is_none());
    }

    #[test]
    fn continuation_needs_an_input_cursor() {
        let asked = "All tests pass.\nWhat would you like me to do next?\n❯";
        assert!(ContinuationMatcher.evaluate(&tail(asked)).is_some());

        let no_cursor = "All tests pass.\nWhat would you like me to do next?\nThinking";
        assert!(ContinuationMatcher.evaluate(&tail(no_cursor)).is_none());
    }

    #[test]
    fn classify_extracts_edit_target() {
        let (kind, text) = classify_operation(&lines(
            "Update(src/lib.rs)\nDo you want to make this edit to lib.rs?",
        ));
        assert_eq!(kind, OperationKind::Edit);
        assert_eq!(text, "edit lib.rs");
    }

    #[test]
    fn classify_extracts_bash_command() {
        let (kind, text) = classify_operation(&lines(
            "Bash(cargo test --workspace)\nRun tests\nDo you want to proceed?",
        ));
        assert_eq!(kind, OperationKind::Bash);
        assert_eq!(text, "cargo test --workspace");
    }

    #[test]
    fn classify_falls_back_to_confirm() {
        let (kind, text) = classify_operation(&lines("Do you want to proceed?"));
        assert_eq!(kind, OperationKind::Confirm);
        assert_eq!(text, "confirm action");
    }

    #[test]
    fn classify_read_and_write() {
        assert_eq!(
            classify_operation(&lines("Write(notes.md)\nCreate file?")),
            (OperationKind::Write, "write notes.md".to_string())
        );
        assert_eq!(
            classify_operation(&lines("Read(Cargo.toml)\nAllow?")).0,
            OperationKind::Read
        );
    }
}
