use crate::error::Result;
use crate::prompt::OperationKind;
use crate::terminal::TerminalMux;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Literal(&'static str),
    Submit,
}

/// Keys that answer a prompt of this kind.
///
/// Numbered prompts get option 1 ("Yes"). With `dont_ask_again`, edits, writes and
/// commands get option 2 instead, which grants a standing permission for the rest of
/// the agent's session.
pub fn response_for(kind: OperationKind, dont_ask_again: bool) -> Vec<KeyAction> {
    match kind {
        OperationKind::AcceptEdits => vec![KeyAction::Submit],
        OperationKind::Continue => vec![KeyAction::Literal("continue"), KeyAction::Submit],
        OperationKind::PlanConfirm => vec![KeyAction::Literal("1"), KeyAction::Submit],
        kind if dont_ask_again && kind.is_mutating() => {
            vec![KeyAction::Literal("2"), KeyAction::Submit]
        }
        _ => vec![KeyAction::Literal("1"), KeyAction::Submit],
    }
}

pub fn send_response<M: TerminalMux + ?Sized>(
    mux: &M,
    session: &str,
    actions: &[KeyAction],
) -> Result<()> {
    for action in actions {
        match action {
            KeyAction::Literal(text) => mux.send_literal(session, text)?,
            KeyAction::Submit => mux.send_submit(session)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_per_kind() {
        assert_eq!(
            response_for(OperationKind::AcceptEdits, false),
            vec![KeyAction::Submit]
        );
        assert_eq!(
            response_for(OperationKind::Continue, false),
            vec![KeyAction::Literal("continue"), KeyAction::Submit]
        );
        assert_eq!(
            response_for(OperationKind::Edit, false),
            vec![KeyAction::Literal("1"), KeyAction::Submit]
        );
        assert_eq!(
            response_for(OperationKind::Bash, true),
            vec![KeyAction::Literal("2"), KeyAction::Submit]
        );
        // Read-only prompts never get the standing permission.
        assert_eq!(
            response_for(OperationKind::Read, true),
            vec![KeyAction::Literal("1"), KeyAction::Submit]
        );
    }
}
