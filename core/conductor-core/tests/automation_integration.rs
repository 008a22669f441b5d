//! Integration tests for the auto-confirm engine over a scripted terminal.

use std::time::{Duration, Instant};

use conductor_core::automation::{PollOutcome, SessionAutomationEngine};
use conductor_core::config::{AutomationSettings, Range, RiskDelays};
use conductor_core::testing::{ScriptedMux, SentKeys};
use conductor_core::{OperationKind, StatsStore};

const EDIT_PROMPT: &str = "\
● Update(src/lib.rs)
  ⎿  Updated src/lib.rs with 2 additions
 Do you want to make this edit to lib.rs?
 ❯ 1. Yes
   2. Yes, and don't ask again this session (shift+tab)
   3. No, and tell Claude what to do differently (esc)
 Esc to cancel
";

const AFTER_EDIT: &str = "\
● Update(src/lib.rs)
  ⎿  Updated src/lib.rs with 2 additions
● Done.
>";

fn settings() -> AutomationSettings {
    AutomationSettings {
        verify_interval_ms: 0,
        confirm_delay_ms: RiskDelays {
            low: Range::new(3_000, 3_000),
            medium: Range::new(3_000, 3_000),
            high: Range::new(3_000, 3_000),
        },
        ..AutomationSettings::default()
    }
}

fn confirmations(mux: &ScriptedMux, session: &str) -> usize {
    mux.sent_to(session)
        .iter()
        .filter(|keys| matches!(keys, SentKeys::Submit { .. }))
        .count()
}

#[test]
fn test_identical_prompt_is_not_confirmed_twice_within_retention() {
    let temp = tempfile::tempdir().unwrap();
    let stats = StatsStore::new(temp.path().join("stats.db")).unwrap();
    let mux = ScriptedMux::new();
    mux.set_screen("worker-1", EDIT_PROMPT);
    mux.queue_screen_after_send("worker-1", AFTER_EDIT);

    let mut engine = SessionAutomationEngine::new(mux.clone(), settings())
        .with_stats(stats)
        .with_seed(42);
    let t0 = Instant::now();

    assert!(matches!(
        engine.poll_session("worker-1", t0).unwrap(),
        PollOutcome::Scheduled { .. }
    ));
    assert!(matches!(
        engine.poll_session("worker-1", t0 + Duration::from_secs(3)).unwrap(),
        PollOutcome::Confirmed { kind: OperationKind::Edit, .. }
    ));
    assert_eq!(confirmations(&mux, "worker-1"), 1);

    // Same prompt text reappears during cooldown, then after it, still within
    // the handled-key retention window.
    mux.set_screen("worker-1", EDIT_PROMPT);
    assert_eq!(
        engine.poll_session("worker-1", t0 + Duration::from_secs(10)).unwrap(),
        PollOutcome::CoolingDown
    );
    let later = engine
        .poll_session("worker-1", t0 + Duration::from_secs(60))
        .unwrap();
    assert!(matches!(later, PollOutcome::AlreadyHandled(_)), "{:?}", later);
    engine
        .poll_session("worker-1", t0 + Duration::from_secs(90))
        .unwrap();
    assert_eq!(confirmations(&mux, "worker-1"), 1);

    // Past retention the key is forgotten and the prompt is treated as new.
    assert!(matches!(
        engine
            .poll_session("worker-1", t0 + Duration::from_secs(3 + 121))
            .unwrap(),
        PollOutcome::Scheduled { .. }
    ));

    let store = StatsStore::new(temp.path().join("stats.db")).unwrap();
    let recent = store.recent_confirmations(10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].operation, "edit");
    assert_eq!(recent[0].command, "edit lib.rs");
    assert_eq!(recent[0].delay_ms, 3_000);
}

#[test]
fn test_human_typing_holds_the_prompt() {
    let mux = ScriptedMux::new();
    // A short marker below the prompt is footer-sized, so the prompt stays live.
    let typing = format!("{}> ##", EDIT_PROMPT);
    mux.set_screen("worker-1", &typing);
    let mut engine = SessionAutomationEngine::new(mux.clone(), settings());
    let t0 = Instant::now();

    let PollOutcome::Scheduled { key, .. } = engine.poll_session("worker-1", t0).unwrap() else {
        panic!("prompt with typing marker should still be scheduled");
    };

    for secs in [3, 4, 5] {
        assert_eq!(
            engine
                .poll_session("worker-1", t0 + Duration::from_secs(secs))
                .unwrap(),
            PollOutcome::WaitingForTyping { key: key.clone() }
        );
    }
    assert!(mux.sent().is_empty());
    let state = engine.session_state("worker-1").unwrap();
    assert_eq!(state.pending_prompt_key(), Some(&key));

    mux.set_screen("worker-1", EDIT_PROMPT);
    mux.queue_screen_after_send("worker-1", AFTER_EDIT);
    let confirmed = engine
        .poll_session("worker-1", t0 + Duration::from_secs(6))
        .unwrap();
    assert!(
        matches!(&confirmed, PollOutcome::Confirmed { key: done, kind: OperationKind::Edit } if *done == key),
        "{:?}",
        confirmed
    );
    assert_eq!(confirmations(&mux, "worker-1"), 1);
}

#[test]
fn test_busy_session_is_skipped_then_retried() {
    let mux = ScriptedMux::new();
    mux.set_screen("worker-1", EDIT_PROMPT);
    mux.set_idle("worker-1", Duration::from_millis(100));
    mux.queue_screen_after_send("worker-1", AFTER_EDIT);
    let mut engine = SessionAutomationEngine::new(mux.clone(), settings());
    let t0 = Instant::now();

    engine.poll_session("worker-1", t0).unwrap();
    assert!(matches!(
        engine.poll_session("worker-1", t0 + Duration::from_secs(3)).unwrap(),
        PollOutcome::Skipped { .. }
    ));

    mux.set_idle("worker-1", Duration::from_secs(10));
    assert!(matches!(
        engine.poll_session("worker-1", t0 + Duration::from_secs(4)).unwrap(),
        PollOutcome::Scheduled { .. }
    ));
    assert!(matches!(
        engine.poll_session("worker-1", t0 + Duration::from_secs(7)).unwrap(),
        PollOutcome::Confirmed { .. }
    ));
}
