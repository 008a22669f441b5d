//! Poll loop driving the engine across every live session.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::engine::{PollOutcome, SessionAutomationEngine};
use super::gates::SkipReason;
use crate::config::Range;
use crate::terminal::TerminalMux;

/// Longest single sleep; keeps shutdown responsive during rest gaps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

const KILL_SWITCH_VALUES: &[&str] = &["1", "true", "enabled", "stop"];

/// True when the kill-switch file exists and holds an engaged value.
pub fn kill_switch_engaged(path: &Path) -> bool {
    match fs_err::read_to_string(path) {
        Ok(content) => {
            let value = content.trim().to_lowercase();
            KILL_SWITCH_VALUES.contains(&value.as_str())
        }
        Err(_) => false,
    }
}

/// Randomised active windows separated by short rests.
#[derive(Debug)]
pub struct DutyCycle {
    window_secs: Range,
    rest_secs: Range,
    window_ends_at: Instant,
    rng: StdRng,
}

impl DutyCycle {
    pub fn new(window_secs: Range, rest_secs: Range, now: Instant) -> Self {
        let mut cycle = Self {
            window_secs,
            rest_secs,
            window_ends_at: now,
            rng: StdRng::from_entropy(),
        };
        cycle.start_window(now);
        cycle
    }

    /// Begins a new active window at `now` and returns its length.
    pub fn start_window(&mut self, now: Instant) -> Duration {
        let length = self.pick(self.window_secs);
        self.window_ends_at = now + length;
        length
    }

    pub fn window_over(&self, now: Instant) -> bool {
        now >= self.window_ends_at
    }

    pub fn next_rest(&mut self) -> Duration {
        self.pick(self.rest_secs)
    }

    fn pick(&mut self, range: Range) -> Duration {
        let (min, max) = range.ordered();
        Duration::from_secs(self.rng.gen_range(min..=max))
    }
}

/// Outcome tallies for one active window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounters {
    pub confirmed: u64,
    pub dry_run: u64,
    pub skipped_active: u64,
    pub skipped_unsafe: u64,
    pub skipped_conflict: u64,
    pub unverified: u64,
    pub errors: u64,
}

impl WindowCounters {
    pub fn tally(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Confirmed { .. } => self.confirmed += 1,
            PollOutcome::DryRun { .. } => self.dry_run += 1,
            PollOutcome::SendUnverified { .. } => self.unverified += 1,
            PollOutcome::Skipped { reason, .. } => match reason {
                SkipReason::SessionActive { .. } => self.skipped_active += 1,
                SkipReason::Unsafe(_) => self.skipped_unsafe += 1,
                SkipReason::Conflict(_) => self.skipped_conflict += 1,
                SkipReason::PromptChanged => {}
            },
            _ => {}
        }
    }
}

/// Owns the engine and runs it until stopped, killed, or the shutdown flag flips.
pub struct AutomationRunner<M: TerminalMux> {
    engine: SessionAutomationEngine<M>,
    shutdown: Arc<AtomicBool>,
    counters: WindowCounters,
}

impl<M: TerminalMux> AutomationRunner<M> {
    pub fn new(engine: SessionAutomationEngine<M>) -> Self {
        Self {
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
            counters: WindowCounters::default(),
        }
    }

    /// Shares an externally owned flag, e.g. one set by a signal handler.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn engine(&self) -> &SessionAutomationEngine<M> {
        &self.engine
    }

    pub fn counters(&self) -> WindowCounters {
        self.counters
    }

    /// One pass over every eligible session. Per-session errors are logged and
    /// counted, not propagated, so one dead session can't stall the rest.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, PollOutcome)> {
        let sessions = match self.engine.mux().list_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "Failed to list terminal sessions");
                return Vec::new();
            }
        };
        self.engine.retain_sessions(&sessions);

        let mut outcomes = Vec::new();
        for session in sessions {
            if self.engine.settings().is_excluded(&session) {
                continue;
            }
            match self.engine.poll_session(&session, now) {
                Ok(outcome) => {
                    self.counters.tally(&outcome);
                    outcomes.push((session, outcome));
                }
                Err(err) => {
                    self.counters.errors += 1;
                    warn!(session = %session, error = %err, "Session poll failed");
                }
            }
        }
        outcomes
    }

    /// Blocking loop. Returns the counters of the final, partial window.
    pub fn run(&mut self) -> WindowCounters {
        let settings = self.engine.settings().clone();
        let mut duty = DutyCycle::new(settings.active_window_secs, settings.rest_secs, Instant::now());

        info!(
            dry_run = settings.dry_run,
            poll_ms = settings.poll_interval_ms,
            "Auto-confirm runner started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            if kill_switch_engaged(&settings.kill_switch_path) {
                warn!(path = %settings.kill_switch_path.display(), "Kill switch engaged; stopping");
                break;
            }

            self.tick(Instant::now());

            if duty.window_over(Instant::now()) {
                self.log_window();
                let rest = duty.next_rest();
                debug!(rest_secs = rest.as_secs(), "Active window over; resting");
                self.sleep(rest);
                let length = duty.start_window(Instant::now());
                debug!(window_secs = length.as_secs(), "New active window");
            } else {
                self.sleep(settings.poll_interval());
            }
        }

        let last = self.log_window();
        info!("Auto-confirm runner stopped");
        last
    }

    /// Runs on a background thread until [`RunnerHandle::stop`].
    pub fn start(mut self) -> RunnerHandle
    where
        M: 'static,
    {
        let shutdown = self.shutdown_flag();
        let thread = thread::Builder::new()
            .name("autoconfirm".to_string())
            .spawn(move || self.run());
        match thread {
            Ok(thread) => RunnerHandle {
                shutdown,
                thread: Some(thread),
            },
            Err(err) => {
                warn!(error = %err, "Failed to spawn auto-confirm thread");
                RunnerHandle {
                    shutdown,
                    thread: None,
                }
            }
        }
    }

    /// Logs and resets the current window's counters, returning them.
    fn log_window(&mut self) -> WindowCounters {
        let c = std::mem::take(&mut self.counters);
        info!(
            confirmed = c.confirmed,
            dry_run = c.dry_run,
            skipped_active = c.skipped_active,
            skipped_unsafe = c.skipped_unsafe,
            skipped_conflict = c.skipped_conflict,
            unverified = c.unverified,
            errors = c.errors,
            "Active window summary"
        );
        c
    }

    fn sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

pub struct RunnerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<WindowCounters>>,
}

impl RunnerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the loop and waits for it to exit.
    pub fn stop(mut self) -> Option<WindowCounters> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.thread.take().and_then(|thread| thread.join().ok())
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationSettings;
    use crate::prompt::OperationKind;
    use crate::testing::ScriptedMux;

    const EDIT_PROMPT: &str = "\
● Update(src/lib.rs)
 Do you want to make this edit to lib.rs?
 ❯ 1. Yes
   2. Yes, and don't ask again this session
   3. No, and tell Claude what to do differently
 Esc to cancel
";

    fn settings(kill_switch: &Path) -> AutomationSettings {
        AutomationSettings {
            verify_interval_ms: 0,
            poll_interval_ms: 10,
            confirm_delay_ms: crate::config::RiskDelays {
                low: Range::new(0, 0),
                medium: Range::new(0, 0),
                high: Range::new(0, 0),
            },
            excluded_sessions: vec!["human".to_string()],
            kill_switch_path: kill_switch.to_path_buf(),
            ..AutomationSettings::default()
        }
    }

    #[test]
    fn kill_switch_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("kill");
        assert!(!kill_switch_engaged(&path));
        for (content, engaged) in [("1\n", true), ("STOP", true), ("enabled", true), ("0", false), ("", false)] {
            std::fs::write(&path, content).unwrap();
            assert_eq!(kill_switch_engaged(&path), engaged, "{:?}", content);
        }
    }

    #[test]
    fn tick_skips_excluded_sessions_and_tallies() {
        let temp = tempfile::tempdir().unwrap();
        let mux = ScriptedMux::new();
        mux.set_screen("worker", EDIT_PROMPT);
        mux.set_screen("human", EDIT_PROMPT);
        mux.set_screen("autoconfirm", EDIT_PROMPT);
        mux.queue_screen_after_send("worker", "● Update(src/lib.rs)\n  ⎿  Updated src/lib.rs\n>");
        let engine = SessionAutomationEngine::new(mux.clone(), settings(&temp.path().join("kill")));
        let mut runner = AutomationRunner::new(engine);
        let now = Instant::now();

        let first = runner.tick(now);
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0].1, PollOutcome::Scheduled { .. }));

        let second = runner.tick(now);
        assert!(matches!(
            second[0].1,
            PollOutcome::Confirmed { kind: OperationKind::Edit, .. }
        ));
        assert_eq!(runner.counters().confirmed, 1);
        assert!(mux.sent_to("human").is_empty());
        assert!(mux.sent_to("autoconfirm").is_empty());
    }

    #[test]
    fn counts_session_errors() {
        let temp = tempfile::tempdir().unwrap();
        let mux = ScriptedMux::new();
        mux.set_screen("worker", EDIT_PROMPT);
        mux.fail_sends_to("worker");
        let engine = SessionAutomationEngine::new(mux.clone(), settings(&temp.path().join("kill")));
        let mut runner = AutomationRunner::new(engine);
        let now = Instant::now();

        runner.tick(now);
        assert!(runner.tick(now).is_empty());
        assert_eq!(runner.counters().errors, 1);
        let state = runner.engine().session_state("worker").unwrap();
        assert!(!state.is_cooling_down(now));
    }

    #[test]
    fn start_and_stop_joins_thread() {
        let temp = tempfile::tempdir().unwrap();
        let mux = ScriptedMux::new();
        mux.set_screen("worker", "idle\nnothing\nhere");
        let engine = SessionAutomationEngine::new(mux.clone(), settings(&temp.path().join("kill")));

        let handle = AutomationRunner::new(engine).start();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.is_running());
        assert!(handle.stop().is_some());
        assert!(mux.capture_count("worker") >= 1);
    }

    #[test]
    fn kill_switch_stops_the_loop() {
        let temp = tempfile::tempdir().unwrap();
        let kill = temp.path().join("kill");
        std::fs::write(&kill, "stop").unwrap();
        let mux = ScriptedMux::new();
        mux.set_screen("worker", EDIT_PROMPT);
        let engine = SessionAutomationEngine::new(mux.clone(), settings(&kill));

        let counters = AutomationRunner::new(engine).run();
        assert_eq!(counters, WindowCounters::default());
        assert_eq!(mux.capture_count("worker"), 0);
    }
}
