use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::gates::{GateVerdict, SafetyGates, SkipReason};
use super::response::{response_for, send_response};
use crate::config::AutomationSettings;
use crate::error::Result;
use crate::prompt::{Detection, OperationKind, PromptDetector, PromptEvidence};
use crate::registry::RegistryConflicts;
use crate::stats::{ConfirmationRecord, StatsStore};
use crate::terminal::TerminalMux;

/// Stable fingerprint of a prompt: operation kind plus a short hash of the command.
///
/// Hashing the extracted command rather than the raw screen keeps the key stable
/// when the same prompt re-wraps at a different terminal width.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptKey(String);

impl PromptKey {
    pub fn for_evidence(evidence: &PromptEvidence) -> Self {
        let digest = format!("{:x}", md5::compute(evidence.raw_command_text.as_bytes()));
        Self(format!("{}:{}", evidence.operation_kind, &digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PromptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Pending {
        key: PromptKey,
        evidence: PromptEvidence,
        eligible_at: Instant,
        delay: Duration,
    },
}

/// Per-session automation state. In memory only; rebuilt from scratch on start.
#[derive(Debug, Clone)]
pub struct AgentSessionState {
    session_id: String,
    phase: Phase,
    handled: HashMap<PromptKey, Instant>,
    cooldown_until: Option<Instant>,
    send_attempts: HashMap<PromptKey, u32>,
}

impl AgentSessionState {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: Phase::Idle,
            handled: HashMap::new(),
            cooldown_until: None,
            send_attempts: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn pending_prompt_key(&self) -> Option<&PromptKey> {
        match &self.phase {
            Phase::Pending { key, .. } => Some(key),
            Phase::Idle => None,
        }
    }

    pub fn confirm_not_before(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Pending { eligible_at, .. } => Some(*eligible_at),
            Phase::Idle => None,
        }
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub fn has_handled(&self, key: &PromptKey) -> bool {
        self.handled.contains_key(key)
    }

    fn prune_handled(&mut self, now: Instant, retention: Duration) {
        self.handled
            .retain(|_, handled_at| now.saturating_duration_since(*handled_at) < retention);
    }

    fn mark_handled(&mut self, key: PromptKey, now: Instant) {
        self.send_attempts.remove(&key);
        self.handled.insert(key, now);
    }
}

/// What one poll of one session did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    NoPrompt,
    AlreadyAnswered,
    CoolingDown,
    AlreadyHandled(PromptKey),
    Scheduled { key: PromptKey, delay: Duration },
    Waiting { key: PromptKey },
    WaitingForTyping { key: PromptKey },
    PromptVanished,
    Skipped { key: PromptKey, reason: SkipReason },
    DryRun { key: PromptKey, kind: OperationKind },
    Confirmed { key: PromptKey, kind: OperationKind },
    /// Keys sent but the screen never changed. The cooldown is lifted so the next
    /// poll can retry, up to `max_send_attempts`.
    SendUnverified { key: PromptKey, attempts: u32 },
}

/// Watches agent sessions and answers safe confirmation prompts.
///
/// Each session moves IDLE → PENDING (randomised delay) → confirmed → cooldown →
/// IDLE. The engine never confirms the same [`PromptKey`] twice within the
/// handled-key retention window.
pub struct SessionAutomationEngine<M: TerminalMux> {
    mux: M,
    detector: PromptDetector,
    settings: AutomationSettings,
    conflicts: Option<RegistryConflicts>,
    stats: Option<StatsStore>,
    sessions: HashMap<String, AgentSessionState>,
    rng: StdRng,
}

impl<M: TerminalMux> SessionAutomationEngine<M> {
    pub fn new(mux: M, settings: AutomationSettings) -> Self {
        Self {
            mux,
            detector: PromptDetector::default(),
            settings,
            conflicts: None,
            stats: None,
            sessions: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_detector(mut self, detector: PromptDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_conflicts(mut self, conflicts: RegistryConflicts) -> Self {
        self.conflicts = Some(conflicts);
        self
    }

    pub fn with_stats(mut self, stats: StatsStore) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn mux(&self) -> &M {
        &self.mux
    }

    pub fn settings(&self) -> &AutomationSettings {
        &self.settings
    }

    pub fn session_state(&self, session: &str) -> Option<&AgentSessionState> {
        self.sessions.get(session)
    }

    /// Drops state for sessions that no longer exist.
    pub fn retain_sessions(&mut self, live: &[String]) {
        self.sessions.retain(|name, _| live.iter().any(|s| s == name));
    }

    /// One detection pass over `session`, advancing its state machine.
    pub fn poll_session(&mut self, session: &str, now: Instant) -> Result<PollOutcome> {
        let mut state = self
            .sessions
            .remove(session)
            .unwrap_or_else(|| AgentSessionState::new(session));
        state.prune_handled(now, self.settings.handled_retention());

        let outcome = self.advance(&mut state, now);
        self.sessions.insert(session.to_string(), state);
        outcome
    }

    fn advance(&mut self, state: &mut AgentSessionState, now: Instant) -> Result<PollOutcome> {
        let session = state.session_id.clone();
        let screen = self.mux.capture(&session, self.settings.capture_lines)?;
        let detection = self.detector.detect(&screen);

        let Some(evidence) = detection.active().cloned() else {
            if let Phase::Pending { key, .. } = &state.phase {
                debug!(session = %session, key = %key, "Pending prompt vanished");
                state.phase = Phase::Idle;
                return Ok(PollOutcome::PromptVanished);
            }
            return Ok(match detection {
                Detection::AlreadyAnswered(_) => PollOutcome::AlreadyAnswered,
                _ => PollOutcome::NoPrompt,
            });
        };
        let key = PromptKey::for_evidence(&evidence);

        let pending = match &state.phase {
            Phase::Pending {
                key: pending_key,
                eligible_at,
                delay,
                ..
            } if *pending_key == key => Some((*eligible_at, *delay)),
            _ => None,
        };

        let Some((eligible_at, delay)) = pending else {
            return Ok(self.schedule(state, key, evidence, now));
        };

        if now < eligible_at {
            return Ok(PollOutcome::Waiting { key });
        }

        let verdict = SafetyGates::new(&self.settings, self.conflicts.as_ref()).evaluate(
            &self.mux,
            &session,
            &screen,
            &evidence,
        )?;

        match verdict {
            GateVerdict::Pass => self.confirm(state, key, evidence, delay, now),
            GateVerdict::WaitForTyping => {
                debug!(session = %session, key = %key, "Human typing; holding prompt");
                Ok(PollOutcome::WaitingForTyping { key })
            }
            GateVerdict::Skip(reason) => {
                info!(
                    session = %session,
                    key = %key,
                    command = %evidence.raw_command_text,
                    reason = %reason,
                    "Skipping prompt"
                );
                state.phase = Phase::Idle;
                // A busy session gets another chance; unsafe and conflicting prompts
                // wait for a human and are not re-logged every poll.
                if !matches!(reason, SkipReason::SessionActive { .. }) {
                    state.mark_handled(key.clone(), now);
                }
                Ok(PollOutcome::Skipped { key, reason })
            }
        }
    }

    fn schedule(
        &mut self,
        state: &mut AgentSessionState,
        key: PromptKey,
        evidence: PromptEvidence,
        now: Instant,
    ) -> PollOutcome {
        if state.is_cooling_down(now) {
            return PollOutcome::CoolingDown;
        }
        if state.has_handled(&key) {
            return PollOutcome::AlreadyHandled(key);
        }

        let (min, max) = self
            .settings
            .confirm_delay_ms
            .for_risk(evidence.operation_kind.risk())
            .ordered();
        let delay = Duration::from_millis(self.rng.gen_range(min..=max));

        debug!(
            session = %state.session_id,
            key = %key,
            kind = %evidence.operation_kind,
            delay_ms = delay.as_millis() as u64,
            "Prompt detected; scheduling confirmation"
        );
        state.phase = Phase::Pending {
            key: key.clone(),
            evidence,
            eligible_at: now + delay,
            delay,
        };
        PollOutcome::Scheduled { key, delay }
    }

    fn confirm(
        &mut self,
        state: &mut AgentSessionState,
        key: PromptKey,
        evidence: PromptEvidence,
        delay: Duration,
        now: Instant,
    ) -> Result<PollOutcome> {
        let session = state.session_id.clone();
        state.phase = Phase::Idle;

        // A human may have answered during the delay.
        let before = self.mux.capture(&session, self.settings.capture_lines)?;
        let still_there = self
            .detector
            .detect(&before)
            .active()
            .is_some_and(|current| PromptKey::for_evidence(current) == key);
        if !still_there {
            info!(session = %session, key = %key, "Prompt changed before confirm");
            return Ok(PollOutcome::Skipped {
                key,
                reason: SkipReason::PromptChanged,
            });
        }

        let kind = evidence.operation_kind;
        if self.settings.dry_run {
            info!(
                session = %session,
                kind = %kind,
                command = %evidence.raw_command_text,
                "Dry run: would confirm"
            );
            state.mark_handled(key.clone(), now);
            state.cooldown_until = Some(now + self.settings.session_cooldown());
            self.record(&session, &evidence, delay, true);
            return Ok(PollOutcome::DryRun { key, kind });
        }

        // Set before sending so a slow send can't race a second confirmation.
        state.cooldown_until = Some(now + self.settings.session_cooldown());

        let actions = response_for(kind, self.settings.dont_ask_again);
        if let Err(err) = send_response(&self.mux, &session, &actions) {
            state.cooldown_until = None;
            let attempts = self.note_failed_send(state, &key, now);
            warn!(session = %session, key = %key, attempts, error = %err, "Failed to send response");
            return Err(err);
        }

        if self.screen_changed(&session, &before) {
            info!(
                session = %session,
                kind = %kind,
                risk = kind.risk().as_str(),
                command = %evidence.raw_command_text,
                delay_ms = delay.as_millis() as u64,
                "Confirmed prompt"
            );
            state.mark_handled(key.clone(), now);
            self.record(&session, &evidence, delay, false);
            return Ok(PollOutcome::Confirmed { key, kind });
        }

        state.cooldown_until = None;
        let attempts = self.note_failed_send(state, &key, now);
        warn!(
            session = %session,
            key = %key,
            attempts,
            "Screen unchanged after sending keys"
        );
        Ok(PollOutcome::SendUnverified { key, attempts })
    }

    /// Counts a send that errored or left the screen unchanged. At
    /// `max_send_attempts` the key is marked handled so it is not retried.
    fn note_failed_send(&self, state: &mut AgentSessionState, key: &PromptKey, now: Instant) -> u32 {
        let attempts = {
            let count = state.send_attempts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts >= self.settings.max_send_attempts {
            warn!(
                session = %state.session_id,
                key = %key,
                attempts,
                "Giving up on prompt after repeated failed sends"
            );
            state.mark_handled(key.clone(), now);
        }
        attempts
    }

    fn screen_changed(&self, session: &str, before: &str) -> bool {
        let before_digest = md5::compute(before.as_bytes());
        for _ in 0..self.settings.verify_attempts.max(1) {
            thread::sleep(self.settings.verify_interval());
            match self.mux.capture(session, self.settings.capture_lines) {
                Ok(after) if md5::compute(after.as_bytes()) != before_digest => return true,
                Ok(_) => {}
                Err(err) => {
                    debug!(session = %session, error = %err, "Capture failed during verification")
                }
            }
        }
        false
    }

    fn record(&self, session: &str, evidence: &PromptEvidence, delay: Duration, dry_run: bool) {
        let Some(stats) = &self.stats else {
            return;
        };
        let record = ConfirmationRecord::new(
            session,
            evidence.operation_kind,
            &evidence.raw_command_text,
            delay.as_millis() as u64,
            dry_run,
        );
        if let Err(err) = stats.record_confirmation(&record) {
            warn!(session = %session, error = %err, "Failed to record confirmation stats");
        }
    }
}
