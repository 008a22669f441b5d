//! Unattended confirmation of agent prompts.
//!
//! ```text
//!   AutomationRunner ── duty cycle, kill switch, exclusions
//!         │ tick()
//!         ▼
//!   SessionAutomationEngine ── per-session IDLE → PENDING → confirm → cooldown
//!         │                         │
//!         ▼                         ▼
//!   PromptDetector             SafetyGates ── idle, typing, allow-list, registry
//!                                   │ Pass
//!                                   ▼
//!                              response_for() → TerminalMux
//! ```
//!
//! Session state is in memory only. A restart forgets cooldowns and handled keys,
//! which at worst re-confirms a prompt still on screen after the normal delay.

mod engine;
mod gates;
mod instance;
mod response;
mod runner;

pub use engine::{AgentSessionState, PollOutcome, PromptKey, SessionAutomationEngine};
pub use gates::{is_typing, GateVerdict, SafetyGates, SkipReason};
pub use instance::InstanceGuard;
pub use response::{response_for, send_response, KeyAction};
pub use runner::{kill_switch_engaged, AutomationRunner, DutyCycle, RunnerHandle, WindowCounters};
