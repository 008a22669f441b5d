//! # conductor-core
//!
//! Coordination layer for several autonomous coding agents, each attached to its own
//! terminal session, working on one machine.
//!
//! ## Components
//!
//! - [`DirectoryLockManager`]: exclusive advisory locks per working directory,
//!   with liveness-checked stale reclamation
//! - [`TaskRouter`]: priority queue of work, dispatched onto free agents whose
//!   target directory is unlocked
//! - [`PromptDetector`]: recognises confirmation prompts in captured terminal text
//! - [`SessionAutomationEngine`]: answers safe prompts once the safety gates pass
//!
//! ```text
//! TaskRouter ── is_locked? ──▶ DirectoryLockManager
//!     │ dispatch
//!     ▼
//! agent session (tmux) ◀── capture / send keys ── SessionAutomationEngine
//!                                                      │
//!                                                      └─▶ PromptDetector
//! ```
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime. The daemon is one thread polling sessions.
//! - **Externalised coordination**: agents are separate processes; locks live on
//!   the filesystem and dispatch goes through the terminal multiplexer.
//! - **Graceful degradation**: missing state files read as empty, corrupt ones are
//!   logged and ignored.
//! - **No ambient singletons**: every component is an owned value with an explicit
//!   lifecycle.

pub mod automation;
pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod stats;
pub mod terminal;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use automation::{
    AutomationRunner, InstanceGuard, PollOutcome, PromptKey, RunnerHandle,
    SessionAutomationEngine,
};
pub use config::{load_config, AgentSpec, AutomationSettings, CoordConfig, LockSettings};
pub use error::{CoordError, Result};
pub use lock::{DirectoryLockManager, DirectoryLocks, LockGuard, LockMetadata, LockStore};
pub use prompt::{Detection, OperationKind, PromptDetector, PromptEvidence, RiskLevel};
pub use registry::RegistryConflicts;
pub use router::{Priority, RouterStore, Task, TaskRouter, TaskStatus};
pub use stats::StatsStore;
pub use terminal::{TerminalMux, TmuxMux};
