//! Priority task routing onto agent sessions.
//!
//! The router never takes directory locks itself. It only asks whether a target
//! directory is held and, if so, queues the task; acquiring the lock is the
//! dispatched agent's job. The pending queue drains whenever an agent completes.
//!
//! # Module Structure
//!
//! - [`TaskRouter`]: candidate selection, lock check, dispatch, queue draining
//! - [`RouterState`]: the serializable roster + queue + history
//! - [`RouterStore`]: versioned JSON persistence shared by CLI invocations

mod dispatch;
mod store;

pub use dispatch::{AgentStatus, RouterStatus, TaskRouter};
pub use store::{RouterState, RouterStore, ROUTER_STATE_VERSION};

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::AgentSpec;

/// Dispatch order: critical first, low last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Lower ranks dispatch first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown priority '{}' (expected critical, high, normal or low)",
                    value
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Ulid,
    pub description: String,
    pub directory: PathBuf,
    pub priority: Priority,
    #[serde(default)]
    pub requested_agent: Option<String>,
    #[serde(default)]
    pub requested_role: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
}

impl Task {
    pub fn new(
        description: &str,
        directory: &Path,
        requested_agent: Option<&str>,
        requested_role: Option<&str>,
        priority: Priority,
    ) -> Self {
        Self {
            id: Ulid::new(),
            description: description.to_string(),
            directory: directory.to_path_buf(),
            priority,
            requested_agent: requested_agent.map(str::to_string),
            requested_role: requested_role.map(str::to_string),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
            assigned_agent: None,
        }
    }

    /// Assignment to completion.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.assigned_at?)
    }

    /// Text typed into the agent's session. One line; a newline would submit early.
    pub fn prompt_text(&self) -> String {
        let description = self.description.replace(['\n', '\r'], " ");
        format!("{} (working directory: {})", description.trim(), self.directory.display())
    }
}

/// One agent in the roster. Busy while `active_task` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSlot {
    pub name: String,
    pub role: String,
    pub session: String,
    #[serde(default)]
    pub active_task: Option<Task>,
}

impl AgentSlot {
    pub fn from_spec(spec: &AgentSpec) -> Self {
        Self {
            name: spec.name.clone(),
            role: spec.role.clone(),
            session: spec.session_name().to_string(),
            active_task: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.active_task.is_none()
    }
}
