//! Read-only view of the shared task registry.
//!
//! Other coordinators record what they are working on in a JSON file:
//!
//! ```json
//! {
//!   "active_tasks": { "t1": { "name": "migrate", "status": "in_progress", "groups": ["g2"] } },
//!   "environment_usage": { "env_worker-1": { "status": "in_use", "group": "g2" } }
//! }
//! ```
//!
//! The automation engine consults it before confirming so it doesn't push an agent
//! into work another group already owns. A missing or unreadable registry means
//! "no conflict".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Name similarity at or above which two tasks count as the same work.
pub const DUPLICATE_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRegistry {
    #[serde(default)]
    pub active_tasks: BTreeMap<String, RegistryTask>,
    #[serde(default)]
    pub environment_usage: BTreeMap<String, EnvironmentClaim>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryTask {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentClaim {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    DuplicateWork {
        task: String,
        groups: Vec<String>,
        similarity: f64,
    },
    EnvironmentInUse {
        environment: String,
        group: Option<String>,
    },
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::DuplicateWork { task, groups, .. } => {
                write!(f, "duplicate of '{}' (groups: {})", task, groups.join(", "))
            }
            Conflict::EnvironmentInUse { environment, group } => write!(
                f,
                "environment {} in use by {}",
                environment,
                group.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

impl TaskRegistry {
    /// `None` when the file is missing or unparseable.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read task registry");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(registry) => Some(registry),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to parse task registry");
                None
            }
        }
    }

    /// The in-progress task whose name is most similar to `task_name`, if similar enough.
    pub fn duplicate_of(&self, task_name: &str) -> Option<Conflict> {
        self.active_tasks
            .values()
            .filter(|task| task.status == "in_progress")
            .map(|task| (task, similarity(task_name, &task.name)))
            .filter(|(_, score)| *score >= DUPLICATE_SIMILARITY)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(task, score)| Conflict::DuplicateWork {
                task: task.name.clone(),
                groups: task.groups.clone(),
                similarity: score,
            })
    }

    pub fn environment_conflict(&self, environment: &str) -> Option<Conflict> {
        let claim = self.environment_usage.get(environment)?;
        (claim.status == "in_use").then(|| Conflict::EnvironmentInUse {
            environment: environment.to_string(),
            group: claim.group.clone(),
        })
    }
}

/// Registry lookups for one session's prompt, re-reading the file on every check.
#[derive(Debug, Clone)]
pub struct RegistryConflicts {
    path: PathBuf,
}

impl RegistryConflicts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The registry names a session's environment `env_{session}`.
    pub fn environment_key(session: &str) -> String {
        format!("env_{}", session)
    }

    /// Conflict for a prompt in `session` whose command text is `command`.
    ///
    /// The task name is the command's first word, which is what coordinators
    /// register.
    pub fn check(&self, session: &str, command: &str) -> Option<Conflict> {
        let task_name = command.split_whitespace().next()?;
        let registry = TaskRegistry::load(&self.path)?;
        registry
            .duplicate_of(task_name)
            .or_else(|| registry.environment_conflict(&Self::environment_key(session)))
    }
}

/// Ratcliff/Obershelp similarity in `[0, 1]`, case-insensitive.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_run(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

/// Longest common substring, earliest in `a` on ties.
fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut current = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                current[j + 1] = previous[j] + 1;
                if current[j + 1] > best.2 {
                    best = (i + 1 - current[j + 1], j + 1 - current[j + 1], current[j + 1]);
                }
            }
        }
        previous = current;
    }
    best
}
