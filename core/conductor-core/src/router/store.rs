//! Router state on disk.
//!
//! Each CLI invocation is a short-lived process, so the roster, queue and history
//! live in one JSON file. Concurrent invocations serialise on an flock held on a
//! `.lock` sidecar for the whole load → mutate → save cycle.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::{AgentSlot, Task};
use crate::config::AgentSpec;
use crate::error::{CoordError, Result};

pub const ROUTER_STATE_VERSION: u32 = 1;

/// Completed tasks kept for `status`.
pub(crate) const COMPLETED_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    /// Files written before versioning have no field and read as version 1.
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub agents: Vec<AgentSlot>,
    /// Arrival order. Dispatch order is computed when the queue drains.
    #[serde(default)]
    pub pending: Vec<Task>,
    /// Oldest first, capped at the last 100.
    #[serde(default)]
    pub completed: VecDeque<Task>,
}

fn current_version() -> u32 {
    ROUTER_STATE_VERSION
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            version: ROUTER_STATE_VERSION,
            agents: Vec::new(),
            pending: Vec::new(),
            completed: VecDeque::new(),
        }
    }
}

impl RouterState {
    pub fn with_agents(specs: &[AgentSpec]) -> Self {
        let mut state = Self::default();
        state.reconcile(specs);
        state
    }

    /// Aligns the roster with the configured agents. New agents are added; removed
    /// ones are dropped unless they still have an active task.
    pub fn reconcile(&mut self, specs: &[AgentSpec]) {
        self.agents.retain(|slot| {
            let configured = specs.iter().any(|spec| spec.name == slot.name);
            if !configured && !slot.is_available() {
                warn!(agent = %slot.name, "Agent removed from config but still busy; keeping");
            }
            configured || !slot.is_available()
        });

        for spec in specs {
            match self.agents.iter_mut().find(|slot| slot.name == spec.name) {
                Some(slot) => {
                    slot.role = spec.role.clone();
                    slot.session = spec.session_name().to_string();
                }
                None => self.agents.push(AgentSlot::from_spec(spec)),
            }
        }
    }

    pub(crate) fn push_completed(&mut self, task: Task) {
        self.completed.push_back(task);
        while self.completed.len() > COMPLETED_HISTORY {
            self.completed.pop_front();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterStore {
    path: PathBuf,
}

impl RouterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, corrupt, or future-version files load as empty state.
    pub fn load(&self) -> Result<RouterState> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RouterState::default())
            }
            Err(err) => return Err(CoordError::io("read router state", err)),
        };

        #[derive(Deserialize)]
        struct VersionCheck {
            #[serde(default)]
            version: u32,
        }

        if let Ok(check) = serde_json::from_str::<VersionCheck>(&content) {
            if check.version > ROUTER_STATE_VERSION {
                warn!(
                    path = %self.path.display(),
                    version = check.version,
                    "Router state written by a newer version; starting empty"
                );
                return Ok(RouterState::default());
            }
        }

        match serde_json::from_str::<RouterState>(&content) {
            Ok(state) => Ok(state),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Corrupt router state; starting empty");
                Ok(RouterState::default())
            }
        }
    }

    /// Atomic write via temp file + rename.
    pub fn save(&self, state: &RouterState) -> Result<()> {
        let dir = self.parent_dir()?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|err| CoordError::json("serialize router state", err))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|err| CoordError::io("create router state temp file", err))?;
        tmp.write_all(content.as_bytes())
            .map_err(|err| CoordError::io("write router state temp file", err))?;
        tmp.flush()
            .map_err(|err| CoordError::io("flush router state temp file", err))?;
        tmp.persist(&self.path)
            .map_err(|err| CoordError::io("persist router state", err.error))?;
        Ok(())
    }

    /// Runs `op` on the loaded state under the store lock and saves the result.
    /// Nothing is saved if `op` fails.
    pub fn update<T>(&self, op: impl FnOnce(&mut RouterState) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut state = self.load()?;
        let value = op(&mut state)?;
        self.save(&state)?;
        Ok(value)
    }

    fn lock(&self) -> Result<StoreLock> {
        let dir = self.parent_dir()?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "router_state.json".to_string());
        let lock_path = dir.join(format!("{}.lock", name));

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| CoordError::io(format!("open {}", lock_path.display()), err))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            info!(path = %lock_path.display(), "Router state busy; waiting");
            FileExt::lock_exclusive(&file)
                .map_err(|err| CoordError::io("lock router state", err))?;
        }
        Ok(StoreLock { file })
    }

    fn parent_dir(&self) -> Result<PathBuf> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        fs_err::create_dir_all(&dir)
            .map_err(|err| CoordError::io("create router state directory", err))?;
        Ok(dir)
    }
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Priority;

    fn spec(name: &str, role: &str) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            role: role.to_string(),
            session: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = RouterStore::new(temp.path().join("state.json"));
        assert_eq!(store.load().unwrap(), RouterState::default());
    }

    #[test]
    fn corrupt_and_future_files_load_empty() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        let store = RouterStore::new(&path);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(store.load().unwrap().agents.is_empty());

        std::fs::write(&path, r#"{"version": 99, "agents": [{"name": "x"}]}"#).unwrap();
        assert!(store.load().unwrap().agents.is_empty());
    }

    #[test]
    fn unversioned_file_keeps_its_queue() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        let mut state = RouterState::with_agents(&[spec("worker-1", "worker")]);
        state.pending.push(Task::new(
            "write docs",
            Path::new("/work/docs"),
            None,
            None,
            Priority::Low,
        ));
        let mut json = serde_json::to_value(&state).unwrap();
        json.as_object_mut().unwrap().remove("version");
        std::fs::write(&path, json.to_string()).unwrap();

        let loaded = RouterStore::new(&path).load().unwrap();
        assert_eq!(loaded.version, ROUTER_STATE_VERSION);
        assert_eq!(loaded.agents.len(), 1);
        assert_eq!(loaded.pending.len(), 1);
        assert_eq!(loaded.pending[0].description, "write docs");
    }

    #[test]
    fn update_persists_and_failure_does_not() {
        let temp = tempfile::tempdir().unwrap();
        let store = RouterStore::new(temp.path().join("nested").join("state.json"));

        store
            .update(|state| {
                state.reconcile(&[spec("worker-1", "worker")]);
                state.pending.push(Task::new(
                    "write docs",
                    Path::new("/work/docs"),
                    None,
                    None,
                    Priority::Low,
                ));
                Ok(())
            })
            .unwrap();

        let err = store.update(|state| {
            state.pending.clear();
            Err::<(), _>(CoordError::UnknownAgent("nobody".into()))
        });
        assert!(err.is_err());

        let state = store.load().unwrap();
        assert_eq!(state.agents.len(), 1);
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].description, "write docs");
    }

    #[test]
    fn reconcile_keeps_busy_agents_removed_from_config() {
        let mut state = RouterState::with_agents(&[spec("a", "worker"), spec("b", "worker")]);
        state.agents[1].active_task = Some(Task::new(
            "busy",
            Path::new("/w"),
            None,
            None,
            Priority::Normal,
        ));

        state.reconcile(&[spec("a", "reviewer"), spec("c", "worker")]);
        let names: Vec<&str> = state.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(state.agents[0].role, "reviewer");

        state.agents[1].active_task = None;
        state.reconcile(&[spec("a", "reviewer"), spec("c", "worker")]);
        assert_eq!(state.agents.len(), 2);
    }

    #[test]
    fn completed_history_is_capped() {
        let mut state = RouterState::default();
        for i in 0..(COMPLETED_HISTORY + 5) {
            state.push_completed(Task::new(
                &format!("task {}", i),
                Path::new("/w"),
                None,
                None,
                Priority::Normal,
            ));
        }
        assert_eq!(state.completed.len(), COMPLETED_HISTORY);
        assert_eq!(state.completed[0].description, "task 5");
    }
}
