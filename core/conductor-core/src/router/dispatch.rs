use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::store::RouterState;
use super::{Priority, Task, TaskStatus};
use crate::config::AgentSpec;
use crate::error::{CoordError, Result};
use crate::lock::DirectoryLocks;
use crate::paths::canonicalize_directory;
use crate::terminal::TerminalMux;

enum Dispatch {
    Assigned,
    Deferred(Task),
}

/// Assigns tasks to agents in priority order, deferring on busy agents and locked
/// directories.
pub struct TaskRouter<M: TerminalMux, L: DirectoryLocks> {
    mux: M,
    locks: L,
    state: RouterState,
}

impl<M: TerminalMux, L: DirectoryLocks> TaskRouter<M, L> {
    pub fn new(mux: M, locks: L, agents: &[AgentSpec]) -> Self {
        Self::from_state(mux, locks, RouterState::with_agents(agents))
    }

    pub fn from_state(mux: M, locks: L, state: RouterState) -> Self {
        Self { mux, locks, state }
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    pub fn into_state(self) -> RouterState {
        self.state
    }

    /// Dispatches a new task now if an agent and the directory are free; queues it
    /// otherwise. Returns whether it was dispatched.
    ///
    /// A lock query error still queues the task before the error is returned.
    pub fn assign(
        &mut self,
        description: &str,
        directory: &Path,
        agent: Option<&str>,
        role: Option<&str>,
        priority: Priority,
    ) -> Result<bool> {
        let directory = canonicalize_directory(directory);
        let task = Task::new(description, &directory, agent, role, priority);
        debug!(task = %task.id, priority = %priority, "Assigning task");

        match self.try_dispatch(task) {
            Ok(Dispatch::Assigned) => Ok(true),
            Ok(Dispatch::Deferred(task)) => {
                info!(
                    task = %task.id,
                    priority = %task.priority,
                    queued = self.state.pending.len() + 1,
                    "Task queued"
                );
                self.state.pending.push(task);
                Ok(false)
            }
            Err((task, err)) => {
                self.state.pending.push(task);
                Err(err)
            }
        }
    }

    /// Completes the agent's active task, frees the agent, and drains the queue.
    /// Returns the completed task, or `None` if the agent was idle.
    pub fn mark_complete(&mut self, agent: &str) -> Result<Option<Task>> {
        let slot = self
            .state
            .agents
            .iter_mut()
            .find(|slot| slot.name == agent)
            .ok_or_else(|| CoordError::UnknownAgent(agent.to_string()))?;

        let Some(mut task) = slot.active_task.take() else {
            warn!(agent = %agent, "Agent has no active task");
            return Ok(None);
        };

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        info!(
            agent = %agent,
            task = %task.id,
            duration_secs = task.duration().map(|d| d.num_seconds()).unwrap_or_default(),
            "Task completed"
        );
        self.state.push_completed(task.clone());

        self.process_queue();
        Ok(Some(task))
    }

    /// Tries every pending task once, highest priority first, arrival order within
    /// a priority. Returns how many were dispatched.
    pub fn process_queue(&mut self) -> usize {
        let mut queue = std::mem::take(&mut self.state.pending);
        queue.sort_by_key(|task| task.priority.rank());

        let mut assigned = 0;
        for task in queue {
            match self.try_dispatch(task) {
                Ok(Dispatch::Assigned) => assigned += 1,
                Ok(Dispatch::Deferred(task)) => self.state.pending.push(task),
                Err((task, err)) => {
                    warn!(task = %task.id, error = %err, "Lock query failed; task stays queued");
                    self.state.pending.push(task);
                }
            }
        }

        if assigned > 0 {
            info!(assigned, remaining = self.state.pending.len(), "Queue drained");
        }
        assigned
    }

    pub fn status(&self) -> RouterStatus {
        let mut pending = self.state.pending.clone();
        pending.sort_by_key(|task| task.priority.rank());

        RouterStatus {
            agents: self
                .state
                .agents
                .iter()
                .map(|slot| AgentStatus {
                    name: slot.name.clone(),
                    role: slot.role.clone(),
                    session: slot.session.clone(),
                    active_task: slot.active_task.clone(),
                })
                .collect(),
            pending,
            recent_completed: self.state.completed.iter().rev().cloned().collect(),
        }
    }

    fn try_dispatch(&mut self, mut task: Task) -> std::result::Result<Dispatch, (Task, CoordError)> {
        let candidates = self.candidates(&task);
        if candidates.is_empty() {
            return Ok(Dispatch::Deferred(task));
        }

        match self.locks.holder(&task.directory) {
            Ok(Some(holder)) => {
                info!(
                    task = %task.id,
                    directory = %task.directory.display(),
                    holder = %holder.agent,
                    pid = holder.pid,
                    "Directory locked; deferring task"
                );
                return Ok(Dispatch::Deferred(task));
            }
            Ok(None) => {}
            Err(err) => return Err((task, err)),
        }

        let Some(index) = candidates.into_iter().find(|&index| {
            let session = &self.state.agents[index].session;
            match self.send_task(session, &task) {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        task = %task.id,
                        session = %session,
                        error = %err,
                        "Failed to dispatch task to agent"
                    );
                    false
                }
            }
        }) else {
            warn!(task = %task.id, "No agent accepted the task; leaving it queued");
            return Ok(Dispatch::Deferred(task));
        };

        let slot = &mut self.state.agents[index];
        task.status = TaskStatus::Assigned;
        task.assigned_at = Some(Utc::now());
        task.assigned_agent = Some(slot.name.clone());
        info!(
            task = %task.id,
            agent = %slot.name,
            directory = %task.directory.display(),
            "Task dispatched"
        );
        slot.active_task = Some(task);
        Ok(Dispatch::Assigned)
    }

    /// Agents to try, in roster order. A named agent must exist and be free;
    /// otherwise every free agent with the requested role.
    fn candidates(&self, task: &Task) -> Vec<usize> {
        let agents = &self.state.agents;
        if let Some(name) = &task.requested_agent {
            let index = agents.iter().position(|slot| &slot.name == name);
            match index {
                None => debug!(agent = %name, "Requested agent not in roster"),
                Some(i) if !agents[i].is_available() => {
                    debug!(agent = %name, "Requested agent busy")
                }
                Some(_) => {}
            }
            return index.filter(|&i| agents[i].is_available()).into_iter().collect();
        }

        agents
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.is_available()
                    && task
                        .requested_role
                        .as_deref()
                        .map_or(true, |role| slot.role == role)
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn send_task(&self, session: &str, task: &Task) -> Result<()> {
        self.mux.clear_input(session)?;
        self.mux.send_literal(session, &task.prompt_text())?;
        self.mux.send_submit(session)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub role: String,
    pub session: String,
    pub active_task: Option<Task>,
}

/// Snapshot for display. `pending` is in dispatch order, `recent_completed`
/// newest first.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub agents: Vec<AgentStatus>,
    pub pending: Vec<Task>,
    pub recent_completed: Vec<Task>,
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::lock::LockMetadata;
    use crate::testing::{ScriptedMux, SentKeys};

    /// Lock table keyed by canonical directory.
    #[derive(Default)]
    struct FakeLocks {
        held: RefCell<HashMap<PathBuf, String>>,
    }

    impl FakeLocks {
        fn lock(&self, directory: &str, agent: &str) {
            self.held
                .borrow_mut()
                .insert(canonicalize_directory(Path::new(directory)), agent.to_string());
        }

        fn unlock(&self, directory: &str) {
            self.held
                .borrow_mut()
                .remove(&canonicalize_directory(Path::new(directory)));
        }
    }

    impl DirectoryLocks for FakeLocks {
        fn holder(&self, directory: &Path) -> Result<Option<LockMetadata>> {
            Ok(self.held.borrow().get(directory).map(|agent| LockMetadata {
                agent: agent.clone(),
                directory: directory.to_path_buf(),
                acquired_at: Utc::now(),
                pid: std::process::id(),
                hostname: crate::process::local_hostname(),
                proc_started: None,
            }))
        }
    }

    fn agents() -> Vec<AgentSpec> {
        vec![
            AgentSpec {
                name: "worker-1".into(),
                role: "worker".into(),
                session: None,
            },
            AgentSpec {
                name: "reviewer".into(),
                role: "review".into(),
                session: Some("rev".into()),
            },
        ]
    }

    fn mux() -> ScriptedMux {
        let mux = ScriptedMux::new();
        mux.set_screen("worker-1", ">");
        mux.set_screen("rev", ">");
        mux
    }

    #[test]
    fn dispatch_clears_types_and_submits() {
        let mux = mux();
        let locks = FakeLocks::default();
        let mut router = TaskRouter::new(mux.clone(), &locks, &agents());

        assert!(router
            .assign("review PR 12", Path::new("/work/app"), None, Some("review"), Priority::High)
            .unwrap());

        let sent = mux.sent_to("rev");
        assert_eq!(sent.len(), 3);
        assert!(matches!(sent[0], SentKeys::Clear { .. }));
        assert_eq!(mux.typed("rev"), "review PR 12 (working directory: /work/app)");
        assert!(matches!(sent[2], SentKeys::Submit { .. }));

        let reviewer = &router.state().agents[1];
        let task = reviewer.active_task.as_ref().unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_agent.as_deref(), Some("reviewer"));
        assert!(task.assigned_at.is_some());
    }

    #[test]
    fn locked_directory_queues_without_touching_agents() {
        let mux = mux();
        let locks = FakeLocks::default();
        locks.lock("/work/projectX", "alice");
        let mut router = TaskRouter::new(mux.clone(), &locks, &agents());

        let assigned = router
            .assign("do X", Path::new("/work/projectX"), None, Some("worker"), Priority::Normal)
            .unwrap();
        assert!(!assigned);
        assert_eq!(router.state().pending.len(), 1);
        assert!(router.state().agents.iter().all(|a| a.is_available()));
        assert!(mux.sent().is_empty());

        locks.unlock("/work/projectX");
        assert_eq!(router.process_queue(), 1);
        assert!(router.state().pending.is_empty());
        assert!(!router.state().agents[0].is_available());
    }

    #[test]
    fn unknown_or_busy_named_agent_queues() {
        let mux = mux();
        let locks = FakeLocks::default();
        let mut router = TaskRouter::new(mux, &locks, &agents());

        assert!(!router
            .assign("x", Path::new("/a"), Some("ghost"), None, Priority::Normal)
            .unwrap());
        assert!(router
            .assign("y", Path::new("/b"), Some("worker-1"), None, Priority::Normal)
            .unwrap());
        assert!(!router
            .assign("z", Path::new("/c"), Some("worker-1"), None, Priority::Normal)
            .unwrap());
        assert_eq!(router.state().pending.len(), 2);
    }

    #[test]
    fn failed_send_leaves_task_pending_and_agent_free() {
        let mux = mux();
        mux.fail_sends_to("worker-1");
        let locks = FakeLocks::default();
        let mut router = TaskRouter::new(mux, &locks, &agents());

        assert!(!router
            .assign("x", Path::new("/a"), None, Some("worker"), Priority::Normal)
            .unwrap());
        assert_eq!(router.state().pending.len(), 1);
        assert!(router.state().agents[0].is_available());
    }

    #[test]
    fn failed_send_falls_through_to_next_agent_with_role() {
        let mux = mux();
        mux.set_screen("worker-2", ">");
        mux.fail_sends_to("worker-1");
        let locks = FakeLocks::default();
        let mut specs = agents();
        specs.push(AgentSpec {
            name: "worker-2".into(),
            role: "worker".into(),
            session: None,
        });
        let mut router = TaskRouter::new(mux.clone(), &locks, &specs);

        assert!(router
            .assign("x", Path::new("/a"), None, Some("worker"), Priority::Normal)
            .unwrap());
        assert!(router.state().pending.is_empty());
        assert!(router.state().agents[0].is_available());
        let second = router.state().agents[2].active_task.as_ref().unwrap();
        assert_eq!(second.assigned_agent.as_deref(), Some("worker-2"));
        assert_eq!(mux.typed("worker-2"), "x (working directory: /a)");
    }

    #[test]
    fn queue_drains_by_priority_then_arrival() {
        let mux = mux();
        let locks = FakeLocks::default();
        let mut router = TaskRouter::new(mux.clone(), &locks, &agents());
        router
            .assign("occupy", Path::new("/busy"), None, Some("worker"), Priority::Normal)
            .unwrap();

        for (name, priority) in [
            ("low-1", Priority::Low),
            ("normal-1", Priority::Normal),
            ("critical-1", Priority::Critical),
            ("normal-2", Priority::Normal),
            ("high-1", Priority::High),
            ("critical-2", Priority::Critical),
        ] {
            router
                .assign(name, Path::new("/w"), None, Some("worker"), priority)
                .unwrap();
        }

        let order: Vec<String> = router
            .status()
            .pending
            .iter()
            .map(|t| t.description.clone())
            .collect();
        assert_eq!(
            order,
            vec!["critical-1", "critical-2", "high-1", "normal-1", "normal-2", "low-1"]
        );

        let mut dispatched = Vec::new();
        for _ in 0..6 {
            let done = router.mark_complete("worker-1").unwrap().unwrap();
            assert_eq!(done.status, TaskStatus::Completed);
            assert!(done.duration().is_some());
            let active = router.state().agents[0].active_task.as_ref().unwrap();
            dispatched.push(active.description.clone());
        }
        assert_eq!(dispatched, order);
        assert_eq!(router.status().recent_completed[0].description, "normal-2");
    }

    #[test]
    fn mark_complete_on_unknown_agent_errors() {
        let locks = FakeLocks::default();
        let mut router = TaskRouter::new(mux(), &locks, &agents());
        assert!(matches!(
            router.mark_complete("ghost"),
            Err(CoordError::UnknownAgent(_))
        ));
        assert!(router.mark_complete("worker-1").unwrap().is_none());
    }
}
