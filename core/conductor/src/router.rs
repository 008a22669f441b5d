use std::path::Path;

use conductor_core::router::{RouterState, RouterStatus};
use conductor_core::{
    CoordConfig, DirectoryLockManager, Priority, Result, RouterStore, TaskRouter, TmuxMux,
};

/// Loads the shared state under its lock, runs `op` on a router built from it, and
/// saves the result.
fn with_router<T>(
    config: &CoordConfig,
    op: impl FnOnce(&mut TaskRouter<TmuxMux, &DirectoryLockManager>) -> Result<T>,
) -> Result<T> {
    let store = RouterStore::new(config.router.state_path()?);
    let locks = DirectoryLockManager::open("router", &config.locks.lock_dir);

    store.update(|state| {
        state.reconcile(&config.router.agents);
        let mut router = TaskRouter::from_state(TmuxMux::default(), &locks, std::mem::take(state));
        let result = op(&mut router);
        *state = router.into_state();
        result
    })
}

pub fn status(config: &CoordConfig) -> Result<()> {
    let store = RouterStore::new(config.router.state_path()?);
    let mut state: RouterState = store.load()?;
    state.reconcile(&config.router.agents);
    let locks = DirectoryLockManager::open("router", &config.locks.lock_dir);
    print_status(&TaskRouter::from_state(TmuxMux::default(), &locks, state).status());
    Ok(())
}

pub fn assign(
    config: &CoordConfig,
    description: &str,
    directory: &Path,
    agent: Option<&str>,
    role: Option<&str>,
    priority: Priority,
) -> Result<()> {
    let assigned =
        with_router(config, |router| router.assign(description, directory, agent, role, priority))?;
    if assigned {
        println!("Assigned: {}", description);
    } else {
        println!("Queued ({}): {}", priority, description);
    }
    Ok(())
}

pub fn complete(config: &CoordConfig, agent: &str) -> Result<()> {
    match with_router(config, |router| router.mark_complete(agent))? {
        Some(task) => {
            let secs = task.duration().map(|d| d.num_seconds()).unwrap_or_default();
            println!("Completed {} on {} in {}s", task.description, agent, secs);
        }
        None => println!("{} had no active task", agent),
    }
    Ok(())
}

pub fn drain(config: &CoordConfig) -> Result<()> {
    let assigned = with_router(config, |router| Ok(router.process_queue()))?;
    println!("Dispatched {} queued task(s)", assigned);
    Ok(())
}

fn print_status(status: &RouterStatus) {
    println!("Agents:");
    if status.agents.is_empty() {
        println!("  (none configured)");
    }
    for agent in &status.agents {
        match &agent.active_task {
            Some(task) => println!(
                "  {:<16} {:<10} busy  {} [{}]",
                agent.name,
                agent.role,
                task.description,
                task.directory.display()
            ),
            None => println!("  {:<16} {:<10} idle", agent.name, agent.role),
        }
    }

    println!("Pending ({}):", status.pending.len());
    for task in &status.pending {
        println!(
            "  {:<8} {} [{}]",
            task.priority,
            task.description,
            task.directory.display()
        );
    }

    println!("Recently completed:");
    for task in status.recent_completed.iter().take(10) {
        let agent = task.assigned_agent.as_deref().unwrap_or("-");
        let secs = task.duration().map(|d| d.num_seconds()).unwrap_or_default();
        println!("  {:<16} {}s  {}", agent, secs, task.description);
    }
}
