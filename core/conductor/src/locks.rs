use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use conductor_core::{CoordConfig, DirectoryLockManager, LockMetadata, Result};

fn manager(config: &CoordConfig) -> DirectoryLockManager {
    DirectoryLockManager::open(format!("cli-{}", std::process::id()), &config.locks.lock_dir)
        .with_retry_interval(config.locks.retry_interval())
}

fn describe(metadata: &LockMetadata) -> String {
    let age = metadata.age(Utc::now()).num_seconds().max(0);
    let liveness = if metadata.holder_alive() { "live" } else { "stale" };
    format!(
        "{}  agent={} pid={} host={} age={}s [{}]",
        metadata.directory.display(),
        metadata.agent,
        metadata.pid,
        metadata.hostname,
        age,
        liveness
    )
}

pub fn list(config: &CoordConfig) -> Result<()> {
    let locks = manager(config).list_locks()?;
    if locks.is_empty() {
        println!("No directory locks in {}", config.locks.lock_dir.display());
        return Ok(());
    }
    for metadata in &locks {
        println!("{}", describe(metadata));
    }
    Ok(())
}

pub fn status(config: &CoordConfig, directory: &Path) -> Result<()> {
    match manager(config).get_holder(directory)? {
        Some(holder) => println!("locked: {}", describe(&holder)),
        None => println!("unlocked: {}", directory.display()),
    }
    Ok(())
}

pub fn unlock(config: &CoordConfig, directory: &Path) -> Result<()> {
    if manager(config).force_unlock(directory)? {
        println!("Removed lock on {}", directory.display());
    } else {
        println!("No lock on {}", directory.display());
    }
    Ok(())
}

pub fn cleanup(config: &CoordConfig, max_age_secs: Option<u64>) -> Result<()> {
    let max_age = max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.locks.stale_max_age());
    let report = manager(config).cleanup_stale(max_age)?;

    for directory in &report.reclaimed {
        println!("reclaimed  {}", directory.display());
    }
    for directory in &report.skipped_alive {
        println!("kept (holder alive)  {}", directory.display());
    }
    println!(
        "{} reclaimed, {} still held",
        report.reclaimed.len(),
        report.skipped_alive.len()
    );
    Ok(())
}
