use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use conductor_core::automation::{AutomationRunner, InstanceGuard, SessionAutomationEngine};
use conductor_core::{CoordConfig, RegistryConflicts, Result, StatsStore, TmuxMux};
use tracing::{info, warn};

pub fn run(config: &CoordConfig, dry_run: bool, shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut settings = config.automation.clone();
    settings.dry_run |= dry_run;

    let _instance = InstanceGuard::acquire(&settings.pid_file()?)?;

    let mut engine = SessionAutomationEngine::new(TmuxMux::default(), settings.clone())
        .with_conflicts(RegistryConflicts::new(settings.registry_path()?));
    match StatsStore::new(settings.stats_path()?) {
        Ok(stats) => engine = engine.with_stats(stats),
        Err(err) => warn!(error = %err, "Statistics disabled"),
    }

    let counters = AutomationRunner::new(engine).with_shutdown(shutdown).run();
    info!(confirmed = counters.confirmed, "Auto-confirm stopped");
    Ok(())
}

pub fn stats(config: &CoordConfig, limit: usize) -> Result<()> {
    let store = StatsStore::new(config.automation.stats_path()?)?;

    let totals = store.session_totals()?;
    if totals.is_empty() {
        println!("No confirmations recorded");
        return Ok(());
    }
    println!("Sessions:");
    for total in &totals {
        println!(
            "  {:<20} {:>6}  last={}",
            total.session,
            total.confirmations,
            total.last_operation.as_deref().unwrap_or("-")
        );
    }

    println!("Recent:");
    for record in store.recent_confirmations(limit)? {
        println!(
            "  {}  {:<16} {:<12} {:<6} {:>5}ms{}  {}",
            record.confirmed_at.format("%Y-%m-%d %H:%M:%S"),
            record.session,
            record.operation,
            record.risk,
            record.delay_ms,
            if record.dry_run { " (dry run)" } else { "" },
            record.command
        );
    }
    Ok(())
}
