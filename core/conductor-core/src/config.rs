//! TOML configuration for locks, the router, and the auto-confirm daemon.
//!
//! A missing file means all defaults. Every field is optional:
//!
//! ```toml
//! [locks]
//! lock_dir = "/tmp/agent_locks"
//!
//! [[router.agents]]
//! name = "worker-1"
//! role = "worker"
//!
//! [automation]
//! dry_run = true
//! excluded_sessions = ["human"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoordError, Result};
use crate::prompt::{OperationKind, RiskLevel};

pub const CONFIG_ENV: &str = "CONDUCTOR_CONFIG";
const CONDUCTOR_DIR: &str = ".conductor";
const CONFIG_FILE: &str = "config.toml";

/// `~/.conductor`, home of config, router state, stats, and logs.
pub fn conductor_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CONDUCTOR_DIR))
        .ok_or(CoordError::HomeDirNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(conductor_home()?.join(CONFIG_FILE))
}

/// Loads the config from `path`, else `$CONDUCTOR_CONFIG`, else the default location.
pub fn load_config(path: Option<PathBuf>) -> Result<CoordConfig> {
    let config_path = match path {
        Some(path) => path,
        None => match std::env::var_os(CONFIG_ENV) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => default_config_path()?,
        },
    };
    CoordConfig::load_from(&config_path)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordConfig {
    #[serde(default)]
    pub locks: LockSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub automation: AutomationSettings,
}

impl CoordConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs_err::read_to_string(path)
            .map_err(|err| CoordError::io(format!("read config {}", path.display()), err))?;
        toml::from_str(&content).map_err(|err| CoordError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Locks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_stale_max_age_secs")]
    pub stale_max_age_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            retry_interval_ms: default_retry_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
            stale_max_age_secs: default_stale_max_age_secs(),
        }
    }
}

impl LockSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn stale_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_max_age_secs)
    }
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/tmp/agent_locks")
}

fn default_retry_interval_ms() -> u64 {
    2_000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_stale_max_age_secs() -> u64 {
    600
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterSettings {
    /// Defaults to `~/.conductor/router_state.json`.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

impl RouterSettings {
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(conductor_home()?.join("router_state.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    /// Terminal session; the agent name when omitted.
    #[serde(default)]
    pub session: Option<String>,
}

impl AgentSpec {
    pub fn session_name(&self) -> &str {
        self.session.as_deref().unwrap_or(&self.name)
    }
}

fn default_role() -> String {
    "worker".to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Automation
// ─────────────────────────────────────────────────────────────────────────────

/// Inclusive range, in the unit its field name says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Range {
    pub min: u64,
    pub max: u64,
}

impl Range {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Bounds in order, even if configured backwards.
    pub fn ordered(&self) -> (u64, u64) {
        (self.min.min(self.max), self.min.max(self.max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RiskDelays {
    #[serde(default = "default_low_delay")]
    pub low: Range,
    #[serde(default = "default_medium_delay")]
    pub medium: Range,
    #[serde(default = "default_high_delay")]
    pub high: Range,
}

impl Default for RiskDelays {
    fn default() -> Self {
        Self {
            low: default_low_delay(),
            medium: default_medium_delay(),
            high: default_high_delay(),
        }
    }
}

impl RiskDelays {
    pub fn for_risk(&self, risk: RiskLevel) -> Range {
        match risk {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }
}

fn default_low_delay() -> Range {
    Range::new(3_000, 4_000)
}

fn default_medium_delay() -> Range {
    Range::new(3_000, 5_000)
}

fn default_high_delay() -> Range {
    Range::new(4_000, 6_000)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationSettings {
    /// The daemon's own session, always excluded.
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Confirm delay per risk level, milliseconds.
    #[serde(default)]
    pub confirm_delay_ms: RiskDelays,
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    #[serde(default = "default_session_cooldown_secs")]
    pub session_cooldown_secs: u64,
    #[serde(default = "default_handled_retention_secs")]
    pub handled_retention_secs: u64,
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: Range,
    #[serde(default = "default_rest_secs")]
    pub rest_secs: Range,
    #[serde(default = "default_safe_operations")]
    pub safe_operations: Vec<OperationKind>,
    #[serde(default)]
    pub excluded_sessions: Vec<String>,
    #[serde(default = "default_typing_prefix")]
    pub typing_prefix: String,
    /// Answer repeated edits and commands with "don't ask again".
    #[serde(default)]
    pub dont_ask_again: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,
    /// Defaults to `~/.conductor/task_registry.json`.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Defaults to `~/.conductor/autoconfirm.db`.
    #[serde(default)]
    pub stats_path: Option<PathBuf>,
    /// Defaults to `~/.conductor/autoconfirm.pid`.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    #[serde(default = "default_kill_switch_path")]
    pub kill_switch_path: PathBuf,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            poll_interval_ms: default_poll_interval_ms(),
            confirm_delay_ms: RiskDelays::default(),
            idle_threshold_ms: default_idle_threshold_ms(),
            session_cooldown_secs: default_session_cooldown_secs(),
            handled_retention_secs: default_handled_retention_secs(),
            active_window_secs: default_active_window_secs(),
            rest_secs: default_rest_secs(),
            safe_operations: default_safe_operations(),
            excluded_sessions: Vec::new(),
            typing_prefix: default_typing_prefix(),
            dont_ask_again: false,
            dry_run: false,
            verify_attempts: default_verify_attempts(),
            verify_interval_ms: default_verify_interval_ms(),
            max_send_attempts: default_max_send_attempts(),
            capture_lines: default_capture_lines(),
            registry_path: None,
            stats_path: None,
            pid_file: None,
            kill_switch_path: default_kill_switch_path(),
        }
    }
}

impl AutomationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn session_cooldown(&self) -> Duration {
        Duration::from_secs(self.session_cooldown_secs)
    }

    pub fn handled_retention(&self) -> Duration {
        Duration::from_secs(self.handled_retention_secs)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }

    pub fn is_excluded(&self, session: &str) -> bool {
        session == self.session_name || self.excluded_sessions.iter().any(|s| s == session)
    }

    pub fn is_safe(&self, kind: OperationKind) -> bool {
        self.safe_operations.contains(&kind)
    }

    pub fn registry_path(&self) -> Result<PathBuf> {
        self.resolve(&self.registry_path, "task_registry.json")
    }

    pub fn stats_path(&self) -> Result<PathBuf> {
        self.resolve(&self.stats_path, "autoconfirm.db")
    }

    pub fn pid_file(&self) -> Result<PathBuf> {
        self.resolve(&self.pid_file, "autoconfirm.pid")
    }

    fn resolve(&self, configured: &Option<PathBuf>, file_name: &str) -> Result<PathBuf> {
        match configured {
            Some(path) => Ok(path.clone()),
            None => Ok(conductor_home()?.join(file_name)),
        }
    }
}

fn default_session_name() -> String {
    "autoconfirm".to_string()
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_idle_threshold_ms() -> u64 {
    2_000
}

fn default_session_cooldown_secs() -> u64 {
    30
}

fn default_handled_retention_secs() -> u64 {
    120
}

fn default_active_window_secs() -> Range {
    Range::new(10 * 60, 15 * 60)
}

fn default_rest_secs() -> Range {
    Range::new(1, 3)
}

fn default_safe_operations() -> Vec<OperationKind> {
    OperationKind::ALL.to_vec()
}

fn default_typing_prefix() -> String {
    "##".to_string()
}

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_interval_ms() -> u64 {
    200
}

fn default_max_send_attempts() -> u32 {
    3
}

fn default_capture_lines() -> usize {
    50
}

fn default_kill_switch_path() -> PathBuf {
    PathBuf::from("/tmp/auto_confirm_kill_switch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = CoordConfig::load_from(&temp_dir.path().join("missing.toml")).expect("load");

        assert_eq!(config.locks.lock_dir, PathBuf::from("/tmp/agent_locks"));
        assert_eq!(config.locks.retry_interval(), Duration::from_secs(2));
        assert_eq!(config.locks.stale_max_age(), Duration::from_secs(600));
        assert!(config.router.agents.is_empty());
        assert_eq!(config.automation.poll_interval(), Duration::from_millis(300));
        assert_eq!(config.automation.confirm_delay_ms.medium, Range::new(3_000, 5_000));
        assert_eq!(config.automation.handled_retention(), Duration::from_secs(120));
        assert!(!config.automation.dont_ask_again);
        assert!(config.automation.is_excluded("autoconfirm"));
        assert!(config.automation.is_safe(OperationKind::Bash));
    }

    #[test]
    fn parses_sections_and_keeps_unset_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[locks]
lock_dir = "/var/tmp/locks"
retry_interval_ms = 250

[[router.agents]]
name = "worker-1"

[[router.agents]]
name = "reviewer"
role = "review"
session = "rev-tmux"

[automation]
dry_run = true
excluded_sessions = ["human"]
safe_operations = ["read", "accept_edits"]
confirm_delay_ms = { high = { min = 9000, max = 10000 } }
active_window_secs = { min = 60, max = 120 }
"#,
        )
        .expect("write config");

        let config = CoordConfig::load_from(&path).expect("load");
        assert_eq!(config.locks.lock_dir, PathBuf::from("/var/tmp/locks"));
        assert_eq!(config.locks.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.locks.default_timeout_secs, 60);

        assert_eq!(config.router.agents.len(), 2);
        assert_eq!(config.router.agents[0].role, "worker");
        assert_eq!(config.router.agents[0].session_name(), "worker-1");
        assert_eq!(config.router.agents[1].session_name(), "rev-tmux");

        let automation = &config.automation;
        assert!(automation.dry_run);
        assert!(automation.is_excluded("human"));
        assert!(automation.is_excluded("autoconfirm"));
        assert!(automation.is_safe(OperationKind::AcceptEdits));
        assert!(!automation.is_safe(OperationKind::Bash));
        assert_eq!(automation.confirm_delay_ms.high, Range::new(9_000, 10_000));
        assert_eq!(automation.confirm_delay_ms.low, Range::new(3_000, 4_000));
        assert_eq!(automation.active_window_secs, Range::new(60, 120));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[locks\nlock_dir = 1").expect("write config");

        let err = CoordConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, CoordError::ConfigMalformed { .. }));
    }

    #[test]
    fn range_orders_backwards_bounds() {
        assert_eq!(Range::new(5, 2).ordered(), (2, 5));
    }
}
