//! SQLite run statistics for the auto-confirm daemon.
//!
//! Observability only; nothing reads these back to make decisions. An append-only
//! `confirmations` table plus a `session_stats` rolling counter per session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use crate::error::{CoordError, Result};
use crate::prompt::{OperationKind, RiskLevel};

/// Stored command snippets are cut to this many characters.
pub const COMMAND_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRecord {
    pub session: String,
    pub operation: String,
    pub risk: String,
    pub command: String,
    pub delay_ms: u64,
    pub dry_run: bool,
    pub confirmed_at: DateTime<Utc>,
}

impl ConfirmationRecord {
    pub fn new(
        session: &str,
        operation: OperationKind,
        command: &str,
        delay_ms: u64,
        dry_run: bool,
    ) -> Self {
        Self {
            session: session.to_string(),
            operation: operation.as_str().to_string(),
            risk: operation.risk().as_str().to_string(),
            command: command.chars().take(COMMAND_SNIPPET_CHARS).collect(),
            delay_ms,
            dry_run,
            confirmed_at: Utc::now(),
        }
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        OperationKind::parse(&self.operation).map(|kind| kind.risk())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    pub session: String,
    pub confirmations: u64,
    pub last_operation: Option<String>,
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Appends a confirmation and bumps the session's counter in one transaction.
    pub fn record_confirmation(&self, record: &ConfirmationRecord) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| CoordError::stats("begin confirmation transaction", err))?;
            let confirmed_at = record.confirmed_at.to_rfc3339();

            tx.execute(
                "INSERT INTO confirmations \
                    (session, operation, risk, command, delay_ms, dry_run, confirmed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.session,
                    record.operation,
                    record.risk,
                    record.command,
                    record.delay_ms as i64,
                    record.dry_run,
                    confirmed_at
                ],
            )
            .map_err(|err| CoordError::stats("insert confirmation", err))?;

            tx.execute(
                "INSERT INTO session_stats (session, confirmations, last_operation, last_confirmed_at) \
                 VALUES (?1, 1, ?2, ?3) \
                 ON CONFLICT(session) DO UPDATE SET \
                    confirmations = confirmations + 1, \
                    last_operation = excluded.last_operation, \
                    last_confirmed_at = excluded.last_confirmed_at",
                params![record.session, record.operation, confirmed_at],
            )
            .map_err(|err| CoordError::stats("update session stats", err))?;

            tx.commit()
                .map_err(|err| CoordError::stats("commit confirmation", err))
        })
    }

    /// Most recent confirmations first.
    pub fn recent_confirmations(&self, limit: usize) -> Result<Vec<ConfirmationRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session, operation, risk, command, delay_ms, dry_run, confirmed_at \
                     FROM confirmations ORDER BY id DESC LIMIT ?1",
                )
                .map_err(|err| CoordError::stats("prepare confirmations query", err))?;

            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .map_err(|err| CoordError::stats("read confirmation rows", err))?;

            let mut records = Vec::new();
            for row in rows {
                let (session, operation, risk, command, delay_ms, dry_run, confirmed_at) =
                    row.map_err(|err| CoordError::stats("decode confirmation row", err))?;
                records.push(ConfirmationRecord {
                    session,
                    operation,
                    risk,
                    command,
                    delay_ms: delay_ms.max(0) as u64,
                    dry_run,
                    confirmed_at: parse_rfc3339(&confirmed_at).unwrap_or_default(),
                });
            }
            Ok(records)
        })
    }

    /// Per-session counters, busiest session first.
    pub fn session_totals(&self) -> Result<Vec<SessionTotals>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session, confirmations, last_operation, last_confirmed_at \
                     FROM session_stats ORDER BY confirmations DESC, session ASC",
                )
                .map_err(|err| CoordError::stats("prepare session stats query", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(SessionTotals {
                        session: row.get(0)?,
                        confirmations: row.get::<_, i64>(1)?.max(0) as u64,
                        last_operation: row.get(2)?,
                        last_confirmed_at: row
                            .get::<_, Option<String>>(3)?
                            .as_deref()
                            .and_then(parse_rfc3339),
                    })
                })
                .map_err(|err| CoordError::stats("read session stats rows", err))?;

            let mut totals = Vec::new();
            for row in rows {
                totals.push(row.map_err(|err| CoordError::stats("decode session stats row", err))?);
            }
            Ok(totals)
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS confirmations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    risk TEXT NOT NULL,
                    command TEXT NOT NULL,
                    delay_ms INTEGER NOT NULL,
                    dry_run INTEGER NOT NULL DEFAULT 0,
                    confirmed_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_confirmations_session
                    ON confirmations(session);
                 CREATE TABLE IF NOT EXISTS session_stats (
                    session TEXT PRIMARY KEY,
                    confirmations INTEGER NOT NULL DEFAULT 0,
                    last_operation TEXT,
                    last_confirmed_at TEXT
                 );
                 COMMIT;",
            )
            .map_err(|err| CoordError::stats("initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                CoordError::io(format!("create stats directory {}", parent.display()), err)
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| CoordError::stats("open stats database", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| CoordError::stats("enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| CoordError::stats("set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| CoordError::stats("set busy_timeout", err))?;

        Ok(conn)
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
