//! Durable mission store backed by SQLite.
//!
//! # Layout
//!
//! One database file (`.mission/missions.db`) with five tables:
//!
//! ```text
//! missions      id, uuid (unique), project_id, phase, status, timestamps, budget, cost
//! decisions     append-only, FK → missions ON DELETE CASCADE
//! tool_calls    append-only, FK → missions ON DELETE CASCADE
//! agent_memory  (mission_id, key) upsert with optional expiry, FK cascade
//! violations    (mission_id, kind) escalation counters, FK cascade
//! ```
//!
//! The schema is created on first open and gated by `PRAGMA user_version`, so
//! re-opening an existing store never re-runs DDL.
//!
//! # Concurrency
//!
//! Writes go through a single writer connection behind a mutex, each inside
//! an immediate transaction. Reads use a second connection; with the WAL
//! journal they are not blocked by an in-flight write. `Store` is
//! `Send + Sync` and is shared across orchestrators as `Arc<Store>`. It is
//! not a multi-process database.
//!
//! Internal helpers take `&Connection` (or a `&Transaction`, which derefs to
//! one) so a public method locks exactly once no matter how many helpers it
//! composes.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use crate::error::{MissionError, Result};
use crate::records::{
    Decision, MemoryEntry, Mission, NewDecision, NewMission, NewToolCall, ToolCall,
};
use crate::types::{MissionStatus, Phase};

/// Bump when the DDL below changes.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS missions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    budget REAL NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0,
    legacy INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mission_id INTEGER NOT NULL,
    decision_type TEXT NOT NULL,
    rationale TEXT NOT NULL,
    agent TEXT NOT NULL,
    context TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_decisions_mission ON decisions(mission_id, timestamp, id);

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mission_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    arguments TEXT NOT NULL,
    result TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    success INTEGER NOT NULL,
    error TEXT,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_mission ON tool_calls(mission_id, timestamp, id);

CREATE TABLE IF NOT EXISTS agent_memory (
    mission_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    expires_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (mission_id, key),
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS violations (
    mission_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    count INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (mission_id, kind),
    FOREIGN KEY (mission_id) REFERENCES missions(id) ON DELETE CASCADE
);
"#;

const MISSION_COLUMNS: &str =
    "id, uuid, project_id, phase, status, created_at, completed_at, metadata, budget, cost";

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 (microseconds, `Z`), so text order equals time order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn json_col(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_err(idx, e))
}

fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| conversion_err(idx, e))
}

fn mission_from_row(row: &Row) -> rusqlite::Result<Mission> {
    Ok(Mission {
        id: row.get(0)?,
        uuid: parse_col::<Uuid>(row, 1)?,
        project_id: row.get(2)?,
        phase: parse_col::<Phase>(row, 3)?,
        status: parse_col::<MissionStatus>(row, 4)?,
        created_at: ts_col(row, 5)?,
        completed_at: opt_ts_col(row, 6)?,
        metadata: json_col(row, 7)?,
        budget: row.get(8)?,
        cost: row.get(9)?,
    })
}

fn decision_from_row(row: &Row) -> rusqlite::Result<Decision> {
    Ok(Decision {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        decision_type: row.get(2)?,
        rationale: row.get(3)?,
        agent: row.get(4)?,
        context: json_col(row, 5)?,
        timestamp: ts_col(row, 6)?,
    })
}

fn tool_call_from_row(row: &Row) -> rusqlite::Result<ToolCall> {
    let duration: i64 = row.get(5)?;
    Ok(ToolCall {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        name: row.get(2)?,
        arguments: json_col(row, 3)?,
        result: json_col(row, 4)?,
        duration_ms: duration.max(0) as u64,
        success: row.get(6)?,
        error: row.get(7)?,
        timestamp: ts_col(row, 8)?,
    })
}

fn memory_from_row(row: &Row) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        mission_id: row.get(0)?,
        key: row.get(1)?,
        value: json_col(row, 2)?,
        expires_at: opt_ts_col(row, 3)?,
        updated_at: ts_col(row, 4)?,
    })
}

// ---------------------------------------------------------------------------
// Shared statements (usable inside any transaction)
// ---------------------------------------------------------------------------

pub(crate) fn insert_mission(conn: &Connection, new: &NewMission, legacy: bool) -> Result<i64> {
    insert_mission_at(conn, new, Utc::now(), None, 0.0, legacy)
}

pub(crate) fn insert_mission_at(
    conn: &Connection,
    new: &NewMission,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cost: f64,
    legacy: bool,
) -> Result<i64> {
    let result = conn.execute(
        "INSERT INTO missions
             (uuid, project_id, phase, status, created_at, completed_at, metadata, budget, cost, legacy)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.uuid.to_string(),
            new.project_id,
            new.phase.as_str(),
            new.status.as_str(),
            fmt_ts(created_at),
            completed_at.map(fmt_ts),
            serde_json::to_string(&new.metadata)?,
            new.budget,
            cost,
            legacy,
        ],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(MissionError::MissionExists(new.uuid.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn mission_id_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM missions WHERE uuid = ?1",
            params![uuid.to_string()],
            |r| r.get(0),
        )
        .optional()?)
}

pub(crate) fn insert_decision_at(
    conn: &Connection,
    mission_id: i64,
    decision: &NewDecision,
    timestamp: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO decisions (mission_id, decision_type, rationale, agent, context, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            mission_id,
            decision.decision_type,
            decision.rationale,
            decision.agent,
            serde_json::to_string(&decision.context)?,
            fmt_ts(timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`, bootstrapping the schema if the
    /// file is new or predates [`SCHEMA_VERSION`].
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Connection::open(path)?;
        configure(&writer)?;
        bootstrap(&mut writer)?;

        let reader = Connection::open(path)?;
        configure(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MissionError::Persistence("store writer lock poisoned".into()))
    }

    fn lock_reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MissionError::Persistence("store reader lock poisoned".into()))
    }

    /// Run `f` inside one immediate transaction on the writer connection.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock_writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_reader()?;
        f(&conn)
    }

    // -----------------------------------------------------------------------
    // Missions
    // -----------------------------------------------------------------------

    pub fn create_mission(&self, new: &NewMission) -> Result<Mission> {
        let id = self.write(|conn| insert_mission(conn, new, false))?;
        tracing::debug!(mission = %new.uuid, id, "mission created");
        self.get_mission(id)
    }

    pub fn get_mission(&self, id: i64) -> Result<Mission> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = ?1"),
                params![id],
                mission_from_row,
            )
            .optional()?
            .ok_or_else(|| MissionError::MissionNotFound(id.to_string()))
        })
    }

    pub fn get_mission_by_uuid(&self, uuid: &Uuid) -> Result<Mission> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE uuid = ?1"),
                params![uuid.to_string()],
                mission_from_row,
            )
            .optional()?
            .ok_or_else(|| MissionError::MissionNotFound(uuid.to_string()))
        })
    }

    /// All missions, oldest first.
    pub fn list_missions(&self) -> Result<Vec<Mission>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MISSION_COLUMNS} FROM missions ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], mission_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn count_missions(&self) -> Result<usize> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM missions", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }

    /// Persist the mutable fields of `mission` (phase, status, completion,
    /// metadata, budget, cost). The uuid and creation time never change.
    pub fn update_mission(&self, mission: &Mission) -> Result<()> {
        let changed = self.write(|conn| {
            Ok(conn.execute(
                "UPDATE missions
                    SET phase = ?2, status = ?3, completed_at = ?4, metadata = ?5,
                        budget = ?6, cost = ?7
                  WHERE id = ?1",
                params![
                    mission.id,
                    mission.phase.as_str(),
                    mission.status.as_str(),
                    mission.completed_at.map(fmt_ts),
                    serde_json::to_string(&mission.metadata)?,
                    mission.budget,
                    mission.cost,
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(MissionError::MissionNotFound(mission.id.to_string()));
        }
        Ok(())
    }

    /// Delete a mission and, through the foreign-key cascade, every decision,
    /// tool call, memory entry and violation counter that belongs to it.
    /// Returns false if no such mission existed.
    pub fn delete_mission(&self, id: i64) -> Result<bool> {
        let changed =
            self.write(|conn| Ok(conn.execute("DELETE FROM missions WHERE id = ?1", params![id])?))?;
        if changed > 0 {
            tracing::info!(mission_id = id, "mission deleted (cascade)");
        }
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    pub fn record_decision(&self, mission_id: i64, decision: &NewDecision) -> Result<Decision> {
        let now = Utc::now();
        let id = self.write(|conn| insert_decision_at(conn, mission_id, decision, now))?;
        Ok(Decision {
            id,
            mission_id,
            decision_type: decision.decision_type.clone(),
            rationale: decision.rationale.clone(),
            agent: decision.agent.clone(),
            context: decision.context.clone(),
            timestamp: now,
        })
    }

    /// Decisions for a mission in timestamp order (insertion order on ties).
    pub fn decisions(&self, mission_id: i64) -> Result<Vec<Decision>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mission_id, decision_type, rationale, agent, context, timestamp
                   FROM decisions WHERE mission_id = ?1
                  ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map(params![mission_id], decision_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    pub fn record_tool_call(&self, mission_id: i64, call: &NewToolCall) -> Result<ToolCall> {
        let now = Utc::now();
        let id = self.write(|conn| {
            conn.execute(
                "INSERT INTO tool_calls
                     (mission_id, name, arguments, result, duration_ms, success, error, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    mission_id,
                    call.name,
                    serde_json::to_string(&call.arguments)?,
                    serde_json::to_string(&call.result)?,
                    call.duration_ms as i64,
                    call.success,
                    call.error,
                    fmt_ts(now),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(ToolCall {
            id,
            mission_id,
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: call.result.clone(),
            duration_ms: call.duration_ms,
            success: call.success,
            error: call.error.clone(),
            timestamp: now,
        })
    }

    pub fn tool_calls(&self, mission_id: i64) -> Result<Vec<ToolCall>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mission_id, name, arguments, result, duration_ms, success, error, timestamp
                   FROM tool_calls WHERE mission_id = ?1
                  ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map(params![mission_id], tool_call_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    // -----------------------------------------------------------------------
    // Agent memory
    // -----------------------------------------------------------------------

    /// Insert or replace the value stored under `(mission_id, key)`.
    pub fn memory_set(
        &self,
        mission_id: i64,
        key: &str,
        value: &serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO agent_memory (mission_id, key, value, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(mission_id, key) DO UPDATE SET
                     value = excluded.value,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                params![
                    mission_id,
                    key,
                    serde_json::to_string(value)?,
                    expires_at.map(fmt_ts),
                    fmt_ts(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    /// The live value under `(mission_id, key)`; expired entries read as absent.
    pub fn memory_get(&self, mission_id: i64, key: &str) -> Result<Option<serde_json::Value>> {
        let now = fmt_ts(Utc::now());
        self.read(|conn| {
            let entry = conn
                .query_row(
                    "SELECT mission_id, key, value, expires_at, updated_at
                       FROM agent_memory
                      WHERE mission_id = ?1 AND key = ?2
                        AND (expires_at IS NULL OR expires_at > ?3)",
                    params![mission_id, key, now],
                    memory_from_row,
                )
                .optional()?;
            Ok(entry.map(|e| e.value))
        })
    }

    /// Unexpired memory entries for a mission, by key.
    pub fn memory_entries(&self, mission_id: i64) -> Result<Vec<MemoryEntry>> {
        let now = fmt_ts(Utc::now());
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT mission_id, key, value, expires_at, updated_at
                   FROM agent_memory
                  WHERE mission_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                  ORDER BY key",
            )?;
            let rows = stmt.query_map(params![mission_id, now], memory_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete every memory entry whose expiry is at or before `now`.
    pub fn purge_expired_memory(&self, now: DateTime<Utc>) -> Result<usize> {
        self.write(|conn| {
            Ok(conn.execute(
                "DELETE FROM agent_memory WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![fmt_ts(now)],
            )?)
        })
    }

    // -----------------------------------------------------------------------
    // Violation counters
    // -----------------------------------------------------------------------

    pub fn violation_count(&self, mission_id: i64, kind: &str) -> Result<u32> {
        self.read(|conn| {
            let n: Option<i64> = conn
                .query_row(
                    "SELECT count FROM violations WHERE mission_id = ?1 AND kind = ?2",
                    params![mission_id, kind],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(n.unwrap_or(0).max(0) as u32)
        })
    }

    /// Store a counter value; zero removes the row.
    pub fn set_violation_count(&self, mission_id: i64, kind: &str, count: u32) -> Result<()> {
        self.write(|conn| {
            if count == 0 {
                conn.execute(
                    "DELETE FROM violations WHERE mission_id = ?1 AND kind = ?2",
                    params![mission_id, kind],
                )?;
            } else {
                conn.execute(
                    "INSERT INTO violations (mission_id, kind, count, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(mission_id, kind) DO UPDATE SET
                         count = excluded.count,
                         updated_at = excluded.updated_at",
                    params![mission_id, kind, count as i64, fmt_ts(Utc::now())],
                )?;
            }
            Ok(())
        })
    }

    /// Row counts for every table that cascades from `mission_id`:
    /// `(decisions, tool_calls, memory, violations)`.
    pub fn dependent_counts(&self, mission_id: i64) -> Result<(usize, usize, usize, usize)> {
        self.read(|conn| {
            let count = |table: &str| -> Result<usize> {
                let n: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE mission_id = ?1"),
                    params![mission_id],
                    |r| r.get(0),
                )?;
                Ok(n as usize)
            };
            Ok((
                count("decisions")?,
                count("tool_calls")?,
                count("agent_memory")?,
                count("violations")?,
            ))
        })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    // journal_mode returns a row, so it cannot go through execute().
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
    Ok(())
}

fn bootstrap(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(MissionError::Persistence(format!(
            "store schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        tracing::debug!(version, "store schema up to date");
        return Ok(());
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    tracing::info!(from = version, to = SCHEMA_VERSION, "store schema created");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as CDur;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("missions.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_fetch_mission() {
        let (_dir, store) = open_tmp();
        let new = NewMission::new("proj", 10.0).with_metadata(serde_json::json!({"goal": "x"}));
        let m = store.create_mission(&new).unwrap();
        assert!(m.id > 0);
        assert_eq!(m.uuid, new.uuid);
        assert_eq!(m.phase, Phase::Planning);
        assert_eq!(m.status, MissionStatus::Pending);
        assert_eq!(m.metadata["goal"], "x");

        let by_uuid = store.get_mission_by_uuid(&new.uuid).unwrap();
        assert_eq!(by_uuid, m);
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let (_dir, store) = open_tmp();
        let new = NewMission::new("proj", 1.0);
        store.create_mission(&new).unwrap();
        let err = store.create_mission(&new).unwrap_err();
        assert!(matches!(err, MissionError::MissionExists(_)));
    }

    #[test]
    fn update_mission_persists_fields() {
        let (_dir, store) = open_tmp();
        let mut m = store.create_mission(&NewMission::new("proj", 5.0)).unwrap();
        m.phase = Phase::Testing;
        m.status = MissionStatus::InProgress;
        m.cost = 1.25;
        store.update_mission(&m).unwrap();
        let loaded = store.get_mission(m.id).unwrap();
        assert_eq!(loaded.phase, Phase::Testing);
        assert_eq!(loaded.status, MissionStatus::InProgress);
        assert!((loaded.cost - 1.25).abs() < 1e-9);
    }

    #[test]
    fn missing_mission_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.get_mission(42),
            Err(MissionError::MissionNotFound(_))
        ));
        assert!(!store.delete_mission(42).unwrap());
    }

    #[test]
    fn decisions_are_ordered_and_scoped() {
        let (_dir, store) = open_tmp();
        let a = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        let b = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        for tag in ["ONE", "TWO", "THREE"] {
            store
                .record_decision(a.id, &NewDecision::new(tag, "test", "why"))
                .unwrap();
        }
        store
            .record_decision(b.id, &NewDecision::new("OTHER", "test", "why"))
            .unwrap();

        let tags: Vec<String> = store
            .decisions(a.id)
            .unwrap()
            .into_iter()
            .map(|d| d.decision_type)
            .collect();
        assert_eq!(tags, ["ONE", "TWO", "THREE"]);
        assert_eq!(store.decisions(b.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_mission_cascades_everything() {
        let (_dir, store) = open_tmp();
        let m = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        store
            .record_decision(m.id, &NewDecision::new("X", "test", "why"))
            .unwrap();
        store
            .record_tool_call(m.id, &NewToolCall::new("cargo build", serde_json::json!([])))
            .unwrap();
        store
            .memory_set(m.id, "plan", &serde_json::json!({"step": 1}), None)
            .unwrap();
        store.set_violation_count(m.id, "overwrite-manifest", 2).unwrap();
        assert_eq!(store.dependent_counts(m.id).unwrap(), (1, 1, 1, 1));

        assert!(store.delete_mission(m.id).unwrap());
        assert!(store.decisions(m.id).unwrap().is_empty());
        assert!(store.tool_calls(m.id).unwrap().is_empty());
        assert!(store.memory_entries(m.id).unwrap().is_empty());
        assert_eq!(store.dependent_counts(m.id).unwrap(), (0, 0, 0, 0));
    }

    #[test]
    fn memory_upsert_and_expiry() {
        let (_dir, store) = open_tmp();
        let m = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        store.memory_set(m.id, "k", &serde_json::json!(1), None).unwrap();
        store.memory_set(m.id, "k", &serde_json::json!(2), None).unwrap();
        assert_eq!(store.memory_get(m.id, "k").unwrap(), Some(serde_json::json!(2)));
        assert_eq!(store.memory_entries(m.id).unwrap().len(), 1);

        let past = Utc::now() - CDur::seconds(5);
        store
            .memory_set(m.id, "stale", &serde_json::json!("old"), Some(past))
            .unwrap();
        assert_eq!(store.memory_get(m.id, "stale").unwrap(), None);

        let future = Utc::now() + CDur::hours(1);
        store
            .memory_set(m.id, "fresh", &serde_json::json!("new"), Some(future))
            .unwrap();
        assert!(store.memory_get(m.id, "fresh").unwrap().is_some());

        assert_eq!(store.purge_expired_memory(Utc::now()).unwrap(), 1);
        assert_eq!(store.dependent_counts(m.id).unwrap().2, 2);
    }

    #[test]
    fn violation_counter_roundtrip() {
        let (_dir, store) = open_tmp();
        let m = store.create_mission(&NewMission::new("p", 1.0)).unwrap();
        assert_eq!(store.violation_count(m.id, "unverified-push").unwrap(), 0);
        store.set_violation_count(m.id, "unverified-push", 3).unwrap();
        assert_eq!(store.violation_count(m.id, "unverified-push").unwrap(), 3);
        store.set_violation_count(m.id, "unverified-push", 0).unwrap();
        assert_eq!(store.violation_count(m.id, "unverified-push").unwrap(), 0);
    }

    #[test]
    fn reopen_skips_bootstrap_and_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missions.db");
        let uuid = {
            let store = Store::open(&path).unwrap();
            store.create_mission(&NewMission::new("p", 1.0)).unwrap().uuid
        };
        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_missions().unwrap(), 1);
        assert!(store.get_mission_by_uuid(&uuid).is_ok());
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missions.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        assert!(matches!(
            Store::open(&path),
            Err(MissionError::Persistence(_))
        ));
    }

    #[test]
    fn concurrent_writers_serialize() {
        let (_dir, store) = open_tmp();
        let store = Arc::new(store);
        let mission_id = store.create_mission(&NewMission::new("p", 1.0)).unwrap().id;
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .record_decision(
                                mission_id,
                                &NewDecision::new(format!("T{t}_{i}"), "thread", "load"),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.decisions(mission_id).unwrap().len(), 100);
    }
}
