//! Sqlite persistence for sessions.
//!
//! The store is append-oriented: events and decisions are inserted with
//! `INSERT OR IGNORE` keyed by their natural ids, so re-persisting an
//! overlapping batch after a crash is harmless. Loading a session returns
//! the full event history in id order plus the highest persisted id, which
//! is everything a kernel needs to resume.

use std::fmt;
use std::path::Path;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use contracts::{Decision, Event, EventId, Intention, SessionConfig, Tick};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Encoding(serde_json::Error),
    MissingSession(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite failure: {err}"),
            Self::Encoding(err) => write!(f, "payload encoding failure: {err}"),
            Self::MissingSession(id) => write!(f, "no persisted session '{id}'"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Encoding(err) => Some(err),
            Self::MissingSession(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One decided intention as the store sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub intention: Intention,
    pub decision: Decision,
    pub event_id: Option<EventId>,
    pub tick: Tick,
}

/// Everything needed to resume a persisted session.
#[derive(Debug)]
pub struct SessionSnapshot {
    pub config: SessionConfig,
    pub events: Vec<Event>,
    pub last_event_id: Option<EventId>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

const MIGRATION: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    config_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    session_id   TEXT    NOT NULL,
    event_id     INTEGER NOT NULL,
    kind         TEXT    NOT NULL,
    sender       TEXT    NOT NULL,
    tick         INTEGER NOT NULL,
    payload_json TEXT    NOT NULL,
    PRIMARY KEY (session_id, event_id)
);
CREATE TABLE IF NOT EXISTS decisions (
    session_id   TEXT    NOT NULL,
    intention_id TEXT    NOT NULL,
    status       TEXT    NOT NULL,
    tick         INTEGER NOT NULL,
    payload_json TEXT    NOT NULL,
    PRIMARY KEY (session_id, intention_id)
);
CREATE INDEX IF NOT EXISTS idx_events_session_tick ON events (session_id, tick);
";

pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(MIGRATION)?;
        info!(path = %path.display(), "session store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIGRATION)?;
        Ok(Self { conn })
    }

    pub fn save_config(&self, session_id: &str, config: &SessionConfig) -> Result<(), StoreError> {
        let config_json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (session_id, config_json) VALUES (?1, ?2)",
            params![session_id, config_json],
        )?;
        Ok(())
    }

    /// Append a batch of events. Already-persisted ids are skipped, so an
    /// overlapping batch after an interrupted run persists cleanly.
    pub fn persist_events(&mut self, session_id: &str, events: &[Event]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO events
                 (session_id, event_id, kind, sender, tick, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for event in events {
                let payload_json = serde_json::to_string(event)?;
                stmt.execute(params![
                    session_id,
                    event.event_id.value(),
                    event.kind,
                    event.sender,
                    event.tick,
                    payload_json,
                ])?;
            }
        }
        tx.commit()?;
        debug!(session_id, count = events.len(), "events persisted");
        Ok(())
    }

    /// Overwrite the persisted copies of events whose mutable flag moved
    /// after the initial append.
    pub fn refresh_events(&mut self, session_id: &str, events: &[Event]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE events SET payload_json = ?3
                 WHERE session_id = ?1 AND event_id = ?2",
            )?;
            for event in events {
                let payload_json = serde_json::to_string(event)?;
                stmt.execute(params![session_id, event.event_id.value(), payload_json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn persist_decisions(
        &mut self,
        session_id: &str,
        records: &[DecisionRecord],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO decisions
                 (session_id, intention_id, status, tick, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                let status = if record.decision.is_approved() {
                    "approved"
                } else {
                    "suppressed"
                };
                let payload_json = serde_json::to_string(record)?;
                stmt.execute(params![
                    session_id,
                    record.intention.intention_id,
                    status,
                    record.tick,
                    payload_json,
                ])?;
            }
        }
        tx.commit()?;
        debug!(session_id, count = records.len(), "decisions persisted");
        Ok(())
    }

    pub fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id FROM sessions ORDER BY session_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn load_session(&self, session_id: &str) -> Result<SessionSnapshot, StoreError> {
        let config_json = self
            .conn
            .query_row(
                "SELECT config_json FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, String>(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::MissingSession(session_id.to_string())
                }
                other => StoreError::Sqlite(other),
            })?;
        let config: SessionConfig = serde_json::from_str(&config_json)?;

        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM events
             WHERE session_id = ?1 ORDER BY event_id ASC",
        )?;
        let payloads = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        let last_event_id = events.last().map(|event| event.event_id);

        Ok(SessionSnapshot {
            config,
            events,
            last_event_id,
        })
    }

    pub fn load_decisions(&self, session_id: &str) -> Result<Vec<DecisionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM decisions
             WHERE session_id = ?1 ORDER BY tick ASC, intention_id ASC",
        )?;
        let payloads = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads {
            records.push(serde_json::from_str::<DecisionRecord>(&payload)?);
        }
        Ok(records)
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{tick_stamp, Scope, SCHEMA_VERSION_V1};
    use serde_json::json;

    fn event(id: u64, tick: Tick) -> Event {
        Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: EventId(id),
            kind: "speak".to_string(),
            sender: "actor_1".to_string(),
            sender_name: "Mira".to_string(),
            sender_role: "host".to_string(),
            scope: Scope::Public,
            content: json!({ "text": format!("event {id}") }),
            references: Vec::new(),
            tags: Vec::new(),
            recipients: vec!["actor_1".to_string()],
            completed: false,
            tick,
            created_at: tick_stamp(tick),
        }
    }

    #[test]
    fn persisted_session_round_trips() {
        let mut store = SessionStore::open_in_memory().expect("open");
        store
            .save_config("session_a", &SessionConfig::default())
            .expect("save config");
        store
            .persist_events("session_a", &[event(1, 1), event(2, 3)])
            .expect("persist");

        let snapshot = store.load_session("session_a").expect("load");
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.last_event_id, Some(EventId(2)));
        assert_eq!(snapshot.events[0].content, json!({ "text": "event 1" }));
        assert_eq!(snapshot.config, SessionConfig::default());
    }

    #[test]
    fn overlapping_batches_persist_once() {
        let mut store = SessionStore::open_in_memory().expect("open");
        store
            .save_config("session_a", &SessionConfig::default())
            .expect("save config");
        store
            .persist_events("session_a", &[event(1, 1), event(2, 2)])
            .expect("persist");
        store
            .persist_events("session_a", &[event(2, 2), event(3, 4)])
            .expect("persist overlap");

        let snapshot = store.load_session("session_a").expect("load");
        assert_eq!(snapshot.events.len(), 3);
        assert_eq!(snapshot.last_event_id, Some(EventId(3)));
    }

    #[test]
    fn refresh_updates_the_completed_flag() {
        let mut store = SessionStore::open_in_memory().expect("open");
        store
            .save_config("session_a", &SessionConfig::default())
            .expect("save config");
        store
            .persist_events("session_a", &[event(1, 1)])
            .expect("persist");

        let mut fulfilled = event(1, 1);
        fulfilled.completed = true;
        store
            .refresh_events("session_a", &[fulfilled])
            .expect("refresh");

        let snapshot = store.load_session("session_a").expect("load");
        assert!(snapshot.events[0].completed);
    }

    #[test]
    fn decisions_round_trip_with_status() {
        let mut store = SessionStore::open_in_memory().expect("open");
        let record = DecisionRecord {
            intention: Intention::new(
                "int_000001_0001",
                "actor_1",
                "speak",
                json!({ "text": "hello" }),
                Scope::Public,
                1,
            ),
            decision: Decision::approved(),
            event_id: Some(EventId(1)),
            tick: 1,
        };
        store
            .persist_decisions("session_a", &[record])
            .expect("persist");

        let records = store.load_decisions("session_a").expect("load");
        assert_eq!(records.len(), 1);
        assert!(records[0].decision.is_approved());
        assert_eq!(records[0].event_id, Some(EventId(1)));
    }

    #[test]
    fn missing_session_is_its_own_error() {
        let store = SessionStore::open_in_memory().expect("open");
        assert!(matches!(
            store.load_session("nope"),
            Err(StoreError::MissingSession(_))
        ));
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.db");
        {
            let mut store = SessionStore::open(&path).expect("open");
            store
                .save_config("session_a", &SessionConfig::default())
                .expect("save config");
            store
                .persist_events("session_a", &[event(1, 1)])
                .expect("persist");
        }
        let store = SessionStore::open(&path).expect("reopen");
        let snapshot = store.load_session("session_a").expect("load");
        assert_eq!(snapshot.last_event_id, Some(EventId(1)));
    }
}
