use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use surf_core::{DetectorConfig, DetectorEvent, RegistrySnapshot, Surface, Timestamp};

use crate::error::{Result, StoreError};
use crate::schema;

/// Journal file name inside the data directory.
pub const JOURNAL_FILE: &str = "journal.db";

/// `$SURF_DATA_DIR`, falling back to `~/.surf`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = env::var_os("SURF_DATA_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs_home().join(".surf")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|e| StoreError::InvalidData(format!("invalid session id '{s}': {e}")))
    }
}

/// One row of `list_sessions`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// The detector config the session ran with, as TOML.
    pub config: String,
    pub event_count: u64,
}

impl SessionInfo {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub seq: u64,
    pub at: Timestamp,
    pub event: DetectorEvent,
}

/// Append-only record of detector sessions: the outbound event stream and
/// the registry as it stood when each session ended.
pub struct Journal {
    conn: Connection,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::debug!(path = %path.display(), "journal opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Open `journal.db` under [`default_data_dir`].
    pub fn open_default() -> Result<Self> {
        Self::open(&default_data_dir().join(JOURNAL_FILE))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Sessions ---

    pub fn begin_session(&self, config: &DetectorConfig, now: Timestamp) -> Result<SessionId> {
        let config = config
            .to_toml()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let id = SessionId::new();
        self.conn.execute(
            "INSERT INTO sessions (id, started_at, config) VALUES (?1, ?2, ?3)",
            params![id.to_string(), now as i64, config],
        )?;
        tracing::info!(session = %id, "session started");
        Ok(id)
    }

    /// Close a session and store the registry it ended with. The
    /// per-surface rows are replaced wholesale.
    pub fn end_session(&self, session: SessionId, snapshot: &RegistrySnapshot) -> Result<()> {
        self.require_open(session)?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE sessions SET ended_at = ?1, snapshot = ?2 WHERE id = ?3",
            params![
                snapshot.taken_at as i64,
                serde_json::to_string(snapshot)?,
                session.to_string(),
            ],
        )?;
        tx.execute(
            "DELETE FROM surfaces WHERE session_id = ?1",
            [session.to_string()],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO surfaces (session_id, surface_id, snapshot) VALUES (?1, ?2, ?3)",
            )?;
            for surface in &snapshot.surfaces {
                insert.execute(params![
                    session.to_string(),
                    surface.id.to_string(),
                    serde_json::to_string(surface)?,
                ])?;
            }
        }

        tx.commit()?;
        tracing::info!(
            session = %session,
            surfaces = snapshot.surfaces.len(),
            placements = snapshot.placements.len(),
            "session ended"
        );
        Ok(())
    }

    pub fn session(&self, session: SessionId) -> Result<Option<SessionInfo>> {
        let info = self
            .conn
            .query_row(
                "SELECT s.id, s.started_at, s.ended_at, s.config,
                        (SELECT count(*) FROM events e WHERE e.session_id = s.id)
                 FROM sessions s WHERE s.id = ?1",
                [session.to_string()],
                session_row,
            )
            .optional()?;
        info.map(|(id, started_at, ended_at, config, count)| {
            to_session_info(&id, started_at, ended_at, config, count)
        })
        .transpose()
    }

    /// All sessions, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.started_at, s.ended_at, s.config,
                    (SELECT count(*) FROM events e WHERE e.session_id = s.id)
             FROM sessions s ORDER BY s.started_at, s.rowid",
        )?;
        let rows: Vec<(String, i64, Option<i64>, String, i64)> = stmt
            .query_map([], session_row)?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(id, started_at, ended_at, config, count)| {
                to_session_info(&id, started_at, ended_at, config, count)
            })
            .collect()
    }

    /// The most recently started session, if any.
    pub fn latest_session(&self) -> Result<Option<SessionId>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM sessions ORDER BY started_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|s| s.parse()).transpose()
    }

    fn require_open(&self, session: SessionId) -> Result<()> {
        let ended: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT ended_at FROM sessions WHERE id = ?1",
                [session.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match ended {
            None => Err(StoreError::InvalidData(format!("unknown session {session}"))),
            Some(Some(_)) => Err(StoreError::InvalidData(format!(
                "session {session} already ended"
            ))),
            Some(None) => Ok(()),
        }
    }

    // --- Events ---

    /// Append a batch of outbound events, all stamped `at`. Returns the
    /// number written.
    pub fn record_events(
        &self,
        session: SessionId,
        at: Timestamp,
        events: &[DetectorEvent],
    ) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        self.require_open(session)?;
        let tx = self.conn.unchecked_transaction()?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM events WHERE session_id = ?1",
            [session.to_string()],
            |row| row.get(0),
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO events (session_id, seq, at_ms, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (i, event) in events.iter().enumerate() {
                insert.execute(params![
                    session.to_string(),
                    next + i as i64,
                    at as i64,
                    event.kind(),
                    serde_json::to_string(event)?,
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(session = %session, count = events.len(), "events recorded");
        Ok(events.len())
    }

    /// Events of a session in the order they were recorded, optionally only
    /// those of one kind (`"placementCreated"`, ...).
    pub fn session_events(
        &self,
        session: SessionId,
        kind: Option<&str>,
    ) -> Result<Vec<RecordedEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, at_ms, payload FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY seq",
        )?;
        let rows: Vec<(i64, i64, String)> = stmt
            .query_map(params![session.to_string(), kind], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(seq, at, payload)| {
                Ok(RecordedEvent {
                    seq: seq as u64,
                    at: at as Timestamp,
                    event: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    // --- Snapshots ---

    /// Surfaces the session ended with, in creation order. Empty while the
    /// session is still open.
    pub fn session_surfaces(&self, session: SessionId) -> Result<Vec<Surface>> {
        let mut stmt = self
            .conn
            .prepare("SELECT snapshot FROM surfaces WHERE session_id = ?1")?;
        let rows: Vec<String> = stmt
            .query_map([session.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut surfaces = rows
            .iter()
            .map(|json| serde_json::from_str::<Surface>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        surfaces.sort_by_key(|s| s.seq);
        Ok(surfaces)
    }

    /// The full registry snapshot stored by [`Journal::end_session`].
    pub fn session_snapshot(&self, session: SessionId) -> Result<Option<RegistrySnapshot>> {
        let json: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT snapshot FROM sessions WHERE id = ?1",
                [session.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            None => Err(StoreError::InvalidData(format!("unknown session {session}"))),
            Some(None) => Ok(None),
            Some(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, Option<i64>, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn to_session_info(
    id: &str,
    started_at: i64,
    ended_at: Option<i64>,
    config: String,
    event_count: i64,
) -> Result<SessionInfo> {
    Ok(SessionInfo {
        id: id.parse()?,
        started_at: started_at as Timestamp,
        ended_at: ended_at.map(|t| t as Timestamp),
        config,
        event_count: event_count as u64,
    })
}
