//! Durable registry of sessions
//!
//! Structured state lives in SQLite, document bytes live in files under the
//! data directory (`<id>.pdf`, `<id>_original.pdf`). Every record is loaded
//! into memory when the store opens; lookups never touch the disk.

use crate::error::{Error, Result};
use crate::pdf::EditValue;
use crate::session::migrations::run_migrations;
use crate::session::model::{validate_session_id, Session, SessionInfo};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shared handle to one session. Tool calls hold the lock for their whole
/// duration, so calls against the same session run one at a time.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

/// Snapshot written by `save`
struct SessionRecord {
    session_id: String,
    pdf_path: Option<String>,
    output_path: Option<String>,
    applied_edits: Option<String>,
    current_pdf: Option<Vec<u8>>,
    original_pdf: Option<Vec<u8>>,
    created_at: i64,
    updated_at: i64,
}

/// Row as read back at startup
struct StoredRow {
    session_id: String,
    pdf_path: Option<String>,
    output_path: Option<String>,
    applied_edits: Option<String>,
    pdf_file_path: Option<String>,
    original_pdf_file_path: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn current_file(data_dir: &Path, session_id: &str) -> PathBuf {
    data_dir.join(format!("{}.pdf", session_id))
}

fn original_file(data_dir: &Path, session_id: &str) -> PathBuf {
    data_dir.join(format!("{}_original.pdf", session_id))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

impl SessionStore {
    /// Open (or create) the store and rehydrate every stored session
    pub async fn open(db_path: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let data_dir = data_dir.into();

        let (conn, sessions, data_dir) = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&data_dir)?;
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let mut conn = Connection::open(&db_path)?;
            run_migrations(&mut conn)?;
            let sessions = load_sessions(&conn)?;
            Ok::<_, Error>((conn, sessions, data_dir))
        })
        .await
        .map_err(Error::join)??;

        tracing::info!(count = sessions.len(), "Loaded sessions from database");

        let sessions = sessions
            .into_iter()
            .map(|s| (s.session_id.clone(), Arc::new(tokio::sync::Mutex::new(s))))
            .collect();

        Ok(Self {
            sessions: Mutex::new(sessions),
            db: Arc::new(Mutex::new(conn)),
            data_dir,
        })
    }

    /// Register a new session, replacing any resident session with the same id
    pub async fn create(&self, session_id: Option<String>) -> Result<SessionHandle> {
        let session = match session_id {
            Some(id) => {
                validate_session_id(&id)?;
                Session::new(id)
            }
            None => Session::generate(),
        };
        let id = session.session_id.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        self.sessions.lock().insert(id.clone(), Arc::clone(&handle));

        self.persist_new(&handle).await;
        tracing::info!(session_id = %id, "Created session");
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Resume a resident session, or create one under `session_id`
    pub async fn get_or_create(&self, session_id: Option<&str>) -> Result<SessionHandle> {
        let Some(id) = session_id else {
            return self.create(None).await;
        };
        validate_session_id(id)?;

        let (handle, created) = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(handle) => (Arc::clone(handle), false),
                None => {
                    let handle = Arc::new(tokio::sync::Mutex::new(Session::new(id)));
                    sessions.insert(id.to_string(), Arc::clone(&handle));
                    (handle, true)
                }
            }
        };

        if created {
            self.persist_new(&handle).await;
            tracing::info!(session_id = %id, "Created session");
        } else {
            tracing::debug!(session_id = %id, "Resumed session");
        }
        Ok(handle)
    }

    async fn persist_new(&self, handle: &SessionHandle) {
        let mut session = handle.lock().await;
        if let Err(e) = self.save(&mut session).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Failed to persist new session");
        }
    }

    /// Write the session's durable record, replacing any earlier one
    pub async fn save(&self, session: &mut Session) -> Result<()> {
        session.updated_at = Utc::now();

        let applied_edits = if session.ledger.applied().is_empty() {
            None
        } else {
            Some(serde_json::to_string(session.ledger.applied())?)
        };

        let record = SessionRecord {
            session_id: session.session_id.clone(),
            pdf_path: session.pdf_path.clone(),
            output_path: session.output_path.clone(),
            applied_edits,
            current_pdf: session.current_pdf.clone(),
            original_pdf: session.original_pdf.clone(),
            created_at: session.created_at.timestamp_millis(),
            updated_at: session.updated_at.timestamp_millis(),
        };

        let db = Arc::clone(&self.db);
        let data_dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || write_record(&db, &data_dir, record))
            .await
            .map_err(Error::join)?
    }

    /// Remove a session from memory and disk. Returns whether it existed.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        let resident = self.sessions.lock().remove(session_id).is_some();

        let db = Arc::clone(&self.db);
        let data_dir = self.data_dir.clone();
        let id = session_id.to_string();
        let stored = tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            let tx = conn.transaction()?;
            let removed = delete_record(&tx, &data_dir, &id)?;
            tx.commit()?;
            Ok::<_, Error>(removed)
        })
        .await
        .map_err(Error::join)??;

        if resident || stored {
            tracing::info!(session_id = %session_id, "Deleted session");
        }
        Ok(resident || stored)
    }

    /// Purge sessions idle for longer than `max_age`
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let age = chrono::Duration::milliseconds(max_age.as_millis().min(i64::MAX as u128) as i64);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_updated_before(cutoff).await
    }

    /// Purge every session last updated before `cutoff`. Sessions whose lock
    /// is held by a running tool call are left for the next pass.
    pub async fn cleanup_updated_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_ms = cutoff.timestamp_millis();
        let db = Arc::clone(&self.db);
        let stale = tokio::task::spawn_blocking(move || {
            let conn = db.lock();
            let mut stmt = conn.prepare("SELECT session_id FROM sessions WHERE updated_at < ?1")?;
            let ids = stmt
                .query_map(params![cutoff_ms], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok::<_, Error>(ids)
        })
        .await
        .map_err(Error::join)??;

        let mut evicted = Vec::new();
        {
            let mut sessions = self.sessions.lock();
            for id in stale {
                if let Some(handle) = sessions.get(&id) {
                    let Ok(session) = handle.try_lock() else {
                        tracing::debug!(session_id = %id, "Skipping cleanup of session in use");
                        continue;
                    };
                    // Saved since the stale query ran
                    if session.updated_at.timestamp_millis() >= cutoff_ms {
                        continue;
                    }
                }
                sessions.remove(&id);
                evicted.push(id);
            }
        }

        if evicted.is_empty() {
            return Ok(0);
        }

        let db = Arc::clone(&self.db);
        let data_dir = self.data_dir.clone();
        let count = evicted.len();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            let tx = conn.transaction()?;
            for id in &evicted {
                delete_stale_record(&tx, &data_dir, id, cutoff_ms)?;
            }
            tx.commit()?;
            Ok::<_, Error>(())
        })
        .await
        .map_err(Error::join)??;

        tracing::info!(count, "Cleaned up old sessions");
        Ok(count)
    }

    /// Latest filled rendering of a session
    pub async fn current_pdf(&self, session_id: &str) -> Option<Vec<u8>> {
        let handle = self.get(session_id)?;
        let session = handle.lock().await;
        session.current_pdf.clone()
    }

    /// The first document a session saw
    pub async fn original_pdf(&self, session_id: &str) -> Option<Vec<u8>> {
        let handle = self.get(session_id)?;
        let session = handle.lock().await;
        session.original_pdf.clone()
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let handle = self.get(session_id)?;
        let session = handle.lock().await;
        Some(session.info())
    }

    /// Resident session ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Longest sweep period; larger intervals are clamped to it
pub const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Run [`SessionStore::cleanup_older_than`] every `interval`
pub fn spawn_cleanup_task(
    store: Arc<SessionStore>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    let interval = interval.clamp(Duration::from_secs(1), MAX_CLEANUP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = store.cleanup_older_than(max_age).await {
                tracing::warn!(error = %e, "Session cleanup failed");
            }
        }
    })
}

fn load_sessions(conn: &Connection) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, pdf_path, output_path, applied_edits, pdf_file_path,
                original_pdf_file_path, created_at, updated_at
         FROM sessions",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(StoredRow {
            session_id: row.get("session_id")?,
            pdf_path: row.get("pdf_path")?,
            output_path: row.get("output_path")?,
            applied_edits: row.get("applied_edits")?,
            pdf_file_path: row.get("pdf_file_path")?,
            original_pdf_file_path: row.get("original_pdf_file_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    })?;

    let mut sessions = Vec::new();
    for row in rows {
        match row {
            Ok(row) => sessions.push(row.into_session()),
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable session record"),
        }
    }
    Ok(sessions)
}

impl StoredRow {
    fn into_session(self) -> Session {
        let mut session = Session::new(self.session_id);
        session.pdf_path = self.pdf_path;
        session.output_path = self.output_path;
        session.created_at = from_millis(self.created_at);
        session.updated_at = from_millis(self.updated_at);
        session.current_pdf = read_document(self.pdf_file_path.as_deref());
        session.original_pdf = read_document(self.original_pdf_file_path.as_deref());

        if let Some(json) = self.applied_edits {
            match serde_json::from_str::<BTreeMap<String, EditValue>>(&json) {
                Ok(applied) => session.ledger.replace_applied(applied),
                Err(e) => tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Discarding unreadable applied edits"
                ),
            }
        }
        session
    }
}

/// Missing or unreadable files degrade to `None`
fn read_document(path: Option<&str>) -> Option<Vec<u8>> {
    let path = Path::new(path?);
    if !path.exists() {
        return None;
    }
    match std::fs::read(path) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read session document");
            None
        }
    }
}

fn write_document(path: &Path, data: Option<&[u8]>) -> Result<Option<String>> {
    match data {
        Some(data) => {
            std::fs::write(path, data)?;
            Ok(Some(path.display().to_string()))
        }
        None => {
            remove_if_exists(path)?;
            Ok(None)
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_record(db: &Mutex<Connection>, data_dir: &Path, record: SessionRecord) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let pdf_file_path = write_document(
        &current_file(data_dir, &record.session_id),
        record.current_pdf.as_deref(),
    )?;
    let original_pdf_file_path = write_document(
        &original_file(data_dir, &record.session_id),
        record.original_pdf.as_deref(),
    )?;

    let conn = db.lock();
    conn.execute(
        "INSERT INTO sessions (session_id, pdf_path, output_path, applied_edits, pdf_file_path,
                               original_pdf_file_path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(session_id) DO UPDATE SET
             pdf_path = excluded.pdf_path,
             output_path = excluded.output_path,
             applied_edits = excluded.applied_edits,
             pdf_file_path = excluded.pdf_file_path,
             original_pdf_file_path = excluded.original_pdf_file_path,
             updated_at = excluded.updated_at",
        params![
            record.session_id,
            record.pdf_path,
            record.output_path,
            record.applied_edits,
            pdf_file_path,
            original_pdf_file_path,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

fn delete_record(conn: &Connection, data_dir: &Path, session_id: &str) -> Result<bool> {
    remove_if_exists(&current_file(data_dir, session_id))?;
    remove_if_exists(&original_file(data_dir, session_id))?;
    let removed = conn.execute(
        "DELETE FROM sessions WHERE session_id = ?1",
        params![session_id],
    )?;
    Ok(removed > 0)
}

/// Delete the record only if it was not saved at or after `cutoff_ms`
fn delete_stale_record(
    conn: &Connection,
    data_dir: &Path,
    session_id: &str,
    cutoff_ms: i64,
) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE session_id = ?1 AND updated_at < ?2",
        params![session_id, cutoff_ms],
    )?;
    if removed > 0 {
        remove_if_exists(&current_file(data_dir, session_id))?;
        remove_if_exists(&original_file(data_dir, session_id))?;
    }
    Ok(removed > 0)
}
