//! Append-only sync history: one entry per cycle, conflict records and
//! archived losing versions.

use crate::conflict::{ConflictSide, ResolutionStrategy};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use genpwd_cloud::ProviderKind;
use genpwd_crypto::VaultEnvelope;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Identifying metadata of one side of a conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    pub device_id: String,
    pub timestamp: i64,
    pub content_hash: String,
}

impl From<&VaultEnvelope> for EnvelopeSummary {
    fn from(envelope: &VaultEnvelope) -> Self {
        Self {
            device_id: envelope.device_id().to_string(),
            timestamp: envelope.timestamp(),
            content_hash: envelope.content_hash().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub vault_id: String,
    pub local: EnvelopeSummary,
    pub remote: EnvelopeSummary,
    pub strategy_applied: ResolutionStrategy,
    pub winner: ConflictSide,
    pub resolved_at: DateTime<Utc>,
    pub losing_version_archived: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveReason {
    /// Lost a conflict resolution.
    ConflictLoser,
    /// Local content replaced by an explicit download.
    OverwrittenByDownload,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::ConflictLoser => "CONFLICT_LOSER",
            ArchiveReason::OverwrittenByDownload => "OVERWRITTEN_BY_DOWNLOAD",
        }
    }
}

/// A complete losing envelope, still encrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedVersion {
    pub id: Uuid,
    pub vault_id: String,
    pub envelope: VaultEnvelope,
    pub archived_at: DateTime<Utc>,
    pub reason: ArchiveReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryOutcome {
    Uploaded,
    Downloaded,
    UpToDate,
    Conflict,
    Resolved,
    Cancelled,
    Error(String),
}

impl HistoryOutcome {
    /// True when local and remote held the same content afterwards.
    pub fn is_in_sync(&self) -> bool {
        matches!(
            self,
            HistoryOutcome::Uploaded
                | HistoryOutcome::Downloaded
                | HistoryOutcome::UpToDate
                | HistoryOutcome::Resolved
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub id: Uuid,
    pub vault_id: String,
    pub provider: ProviderKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub outcome: HistoryOutcome,
    /// Content both sides agreed on, for in-sync outcomes.
    pub content_hash: Option<String>,
}

/// Persistence for sync history. Every method only ever appends or reads.
pub trait HistoryStore: Send + Sync {
    fn append_entry(&self, entry: &SyncHistoryEntry) -> SyncResult<()>;
    fn append_conflict(&self, record: &ConflictRecord) -> SyncResult<()>;
    fn archive(&self, version: &ArchivedVersion) -> SyncResult<()>;

    /// Entries for a vault, oldest first.
    fn entries(&self, vault_id: &str) -> SyncResult<Vec<SyncHistoryEntry>>;
    fn conflicts(&self, vault_id: &str) -> SyncResult<Vec<ConflictRecord>>;
    fn archived(&self, vault_id: &str) -> SyncResult<Vec<ArchivedVersion>>;

    /// Content hash both sides held after the last in-sync cycle.
    fn last_synced_hash(
        &self,
        vault_id: &str,
        provider: ProviderKind,
    ) -> SyncResult<Option<String>> {
        Ok(self
            .entries(vault_id)?
            .into_iter()
            .rev()
            .filter(|e| e.provider == provider && e.outcome.is_in_sync())
            .find_map(|e| e.content_hash))
    }
}

/// SQLite-backed history, append-only at the schema level.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Opens or creates a history database at the given path.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn initialize_schema(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            vault_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            started_at_ms INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            outcome_json TEXT NOT NULL,
            content_hash TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_history_vault ON sync_history(vault_id, seq);

        CREATE TABLE IF NOT EXISTS conflict_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            vault_id TEXT NOT NULL,
            local_json TEXT NOT NULL,
            remote_json TEXT NOT NULL,
            strategy TEXT NOT NULL,
            winner TEXT NOT NULL,
            resolved_at_ms INTEGER NOT NULL,
            losing_archived INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS archived_versions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            vault_id TEXT NOT NULL,
            envelope BLOB NOT NULL,
            archived_at_ms INTEGER NOT NULL,
            reason TEXT NOT NULL
        );

        CREATE TRIGGER IF NOT EXISTS sync_history_append_only
            BEFORE UPDATE ON sync_history
            BEGIN SELECT RAISE(ABORT, 'sync history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS conflict_records_append_only
            BEFORE UPDATE ON conflict_records
            BEGIN SELECT RAISE(ABORT, 'conflict records are append-only'); END;
        CREATE TRIGGER IF NOT EXISTS archived_versions_append_only
            BEFORE UPDATE ON archived_versions
            BEGIN SELECT RAISE(ABORT, 'archived versions are append-only'); END;
        "#,
    )?;
    Ok(())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_uuid(s: &str) -> SyncResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| SyncError::History(format!("bad id {s}: {e}")))
}

/// Parses a `"NAME"` value through serde so column text matches the wire names.
fn parse_name<T: serde::de::DeserializeOwned>(s: &str) -> SyncResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(s.to_string()))?)
}

impl HistoryStore for SqliteHistoryStore {
    fn append_entry(&self, entry: &SyncHistoryEntry) -> SyncResult<()> {
        let outcome_json = serde_json::to_string(&entry.outcome)?;
        self.conn().execute(
            "INSERT INTO sync_history (id, vault_id, provider, started_at_ms, duration_ms, \
             size_bytes, outcome_json, content_hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.id.to_string(),
                entry.vault_id,
                entry.provider.as_str(),
                entry.started_at.timestamp_millis(),
                entry.duration_ms as i64,
                entry.size_bytes as i64,
                outcome_json,
                entry.content_hash,
            ],
        )?;
        Ok(())
    }

    fn append_conflict(&self, record: &ConflictRecord) -> SyncResult<()> {
        self.conn().execute(
            "INSERT INTO conflict_records (id, vault_id, local_json, remote_json, strategy, \
             winner, resolved_at_ms, losing_archived) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.to_string(),
                record.vault_id,
                serde_json::to_string(&record.local)?,
                serde_json::to_string(&record.remote)?,
                record.strategy_applied.as_str(),
                record.winner.as_str(),
                record.resolved_at.timestamp_millis(),
                record.losing_version_archived,
            ],
        )?;
        Ok(())
    }

    fn archive(&self, version: &ArchivedVersion) -> SyncResult<()> {
        self.conn().execute(
            "INSERT INTO archived_versions (id, vault_id, envelope, archived_at_ms, reason) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                version.id.to_string(),
                version.vault_id,
                version.envelope.to_json()?,
                version.archived_at.timestamp_millis(),
                version.reason.as_str(),
            ],
        )?;
        Ok(())
    }

    fn entries(&self, vault_id: &str) -> SyncResult<Vec<SyncHistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, vault_id, provider, started_at_ms, duration_ms, size_bytes, \
             outcome_json, content_hash FROM sync_history WHERE vault_id = ? ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![vault_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, vault_id, provider, started, duration, size, outcome, hash) = row?;
            entries.push(SyncHistoryEntry {
                id: parse_uuid(&id)?,
                vault_id,
                provider: provider.parse().map_err(SyncError::History)?,
                started_at: from_millis(started),
                duration_ms: duration.max(0) as u64,
                size_bytes: size.max(0) as u64,
                outcome: serde_json::from_str(&outcome)?,
                content_hash: hash,
            });
        }
        Ok(entries)
    }

    fn conflicts(&self, vault_id: &str) -> SyncResult<Vec<ConflictRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, vault_id, local_json, remote_json, strategy, winner, resolved_at_ms, \
             losing_archived FROM conflict_records WHERE vault_id = ? ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![vault_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, vault_id, local, remote, strategy, winner, resolved_at, archived) = row?;
            records.push(ConflictRecord {
                id: parse_uuid(&id)?,
                vault_id,
                local: serde_json::from_str(&local)?,
                remote: serde_json::from_str(&remote)?,
                strategy_applied: strategy.parse().map_err(SyncError::History)?,
                winner: parse_name(&winner)?,
                resolved_at: from_millis(resolved_at),
                losing_version_archived: archived,
            });
        }
        Ok(records)
    }

    fn archived(&self, vault_id: &str) -> SyncResult<Vec<ArchivedVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, vault_id, envelope, archived_at_ms, reason FROM archived_versions \
             WHERE vault_id = ? ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![vault_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut versions = Vec::new();
        for row in rows {
            let (id, vault_id, envelope, archived_at, reason) = row?;
            versions.push(ArchivedVersion {
                id: parse_uuid(&id)?,
                vault_id,
                envelope: VaultEnvelope::from_json(&envelope)?,
                archived_at: from_millis(archived_at),
                reason: parse_name(&reason)?,
            });
        }
        Ok(versions)
    }

    fn last_synced_hash(
        &self,
        vault_id: &str,
        provider: ProviderKind,
    ) -> SyncResult<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT outcome_json, content_hash FROM sync_history \
             WHERE vault_id = ? AND provider = ? AND content_hash IS NOT NULL \
             ORDER BY seq DESC",
        )?;
        let mut rows = stmt.query(params![vault_id, provider.as_str()])?;
        while let Some(row) = rows.next()? {
            let outcome: HistoryOutcome = serde_json::from_str(&row.get::<_, String>(0)?)?;
            if outcome.is_in_sync() {
                return Ok(row.get::<_, Option<String>>(1)?);
            }
        }
        Ok(None)
    }
}

impl SqliteHistoryStore {
    /// Number of history entries across all vaults.
    pub fn entry_count(&self) -> SyncResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_history", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

/// Process-local history, lost on exit.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<SyncHistoryEntry>>,
    conflicts: Mutex<Vec<ConflictRecord>>,
    archived: Mutex<Vec<ArchivedVersion>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl HistoryStore for MemoryHistoryStore {
    fn append_entry(&self, entry: &SyncHistoryEntry) -> SyncResult<()> {
        locked(&self.entries).push(entry.clone());
        Ok(())
    }

    fn append_conflict(&self, record: &ConflictRecord) -> SyncResult<()> {
        locked(&self.conflicts).push(record.clone());
        Ok(())
    }

    fn archive(&self, version: &ArchivedVersion) -> SyncResult<()> {
        locked(&self.archived).push(version.clone());
        Ok(())
    }

    fn entries(&self, vault_id: &str) -> SyncResult<Vec<SyncHistoryEntry>> {
        Ok(locked(&self.entries)
            .iter()
            .filter(|e| e.vault_id == vault_id)
            .cloned()
            .collect())
    }

    fn conflicts(&self, vault_id: &str) -> SyncResult<Vec<ConflictRecord>> {
        Ok(locked(&self.conflicts)
            .iter()
            .filter(|r| r.vault_id == vault_id)
            .cloned()
            .collect())
    }

    fn archived(&self, vault_id: &str) -> SyncResult<Vec<ArchivedVersion>> {
        Ok(locked(&self.archived)
            .iter()
            .filter(|v| v.vault_id == vault_id)
            .cloned()
            .collect())
    }
}
