//! libSQL storage layer for meeting records.
//!
//! The [`Storage`] struct wraps a libSQL database holding meetings and their
//! version history, the content-addressed agenda and document stores, the
//! external document backlog, run history, and full-text search.
//!
//! **Access rules:**
//! - crawl and document runs: read-write (sole writer) via [`Storage::open`]
//! - search and status queries: read-only via [`Storage::open_readonly`]
//!
//! Every multi-statement mutation runs inside one transaction that is either
//! committed or rolled back before the call returns.

mod documents;
mod meetings;
mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use councilwatch_shared::{CouncilWatchError, Result};
use libsql::{Connection, Database, Row, params};
use uuid::Uuid;

pub use documents::DocumentUrlRecord;
pub use meetings::{MeetingRecord, MeetingVersion, SaveOutcome};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CouncilWatchError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CouncilWatchError::storage("open database", e))?;

        let conn = db
            .connect()
            .map_err(|e| CouncilWatchError::storage("connect", e))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| CouncilWatchError::storage("enable foreign keys", e))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for queries only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CouncilWatchError::Storage(format!(
                "database {} does not exist; run a crawl first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CouncilWatchError::storage("open database", e))?;

        let conn = db
            .connect()
            .map_err(|e| CouncilWatchError::storage("connect", e))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CouncilWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CouncilWatchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a crawl or document run. Returns the generated run ID.
    pub async fn start_run(&self, kind: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO runs (id, kind, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), kind, ts(&Utc::now())],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("insert run", e))?;
        Ok(id)
    }

    /// Mark a run finished with its stats.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![ts(&Utc::now()), stats_json, run_id],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("update run", e))?;
        Ok(())
    }

    /// Most recent runs, newest first: `(id, kind, started_at, finished_at, stats_json)`.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, started_at, finished_at, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select runs", e))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows, "select runs").await? {
            results.push(RunRecord {
                id: get_string(&row, 0)?,
                kind: get_string(&row, 1)?,
                started_at: parse_ts(&get_string(&row, 2)?)?,
                finished_at: get_opt_string(&row, 3).map(|s| parse_ts(&s)).transpose()?,
                stats_json: get_opt_string(&row, 4),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// Row counts across the store.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM meetings),
                    (SELECT COUNT(*) FROM meeting_versions),
                    (SELECT COUNT(*) FROM agenda_content),
                    (SELECT COUNT(*) FROM external_content_urls),
                    (SELECT COUNT(*) FROM external_content_urls WHERE fetched IS NULL),
                    (SELECT COUNT(*) FROM external_content_urls WHERE error IS NOT NULL),
                    (SELECT COUNT(*) FROM external_content),
                    (SELECT COUNT(*) FROM meeting_external_links)",
                params![],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select stats", e))?;

        let row = next_row(&mut rows, "select stats")
            .await?
            .ok_or_else(|| CouncilWatchError::Storage("select stats returned no row".into()))?;

        let count = |idx: i32| -> Result<u64> {
            row.get::<i64>(idx)
                .map(|v| v as u64)
                .map_err(|e| CouncilWatchError::storage("read stats", e))
        };

        Ok(StoreStats {
            meetings: count(0)?,
            meeting_versions: count(1)?,
            agenda_contents: count(2)?,
            document_urls: count(3)?,
            document_backlog: count(4)?,
            document_errors: count(5)?,
            external_contents: count(6)?,
            document_links: count(7)?,
        })
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over agenda text. Returns meetings whose current agenda matches.
    pub async fn search_agendas(&self, query: &str, limit: u32) -> Result<Vec<AgendaHit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT m.id, m.kind, m.date, m.agenda_url, s.rank
                 FROM agenda_content_search s
                 JOIN agenda_content c ON c.rowid = s.rowid
                 JOIN meetings m ON m.agenda_content_id = c.id
                 WHERE agenda_content_search MATCH ?1
                 ORDER BY s.rank, m.date DESC
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("search agendas", e))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows, "search agendas").await? {
            results.push(AgendaHit {
                meeting_id: get_string(&row, 0)?,
                kind: get_string(&row, 1)?,
                date: get_string(&row, 2)?,
                agenda_url: get_opt_string(&row, 3),
                score: row.get::<f64>(4).unwrap_or(0.0),
            });
        }
        Ok(results)
    }

    /// Full-text search over document titles and text.
    pub async fn search_documents(&self, query: &str, limit: u32) -> Result<Vec<DocumentHit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.title,
                        (SELECT u.url FROM external_content_urls u
                         WHERE u.external_content_id = c.id ORDER BY u.url LIMIT 1),
                        s.rank
                 FROM external_content_search s
                 JOIN external_content c ON c.rowid = s.rowid
                 WHERE external_content_search MATCH ?1
                 ORDER BY s.rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("search documents", e))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows, "search documents").await? {
            results.push(DocumentHit {
                content_id: get_string(&row, 0)?,
                title: get_string(&row, 1)?,
                url: get_opt_string(&row, 2),
                score: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

/// A run history row.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    /// `crawl` or `documents`.
    pub kind: String,
    pub started_at: DateTime<Utc>,
    /// `None` for runs that aborted.
    pub finished_at: Option<DateTime<Utc>>,
    pub stats_json: Option<String>,
}

/// Row counts across the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub meetings: u64,
    pub meeting_versions: u64,
    pub agenda_contents: u64,
    pub document_urls: u64,
    /// Document URLs not yet fetched.
    pub document_backlog: u64,
    /// Document URLs that reached the terminal error state.
    pub document_errors: u64,
    pub external_contents: u64,
    pub document_links: u64,
}

/// An agenda search result.
#[derive(Debug, Clone)]
pub struct AgendaHit {
    pub meeting_id: String,
    pub kind: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub agenda_url: Option<String>,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// A document search result.
#[derive(Debug, Clone)]
pub struct DocumentHit {
    pub content_id: String,
    pub title: String,
    /// One URL serving this content, if any.
    pub url: Option<String>,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Timestamps are stored as fixed-width RFC 3339 UTC so `MAX()` orders them correctly.
pub(crate) fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CouncilWatchError::Storage(format!("invalid timestamp {s:?}: {e}")))
}

pub(crate) async fn next_row(rows: &mut libsql::Rows, context: &str) -> Result<Option<Row>> {
    rows.next()
        .await
        .map_err(|e| CouncilWatchError::storage(context, e))
}

pub(crate) fn get_string(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| CouncilWatchError::storage(&format!("read column {idx}"), e))
}

/// NULL (or a type mismatch) reads as `None`.
pub(crate) fn get_opt_string(row: &Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cw_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    /// Row count of `table`, bypassing the typed accessors.
    pub(crate) async fn count_rows(storage: &Storage, table: &str) -> i64 {
        let mut rows = storage
            .conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), params![])
            .await
            .expect("count query");
        let row = rows.next().await.expect("count row").expect("one row");
        row.get::<i64>(0).expect("count value")
    }

    /// Run raw SQL against the store, used to break a table mid-test.
    pub(crate) async fn exec(storage: &Storage, sql: &str) {
        storage.conn.execute_batch(sql).await.expect("exec sql");
    }
}
