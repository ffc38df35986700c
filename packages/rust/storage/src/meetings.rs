//! Meeting persistence: content store, version history, document discovery.

use chrono::{DateTime, NaiveDate, Utc};
use councilwatch_shared::{Agenda, ContentId, CouncilWatchError, Meeting, Result};
use libsql::{Connection, Row, params};

use crate::{Storage, get_opt_string, get_string, next_row, parse_ts, ts};

const MEETING_COLUMNS: &str = "m.id, m.kind, m.date, m.note, m.agenda_url, m.minutes_url, \
     m.video_url, m.agenda_content_id, m.last_observed, m.last_updated";

/// What a [`Storage::save_meeting`] call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub content_id: ContentId,
    /// The agenda body had not been seen before.
    pub new_content: bool,
    /// A version snapshot was appended.
    pub new_version: bool,
    /// Document URLs registered for the first time.
    pub new_document_urls: usize,
}

/// A stored meeting with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct MeetingRecord {
    pub meeting: Meeting,
    pub agenda_content_id: Option<String>,
    pub last_observed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One row of a meeting's version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingVersion {
    pub observed: DateTime<Utc>,
    pub note: String,
    pub agenda_url: Option<String>,
    pub minutes_url: Option<String>,
    pub video_url: Option<String>,
    pub agenda_content_id: String,
}

impl Storage {
    /// Persist one observation of a meeting and its agenda.
    ///
    /// Agenda content, the meeting row, the version snapshot, the observation
    /// timestamps and discovered document URLs are written in one transaction.
    /// Repeating a call with identical arguments changes nothing but
    /// `last_observed`.
    pub async fn save_meeting(
        &self,
        meeting: &Meeting,
        agenda: &Agenda,
        observed: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        self.check_writable()?;
        if meeting.agenda_url.as_deref().unwrap_or("").is_empty() {
            return Err(CouncilWatchError::validation(format!(
                "meeting {} has no agenda URL",
                meeting.label()
            )));
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CouncilWatchError::storage("begin transaction", e))?;

        match save_meeting_tx(&tx, meeting, agenda, observed).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| CouncilWatchError::storage("commit meeting", e))?;
                tracing::debug!(
                    meeting = %meeting.id,
                    content = %outcome.content_id,
                    new_content = outcome.new_content,
                    new_version = outcome.new_version,
                    "meeting saved"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// When the meeting was last crawled, if ever.
    pub async fn last_observed(&self, meeting_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_observed FROM meetings WHERE id = ?1",
                params![meeting_id],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select last_observed", e))?;

        match next_row(&mut rows, "select last_observed").await? {
            Some(row) => get_opt_string(&row, 0).map(|s| parse_ts(&s)).transpose(),
            None => Ok(None),
        }
    }

    /// Latest version timestamp across all meetings, `None` on an empty store.
    pub async fn max_observed(&self) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query("SELECT MAX(observed) FROM meeting_versions", params![])
            .await
            .map_err(|e| CouncilWatchError::storage("select max observed", e))?;

        match next_row(&mut rows, "select max observed").await? {
            Some(row) => get_opt_string(&row, 0).map(|s| parse_ts(&s)).transpose(),
            None => Ok(None),
        }
    }

    /// Fetch a meeting by ID.
    pub async fn meeting(&self, meeting_id: &str) -> Result<Option<MeetingRecord>> {
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings m WHERE m.id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![meeting_id])
            .await
            .map_err(|e| CouncilWatchError::storage("select meeting", e))?;

        match next_row(&mut rows, "select meeting").await? {
            Some(row) => Ok(Some(row_to_meeting_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Version history of a meeting, oldest first.
    pub async fn meeting_versions(&self, meeting_id: &str) -> Result<Vec<MeetingVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT observed, note, agenda_url, minutes_url, video_url, agenda_content_id
                 FROM meeting_versions WHERE meeting_id = ?1
                 ORDER BY observed, rowid",
                params![meeting_id],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select versions", e))?;

        let mut versions = Vec::new();
        while let Some(row) = next_row(&mut rows, "select versions").await? {
            versions.push(MeetingVersion {
                observed: parse_ts(&get_string(&row, 0)?)?,
                note: get_string(&row, 1)?,
                agenda_url: non_empty(get_string(&row, 2)?),
                minutes_url: non_empty(get_string(&row, 3)?),
                video_url: non_empty(get_string(&row, 4)?),
                agenda_content_id: get_string(&row, 5)?,
            });
        }
        Ok(versions)
    }

    /// Meetings whose agenda (any revision) links to `url`, newest first.
    pub async fn meetings_citing(&self, url: &str) -> Result<Vec<MeetingRecord>> {
        let sql = format!(
            "SELECT {MEETING_COLUMNS} FROM meetings m
             WHERE m.id IN (SELECT meeting_id FROM meeting_external_links WHERE url = ?1)
             ORDER BY m.date DESC, m.id"
        );
        let mut rows = self
            .conn
            .query(&sql, params![url])
            .await
            .map_err(|e| CouncilWatchError::storage("select citing meetings", e))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows, "select citing meetings").await? {
            results.push(row_to_meeting_record(&row)?);
        }
        Ok(results)
    }

    /// Plain text of a stored agenda body.
    pub async fn agenda_text(&self, content_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT text FROM agenda_content WHERE id = ?1",
                params![content_id],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select agenda text", e))?;

        match next_row(&mut rows, "select agenda text").await? {
            Some(row) => Ok(Some(get_string(&row, 0)?)),
            None => Ok(None),
        }
    }
}

async fn save_meeting_tx(
    conn: &Connection,
    meeting: &Meeting,
    agenda: &Agenda,
    observed: DateTime<Utc>,
) -> Result<SaveOutcome> {
    let content_id = ContentId::from_bytes(agenda.html.as_bytes());
    let observed = ts(&observed);
    let date = meeting.date.format("%Y-%m-%d").to_string();

    // Content first, indexed only when the row is new
    let inserted = conn
        .execute(
            "INSERT INTO agenda_content (id, html, text) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![content_id.as_str(), agenda.html.as_str(), agenda.text.as_str()],
        )
        .await
        .map_err(|e| CouncilWatchError::storage("insert agenda content", e))?;
    let new_content = inserted == 1;
    if new_content {
        conn.execute(
            "INSERT INTO agenda_content_search (rowid, text)
             SELECT rowid, text FROM agenda_content WHERE id = ?1",
            params![content_id.as_str()],
        )
        .await
        .map_err(|e| CouncilWatchError::storage("index agenda content", e))?;
    }

    conn.execute(
        "INSERT INTO meetings (id, kind, date, note, agenda_url, minutes_url, video_url, agenda_content_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            date = excluded.date,
            note = excluded.note,
            agenda_url = excluded.agenda_url,
            minutes_url = excluded.minutes_url,
            video_url = excluded.video_url,
            agenda_content_id = excluded.agenda_content_id",
        params![
            meeting.id.as_str(),
            meeting.kind.as_str(),
            date.as_str(),
            meeting.note.as_str(),
            meeting.agenda_url.as_deref(),
            meeting.minutes_url.as_deref(),
            meeting.video_url.as_deref(),
            content_id.as_str()
        ],
    )
    .await
    .map_err(|e| CouncilWatchError::storage("upsert meeting", e))?;

    let appended = conn
        .execute(
            "INSERT INTO meeting_versions
                (meeting_id, observed, note, agenda_url, minutes_url, video_url, agenda_content_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT DO NOTHING",
            params![
                meeting.id.as_str(),
                observed.as_str(),
                meeting.note.as_str(),
                meeting.agenda_url.as_deref().unwrap_or(""),
                meeting.minutes_url.as_deref().unwrap_or(""),
                meeting.video_url.as_deref().unwrap_or(""),
                content_id.as_str()
            ],
        )
        .await
        .map_err(|e| CouncilWatchError::storage("insert meeting version", e))?;

    conn.execute(
        "UPDATE meetings SET
            last_observed = ?2,
            last_updated = (SELECT MAX(observed) FROM meeting_versions WHERE meeting_id = ?1)
         WHERE id = ?1",
        params![meeting.id.as_str(), observed.as_str()],
    )
    .await
    .map_err(|e| CouncilWatchError::storage("update meeting timestamps", e))?;

    let mut new_document_urls = 0;
    for url in &agenda.document_urls {
        let registered = conn
            .execute(
                "INSERT INTO external_content_urls (url, added) VALUES (?1, ?2)
                 ON CONFLICT(url) DO NOTHING",
                params![url.as_str(), observed.as_str()],
            )
            .await
            .map_err(|e| CouncilWatchError::storage(&format!("register document {url}"), e))?;
        new_document_urls += registered as usize;

        conn.execute(
            "INSERT INTO meeting_external_links (meeting_id, agenda_content_id, url)
             VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![meeting.id.as_str(), content_id.as_str(), url.as_str()],
        )
        .await
        .map_err(|e| CouncilWatchError::storage(&format!("link document {url}"), e))?;
    }

    Ok(SaveOutcome {
        content_id,
        new_content,
        new_version: appended == 1,
        new_document_urls,
    })
}

fn row_to_meeting_record(row: &Row) -> Result<MeetingRecord> {
    let date = get_string(row, 2)?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| CouncilWatchError::Storage(format!("invalid meeting date {date:?}: {e}")))?;

    Ok(MeetingRecord {
        meeting: Meeting {
            id: get_string(row, 0)?,
            kind: get_string(row, 1)?,
            date,
            note: get_opt_string(row, 3).unwrap_or_default(),
            agenda_url: get_opt_string(row, 4),
            minutes_url: get_opt_string(row, 5),
            video_url: get_opt_string(row, 6),
        },
        agenda_content_id: get_opt_string(row, 7),
        last_observed: get_opt_string(row, 8).map(|s| parse_ts(&s)).transpose()?,
        last_updated: get_opt_string(row, 9).map(|s| parse_ts(&s)).transpose()?,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
