//! External document backlog and content store.

use chrono::{DateTime, Utc};
use councilwatch_shared::{ContentId, CouncilWatchError, ExtractedDocument, FetchMeta, Result};
use libsql::{Connection, params};

use crate::{Storage, get_opt_string, get_string, next_row, parse_ts, ts};

/// A discovered document URL and its fetch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUrlRecord {
    pub url: String,
    pub added: DateTime<Utc>,
    /// Set once the URL reached a terminal state.
    pub fetched: Option<DateTime<Utc>>,
    pub meta: FetchMeta,
    pub error: Option<String>,
    pub content_id: Option<String>,
}

impl Storage {
    /// URLs awaiting a fetch, oldest discovery first.
    pub async fn unfetched_document_urls(&self, limit: u32) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url FROM external_content_urls
                 WHERE fetched IS NULL
                 ORDER BY added, url
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select document backlog", e))?;

        let mut urls = Vec::new();
        while let Some(row) = next_row(&mut rows, "select document backlog").await? {
            urls.push(get_string(&row, 0)?);
        }
        Ok(urls)
    }

    /// Whether a document with this content hash is already stored.
    pub async fn external_content_exists(&self, id: &ContentId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM external_content WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select external content", e))?;
        Ok(next_row(&mut rows, "select external content").await?.is_some())
    }

    /// Mark `url` fetched and point it at `content_id`.
    ///
    /// `extracted` carries the document's title and text the first time these
    /// bytes are seen; pass `None` when the content row already exists.
    pub async fn record_document_fetched(
        &self,
        url: &str,
        fetched_at: DateTime<Utc>,
        meta: &FetchMeta,
        content_id: &ContentId,
        extracted: Option<&ExtractedDocument>,
    ) -> Result<()> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CouncilWatchError::storage("begin transaction", e))?;

        match record_fetched_tx(&tx, url, fetched_at, meta, content_id, extracted).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| CouncilWatchError::storage(&format!("commit document {url}"), e)),
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Mark `url` terminally failed, keeping whatever metadata was obtained.
    pub async fn record_document_error(
        &self,
        url: &str,
        fetched_at: DateTime<Utc>,
        meta: &FetchMeta,
        error: &str,
    ) -> Result<()> {
        self.check_writable()?;
        update_url_row(&self.conn, url, fetched_at, meta, None, Some(error)).await
    }

    /// Fetch state of a discovered URL.
    pub async fn document_url(&self, url: &str) -> Result<Option<DocumentUrlRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, added, fetched, content_type, size, last_modified, etag, error,
                        external_content_id
                 FROM external_content_urls WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select document url", e))?;

        let Some(row) = next_row(&mut rows, "select document url").await? else {
            return Ok(None);
        };

        Ok(Some(DocumentUrlRecord {
            url: get_string(&row, 0)?,
            added: parse_ts(&get_string(&row, 1)?)?,
            fetched: get_opt_string(&row, 2).map(|s| parse_ts(&s)).transpose()?,
            meta: FetchMeta {
                content_type: get_opt_string(&row, 3),
                size: row.get::<i64>(4).ok(),
                last_modified: get_opt_string(&row, 5).map(|s| parse_ts(&s)).transpose()?,
                etag: get_opt_string(&row, 6),
            },
            error: get_opt_string(&row, 7),
            content_id: get_opt_string(&row, 8),
        }))
    }

    /// Title and text of a stored document.
    pub async fn external_content(&self, id: &str) -> Result<Option<ExtractedDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, text FROM external_content WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("select external content", e))?;

        match next_row(&mut rows, "select external content").await? {
            Some(row) => Ok(Some(ExtractedDocument {
                title: get_string(&row, 0)?,
                text: get_string(&row, 1)?,
            })),
            None => Ok(None),
        }
    }
}

async fn record_fetched_tx(
    conn: &Connection,
    url: &str,
    fetched_at: DateTime<Utc>,
    meta: &FetchMeta,
    content_id: &ContentId,
    extracted: Option<&ExtractedDocument>,
) -> Result<()> {
    if let Some(doc) = extracted {
        let inserted = conn
            .execute(
                "INSERT INTO external_content (id, title, text) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO NOTHING",
                params![content_id.as_str(), doc.title.as_str(), doc.text.as_str()],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("insert external content", e))?;
        if inserted == 1 {
            conn.execute(
                "INSERT INTO external_content_search (rowid, title, text)
                 SELECT rowid, title, text FROM external_content WHERE id = ?1",
                params![content_id.as_str()],
            )
            .await
            .map_err(|e| CouncilWatchError::storage("index external content", e))?;
        }
    }

    update_url_row(conn, url, fetched_at, meta, Some(content_id), None).await
}

async fn update_url_row(
    conn: &Connection,
    url: &str,
    fetched_at: DateTime<Utc>,
    meta: &FetchMeta,
    content_id: Option<&ContentId>,
    error: Option<&str>,
) -> Result<()> {
    let last_modified = meta.last_modified.as_ref().map(ts);
    let updated = conn
        .execute(
            "UPDATE external_content_urls SET
                fetched = ?2,
                content_type = ?3,
                size = ?4,
                last_modified = ?5,
                etag = ?6,
                error = ?7,
                external_content_id = ?8
             WHERE url = ?1",
            params![
                url,
                ts(&fetched_at),
                meta.content_type.as_deref(),
                meta.size,
                last_modified.as_deref(),
                meta.etag.as_deref(),
                error,
                content_id.map(ContentId::as_str)
            ],
        )
        .await
        .map_err(|e| CouncilWatchError::storage(&format!("update document {url}"), e))?;

    if updated == 0 {
        return Err(CouncilWatchError::Storage(format!(
            "document URL {url} is not registered"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{count_rows, exec, test_storage};
    use chrono::NaiveDate;
    use councilwatch_shared::{Agenda, Meeting};

    const PDF_A: &str = "https://www.halifax.ca/media/100";
    const PDF_B: &str = "https://cdn.halifax.ca/sites/default/files/100.pdf";

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn seeded_storage(urls: &[&str]) -> Storage {
        let storage = test_storage().await;
        let meeting = Meeting {
            id: "jan-5-2026-regional-council".into(),
            kind: "Regional Council".into(),
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            note: String::new(),
            agenda_url: Some("https://www.halifax.ca/city-hall/jan-5-2026-regional-council".into()),
            minutes_url: None,
            video_url: None,
        };
        let agenda = Agenda {
            html: "<div>agenda</div>".into(),
            text: "agenda".into(),
            document_urls: urls.iter().map(|u| u.to_string()).collect(),
        };
        storage
            .save_meeting(&meeting, &agenda, at("2026-01-04T12:00:00Z"))
            .await
            .unwrap();
        storage
    }

    fn pdf_meta() -> FetchMeta {
        FetchMeta {
            content_type: Some("application/pdf".into()),
            size: Some(2048),
            last_modified: Some(at("2025-12-30T15:04:05Z")),
            etag: Some("\"abc\"".into()),
        }
    }

    #[tokio::test]
    async fn backlog_drains_once_fetched() {
        let storage = seeded_storage(&[PDF_A, PDF_B]).await;
        assert_eq!(
            storage.unfetched_document_urls(10).await.unwrap(),
            vec![PDF_B.to_string(), PDF_A.to_string()]
        );
        assert_eq!(storage.unfetched_document_urls(1).await.unwrap().len(), 1);

        let id = ContentId::from_bytes(b"%PDF-1.4 a");
        let doc = ExtractedDocument {
            title: "Staff Report".into(),
            text: "Recommendation: approve the budget".into(),
        };
        storage
            .record_document_fetched(PDF_A, at("2026-01-04T13:00:00Z"), &pdf_meta(), &id, Some(&doc))
            .await
            .unwrap();

        assert_eq!(storage.unfetched_document_urls(10).await.unwrap(), vec![PDF_B.to_string()]);

        let record = storage.document_url(PDF_A).await.unwrap().unwrap();
        assert_eq!(record.fetched, Some(at("2026-01-04T13:00:00Z")));
        assert_eq!(record.meta, pdf_meta());
        assert_eq!(record.error, None);
        assert_eq!(record.content_id.as_deref(), Some(id.as_str()));
        assert!(storage.external_content_exists(&id).await.unwrap());
        assert_eq!(storage.external_content(id.as_str()).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn identical_bytes_share_one_document() {
        let storage = seeded_storage(&[PDF_A, PDF_B]).await;
        let id = ContentId::from_bytes(b"%PDF-1.4 same");
        let doc = ExtractedDocument {
            title: "Minutes".into(),
            text: "motion carried".into(),
        };
        let fetched = at("2026-01-04T13:00:00Z");

        storage
            .record_document_fetched(PDF_A, fetched, &pdf_meta(), &id, Some(&doc))
            .await
            .unwrap();
        storage
            .record_document_fetched(PDF_B, fetched, &pdf_meta(), &id, None)
            .await
            .unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.external_contents, 1);
        assert_eq!(stats.document_backlog, 0);
        for url in [PDF_A, PDF_B] {
            let record = storage.document_url(url).await.unwrap().unwrap();
            assert_eq!(record.content_id.as_deref(), Some(id.as_str()));
        }

        let hits = storage.search_documents("carried", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Minutes");
        assert!(hits[0].url.is_some());
    }

    #[tokio::test]
    async fn error_keeps_partial_metadata() {
        let storage = seeded_storage(&[PDF_A]).await;
        let meta = FetchMeta {
            content_type: Some("application/pdf".into()),
            size: Some(512),
            last_modified: None,
            etag: Some("\"xyz\"".into()),
        };
        storage
            .record_document_error(PDF_A, at("2026-01-04T13:00:00Z"), &meta, "pdftotext failed: exit 1")
            .await
            .unwrap();

        let record = storage.document_url(PDF_A).await.unwrap().unwrap();
        assert!(record.fetched.is_some());
        assert_eq!(record.meta, meta);
        assert_eq!(record.error.as_deref(), Some("pdftotext failed: exit 1"));
        assert_eq!(record.content_id, None);

        // Terminal: never resurfaces in the backlog
        assert!(storage.unfetched_document_urls(10).await.unwrap().is_empty());
        assert_eq!(storage.stats().await.unwrap().document_errors, 1);
    }

    #[tokio::test]
    async fn unregistered_url_is_rejected() {
        let storage = test_storage().await;
        let result = storage
            .record_document_error(PDF_A, Utc::now(), &FetchMeta::default(), "boom")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failed_record_rolls_back_content() {
        let storage = test_storage().await;
        let id = ContentId::from_bytes(b"orphan");
        let doc = ExtractedDocument::default();
        let result = storage
            .record_document_fetched(PDF_A, Utc::now(), &FetchMeta::default(), &id, Some(&doc))
            .await;
        assert!(result.is_err());
        assert!(!storage.external_content_exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_url_update_rolls_back_content_and_index() {
        let storage = seeded_storage(&[PDF_A]).await;
        exec(
            &storage,
            "CREATE TRIGGER reject_url_update BEFORE UPDATE ON external_content_urls
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .await;

        let id = ContentId::from_bytes(b"%PDF-1.4 rejected");
        let doc = ExtractedDocument {
            title: "Staff Report".into(),
            text: "Recommendation: defer".into(),
        };
        let err = storage
            .record_document_fetched(PDF_A, at("2026-01-04T13:00:00Z"), &pdf_meta(), &id, Some(&doc))
            .await
            .unwrap_err();
        assert!(err.to_string().contains(PDF_A), "{err}");

        assert!(!storage.external_content_exists(&id).await.unwrap());
        assert_eq!(count_rows(&storage, "external_content").await, 0);
        assert_eq!(count_rows(&storage, "external_content_search").await, 0);
        assert!(storage.search_documents("defer", 10).await.unwrap().is_empty());

        let record = storage.document_url(PDF_A).await.unwrap().unwrap();
        assert!(record.fetched.is_none());
        assert!(record.content_id.is_none());
        assert_eq!(storage.unfetched_document_urls(10).await.unwrap(), vec![PDF_A.to_string()]);
    }
}
