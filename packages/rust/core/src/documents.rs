//! External document pipeline: drain the backlog of discovered document URLs.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use councilwatch_extract::{DocumentTools, extract_pdf};
use councilwatch_shared::{
    ContentId, CouncilWatchError, DocumentsConfig, ExtractedDocument, FetchMeta, Result,
};
use councilwatch_storage::Storage;
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap, HeaderName, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use sha2::{Digest, Sha224};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::limiter::{RateLimiter, cancellable};
use crate::progress::ProgressReporter;

const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Counters recorded in the run history when a document run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    /// URLs taken from the backlog for this run.
    pub backlog: usize,
    pub processed: usize,
    /// New content rows created (text extracted or empty for non-PDFs).
    pub extracted: usize,
    /// URLs whose bytes were already stored under another URL.
    pub deduplicated: usize,
    pub failed: usize,
    /// Batch URLs left for the next run.
    pub remaining: usize,
    pub budget_exhausted: bool,
}

/// A downloaded body waiting for extraction. The file is removed on drop.
struct Download {
    file: NamedTempFile,
    content_id: ContentId,
}

/// Fetches, hashes and extracts documents linked from agendas.
pub struct DocumentPipeline {
    client: Client,
    tools: Box<dyn DocumentTools>,
    limiter: Arc<RateLimiter>,
    config: DocumentsConfig,
}

impl DocumentPipeline {
    pub fn new(
        client: Client,
        tools: Box<dyn DocumentTools>,
        limiter: Arc<RateLimiter>,
        config: DocumentsConfig,
    ) -> Self {
        Self {
            client,
            tools,
            limiter,
            config,
        }
    }

    /// Process one batch of the backlog.
    ///
    /// A per-URL fetch or extraction failure is recorded on that URL and the
    /// batch continues. Storage failures and cancellation abort the run. Once
    /// the run budget is spent the batch stops early and the rest waits for the
    /// next run.
    #[instrument(skip_all, fields(batch = self.config.batch_size))]
    pub async fn run(
        &self,
        storage: &Storage,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<DocumentStats> {
        self.tools.check_available()?;

        let run_id = storage.start_run("documents").await?;
        let started = Instant::now();
        let urls = storage.unfetched_document_urls(self.config.batch_size).await?;
        info!(%run_id, backlog = urls.len(), "starting document run");

        let mut stats = DocumentStats {
            backlog: urls.len(),
            ..DocumentStats::default()
        };

        progress.phase("Fetching documents");
        let total = urls.len();
        for (i, url) in urls.iter().enumerate() {
            self.process_url(url, storage, cancel, &mut stats).await?;
            stats.processed += 1;

            progress.item_done(url, i + 1, total);
            if (i + 1) % self.config.progress_interval == 0 {
                info!(done = i + 1, total, "document progress");
            }

            if started.elapsed() >= self.config.run_budget && i + 1 < total {
                stats.budget_exhausted = true;
                info!(
                    done = i + 1,
                    total,
                    budget_secs = self.config.run_budget.as_secs(),
                    "run budget spent, stopping early"
                );
                break;
            }
        }
        stats.remaining = total - stats.processed;

        let stats_json = serde_json::to_string(&stats)
            .map_err(|e| CouncilWatchError::Storage(format!("serialize document stats: {e}")))?;
        storage.finish_run(&run_id, &stats_json).await?;

        info!(
            processed = stats.processed,
            extracted = stats.extracted,
            deduplicated = stats.deduplicated,
            failed = stats.failed,
            remaining = stats.remaining,
            "document run complete"
        );
        progress.finish(&format!(
            "{} documents processed, {} failed, {} remaining",
            stats.processed, stats.failed, stats.remaining
        ));
        Ok(stats)
    }

    /// Fetch and store one URL. Only errors that should end the run are returned.
    async fn process_url(
        &self,
        url: &str,
        storage: &Storage,
        cancel: &CancellationToken,
        stats: &mut DocumentStats,
    ) -> Result<()> {
        let mut meta = FetchMeta::default();
        let fetched_at = Utc::now();

        let result = self.fetch_and_store(url, storage, cancel, &mut meta, stats).await;
        match result {
            Ok(()) => Ok(()),
            Err(e @ (CouncilWatchError::Cancelled | CouncilWatchError::Storage(_))) => Err(e),
            Err(e) => {
                warn!(%url, error = %e, "document failed");
                stats.failed += 1;
                storage
                    .record_document_error(url, fetched_at, &meta, &e.to_string())
                    .await
            }
        }
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        storage: &Storage,
        cancel: &CancellationToken,
        meta: &mut FetchMeta,
        stats: &mut DocumentStats,
    ) -> Result<()> {
        self.limiter.acquire(cancel).await?;
        let fetch_timeout = self.config.fetch_timeout;
        let download = cancellable(cancel, async {
            tokio::time::timeout(fetch_timeout, self.fetch(url, &mut *meta))
                .await
                .map_err(|_| CouncilWatchError::Timeout {
                    stage: format!("fetching {url}"),
                    secs: fetch_timeout.as_secs(),
                })?
        })
        .await?;
        let fetched_at = Utc::now();

        if storage.external_content_exists(&download.content_id).await? {
            debug!(%url, content = %download.content_id, "content already stored");
            stats.deduplicated += 1;
            return storage
                .record_document_fetched(url, fetched_at, meta, &download.content_id, None)
                .await;
        }

        let extracted = if meta.content_type.as_deref() == Some(PDF_MEDIA_TYPE) {
            cancellable(
                cancel,
                extract_pdf(
                    self.tools.as_ref(),
                    download.file.path(),
                    self.config.pdf_timeout,
                    &self.config.title_suffix,
                ),
            )
            .await
            .map_err(|e| e.context(format!("extracting {url}")))?
        } else {
            debug!(%url, content_type = ?meta.content_type, "not a PDF, storing without text");
            ExtractedDocument::default()
        };

        storage
            .record_document_fetched(url, fetched_at, meta, &download.content_id, Some(&extracted))
            .await?;
        stats.extracted += 1;
        Ok(())
    }

    /// GET `url` into a temporary file while hashing it. Header metadata is
    /// written to `meta` as soon as it is known so failures can keep it.
    async fn fetch(&self, url: &str, meta: &mut FetchMeta) -> Result<Download> {
        debug!(%url, "fetching document");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CouncilWatchError::Network(format!("{url}: {e}")))?;

        let headers = response.headers();
        meta.content_type = header_str(headers, CONTENT_TYPE).and_then(media_type);
        meta.last_modified = header_str(headers, LAST_MODIFIED).and_then(parse_http_date);
        meta.etag = header_str(headers, ETAG).map(String::from);
        meta.size = response.content_length().and_then(|n| i64::try_from(n).ok());

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CouncilWatchError::Network(format!("{url}: HTTP {status}")));
        }

        let io_err = |path: &Path, e: std::io::Error| {
            CouncilWatchError::io(path, e).context(format!("downloading {url}"))
        };
        let file = tempfile::Builder::new()
            .prefix("councilwatch-doc")
            .tempfile()
            .map_err(|e| io_err(&std::env::temp_dir(), e))?;
        let mut writer = file
            .as_file()
            .try_clone()
            .map(tokio::fs::File::from_std)
            .map_err(|e| io_err(file.path(), e))?;
        let mut hasher = Sha224::new();
        let mut size: i64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CouncilWatchError::Network(format!("{url}: body read failed: {e}")))?
        {
            hasher.update(&chunk);
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| io_err(file.path(), e))?;
            size += chunk.len() as i64;
        }
        writer.flush().await.map_err(|e| io_err(file.path(), e))?;
        meta.size = Some(size);

        Ok(Download {
            file,
            content_id: ContentId::from_digest(hasher.finalize().as_slice()),
        })
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `application/PDF; charset=binary` -> `application/pdf`.
fn media_type(value: &str) -> Option<String> {
    let essence = value.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

/// Parse an RFC 1123 `Last-Modified` value.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
