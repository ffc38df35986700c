//! Crawl orchestration: list every source, schedule stale meetings, save agendas.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Months, NaiveDate, Utc};
use councilwatch_shared::{AppConfig, CouncilWatchError, CrawlConfig, Meeting, Result};
use councilwatch_sources::{CitySource, EscribeSource, Source};
use councilwatch_storage::Storage;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::freshness::FreshnessPolicy;
use crate::limiter::{RateLimiter, cancellable};
use crate::progress::ProgressReporter;

/// Counters recorded in the run history when a crawl completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub sources: Vec<String>,
    pub cutoff: Option<NaiveDate>,
    /// Meetings at or after the cutoff seen across all listings.
    pub listed: usize,
    pub skipped_fresh: usize,
    pub queued: usize,
    pub saved: usize,
    pub new_versions: usize,
    pub new_contents: usize,
    pub new_document_urls: usize,
}

/// Build the enabled sources from configuration.
pub fn sources_from_config(config: &AppConfig, client: Client) -> Result<Vec<Box<dyn Source>>> {
    let policy = config.document_policy();
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    if config.sources.city.enabled {
        sources.push(Box::new(CitySource::new(
            client.clone(),
            &config.sources.city,
            policy.clone(),
        )?));
    }
    if config.sources.escribe.enabled {
        sources.push(Box::new(EscribeSource::new(
            client,
            &config.sources.escribe,
            policy,
        )?));
    }
    if sources.is_empty() {
        return Err(CouncilWatchError::config("no sources are enabled"));
    }
    Ok(sources)
}

/// Walks each source's listing newest-first and saves every meeting whose
/// agenda is due for a re-check.
pub struct Crawler {
    sources: Vec<Box<dyn Source>>,
    limiter: Arc<RateLimiter>,
    config: CrawlConfig,
    freshness: FreshnessPolicy,
}

impl Crawler {
    pub fn new(sources: Vec<Box<dyn Source>>, limiter: Arc<RateLimiter>, config: CrawlConfig) -> Self {
        let freshness = FreshnessPolicy::from(&config);
        Self {
            sources,
            limiter,
            config,
            freshness,
        }
    }

    /// Run one crawl.
    ///
    /// Any listing or meeting failure aborts the run; the run row is then
    /// left unfinished. Everything saved before the failure stays committed.
    #[instrument(skip_all, fields(sources = self.sources.len()))]
    pub async fn run<R: Rng + Send>(
        &self,
        storage: &Storage,
        rng: &mut R,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<CrawlStats> {
        let run_id = storage.start_run("crawl").await?;
        let now = Utc::now();
        let cutoff = self.cutoff(storage.max_observed().await?, now);
        info!(%run_id, %cutoff, "starting crawl");

        let mut stats = CrawlStats {
            sources: self.sources.iter().map(|s| s.name().to_string()).collect(),
            cutoff: Some(cutoff),
            ..CrawlStats::default()
        };

        // --- Listing ---
        let mut queue: Vec<(&dyn Source, Meeting)> = Vec::new();
        for source in &self.sources {
            progress.phase(&format!("Listing {}", source.name()));
            let due = self
                .list_source(source.as_ref(), storage, cutoff, now, rng, cancel, &mut stats)
                .await?;
            queue.extend(due.into_iter().map(|m| (source.as_ref(), m)));
        }
        stats.queued = queue.len();
        info!(
            listed = stats.listed,
            fresh = stats.skipped_fresh,
            queued = stats.queued,
            "listing complete"
        );

        // --- Processing ---
        progress.phase("Fetching agendas");
        let total = queue.len();
        for (i, (source, meeting)) in queue.iter().enumerate() {
            self.process_meeting(*source, meeting, storage, cancel, &mut stats)
                .await
                .map_err(|e| e.context(format!("processing meeting {}", meeting.label())))?;

            progress.item_done(&meeting.label(), i + 1, total);
            if (i + 1) % self.config.progress_interval == 0 {
                info!(done = i + 1, total, "crawl progress");
            }
        }

        let stats_json = serde_json::to_string(&stats)
            .map_err(|e| CouncilWatchError::Storage(format!("serialize crawl stats: {e}")))?;
        storage.finish_run(&run_id, &stats_json).await?;

        info!(
            saved = stats.saved,
            new_versions = stats.new_versions,
            new_contents = stats.new_contents,
            new_document_urls = stats.new_document_urls,
            "crawl complete"
        );
        progress.finish(&format!(
            "{} meetings saved, {} new versions, {} new documents",
            stats.saved, stats.new_versions, stats.new_document_urls
        ));
        Ok(stats)
    }

    /// Oldest meeting date still considered: the newest observation minus the
    /// lookback, or a short initial window for an empty store.
    pub(crate) fn cutoff(&self, max_observed: Option<DateTime<Utc>>, now: DateTime<Utc>) -> NaiveDate {
        let (from, months) = match max_observed {
            Some(observed) => (observed, self.config.lookback_months),
            None => (now, self.config.initial_lookback_months),
        };
        from.checked_sub_months(Months::new(months))
            .unwrap_or(from)
            .date_naive()
    }

    /// Paginate one source and return the meetings due for a fetch.
    #[allow(clippy::too_many_arguments)]
    async fn list_source<R: Rng + Send>(
        &self,
        source: &dyn Source,
        storage: &Storage,
        cutoff: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
        cancel: &CancellationToken,
        stats: &mut CrawlStats,
    ) -> Result<Vec<Meeting>> {
        let name = source.name().to_string();
        let mut seen: HashSet<String> = HashSet::new();
        let mut token = String::new();
        let mut due = Vec::new();

        loop {
            if !seen.insert(token.clone()) {
                warn!(source = %name, %token, "pagination token repeated, ending listing");
                break;
            }

            self.limiter.acquire(cancel).await?;
            let page = cancellable(cancel, source.list(&token))
                .await
                .map_err(|e| e.context(format!("listing {name}")))?;
            debug!(source = %name, %token, meetings = page.meetings.len(), "listing page");

            let mut past_cutoff = false;
            for meeting in page.meetings {
                if meeting.date < cutoff {
                    past_cutoff = true;
                    break;
                }
                stats.listed += 1;

                let last = storage.last_observed(&meeting.id).await?;
                if self.freshness.is_fresh(last, meeting.date, now, rng) {
                    stats.skipped_fresh += 1;
                    continue;
                }
                due.push(meeting);
            }

            if past_cutoff || page.next_token.is_empty() {
                break;
            }
            token = page.next_token;
        }

        info!(source = %name, pages = seen.len(), due = due.len(), "source listed");
        Ok(due)
    }

    async fn process_meeting(
        &self,
        source: &dyn Source,
        meeting: &Meeting,
        storage: &Storage,
        cancel: &CancellationToken,
        stats: &mut CrawlStats,
    ) -> Result<()> {
        let url = meeting
            .agenda_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CouncilWatchError::validation("no agenda URL"))?;

        self.limiter.acquire(cancel).await?;
        let agenda = cancellable(cancel, source.agenda(url)).await?;

        let outcome = storage.save_meeting(meeting, &agenda, Utc::now()).await?;
        stats.saved += 1;
        stats.new_versions += usize::from(outcome.new_version);
        stats.new_contents += usize::from(outcome.new_content);
        stats.new_document_urls += outcome.new_document_urls;
        Ok(())
    }
}
