//! Re-fetch scheduling for known meetings.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use councilwatch_shared::CrawlConfig;
use rand::Rng;

/// Decides whether a known meeting can be skipped this run.
///
/// Meetings dated near today are re-checked roughly every run (the run cadence
/// is about hourly). Older meetings are re-checked about once a day, with
/// symmetric random jitter so a large backlog of old meetings spreads across
/// runs instead of coming due together.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    pub recent_window: Duration,
    pub recent_threshold: Duration,
    pub stale_threshold: Duration,
    pub jitter: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            recent_window: Duration::days(7),
            recent_threshold: Duration::minutes(58),
            stale_threshold: Duration::hours(24),
            jitter: Duration::minutes(60),
        }
    }
}

impl From<&CrawlConfig> for FreshnessPolicy {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            recent_window: config.recent_window,
            recent_threshold: config.recent_threshold,
            stale_threshold: config.stale_threshold,
            jitter: config.jitter,
        }
    }
}

impl FreshnessPolicy {
    /// Minimum time between two fetches of a meeting held on `date`.
    pub fn threshold<R: Rng + ?Sized>(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Duration {
        let distance = (date - now.date_naive()).abs();
        if distance <= self.recent_window {
            return self.recent_threshold;
        }

        let spread = self.jitter.num_seconds().abs();
        if spread == 0 {
            return self.stale_threshold;
        }
        self.stale_threshold + Duration::seconds(rng.random_range(-spread..=spread))
    }

    /// A meeting is fresh when it was observed less than one threshold ago.
    /// Never-observed meetings are never fresh.
    pub fn is_fresh<R: Rng + ?Sized>(
        &self,
        last_observed: Option<DateTime<Utc>>,
        date: NaiveDate,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> bool {
        match last_observed {
            None => false,
            Some(last) => now - last < self.threshold(date, now, rng),
        }
    }
}
