//! Run orchestration for CouncilWatch.
//!
//! This crate ties sources, storage and the extraction toolchain together into
//! the two scheduled runs: the meeting crawl ([`Crawler`]) and the external
//! document pipeline ([`DocumentPipeline`]). Both share one [`RateLimiter`].

pub mod crawl;
pub mod documents;
pub mod freshness;
pub mod limiter;
pub mod progress;

#[cfg(test)]
mod test_support;

pub use crawl::{CrawlStats, Crawler, sources_from_config};
pub use documents::{DocumentPipeline, DocumentStats};
pub use freshness::FreshnessPolicy;
pub use limiter::RateLimiter;
pub use progress::{ProgressReporter, SilentProgress};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSource, FakeTools, agenda, fast_limiter, meeting, test_storage, today};
    use councilwatch_shared::{AppConfig, CrawlConfig, DocumentsConfig};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn crawl_then_documents_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/3001"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(&b"%PDF-1.4 minutes"[..], "application/pdf"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let doc_url = format!("{}/media/3001", server.uri());

        let source = FakeSource::default()
            .page("", vec![meeting("rc-1", today(), Some("https://city/rc-1"))], "")
            .agenda(
                "https://city/rc-1",
                agenda("<p>Item 1: <a href=\"x\">Report</a></p>", &[&doc_url]),
            );

        let app = AppConfig::default();
        let limiter = fast_limiter();
        let storage = test_storage().await;
        let cancel = CancellationToken::new();

        let crawler = Crawler::new(vec![Box::new(source)], limiter.clone(), CrawlConfig::from(&app));
        let mut rng = StdRng::seed_from_u64(5);
        crawler
            .run(&storage, &mut rng, &cancel, &SilentProgress)
            .await
            .unwrap();

        let after_crawl = storage.stats().await.unwrap();
        assert_eq!(after_crawl.meetings, 1);
        assert_eq!(after_crawl.meeting_versions, 1);
        assert_eq!(after_crawl.agenda_contents, 1);
        assert_eq!(after_crawl.document_urls, 1);
        assert_eq!(after_crawl.document_backlog, 1);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let pipeline = DocumentPipeline::new(
            client,
            Box::new(FakeTools::with_text("Minutes of Regional Council")),
            limiter,
            DocumentsConfig::from(&app),
        );
        pipeline.run(&storage, &cancel, &SilentProgress).await.unwrap();

        let after_docs = storage.stats().await.unwrap();
        assert_eq!(after_docs.external_contents, 1);
        assert_eq!(after_docs.document_backlog, 0);
        assert_eq!(after_docs.document_errors, 0);

        let record = storage.document_url(&doc_url).await.unwrap().unwrap();
        assert!(record.fetched.is_some());
        assert!(record.error.is_none());
        let doc = storage
            .external_content(record.content_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.text, "Minutes of Regional Council");

        let citing = storage.meetings_citing(&doc_url).await.unwrap();
        assert_eq!(citing.len(), 1);
        assert_eq!(citing[0].meeting.id, "rc-1");

        let runs = storage.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.finished_at.is_some()));
    }
}
