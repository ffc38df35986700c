//! Scripted sources and tools shared by the core tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use councilwatch_extract::DocumentTools;
use councilwatch_shared::{Agenda, CouncilWatchError, ListPage, Meeting, Result};
use councilwatch_sources::Source;
use councilwatch_storage::Storage;
use uuid::Uuid;

use crate::limiter::RateLimiter;

pub(crate) async fn test_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("cw_test_{}.db", Uuid::now_v7()));
    Storage::open(&tmp).await.expect("open test db")
}

/// A limiter that never makes tests wait.
pub(crate) fn fast_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(10_000.0, 100))
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn meeting(id: &str, date: NaiveDate, agenda_url: Option<&str>) -> Meeting {
    Meeting {
        id: id.into(),
        kind: "Regional Council".into(),
        date,
        note: String::new(),
        agenda_url: agenda_url.map(String::from),
        minutes_url: None,
        video_url: None,
    }
}

pub(crate) fn agenda(html: &str, document_urls: &[&str]) -> Agenda {
    Agenda {
        html: html.into(),
        text: html.into(),
        document_urls: document_urls.iter().map(|u| u.to_string()).collect(),
    }
}

/// Listing pages keyed by token and agendas keyed by URL. Every call is
/// appended to a shared log so tests can inspect it after the source is boxed.
#[derive(Default)]
pub(crate) struct FakeSource {
    pub pages: HashMap<String, ListPage>,
    pub agendas: HashMap<String, Agenda>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub(crate) fn page(mut self, token: &str, meetings: Vec<Meeting>, next: &str) -> Self {
        self.pages.insert(
            token.into(),
            ListPage {
                meetings,
                next_token: next.into(),
            },
        );
        self
    }

    pub(crate) fn agenda(mut self, url: &str, agenda: Agenda) -> Self {
        self.agendas.insert(url.into(), agenda);
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Source for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list(&self, token: &str) -> Result<ListPage> {
        self.calls.lock().unwrap().push(format!("list:{token}"));
        self.pages
            .get(token)
            .cloned()
            .ok_or_else(|| CouncilWatchError::Network(format!("listing page {token:?}: HTTP 500")))
    }

    async fn agenda(&self, url: &str) -> Result<Agenda> {
        self.calls.lock().unwrap().push(format!("agenda:{url}"));
        self.agendas
            .get(url)
            .cloned()
            .ok_or_else(|| CouncilWatchError::Network(format!("{url}: HTTP 404")))
    }
}

/// Extraction tools that return a fixed text layer.
#[derive(Clone, Default)]
pub(crate) struct FakeTools {
    pub text: String,
    pub title: String,
    pub unavailable: bool,
    pub fail: bool,
    pub extractions: Arc<AtomicUsize>,
}

impl FakeTools {
    pub(crate) fn with_text(text: &str) -> Self {
        Self {
            text: text.into(),
            title: "Staff Report | Halifax.ca".into(),
            ..Self::default()
        }
    }

    pub(crate) fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentTools for FakeTools {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(CouncilWatchError::ToolUnavailable {
                tool: "pdftotext".into(),
            });
        }
        Ok(())
    }

    async fn info_title(&self, _pdf: &Path) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn text_layer(&self, pdf: &Path) -> Result<String> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        assert!(pdf.exists(), "document must be on disk during extraction");
        if self.fail {
            return Err(CouncilWatchError::tool("pdftotext", "exit status: 1"));
        }
        Ok(self.text.clone())
    }

    async fn rasterize(&self, _pdf: &Path, _out_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn ocr(&self, _image: &Path) -> Result<String> {
        Ok(String::new())
    }
}
