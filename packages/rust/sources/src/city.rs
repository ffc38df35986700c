//! City website meeting listing.
//!
//! The listing is an HTML table paginated by a "next" link. The pagination
//! token is the absolute URL of the next page.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use councilwatch_shared::{
    Agenda, CitySourceConfig, CouncilWatchError, DocumentLinkPolicy, ListPage, Meeting, Result,
    canonical_meeting_id,
};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::{Source, fetch_text, render};

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("valid selector"));
    };
}

selector!(LISTING_TABLE, r#"table[id^="meetings_listings"]"#);
selector!(ROW, "tbody > tr");
selector!(DATE, "td:nth-child(1) time");
selector!(NOTE, "td:nth-child(1) strong");
selector!(KIND, "td:nth-child(2)");
selector!(AGENDA_LINK, "td:nth-child(3) a");
selector!(MINUTES_LINK, "td:nth-child(4) a");
selector!(VIDEO_LINK, "td:nth-child(5) a");
selector!(
    NEXT_PAGE,
    "#block-views-block-meetings-listings-block-1 li.pager__item.pager__item--next > a"
);
selector!(AGENDA_BODY, "#block-halifax-content > div > article > div");

/// Listing dates look like `January 5, 2026`.
const DATE_FORMAT: &str = "%B %d, %Y";

/// The city website's meeting listing.
pub struct CitySource {
    client: Client,
    listing_url: Url,
    id_prefixes: Vec<String>,
    policy: DocumentLinkPolicy,
}

impl CitySource {
    pub fn new(client: Client, config: &CitySourceConfig, policy: DocumentLinkPolicy) -> Result<Self> {
        let listing_url = Url::parse(&config.listing_url).map_err(|e| {
            CouncilWatchError::config(format!("invalid listing_url {:?}: {e}", config.listing_url))
        })?;
        Ok(Self {
            client,
            listing_url,
            id_prefixes: config.id_prefixes.clone(),
            policy,
        })
    }
}

#[async_trait]
impl Source for CitySource {
    fn name(&self) -> &str {
        "city"
    }

    async fn list(&self, token: &str) -> Result<ListPage> {
        let page_url = if token.is_empty() {
            self.listing_url.clone()
        } else {
            Url::parse(token)
                .map_err(|e| CouncilWatchError::parse(format!("bad page token {token:?}: {e}")))?
        };

        let body = fetch_text(&self.client, page_url.as_str()).await?;
        let page = parse_listing(&body, &page_url, &self.id_prefixes)?;
        debug!(
            url = %page_url,
            meetings = page.meetings.len(),
            has_next = !page.next_token.is_empty(),
            "listing page parsed"
        );
        Ok(page)
    }

    async fn agenda(&self, url: &str) -> Result<Agenda> {
        let base = Url::parse(url)
            .map_err(|e| CouncilWatchError::parse(format!("bad agenda URL {url:?}: {e}")))?;
        let body = fetch_text(&self.client, url).await?;

        let doc = Html::parse_document(&body);
        let content = doc
            .select(&AGENDA_BODY)
            .next()
            .map(|el| el.inner_html())
            .filter(|html| !html.trim().is_empty())
            .ok_or_else(|| CouncilWatchError::parse(format!("url={url} did not find content")))?;

        render::build_agenda(&content, &base, &self.policy)
    }
}

/// Parse one listing page.
pub(crate) fn parse_listing(html: &str, page_url: &Url, id_prefixes: &[String]) -> Result<ListPage> {
    let doc = Html::parse_document(html);
    let table = doc.select(&LISTING_TABLE).next().ok_or_else(|| {
        CouncilWatchError::parse(format!("url={page_url} unable to find meetings_listings table"))
    })?;

    let mut meetings = Vec::new();
    for row in table.select(&ROW) {
        let date_text = cell_text(&row, &DATE);
        let date = NaiveDate::parse_from_str(&date_text, DATE_FORMAT).map_err(|_| {
            CouncilWatchError::parse(format!("bad meeting date format: {date_text:?}"))
        })?;

        let agenda_url = cell_link(&row, &AGENDA_LINK, page_url);
        let id = canonical_meeting_id(agenda_url.as_deref().unwrap_or(""), id_prefixes);

        meetings.push(Meeting {
            id,
            kind: cell_text(&row, &KIND),
            date,
            note: cell_text(&row, &NOTE),
            agenda_url,
            minutes_url: cell_link(&row, &MINUTES_LINK, page_url),
            video_url: cell_link(&row, &VIDEO_LINK, page_url),
        });
    }

    let next_token = doc
        .select(&NEXT_PAGE)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve(page_url, href))
        .unwrap_or_default();

    Ok(ListPage {
        meetings,
        next_token,
    })
}

/// Whitespace-normalized text of the first match.
fn cell_text(row: &ElementRef, selector: &Selector) -> String {
    row.select(selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_link(row: &ElementRef, selector: &Selector, base: &Url) -> Option<String> {
    row.select(selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve(base, href))
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(String::from)
}
