//! Upstream meeting sources.
//!
//! This crate provides:
//! - [`Source`] — the listing/agenda capability every upstream system implements
//! - [`CitySource`] — the city website's paginated meeting listing
//! - [`EscribeSource`] — the eScribe meeting calendar
//! - [`render`] — agenda HTML canonicalization and text rendering

mod city;
mod escribe;
pub mod render;

use std::time::Duration;

use async_trait::async_trait;
use councilwatch_shared::{Agenda, CouncilWatchError, ListPage, Result};
use reqwest::{Client, StatusCode};

pub use city::CitySource;
pub use escribe::EscribeSource;

/// User-Agent string for every outbound request.
pub const USER_AGENT: &str = concat!("CouncilWatch/", env!("CARGO_PKG_VERSION"));

/// An upstream system publishing meetings.
///
/// Listings are paginated by an opaque token: the first call passes `""` and
/// an empty `next_token` marks the final page. Meetings within a listing are
/// ordered newest first.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name for logs and run stats.
    fn name(&self) -> &str;

    /// Fetch one page of the listing.
    async fn list(&self, token: &str) -> Result<ListPage>;

    /// Fetch and normalize the agenda at `url`.
    async fn agenda(&self, url: &str) -> Result<Agenda>;
}

/// Build the HTTP client shared by sources and the document pipeline.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| CouncilWatchError::Network(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and return its body. Anything but `200 OK` is an error.
pub(crate) async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    tracing::debug!(%url, "fetching");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CouncilWatchError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(CouncilWatchError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| CouncilWatchError::Network(format!("{url}: body read failed: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use councilwatch_shared::DocumentLinkPolicy;

    pub(crate) fn load_fixture(path: &str) -> String {
        let path = format!("../../../fixtures/{path}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    pub(crate) fn policy() -> DocumentLinkPolicy {
        DocumentLinkPolicy::new([
            "halifax.ca/media",
            "cdn.halifax.ca",
            "/filestream.ashx",
        ])
    }
}
