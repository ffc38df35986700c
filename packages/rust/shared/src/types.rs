//! Core domain types for CouncilWatch.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

// ---------------------------------------------------------------------------
// ContentId
// ---------------------------------------------------------------------------

/// Content address of a byte sequence: SHA-224, base64url without padding.
///
/// Agenda bodies and fetched documents share this encoding so the same bytes
/// always collapse to one row regardless of where they were found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Hash `bytes` into a content ID.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Sha224::digest(bytes).as_slice())
    }

    /// Encode an already computed SHA-224 digest (used when hashing a stream).
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Wrap an ID read back from storage.
    pub fn from_stored(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Meeting
// ---------------------------------------------------------------------------

/// A meeting as listed by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    /// Stable identity, see [`canonical_meeting_id`].
    pub id: String,
    /// Meeting type (committee or council name).
    pub kind: String,
    /// Scheduled date.
    pub date: NaiveDate,
    /// Free-text schedule note ("Cancelled", "Special meeting", ...).
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl Meeting {
    /// Short human label used in logs and error context.
    pub fn label(&self) -> String {
        format!("date={} type={}", self.date.format("%Y-%m-%d"), self.kind)
    }
}

/// One page of a source listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Meetings on this page, newest first.
    pub meetings: Vec<Meeting>,
    /// Opaque token for the next page; empty on the final page.
    pub next_token: String,
}

/// A fetched agenda body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Agenda {
    /// Canonicalized HTML of the agenda body (anchors resolved to absolute URLs).
    pub html: String,
    /// Plain-text rendering of `html`.
    pub text: String,
    /// External document URLs linked from the body, in document order, deduplicated.
    pub document_urls: Vec<String>,
}

/// Derive a meeting's stable ID from its agenda URL.
///
/// Scheme, a leading `www.`, the first matching prefix and surrounding slashes are
/// removed, so `https://www.example.ca/city-hall/x` and `http://example.ca/city-hallx`
/// (a known upstream typo) both become `x` given the prefix `example.ca/city-hall`.
pub fn canonical_meeting_id(agenda_url: &str, prefixes: &[String]) -> String {
    let mut id = agenda_url.trim();
    id = id.split('#').next().unwrap_or(id);
    for scheme in ["https://", "http://"] {
        if let Some(rest) = id.strip_prefix(scheme) {
            id = rest;
            break;
        }
    }
    id = id.strip_prefix("www.").unwrap_or(id);
    for prefix in prefixes {
        let prefix = prefix.trim_end_matches('/');
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest;
            break;
        }
    }
    id.trim_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// External documents
// ---------------------------------------------------------------------------

/// Decides which agenda hyperlinks are external documents worth fetching.
///
/// One policy is shared by every source: a URL qualifies when it contains any
/// configured pattern.
#[derive(Debug, Clone, Default)]
pub struct DocumentLinkPolicy {
    patterns: Vec<String>,
}

impl DocumentLinkPolicy {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `url` (absolute) points at an external document.
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// Keep matching URLs, first occurrence wins.
    pub fn select<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for url in urls {
            if self.matches(url) && !out.iter().any(|u| u == url) {
                out.push(url.to_string());
            }
        }
        out
    }
}

/// HTTP metadata captured when fetching an external document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchMeta {
    /// Declared media type without parameters, lowercased.
    pub content_type: Option<String>,
    /// Number of body bytes read.
    pub size: Option<i64>,
    /// Parsed `Last-Modified` header.
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Title and text extracted from an external document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub title: String,
    pub text: String,
}
