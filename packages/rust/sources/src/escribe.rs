//! eScribe meeting calendar.
//!
//! The calendar is a single JSON endpoint covering a date window, so there is
//! exactly one listing page.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate, Utc};
use councilwatch_shared::{
    Agenda, CouncilWatchError, DocumentLinkPolicy, EscribeSourceConfig, ListPage, Meeting, Result,
    canonical_meeting_id,
};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{Source, fetch_text, render};

static AGENDA_ITEMS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".AgendaItems").expect("valid selector"));
static ICON_CHROME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#".AgendaItemIcons, img[title="Attachments"]"#).expect("valid selector")
});
static SCRIPT_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href^="javascript:"]"#).expect("valid selector"));

const CALENDAR_PATH: &str = "/MeetingsCalendarView.aspx/GetAllMeetings";

/// The eScribe meeting calendar.
pub struct EscribeSource {
    client: Client,
    base_url: Url,
    window_months: u32,
    policy: DocumentLinkPolicy,
}

impl EscribeSource {
    pub fn new(
        client: Client,
        config: &EscribeSourceConfig,
        policy: DocumentLinkPolicy,
    ) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            CouncilWatchError::config(format!("invalid escribe base_url {:?}: {e}", config.base_url))
        })?;
        Ok(Self {
            client,
            base_url,
            window_months: config.window_months,
            policy,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarRequest {
    calendar_start_date: DateTime<Utc>,
    calendar_end_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    #[serde(default)]
    d: Vec<CalendarMeeting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CalendarMeeting {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    meeting_type: String,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    meeting_document_link: Vec<DocumentLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentLink {
    #[serde(default, rename = "Type")]
    kind: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "Url")]
    url: String,
}

#[async_trait]
impl Source for EscribeSource {
    fn name(&self) -> &str {
        "escribe"
    }

    async fn list(&self, token: &str) -> Result<ListPage> {
        if !token.is_empty() {
            return Err(CouncilWatchError::validation(
                "escribe does not support pagination",
            ));
        }

        let now = Utc::now();
        let window = Months::new(self.window_months);
        let request = CalendarRequest {
            calendar_start_date: now.checked_sub_months(window).unwrap_or(now),
            calendar_end_date: now.checked_add_months(window).unwrap_or(now),
        };

        let url = self
            .base_url
            .join(CALENDAR_PATH)
            .map_err(|e| CouncilWatchError::config(format!("bad escribe base URL: {e}")))?;

        let response = self
            .client
            .post(url.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| CouncilWatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CouncilWatchError::Network(format!("{url}: body read failed: {e}")))?;
        if status != StatusCode::OK {
            return Err(CouncilWatchError::Network(format!(
                "{url}: HTTP {status}: {body}"
            )));
        }

        let meetings = parse_calendar(&body, &self.base_url)?;
        debug!(%url, meetings = meetings.len(), "calendar parsed");
        Ok(ListPage {
            meetings,
            next_token: String::new(),
        })
    }

    async fn agenda(&self, url: &str) -> Result<Agenda> {
        let base = Url::parse(url)
            .map_err(|e| CouncilWatchError::parse(format!("bad agenda URL {url:?}: {e}")))?;
        let body = fetch_text(&self.client, url).await?;

        let doc = Html::parse_document(&body);
        let content = doc
            .select(&AGENDA_ITEMS)
            .next()
            .map(|el| el.inner_html())
            .filter(|html| !html.trim().is_empty())
            .ok_or_else(|| CouncilWatchError::parse(format!("url={url} did not find content")))?;

        let content = render::remove_elements(&content, &ICON_CHROME);
        let content = render::unwrap_elements(&content, &SCRIPT_LINKS);

        render::build_agenda(&content, &base, &self.policy)
    }
}

/// Parse the calendar response into meetings, newest first.
pub(crate) fn parse_calendar(body: &str, base: &Url) -> Result<Vec<Meeting>> {
    let response: CalendarResponse = serde_json::from_str(body)
        .map_err(|e| CouncilWatchError::parse(format!("calendar response: {e}")))?;

    let mut meetings = Vec::new();
    for entry in response.d {
        let (day, _) = entry
            .start_date
            .split_once(' ')
            .ok_or_else(|| CouncilWatchError::parse(format!("bad start date {:?}", entry.start_date)))?;
        let date = NaiveDate::parse_from_str(day, "%Y/%m/%d")
            .map_err(|e| CouncilWatchError::parse(format!("bad date {day:?}: {e}")))?;

        let kind = match entry.meeting_type.as_str() {
            "Halifax Regional Council" => "Regional Council".to_string(),
            other => other.to_string(),
        };

        let mut agenda_url = None;
        let mut minutes_url = None;
        let mut video_url = None;
        for link in &entry.meeting_document_link {
            let resolved = || base.join(&link.url).ok().map(String::from);
            if link.kind == "Agenda" && link.format == "HTML" {
                agenda_url = resolved();
            } else if link.kind == "AdditionalDocuments"
                && link.format == ".pdf"
                && link.title.contains("Minutes")
            {
                minutes_url = resolved();
            } else if link.kind == "Video" {
                video_url = resolved();
            }
        }

        // e.g. "Budget Committee - Continuation" days carry no agenda of their own
        if agenda_url.is_none() && kind.contains("Continuation") {
            continue;
        }

        let id = match &agenda_url {
            Some(url) => canonical_meeting_id(url, &[]),
            None => entry.id,
        };

        meetings.push(Meeting {
            id,
            kind,
            date,
            note: String::new(),
            agenda_url,
            minutes_url,
            video_url,
        });
    }

    meetings.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(meetings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client;
    use crate::test_support::{load_fixture, policy};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base() -> Url {
        Url::parse("https://pub-halifax.escribemeetings.com").unwrap()
    }

    #[test]
    fn parses_calendar() {
        let body = load_fixture("json/escribe_meetings.json");
        let meetings = parse_calendar(&body, &base()).unwrap();

        // Continuation without agenda dropped
        assert_eq!(meetings.len(), 3);
        assert!(meetings.windows(2).all(|w| w[0].date >= w[1].date));

        let council = &meetings[0];
        assert_eq!(council.kind, "Regional Council");
        assert_eq!(council.date, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
        assert_eq!(
            council.agenda_url.as_deref(),
            Some("https://pub-halifax.escribemeetings.com/Meeting.aspx?Id=aaaa-1111&Agenda=Agenda&lang=English")
        );
        assert_eq!(
            council.id,
            "pub-halifax.escribemeetings.com/Meeting.aspx?Id=aaaa-1111&Agenda=Agenda&lang=English"
        );
        assert_eq!(
            council.video_url.as_deref(),
            Some("https://pub-halifax.escribemeetings.com/Players/ISIStandAlonePlayer.aspx?Id=aaaa-1111")
        );

        let committee = meetings
            .iter()
            .find(|m| m.kind == "Community Planning and Economic Development Standing Committee")
            .unwrap();
        assert_eq!(
            committee.minutes_url.as_deref(),
            Some("https://pub-halifax.escribemeetings.com/filestream.ashx?DocumentId=4242")
        );

        // No agenda, not a continuation: kept with its calendar ID
        let future = meetings.iter().find(|m| m.agenda_url.is_none()).unwrap();
        assert_eq!(future.id, "cccc-3333");
    }

    #[test]
    fn bad_start_date_is_an_error() {
        let body = r#"{"d":[{"ID":"x","MeetingType":"Regional Council","StartDate":"2026-02-10"}]}"#;
        assert!(parse_calendar(body, &base()).is_err());
    }

    #[tokio::test]
    async fn rejects_pagination_token() {
        let source = EscribeSource::new(
            http_client(Duration::from_secs(5)).unwrap(),
            &EscribeSourceConfig::default(),
            policy(),
        )
        .unwrap();
        assert!(source.list("page-2").await.is_err());
    }

    #[tokio::test]
    async fn lists_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CALENDAR_PATH))
            .and(body_string_contains("calendarStartDate"))
            .and(body_string_contains("calendarEndDate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(load_fixture("json/escribe_meetings.json")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = EscribeSourceConfig {
            base_url: server.uri(),
            ..EscribeSourceConfig::default()
        };
        let source =
            EscribeSource::new(http_client(Duration::from_secs(5)).unwrap(), &config, policy())
                .unwrap();
        let page = source.list("").await.unwrap();
        assert_eq!(page.meetings.len(), 3);
        assert!(page.next_token.is_empty());
        assert!(
            page.meetings[0]
                .agenda_url
                .as_deref()
                .unwrap()
                .starts_with(&server.uri())
        );
    }

    #[tokio::test]
    async fn agenda_strips_chrome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Meeting.aspx"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(load_fixture("html/escribe_agenda.html")),
            )
            .mount(&server)
            .await;

        let source = EscribeSource::new(
            http_client(Duration::from_secs(5)).unwrap(),
            &EscribeSourceConfig {
                base_url: server.uri(),
                ..EscribeSourceConfig::default()
            },
            policy(),
        )
        .unwrap();

        let agenda = source
            .agenda(&format!("{}/Meeting.aspx?Id=aaaa-1111&Agenda=Agenda", server.uri()))
            .await
            .unwrap();

        assert!(agenda.html.contains("Call to Order"));
        assert!(!agenda.html.contains("AgendaItemIcons"));
        assert!(!agenda.html.contains("attachment.svg"));
        assert!(!agenda.html.contains("javascript:"));
        assert!(agenda.html.contains("Information Report"));
        assert_eq!(
            agenda.document_urls,
            vec![
                format!("{}/filestream.ashx?DocumentId=5001", server.uri()),
                format!("{}/filestream.ashx?DocumentId=5002", server.uri()),
            ]
        );
    }
}
