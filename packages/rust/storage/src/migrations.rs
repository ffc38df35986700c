//! SQL migration definitions for the CouncilWatch database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: meetings, versions, content stores, document backlog, runs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Agenda bodies, keyed by hash of the canonical HTML
CREATE TABLE IF NOT EXISTS agenda_content (
    id   TEXT PRIMARY KEY,
    html TEXT NOT NULL,
    text TEXT NOT NULL
);

-- Current state of each meeting
CREATE TABLE IF NOT EXISTS meetings (
    id                TEXT PRIMARY KEY,
    kind              TEXT NOT NULL,
    date              TEXT NOT NULL,
    note              TEXT NOT NULL DEFAULT '',
    agenda_url        TEXT,
    minutes_url       TEXT,
    video_url         TEXT,
    agenda_content_id TEXT REFERENCES agenda_content(id),
    last_observed     TEXT,
    last_updated      TEXT
);

CREATE INDEX IF NOT EXISTS idx_meetings_agenda_content ON meetings(agenda_content_id);
CREATE INDEX IF NOT EXISTS idx_meetings_date ON meetings(date);

-- Append-only snapshots. Absent URLs are '' since NULLs never collide in UNIQUE.
CREATE TABLE IF NOT EXISTS meeting_versions (
    meeting_id        TEXT NOT NULL REFERENCES meetings(id),
    observed          TEXT NOT NULL,
    note              TEXT NOT NULL DEFAULT '',
    agenda_url        TEXT NOT NULL DEFAULT '',
    minutes_url       TEXT NOT NULL DEFAULT '',
    video_url         TEXT NOT NULL DEFAULT '',
    agenda_content_id TEXT NOT NULL REFERENCES agenda_content(id),
    UNIQUE(meeting_id, note, agenda_url, minutes_url, video_url, agenda_content_id)
);

CREATE INDEX IF NOT EXISTS idx_meeting_versions_observed ON meeting_versions(observed);

-- Fetched documents, keyed by hash of the raw bytes
CREATE TABLE IF NOT EXISTS external_content (
    id    TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    text  TEXT NOT NULL DEFAULT ''
);

-- Discovered document URLs; terminal once `fetched` is set
CREATE TABLE IF NOT EXISTS external_content_urls (
    url                 TEXT PRIMARY KEY,
    added               TEXT NOT NULL,
    fetched             TEXT,
    content_type        TEXT,
    size                INTEGER,
    last_modified       TEXT,
    etag                TEXT,
    error               TEXT,
    external_content_id TEXT REFERENCES external_content(id)
);

CREATE INDEX IF NOT EXISTS idx_external_content_urls_backlog
    ON external_content_urls(added) WHERE fetched IS NULL;

-- Which meetings (and which agenda revision) cite which document
CREATE TABLE IF NOT EXISTS meeting_external_links (
    meeting_id        TEXT NOT NULL REFERENCES meetings(id),
    agenda_content_id TEXT NOT NULL REFERENCES agenda_content(id),
    url               TEXT NOT NULL REFERENCES external_content_urls(url),
    PRIMARY KEY (meeting_id, agenda_content_id, url)
);

CREATE INDEX IF NOT EXISTS idx_meeting_external_links_url ON meeting_external_links(url);

-- Crawl and document run history
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Full-text mirrors, written once per content row
CREATE VIRTUAL TABLE IF NOT EXISTS agenda_content_search USING fts5(
    text,
    content=agenda_content
);

CREATE VIRTUAL TABLE IF NOT EXISTS external_content_search USING fts5(
    title,
    text,
    content=external_content
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
