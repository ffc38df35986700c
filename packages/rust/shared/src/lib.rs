//! Shared types, error model, and configuration for CouncilWatch.
//!
//! This crate is the foundation depended on by all other CouncilWatch crates.
//! It provides:
//! - [`CouncilWatchError`] — the unified error type
//! - Domain types ([`Meeting`], [`Agenda`], [`ContentId`], [`DocumentLinkPolicy`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], [`DocumentsConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CitySourceConfig, CrawlConfig, CrawlSection, DatabaseConfig, DocumentsConfig,
    DocumentsSection, EscribeSourceConfig, SourcesConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{CouncilWatchError, Result};
pub use types::{
    Agenda, ContentId, DocumentLinkPolicy, ExtractedDocument, FetchMeta, ListPage, Meeting,
    canonical_meeting_id,
};
