//! HTTP transport and per-source fetchers.
//!
//! This crate provides:
//! - [`Transport`]: rate-limited, retrying fetch primitive with block detection
//! - [`SourceFetcher`]: the per-source capability, and one implementation per source
//! - [`SourceRegistry`]: the enabled fetchers in source order

pub mod client;
pub mod sources;
pub mod text;

pub use client::{
    FailureCause, FetchFailure, FetchedBody, Transport, backoff_delay, detect_block,
    url_with_query,
};
pub use sources::{
    DirectoryFetcher, FilingsFetcher, FundingFetcher, ProfessionalNetworkFetcher, SearchEngine,
    SearchFetcher, SearchHit, SourceFetcher, SourceRegistry, WebsiteFetcher, compact_name,
    is_known_source, parse_search_results,
};
pub use text::truncate_chars;
