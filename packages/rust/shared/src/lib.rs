//! Shared types, error model, and configuration for Firmscope.
//!
//! This crate is the foundation depended on by all other Firmscope crates.
//! It provides:
//! - [`FirmscopeError`]: the unified error type
//! - Domain types ([`CompanyQuery`], [`SourceResult`], [`ExtractedRecord`], [`OutputRow`])
//! - Configuration ([`AppConfig`], [`JobConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, CorpusConfig, DefaultsConfig, HttpConfig, InferenceConfig,
    JobConfig, SourcesConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{FirmscopeError, Result};
pub use types::{
    CompanyQuery, ContactRecord, ExtractedRecord, LocationRecord, Mapping, OUTPUT_FIELDS,
    OutputRow, RunContext, RunId, SourceName, SourceResult,
};
