//! Core pipeline orchestration and domain logic for Firmscope.
//!
//! This crate ties together source fetching, corpus aggregation, model-backed
//! extraction and row flattening into the batch workflow driven by
//! [`run_job`], plus [`replay_dump`] for re-extracting stored corpora.

pub mod aggregator;
pub mod extraction;
pub mod inference;
pub mod input;
pub mod pipeline;
pub mod replay;
pub mod rows;

pub use aggregator::{Corpus, CorpusAggregator, render_corpus};
pub use extraction::{
    Extraction, ExtractionEngine, ExtractionOutcome, ExtractionStage, build_prompt,
    fallback_record, parse_response, validate_record,
};
pub use inference::{InferenceClient, InferenceError, OllamaCli};
pub use input::load_companies;
pub use pipeline::{
    CompanyOutcome, CompanyPipeline, ProgressReporter, RunSummary, SilentProgress,
    build_pipeline, default_output_path, run_job,
};
pub use replay::replay_dump;
pub use rows::{transform, transform_at};
