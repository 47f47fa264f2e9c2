//! Batch orchestration: input → per-company pipeline → append-only output.
//!
//! Companies run in fixed-size batches. Within a batch a bounded pool of
//! worker tasks each runs aggregate → extract → transform for one company;
//! results are joined positionally and appended once per batch, after which
//! the checkpoint is advanced.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use firmscope_crawler::{SourceRegistry, Transport};
use firmscope_shared::{
    CompanyQuery, JobConfig, OUTPUT_FIELDS, OutputRow, Result, RunContext, RunId,
};
use firmscope_storage::{Checkpoint, IncrementalWriter};

use crate::aggregator::CorpusAggregator;
use crate::extraction::{self, ExtractionEngine, ExtractionOutcome, ExtractionStage};
use crate::inference::InferenceClient;
use crate::input::load_companies;
use crate::rows;

// ---------------------------------------------------------------------------
// Single company
// ---------------------------------------------------------------------------

/// What one company produced.
#[derive(Debug, Clone)]
pub struct CompanyOutcome {
    pub query: CompanyQuery,
    pub rows: Vec<OutputRow>,
    pub outcome: ExtractionOutcome,
    /// Sources that returned something (0 for replays of empty corpora).
    pub sources_present: usize,
}

impl CompanyOutcome {
    /// Fallback rows for a company whose worker never reported back.
    fn worker_failed(query: &CompanyQuery, cause: String) -> Self {
        let extraction = extraction::fallback(query, ExtractionStage::Worker, cause);
        Self {
            query: query.clone(),
            rows: rows::transform(&extraction.record),
            outcome: extraction.outcome,
            sources_present: 0,
        }
    }
}

/// Aggregate → extract → transform for one company.
#[derive(Debug, Clone)]
pub struct CompanyPipeline {
    aggregator: CorpusAggregator,
    engine: ExtractionEngine,
}

impl CompanyPipeline {
    pub fn new(aggregator: CorpusAggregator, engine: ExtractionEngine) -> Self {
        Self { aggregator, engine }
    }

    /// Run the full single-company pipeline. Never fails.
    pub async fn process(&self, query: &CompanyQuery) -> CompanyOutcome {
        let corpus = self.aggregator.gather(query).await;
        let extraction = self.engine.extract(query, &corpus.text).await;
        CompanyOutcome {
            query: query.clone(),
            rows: rows::transform(&extraction.record),
            outcome: extraction.outcome,
            sources_present: corpus.present(),
        }
    }
}

/// Wire the production pipeline for `job`: HTTP transport, every enabled
/// fetcher, corpus dumps under `job.debug_dir`, and `client` for inference.
pub fn build_pipeline(
    job: &JobConfig,
    ctx: &RunContext,
    client: Arc<dyn InferenceClient>,
) -> Result<CompanyPipeline> {
    let transport = Arc::new(Transport::new(&job.http)?);
    let registry = SourceRegistry::new(transport, &job.sources)?;
    info!(sources = ?registry.names(), "source registry ready");

    let aggregator = CorpusAggregator::new(
        registry,
        job.http.fetch_concurrency,
        job.corpus.clone(),
        Some(job.debug_dir.clone()),
        ctx.clone(),
    );
    let engine = ExtractionEngine::new(client, &job.inference, ctx.clone());
    Ok(CompanyPipeline::new(aggregator, engine))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the input is loaded and batches are planned.
    /// `remaining` counts companies in batches that will actually run.
    fn planned(&self, remaining: usize, total_batches: usize, skipped_batches: usize);
    /// Called for every company, in input order within its batch.
    fn company_done(&self, outcome: &CompanyOutcome);
    /// Called after a batch's rows are appended and checkpointed.
    fn batch_done(&self, batch: usize, total_batches: usize, rows: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn planned(&self, _remaining: usize, _total_batches: usize, _skipped_batches: usize) {}
    fn company_done(&self, _outcome: &CompanyOutcome) {}
    fn batch_done(&self, _batch: usize, _total_batches: usize, _rows: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Result of [`run_job`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    /// Companies loaded from the input (after `max_companies`).
    pub companies: usize,
    pub batches_run: usize,
    /// Batches skipped because a previous run completed them.
    pub batches_skipped: usize,
    /// Rows appended by this run.
    pub rows_written: u64,
    /// Companies that ended with the fallback record.
    pub fallbacks: usize,
    pub elapsed: Duration,
}

/// Run the whole job.
///
/// Fatal errors: unusable input, output initialization, checkpoint
/// mismatch, and failure to append or checkpoint a batch. Everything below
/// the company level degrades to fallback rows.
#[instrument(skip_all, fields(run_id = %ctx.run_id, input = %job.input.display()))]
pub async fn run_job(
    job: &JobConfig,
    pipeline: Arc<CompanyPipeline>,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();
    job.validate()?;

    progress.phase("Loading input");
    let companies = load_companies(&job.input, job.batch.max_companies)?;
    let batch_size = job.batch.batch_size;
    let total_batches = companies.len().div_ceil(batch_size);

    progress.phase("Preparing output");
    let (writer, resume_after, mut rows_total) = open_output(job)?;
    let skipped = resume_after.min(total_batches);
    let remaining = companies.len().saturating_sub(skipped * batch_size);
    progress.planned(remaining, total_batches, skipped);

    info!(
        companies = companies.len(),
        batch_size,
        total_batches,
        skipped,
        workers = job.batch.workers,
        "starting run"
    );

    let mut batches_run = 0;
    let mut rows_written = 0u64;
    let mut fallbacks = 0;

    for (index, chunk) in companies.chunks(batch_size).enumerate() {
        let batch = index + 1;
        if batch <= resume_after {
            continue;
        }
        if batches_run > 0 && !job.batch.batch_pause().is_zero() {
            tokio::time::sleep(job.batch.batch_pause()).await;
        }

        progress.phase(&format!("Batch {batch}/{total_batches}"));
        let outcomes = run_batch(chunk, &pipeline, job.batch.workers, progress).await;

        fallbacks += outcomes.iter().filter(|o| o.outcome.is_fallback()).count();
        let batch_rows: Vec<OutputRow> = outcomes.into_iter().flat_map(|o| o.rows).collect();
        let appended = writer.append(&batch_rows)? as u64;
        rows_written += appended;
        rows_total += appended;

        Checkpoint {
            input_path: job.input.clone(),
            batch_size,
            total_batches,
            last_completed_batch: batch,
            rows_written: rows_total,
            run_id: ctx.run_id,
            updated_at: Utc::now(),
        }
        .save(&job.output)?;

        batches_run += 1;
        info!(batch, total_batches, rows = appended, "batch complete");
        progress.batch_done(batch, total_batches, appended as usize);
    }

    let summary = RunSummary {
        run_id: ctx.run_id,
        companies: companies.len(),
        batches_run,
        batches_skipped: skipped,
        rows_written,
        fallbacks,
        elapsed: start.elapsed(),
    };

    info!(
        batches_run,
        rows_written,
        fallbacks,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);
    Ok(summary)
}

/// Open the output for this run. Returns the writer, the last batch a
/// previous run completed (0 when starting fresh) and the rows already in
/// the file.
fn open_output(job: &JobConfig) -> Result<(IncrementalWriter, usize, u64)> {
    if job.resume {
        if let Some(checkpoint) = Checkpoint::load(&job.output)? {
            checkpoint.ensure_compatible(job.batch.batch_size)?;
            if checkpoint.input_path != job.input {
                warn!(
                    previous = %checkpoint.input_path.display(),
                    "checkpoint was written for a different input file"
                );
            }
            info!(
                last_completed_batch = checkpoint.last_completed_batch,
                previous_run = %checkpoint.run_id,
                "resuming"
            );
            let writer =
                IncrementalWriter::resume(&job.output, &OUTPUT_FIELDS, checkpoint.rows_written)?;
            return Ok((
                writer,
                checkpoint.last_completed_batch,
                checkpoint.rows_written,
            ));
        }
        warn!(output = %job.output.display(), "no checkpoint found, starting fresh");
    }

    let writer = IncrementalWriter::initialize(&job.output, &OUTPUT_FIELDS)?;
    Checkpoint::clear(&job.output)?;
    Ok((writer, 0, 0))
}

/// Process one batch under a pool of `workers` tasks and return outcomes in
/// input order. A worker that dies yields fallback rows for its company.
async fn run_batch(
    chunk: &[CompanyQuery],
    pipeline: &Arc<CompanyPipeline>,
    workers: usize,
    progress: &dyn ProgressReporter,
) -> Vec<CompanyOutcome> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let handles: Vec<_> = chunk
        .iter()
        .map(|query| {
            let pipeline = Arc::clone(pipeline);
            let permits = Arc::clone(&permits);
            let query = query.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                pipeline.process(&query).await
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(chunk.len());
    for (query, handle) in chunk.iter().zip(handles) {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(company = %query.name, stage = "worker", error = %e, "worker failed");
                CompanyOutcome::worker_failed(query, e.to_string())
            }
        };
        progress.company_done(&outcome);
        outcomes.push(outcome);
    }
    outcomes
}

/// Output path used when `--out` is not given: `<output_dir>/<input stem>_results.csv`.
pub fn default_output_path(output_dir: &Path, input: &Path) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "companies".to_string());
    output_dir.join(format!("{stem}_results.csv"))
}
