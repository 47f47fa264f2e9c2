//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use firmscope_core::{
    CompanyOutcome, ExtractionEngine, OllamaCli, ProgressReporter, RunSummary, build_pipeline,
    default_output_path, replay_dump, run_job,
};
use firmscope_shared::{
    AppConfig, JobConfig, OUTPUT_FIELDS, RunContext, init_config, load_config, load_config_from,
};
use firmscope_storage::IncrementalWriter;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Firmscope: build structured company profiles from public sources.
#[derive(Parser)]
#[command(
    name = "firmscope",
    version,
    about = "Aggregate public information about companies into one CSV row per location.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write log events to this file (no colors).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Config file to use instead of ~/.firmscope/firmscope.toml.
    #[arg(long, env = "FIRMSCOPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every company in an input file.
    Run(RunArgs),

    /// Re-run extraction on a stored corpus dump without fetching.
    Replay {
        /// Corpus dump written by a previous run.
        dump: PathBuf,

        /// Write rows to this CSV instead of printing JSON.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Model identifier (overrides config).
        #[arg(long)]
        model: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `firmscope run`.
#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// Input file: JSON array or CSV / pipe-delimited text.
    pub input: PathBuf,

    /// Output CSV (defaults to <output_dir>/<input stem>_results.csv).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Continue a previous run on the same output from its checkpoint.
    #[arg(long)]
    pub resume: bool,

    /// Stop after this many companies.
    #[arg(long)]
    pub max_companies: Option<usize>,

    /// Companies per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Concurrent companies within a batch.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Model identifier (overrides config).
    #[arg(long)]
    pub model: Option<String>,

    /// Directory for per-company corpus dumps.
    #[arg(long)]
    pub debug_dir: Option<PathBuf>,

    /// Skip the inference CLI availability check.
    #[arg(long)]
    pub skip_check: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let filter = match cli.verbose {
        0 => "firmscope=info",
        1 => "firmscope=debug",
        _ => "firmscope=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let console = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let file = match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| eyre!("cannot open log file {}: {e}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run(args) => cmd_run(config_path.as_deref(), args).await,
        Command::Replay { dump, out, model } => {
            cmd_replay(config_path.as_deref(), &dump, out.as_deref(), model).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Merge CLI flags over the loaded config.
fn job_from_args(config: &AppConfig, args: RunArgs) -> JobConfig {
    let output = args
        .out
        .unwrap_or_else(|| default_output_path(Path::new(&config.defaults.output_dir), &args.input));

    let mut job = JobConfig::from_app(config, args.input, output);
    job.resume = args.resume;
    if let Some(max) = args.max_companies {
        job.batch.max_companies = Some(max);
    }
    if let Some(size) = args.batch_size {
        job.batch.batch_size = size;
    }
    if let Some(workers) = args.workers {
        job.batch.workers = workers;
    }
    if let Some(model) = args.model {
        job.inference.model = model;
    }
    if let Some(dir) = args.debug_dir {
        job.debug_dir = dir;
    }
    job
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = app_config(config_path)?;
    let skip_check = args.skip_check;
    let job = job_from_args(&config, args);
    job.validate()?;

    let client = OllamaCli::new(&job.inference);
    if skip_check {
        warn!("skipping inference availability check");
    } else {
        client.check_available().await?;
    }

    let ctx = RunContext::new();
    info!(
        run_id = %ctx.run_id,
        input = %job.input.display(),
        output = %job.output.display(),
        model = client.model(),
        resume = job.resume,
        "starting"
    );

    let pipeline = Arc::new(build_pipeline(&job, &ctx, Arc::new(client))?);
    let reporter = CliProgress::new();
    let summary = run_job(&job, pipeline, &ctx, &reporter).await?;

    println!();
    println!("  Run complete!");
    println!("  Run:       {}", summary.run_id);
    println!("  Companies: {}", summary.companies);
    println!(
        "  Batches:   {} run, {} skipped",
        summary.batches_run, summary.batches_skipped
    );
    println!("  Rows:      {}", summary.rows_written);
    println!("  Fallbacks: {}", summary.fallbacks);
    println!("  Output:    {}", job.output.display());
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_replay(
    config_path: Option<&Path>,
    dump: &Path,
    out: Option<&Path>,
    model: Option<String>,
) -> Result<()> {
    let mut config = app_config(config_path)?;
    if let Some(model) = model {
        config.inference.model = model;
    }

    let client = OllamaCli::new(&config.inference);
    client.check_available().await?;
    let engine = ExtractionEngine::new(Arc::new(client), &config.inference, RunContext::new());

    let outcome = replay_dump(dump, &engine).await?;
    info!(
        company = %outcome.query.name,
        rows = outcome.rows.len(),
        fallback = outcome.outcome.is_fallback(),
        "replay complete"
    );

    match out {
        Some(path) => {
            let writer = IncrementalWriter::initialize(path, &OUTPUT_FIELDS)?;
            let written = writer.append(&outcome.rows)?;
            println!("Wrote {written} rows to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&outcome.rows)?),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a spinner until batches are planned, then a bar
/// over the companies still to process.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn planned(&self, remaining: usize, total_batches: usize, skipped_batches: usize) {
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        self.bar.set_length(remaining as u64);
        if skipped_batches > 0 {
            self.bar.println(format!(
                "Resuming: {skipped_batches} of {total_batches} batches already done"
            ));
        }
    }

    fn company_done(&self, outcome: &CompanyOutcome) {
        self.bar.inc(1);
        if outcome.outcome.is_fallback() {
            self.bar
                .set_message(format!("{} (fallback)", outcome.query.name));
        } else {
            self.bar.set_message(outcome.query.name.clone());
        }
    }

    fn batch_done(&self, batch: usize, total_batches: usize, rows: usize) {
        self.bar
            .set_message(format!("Batch {batch}/{total_batches} saved ({rows} rows)"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
