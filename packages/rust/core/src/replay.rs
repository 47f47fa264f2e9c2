//! Re-run extraction on a stored corpus dump without fetching anything.

use std::path::Path;

use tracing::{info, instrument, warn};

use firmscope_shared::Result;
use firmscope_storage::CorpusDump;

use crate::extraction::ExtractionEngine;
use crate::pipeline::CompanyOutcome;
use crate::rows;

/// Read the dump at `path` and extract rows from its stored corpus text.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn replay_dump(path: &Path, engine: &ExtractionEngine) -> Result<CompanyOutcome> {
    let dump = CorpusDump::read(path)?;
    if !dump.is_intact() {
        warn!(company = %dump.company_name, "corpus text does not match its recorded digest");
    }

    let query = dump.query();
    info!(company = %query.name, original_run = %dump.run_id, "replaying corpus");

    let extraction = engine.extract(&query, &dump.raw_text).await;
    Ok(CompanyOutcome {
        rows: rows::transform(&extraction.record),
        outcome: extraction.outcome,
        sources_present: dump.sources.values().filter(|r| !r.is_absent()).count(),
        query,
    })
}
