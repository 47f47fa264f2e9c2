//! Resume checkpoint: a JSON sidecar next to the output file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use firmscope_shared::{FirmscopeError, Result, RunId};

/// Last batch whose rows were durably appended to the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub input_path: PathBuf,
    pub batch_size: usize,
    pub total_batches: usize,
    /// 1-based; 0 means no batch has completed yet.
    pub last_completed_batch: usize,
    pub rows_written: u64,
    pub run_id: RunId,
    pub updated_at: DateTime<Utc>,
}

/// `<output>.progress.json`.
pub fn checkpoint_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".progress.json");
    PathBuf::from(name)
}

impl Checkpoint {
    /// Read the checkpoint for `output`, if one exists.
    pub fn load(output: &Path) -> Result<Option<Self>> {
        let path = checkpoint_path(output);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FirmscopeError::io(&path, e)),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            FirmscopeError::validation(format!("corrupt checkpoint {}: {e}", path.display()))
        })
    }

    /// Write the checkpoint for `output` atomically (temp file, then rename).
    pub fn save(&self, output: &Path) -> Result<()> {
        let path = checkpoint_path(output);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FirmscopeError::Storage(format!("failed to serialize checkpoint: {e}")))?;
        std::fs::write(&tmp, json).map_err(|e| FirmscopeError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| FirmscopeError::io(&path, e))?;

        debug!(
            batch = self.last_completed_batch,
            total = self.total_batches,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Delete the checkpoint for `output`; missing is fine.
    pub fn clear(output: &Path) -> Result<()> {
        let path = checkpoint_path(output);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FirmscopeError::io(&path, e)),
        }
    }

    /// Whether this checkpoint can drive a resume with `batch_size`.
    pub fn ensure_compatible(&self, batch_size: usize) -> Result<()> {
        if self.batch_size != batch_size {
            return Err(FirmscopeError::validation(format!(
                "checkpoint was written with batch_size {} but this run uses {batch_size}",
                self.batch_size
            )));
        }
        Ok(())
    }
}
