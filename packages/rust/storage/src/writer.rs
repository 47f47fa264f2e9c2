//! Append-only CSV sink with a header written exactly once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use firmscope_shared::{FirmscopeError, Result};

/// Handle to an initialized output file.
///
/// Holds only the path; every [`append`](Self::append) opens the file,
/// writes, flushes and closes it again.
#[derive(Debug, Clone)]
pub struct IncrementalWriter {
    path: PathBuf,
}

impl IncrementalWriter {
    /// Create (or truncate) `path`, creating its parent directory, and write
    /// the header. Any failure here is fatal for the run.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn initialize(path: &Path, fields: &[&str]) -> Result<Self> {
        let init_err =
            |e: &dyn std::fmt::Display| FirmscopeError::output_init(path, e.to_string());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| init_err(&e))?;
        }

        let file = File::create(path).map_err(|e| init_err(&e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(fields).map_err(|e| init_err(&e))?;
        writer.flush().map_err(|e| init_err(&e))?;

        info!(columns = fields.len(), "output initialized");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Reopen an output from an earlier run that recorded `expected_rows`
    /// data rows.
    ///
    /// Rows past `expected_rows` were appended by a batch that never reached
    /// its checkpoint and are cut off. A file with fewer rows than expected,
    /// or whose first record differs from `fields`, is rejected. A missing or
    /// empty file is initialized only when nothing was expected.
    #[instrument(skip_all, fields(path = %path.display(), expected_rows))]
    pub fn resume(path: &Path, fields: &[&str], expected_rows: u64) -> Result<Self> {
        let init_err =
            |e: &dyn std::fmt::Display| FirmscopeError::output_init(path, e.to_string());

        let is_empty = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(init_err(&e)),
        };
        if is_empty {
            if expected_rows > 0 {
                return Err(FirmscopeError::output_init(
                    path,
                    format!("output is missing but the checkpoint records {expected_rows} rows"),
                ));
            }
            debug!("no previous output, initializing");
            return Self::initialize(path, fields);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| init_err(&e))?;
        let mut record = csv::ByteRecord::new();
        reader.read_byte_record(&mut record).map_err(|e| init_err(&e))?;
        if record.iter().ne(fields.iter().map(|f| f.as_bytes())) {
            return Err(FirmscopeError::output_init(
                path,
                "existing header does not match the output columns",
            ));
        }

        // Byte offset just past the last row the checkpoint vouches for.
        let mut keep_until = reader.position().byte();
        let mut found = 0u64;
        while reader.read_byte_record(&mut record).map_err(|e| init_err(&e))? {
            found += 1;
            if found == expected_rows {
                keep_until = reader.position().byte();
            }
        }

        if found < expected_rows {
            return Err(FirmscopeError::output_init(
                path,
                format!("output holds {found} rows but the checkpoint records {expected_rows}"),
            ));
        }
        if found > expected_rows {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| init_err(&e))?;
            file.set_len(keep_until).map_err(|e| init_err(&e))?;
            file.sync_all().map_err(|e| init_err(&e))?;
            warn!(
                dropped = found - expected_rows,
                "removed rows appended after the last checkpoint"
            );
        }

        info!(rows = expected_rows, "resuming existing output");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append `rows` and flush. Returns the number of rows written.
    pub fn append<T: Serialize>(&self, rows: &[T]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| FirmscopeError::io(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| FirmscopeError::Storage(format!("failed to write row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| FirmscopeError::io(&self.path, e))?;

        debug!(rows = rows.len(), path = %self.path.display(), "rows appended");
        Ok(rows.len())
    }

}
