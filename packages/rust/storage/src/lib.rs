//! File-backed persistence for a pipeline run.
//!
//! - [`IncrementalWriter`]: append-only CSV output, header written once
//! - [`Checkpoint`]: sidecar recording the last batch durably appended
//! - [`CorpusDump`]: per-company corpus snapshot used for debugging and replay
//!
//! All writes are synchronous and small; the orchestrator is the only writer.

mod checkpoint;
mod dump;
mod writer;

pub use checkpoint::{Checkpoint, checkpoint_path};
pub use dump::{CorpusDump, safe_file_name};
pub use writer::IncrementalWriter;
