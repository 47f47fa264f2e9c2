//! Per-company corpus dumps for debugging and replay.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use firmscope_shared::{CompanyQuery, FirmscopeError, Result, RunId, SourceName, SourceResult};

const MAX_NAME_ATTEMPTS: usize = 1000;

/// Everything gathered for one company before extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDump {
    pub run_id: RunId,
    pub company_name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of `raw_text`.
    pub corpus_sha256: String,
    pub sources: BTreeMap<SourceName, SourceResult>,
    pub raw_text: String,
}

impl CorpusDump {
    pub fn new(
        run_id: RunId,
        query: &CompanyQuery,
        sources: BTreeMap<SourceName, SourceResult>,
        raw_text: String,
    ) -> Self {
        Self {
            run_id,
            company_name: query.name.clone(),
            jurisdiction: query.jurisdiction.clone(),
            created_at: Utc::now(),
            corpus_sha256: sha256_hex(&raw_text),
            sources,
            raw_text,
        }
    }

    /// The query this dump was built for.
    pub fn query(&self) -> CompanyQuery {
        CompanyQuery::new(self.company_name.clone(), self.jurisdiction.clone())
    }

    /// Whether `raw_text` still matches the recorded digest.
    pub fn is_intact(&self) -> bool {
        sha256_hex(&self.raw_text) == self.corpus_sha256
    }

    /// File name inside the dump directory: `{safe_name}_{run}.json`, with
    /// `_{n}` added from the second attempt on.
    fn file_name(&self, attempt: usize) -> String {
        let stem = format!("{}_{}", safe_file_name(&self.company_name), self.run_id.short());
        match attempt {
            1 => format!("{stem}.json"),
            n => format!("{stem}_{n}.json"),
        }
    }

    /// Write the dump into `dir` (created if missing). Returns the file path.
    ///
    /// Never overwrites: two companies of one run whose names sanitize alike
    /// get numbered files.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| FirmscopeError::io(dir, e))?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FirmscopeError::Storage(format!("failed to serialize dump: {e}")))?;

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let path = dir.join(self.file_name(attempt));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(FirmscopeError::io(&path, e)),
            };
            file.write_all(json.as_bytes())
                .map_err(|e| FirmscopeError::io(&path, e))?;
            debug!(path = %path.display(), bytes = self.raw_text.len(), "corpus dump written");
            return Ok(path);
        }
        Err(FirmscopeError::Storage(format!(
            "no free dump file name for {} in {}",
            self.company_name,
            dir.display()
        )))
    }

    /// Read a dump written by [`write`](Self::write).
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FirmscopeError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            FirmscopeError::parse(format!("invalid corpus dump {}: {e}", path.display()))
        })
    }
}

/// Replace everything except word characters, `-` and `.` with `_`.
pub fn safe_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() { "_".to_string() } else { safe }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmscope_shared::Mapping;

    fn sample_dump() -> CorpusDump {
        let mut website = Mapping::new();
        website.insert("url".into(), "https://www.acmecorp.com/".into());

        let mut sources = BTreeMap::new();
        sources.insert(SourceName::Search, SourceResult::Absent);
        sources.insert(SourceName::Website, SourceResult::Structured(website));

        CorpusDump::new(
            RunId::new(),
            &CompanyQuery::new("Acme Corp / Holdings", Some("TX".into())),
            sources,
            "COMPANY: Acme Corp / Holdings\nSTATE: TX\n\n".into(),
        )
    }

    #[test]
    fn safe_names_replace_separators() {
        assert_eq!(safe_file_name("Acme Corp / Holdings"), "Acme_Corp___Holdings");
        assert_eq!(safe_file_name("a.b-c_d"), "a.b-c_d");
        assert_eq!(safe_file_name(""), "_");
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let dump = sample_dump();

        let path = dump.write(&dir.path().join("raw_data")).unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("Acme_Corp___Holdings_")
        );

        let back = CorpusDump::read(&path).unwrap();
        assert_eq!(back, dump);
        assert!(back.is_intact());
        assert_eq!(back.query().jurisdiction.as_deref(), Some("TX"));
    }

    #[test]
    fn colliding_names_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = RunId::new();
        let dump_for = |name: &str, text: &str| {
            CorpusDump::new(run_id, &CompanyQuery::new(name, None), BTreeMap::new(), text.into())
        };

        let first = dump_for("Acme/Corp", "first").write(dir.path()).unwrap();
        let second = dump_for("Acme Corp", "second").write(dir.path()).unwrap();
        let third = dump_for("Acme Corp", "third").write(dir.path()).unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(second.to_string_lossy().ends_with("_2.json"));
        assert_eq!(CorpusDump::read(&first).unwrap().raw_text, "first");
        assert_eq!(CorpusDump::read(&second).unwrap().raw_text, "second");
        assert_eq!(CorpusDump::read(&third).unwrap().raw_text, "third");
    }

    #[test]
    fn sources_are_keyed_by_source_name() {
        let json = serde_json::to_value(sample_dump()).unwrap();
        assert_eq!(json["sources"]["website"]["kind"], "structured");
        assert_eq!(json["sources"]["search"]["kind"], "absent");
    }

    #[test]
    fn tampered_text_is_detected() {
        let mut dump = sample_dump();
        dump.raw_text.push_str("edited");
        assert!(!dump.is_intact());
    }

    #[test]
    fn reading_garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            CorpusDump::read(&path),
            Err(FirmscopeError::Parse { .. })
        ));
    }
}
