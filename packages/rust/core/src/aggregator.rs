//! Run every source for one company and merge the results into a corpus.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use firmscope_crawler::{SourceRegistry, truncate_chars};
use firmscope_shared::{CompanyQuery, CorpusConfig, Mapping, RunContext, SourceName, SourceResult};
use firmscope_storage::CorpusDump;

/// All source results for one company plus the merged text.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub query: CompanyQuery,
    pub sources: BTreeMap<SourceName, SourceResult>,
    pub text: String,
}

impl Corpus {
    /// Sources that contributed something.
    pub fn present(&self) -> usize {
        self.sources.values().filter(|r| !r.is_absent()).count()
    }
}

/// Fans a company out to every registered fetcher.
///
/// The fetch semaphore is shared by every company of the job, so the number
/// of in-flight source fetches stays bounded however many workers run.
#[derive(Debug, Clone)]
pub struct CorpusAggregator {
    registry: SourceRegistry,
    permits: Arc<Semaphore>,
    corpus: CorpusConfig,
    dump_dir: Option<PathBuf>,
    ctx: RunContext,
}

impl CorpusAggregator {
    pub fn new(
        registry: SourceRegistry,
        fetch_concurrency: usize,
        corpus: CorpusConfig,
        dump_dir: Option<PathBuf>,
        ctx: RunContext,
    ) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(fetch_concurrency.max(1))),
            corpus,
            dump_dir,
            ctx,
        }
    }

    /// Fetch every source for `query` and build the corpus.
    ///
    /// Writes the corpus dump (when a dump directory is set) before
    /// returning; a failed dump is logged and ignored.
    #[instrument(
        skip_all,
        fields(run_id = %self.ctx.run_id, company = %query.name, stage = "aggregate")
    )]
    pub async fn gather(&self, query: &CompanyQuery) -> Corpus {
        let started = Instant::now();

        let handles: Vec<_> = self
            .registry
            .fetchers()
            .iter()
            .map(|fetcher| {
                let fetcher = Arc::clone(fetcher);
                let permits = Arc::clone(&self.permits);
                let query = query.clone();
                let name = fetcher.name();
                let handle = tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return SourceResult::Absent;
                    };
                    fetcher.fetch(&query).await
                });
                (name, handle)
            })
            .collect();

        let mut sources = BTreeMap::new();
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(source = %name, error = %e, "fetcher task failed");
                    SourceResult::Absent
                }
            };
            debug!(source = %name, present = !result.is_absent(), "source done");
            sources.insert(name, result);
        }

        let text = render_corpus(query, &sources, &self.corpus);
        let corpus = Corpus {
            query: query.clone(),
            sources,
            text,
        };

        info!(
            present = corpus.present(),
            total = corpus.sources.len(),
            chars = corpus.text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "corpus built"
        );

        self.dump(&corpus).await;
        corpus
    }

    async fn dump(&self, corpus: &Corpus) {
        let Some(dir) = self.dump_dir.clone() else {
            return;
        };
        let dump = CorpusDump::new(
            self.ctx.run_id,
            &corpus.query,
            corpus.sources.clone(),
            corpus.text.clone(),
        );
        match tokio::task::spawn_blocking(move || dump.write(&dir)).await {
            Ok(Ok(path)) => debug!(path = %path.display(), "corpus dumped"),
            Ok(Err(e)) => warn!(error = %e, "corpus dump failed"),
            Err(e) => warn!(error = %e, "corpus dump task failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Corpus text
// ---------------------------------------------------------------------------

/// Serialize present results in source order under a two-line header.
///
/// Each source's body is capped at `config.source_char_cap` characters;
/// list results contribute at most `config.list_items` items.
pub fn render_corpus(
    query: &CompanyQuery,
    sources: &BTreeMap<SourceName, SourceResult>,
    config: &CorpusConfig,
) -> String {
    let mut text = format!(
        "COMPANY: {}\nSTATE: {}\n\n",
        query.name,
        query.jurisdiction_or_empty()
    );

    for (name, result) in sources {
        let label = section_label(*name);
        match result {
            SourceResult::Absent => {}
            SourceResult::Structured(map) => {
                let body = pretty(&Value::Object(map.clone()));
                text.push_str(&format!("\n--- {label} DATA ---\n"));
                text.push_str(truncate_chars(&body, config.source_char_cap));
                text.push('\n');
            }
            SourceResult::List(items) => {
                let body = list_body(items, config.list_items);
                text.push_str(&format!("\n--- {label} RESULTS ---\n"));
                text.push_str(truncate_chars(&body, config.source_char_cap));
            }
            SourceResult::Text(body) => {
                text.push_str(&format!("\n--- {label} ---\n"));
                text.push_str(truncate_chars(body, config.source_char_cap));
                text.push('\n');
            }
        }
    }
    text
}

/// `professional-network` → `PROFESSIONAL NETWORK`.
fn section_label(name: SourceName) -> String {
    name.as_str().to_uppercase().replace('-', " ")
}

fn list_body(items: &[Mapping], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(|item| pretty(&Value::Object(item.clone())) + "\n")
        .collect()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use firmscope_crawler::SourceFetcher;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fetcher stub returning a fixed result after an optional delay.
    pub(crate) struct StubFetcher {
        pub name: SourceName,
        pub result: SourceResult,
        pub delay: Duration,
    }

    impl StubFetcher {
        pub(crate) fn new(name: SourceName, result: SourceResult) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        fn name(&self) -> SourceName {
            self.name
        }

        async fn fetch(&self, _query: &CompanyQuery) -> SourceResult {
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    struct PanickingFetcher;

    #[async_trait]
    impl SourceFetcher for PanickingFetcher {
        fn name(&self) -> SourceName {
            SourceName::Directory
        }

        async fn fetch(&self, _query: &CompanyQuery) -> SourceResult {
            panic!("selector blew up");
        }
    }

    /// Tracks the peak number of concurrent fetches.
    struct GaugeFetcher {
        name: SourceName,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceFetcher for GaugeFetcher {
        fn name(&self) -> SourceName {
            self.name
        }

        async fn fetch(&self, _query: &CompanyQuery) -> SourceResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            SourceResult::Absent
        }
    }

    /// Registry where every source is `Absent`.
    pub(crate) fn absent_registry() -> SourceRegistry {
        SourceRegistry::from_fetchers(
            SourceName::ALL
                .into_iter()
                .map(|name| StubFetcher::new(name, SourceResult::Absent) as Arc<dyn SourceFetcher>)
                .collect(),
        )
    }

    fn aggregator(registry: SourceRegistry) -> CorpusAggregator {
        CorpusAggregator::new(registry, 8, CorpusConfig::default(), None, RunContext::new())
    }

    fn acme() -> CompanyQuery {
        CompanyQuery::new("Acme Corp", Some("TX".into()))
    }

    fn mapping(value: Value) -> Mapping {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn header_only_when_everything_is_absent() {
        let sources = SourceName::ALL
            .into_iter()
            .map(|n| (n, SourceResult::Absent))
            .collect();
        let text = render_corpus(&acme(), &sources, &CorpusConfig::default());
        assert_eq!(text, "COMPANY: Acme Corp\nSTATE: TX\n\n");

        let text = render_corpus(
            &CompanyQuery::new("Acme Corp", None),
            &BTreeMap::new(),
            &CorpusConfig::default(),
        );
        assert_eq!(text, "COMPANY: Acme Corp\nSTATE: \n\n");
    }

    #[test]
    fn sections_follow_source_order() {
        let mut sources = BTreeMap::new();
        sources.insert(
            SourceName::Search,
            SourceResult::List(vec![mapping(json!({"title": "Acme"}))]),
        );
        sources.insert(SourceName::FilingsRegistry, SourceResult::Text("10-K".into()));
        sources.insert(
            SourceName::Website,
            SourceResult::Structured(mapping(json!({"url": "https://acmecorp.com"}))),
        );
        sources.insert(SourceName::Directory, SourceResult::Absent);

        let text = render_corpus(&acme(), &sources, &CorpusConfig::default());
        let website = text.find("--- WEBSITE DATA ---").unwrap();
        let filings = text.find("--- FILINGS REGISTRY ---").unwrap();
        let search = text.find("--- SEARCH RESULTS ---").unwrap();
        assert!(website < filings && filings < search);
        assert!(!text.contains("DIRECTORY"));
        assert!(text.contains("\"url\": \"https://acmecorp.com\""));
    }

    #[test]
    fn contributions_are_capped() {
        let config = CorpusConfig {
            source_char_cap: 20,
            list_items: 2,
        };
        let mut sources = BTreeMap::new();
        sources.insert(SourceName::Website, SourceResult::Text("é".repeat(100)));

        let text = render_corpus(&acme(), &sources, &config);
        assert!(text.contains(&format!("--- WEBSITE ---\n{}\n", "é".repeat(20))));
        assert!(!text.contains(&"é".repeat(21)));

        let config = CorpusConfig {
            source_char_cap: 10_000,
            list_items: 2,
        };
        let items = (0..5).map(|i| mapping(json!({"i": i}))).collect();
        let mut sources = BTreeMap::new();
        sources.insert(SourceName::Search, SourceResult::List(items));
        let text = render_corpus(&acme(), &sources, &config);
        assert!(text.contains("\"i\": 1"));
        assert!(!text.contains("\"i\": 2"));
    }

    #[tokio::test]
    async fn gather_collects_every_source() {
        let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
            Arc::new(StubFetcher {
                name: SourceName::Search,
                result: SourceResult::List(vec![mapping(json!({"title": "Acme"}))]),
                delay: Duration::ZERO,
            }),
            Arc::new(StubFetcher {
                name: SourceName::Website,
                result: SourceResult::Text("Acme makes widgets.".into()),
                delay: Duration::from_millis(50),
            }),
        ];
        let registry = SourceRegistry::from_fetchers(fetchers);

        let corpus = aggregator(registry).gather(&acme()).await;
        assert_eq!(corpus.sources.len(), 2);
        assert_eq!(corpus.present(), 2);
        // The slow website fetch still lands first in the text.
        let website = corpus.text.find("--- WEBSITE ---").unwrap();
        let search = corpus.text.find("--- SEARCH RESULTS ---").unwrap();
        assert!(website < search);
    }

    #[tokio::test]
    async fn panicking_fetcher_is_absent() {
        let fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
            Arc::new(PanickingFetcher),
            StubFetcher::new(SourceName::Website, SourceResult::Text("ok".into())),
        ];
        let registry = SourceRegistry::from_fetchers(fetchers);
        let corpus = aggregator(registry).gather(&acme()).await;
        assert_eq!(corpus.sources[&SourceName::Directory], SourceResult::Absent);
        assert_eq!(corpus.present(), 1);
    }

    #[tokio::test]
    async fn fetches_share_the_permit_pool() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fetchers = SourceName::ALL
            .into_iter()
            .map(|name| {
                Arc::new(GaugeFetcher {
                    name,
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                }) as Arc<dyn SourceFetcher>
            })
            .collect();
        let aggregator = CorpusAggregator::new(
            SourceRegistry::from_fetchers(fetchers),
            2,
            CorpusConfig::default(),
            None,
            RunContext::new(),
        );

        let a = CompanyQuery::new("Acme Corp", None);
        let b = CompanyQuery::new("Globex", None);
        tokio::join!(aggregator.gather(&a), aggregator.gather(&b));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn corpus_is_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new();
        let aggregator = CorpusAggregator::new(
            absent_registry(),
            4,
            CorpusConfig::default(),
            Some(dir.path().join("raw_data")),
            ctx.clone(),
        );

        let corpus = aggregator.gather(&acme()).await;
        let path = dir
            .path()
            .join("raw_data")
            .join(format!("Acme_Corp_{}.json", ctx.run_id.short()));
        let dump = CorpusDump::read(&path).unwrap();
        assert_eq!(dump.raw_text, corpus.text);
        assert_eq!(dump.sources.len(), 6);

        // A duplicate input row gets its own dump.
        aggregator.gather(&acme()).await;
        let dumps = std::fs::read_dir(dir.path().join("raw_data")).unwrap().count();
        assert_eq!(dumps, 2);
    }

    #[tokio::test]
    async fn dump_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let aggregator = CorpusAggregator::new(
            absent_registry(),
            4,
            CorpusConfig::default(),
            Some(blocker),
            RunContext::new(),
        );
        let corpus = aggregator.gather(&acme()).await;
        assert_eq!(corpus.present(), 0);
    }
}
