//! Search-engine results page: the raw `search` source and the discovery
//! step every profile fetcher starts with.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use firmscope_shared::{CompanyQuery, Mapping, SourceName, SourceResult};

use super::SourceFetcher;
use crate::client::{Transport, url_with_query};
use crate::text::element_text;

/// Organic results kept per results page.
const MAX_HITS: usize = 10;

static RESULT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.g").expect("static selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3").expect("static selector"));
static SNIPPET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.VwiC3b").expect("static selector"));

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Parse organic results from a results page, at most `limit` of them.
///
/// Redirect links of the form `/url?q=<target>` are unwrapped; anything that
/// does not resolve to an absolute http(s) URL is skipped.
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let doc = Html::parse_document(html);
    let mut hits = Vec::new();

    for block in doc.select(&RESULT) {
        let Some(href) = block
            .select(&ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(url) = resolve_result_url(href) else {
            continue;
        };

        hits.push(SearchHit {
            title: block.select(&TITLE).next().map(element_text).unwrap_or_default(),
            url,
            snippet: block
                .select(&SNIPPET)
                .next()
                .map(element_text)
                .unwrap_or_default(),
        });
        if hits.len() >= limit {
            break;
        }
    }

    hits
}

fn resolve_result_url(href: &str) -> Option<String> {
    if href.starts_with("/url?") {
        let wrapped = Url::parse("https://redirect.invalid").ok()?.join(href).ok()?;
        let target = wrapped
            .query_pairs()
            .find(|(key, _)| key == "q" || key == "url")
            .map(|(_, value)| value.into_owned())?;
        return resolve_result_url(&target);
    }

    let url = Url::parse(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

// ---------------------------------------------------------------------------
// SearchEngine
// ---------------------------------------------------------------------------

/// Issues queries against the configured search endpoint.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    transport: Arc<Transport>,
    endpoint: String,
}

impl SearchEngine {
    pub fn new(transport: Arc<Transport>, endpoint: &str) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
        }
    }

    /// Top organic results for `terms`; `None` when the page could not be
    /// fetched.
    #[instrument(skip(self))]
    pub async fn search(&self, terms: &str) -> Option<Vec<SearchHit>> {
        let url = url_with_query(&self.endpoint, &[("q", terms)]).ok()?;
        let body = self.transport.fetch_text(&url).await?;
        let hits = parse_search_results(&body, MAX_HITS);
        debug!(hits = hits.len(), "search results parsed");
        Some(hits)
    }

    /// First result whose URL contains `marker` (case-insensitive).
    pub async fn find_profile(&self, terms: &str, marker: &str) -> Option<String> {
        let marker = marker.to_lowercase();
        self.search(terms)
            .await?
            .into_iter()
            .find(|hit| hit.url.to_lowercase().contains(&marker))
            .map(|hit| hit.url)
    }
}

// ---------------------------------------------------------------------------
// SearchFetcher
// ---------------------------------------------------------------------------

/// Raw search results for `"{name} {jurisdiction}"`.
#[derive(Debug, Clone)]
pub struct SearchFetcher {
    engine: SearchEngine,
}

impl SearchFetcher {
    pub fn new(engine: SearchEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SourceFetcher for SearchFetcher {
    fn name(&self) -> SourceName {
        SourceName::Search
    }

    #[instrument(skip_all, fields(company = %query.name, source = "search"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let Some(hits) = self.engine.search(&query.search_terms()).await else {
            return SourceResult::Absent;
        };
        if hits.is_empty() {
            return SourceResult::Absent;
        }

        let items: Vec<Mapping> = hits
            .iter()
            .filter_map(|hit| match SourceResult::structured(hit) {
                SourceResult::Structured(map) => Some(map),
                _ => None,
            })
            .collect();
        SourceResult::List(items)
    }
}
