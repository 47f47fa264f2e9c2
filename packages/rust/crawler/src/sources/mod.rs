//! Source fetchers: one adapter per external data source.
//!
//! Every fetcher follows the same shape: discover a profile URL through the
//! search engine, fetch it through the shared [`Transport`], and pull a
//! small structured subset out of the markup. Any failure along the way is
//! reported as [`SourceResult::Absent`].

mod directory;
mod filings;
mod funding;
mod professional_network;
mod search;
mod website;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use firmscope_shared::{CompanyQuery, FirmscopeError, Result, SourceName, SourceResult, SourcesConfig};

use crate::client::Transport;

pub use directory::DirectoryFetcher;
pub use filings::FilingsFetcher;
pub use funding::FundingFetcher;
pub use professional_network::ProfessionalNetworkFetcher;
pub use search::{SearchEngine, SearchFetcher, SearchHit, parse_search_results};
pub use website::WebsiteFetcher;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Capability: given a company, return what one source knows about it.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Which source this fetcher covers.
    fn name(&self) -> SourceName;

    /// Query the source. Never fails; problems yield `Absent`.
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Enabled fetchers, held in source declaration order.
#[derive(Clone)]
pub struct SourceRegistry {
    fetchers: Vec<Arc<dyn SourceFetcher>>,
}

impl SourceRegistry {
    /// Build the fetchers named in `config.enabled` (all when empty).
    pub fn new(transport: Arc<Transport>, config: &SourcesConfig) -> Result<Self> {
        let enabled = enabled_sources(config)?;
        let engine = SearchEngine::new(Arc::clone(&transport), &config.search_url);
        let excluded = config.known_source_domains();

        let fetchers: Vec<Arc<dyn SourceFetcher>> = enabled
            .into_iter()
            .map(|name| -> Arc<dyn SourceFetcher> {
                match name {
                    SourceName::Website => Arc::new(WebsiteFetcher::new(
                        engine.clone(),
                        Arc::clone(&transport),
                        excluded.clone(),
                    )),
                    SourceName::ProfessionalNetwork => Arc::new(ProfessionalNetworkFetcher::new(
                        engine.clone(),
                        Arc::clone(&transport),
                        &config.professional_network_domain,
                        &config.professional_network_marker,
                    )),
                    SourceName::FundingDatabase => Arc::new(FundingFetcher::new(
                        engine.clone(),
                        Arc::clone(&transport),
                        &config.funding_domain,
                        &config.funding_marker,
                    )),
                    SourceName::FilingsRegistry => Arc::new(FilingsFetcher::new(
                        Arc::clone(&transport),
                        &config.filings_base_url,
                    )),
                    SourceName::Directory => Arc::new(DirectoryFetcher::new(
                        engine.clone(),
                        Arc::clone(&transport),
                        &config.directory_domain,
                        &config.directory_marker,
                    )),
                    SourceName::Search => Arc::new(SearchFetcher::new(engine.clone())),
                }
            })
            .collect();

        Ok(Self::from_fetchers(fetchers))
    }

    /// Wrap arbitrary fetchers (stubs in tests). Sorted by source order.
    pub fn from_fetchers(mut fetchers: Vec<Arc<dyn SourceFetcher>>) -> Self {
        fetchers.sort_by_key(|f| f.name());
        Self { fetchers }
    }

    pub fn fetchers(&self) -> &[Arc<dyn SourceFetcher>] {
        &self.fetchers
    }

    pub fn names(&self) -> Vec<SourceName> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("fetchers", &self.names())
            .finish()
    }
}

/// Parse `enabled`, deduplicated and in declaration order.
fn enabled_sources(config: &SourcesConfig) -> Result<Vec<SourceName>> {
    if config.enabled.is_empty() {
        return Ok(SourceName::ALL.to_vec());
    }
    let mut names = config
        .enabled
        .iter()
        .map(|raw| raw.parse::<SourceName>().map_err(FirmscopeError::config))
        .collect::<Result<Vec<_>>>()?;
    names.sort();
    names.dedup();
    Ok(names)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Whether `url`'s host is one of `domains` or a subdomain of one.
pub fn is_known_source(url: &str, domains: &[String]) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
        return false;
    };
    domains.iter().any(|domain| {
        let domain = domain.to_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

/// Lowercase alphanumerics of a company name, for matching it inside URLs.
pub fn compact_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
