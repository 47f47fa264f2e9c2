//! Professional-network company profile.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument};

use firmscope_shared::{CompanyQuery, SourceName, SourceResult};

use super::{SearchEngine, SourceFetcher};
use crate::client::Transport;
use crate::text::{element_text, select_text};

static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.about-us__description").expect("static selector"));
static EMPLOYEES: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[data-test-id="about-us__employee-count"]"#).expect("static selector")
});
static INDUSTRY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li.about-us__industry").expect("static selector"));

#[derive(Debug, Default, Serialize)]
struct NetworkProfile {
    url: String,
    description: String,
    employees: String,
    industries: String,
}

impl NetworkProfile {
    /// Nothing but the URL was found on the page.
    fn is_empty(&self) -> bool {
        self.description.is_empty() && self.employees.is_empty() && self.industries.is_empty()
    }
}

fn parse_profile(url: &str, html: &str) -> NetworkProfile {
    let doc = Html::parse_document(html);
    NetworkProfile {
        url: url.to_string(),
        description: select_text(&doc, &DESCRIPTION).unwrap_or_default(),
        employees: select_text(&doc, &EMPLOYEES).unwrap_or_default(),
        industries: doc
            .select(&INDUSTRY)
            .map(element_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Looks the company up on the professional network.
#[derive(Debug, Clone)]
pub struct ProfessionalNetworkFetcher {
    engine: SearchEngine,
    transport: Arc<Transport>,
    site: String,
    marker: String,
}

impl ProfessionalNetworkFetcher {
    /// `marker` is the path prefix identifying a company profile, e.g.
    /// `linkedin.com/company/`.
    pub fn new(engine: SearchEngine, transport: Arc<Transport>, domain: &str, marker: &str) -> Self {
        let site = if marker.is_empty() { domain } else { marker.trim_end_matches('/') };
        Self {
            engine,
            transport,
            site: site.to_string(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for ProfessionalNetworkFetcher {
    fn name(&self) -> SourceName {
        SourceName::ProfessionalNetwork
    }

    #[instrument(skip_all, fields(company = %query.name, source = "professional-network"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let terms = format!("{} site:{}", query.search_terms(), self.site);
        let Some(url) = self.engine.find_profile(&terms, &self.marker).await else {
            debug!("no profile found");
            return SourceResult::Absent;
        };
        let Some(body) = self.transport.fetch_text(&url).await else {
            return SourceResult::Absent;
        };
        let profile = parse_profile(&url, &body);
        if profile.is_empty() {
            debug!(url = %url, "profile page had no recognizable fields");
            return SourceResult::Absent;
        }
        SourceResult::structured(&profile)
    }
}
