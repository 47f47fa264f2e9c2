//! Business-directory company profile.

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
    LazyLock::new(|| Selector::parse("div.companyDescription").expect("static selector"));
static METRIC: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.metric").expect("static selector"));
static LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".label").expect("static selector"));
static VALUE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".value").expect("static selector"));

#[derive(Debug, Default, Serialize)]
struct DirectoryProfile {
    url: String,
    description: String,
    employees: String,
    revenue: String,
}

impl DirectoryProfile {
    /// Nothing but the URL was found on the page.
    fn is_empty(&self) -> bool {
        self.description.is_empty() && self.employees.is_empty() && self.revenue.is_empty()
    }
}

fn parse_profile(url: &str, html: &str) -> DirectoryProfile {
    let doc = Html::parse_document(html);
    let mut profile = DirectoryProfile {
        url: url.to_string(),
        description: select_text(&doc, &DESCRIPTION).unwrap_or_default(),
        ..Default::default()
    };

    for metric in doc.select(&METRIC) {
        let (Some(label), Some(value)) = (metric.select(&LABEL).next(), metric.select(&VALUE).next())
        else {
            continue;
        };
        let label = element_text(label).to_lowercase();
        let value = element_text(value);
        if label.contains("employee") {
            profile.employees = value;
        } else if label.contains("revenue") {
            profile.revenue = value;
        }
    }

    profile
}

/// Looks the company up in the business directory.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    engine: SearchEngine,
    transport: Arc<Transport>,
    domain: String,
    marker: String,
}

impl DirectoryFetcher {
    pub fn new(engine: SearchEngine, transport: Arc<Transport>, domain: &str, marker: &str) -> Self {
        Self {
            engine,
            transport,
            domain: domain.to_string(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    fn name(&self) -> SourceName {
        SourceName::Directory
    }

    #[instrument(skip_all, fields(company = %query.name, source = "directory"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let terms = format!("{} site:{}", query.search_terms(), self.domain);
        let Some(url) = self.engine.find_profile(&terms, &self.marker).await else {
            debug!("no directory profile found");
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
