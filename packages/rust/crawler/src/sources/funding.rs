//! Funding-database organization profile (embedded JSON-LD).

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use firmscope_shared::{CompanyQuery, SourceName, SourceResult};

use super::{SearchEngine, SourceFetcher};
use crate::client::Transport;

static LD_JSON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector")
});

#[derive(Debug, Serialize)]
struct FundingProfile {
    url: String,
    data: Value,
}

/// First JSON-LD block that parses, or an empty object.
fn extract_ld_json(html: &str) -> Value {
    let doc = Html::parse_document(html);
    doc.select(&LD_JSON)
        .find_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim()).ok()
        })
        .unwrap_or_else(|| Value::Object(Default::default()))
}

/// Looks the company up in the funding database.
#[derive(Debug, Clone)]
pub struct FundingFetcher {
    engine: SearchEngine,
    transport: Arc<Transport>,
    domain: String,
    marker: String,
}

impl FundingFetcher {
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
impl SourceFetcher for FundingFetcher {
    fn name(&self) -> SourceName {
        SourceName::FundingDatabase
    }

    #[instrument(skip_all, fields(company = %query.name, source = "funding-database"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let terms = format!("{} site:{}", query.name, self.domain);
        let Some(url) = self.engine.find_profile(&terms, &self.marker).await else {
            debug!("no organization profile found");
            return SourceResult::Absent;
        };
        let Some(body) = self.transport.fetch_text(&url).await else {
            return SourceResult::Absent;
        };
        SourceResult::structured(&FundingProfile {
            data: extract_ld_json(&body),
            url,
        })
    }
}
