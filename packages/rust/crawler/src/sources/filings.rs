//! Regulatory filings registry: company search, filing index, documents.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use firmscope_shared::{CompanyQuery, SourceName, SourceResult};

use super::SourceFetcher;
use crate::client::{Transport, url_with_query};
use crate::text::{document_lines, truncate_chars};

/// Filing types collected from the index, in priority order.
const FILING_TYPES: [&str; 4] = ["10-K", "10-Q", "8-K", "S-1"];
/// Document links kept per filing type.
const PER_TYPE: usize = 2;
/// Documents fetched per company.
const MAX_DOCUMENTS: usize = 3;
/// Character cap for each document's text.
const DOCUMENT_CHARS: usize = 50_000;

static CIK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CIK=(\d+)").expect("static regex"));

static FILING_LINKS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FILING_TYPES
        .iter()
        .map(|kind| {
            let pattern = format!(r#"<a href="([^"]*{}[^"]*\.htm)""#, regex::escape(kind));
            (*kind, Regex::new(&pattern).expect("static regex"))
        })
        .collect()
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)principal\s*executive\s*offices?[:\s]*([^\n]+)\n([^\n]+)\n([^\n]+)")
        .expect("static regex")
});

#[derive(Debug, Serialize)]
struct RegistryData {
    cik: String,
    filings: Vec<Filing>,
}

#[derive(Debug, Serialize)]
struct Filing {
    url: String,
    filing_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<OfficeAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct OfficeAddress {
    line1: String,
    line2: String,
    city_state_zip: String,
}

/// First CIK on a registry search page, zero-padded to 10 digits.
fn find_cik(html: &str) -> Option<String> {
    CIK.captures(html)
        .map(|caps| format!("{:0>10}", &caps[1]))
}

/// `(filing_type, href)` pairs, at most [`PER_TYPE`] per type, in type order.
fn filing_links(index_html: &str) -> Vec<(&'static str, String)> {
    FILING_LINKS
        .iter()
        .flat_map(|(kind, pattern)| {
            pattern
                .captures_iter(index_html)
                .take(PER_TYPE)
                .map(|caps| (*kind, caps[1].to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Registered-office address: the three lines after "principal executive offices".
fn find_office_address(text: &str) -> Option<OfficeAddress> {
    ADDRESS.captures(text).map(|caps| OfficeAddress {
        line1: caps[1].trim().to_string(),
        line2: caps[2].trim().to_string(),
        city_state_zip: caps[3].trim().to_string(),
    })
}

/// Fetches filings from the registry.
#[derive(Debug, Clone)]
pub struct FilingsFetcher {
    transport: Arc<Transport>,
    base_url: String,
}

impl FilingsFetcher {
    /// `base_url` is the registry origin, e.g. `https://www.sec.gov`.
    pub fn new(transport: Arc<Transport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let base = Url::parse(&format!("{}/", self.base_url)).ok()?;
        base.join(href).ok().map(|u| u.to_string())
    }

    async fn fetch_document(&self, kind: &str, href: &str) -> Option<Filing> {
        let url = self.resolve(href)?;
        let body = self.transport.fetch_text(&url).await?;
        let text = document_lines(&Html::parse_document(&body));
        Some(Filing {
            address: find_office_address(&text),
            text: truncate_chars(&text, DOCUMENT_CHARS).to_string(),
            filing_type: kind.to_string(),
            url,
        })
    }
}

#[async_trait]
impl SourceFetcher for FilingsFetcher {
    fn name(&self) -> SourceName {
        SourceName::FilingsRegistry
    }

    #[instrument(skip_all, fields(company = %query.name, source = "filings-registry"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let Ok(search_url) = url_with_query(
            &format!("{}/cgi-bin/browse-edgar", self.base_url),
            &[
                ("company", query.name.as_str()),
                ("owner", "exclude"),
                ("action", "getcompany"),
            ],
        ) else {
            return SourceResult::Absent;
        };
        let Some(search_page) = self.transport.fetch_text(&search_url).await else {
            return SourceResult::Absent;
        };
        let Some(cik) = find_cik(&search_page) else {
            debug!("no CIK on registry search page");
            return SourceResult::Absent;
        };

        let index_url = format!("{}/Archives/edgar/data/{cik}/{cik}-index.html", self.base_url);
        let Some(index_page) = self.transport.fetch_text(&index_url).await else {
            return SourceResult::Absent;
        };
        let links = filing_links(&index_page);
        if links.is_empty() {
            debug!(%cik, "filing index has no recognised documents");
            return SourceResult::Absent;
        }

        let mut filings = Vec::new();
        for (kind, href) in links.iter().take(MAX_DOCUMENTS) {
            match self.fetch_document(kind, href).await {
                Some(filing) => filings.push(filing),
                None => debug!(%href, "skipping filing document"),
            }
        }
        if filings.is_empty() {
            return SourceResult::Absent;
        }

        debug!(%cik, documents = filings.len(), "filings fetched");
        SourceResult::structured(&RegistryData { cik, filings })
    }
}
