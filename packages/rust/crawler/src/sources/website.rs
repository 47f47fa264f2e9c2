//! Company website: discover the official site, then read its landing page
//! and a few internal about/contact pages.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use firmscope_shared::{CompanyQuery, SourceName, SourceResult};

use super::{SearchEngine, SearchHit, SourceFetcher, compact_name, is_known_source};
use crate::client::Transport;
use crate::text::{page_text, page_title, truncate_chars};

/// Character cap for the landing page text.
const MAIN_PAGE_CHARS: usize = 100_000;
/// Character cap for each additional page.
const EXTRA_PAGE_CHARS: usize = 50_000;
/// Internal pages followed from the landing page.
const MAX_EXTRA_PAGES: usize = 3;
/// Link keywords that mark an internal page worth reading.
const PAGE_KEYWORDS: [&str; 4] = ["about", "company", "contact", "locations"];

static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

#[derive(Debug, Serialize)]
struct WebsiteData {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    main_page: String,
    additional_pages: Vec<PageText>,
}

#[derive(Debug, Serialize)]
struct PageText {
    url: String,
    text: String,
}

/// Fetches the company's own website.
#[derive(Debug, Clone)]
pub struct WebsiteFetcher {
    engine: SearchEngine,
    transport: Arc<Transport>,
    excluded_domains: Vec<String>,
}

impl WebsiteFetcher {
    /// `excluded_domains` are hosts owned by other fetchers.
    pub fn new(engine: SearchEngine, transport: Arc<Transport>, excluded_domains: Vec<String>) -> Self {
        Self {
            engine,
            transport,
            excluded_domains,
        }
    }

    /// Pick the official site among search hits: the first non-excluded hit
    /// whose URL contains the compacted company name, else the first
    /// non-excluded hit.
    fn choose_site(&self, name: &str, hits: &[SearchHit]) -> Option<String> {
        let compact = compact_name(name);
        let candidates: Vec<&SearchHit> = hits
            .iter()
            .filter(|hit| !is_known_source(&hit.url, &self.excluded_domains))
            .collect();

        candidates
            .iter()
            .find(|hit| !compact.is_empty() && hit.url.to_lowercase().contains(&compact))
            .or_else(|| candidates.first())
            .map(|hit| hit.url.clone())
    }
}

#[async_trait]
impl SourceFetcher for WebsiteFetcher {
    fn name(&self) -> SourceName {
        SourceName::Website
    }

    #[instrument(skip_all, fields(company = %query.name, source = "website"))]
    async fn fetch(&self, query: &CompanyQuery) -> SourceResult {
        let terms = format!("{} official website", query.search_terms());
        let Some(hits) = self.engine.search(&terms).await else {
            return SourceResult::Absent;
        };
        let Some(site) = self.choose_site(&query.name, &hits) else {
            debug!("no candidate website");
            return SourceResult::Absent;
        };

        let Ok(landing) = self.transport.fetch(&site).await else {
            return SourceResult::Absent;
        };
        let (title, links) = {
            let doc = Html::parse_document(&landing.body);
            let base = Url::parse(&landing.url).ok();
            let links = base
                .map(|base| internal_links(&doc, &base))
                .unwrap_or_default();
            (page_title(&doc), links)
        };
        let main_page = truncate_chars(&page_text(&landing.body), MAIN_PAGE_CHARS).to_string();

        let mut additional_pages = Vec::new();
        for link in links.into_iter().take(MAX_EXTRA_PAGES) {
            match self.transport.fetch(&link).await {
                Ok(page) => additional_pages.push(PageText {
                    text: truncate_chars(&page_text(&page.body), EXTRA_PAGE_CHARS).to_string(),
                    url: link,
                }),
                Err(e) => debug!(url = %link, error = %e, "skipping internal page"),
            }
        }
        debug!(site = %site, extra_pages = additional_pages.len(), "website fetched");

        SourceResult::structured(&WebsiteData {
            url: site,
            title,
            main_page,
            additional_pages,
        })
    }
}

/// Same-host links whose href mentions one of [`PAGE_KEYWORDS`], resolved,
/// fragment-free and deduplicated in document order.
fn internal_links(doc: &Html, base: &Url) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();

    for el in doc.select(&LINK) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let lowered = href.to_lowercase();
        if !PAGE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if resolved.host_str() != base.host_str() || !resolved.scheme().starts_with("http") {
            continue;
        }
        resolved.set_fragment(None);

        let resolved = resolved.to_string();
        if resolved != base.as_str() && !links.contains(&resolved) {
            links.push(resolved);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::search::tests::{results_page, test_transport};

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: String::new(),
            url: url.into(),
            snippet: String::new(),
        }
    }

    fn fetcher(search_url: &str) -> WebsiteFetcher {
        let transport = test_transport();
        WebsiteFetcher::new(
            SearchEngine::new(Arc::clone(&transport), search_url),
            transport,
            vec!["linkedin.com".into(), "crunchbase.com".into(), "zoominfo.com".into()],
        )
    }

    #[test]
    fn prefers_url_with_company_name() {
        let f = fetcher("http://unused.invalid/search");
        let hits = vec![
            hit("https://www.linkedin.com/company/acmecorp"),
            hit("https://directory.example/acme"),
            hit("https://www.acmecorp.com/"),
        ];
        assert_eq!(
            f.choose_site("Acme Corp", &hits).as_deref(),
            Some("https://www.acmecorp.com/")
        );
    }

    #[test]
    fn falls_back_to_first_allowed_hit() {
        let f = fetcher("http://unused.invalid/search");
        let hits = vec![
            hit("https://www.zoominfo.com/c/acme/1"),
            hit("https://directory.example/acme"),
        ];
        assert_eq!(
            f.choose_site("Acme Corp", &hits).as_deref(),
            Some("https://directory.example/acme")
        );
        assert_eq!(f.choose_site("Acme Corp", &[hit("https://linkedin.com/x")]), None);
    }

    #[test]
    fn internal_links_from_fixture() {
        let html = std::fs::read_to_string("../../../fixtures/html/company_home.html")
            .expect("missing fixture: company_home.html");
        let doc = Html::parse_document(&html);
        let base = Url::parse("https://www.acmecorp.com/").unwrap();
        let links = internal_links(&doc, &base);

        assert_eq!(
            links,
            vec![
                "https://www.acmecorp.com/about-us".to_string(),
                "https://www.acmecorp.com/company/leadership".to_string(),
                "https://www.acmecorp.com/contact".to_string(),
                "https://www.acmecorp.com/locations".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn fetches_site_and_internal_pages() {
        let server = wiremock::MockServer::start().await;
        let site = format!("{}/acmecorp/", server.uri());

        wiremock::Mock::given(wiremock::matchers::path("/search"))
            .and(wiremock::matchers::query_param("q", "Acme Corp TX official website"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(results_page(&[
                "https://www.linkedin.com/company/acmecorp".into(),
                site.clone(),
            ])))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/acmecorp/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<html><head><title>Acme Corp</title></head><body>
                   <h1>Widgets for industry</h1>
                   <a href="about">About</a> <a href="/contact#form">Contact</a>
                   <a href="https://elsewhere.example/about">Partner</a>
                   <a href="/products">Products</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/acmecorp/about"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<p>Founded in 1998 in Austin.</p>"),
            )
            .mount(&server)
            .await;
        // Contact page is down; it is skipped rather than failing the source.
        wiremock::Mock::given(wiremock::matchers::path("/contact"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = fetcher(&format!("{}/search", server.uri()))
            .fetch(&CompanyQuery::new("Acme Corp", Some("TX".into())))
            .await;

        let SourceResult::Structured(data) = result else {
            panic!("expected structured result, got {result:?}");
        };
        assert_eq!(data["url"], site.as_str());
        assert_eq!(data["title"], "Acme Corp");
        assert!(data["main_page"].as_str().unwrap().contains("Widgets for industry"));
        let pages = data["additional_pages"].as_array().unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0]["text"].as_str().unwrap().contains("Founded in 1998"));
    }

    #[tokio::test]
    async fn no_results_is_absent() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/search"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(results_page(&[])))
            .mount(&server)
            .await;

        let result = fetcher(&format!("{}/search", server.uri()))
            .fetch(&CompanyQuery::new("Acme Corp", None))
            .await;
        assert!(result.is_absent());
    }
}
