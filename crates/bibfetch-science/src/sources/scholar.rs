use async_trait::async_trait;
use bibfetch_core::{BibRecord, parse_bibtex};
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::{Result, ScienceError};
use crate::http::{ClientSettings, RateLimitedClient};
use crate::sources::BibtexBackend;

const BASE_URL: &str = "https://scholar.google.com";

/// Preference cookie that makes result pages carry "Import into BibTeX" links.
const BIBTEX_PREFS_COOKIE: &str = "GSP=CF=4";

/// Google Scholar search, following each hit's BibTeX export link.
pub struct ScholarSource {
    client: RateLimitedClient,
    base_url: String,
}

impl ScholarSource {
    pub fn new(base_url: &str, settings: &ClientSettings) -> Result<Self> {
        let base_url = if base_url.trim().is_empty() {
            BASE_URL
        } else {
            base_url
        };
        Ok(Self {
            client: RateLimitedClient::new(settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/scholar?q={}&hl=en",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    /// Absolute URLs of every BibTeX export link on a result page.
    pub fn bibtex_links(&self, html: &str) -> Result<Vec<String>> {
        let selector = Selector::parse(r#"a[href*="scholar.bib"]"#)
            .map_err(|e| ScienceError::Parse(format!("invalid selector: {e}")))?;
        let document = Html::parse_document(html);
        Ok(document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| self.absolute(href))
            .collect())
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{}", self.base_url, href)
        } else {
            format!("{}/{}", self.base_url, href)
        }
    }
}

#[async_trait]
impl BibtexBackend for ScholarSource {
    fn name(&self) -> &'static str {
        "scholar"
    }

    async fn search_bibtex(&self, query: &str) -> Result<Vec<BibRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static(BIBTEX_PREFS_COOKIE));
        let page = self
            .client
            .get_page_with_headers(&self.search_url(query), headers)
            .await?;
        if page.status != 200 {
            return Err(ScienceError::ApiError(
                self.search_url(query),
                format!("HTTP {}", page.status),
            ));
        }

        let links = self.bibtex_links(&page.body)?;
        debug!(%query, links = links.len(), "scholar results");

        let mut records = Vec::new();
        for link in links {
            let text = match self.client.get(&link).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(url = %link, error = %e, "bibtex export unavailable");
                    continue;
                }
            };
            match parse_bibtex(&text) {
                Ok(parsed) => records.extend(parsed),
                Err(e) => warn!(url = %link, error = %e, "unreadable bibtex export"),
            }
        }
        Ok(records)
    }
}
