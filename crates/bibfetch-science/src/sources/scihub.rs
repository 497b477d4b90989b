use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::error::{Result, ScienceError};
use crate::http::{ClientSettings, RateLimitedClient};
use crate::identifiers::doi::Doi;
use crate::sources::PdfLocator;

const DEFAULT_BASE_URL: &str = "https://sci-hub.se/";

/// Body text the site serves with a 200 when it has no copy of the article.
const NOT_FOUND_MARKERS: &[&str] = &["article not found"];

static HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"location\.href\s*=\s*(?:'([^']*)'|"([^"]*)"|([^;\s]+))"#).expect("valid regex")
});

/// Locates PDFs by scraping the download button of a Sci-Hub style mirror.
pub struct SciHubLocator {
    client: RateLimitedClient,
    base_url: String,
}

impl SciHubLocator {
    pub fn new(base_url: &str, settings: &ClientSettings) -> Result<Self> {
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            client: RateLimitedClient::new(settings)?,
            base_url,
        })
    }

    pub fn lookup_url(&self, doi: &Doi) -> String {
        format!("{}{}", self.base_url, doi.as_str())
    }

    /// Extract the download URL from a mirror page, `None` if the page has no
    /// download trigger.
    pub fn parse_page(&self, html: &str) -> Result<Option<String>> {
        let selector = Selector::parse("a[onclick]")
            .map_err(|e| ScienceError::Parse(format!("invalid selector a[onclick]: {e}")))?;
        let document = Html::parse_document(html);

        let href = document
            .select(&selector)
            .filter_map(|el| el.value().attr("onclick"))
            .find_map(extract_location_href);

        Ok(href.map(|url| absolutize(&url, &self.base_url)))
    }
}

#[async_trait]
impl PdfLocator for SciHubLocator {
    fn name(&self) -> &'static str {
        "scihub"
    }

    async fn locate_pdf(&self, doi: &Doi) -> Result<Option<String>> {
        let url = self.lookup_url(doi);
        debug!(%url, "fetching mirror page");
        let page = self.client.get_page(&url).await?;
        if page.status != 200 {
            debug!(status = page.status, %doi, "mirror page unavailable");
            return Ok(None);
        }
        if is_not_found_page(&page.body) {
            debug!(%doi, "mirror reports article not found");
            return Ok(None);
        }

        let pdf_url = self.parse_page(&page.body)?;
        if let Some(found) = &pdf_url {
            info!(%doi, url = %found, "found pdf url");
        }
        Ok(pdf_url)
    }
}

fn is_not_found_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m))
}

/// The URL assigned by a `location.href=` in an inline handler, quotes stripped.
fn extract_location_href(onclick: &str) -> Option<String> {
    let caps = HREF_RE.captures(onclick)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    let url = raw.trim().trim_matches(|c| c == '\'' || c == '"').trim();
    (!url.is_empty()).then(|| url.to_string())
}

fn absolutize(src: &str, base_url: &str) -> String {
    if src.starts_with("//") {
        return format!("https:{src}");
    }
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    let origin = origin_of(base_url);
    if src.starts_with('/') {
        return format!("{origin}{src}");
    }
    format!("{}/{}", origin, src)
}

fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url.trim_end_matches('/'),
    }
}
