use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::http::{ClientSettings, RateLimitedClient};
use crate::identifiers::doi::Doi;
use crate::sources::MetadataBackend;
use crate::title::normalize_title;

const BASE_URL: &str = "https://api.crossref.org";
const DEFAULT_ROWS: u32 = 20;

pub struct CrossRefSource {
    client: RateLimitedClient,
    base_url: String,
    rows: u32,
}

/// One search hit: its DOI and every title it is known under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossRefCandidate {
    pub doi: Option<String>,
    pub titles: Vec<String>,
}

/// Parsed `/works?query=` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossRefSearch {
    pub status: String,
    pub candidates: Vec<CrossRefCandidate>,
}

impl CrossRefSource {
    /// An empty `base_url` or zero `rows` falls back to the public API defaults.
    pub fn new(
        base_url: &str,
        rows: u32,
        polite_email: Option<&str>,
        settings: &ClientSettings,
    ) -> Result<Self> {
        let mut settings = settings.clone();
        if let Some(email) = polite_email.map(str::trim).filter(|e| !e.is_empty()) {
            settings.user_agent = format!("{} (mailto:{email})", settings.user_agent);
        }

        let base_url = if base_url.trim().is_empty() {
            BASE_URL
        } else {
            base_url
        };
        Ok(Self {
            client: RateLimitedClient::new(&settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            rows: if rows == 0 { DEFAULT_ROWS } else { rows },
        })
    }

    pub async fn search_works(&self, query: &str) -> Result<CrossRefSearch> {
        let url = format!(
            "{}/works?query={}&rows={}&select=DOI,title",
            self.base_url,
            urlencoding::encode(query),
            self.rows
        );
        let val: Value = self.client.get_json(&url).await?;
        Ok(CrossRefSearch::from_json(&val))
    }
}

impl CrossRefSearch {
    pub fn from_json(v: &Value) -> Self {
        let status = v["status"].as_str().unwrap_or_default().to_string();
        let candidates = v["message"]["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| CrossRefCandidate {
                        doi: item["DOI"].as_str().map(ToOwned::to_owned),
                        titles: item["title"]
                            .as_array()
                            .map(|a| {
                                a.iter()
                                    .filter_map(Value::as_str)
                                    .map(ToOwned::to_owned)
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { status, candidates }
    }

    /// DOI of the first candidate, in response order, with any title equal to
    /// `query` after normalization. Later candidates are never consulted once
    /// one matches.
    pub fn first_match(&self, query: &str) -> Option<Doi> {
        if self.status != "ok" {
            return None;
        }
        let wanted = normalize_title(query);
        self.candidates
            .iter()
            .filter(|c| c.titles.iter().any(|t| normalize_title(t) == wanted))
            .find_map(|c| c.doi.as_deref().and_then(|d| Doi::parse(d).ok()))
    }
}

#[async_trait]
impl MetadataBackend for CrossRefSource {
    fn name(&self) -> &'static str {
        "crossref"
    }

    async fn resolve_doi(&self, title: &str) -> Result<Option<Doi>> {
        let query = normalize_title(title);
        if query.is_empty() {
            return Ok(None);
        }
        let search = self.search_works(&query).await?;
        debug!(
            status = %search.status,
            candidates = search.candidates.len(),
            "crossref search finished"
        );
        Ok(search.first_match(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScienceError;
    use crate::http::test_settings;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn source(base_url: &str) -> CrossRefSource {
        CrossRefSource::new(base_url, 20, None, &test_settings()).unwrap()
    }

    fn works_path() -> Matcher {
        Matcher::Regex(r"^/works(\?.*)?$".to_string())
    }

    #[test]
    fn blank_settings_fall_back_to_public_api() {
        let source = CrossRefSource::new(" ", 0, None, &test_settings()).unwrap();
        assert_eq!(source.base_url, BASE_URL);
        assert_eq!(source.rows, DEFAULT_ROWS);
    }

    #[tokio::test]
    async fn picks_exact_match_further_down_the_list() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", works_path())
            .match_query(Matcher::UrlEncoded("query".into(), "baz qux".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "status": "ok",
                    "message": {"items": [
                        {"DOI": "10.1000/foo", "title": ["Foo Bar"]},
                        {"DOI": "10.1000/baz", "title": ["Baz Qux"]}
                    ]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let doi = source(&server.url()).resolve_doi("  Baz   QUX ").await.unwrap();
        assert_eq!(doi.map(|d| d.to_string()).as_deref(), Some("10.1000/baz"));
    }

    #[tokio::test]
    async fn not_found_when_status_is_not_ok() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", works_path())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "status": "failed",
                    "message": {"items": [{"DOI": "10.1000/baz", "title": ["Baz Qux"]}]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        assert_eq!(source(&server.url()).resolve_doi("Baz Qux").await.unwrap(), None);
    }

    #[tokio::test]
    async fn not_found_when_no_candidates() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", works_path())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"status": "ok", "message": {"items": []}}).to_string())
            .create_async()
            .await;

        assert_eq!(source(&server.url()).resolve_doi("Baz Qux").await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_propagates() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", works_path())
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = source(&server.url()).resolve_doi("Baz Qux").await.unwrap_err();
        assert!(matches!(err, ScienceError::ApiError(..)));
    }

    #[test]
    fn first_match_wins_over_later_matches() {
        let search = CrossRefSearch::from_json(&json!({
            "status": "ok",
            "message": {"items": [
                {"DOI": "10.1000/other", "title": ["Something Else"]},
                {"DOI": "10.1000/first", "title": ["Titre Original", "Baz  Qux"]},
                {"DOI": "10.1000/second", "title": ["baz qux"]}
            ]}
        }));
        assert_eq!(
            search.first_match("baz qux").map(|d| d.to_string()).as_deref(),
            Some("10.1000/first")
        );
    }

    #[test]
    fn partial_title_is_not_a_match() {
        let search = CrossRefSearch::from_json(&json!({
            "status": "ok",
            "message": {"items": [
                {"DOI": "10.1000/long", "title": ["Baz Qux: An Extended Study"]},
                {"title": ["Baz Qux"]}
            ]}
        }));
        assert_eq!(search.first_match("Baz Qux"), None);
    }
}
