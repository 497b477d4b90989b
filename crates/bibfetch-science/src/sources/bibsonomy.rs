use async_trait::async_trait;
use bibfetch_core::BibRecord;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::{ClientSettings, RateLimitedClient};
use crate::sources::BibtexBackend;

const BASE_URL: &str = "https://www.bibsonomy.org/api";

/// Post fields that carry service bookkeeping rather than bibliography.
const IGNORED_KEYS: &[&str] = &["intrahash", "interhash", "href", "misc", "bibtexAbstract"];

/// BibSonomy REST API client, authenticated with a username and API key.
pub struct BibsonomySource {
    client: RateLimitedClient,
    base_url: String,
    username: String,
    api_key: String,
}

impl BibsonomySource {
    pub fn new(
        base_url: &str,
        username: &str,
        api_key: &str,
        settings: &ClientSettings,
    ) -> Result<Self> {
        let base_url = if base_url.trim().is_empty() {
            BASE_URL
        } else {
            base_url
        };
        Ok(Self {
            client: RateLimitedClient::new(settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/posts?resourcetype=bibtex&search={}&format=json",
            self.base_url,
            urlencoding::encode(query)
        )
    }
}

#[async_trait]
impl BibtexBackend for BibsonomySource {
    fn name(&self) -> &'static str {
        "bibsonomy"
    }

    async fn search_bibtex(&self, query: &str) -> Result<Vec<BibRecord>> {
        let query = strip_punctuation(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.search_url(&query);
        debug!(%query, "searching bibsonomy");
        let val: Value = self
            .client
            .get_json_basic_auth(&url, &self.username, &self.api_key)
            .await?;
        Ok(parse_posts(&val, &query))
    }
}

/// Records from a `/posts` response, ordered by year (title when a post has none).
pub fn parse_posts(v: &Value, query: &str) -> Vec<BibRecord> {
    let stat = v["stat"].as_str().unwrap_or_default();
    if stat != "ok" {
        warn!(%query, stat, "bibsonomy query failed");
        return Vec::new();
    }

    let mut records: Vec<BibRecord> = v["posts"]["post"]
        .as_array()
        .map(|posts| {
            posts
                .iter()
                .filter_map(|post| post["bibtex"].as_object())
                .map(record_from_post)
                .collect()
        })
        .unwrap_or_default();

    records.sort_by_cached_key(sort_key);
    records
}

fn record_from_post(bibtex: &serde_json::Map<String, Value>) -> BibRecord {
    let mut record = BibRecord::default();
    for (key, value) in bibtex {
        let Some(text) = scalar_text(value) else {
            continue;
        };
        if IGNORED_KEYS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            "bibtexKey" => record.citation_key = text.trim().to_string(),
            "entrytype" => record.entry_type = text.trim().to_string(),
            // Names are split on `and` and rejoined one separator apart.
            "author" => {
                record.set("author", text);
                let authors = record.authors();
                record.set_authors(&authors);
            }
            _ => {
                let text = collapse_whitespace(&text);
                if !text.is_empty() {
                    record.set(key, text);
                }
            }
        }
    }
    record
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn sort_key(record: &BibRecord) -> String {
    record
        .get("year")
        .or_else(|| record.title())
        .unwrap_or_default()
        .to_string()
}

/// Replace ASCII punctuation with spaces and collapse runs of whitespace.
pub fn strip_punctuation(query: &str) -> String {
    let spaced: String = query
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();
    collapse_whitespace(&spaced)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
