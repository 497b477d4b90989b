use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bibfetch_core::{BibRecord, BibtexStore, SaveSummary};
use futures::StreamExt;
use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};

use crate::error::Result;
use crate::sources::BibtexBackend;
use crate::title::normalize_title;

/// Search result for one title.
#[derive(Debug, Clone, Serialize)]
pub struct CollectedItem {
    pub index: usize,
    pub query: String,
    pub record: Option<BibRecord>,
    /// Why nothing was found, when the search itself failed.
    pub error: Option<String>,
}

/// Outcome of a [`BibliographyCollector::collect`] run, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectReport {
    pub items: Vec<CollectedItem>,
}

impl CollectReport {
    pub fn found(&self) -> impl Iterator<Item = &BibRecord> {
        self.items.iter().filter_map(|i| i.record.as_ref())
    }

    pub fn missing(&self) -> impl Iterator<Item = &CollectedItem> {
        self.items.iter().filter(|i| i.record.is_none())
    }

    pub fn records(&self) -> Vec<BibRecord> {
        self.found().cloned().collect()
    }

    /// Write every found record to `path` in one go.
    pub fn write_bibliography(&self, path: &Path) -> Result<SaveSummary> {
        let summary = BibtexStore::save(path, &self.records())?;
        for (index, reason) in &summary.rejected {
            warn!(index, %reason, "record left out of bibliography");
        }
        info!(path = %path.display(), written = summary.written, "bibliography written");
        Ok(summary)
    }
}

impl fmt::Display for CollectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let found = self.found().count();
        writeln!(
            f,
            "{} title(s): {} BibTeX entries found, {} missing",
            self.items.len(),
            found,
            self.items.len() - found
        )?;
        for item in self.missing() {
            match &item.error {
                Some(error) => writeln!(f, "  #{} {}: {}", item.index, item.query, error)?,
                None => writeln!(f, "  #{} {}: no results", item.index, item.query)?,
            }
        }
        Ok(())
    }
}

/// Looks up a BibTeX entry for each title through a bibliography service.
pub struct BibliographyCollector {
    backend: Arc<dyn BibtexBackend>,
    concurrency: usize,
}

impl BibliographyCollector {
    pub fn new(backend: Arc<dyn BibtexBackend>, concurrency: usize) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn collect(&self, titles: Vec<String>) -> CollectReport {
        info!(
            titles = titles.len(),
            backend = self.backend.name(),
            "collecting bibtex entries"
        );

        let mut items: Vec<CollectedItem> = futures::stream::iter(titles.into_iter().enumerate())
            .map(|(index, query)| {
                let backend = Arc::clone(&self.backend);
                let span = info_span!("bibtex", index, title = %query);
                async move {
                    match backend.search_bibtex(&query).await {
                        Ok(results) => {
                            let record = pick_best(&query, results);
                            if record.is_none() {
                                warn!(title = %query, "no bibtex entry found");
                            }
                            CollectedItem {
                                index,
                                query,
                                record,
                                error: None,
                            }
                        }
                        Err(e) => {
                            warn!(title = %query, error = %e, "bibtex search failed");
                            CollectedItem {
                                index,
                                query,
                                record: None,
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
                .instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        items.sort_by_key(|item| item.index);
        CollectReport { items }
    }
}

/// The first result whose title matches `query` after normalization, else
/// the first result.
pub fn pick_best(query: &str, results: Vec<BibRecord>) -> Option<BibRecord> {
    let wanted = normalize_title(query);
    let exact = results
        .iter()
        .position(|r| r.title().is_some_and(|t| normalize_title(t) == wanted));
    let mut results = results;
    match exact {
        Some(pos) => Some(results.swap_remove(pos)),
        None if results.is_empty() => None,
        None => {
            let first = results.swap_remove(0);
            info!(query, picked = %first.label(), "no exact title match, using first result");
            Some(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::tempdir;

    use super::*;
    use crate::error::ScienceError;

    fn entry(key: &str, title: &str) -> BibRecord {
        let mut record = BibRecord::new("article", key);
        record.set("title", title);
        record
    }

    /// Returns two hits per query; "fail" errors, "none" finds nothing.
    #[derive(Default)]
    struct StubBibtex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BibtexBackend for StubBibtex {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn search_bibtex(&self, query: &str) -> Result<Vec<BibRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = if query.len() % 2 == 0 { 20 } else { 1 };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            match query {
                "fail" => Err(ScienceError::Parse("blocked".to_string())),
                "none" => Ok(Vec::new()),
                _ => Ok(vec![
                    entry("other", &format!("{query}: a survey")),
                    entry(&query.replace(' ', ""), query),
                ]),
            }
        }
    }

    #[test]
    fn exact_title_beats_earlier_result() {
        let results = vec![
            entry("survey", "Deep Learning: A Survey"),
            entry("lecun2015", "Deep  learning"),
        ];
        let picked = pick_best("deep learning", results).unwrap();
        assert_eq!(picked.citation_key, "lecun2015");
    }

    #[test]
    fn falls_back_to_first_result() {
        let results = vec![entry("first", "Something"), entry("second", "Else")];
        assert_eq!(pick_best("deep learning", results).unwrap().citation_key, "first");
        assert!(pick_best("deep learning", Vec::new()).is_none());
    }

    #[tokio::test]
    async fn collect_keeps_order_and_reports_missing() {
        let backend = Arc::new(StubBibtex::default());
        let collector = BibliographyCollector::new(backend.clone(), 3);
        let titles = vec![
            "graph networks".to_string(),
            "fail".to_string(),
            "none".to_string(),
            "deep learning".to_string(),
        ];

        let report = collector.collect(titles).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        let queries: Vec<&str> = report.items.iter().map(|i| i.query.as_str()).collect();
        assert_eq!(queries, vec!["graph networks", "fail", "none", "deep learning"]);
        let keys: Vec<&str> = report.found().map(|r| r.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["graphnetworks", "deeplearning"]);
        assert_eq!(report.items[1].error.as_deref(), Some("parse error: blocked"));
        assert_eq!(report.missing().count(), 2);
        assert!(report.to_string().contains("#2 none: no results"));
    }

    #[tokio::test]
    async fn found_records_are_written_once() {
        let backend = Arc::new(StubBibtex::default());
        let collector = BibliographyCollector::new(backend, 2);
        let report = collector
            .collect(vec!["deep learning".to_string(), "none".to_string()])
            .await;

        let dir = tempdir().unwrap();
        let path = dir.path().join("references.bib");
        let summary = report.write_bibliography(&path).unwrap();

        assert_eq!(summary.written, 1);
        let reloaded = BibtexStore::load(&path).unwrap().records;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].citation_key, "deeplearning");
        assert_eq!(reloaded[0].title(), Some("deep learning"));
    }
}
