use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bibfetch_core::BibRecord;
use serde::Serialize;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::identifiers::doi::Doi;
use crate::sources::{DownloadBackend, MetadataBackend, PdfLocator};

/// What happened to one record on its way from title to PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved(PathBuf),
    NoDoiFound { cause: String },
    NoPdfUrlFound { doi: String, cause: String },
    DownloadFailed { url: String, cause: String },
    Skipped,
}

impl ResolutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::NoDoiFound { .. } | Self::NoPdfUrlFound { .. } | Self::DownloadFailed { .. }
        )
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::NoDoiFound { cause }
            | Self::NoPdfUrlFound { cause, .. }
            | Self::DownloadFailed { cause, .. } => Some(cause),
            Self::Resolved(_) | Self::Skipped => None,
        }
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(path) => write!(f, "resolved: {}", path.display()),
            Self::NoDoiFound { cause } => write!(f, "no DOI found: {cause}"),
            Self::NoPdfUrlFound { doi, cause } => write!(f, "no PDF URL for {doi}: {cause}"),
            Self::DownloadFailed { url, cause } => write!(f, "download of {url} failed: {cause}"),
            Self::Skipped => write!(f, "skipped, already has a file"),
        }
    }
}

/// Drives one record through DOI resolution, PDF location and download.
pub struct ResolutionPipeline {
    metadata: Arc<dyn MetadataBackend>,
    locator: Arc<dyn PdfLocator>,
    fetcher: Arc<dyn DownloadBackend>,
    output_dir: PathBuf,
    parent: Option<Span>,
}

impl ResolutionPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataBackend>,
        locator: Arc<dyn PdfLocator>,
        fetcher: Arc<dyn DownloadBackend>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            metadata,
            locator,
            fetcher,
            output_dir: output_dir.into(),
            parent: None,
        }
    }

    /// Nest record spans under `parent` when the caller has no span of its own.
    ///
    /// Records processed inside a batch keep the batch's `item` span as parent.
    pub fn with_parent_span(mut self, parent: Span) -> Self {
        self.parent = Some(parent);
        self
    }

    fn record_span(&self, label: &str) -> Span {
        match &self.parent {
            Some(parent) if Span::current().is_none() => {
                info_span!(parent: parent, "resolve", label = %label)
            }
            _ => info_span!("resolve", label = %label),
        }
    }

    /// Resolve `record`, setting its `file` field on success.
    ///
    /// Never fails: every problem becomes a non-`Resolved` outcome.
    pub async fn process(&self, record: &mut BibRecord) -> ResolutionOutcome {
        let label = record.label();
        let outcome = self.run(record).instrument(self.record_span(&label)).await;
        if let Some(cause) = outcome.cause() {
            warn!(label = %label, %cause, "{outcome}");
        }
        outcome
    }

    async fn run(&self, record: &mut BibRecord) -> ResolutionOutcome {
        if let Some(file) = record.file() {
            debug!(file, "record already has a file");
            return ResolutionOutcome::Skipped;
        }

        let doi = match self.doi_for(record).await {
            Ok(doi) => doi,
            Err(cause) => return ResolutionOutcome::NoDoiFound { cause },
        };
        info!(%doi, "doi found");

        let url = match self.locator.locate_pdf(&doi).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                return ResolutionOutcome::NoPdfUrlFound {
                    doi: doi.to_string(),
                    cause: format!("{} has no PDF for this DOI", self.locator.name()),
                };
            }
            Err(e) => {
                return ResolutionOutcome::NoPdfUrlFound {
                    doi: doi.to_string(),
                    cause: e.to_string(),
                };
            }
        };

        match self.fetcher.fetch(&url, &self.output_dir).await {
            Ok(path) => {
                record.set_file(&path);
                ResolutionOutcome::Resolved(path)
            }
            Err(e) => ResolutionOutcome::DownloadFailed {
                url,
                cause: e.to_string(),
            },
        }
    }

    /// The record's own DOI when it has a valid one, else the resolver's answer.
    async fn doi_for(&self, record: &BibRecord) -> std::result::Result<Doi, String> {
        if let Some(raw) = record.doi() {
            match Doi::parse(raw) {
                Ok(doi) => return Ok(doi),
                Err(e) => warn!(doi = raw, error = %e, "ignoring malformed doi field"),
            }
        }

        let Some(title) = record.title() else {
            return Err("record has neither a DOI nor a title".to_string());
        };
        debug!(title, backend = self.metadata.name(), "resolving doi");
        match self.metadata.resolve_doi(title).await {
            Ok(Some(doi)) => Ok(doi),
            Ok(None) => Err(format!("{} has no work titled {title:?}", self.metadata.name())),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{Result, ScienceError};
    use crate::identifiers::doi::Doi;
    use crate::sources::{DownloadBackend, MetadataBackend, PdfLocator};

    /// Resolves any title to `10.1000/<title with spaces as dashes>`; "unknown" resolves to nothing.
    #[derive(Default)]
    pub struct StubResolver {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl MetadataBackend for StubResolver {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn resolve_doi(&self, title: &str) -> Result<Option<Doi>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ScienceError::Timeout("https://resolver.test".to_string()));
            }
            if title == "unknown" {
                return Ok(None);
            }
            let suffix = title.trim().replace(' ', "-");
            Doi::parse(&format!("10.1000/{suffix}")).map(Some)
        }
    }

    /// Points every DOI at `https://pdf.test/<suffix>.pdf`, after sleeping 5ms per unit of the suffix's digit sum.
    #[derive(Default)]
    pub struct StubLocator {
        pub calls: AtomicUsize,
        pub missing: bool,
    }

    #[async_trait]
    impl PdfLocator for StubLocator {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn locate_pdf(&self, doi: &Doi) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Ok(None);
            }
            let suffix = doi.as_str().rsplit('/').next().unwrap_or_default();
            let delay: u64 = suffix
                .chars()
                .filter_map(|c| c.to_digit(10))
                .map(u64::from)
                .sum();
            tokio::time::sleep(Duration::from_millis(delay * 5)).await;
            Ok(Some(format!("https://pdf.test/{suffix}.pdf?download=true")))
        }
    }

    /// Pretends to download by joining the URL's file name to the destination.
    #[derive(Default)]
    pub struct StubFetcher {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl DownloadBackend for StubFetcher {
        async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ScienceError::Download("connection reset".to_string()));
            }
            let name = crate::download::filename_from_url(url)
                .ok_or_else(|| ScienceError::Download(url.to_string()))?;
            Ok(dest_dir.join(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{StubFetcher, StubLocator, StubResolver};
    use super::*;

    struct Fixture {
        resolver: Arc<StubResolver>,
        locator: Arc<StubLocator>,
        fetcher: Arc<StubFetcher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                resolver: Arc::new(StubResolver::default()),
                locator: Arc::new(StubLocator::default()),
                fetcher: Arc::new(StubFetcher::default()),
            }
        }

        fn pipeline(&self) -> ResolutionPipeline {
            ResolutionPipeline::new(
                self.resolver.clone(),
                self.locator.clone(),
                self.fetcher.clone(),
                "out",
            )
        }

        fn calls(&self) -> (usize, usize, usize) {
            (
                self.resolver.calls.load(Ordering::SeqCst),
                self.locator.calls.load(Ordering::SeqCst),
                self.fetcher.calls.load(Ordering::SeqCst),
            )
        }
    }

    #[test]
    fn record_span_keeps_the_callers_span_as_parent() {
        use tracing::Dispatch;
        use tracing_subscriber::registry::{LookupSpan, Registry};

        let dispatch = Dispatch::new(Registry::default());
        tracing::dispatcher::with_default(&dispatch, || {
            let registry = dispatch.downcast_ref::<Registry>().unwrap();
            let parent_name = |span: &Span| {
                let id = span.id().unwrap();
                registry.span(&id).unwrap().parent().map(|p| p.name())
            };

            let run = info_span!("bibfetch");
            let item = info_span!(parent: &run, "item", index = 3);
            let pipeline = Fixture::new().pipeline().with_parent_span(run.clone());

            let inside_batch = item.in_scope(|| pipeline.record_span("k"));
            assert_eq!(parent_name(&inside_batch), Some("item"));

            let standalone = pipeline.record_span("k");
            assert_eq!(parent_name(&standalone), Some("bibfetch"));
        });
    }

    #[tokio::test]
    async fn record_with_file_is_skipped_without_any_calls() {
        let fx = Fixture::new();
        let mut record = BibRecord::new("article", "done2020");
        record.set("title", "Already Here");
        record.set("FILE", "out/already.pdf");

        let outcome = fx.pipeline().process(&mut record).await;

        assert_eq!(outcome, ResolutionOutcome::Skipped);
        assert_eq!(fx.calls(), (0, 0, 0));
        assert_eq!(record.file(), Some("out/already.pdf"));
    }

    #[tokio::test]
    async fn existing_doi_bypasses_resolver() {
        let fx = Fixture::new();
        let mut record = BibRecord::new("article", "lecun2015");
        record.set("title", "Deep learning");
        record.set("DOI", " 10.1038/nature14539 ");

        let outcome = fx.pipeline().process(&mut record).await;

        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved(PathBuf::from("out").join("nature14539.pdf"))
        );
        assert_eq!(fx.calls(), (0, 1, 1));
        assert_eq!(
            record.file().map(PathBuf::from),
            Some(PathBuf::from("out").join("nature14539.pdf"))
        );
    }

    #[tokio::test]
    async fn malformed_doi_falls_back_to_title() {
        let fx = Fixture::new();
        let mut record = BibRecord::from_title("deep learning");
        record.set("doi", "not a doi");

        let outcome = fx.pipeline().process(&mut record).await;

        assert!(matches!(outcome, ResolutionOutcome::Resolved(_)));
        assert_eq!(fx.calls(), (1, 1, 1));
    }

    #[tokio::test]
    async fn resolver_error_becomes_no_doi_found() {
        let fx = Fixture {
            resolver: Arc::new(StubResolver {
                fail: true,
                ..Default::default()
            }),
            ..Fixture::new()
        };
        let mut record = BibRecord::from_title("Deep learning");

        let outcome = fx.pipeline().process(&mut record).await;

        assert!(matches!(
            outcome,
            ResolutionOutcome::NoDoiFound { ref cause } if cause.contains("timed out")
        ));
        assert_eq!(fx.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn unknown_title_and_missing_title_are_no_doi_found() {
        let fx = Fixture::new();
        let mut unknown = BibRecord::from_title("unknown");
        let mut empty = BibRecord::new("misc", "empty");

        let pipeline = fx.pipeline();
        assert!(matches!(
            pipeline.process(&mut unknown).await,
            ResolutionOutcome::NoDoiFound { .. }
        ));
        assert!(matches!(
            pipeline.process(&mut empty).await,
            ResolutionOutcome::NoDoiFound { .. }
        ));
        assert_eq!(fx.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn missing_pdf_url_keeps_doi_in_outcome() {
        let fx = Fixture {
            locator: Arc::new(StubLocator {
                missing: true,
                ..Default::default()
            }),
            ..Fixture::new()
        };
        let mut record = BibRecord::from_title("deep learning");

        let outcome = fx.pipeline().process(&mut record).await;

        assert!(matches!(
            outcome,
            ResolutionOutcome::NoPdfUrlFound { ref doi, .. } if doi == "10.1000/deep-learning"
        ));
        assert_eq!(fx.calls(), (1, 1, 0));
    }

    #[tokio::test]
    async fn failed_download_leaves_file_unset() {
        let fx = Fixture {
            fetcher: Arc::new(StubFetcher {
                fail: true,
                ..Default::default()
            }),
            ..Fixture::new()
        };
        let mut record = BibRecord::from_title("deep learning");

        let outcome = fx.pipeline().process(&mut record).await;

        assert!(matches!(
            outcome,
            ResolutionOutcome::DownloadFailed { ref url, .. } if url.ends_with("deep-learning.pdf?download=true")
        ));
        assert_eq!(record.file(), None);
        assert_eq!(fx.calls(), (1, 1, 1));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(ResolutionOutcome::NoDoiFound {
            cause: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "no_doi_found");
        assert_eq!(json["detail"]["cause"], "x");
    }
}
