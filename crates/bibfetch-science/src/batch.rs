use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bibfetch_core::{BibRecord, BibtexStore, SaveSummary};
use futures::StreamExt;
use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};

use crate::error::Result;
use crate::pipeline::{ResolutionOutcome, ResolutionPipeline};

/// One unit of work: a bare title or a full record.
#[derive(Debug, Clone)]
pub enum BatchInput {
    Title(String),
    Record(BibRecord),
}

impl BatchInput {
    fn into_record(self) -> BibRecord {
        match self {
            Self::Title(title) => BibRecord::from_title(&title),
            Self::Record(record) => record,
        }
    }
}

impl From<BibRecord> for BatchInput {
    fn from(record: BibRecord) -> Self {
        Self::Record(record)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub label: String,
    pub record: BibRecord,
    pub outcome: ResolutionOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub resolved: usize,
    pub skipped: usize,
    pub no_doi: usize,
    pub no_pdf_url: usize,
    pub download_failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.resolved + self.skipped + self.no_doi + self.no_pdf_url + self.download_failed
    }

    pub fn failed(&self) -> usize {
        self.no_doi + self.no_pdf_url + self.download_failed
    }
}

/// Per-item outcomes of a batch, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    /// Set when the batch rewrote a BibTeX file.
    #[serde(skip)]
    pub saved: Option<SaveSummary>,
}

impl BatchReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for item in &self.items {
            match item.outcome {
                ResolutionOutcome::Resolved(_) => counts.resolved += 1,
                ResolutionOutcome::Skipped => counts.skipped += 1,
                ResolutionOutcome::NoDoiFound { .. } => counts.no_doi += 1,
                ResolutionOutcome::NoPdfUrlFound { .. } => counts.no_pdf_url += 1,
                ResolutionOutcome::DownloadFailed { .. } => counts.download_failed += 1,
            }
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| i.outcome.is_failure())
    }

    pub fn records(&self) -> Vec<BibRecord> {
        self.items.iter().map(|i| i.record.clone()).collect()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.counts();
        writeln!(
            f,
            "{} item(s): {} resolved, {} skipped, {} without DOI, {} without PDF URL, {} failed downloads",
            c.total(),
            c.resolved,
            c.skipped,
            c.no_doi,
            c.no_pdf_url,
            c.download_failed
        )?;
        for item in self.failures() {
            let cause = item.outcome.cause().unwrap_or_default();
            writeln!(f, "  #{} {}: {}", item.index, item.label, cause)?;
        }
        if let Some(saved) = &self.saved
            && !saved.rejected.is_empty()
        {
            writeln!(f, "{} record(s) left out of the BibTeX file", saved.rejected.len())?;
        }
        Ok(())
    }
}

/// Runs the resolution pipeline over many inputs with bounded concurrency.
pub struct BatchRunner {
    pipeline: Arc<ResolutionPipeline>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<ResolutionPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every input, at most `concurrency` at a time. The report
    /// follows input order regardless of completion order.
    pub async fn run(&self, inputs: Vec<BatchInput>) -> BatchReport {
        info!(items = inputs.len(), concurrency = self.concurrency, "starting batch");

        let mut items: Vec<ItemReport> = futures::stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| {
                let pipeline = Arc::clone(&self.pipeline);
                let mut record = input.into_record();
                let label = record.label();
                let span = info_span!("item", index, label = %label);
                async move {
                    let outcome = pipeline.process(&mut record).await;
                    ItemReport {
                        index,
                        label,
                        record,
                        outcome,
                    }
                }
                .instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        items.sort_by_key(|item| item.index);
        BatchReport { items, saved: None }
    }

    /// Resolve every entry of a BibTeX file and rewrite it once with the
    /// `file` fields filled in. Preamble, macro and comment blocks are kept.
    ///
    /// A file that fails to load is returned as an error and never written.
    pub async fn run_bibtex_file(&self, path: &Path) -> Result<BatchReport> {
        let mut document = BibtexStore::load(path)?;
        info!(
            path = %path.display(),
            entries = document.records.len(),
            blocks = document.blocks.len(),
            "loaded bibliography"
        );

        let records = std::mem::take(&mut document.records);
        let mut report = self
            .run(records.into_iter().map(BatchInput::Record).collect())
            .await;

        document.records = report.records();
        let summary = BibtexStore::save_document(path, &document)?;
        for (index, reason) in &summary.rejected {
            warn!(index, %reason, "record left out of bibliography");
        }
        info!(path = %path.display(), written = summary.written, "bibliography saved");
        report.saved = Some(summary);
        Ok(report)
    }
}
