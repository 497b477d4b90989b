//! bibfetch science: title → DOI → PDF resolution over Crossref, Sci-Hub and friends.

pub mod batch;
pub mod bibliography;
pub mod download;
pub mod error;
pub mod http;
pub mod identifiers;
pub mod pipeline;
pub mod sources;
pub mod title;

pub use batch::{BatchInput, BatchReport, BatchRunner, ItemReport, OutcomeCounts};
pub use bibliography::{BibliographyCollector, CollectReport, CollectedItem};
pub use download::{HttpFileFetcher, filename_from_url};
pub use error::{Result, ScienceError};
pub use identifiers::doi::Doi;
pub use pipeline::{ResolutionOutcome, ResolutionPipeline};
pub use sources::{Backends, BibtexBackend, DownloadBackend, MetadataBackend, PdfLocator};
pub use title::normalize_title;
