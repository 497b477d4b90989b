use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bibfetch_core::{
    AppConfig, BibRecord, BibtexBackendKind, DoiBackend, PdfBackend, ValidatedBackends,
};

use crate::download::HttpFileFetcher;
use crate::error::Result;
use crate::http::ClientSettings;
use crate::identifiers::doi::Doi;

pub mod bibsonomy;
pub mod crossref;
pub mod scholar;
pub mod scihub;

use bibsonomy::BibsonomySource;
use crossref::CrossRefSource;
use scholar::ScholarSource;
use scihub::SciHubLocator;

/// Finds the DOI of a publication from its title.
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the index has no matching work; `Err` for transport
    /// or response failures.
    async fn resolve_doi(&self, title: &str) -> Result<Option<Doi>>;
}

/// Turns a DOI into a direct PDF URL.
#[async_trait]
pub trait PdfLocator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate_pdf(&self, doi: &Doi) -> Result<Option<String>>;
}

/// Materializes a URL as a file inside `dest_dir`.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Searches a bibliography service for BibTeX entries matching a title.
#[async_trait]
pub trait BibtexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search_bibtex(&self, query: &str) -> Result<Vec<BibRecord>>;
}

/// The concrete backends picked by a validated configuration.
pub struct Backends {
    pub metadata: Arc<dyn MetadataBackend>,
    pub locator: Arc<dyn PdfLocator>,
    pub downloader: Arc<dyn DownloadBackend>,
    pub bibtex: Option<Arc<dyn BibtexBackend>>,
}

impl Backends {
    pub fn from_config(config: &AppConfig, selected: &ValidatedBackends) -> Result<Self> {
        let settings = ClientSettings::from_network(&config.network);

        let metadata: Arc<dyn MetadataBackend> = match selected.doi {
            DoiBackend::Crossref => Arc::new(CrossRefSource::new(
                &config.crossref.base_url,
                config.crossref.rows,
                config.crossref.polite_email.as_deref(),
                &settings,
            )?),
        };

        let locator: Arc<dyn PdfLocator> = match selected.pdf {
            PdfBackend::SciHub => Arc::new(SciHubLocator::new(&config.scihub.base_url, &settings)?),
        };

        let bibtex: Option<Arc<dyn BibtexBackend>> = match &selected.bibtex {
            None => None,
            Some(BibtexBackendKind::Scholar) => Some(Arc::new(ScholarSource::new(
                &config.scholar.base_url,
                &settings,
            )?)),
            Some(BibtexBackendKind::Bibsonomy { username, api_key }) => {
                Some(Arc::new(BibsonomySource::new(
                    &config.bibsonomy.base_url,
                    username,
                    api_key,
                    &settings,
                )?))
            }
        };

        Ok(Self {
            metadata,
            locator,
            downloader: Arc::new(HttpFileFetcher::new(&settings)?),
            bibtex,
        })
    }
}
