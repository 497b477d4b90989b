//! bibfetch core: bibliographic records, the BibTeX record store, configuration.

pub mod bibtex;
pub mod config;
pub mod error;
pub mod models;

pub use bibtex::{
    BibtexDocument, BibtexStore, SaveSummary, parse_bibtex, parse_document, render_record,
    timestamped_bib_path,
};
pub use config::{
    AppConfig, BibtexBackendKind, DoiBackend, InputConfig, InputKind, Mode, PdfBackend,
    ValidatedBackends,
};
pub use error::{CoreError, ExitCode, Result};
pub use models::BibRecord;
