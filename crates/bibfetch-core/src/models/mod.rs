pub mod record;

pub use record::{BibRecord, Field};
