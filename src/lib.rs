//! xbrl-sheets - Spreadsheet to XBRL fact extraction
//!
//! Resolves named ranges of a workbook against a declarative taxonomy,
//! builds validated facts and reconstructs a sectioned, tabular layout
//! from them.
//!
//! Licensed under AGPL-3.0

pub mod config;
pub mod extract;
pub mod qname;
pub mod report;
pub mod results;
pub mod taxonomy;
pub mod utr;
pub mod workbook;

pub use config::ConversionConfig;
pub use extract::{convert_workbook, Conversion, Extractor};
pub use qname::{NamespaceManager, QName};
pub use report::layout::{ReportLayoutOrganiser, ReportSection};
pub use report::{Fact, FactBuilder, Period, Report};
pub use results::{ConversionResults, ConversionResultsBuilder, Message, MessageType, Severity};
pub use taxonomy::registry::TaxonomyRegistry;
pub use taxonomy::{Concept, ConceptId, PresentationStyle, Taxonomy};
pub use utr::UnitRegistry;
pub use workbook::{CellRange, CellValue, Workbook};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid QName: {0}")]
    QName(String),

    #[error("Invalid namespace binding: {0}")]
    NamespacePrefix(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Unknown taxonomy: {0}")]
    UnknownTaxonomy(String),

    #[error("Ambiguous component: {0}")]
    AmbiguousComponent(String),

    #[error("Unit error: {0}")]
    Unit(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Invalid cell range: {0}")]
    CellRange(String),

    #[error("Conversion aborted early: {0}")]
    EarlyAbort(String),
}
