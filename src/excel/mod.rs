//! Spreadsheet containers: reading, writing and the package internals
//!
//! - Reader: XLSX/CSV → [`Workbook`](crate::types::Workbook) → row grids and records
//! - Writer: headers/rows and cell updates → XLSX, CSV or PDF bytes
//! - Package: format sniffing and the document-property parts calamine skips

pub mod csv_text;
pub mod package;
pub mod pdf;
pub mod reader;
pub mod writer;

pub use csv_text::excel_csv_to_array;
pub use package::{sniff_format, ContainerFormat};
pub use pdf::{PdfRenderer, TablePdfRenderer};
pub use reader::{GridRead, ReadStrategy, RecordRead, TabularReader};
pub use writer::{OutputType, TabularWriter};
