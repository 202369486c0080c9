//! xlbridge - spreadsheet data interchange
//!
//! Reads XLSX and CSV workbooks into plain row grids and header-keyed
//! records, builds new workbooks from headers and rows, applies cell updates,
//! and writes the result back out as XLSX, CSV or PDF.
//!
//! # Features
//!
//! - Lazy loading with format sniffing (XLSX by content, CSV/TSV by extension)
//! - Per-cell read fallback (formatted, then raw, then blank) with an error log
//! - Excel serial date conversion on the 1900 epoch
//! - Document properties (core, app and custom) round trip through XLSX
//! - Hidden rows, cell lock/hidden flags and sheet protection
//!
//! # Example
//!
//! ```no_run
//! use xlbridge::Engine;
//!
//! let mut engine = Engine::open("report.xlsx", 0, Some(10_000))?;
//! let grid = engine.to_array(None)?;
//! println!("Sheets read: {}", grid.len());
//!
//! engine.save(Some(std::path::Path::new("report.csv")), "Csv")?;
//! # Ok::<(), xlbridge::SheetError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod excel;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, WorkbookState};
pub use error::{SheetError, SheetResult};
pub use excel::OutputType;
pub use types::{CellInput, PropertySet, PropertyValue, UpdateCell, Workbook};
