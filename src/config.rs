//! Engine configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SheetError, SheetResult};

/// Settings an [`Engine`](crate::engine::Engine) starts from.
///
/// ```yaml
/// file_path: reports/q3.xlsx
/// sheet_index: 0
/// line_limit: 50000
/// modified_by: Nightly Export
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Spreadsheet to read, or to save to
    pub file_path: Option<PathBuf>,
    /// Sheet activated on load and used by update/save/download
    pub sheet_index: usize,
    /// Upper bound on rows returned by grid reads
    pub line_limit: Option<usize>,
    /// Stamped into last-modified-by on every save/download; blank keeps
    /// the workbook's own value
    pub modified_by: String,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> SheetResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SheetError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &Path) -> SheetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|_| SheetError::not_readable(path))?;
        Self::from_yaml_str(&content)
    }
}
