//! Spreadsheet engine: configuration, workbook state and the error log
//!
//! The engine owns at most one workbook at a time. Reads and writes go
//! through [`TabularReader`] and [`TabularWriter`], with the workbook passed
//! explicitly; the engine only tracks which state it is in:
//!
//! - `Unloaded`: nothing read yet; the first access loads the configured file
//! - `Loaded`: a workbook read from disk or built by [`Engine::create`]
//! - `Failed`: the last load failed; access keeps failing until [`Engine::load`]
//!   is retried or a new file path is set

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::core::memory::MemoryReporter;
use crate::error::{SheetError, SheetResult};
use crate::excel::csv_text::excel_csv_to_array;
use crate::excel::pdf::PdfRenderer;
use crate::excel::reader::TabularReader;
use crate::excel::writer::{OutputType, TabularWriter};
use crate::types::{
    DataRow, HeaderMap, PropertyInput, PropertySet, PropertyValue, Record, RowGrid,
    UpdateInstructions, Workbook, WorksheetInfo,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkbookState {
    #[default]
    Unloaded,
    Loaded(Workbook),
    /// Load failed with the contained message
    Failed(String),
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    state: WorkbookState,
    errors: Vec<String>,
    writer: TabularWriter,
    memory: MemoryReporter,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with no file configured, ready for [`Engine::create`].
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            state: WorkbookState::Unloaded,
            errors: Vec::new(),
            writer: TabularWriter::default(),
            memory: MemoryReporter::new(),
        }
    }

    /// An engine reading `path`. Fails at once if the file is not readable.
    pub fn open(
        path: impl AsRef<Path>,
        sheet_index: usize,
        line_limit: Option<usize>,
    ) -> SheetResult<Self> {
        Self::with_config(EngineConfig {
            file_path: Some(path.as_ref().to_path_buf()),
            sheet_index,
            line_limit,
            ..Default::default()
        })
    }

    /// An engine from a full configuration, validated eagerly.
    pub fn with_config(mut config: EngineConfig) -> SheetResult<Self> {
        if let Some(path) = &config.file_path {
            check_readable(path)?;
        }
        config.line_limit = effective_line_limit(config.line_limit);
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Replace the renderer used for PDF output.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfRenderer>) -> Self {
        self.writer = TabularWriter::new(renderer);
        self
    }

    //--------------------------------------------------------------------------
    // Configuration
    //--------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.config.file_path.as_deref()
    }

    /// Point the engine at a readable file.
    ///
    /// A workbook already held (loaded, created or edited) is kept; the new
    /// file is read on the next access only when nothing is loaded, or by an
    /// explicit [`Engine::load`].
    pub fn set_file_path(&mut self, path: impl AsRef<Path>) -> SheetResult<()> {
        let path = path.as_ref();
        check_readable(path).map_err(|e| self.record(e))?;
        self.config.file_path = Some(path.to_path_buf());
        if !self.is_loaded() {
            self.state = WorkbookState::Unloaded;
        }
        Ok(())
    }

    /// Point the engine at a save target without touching the workbook.
    pub fn set_file_path_for_write(&mut self, path: impl AsRef<Path>) -> SheetResult<()> {
        let path = path.as_ref();
        check_writable(path).map_err(|e| self.record(e))?;
        self.config.file_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn sheet_index(&self) -> usize {
        self.config.sheet_index
    }

    /// Bounds are checked when the index is used, not here.
    pub fn set_sheet_index(&mut self, index: usize) {
        self.config.sheet_index = index;
    }

    pub fn line_limit(&self) -> Option<usize> {
        self.config.line_limit
    }

    /// `Some(0)` means no limit.
    pub fn set_line_limit(&mut self, limit: Option<usize>) {
        self.config.line_limit = effective_line_limit(limit);
    }

    pub fn set_modified_by(&mut self, name: impl Into<String>) {
        self.config.modified_by = name.into();
    }

    //--------------------------------------------------------------------------
    // Error log
    //--------------------------------------------------------------------------

    /// Every failure recorded so far, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Append a message to the error log.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
    }

    fn record(&mut self, err: SheetError) -> SheetError {
        error!(code = err.code(), "{}", err);
        self.errors.push(err.to_string());
        err
    }

    //--------------------------------------------------------------------------
    // Workbook state
    //--------------------------------------------------------------------------

    pub fn state(&self) -> &WorkbookState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, WorkbookState::Loaded(_))
    }

    /// Read the configured file, replacing any workbook held so far.
    pub fn load(&mut self) -> SheetResult<()> {
        let path = self.config.file_path.clone().unwrap_or_default();
        let reader = TabularReader::new(self.config.line_limit);

        match reader.load(&path, self.config.sheet_index) {
            Ok(workbook) => {
                self.state = WorkbookState::Loaded(workbook);
                Ok(())
            }
            Err(err) => {
                self.state = WorkbookState::Failed(err.to_string());
                Err(self.record(err))
            }
        }
    }

    /// Load on first use. A failed load stays failed until retried.
    pub fn ensure_loaded(&mut self) -> SheetResult<()> {
        match &self.state {
            WorkbookState::Loaded(_) => Ok(()),
            WorkbookState::Unloaded => self.load(),
            WorkbookState::Failed(reason) => {
                let err = SheetError::NotLoaded(reason.clone());
                Err(self.record(err))
            }
        }
    }

    /// The current workbook, loading it first if needed.
    pub fn workbook(&mut self) -> SheetResult<&Workbook> {
        self.ensure_loaded()?;
        match &self.state {
            WorkbookState::Loaded(workbook) => Ok(workbook),
            _ => Err(SheetError::NotLoaded("no workbook".to_string())),
        }
    }

    /// Run `f` against the loaded workbook, recording its failure.
    fn with_workbook<T>(
        &mut self,
        f: impl FnOnce(&TabularWriter, &EngineConfig, &mut Workbook) -> SheetResult<T>,
    ) -> SheetResult<T> {
        self.ensure_loaded()?;
        let result = match &mut self.state {
            WorkbookState::Loaded(workbook) => f(&self.writer, &self.config, workbook),
            _ => Err(SheetError::NotLoaded("no workbook".to_string())),
        };
        result.map_err(|e| self.record(e))
    }

    //--------------------------------------------------------------------------
    // Reading
    //--------------------------------------------------------------------------

    pub fn sheet_names(&mut self) -> SheetResult<Vec<String>> {
        Ok(self.workbook()?.sheet_names())
    }

    pub fn worksheet_info(&mut self) -> SheetResult<Vec<WorksheetInfo>> {
        Ok(self.workbook()?.sheets().iter().map(WorksheetInfo::from).collect())
    }

    pub fn properties(&mut self) -> SheetResult<PropertySet> {
        Ok(self.workbook()?.properties().clone())
    }

    /// One document property by name; unknown names yield empty text.
    pub fn property(&mut self, name: &str) -> SheetResult<PropertyValue> {
        Ok(self.workbook()?.properties().get(name))
    }

    /// Every sheet (or only `filter`) as a row grid.
    pub fn to_array(&mut self, filter: Option<usize>) -> SheetResult<RowGrid> {
        self.grid(filter, None)
    }

    pub fn to_array_with_progress(
        &mut self,
        filter: Option<usize>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> SheetResult<RowGrid> {
        self.grid(filter, Some(progress))
    }

    fn grid(
        &mut self,
        filter: Option<usize>,
        progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> SheetResult<RowGrid> {
        let reader = TabularReader::new(self.config.line_limit);
        let read = reader.to_array(self.workbook()?, filter, progress);
        self.errors.extend(read.degraded);
        Ok(read.grid)
    }

    /// Records of the first sheet of `path`, keyed by slugified headers.
    ///
    /// `path` becomes the configured file; the workbook the engine holds is
    /// left alone.
    pub fn excel_file_to_array(
        &mut self,
        path: impl AsRef<Path>,
        include_hidden: bool,
    ) -> SheetResult<Vec<Record>> {
        let path = path.as_ref();
        self.set_file_path(path)?;

        let reader = TabularReader::new(self.config.line_limit);
        let read = reader
            .excel_file_to_array(path, include_hidden)
            .map_err(|e| self.record(e))?;
        self.errors.extend(read.degraded);
        Ok(read.records)
    }

    pub fn excel_csv_to_array(&mut self, text: &str) -> SheetResult<Vec<Vec<String>>> {
        excel_csv_to_array(text).map_err(|e| self.record(e))
    }

    //--------------------------------------------------------------------------
    // Writing
    //--------------------------------------------------------------------------

    /// Build a fresh workbook, replacing whatever the engine held.
    pub fn create(
        &mut self,
        properties: PropertyInput,
        headers: &HeaderMap,
        rows: &[DataRow],
    ) -> SheetResult<()> {
        let workbook = self
            .writer
            .create(properties, headers, rows)
            .map_err(|e| self.record(e))?;
        self.state = WorkbookState::Loaded(workbook);
        Ok(())
    }

    /// Apply cell updates to the configured sheet.
    pub fn update_from_array(&mut self, instructions: &UpdateInstructions) -> SheetResult<()> {
        self.update(instructions, None)
    }

    pub fn update_from_array_with_progress(
        &mut self,
        instructions: &UpdateInstructions,
        progress: &mut dyn FnMut(usize, usize),
    ) -> SheetResult<()> {
        self.update(instructions, Some(progress))
    }

    fn update(
        &mut self,
        instructions: &UpdateInstructions,
        progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> SheetResult<()> {
        self.with_workbook(|writer, config, workbook| {
            workbook.set_active_sheet(config.sheet_index)?;
            writer.update_from_array(workbook, instructions, progress)
        })
    }

    /// Encode the configured sheet, protected and stamped.
    pub fn encode(&mut self, output: OutputType) -> SheetResult<Vec<u8>> {
        self.with_workbook(|writer, config, workbook| {
            workbook.set_active_sheet(config.sheet_index)?;
            workbook.active_sheet_mut().set_protected(true);
            workbook.properties_mut().last_modified_by = config.modified_by.clone();
            writer.encode(workbook, output)
        })
    }

    /// Write the workbook to `path`, or to the configured file path.
    ///
    /// `output` is one of `Xlsx`, `Csv` or `Pdf`. The configured file is
    /// loaded before `path` replaces it as the file path.
    pub fn save(&mut self, path: Option<&Path>, output: &str) -> SheetResult<()> {
        let output = self.output_type(output)?;
        self.ensure_loaded()?;
        if let Some(path) = path {
            self.set_file_path_for_write(path)?;
        }
        let target: PathBuf = self
            .config
            .file_path
            .clone()
            .ok_or(SheetError::NoFilePath)
            .map_err(|e| self.record(e))?;
        check_writable(&target).map_err(|e| self.record(e))?;

        let bytes = self.encode(output)?;
        fs::write(&target, &bytes).map_err(|_| self.record(SheetError::not_writable(&target)))?;

        debug!(
            path = %target.display(),
            %output,
            bytes = bytes.len(),
            memory = %self.memory.usage(true, None),
            "Spreadsheet saved"
        );
        Ok(())
    }

    /// Write the encoded workbook to standard output.
    pub fn download(&mut self, output: &str) -> SheetResult<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        self.download_to(&mut handle, output)
    }

    /// Write the encoded workbook to `sink`.
    pub fn download_to(&mut self, sink: &mut dyn Write, output: &str) -> SheetResult<()> {
        let output = self.output_type(output)?;
        let bytes = self.encode(output)?;
        sink.write_all(&bytes)
            .and_then(|_| sink.flush())
            .map_err(|e| self.record(SheetError::Io(e)))?;
        Ok(())
    }

    fn output_type(&mut self, output: &str) -> SheetResult<OutputType> {
        output.parse().map_err(|e| self.record(e))
    }

    //--------------------------------------------------------------------------
    // Diagnostics
    //--------------------------------------------------------------------------

    /// Memory figure for `bytes`, or for this process when `None`.
    pub fn memory_usage(&self, nice: bool, bytes: Option<f64>) -> String {
        self.memory.usage(nice, bytes)
    }
}

fn effective_line_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|&n| n > 0)
}

fn check_readable(path: &Path) -> SheetResult<()> {
    let readable = File::open(path)
        .and_then(|file| file.metadata())
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if readable {
        Ok(())
    } else {
        Err(SheetError::not_readable(path))
    }
}

fn check_writable(path: &Path) -> SheetResult<()> {
    let writable = if path.exists() {
        path.is_file() && OpenOptions::new().append(true).open(path).is_ok()
    } else {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::metadata(parent)
            .map(|meta| meta.is_dir() && !meta.permissions().readonly())
            .unwrap_or(false)
    };
    if writable {
        Ok(())
    } else {
        Err(SheetError::not_writable(path))
    }
}
