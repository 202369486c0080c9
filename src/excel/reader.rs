//! Tabular reader: XLSX/CSV containers → [`Workbook`] → row grids

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use tracing::{debug, warn};

use super::package::{read_package_metadata, sniff_format, ContainerFormat};
use crate::core::dates::excel_fix_date;
use crate::core::memory::MemoryReporter;
use crate::core::text::slugify;
use crate::error::{SheetError, SheetResult};
use crate::types::{
    Cell, CellAddress, CellValue, Column, PropertySet, Record, RowGrid, Sheet, Workbook,
    DATETIME_FORMAT_SLASH, DATE_FORMAT_YYYYMMDD_SLASH, DEFAULT_SHEET_NAME,
};

/// Optional `(current, total)` progress sink for long row loops.
pub type Progress<'a> = Option<&'a mut dyn FnMut(usize, usize)>;

/// Rows between two progress reports.
pub const PROGRESS_INTERVAL: usize = 100;

pub(crate) fn report_progress(progress: &mut Progress<'_>, current: usize, total: usize) {
    if let Some(sink) = progress.as_mut() {
        if current % PROGRESS_INTERVAL == 0 || current == total {
            sink(current, total);
        }
    }
}

/// One way of turning a cell into its display string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Value rendered through the cell's number format
    Formatted,
    /// Underlying value, ignoring the format
    Raw,
    /// Empty string; never fails
    Blank,
}

/// Strategies tried in order until one produces a value.
pub const FALLBACK_CHAIN: [ReadStrategy; 3] =
    [ReadStrategy::Formatted, ReadStrategy::Raw, ReadStrategy::Blank];

impl ReadStrategy {
    pub fn attempt(self, cell: &Cell) -> Result<String, String> {
        match self {
            ReadStrategy::Formatted => cell.formatted(),
            ReadStrategy::Raw => cell.raw(),
            ReadStrategy::Blank => Ok(String::new()),
        }
    }
}

/// Grid read from a workbook, plus one message per degraded cell read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridRead {
    pub grid: RowGrid,
    pub degraded: Vec<String>,
}

/// Header-keyed records, plus one message per degraded cell read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordRead {
    pub records: Vec<Record>,
    pub degraded: Vec<String>,
}

/// Walk [`FALLBACK_CHAIN`] for one cell, recording every failed strategy.
pub fn read_cell(cell: Option<&Cell>, address: CellAddress, degraded: &mut Vec<String>) -> String {
    let Some(cell) = cell else {
        return String::new();
    };
    read_with(cell, address, degraded, |cell, strategy| strategy.attempt(cell))
}

fn read_with(
    cell: &Cell,
    address: CellAddress,
    degraded: &mut Vec<String>,
    attempt: impl Fn(&Cell, ReadStrategy) -> Result<String, String>,
) -> String {
    for strategy in FALLBACK_CHAIN {
        match attempt(cell, strategy) {
            Ok(value) => return value,
            Err(reason) => {
                let message = format!(
                    "Unable to read cell `{}` as {:?} value: {}",
                    address, strategy, reason
                );
                warn!("{}", message);
                degraded.push(message);
            }
        }
    }
    String::new()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TabularReader {
    line_limit: Option<usize>,
}

impl TabularReader {
    /// A limit of `Some(0)` reads every row.
    pub fn new(line_limit: Option<usize>) -> Self {
        Self {
            line_limit: line_limit.filter(|&n| n > 0),
        }
    }

    pub fn line_limit(&self) -> Option<usize> {
        self.line_limit
    }

    /// Load every sheet of `path` and activate `sheet_index`.
    pub fn load(&self, path: &Path, sheet_index: usize) -> SheetResult<Workbook> {
        let memory = MemoryReporter::new();
        debug!(
            path = %path.display(),
            memory = %memory.usage(true, None),
            "Loading spreadsheet"
        );

        let format = sniff_format(path)?;
        let mut workbook = match format {
            ContainerFormat::Xlsx => load_xlsx(path)?,
            ContainerFormat::Csv => load_csv(path)?,
        };
        workbook.set_active_sheet(sheet_index)?;

        debug!(
            path = %path.display(),
            ?format,
            sheets = workbook.sheet_count(),
            memory = %memory.usage(true, None),
            "Spreadsheet loaded"
        );
        Ok(workbook)
    }

    /// Every sheet, or only the sheet at `filter`, as a row grid.
    ///
    /// A `filter` naming no sheet yields an empty grid. Rows whose cells are
    /// all blank are left out.
    pub fn to_array(
        &self,
        workbook: &Workbook,
        filter: Option<usize>,
        mut progress: Progress<'_>,
    ) -> GridRead {
        let mut read = GridRead::default();

        for (index, sheet) in workbook.sheets().iter().enumerate() {
            if filter.is_some_and(|only| only != index) {
                continue;
            }

            let highest_row = sheet.highest_row();
            let last_row = self.clamp_rows(sheet, highest_row);
            let last_column = sheet.highest_column().index();
            let total = last_row as usize;
            let mut rows = BTreeMap::new();

            for row in 1..=last_row {
                let mut cells = BTreeMap::new();
                for col in 0..=last_column {
                    let address = CellAddress::new(Column::from_index(col), row);
                    let value = read_cell(sheet.cell(address), address, &mut read.degraded);
                    cells.insert(address.column, value);
                }

                if cells.values().any(|v| !v.trim().is_empty()) {
                    rows.insert(row, cells);
                }
                report_progress(&mut progress, row as usize, total);
            }

            debug!(sheet = sheet.name(), rows = rows.len(), "Rows found");
            read.grid.insert(index, rows);
        }

        read
    }

    fn clamp_rows(&self, sheet: &Sheet, highest_row: u32) -> u32 {
        match self.line_limit {
            Some(limit) if (limit as u64) < highest_row as u64 => {
                warn!(
                    sheet = sheet.name(),
                    highest_row,
                    line_limit = limit,
                    "Sheet reaches past the line limit; reading is capped. \
                     A stray value far below the data usually causes this"
                );
                limit as u32
            }
            _ => highest_row,
        }
    }

    /// Read the first sheet of `path` as records keyed by slugified headers.
    pub fn excel_file_to_array(&self, path: &Path, include_hidden: bool) -> SheetResult<RecordRead> {
        let workbook = self.load(path, 0)?;
        Ok(records(workbook.active_sheet(), include_hidden))
    }
}

/// Key each row of `sheet` by the slug of the first visible row.
///
/// A column whose header slugs to nothing is keyed by its zero-based index.
/// Values under a `date` header are converted from serials.
pub fn records(sheet: &Sheet, include_hidden: bool) -> RecordRead {
    let mut read = RecordRead::default();
    let last_column = sheet.highest_column().index();
    let mut headers: Option<Vec<String>> = None;

    for row in 1..=sheet.highest_row() {
        if !include_hidden && !sheet.is_row_visible(row) {
            continue;
        }

        let addresses =
            (0..=last_column).map(move |col| CellAddress::new(Column::from_index(col), row));

        let Some(keys) = &headers else {
            let keys = addresses
                .map(|address| {
                    let label = read_cell(sheet.cell(address), address, &mut read.degraded);
                    match slugify(&label) {
                        slug if slug.is_empty() => address.column.index().to_string(),
                        slug => slug,
                    }
                })
                .collect();
            headers = Some(keys);
            continue;
        };

        let mut record = Record::new();
        for (address, key) in addresses.zip(keys) {
            let value = match sheet.cell(address) {
                Some(cell) if key.eq_ignore_ascii_case("date") => {
                    let raw = read_with(cell, address, &mut read.degraded, |cell, strategy| {
                        match strategy {
                            ReadStrategy::Formatted => cell.raw(),
                            other => other.attempt(cell),
                        }
                    });
                    excel_fix_date(&raw)
                }
                cell => read_cell(cell, address, &mut read.degraded),
            };
            record.insert(key.clone(), value);
        }

        if record.values().any(|v| !v.trim().is_empty()) {
            read.records.push(record);
        }
    }

    read
}

//==============================================================================
// Container loaders
//==============================================================================

fn load_xlsx(path: &Path) -> SheetResult<Workbook> {
    let mut excel: Xlsx<_> =
        open_workbook(path).map_err(|e: XlsxError| SheetError::load_failed(path, e))?;
    let metadata = read_package_metadata(path)?;

    let mut sheets = Vec::new();
    for (index, name) in excel.sheet_names().into_iter().enumerate() {
        let range = excel
            .worksheet_range(&name)
            .map_err(|e| SheetError::load_failed(path, e))?;
        let (first_row, first_col) = range.start().unwrap_or((0, 0));

        let mut sheet = Sheet::new(name);
        for (row, col, data) in range.used_cells() {
            let address = CellAddress::new(
                Column::from_index(first_col + col as u32),
                first_row + row as u32 + 1,
            );
            *sheet.cell_mut(address) = cell_from_data(data);
        }
        if let Some(hidden) = metadata.hidden_rows.get(index) {
            for row in hidden {
                sheet.set_row_visible(*row, false);
            }
        }
        sheets.push(sheet);
    }

    Ok(Workbook::from_parts(sheets, metadata.properties))
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::default(),
        Data::Int(i) => Cell::new(CellValue::Number(*i as f64)),
        Data::Float(f) => Cell::new(CellValue::Number(*f)),
        Data::Bool(b) => Cell::new(CellValue::Bool(*b)),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            Cell::new(CellValue::Text(s.clone()))
        }
        Data::Error(e) => Cell::new(CellValue::Error(e.to_string())),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            let code = if serial.fract() == 0.0 {
                DATE_FORMAT_YYYYMMDD_SLASH
            } else {
                DATETIME_FORMAT_SLASH
            };
            Cell::with_format(CellValue::Number(serial), code)
        }
    }
}

fn load_csv(path: &Path) -> SheetResult<Workbook> {
    let tab_separated = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));

    let bytes = std::fs::read(path).map_err(|e| SheetError::load_failed(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(if tab_separated { b'\t' } else { b',' })
        .from_reader(bytes.as_slice());

    let mut sheet = Sheet::new(DEFAULT_SHEET_NAME);
    let mut record = csv::StringRecord::new();
    let mut row: u32 = 0;
    while reader
        .read_record(&mut record)
        .map_err(|e| SheetError::load_failed(path, e))?
    {
        // Blank lines are skipped by the parser but still count as rows.
        let start = record.position().map_or(0, |pos| pos.byte() as usize);
        row += blank_lines_at(&bytes, start) as u32 + 1;
        for (col, field) in record.iter().enumerate() {
            if field.is_empty() {
                continue;
            }
            let value = match field.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => CellValue::Number(n),
                _ => CellValue::Text(field.to_string()),
            };
            let address = CellAddress::new(Column::from_index(col as u32), row);
            sheet.set_value(address, value);
        }
    }

    Ok(Workbook::from_parts(vec![sheet], PropertySet::default()))
}

/// Line breaks before the first field of the record starting at `start`.
/// `\r\n`, `\r` and `\n` each end one line; the `\n` of a `\r\n` that ended
/// the previous record is not a blank line.
fn blank_lines_at(bytes: &[u8], start: usize) -> usize {
    let mut i = start.min(bytes.len());
    if i > 0 && bytes[i - 1] == b'\r' && bytes.get(i) == Some(&b'\n') {
        i += 1;
    }
    let mut lines = 0;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'\r' => {
                lines += 1;
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => lines += 1,
            _ => break,
        }
        i += 1;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn addr(a1: &str) -> CellAddress {
        CellAddress::parse(a1).unwrap()
    }

    fn sample_sheet() -> Sheet {
        let mut sheet = Sheet::new("Data");
        sheet.set_value(addr("A1"), CellValue::Text("Name".into()));
        sheet.set_value(addr("B1"), CellValue::Text("Date".into()));
        sheet.set_value(addr("C1"), CellValue::Text("???".into()));
        sheet.set_value(addr("A2"), CellValue::Text("alpha".into()));
        *sheet.cell_mut(addr("B2")) =
            Cell::with_format(CellValue::Number(44790.0), DATE_FORMAT_YYYYMMDD_SLASH);
        sheet.set_value(addr("C2"), CellValue::Number(3.0));
        sheet.set_value(addr("A4"), CellValue::Text("beta".into()));
        sheet.set_row_visible(4, false);
        sheet
    }

    #[test]
    fn test_fallback_chain_order() {
        let mut degraded = Vec::new();

        let error = Cell::new(CellValue::Error("#REF!".into()));
        assert_eq!(read_cell(Some(&error), addr("A1"), &mut degraded), "#REF!");
        assert_eq!(degraded.len(), 1);
        assert!(degraded[0].contains("`A1` as Formatted"));

        let nan = Cell::new(CellValue::Number(f64::NAN));
        assert_eq!(read_cell(Some(&nan), addr("B2"), &mut degraded), "");
        assert_eq!(degraded.len(), 3);
        assert!(degraded[2].contains("`B2` as Raw"));

        assert_eq!(read_cell(None, addr("C3"), &mut degraded), "");
        assert_eq!(degraded.len(), 3);
    }

    #[test]
    fn test_to_array_drops_blank_rows_and_keeps_alignment() {
        let mut sheet = Sheet::new("Data");
        sheet.set_value(addr("B1"), CellValue::Text("x".into()));
        sheet.set_value(addr("A2"), CellValue::Text("   ".into()));
        sheet.set_value(addr("C3"), CellValue::Bool(true));
        let workbook = Workbook::from_parts(vec![sheet], PropertySet::default());

        let read = TabularReader::new(None).to_array(&workbook, None, None);
        let rows = &read.grid[&0];
        assert_eq!(rows.keys().copied().collect::<Vec<_>>(), vec![1, 3]);

        let row1: Vec<(String, String)> = rows[&1]
            .iter()
            .map(|(c, v)| (c.letters(), v.clone()))
            .collect();
        assert_eq!(
            row1,
            vec![
                ("A".to_string(), "".to_string()),
                ("B".to_string(), "x".to_string()),
                ("C".to_string(), "".to_string()),
            ]
        );
        assert_eq!(rows[&3][&Column::from_index(2)], "TRUE");
    }

    #[test]
    fn test_to_array_filter_and_line_limit() {
        let mut first = Sheet::new("One");
        for row in 1..=10 {
            first.set_value(CellAddress::new(Column::from_index(0), row), CellValue::Number(row as f64));
        }
        let second = Sheet::new("Two");
        let workbook = Workbook::from_parts(vec![first, second], PropertySet::default());

        let limited = TabularReader::new(Some(4)).to_array(&workbook, Some(0), None);
        assert_eq!(limited.grid.len(), 1);
        assert_eq!(limited.grid[&0].len(), 4);

        let second_only = TabularReader::new(None).to_array(&workbook, Some(1), None);
        assert!(second_only.grid[&1].is_empty());

        let missing = TabularReader::new(None).to_array(&workbook, Some(7), None);
        assert!(missing.grid.is_empty());
    }

    #[test]
    fn test_to_array_reports_progress() {
        let mut sheet = Sheet::new("Data");
        for row in 1..=250 {
            sheet.set_value(CellAddress::new(Column::from_index(0), row), CellValue::Number(1.0));
        }
        let workbook = Workbook::from_parts(vec![sheet], PropertySet::default());

        let mut calls = Vec::new();
        let mut sink = |current: usize, total: usize| calls.push((current, total));
        TabularReader::new(None).to_array(&workbook, None, Some(&mut sink));
        assert_eq!(calls, vec![(100, 250), (200, 250), (250, 250)]);
    }

    #[test]
    fn test_records_skip_hidden_rows_and_fix_dates() {
        let read = records(&sample_sheet(), false);
        assert_eq!(read.records.len(), 1);
        let record = &read.records[0];
        assert_eq!(record.keys().cloned().collect::<Vec<_>>(), vec!["name", "date", "2"]);
        assert_eq!(record["name"], "alpha");
        assert_eq!(record["date"], "2022-08-17 00:00:00");
        assert_eq!(record["2"], "3");
    }

    #[test]
    fn test_records_include_hidden_rows() {
        let read = records(&sample_sheet(), true);
        assert_eq!(read.records.len(), 2);
        assert_eq!(read.records[1]["name"], "beta");
        assert_eq!(read.records[1]["date"], "");
    }

    #[test]
    fn test_load_csv_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name,age\n\"Doe, J\",42\n").unwrap();

        let workbook = TabularReader::new(None).load(&path, 0).unwrap();
        assert_eq!(workbook.sheet_names(), vec![DEFAULT_SHEET_NAME]);
        let sheet = workbook.active_sheet();
        assert_eq!(sheet.cell(addr("A2")).unwrap().value, CellValue::Text("Doe, J".into()));
        assert_eq!(sheet.cell(addr("B2")).unwrap().value, CellValue::Number(42.0));
    }

    #[test]
    fn test_load_csv_counts_blank_lines_as_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gaps.csv");
        std::fs::write(&path, "a\n\nb\n\n\n\"x\ny\",1\nz\n").unwrap();

        let workbook = TabularReader::new(None).load(&path, 0).unwrap();
        let sheet = workbook.active_sheet();
        assert_eq!(sheet.cell(addr("A1")).unwrap().value, CellValue::Text("a".into()));
        assert!(sheet.cell(addr("A2")).is_none());
        assert_eq!(sheet.cell(addr("A3")).unwrap().value, CellValue::Text("b".into()));
        assert_eq!(sheet.cell(addr("A6")).unwrap().value, CellValue::Text("x\ny".into()));
        assert_eq!(sheet.cell(addr("A7")).unwrap().value, CellValue::Text("z".into()));

        let read = TabularReader::new(None).to_array(&workbook, Some(0), None);
        assert_eq!(read.grid[&0].keys().copied().collect::<Vec<_>>(), vec![1, 3, 6, 7]);
    }

    #[test]
    fn test_blank_lines_with_crlf_terminators() {
        assert_eq!(blank_lines_at(b"a\r\n\r\nb\r\n", 3), 1);
        assert_eq!(blank_lines_at(b"a\r\n\r\nb\r\n", 4), 1);
        assert_eq!(blank_lines_at(b"a\r\rb", 2), 1);
        assert_eq!(blank_lines_at(b"a\nb", 2), 0);
        assert_eq!(blank_lines_at(b"\n\na", 0), 2);
    }

    #[test]
    fn test_zero_line_limit_reads_everything() {
        let reader = TabularReader::new(Some(0));
        assert_eq!(reader.line_limit(), None);

        let read = reader.to_array(
            &Workbook::from_parts(vec![sample_sheet()], PropertySet::default()),
            None,
            None,
        );
        assert_eq!(read.grid[&0].keys().copied().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn test_load_rejects_out_of_bounds_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.csv");
        std::fs::write(&path, "a\n").unwrap();

        let err = TabularReader::new(None).load(&path, 1).unwrap_err();
        assert!(matches!(err, SheetError::SheetIndexOutOfBounds { index: 1, count: 1 }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TabularReader::new(None)
            .load(Path::new("/definitely/not/here.xlsx"), 0)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error unable to read file: `/definitely/not/here.xlsx`"
        );
    }
}
