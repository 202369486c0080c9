//! Tabular writer: build and update [`Workbook`]s, encode them as XLSX/CSV/PDF

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Worksheet, XlsxError};
use tracing::debug;

use super::package::stamp_last_modified_by;
use super::pdf::{PdfRenderer, TablePdfRenderer};
use super::reader::{read_cell, report_progress, Progress};
use crate::core::dates::datetime_to_serial;
use crate::error::{SheetError, SheetResult};
use crate::types::{
    Cell, CellAddress, CellInput, CellValue, Column, DataRow, HeaderMap, PropertyInput,
    PropertySet, PropertyValue, Protection, Sheet, StyledCell, UpdateCell, UpdateInstructions,
    Workbook, DATE_FORMAT_YYYYMMDD_SLASH, MAX_TEXT_LEN,
};

// Excel column width units
const MIN_COLUMN_WIDTH: f64 = 8.43;
const MAX_COLUMN_WIDTH: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Xlsx,
    Csv,
    Pdf,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Xlsx => "Xlsx",
            OutputType::Csv => "Csv",
            OutputType::Pdf => "Pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputType::Xlsx => "xlsx",
            OutputType::Csv => "csv",
            OutputType::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xlsx" => Ok(OutputType::Xlsx),
            "csv" => Ok(OutputType::Csv),
            "pdf" => Ok(OutputType::Pdf),
            _ => Err(SheetError::UnknownOutputType(s.to_string())),
        }
    }
}

/// Builds workbooks from headers and rows, applies cell updates and
/// encodes the active sheet.
pub struct TabularWriter {
    pdf: Box<dyn PdfRenderer>,
}

impl Default for TabularWriter {
    fn default() -> Self {
        Self::new(Box::new(TablePdfRenderer::default()))
    }
}

impl fmt::Debug for TabularWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularWriter").finish_non_exhaustive()
    }
}

impl TabularWriter {
    pub fn new(pdf: Box<dyn PdfRenderer>) -> Self {
        Self { pdf }
    }

    /// Build a single-sheet workbook.
    ///
    /// Header keys get columns A, B, C, … in declaration order and their
    /// labels fill row 1; data row `i` lands on row `i + 2`. A data row with
    /// more keys than the header, or with a key the header never declared,
    /// fails with [`SheetError::ColumnMismatch`].
    pub fn create(
        &self,
        properties: PropertyInput,
        headers: &HeaderMap,
        rows: &[DataRow],
    ) -> SheetResult<Workbook> {
        let mut workbook = Workbook::new();
        if let Some(sheet_title) = apply_properties(workbook.properties_mut(), properties) {
            workbook.active_sheet_mut().set_name(sheet_title);
        }

        let sheet = workbook.active_sheet_mut();
        let mut columns = Vec::with_capacity(headers.len());
        for (index, label) in headers.values().enumerate() {
            let address = CellAddress::new(Column::from_index(index as u32), 1);
            check_address(address, label)?;
            sheet.set_value(address, CellValue::Text(label.clone()));
            columns.push(address.column);
        }

        for (index, row) in rows.iter().enumerate() {
            if row.len() > headers.len() {
                return Err(SheetError::ColumnMismatch(index));
            }
            for (key, value) in row {
                let column = headers
                    .get_index_of(key)
                    .map(|i| columns[i])
                    .ok_or(SheetError::ColumnMismatch(index))?;
                let address = CellAddress::new(column, index as u32 + 2);
                check_address(address, value)?;
                let (value, format) = convert_input(address, value)?;
                let cell = sheet.cell_mut(address);
                cell.value = value;
                if let Some(code) = format {
                    cell.number_format = Some(code.to_string());
                }
            }
        }

        for column in columns {
            sheet.set_auto_size(column);
        }

        debug!(columns = headers.len(), rows = rows.len(), "Spreadsheet created");
        Ok(workbook)
    }

    /// Apply cell updates to the active sheet.
    ///
    /// Every entry is validated before any cell changes, so a failing entry
    /// leaves the sheet untouched. Addresses past the current bounds grow
    /// the sheet.
    pub fn update_from_array(
        &self,
        workbook: &mut Workbook,
        instructions: &UpdateInstructions,
        mut progress: Progress<'_>,
    ) -> SheetResult<()> {
        let mut planned: Vec<(CellAddress, CellValue, Option<&str>, Option<Protection>)> =
            Vec::new();
        let total = instructions.len();

        for (done, (row, cells)) in instructions.iter().enumerate() {
            for (letters, entry) in cells {
                let (value, options) = match entry {
                    UpdateCell::Styled(StyledCell { value: None, .. }) => continue,
                    UpdateCell::Styled(StyledCell {
                        value: Some(value),
                        options,
                    }) => (value, Some(options)),
                    UpdateCell::Value(value) => (value, None),
                };

                let address = Column::parse(letters)
                    .map(|column| CellAddress::new(column, *row))
                    .filter(|address| (1..=CellAddress::ROW_LIMIT).contains(&address.row))
                    .ok_or_else(|| SheetError::cell_write(format!("{}{}", letters, row), value))?;
                let (value, format) = convert_input(address, value)?;
                let protection = options.map(|o| Protection {
                    locked: o.lock,
                    hidden: o.hidden,
                });
                planned.push((address, value, format, protection));
            }
            report_progress(&mut progress, done + 1, total);
        }

        let sheet = workbook.active_sheet_mut();
        for (address, value, format, protection) in planned {
            let cell = sheet.cell_mut(address);
            if let Some(protection) = protection {
                if protection.locked.is_some() {
                    cell.protection.locked = protection.locked;
                }
                if protection.hidden.is_some() {
                    cell.protection.hidden = protection.hidden;
                }
            }
            cell.value = value;
            if let Some(code) = format {
                cell.number_format = Some(code.to_string());
            }
        }

        debug!(rows = total, sheet = sheet.name(), "Spreadsheet updated");
        Ok(())
    }

    /// Encode the active sheet of `workbook`.
    pub fn encode(&self, workbook: &Workbook, output: OutputType) -> SheetResult<Vec<u8>> {
        let sheet = workbook.active_sheet();
        let bytes = match output {
            OutputType::Xlsx => encode_xlsx(workbook.properties(), sheet)?,
            OutputType::Csv => encode_csv(sheet)?,
            OutputType::Pdf => self.pdf.render(workbook.properties(), &display_rows(sheet))?,
        };
        debug!(%output, bytes = bytes.len(), "Spreadsheet encoded");
        Ok(bytes)
    }
}

/// Move recognized keys into `props` and keep the rest as custom
/// properties. Returns the requested sheet name, if any.
pub fn apply_properties(props: &mut PropertySet, input: PropertyInput) -> Option<String> {
    let mut sheet_title = None;
    for (key, value) in input {
        match key.as_str() {
            "category" => props.category = value.to_string(),
            "company" => props.company = value.to_string(),
            "created" => {
                if let Some(created) = timestamp(&value) {
                    props.created = created;
                }
            }
            "creator" => props.creator = value.to_string(),
            "description" => props.description = value.to_string(),
            "keywords" => props.keywords = value.to_string(),
            "modifier" => props.last_modified_by = value.to_string(),
            "subject" => props.subject = value.to_string(),
            "title" => props.title = value.to_string(),
            "sheet_title" => sheet_title = Some(value.to_string()),
            _ => {
                props.custom.insert(key, value);
            }
        }
    }
    sheet_title
}

fn timestamp(value: &PropertyValue) -> Option<i64> {
    match value {
        PropertyValue::Integer(i) => Some(*i),
        PropertyValue::Number(n) if n.is_finite() => Some(*n as i64),
        PropertyValue::Text(s) => s
            .parse()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()))
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp())
            }),
        _ => None,
    }
}

fn check_address(address: CellAddress, value: &impl fmt::Display) -> SheetResult<()> {
    if address.column.index() >= Column::LIMIT || address.row > CellAddress::ROW_LIMIT {
        return Err(SheetError::cell_write(address.to_string(), value));
    }
    Ok(())
}

/// Stored value and display code for one input value.
fn convert_input(
    address: CellAddress,
    input: &CellInput,
) -> SheetResult<(CellValue, Option<&'static str>)> {
    let failed = || SheetError::cell_write(address.to_string(), input);
    Ok(match input {
        CellInput::Empty => (CellValue::Empty, None),
        CellInput::Bool(b) => (CellValue::Bool(*b), None),
        CellInput::Number(n) if !n.is_finite() => return Err(failed()),
        CellInput::Number(n) => (CellValue::Number(*n), None),
        CellInput::Text(s) if s.chars().count() > MAX_TEXT_LEN => return Err(failed()),
        CellInput::Text(s) => (CellValue::Text(s.clone()), None),
        CellInput::DateTime(dt) => {
            let serial = datetime_to_serial(dt).ok_or_else(failed)?;
            (CellValue::Number(serial), Some(DATE_FORMAT_YYYYMMDD_SLASH))
        }
    })
}

/// Display strings of every row and column of `sheet`, blanks included.
pub fn display_rows(sheet: &Sheet) -> Vec<Vec<String>> {
    let mut degraded = Vec::new();
    let last_column = sheet.highest_column().index();
    (1..=sheet.highest_row())
        .map(|row| {
            (0..=last_column)
                .map(|col| {
                    let address = CellAddress::new(Column::from_index(col), row);
                    read_cell(sheet.cell(address), address, &mut degraded)
                })
                .collect()
        })
        .collect()
}

//==============================================================================
// Encoders
//==============================================================================

fn xlsx_error(e: XlsxError) -> SheetError {
    SheetError::encode_failed(OutputType::Xlsx, e)
}

fn encode_csv(sheet: &Sheet) -> SheetResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in display_rows(sheet) {
        writer
            .write_record(&row)
            .map_err(|e| SheetError::encode_failed(OutputType::Csv, e))?;
    }

    writer
        .into_inner()
        .map_err(|e| SheetError::encode_failed(OutputType::Csv, e))
}

fn doc_properties(props: &PropertySet) -> DocProperties {
    let mut doc = DocProperties::new()
        .set_title(&props.title)
        .set_subject(&props.subject)
        .set_author(&props.creator)
        .set_company(&props.company)
        .set_category(&props.category)
        .set_keywords(&props.keywords)
        .set_comment(&props.description);

    if let Ok(created) = ExcelDateTime::from_timestamp(props.created) {
        doc = doc.set_creation_datetime(&created);
    }

    for (name, value) in &props.custom {
        doc = match value {
            PropertyValue::Bool(b) => doc.set_custom_property(name, *b),
            PropertyValue::Integer(i) => match i32::try_from(*i) {
                Ok(small) => doc.set_custom_property(name, small),
                Err(_) => doc.set_custom_property(name, *i as f64),
            },
            PropertyValue::Number(n) => doc.set_custom_property(name, *n),
            PropertyValue::Text(s) => doc.set_custom_property(name, s.as_str()),
            PropertyValue::List(items) => doc.set_custom_property(name, items.join(",").as_str()),
        };
    }
    doc
}

fn cell_format(cell: &Cell) -> Option<Format> {
    if cell.number_format.is_none() && cell.protection == Protection::default() {
        return None;
    }
    let mut format = Format::new();
    if let Some(code) = &cell.number_format {
        format = format.set_num_format(code);
    }
    if cell.protection.locked == Some(false) {
        format = format.set_unlocked();
    }
    if cell.protection.hidden == Some(true) {
        format = format.set_hidden();
    }
    Some(format)
}

fn write_cell(worksheet: &mut Worksheet, address: CellAddress, cell: &Cell) -> SheetResult<()> {
    let (row, col) = (address.row - 1, address.column.index() as u16);
    let format = cell_format(cell);

    match (&cell.value, &format) {
        (CellValue::Empty, None) => return Ok(()),
        (CellValue::Empty, Some(format)) => worksheet.write_blank(row, col, format),
        (CellValue::Bool(b), None) => worksheet.write_boolean(row, col, *b),
        (CellValue::Bool(b), Some(format)) => worksheet.write_boolean_with_format(row, col, *b, format),
        (CellValue::Number(n), None) => worksheet.write_number(row, col, *n),
        (CellValue::Number(n), Some(format)) => worksheet.write_number_with_format(row, col, *n, format),
        (CellValue::Text(s) | CellValue::Error(s), None) => worksheet.write_string(row, col, s),
        (CellValue::Text(s) | CellValue::Error(s), Some(format)) => {
            worksheet.write_string_with_format(row, col, s, format)
        }
    }
    .map_err(xlsx_error)?;
    Ok(())
}

fn column_width(sheet: &Sheet, column: Column) -> f64 {
    let mut degraded = Vec::new();
    let widest = sheet
        .rows()
        .filter_map(|(row, cells)| {
            let address = CellAddress::new(column, row);
            cells
                .get(&column)
                .map(|cell| read_cell(Some(cell), address, &mut degraded).chars().count())
        })
        .max()
        .unwrap_or(0);
    (widest as f64 + 2.0).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
}

fn encode_xlsx(props: &PropertySet, sheet: &Sheet) -> SheetResult<Vec<u8>> {
    let mut book = rust_xlsxwriter::Workbook::new();
    book.set_properties(&doc_properties(props));

    let worksheet = book.add_worksheet();
    worksheet.set_name(sheet.name()).map_err(xlsx_error)?;

    for (row, cells) in sheet.rows() {
        for (column, cell) in cells {
            write_cell(worksheet, CellAddress::new(*column, row), cell)?;
        }
    }
    for row in sheet.hidden_rows() {
        worksheet.set_row_hidden(row - 1).map_err(xlsx_error)?;
    }
    for column in sheet.auto_size_columns() {
        worksheet
            .set_column_width(column.index() as u16, column_width(sheet, column))
            .map_err(xlsx_error)?;
    }
    if sheet.is_protected() {
        worksheet.protect();
    }

    let bytes = book.save_to_buffer().map_err(xlsx_error)?;
    stamp_last_modified_by(&bytes, &props.last_modified_by)
}
