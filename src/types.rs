use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::dates::{format_serial, is_date_format};
use crate::error::{SheetError, SheetResult};

//==============================================================================
// Addressing
//==============================================================================

/// Zero-based spreadsheet column, displayed as letters (0 → A, 25 → Z, 26 → AA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Column(u32);

impl Column {
    /// Number of columns a worksheet can hold (A..=XFD).
    pub const LIMIT: u32 = 16_384;

    pub fn from_index(index: u32) -> Self {
        Column(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Column(self.0 + 1)
    }

    /// Convert column index to letters (0→A, 1→B, 25→Z, 26→AA, etc.)
    pub fn letters(self) -> String {
        let mut result = String::new();
        let mut num = self.0;

        loop {
            let remainder = num % 26;
            result.insert(0, (b'A' + remainder as u8) as char);
            if num < 26 {
                break;
            }
            num = num / 26 - 1;
        }

        result
    }

    /// Parse column letters (`"A"`, `"aa"`, `"XFD"`). Returns `None` for
    /// anything that is not purely alphabetic or lies beyond `XFD`.
    pub fn parse(letters: &str) -> Option<Self> {
        if letters.is_empty() || letters.len() > 3 {
            return None;
        }
        let mut index: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return None;
            }
            index = index * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        }
        let index = index - 1;
        (index < Self::LIMIT).then_some(Column(index))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A `{ColumnLetters}{RowNumber}` cell address with a 1-based row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddress {
    pub column: Column,
    pub row: u32,
}

impl CellAddress {
    /// Number of rows a worksheet can hold.
    pub const ROW_LIMIT: u32 = 1_048_576;

    pub fn new(column: Column, row: u32) -> Self {
        Self { column, row }
    }

    /// Parse `A1`-style addresses without absolute markers.
    pub fn parse(address: &str) -> Option<Self> {
        let split = address.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = address.split_at(split);
        let column = Column::parse(letters)?;
        let row: u32 = digits.parse().ok()?;
        (1..=Self::ROW_LIMIT)
            .contains(&row)
            .then_some(Self { column, row })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column, self.row)
    }
}

//==============================================================================
// Cells
//==============================================================================

/// Display code applied to cells written from date values.
pub const DATE_FORMAT_YYYYMMDD_SLASH: &str = "yyyy/mm/dd";

/// Display code for date cells that carry a time of day.
pub const DATETIME_FORMAT_SLASH: &str = "yyyy/mm/dd hh:mm:ss";

/// Longest text a single cell can hold.
pub const MAX_TEXT_LEN: usize = 32_767;

/// Stored value of a cell. Date cells are numbers with a date display code.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Error literal such as `#DIV/0!`
    Error(String),
}

/// Render a number the way the `General` display code does.
pub fn general_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::Number(n) => f.write_str(&general_number(*n)),
            CellValue::Text(s) | CellValue::Error(s) => f.write_str(s),
        }
    }
}

/// Cell protection flags. `None` inherits the sheet default (locked, visible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection {
    pub locked: Option<bool>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub value: CellValue,
    pub number_format: Option<String>,
    pub protection: Protection,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_format(value: CellValue, code: impl Into<String>) -> Self {
        Self {
            value,
            number_format: Some(code.into()),
            protection: Protection::default(),
        }
    }

    /// The display string, rendered through the cell's number format.
    pub fn formatted(&self) -> Result<String, String> {
        match &self.value {
            CellValue::Number(n) if !n.is_finite() => Err(format!("non-finite number {}", n)),
            CellValue::Number(n) => match self.number_format.as_deref() {
                Some(code) if is_date_format(code) => format_serial(*n, code)
                    .ok_or_else(|| format!("serial {} is outside the calendar", n)),
                _ => Ok(general_number(*n)),
            },
            CellValue::Error(code) => Err(format!("cell holds error value {}", code)),
            other => Ok(other.to_string()),
        }
    }

    /// The underlying value as a string, ignoring the display format.
    pub fn raw(&self) -> Result<String, String> {
        match &self.value {
            CellValue::Number(n) if !n.is_finite() => Err(format!("non-finite number {}", n)),
            other => Ok(other.to_string()),
        }
    }
}

//==============================================================================
// Sheets
//==============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    name: String,
    rows: BTreeMap<u32, BTreeMap<Column, Cell>>,
    hidden_rows: BTreeSet<u32>,
    auto_size: BTreeSet<Column>,
    protected: bool,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn cell(&self, address: CellAddress) -> Option<&Cell> {
        self.rows.get(&address.row)?.get(&address.column)
    }

    /// Mutable access to a cell, creating it (and growing the sheet) if needed.
    pub fn cell_mut(&mut self, address: CellAddress) -> &mut Cell {
        self.rows
            .entry(address.row)
            .or_default()
            .entry(address.column)
            .or_default()
    }

    pub fn set_value(&mut self, address: CellAddress, value: CellValue) {
        self.cell_mut(address).value = value;
    }

    /// Cells stored in `row`, keyed by column.
    pub fn row(&self, row: u32) -> Option<&BTreeMap<Column, Cell>> {
        self.rows.get(&row)
    }

    pub fn rows(&self) -> impl Iterator<Item = (u32, &BTreeMap<Column, Cell>)> {
        self.rows.iter().map(|(r, cells)| (*r, cells))
    }

    /// Highest row holding a cell; an empty sheet reports row 1.
    pub fn highest_row(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(1)
    }

    /// Highest column holding a cell; an empty sheet reports column A.
    pub fn highest_column(&self) -> Column {
        self.rows
            .values()
            .filter_map(|cells| cells.keys().next_back().copied())
            .max()
            .unwrap_or_default()
    }

    pub fn is_row_visible(&self, row: u32) -> bool {
        !self.hidden_rows.contains(&row)
    }

    pub fn set_row_visible(&mut self, row: u32, visible: bool) {
        if visible {
            self.hidden_rows.remove(&row);
        } else {
            self.hidden_rows.insert(row);
        }
    }

    pub fn hidden_rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.hidden_rows.iter().copied()
    }

    pub fn set_auto_size(&mut self, column: Column) {
        self.auto_size.insert(column);
    }

    pub fn auto_size_columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.auto_size.iter().copied()
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }
}

/// Dimensions of one worksheet, reported without iterating its cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorksheetInfo {
    pub name: String,
    pub last_row: u32,
    pub last_column: Column,
    pub total_rows: u32,
    pub total_columns: u32,
}

impl From<&Sheet> for WorksheetInfo {
    fn from(sheet: &Sheet) -> Self {
        let last_column = sheet.highest_column();
        Self {
            name: sheet.name().to_string(),
            last_row: sheet.highest_row(),
            last_column,
            total_rows: sheet.highest_row(),
            total_columns: last_column.index() + 1,
        }
    }
}

//==============================================================================
// Document properties
//==============================================================================

pub const DEFAULT_CREATOR: &str = "Unknown Creator";
pub const DEFAULT_TITLE: &str = "Untitled Spreadsheet";

/// A property value as supplied by collaborators or read from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Number(n) => f.write_str(&general_number(*n)),
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(value: Vec<&str>) -> Self {
        PropertyValue::List(value.into_iter().map(String::from).collect())
    }
}

/// Document-level metadata of a workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet {
    pub category: String,
    pub company: String,
    /// Unix timestamp (seconds)
    pub created: i64,
    pub creator: String,
    pub description: String,
    /// Comma-joined keyword list
    pub keywords: String,
    pub last_modified_by: String,
    pub subject: String,
    pub title: String,
    pub custom: IndexMap<String, PropertyValue>,
}

impl Default for PropertySet {
    fn default() -> Self {
        Self {
            category: String::new(),
            company: String::new(),
            created: chrono::Utc::now().timestamp(),
            creator: DEFAULT_CREATOR.to_string(),
            description: String::new(),
            keywords: String::new(),
            last_modified_by: DEFAULT_CREATOR.to_string(),
            subject: String::new(),
            title: DEFAULT_TITLE.to_string(),
            custom: IndexMap::new(),
        }
    }
}

impl PropertySet {
    /// Keywords split on commas; blank keywords yield an empty list.
    pub fn keyword_list(&self) -> Vec<String> {
        if self.keywords.trim().is_empty() {
            return Vec::new();
        }
        self.keywords.split(',').map(String::from).collect()
    }

    /// Look a property up by its collaborator-facing name. Unknown names
    /// yield empty text.
    pub fn get(&self, name: &str) -> PropertyValue {
        match name {
            "category" => PropertyValue::text(&self.category),
            "company" => PropertyValue::text(&self.company),
            "created" => PropertyValue::Integer(self.created),
            "creator" => PropertyValue::text(&self.creator),
            "description" => PropertyValue::text(&self.description),
            "keywords" => PropertyValue::List(self.keyword_list()),
            "last_modified_by" | "modifier" => PropertyValue::text(&self.last_modified_by),
            "subject" => PropertyValue::text(&self.subject),
            "title" => PropertyValue::text(&self.title),
            other => self
                .custom
                .get(other)
                .cloned()
                .unwrap_or_else(|| PropertyValue::text("")),
        }
    }
}

//==============================================================================
// Workbook
//==============================================================================

/// Name given to the single sheet of a fresh or CSV-backed workbook.
pub const DEFAULT_SHEET_NAME: &str = "Worksheet";

#[derive(Debug, Clone, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    properties: PropertySet,
    active: usize,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// A workbook with one empty sheet and default properties.
    pub fn new() -> Self {
        Self {
            sheets: vec![Sheet::new(DEFAULT_SHEET_NAME)],
            properties: PropertySet::default(),
            active: 0,
        }
    }

    pub fn from_parts(sheets: Vec<Sheet>, properties: PropertySet) -> Self {
        Self {
            sheets,
            properties,
            active: 0,
        }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn active_sheet_index(&self) -> usize {
        self.active
    }

    pub fn set_active_sheet(&mut self, index: usize) -> SheetResult<()> {
        if index >= self.sheets.len() {
            return Err(SheetError::SheetIndexOutOfBounds {
                index,
                count: self.sheets.len(),
            });
        }
        self.active = index;
        Ok(())
    }

    pub fn active_sheet(&self) -> &Sheet {
        &self.sheets[self.active]
    }

    pub fn active_sheet_mut(&mut self) -> &mut Sheet {
        &mut self.sheets[self.active]
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertySet {
        &mut self.properties
    }
}

//==============================================================================
// Writer inputs
//==============================================================================

/// A value handed to the writer for one cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawCellInput")]
pub enum CellInput {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCellInput {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    DateTime { datetime: NaiveDateTime },
    Date { date: NaiveDate },
}

impl From<RawCellInput> for CellInput {
    fn from(raw: RawCellInput) -> Self {
        match raw {
            RawCellInput::Empty => CellInput::Empty,
            RawCellInput::Bool(b) => CellInput::Bool(b),
            RawCellInput::Number(n) => CellInput::Number(n),
            RawCellInput::Text(s) => CellInput::Text(s),
            RawCellInput::DateTime { datetime } => CellInput::DateTime(datetime),
            RawCellInput::Date { date } => CellInput::DateTime(date.and_time(Default::default())),
        }
    }
}

impl fmt::Display for CellInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellInput::Empty => Ok(()),
            CellInput::Bool(b) => write!(f, "{}", b),
            CellInput::Number(n) => write!(f, "{}", n),
            CellInput::Text(s) => f.write_str(s),
            CellInput::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<&str> for CellInput {
    fn from(value: &str) -> Self {
        CellInput::Text(value.to_string())
    }
}

impl From<String> for CellInput {
    fn from(value: String) -> Self {
        CellInput::Text(value)
    }
}

impl From<f64> for CellInput {
    fn from(value: f64) -> Self {
        CellInput::Number(value)
    }
}

impl From<i64> for CellInput {
    fn from(value: i64) -> Self {
        CellInput::Number(value as f64)
    }
}

impl From<i32> for CellInput {
    fn from(value: i32) -> Self {
        CellInput::Number(value as f64)
    }
}

impl From<bool> for CellInput {
    fn from(value: bool) -> Self {
        CellInput::Bool(value)
    }
}

impl From<NaiveDateTime> for CellInput {
    fn from(value: NaiveDateTime) -> Self {
        CellInput::DateTime(value)
    }
}

impl<T: Into<CellInput>> From<Option<T>> for CellInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(CellInput::Empty, Into::into)
    }
}

/// Protection options of a structured update entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct CellOptions {
    #[serde(default)]
    pub lock: Option<bool>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

/// `{value, options}` form of an update entry. A missing value skips the cell.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyledCell {
    #[serde(default)]
    pub value: Option<CellInput>,
    #[serde(default)]
    pub options: CellOptions,
}

/// One cell of an update instruction: a bare value or a structured entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UpdateCell {
    Styled(StyledCell),
    Value(CellInput),
}

impl From<CellInput> for UpdateCell {
    fn from(value: CellInput) -> Self {
        UpdateCell::Value(value)
    }
}

impl UpdateCell {
    pub fn value(value: impl Into<CellInput>) -> Self {
        UpdateCell::Value(value.into())
    }

    pub fn styled(value: impl Into<CellInput>, lock: Option<bool>, hidden: Option<bool>) -> Self {
        UpdateCell::Styled(StyledCell {
            value: Some(value.into()),
            options: CellOptions { lock, hidden },
        })
    }
}

/// Row number → column letters → update entry.
pub type UpdateInstructions = BTreeMap<u32, IndexMap<String, UpdateCell>>;

/// Ordered map from logical column key to header label.
pub type HeaderMap = IndexMap<String, String>;

/// One data row keyed by logical column key.
pub type DataRow = IndexMap<String, CellInput>;

/// Flat property input for `create`.
pub type PropertyInput = IndexMap<String, PropertyValue>;

//==============================================================================
// Reader outputs
//==============================================================================

/// Row number → column → display string for one sheet.
pub type SheetRows = BTreeMap<u32, BTreeMap<Column, String>>;

/// Sheet index → rows.
pub type RowGrid = BTreeMap<usize, SheetRows>;

/// One data row of a header-keyed read.
pub type Record = IndexMap<String, String>;
