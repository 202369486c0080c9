//! Engine round trips through real XLSX/CSV/PDF files

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use xlbridge::types::{
    CellInput, Column, DataRow, HeaderMap, PropertyInput, RowGrid, UpdateCell,
    UpdateInstructions,
};
use xlbridge::{Engine, EngineConfig, PropertyValue, SheetError};

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

fn headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("column1".into(), "Header 1".into());
    headers.insert("column2".into(), "Header 2".into());
    headers
}

fn data_rows(count: usize) -> Vec<DataRow> {
    (1..=count)
        .map(|i| {
            let mut row = DataRow::new();
            row.insert("column1".into(), CellInput::from(format!("c1r{}", i)));
            row.insert("column2".into(), CellInput::from(format!("c2r{}", i)));
            row
        })
        .collect()
}

fn created(rows: usize) -> Engine {
    let mut engine = Engine::new();
    engine.create(IndexMap::new(), &headers(), &data_rows(rows)).unwrap();
    engine
}

fn saved(dir: &TempDir, name: &str, engine: &mut Engine, kind: &str) -> PathBuf {
    let path = dir.path().join(name);
    engine.save(Some(path.as_path()), kind).unwrap();
    path
}

/// Row → [(column letters, value)] view of one sheet of a grid.
fn sheet_view(grid: &RowGrid, sheet: usize) -> Vec<(u32, Vec<(String, String)>)> {
    grid[&sheet]
        .iter()
        .map(|(row, cells)| {
            let cells = cells
                .iter()
                .map(|(column, value)| (column.letters(), value.clone()))
                .collect();
            (*row, cells)
        })
        .collect()
}

fn cells(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(c, v)| (c.to_string(), v.to_string()))
        .collect()
}

/// A workbook with a hidden row and a date column, written without the engine.
fn hidden_row_fixture(path: &Path) {
    use rust_xlsxwriter::{Format, Workbook};

    let mut book = Workbook::new();
    let sheet = book.add_worksheet();
    let date = Format::new().set_num_format("yyyy/mm/dd");
    sheet.write_string(0, 0, "Full Name").unwrap();
    sheet.write_string(0, 1, "Date").unwrap();
    sheet.write_string(0, 3, "Qty").unwrap();
    sheet.write_string(1, 0, "Ada").unwrap();
    sheet.write_number_with_format(1, 1, 44790.0, &date).unwrap();
    sheet.write_number(1, 3, 2.0).unwrap();
    sheet.write_string(2, 0, "Grace").unwrap();
    sheet.write_number_with_format(2, 1, 44791.0, &date).unwrap();
    sheet.write_number(2, 3, 5.0).unwrap();
    sheet.set_row_hidden(2).unwrap();
    book.save(path).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════
// CREATE / TO_ARRAY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_create_then_to_array() {
    let mut engine = created(2);
    let grid = engine.to_array(None).unwrap();

    assert_eq!(
        sheet_view(&grid, 0),
        vec![
            (1, cells(&[("A", "Header 1"), ("B", "Header 2")])),
            (2, cells(&[("A", "c1r1"), ("B", "c2r1")])),
            (3, cells(&[("A", "c1r2"), ("B", "c2r2")])),
        ]
    );
    assert!(engine.errors().is_empty());
}

#[test]
fn test_headers_only_workbook_has_one_row() {
    let mut engine = Engine::new();
    engine.create(IndexMap::new(), &headers(), &[]).unwrap();
    let grid = engine.to_array(None).unwrap();

    assert_eq!(grid.len(), 1);
    assert_eq!(
        sheet_view(&grid, 0),
        vec![(1, cells(&[("A", "Header 1"), ("B", "Header 2")]))]
    );
}

#[test]
fn test_create_rejects_rows_longer_than_header() {
    let mut engine = Engine::new();
    let mut rows = data_rows(2);
    rows[1].insert("column3".into(), CellInput::from("extra"));

    let err = engine.create(IndexMap::new(), &headers(), &rows).unwrap_err();
    assert_eq!(err.to_string(), "Cells longer than header row. Row:1");
    assert_eq!(engine.errors(), ["Cells longer than header row. Row:1"]);
}

#[test]
fn test_create_with_dates_and_sheet_title() {
    let mut props = PropertyInput::new();
    props.insert("sheet_title".into(), "Staff".into());

    let mut headers = HeaderMap::new();
    headers.insert("name".into(), "Name".into());
    headers.insert("start".into(), "Start".into());
    let mut row = DataRow::new();
    row.insert("name".into(), "Ada".into());
    row.insert(
        "start".into(),
        CellInput::from(
            chrono::NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        ),
    );

    let mut engine = Engine::new();
    engine.create(props, &headers, &[row]).unwrap();
    assert_eq!(engine.sheet_names().unwrap(), vec!["Staff"]);

    let grid = engine.to_array(None).unwrap();
    assert_eq!(grid[&0][&2][&Column::from_index(1)], "2023/01/01");
}

// ═══════════════════════════════════════════════════════════════════════════
// SAVE / RELOAD
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_xlsx_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut engine = created(3);
    let before = engine.to_array(None).unwrap();
    let path = saved(&dir, "round.xlsx", &mut engine, "Xlsx");

    let mut reloaded = Engine::open(&path, 0, None).unwrap();
    assert_eq!(reloaded.to_array(None).unwrap(), before);
    assert_eq!(reloaded.sheet_names().unwrap(), vec!["Worksheet"]);
}

#[test]
fn test_csv_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut engine = created(2);
    let path = saved(&dir, "round.csv", &mut engine, "Csv");

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "\"Header 1\",\"Header 2\"\n\"c1r1\",\"c2r1\"\n\"c1r2\",\"c2r2\"\n"
    );

    let mut reloaded = Engine::open(&path, 0, None).unwrap();
    let grid = reloaded.to_array(None).unwrap();
    assert_eq!(grid[&0].len(), 3);
    assert_eq!(grid[&0][&3][&Column::from_index(1)], "c2r2");
}

#[test]
fn test_properties_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut props = PropertyInput::new();
    props.insert("title".into(), "Quarterly".into());
    props.insert("creator".into(), "Ada".into());
    props.insert("company".into(), "Acme".into());
    props.insert("subject".into(), "Numbers".into());
    props.insert("keywords".into(), "alpha,beta".into());
    props.insert("dept".into(), "Ops".into());
    props.insert("year".into(), PropertyValue::Integer(2024));

    let mut engine = Engine::new();
    engine.set_modified_by("Nightly");
    engine.create(props, &headers(), &data_rows(1)).unwrap();
    let path = saved(&dir, "props.xlsx", &mut engine, "Xlsx");

    let mut reloaded = Engine::open(&path, 0, None).unwrap();
    assert_eq!(reloaded.property("title").unwrap(), PropertyValue::text("Quarterly"));
    assert_eq!(reloaded.property("creator").unwrap(), PropertyValue::text("Ada"));
    assert_eq!(reloaded.property("company").unwrap(), PropertyValue::text("Acme"));
    assert_eq!(reloaded.property("subject").unwrap(), PropertyValue::text("Numbers"));
    assert_eq!(reloaded.property("modifier").unwrap(), PropertyValue::text("Nightly"));
    assert_eq!(
        reloaded.property("keywords").unwrap(),
        PropertyValue::List(vec!["alpha".into(), "beta".into()])
    );
    assert_eq!(reloaded.property("dept").unwrap(), PropertyValue::text("Ops"));
    assert_eq!(reloaded.property("year").unwrap(), PropertyValue::Integer(2024));
    assert_eq!(reloaded.property("nope").unwrap(), PropertyValue::text(""));
}

#[test]
fn test_fresh_properties_defaults() {
    let mut engine = created(0);
    let props = engine.properties().unwrap();
    assert_eq!(props.creator, "Unknown Creator");
    assert_eq!(props.last_modified_by, "Unknown Creator");
    assert_eq!(props.title, "Untitled Spreadsheet");
    assert_eq!(engine.property("keywords").unwrap(), PropertyValue::List(vec![]));
}

#[test]
fn test_save_to_unwritable_path() {
    let dir = TempDir::new().unwrap();
    let mut engine = created(1);
    let target = dir.path().join("missing").join("out.xlsx");

    let err = engine.save(Some(target.as_path()), "Xlsx").unwrap_err();
    assert!(matches!(err, SheetError::FileNotWritable(_)));
    assert_eq!(
        engine.errors(),
        [format!("Unable to write to: `{}`", target.display())]
    );
}

#[test]
fn test_save_uses_configured_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("configured.csv");
    std::fs::write(&path, "a,b\n1,2\n").unwrap();

    let mut engine = Engine::open(&path, 0, None).unwrap();
    engine.save(None, "csv").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "\"a\",\"b\"\n\"1\",\"2\"\n");
}

#[test]
fn test_save_elsewhere_reads_the_source_first() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.csv");
    std::fs::write(&source, "name,qty\nAda,3\n").unwrap();

    let mut engine = Engine::open(&source, 0, None).unwrap();
    let copy = saved(&dir, "copy.xlsx", &mut engine, "Xlsx");
    assert_eq!(engine.file_path(), Some(copy.as_path()));

    let mut reloaded = Engine::open(&copy, 0, None).unwrap();
    let grid = reloaded.to_array(None).unwrap();
    assert_eq!(
        sheet_view(&grid, 0),
        vec![
            (1, cells(&[("A", "name"), ("B", "qty")])),
            (2, cells(&[("A", "Ada"), ("B", "3")])),
        ]
    );
    assert_eq!(std::fs::read_to_string(&source).unwrap(), "name,qty\nAda,3\n");
}

#[test]
fn test_save_over_existing_target_keeps_source_data() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.csv");
    let target = dir.path().join("target.csv");
    std::fs::write(&source, "fresh\n").unwrap();
    std::fs::write(&target, "stale\n").unwrap();

    let mut engine = Engine::open(&source, 0, None).unwrap();
    engine.save(Some(target.as_path()), "Csv").unwrap();
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "\"fresh\"\n");
}

#[test]
fn test_save_stamps_configured_modifier_even_when_empty() {
    let dir = TempDir::new().unwrap();
    let mut props = PropertyInput::new();
    props.insert("modifier".into(), "Editor".into());

    let mut engine = Engine::new();
    engine.create(props, &headers(), &data_rows(1)).unwrap();
    let path = saved(&dir, "stamped.xlsx", &mut engine, "Xlsx");

    let mut reloaded = Engine::open(&path, 0, None).unwrap();
    assert_eq!(reloaded.property("modifier").unwrap(), PropertyValue::text(""));
}

#[test]
fn test_csv_blank_lines_keep_row_numbers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gaps.csv");
    std::fs::write(&path, "a\n\nb\n").unwrap();

    let mut engine = Engine::open(&path, 0, None).unwrap();
    let grid = engine.to_array(None).unwrap();
    assert_eq!(grid[&0].keys().copied().collect::<Vec<_>>(), vec![1, 3]);

    let mut row = IndexMap::new();
    row.insert("A".to_string(), UpdateCell::value("B!"));
    let mut updates = UpdateInstructions::new();
    updates.insert(3, row);
    engine.update_from_array(&updates).unwrap();
    engine.save(None, "Csv").unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "\"a\"\n\"\"\n\"B!\"\n"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// EXCEL FILE TO ARRAY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_excel_file_to_array_skips_hidden_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hidden.xlsx");
    hidden_row_fixture(&path);

    let mut engine = Engine::new();
    let records = engine.excel_file_to_array(&path, false).unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(
        record.keys().cloned().collect::<Vec<_>>(),
        vec!["full-name", "date", "2", "qty"]
    );
    assert_eq!(record["full-name"], "Ada");
    assert_eq!(record["date"], "2022-08-17 00:00:00");
    assert_eq!(record["2"], "");
    assert_eq!(record["qty"], "2");
    assert_eq!(engine.file_path(), Some(path.as_path()));
}

#[test]
fn test_excel_file_to_array_includes_hidden_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hidden.xlsx");
    hidden_row_fixture(&path);

    let mut engine = Engine::new();
    let records = engine.excel_file_to_array(&path, true).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["full-name"], "Grace");
    assert_eq!(records[1]["date"], "2022-08-18 00:00:00");
}

#[test]
fn test_hidden_rows_survive_engine_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("hidden.xlsx");
    hidden_row_fixture(&source);

    let mut engine = Engine::open(&source, 0, None).unwrap();
    let copy = saved(&dir, "copy.xlsx", &mut engine, "Xlsx");

    let mut reader = Engine::new();
    assert_eq!(reader.excel_file_to_array(&copy, false).unwrap().len(), 1);
    assert_eq!(reader.excel_file_to_array(&copy, true).unwrap().len(), 2);
}

#[test]
fn test_excel_file_to_array_leaves_the_workbook_alone() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("other.csv");
    std::fs::write(&other, "h\nv\n").unwrap();

    let mut engine = created(1);
    let records = engine.excel_file_to_array(&other, false).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["h"], "v");

    let grid = engine.to_array(None).unwrap();
    assert_eq!(grid[&0][&1][&Column::from_index(0)], "Header 1");
    assert_eq!(grid[&0][&2][&Column::from_index(0)], "c1r1");
}

#[test]
fn test_excel_file_to_array_missing_file() {
    let mut engine = Engine::new();
    let err = engine.excel_file_to_array("/no/such/file.xlsx", false).unwrap_err();
    assert_eq!(err.to_string(), "Error unable to read file: `/no/such/file.xlsx`");
    assert_eq!(engine.errors().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// UPDATE FROM ARRAY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_update_from_json_document() {
    let mut engine = created(2);
    let updates: UpdateInstructions = serde_json::from_str(
        r#"{
            "2": {"A": {"datetime": "2023-01-01T00:00:00"}, "B": false},
            "3": {"A": {"date": "1900-01-01"}, "B": null},
            "4": {"C": {"options": {"lock": true}}, "A": {"value": "new", "options": {"lock": false}}}
        }"#,
    )
    .unwrap();

    engine.update_from_array(&updates).unwrap();
    let grid = engine.to_array(None).unwrap();

    assert_eq!(
        sheet_view(&grid, 0),
        vec![
            (1, cells(&[("A", "Header 1"), ("B", "Header 2")])),
            (2, cells(&[("A", "2023/01/01"), ("B", "FALSE")])),
            (3, cells(&[("A", "1900/01/01"), ("B", "")])),
            (4, cells(&[("A", "new"), ("B", "")])),
        ]
    );
}

#[test]
fn test_update_grows_the_sheet() {
    let mut engine = created(1);
    let mut row = IndexMap::new();
    row.insert("D".to_string(), UpdateCell::value(42));
    let mut updates = UpdateInstructions::new();
    updates.insert(10, row);

    engine.update_from_array(&updates).unwrap();
    let info = engine.worksheet_info().unwrap();
    assert_eq!(info[0].last_row, 10);
    assert_eq!(info[0].last_column, Column::from_index(3));
    assert_eq!(info[0].total_columns, 4);
}

#[test]
fn test_update_is_all_or_nothing() {
    let mut engine = created(1);
    let mut row = IndexMap::new();
    row.insert("A".to_string(), UpdateCell::value("changed"));
    row.insert("A!".to_string(), UpdateCell::value("x"));
    let mut updates = UpdateInstructions::new();
    updates.insert(2, row);

    let err = engine.update_from_array(&updates).unwrap_err();
    assert_eq!(err.to_string(), "Issue with cell `A!2` value of `x`");

    let grid = engine.to_array(None).unwrap();
    assert_eq!(grid[&0][&2][&Column::from_index(0)], "c1r1");
    assert_eq!(engine.errors().len(), 1);
}

#[test]
fn test_update_rejects_dates_before_epoch() {
    let mut engine = created(1);
    let updates: UpdateInstructions =
        serde_json::from_str(r#"{"2": {"A": {"date": "1899-12-30"}}}"#).unwrap();

    let err = engine.update_from_array(&updates).unwrap_err();
    assert!(matches!(err, SheetError::CellWrite { .. }));
}

#[test]
fn test_update_targets_configured_sheet() {
    let mut engine = created(1);
    engine.set_sheet_index(3);
    let err = engine.update_from_array(&UpdateInstructions::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "You tried to set a sheet active by the out of bounds index: 3. The actual number of sheets is 1."
    );
}

#[test]
fn test_update_reports_progress() {
    let mut engine = created(1);
    let mut updates = UpdateInstructions::new();
    for row in 2..=251 {
        let mut cells = IndexMap::new();
        cells.insert("A".to_string(), UpdateCell::value(row as i64));
        updates.insert(row, cells);
    }

    let mut calls = Vec::new();
    engine
        .update_from_array_with_progress(&updates, &mut |current: usize, total: usize| {
            calls.push((current, total))
        })
        .unwrap();
    assert_eq!(calls, vec![(100, 250), (200, 250), (250, 250)]);
}

// ═══════════════════════════════════════════════════════════════════════════
// DOWNLOAD
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_download_xlsx_bytes() {
    let mut engine = created(1);
    let mut out = Vec::new();
    engine.download_to(&mut out, "Xlsx").unwrap();

    assert!(out.starts_with(b"PK"));
    let needle = b"xl/_rels/workbook.xml.rels";
    assert!(out.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn test_download_csv_bytes() {
    let mut engine = created(1);
    let mut out = Vec::new();
    engine.download_to(&mut out, "Csv").unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "\"Header 1\",\"Header 2\"\n\"c1r1\",\"c2r1\"\n"
    );
}

#[test]
fn test_download_pdf_bytes() {
    let mut engine = created(3);
    let mut out = Vec::new();
    engine.download_to(&mut out, "pdf").unwrap();
    assert!(out.starts_with(b"%PDF-"));
}

#[test]
fn test_download_unknown_type() {
    let mut engine = created(1);
    let mut out = Vec::new();
    let err = engine.download_to(&mut out, "Html").unwrap_err();
    assert_eq!(err.to_string(), "Unknown type: `Html`");
    assert!(out.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_sheet_index_out_of_bounds_on_load() {
    let dir = TempDir::new().unwrap();
    let mut engine = created(1);
    let path = saved(&dir, "one.xlsx", &mut engine, "Xlsx");

    let mut reader = Engine::open(&path, 5, None).unwrap();
    let err = reader.to_array(None).unwrap_err();
    assert!(matches!(err, SheetError::SheetIndexOutOfBounds { index: 5, count: 1 }));
    assert!(matches!(reader.to_array(None), Err(SheetError::NotLoaded(_))));
}

#[test]
fn test_line_limit_caps_rows() {
    let dir = TempDir::new().unwrap();
    let mut engine = created(20);
    let path = saved(&dir, "long.xlsx", &mut engine, "Xlsx");

    let mut limited = Engine::open(&path, 0, Some(5)).unwrap();
    let grid = limited.to_array(Some(0)).unwrap();
    assert_eq!(grid[&0].keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_unrecognized_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.png");
    std::fs::write(&path, [0x89, b'P', b'N', b'G', 0, 0, 0, 0]).unwrap();

    let mut engine = Engine::open(&path, 0, None).unwrap();
    let err = engine.to_array(None).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Unable to identify a reader for this file: `{}`", path.display())
    );
}

#[test]
fn test_engine_from_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.csv");
    std::fs::write(&path, "a\nb\nc\n").unwrap();

    let config = EngineConfig {
        file_path: Some(path),
        line_limit: Some(2),
        ..Default::default()
    };
    let mut engine = Engine::with_config(config).unwrap();
    assert_eq!(engine.to_array(None).unwrap()[&0].len(), 2);
}

#[test]
fn test_excel_csv_to_array_through_engine() {
    let mut engine = Engine::new();
    let rows = engine.excel_csv_to_array("a,b\n\"c, d\",e").unwrap();
    assert_eq!(rows, vec![vec!["a", "b"], vec!["c, d", "e"]]);

    let err = engine.excel_csv_to_array("").unwrap_err();
    assert_eq!(err.to_string(), "Invalid or empty CSV String");
    assert_eq!(engine.errors(), ["Invalid or empty CSV String"]);
}

#[test]
fn test_memory_usage_report() {
    let engine = Engine::new();
    assert_eq!(engine.memory_usage(true, Some(1024.0)), "1 KB");
    assert_eq!(engine.memory_usage(false, Some(1024.0)), "1024");
}
