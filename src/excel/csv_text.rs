//! Raw CSV text → rows of trimmed string cells

use crate::error::{SheetError, SheetResult};
use csv::{ReaderBuilder, StringRecord};

/// Parse a delimited text blob line by line.
///
/// Blank lines are skipped, every field is trimmed, and rows whose fields
/// are all blank are dropped. Quoted fields cannot span lines.
pub fn excel_csv_to_array(text: &str) -> SheetResult<Vec<Vec<String>>> {
    if text.trim().is_empty() {
        return Err(SheetError::EmptyInput);
    }

    let mut rows = Vec::new();
    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<String> = parse_line(line)?
            .iter()
            .map(|field| field.trim().to_string())
            .collect();

        if fields.iter().all(String::is_empty) {
            continue;
        }
        rows.push(fields);
    }

    Ok(rows)
}

fn parse_line(line: &str) -> SheetResult<StringRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    reader
        .read_record(&mut record)
        .map_err(|e| SheetError::UnderlyingFormat(format!("Invalid CSV line `{}`: {}", line, e)))?;
    Ok(record)
}
