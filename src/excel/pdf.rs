//! PDF output: the active sheet as a paginated monospace table

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::{SheetError, SheetResult};
use crate::types::PropertySet;

/// Turns display rows of one sheet into a PDF document.
pub trait PdfRenderer {
    fn render(&self, properties: &PropertySet, rows: &[Vec<String>]) -> SheetResult<Vec<u8>>;
}

// A4 landscape, in points
const PAGE_WIDTH: f32 = 842.0;
const PAGE_HEIGHT: f32 = 595.0;
const MARGIN: f32 = 36.0;

/// Courier advance width as a fraction of the font size.
const CHAR_WIDTH_RATIO: f32 = 0.6;
const MIN_FONT_SIZE: f32 = 4.0;
const SEPARATOR: &str = " | ";

/// Renders rows as a Courier text table, repeating the first row as the
/// header of every page.
#[derive(Debug, Clone)]
pub struct TablePdfRenderer {
    pub font_size: f32,
    pub max_column_chars: usize,
}

impl Default for TablePdfRenderer {
    fn default() -> Self {
        Self {
            font_size: 9.0,
            max_column_chars: 40,
        }
    }
}

impl TablePdfRenderer {
    fn column_widths(&self, rows: &[Vec<String>]) -> Vec<usize> {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        (0..columns)
            .map(|col| {
                rows.iter()
                    .filter_map(|row| row.get(col))
                    .map(|value| value.chars().count())
                    .max()
                    .unwrap_or(0)
                    .clamp(1, self.max_column_chars)
            })
            .collect()
    }

    /// Shrink the font until a full line fits the printable width.
    fn fitted_font_size(&self, line_chars: usize) -> f32 {
        if line_chars == 0 {
            return self.font_size;
        }
        let fitting = (PAGE_WIDTH - 2.0 * MARGIN) / (line_chars as f32 * CHAR_WIDTH_RATIO);
        fitting.min(self.font_size).max(MIN_FONT_SIZE)
    }

    fn page_content(&self, lines: &[&str], font_size: f32) -> Content {
        let leading = font_size * 1.4;
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), font_size.into()]),
            Operation::new("TL", vec![leading.into()]),
            Operation::new(
                "Td",
                vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN - font_size).into()],
            ),
        ];
        for line in lines {
            operations.push(Operation::new("Tj", vec![Object::string_literal(latin1(line))]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));
        Content { operations }
    }
}

impl PdfRenderer for TablePdfRenderer {
    fn render(&self, properties: &PropertySet, rows: &[Vec<String>]) -> SheetResult<Vec<u8>> {
        let widths = self.column_widths(rows);
        let lines: Vec<String> = rows.iter().map(|row| format_line(row, &widths)).collect();
        let rule = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");

        let font_size = self.fitted_font_size(rule.chars().count());
        let per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / (font_size * 1.4)).floor() as usize;
        let body_per_page = per_page.saturating_sub(2).max(1);

        let (header, body) = match lines.split_first() {
            Some((header, body)) => (Some(header.as_str()), body),
            None => (None, &lines[..]),
        };
        let mut pages: Vec<Vec<&str>> = body
            .chunks(body_per_page)
            .map(|chunk| {
                header
                    .into_iter()
                    .chain(Some(rule.as_str()))
                    .chain(chunk.iter().map(String::as_str))
                    .collect()
            })
            .collect();
        if pages.is_empty() {
            pages.push(header.into_iter().collect());
        }

        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for lines in &pages {
            let content = self
                .page_content(lines, font_size)
                .encode()
                .map_err(|e| SheetError::encode_failed("Pdf", e))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            }),
        );

        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(latin1(&properties.title)),
            "Author" => Object::string_literal(latin1(&properties.creator)),
            "Subject" => Object::string_literal(latin1(&properties.subject)),
            "Keywords" => Object::string_literal(latin1(&properties.keywords)),
            "Producer" => Object::string_literal(env!("CARGO_PKG_NAME")),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

fn format_line(row: &[String], widths: &[usize]) -> String {
    widths
        .iter()
        .enumerate()
        .map(|(col, width)| {
            let value = row.get(col).map(String::as_str).unwrap_or("");
            let clipped: String = value.chars().take(*width).collect();
            format!("{:<width$}", clipped, width = *width)
        })
        .collect::<Vec<_>>()
        .join(SEPARATOR)
        .trim_end()
        .to_string()
}

/// WinAnsi bytes for `text`; characters outside Latin-1 become `?`.
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
