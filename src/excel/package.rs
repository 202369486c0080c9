//! XLSX package plumbing the cell reader and the encoder do not cover:
//! container sniffing, document properties, row visibility and the
//! last-modified-by stamp.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use chrono::DateTime;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::result::{ZipError, ZipResult};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{SheetError, SheetResult};
use crate::types::{PropertySet, PropertyValue};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const TEXT_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CORE_PART: &str = "docProps/core.xml";
const APP_PART: &str = "docProps/app.xml";
const CUSTOM_PART: &str = "docProps/custom.xml";

/// Largest single part inflated into memory.
const MAX_PART_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Xlsx,
    Csv,
}

/// Identify the container format of `path` from its leading bytes, falling
/// back to the extension for plain-text formats.
pub fn sniff_format(path: &Path) -> SheetResult<ContainerFormat> {
    let mut file = File::open(path).map_err(|_| SheetError::not_readable(path))?;
    let unrecognized = || SheetError::FormatUnrecognized(path.display().to_string());

    let mut head = Vec::with_capacity(8);
    (&mut file).take(8).read_to_end(&mut head)?;

    if head.starts_with(ZIP_MAGIC) {
        file.rewind()?;
        let archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| SheetError::load_failed(path, e))?;
        let is_workbook = archive.file_names().any(|name| name == WORKBOOK_PART);
        return if is_workbook {
            Ok(ContainerFormat::Xlsx)
        } else {
            Err(unrecognized())
        };
    }

    // Legacy binary workbooks have no reader here.
    if head.starts_with(OLE_MAGIC) {
        return Err(unrecognized());
    }

    let text_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if text_extension {
        let bytes = std::fs::read(path)?;
        if !bytes.contains(&0) && std::str::from_utf8(&bytes).is_ok() {
            return Ok(ContainerFormat::Csv);
        }
    }

    Err(unrecognized())
}

/// Package-level facts about an XLSX file.
#[derive(Debug, Clone, Default)]
pub struct PackageMetadata {
    pub properties: PropertySet,
    /// Hidden row numbers per sheet, in workbook order.
    pub hidden_rows: Vec<BTreeSet<u32>>,
}

/// Read document properties and row visibility from an XLSX package.
pub fn read_package_metadata(path: &Path) -> SheetResult<PackageMetadata> {
    let file = File::open(path).map_err(|_| SheetError::not_readable(path))?;
    read_metadata(BufReader::new(file)).map_err(|e| SheetError::load_failed(path, e))
}

fn read_metadata<R: Read + Seek>(reader: R) -> ZipResult<PackageMetadata> {
    let mut archive = ZipArchive::new(reader)?;
    let mut metadata = PackageMetadata::default();

    if let Some(xml) = read_part(&mut archive, CORE_PART)? {
        apply_core_properties(&xml, &mut metadata.properties).map_err(xml_error)?;
    }
    if let Some(xml) = read_part(&mut archive, APP_PART)? {
        apply_app_properties(&xml, &mut metadata.properties).map_err(xml_error)?;
    }
    if let Some(xml) = read_part(&mut archive, CUSTOM_PART)? {
        apply_custom_properties(&xml, &mut metadata.properties).map_err(xml_error)?;
    }

    let workbook = read_part(&mut archive, WORKBOOK_PART)?.unwrap_or_default();
    let rels = read_part(&mut archive, WORKBOOK_RELS_PART)?.unwrap_or_default();
    for part in sheet_parts(&workbook, &rels).map_err(xml_error)? {
        let hidden = match read_part(&mut archive, &part)? {
            Some(xml) => hidden_rows(&xml).map_err(xml_error)?,
            None => BTreeSet::new(),
        };
        metadata.hidden_rows.push(hidden);
    }

    Ok(metadata)
}

fn xml_error(e: quick_xml::Error) -> ZipError {
    ZipError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> ZipResult<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err),
    };
    if file.size() > MAX_PART_BYTES {
        return Err(ZipError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("part `{}` is larger than {} bytes", name, MAX_PART_BYTES),
        )));
    }
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn core_text_field<'p>(props: &'p mut PropertySet, element: &[u8]) -> Option<&'p mut String> {
    Some(match element {
        b"title" => &mut props.title,
        b"subject" => &mut props.subject,
        b"creator" => &mut props.creator,
        b"keywords" => &mut props.keywords,
        b"description" => &mut props.description,
        b"lastModifiedBy" => &mut props.last_modified_by,
        b"category" => &mut props.category,
        _ => return None,
    })
}

/// Present-but-empty elements read as empty text, not as the default.
fn apply_core_properties(xml: &str, props: &mut PropertySet) -> quick_xml::Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut current: Option<Vec<u8>> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if let Some(field) = core_text_field(props, &name) {
                    field.clear();
                }
                current = Some(name);
            }
            Event::Empty(e) => {
                if let Some(field) = core_text_field(props, e.local_name().as_ref()) {
                    field.clear();
                }
            }
            Event::Text(t) => {
                let Some(element) = current.as_deref() else {
                    continue;
                };
                let text = t.unescape()?.into_owned();
                if element == b"created" {
                    if let Ok(created) = DateTime::parse_from_rfc3339(&text) {
                        props.created = created.timestamp();
                    }
                } else if let Some(field) = core_text_field(props, element) {
                    *field = text;
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn apply_app_properties(xml: &str, props: &mut PropertySet) -> quick_xml::Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_company = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => in_company = e.local_name().as_ref() == b"Company",
            Event::Text(t) if in_company => props.company = t.unescape()?.into_owned(),
            Event::End(_) => in_company = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn apply_custom_properties(xml: &str, props: &mut PropertySet) -> quick_xml::Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut name: Option<String> = None;
    let mut kind: Option<Vec<u8>> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"property" => {
                name = None;
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"name" {
                        name = Some(attr.unescape_value()?.into_owned());
                    }
                }
            }
            Event::Start(e) => {
                if let Some(key) = &name {
                    props.custom.insert(key.clone(), PropertyValue::text(""));
                    kind = Some(e.local_name().as_ref().to_vec());
                }
            }
            Event::Text(t) => {
                if let (Some(key), Some(kind)) = (&name, kind.as_deref()) {
                    let value = custom_value(kind, &t.unescape()?);
                    props.custom.insert(key.clone(), value);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"property" => {
                name = None;
                kind = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn custom_value(kind: &[u8], text: &str) -> PropertyValue {
    match kind {
        b"i1" | b"i2" | b"i4" | b"i8" | b"int" => text
            .parse()
            .map(PropertyValue::Integer)
            .unwrap_or_else(|_| PropertyValue::text(text)),
        b"r4" | b"r8" | b"decimal" => text
            .parse()
            .map(PropertyValue::Number)
            .unwrap_or_else(|_| PropertyValue::text(text)),
        b"bool" => PropertyValue::Bool(matches!(text, "true" | "1")),
        _ => PropertyValue::text(text),
    }
}

/// Worksheet part names in workbook order.
fn sheet_parts(workbook_xml: &str, rels_xml: &str) -> quick_xml::Result<Vec<String>> {
    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let (mut id, mut target) = (None, None);
                for attr in e.attributes().flatten() {
                    match attr.key.local_name().as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut parts = Vec::new();
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut part = String::new();
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"id" {
                        let id = attr.unescape_value()?;
                        if let Some(target) = targets.get(id.as_ref()) {
                            part = resolve_target(target);
                        }
                    }
                }
                parts.push(part);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// Row numbers flagged `hidden` in a worksheet part.
fn hidden_rows(xml: &str) -> quick_xml::Result<BTreeSet<u32>> {
    let mut reader = Reader::from_str(xml);
    let mut hidden = BTreeSet::new();
    let mut last_row = 0u32;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                let mut row = last_row + 1;
                let mut is_hidden = false;
                for attr in e.attributes().flatten() {
                    match attr.key.local_name().as_ref() {
                        b"r" => {
                            if let Ok(r) = attr.unescape_value()?.parse() {
                                row = r;
                            }
                        }
                        b"hidden" => is_hidden = matches!(attr.value.as_ref(), b"1" | b"true"),
                        _ => {}
                    }
                }
                last_row = row;
                if is_hidden {
                    hidden.insert(row);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(hidden)
}

/// Rewrite `cp:lastModifiedBy` in an encoded XLSX package. Every other
/// part is copied through without recompression.
pub fn stamp_last_modified_by(package: &[u8], modified_by: &str) -> SheetResult<Vec<u8>> {
    restamp(package, modified_by).map_err(|e| SheetError::encode_failed("Xlsx", e))
}

fn restamp(package: &[u8], modified_by: &str) -> ZipResult<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(package))?;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.name() == CORE_PART {
            let mut xml = String::new();
            file.read_to_string(&mut xml)?;
            let stamped = rewrite_last_modified_by(&xml, modified_by).map_err(xml_error)?;
            zip.start_file(CORE_PART, options)?;
            zip.write_all(&stamped)?;
        } else {
            zip.raw_copy_file(file)?;
        }
    }

    Ok(zip.finish()?.into_inner())
}

const LAST_MODIFIED_BY: &str = "cp:lastModifiedBy";

fn write_last_modified_by(writer: &mut Writer<Vec<u8>>, modified_by: &str) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(LAST_MODIFIED_BY)))?;
    writer.write_event(Event::Text(BytesText::new(modified_by)))?;
    writer.write_event(Event::End(BytesEnd::new(LAST_MODIFIED_BY)))?;
    Ok(())
}

fn rewrite_last_modified_by(xml: &str, modified_by: &str) -> quick_xml::Result<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut in_target = false;
    let mut stamped = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"lastModifiedBy" => {
                writer.write_event(Event::Start(e))?;
                writer.write_event(Event::Text(BytesText::new(modified_by)))?;
                in_target = true;
                stamped = true;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"lastModifiedBy" => {
                write_last_modified_by(&mut writer, modified_by)?;
                stamped = true;
            }
            Event::Text(_) if in_target => {}
            Event::End(e) if in_target => {
                in_target = false;
                writer.write_event(Event::End(e))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"coreProperties" && !stamped => {
                write_last_modified_by(&mut writer, modified_by)?;
                stamped = true;
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    Ok(writer.into_inner())
}
