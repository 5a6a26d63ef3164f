// src/source/xlsx.rs
//
// One-shot parse of workbook bytes into a RawTable. The container is
// read with `zip`, the workbook/sharedStrings/sheet parts with
// `quick-xml`. Pure function of the byte content, so the result is
// memoizable by content identity.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{RawColumn, RawTable};
use crate::error::{Error, Result};

/// Sheet the interview workbooks keep their matrix on. Workbooks
/// without it fall back to the first sheet.
const PREFERRED_SHEET: &str = "interview 221013";

struct SheetDescriptor {
    name: String,
    rel_id: Option<String>,
    sheet_id: Option<u32>,
}

#[tracing::instrument(level = "info", skip(bytes), fields(len = bytes.len()))]
pub fn parse_workbook(bytes: &[u8]) -> Result<RawTable> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::SourceFormat(format!("not an xlsx container: {e}")))?;

    let workbook_xml = read_entry(&mut archive, "xl/workbook.xml")?;
    let sheets = parse_workbook_sheets(&workbook_xml)?;
    if sheets.is_empty() {
        return Err(Error::SourceFormat("workbook declares no sheets".into()));
    }

    let relationships = match read_optional_entry(&mut archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };
    let shared = match read_optional_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let pick = sheets
        .iter()
        .position(|s| s.name == PREFERRED_SHEET)
        .unwrap_or(0);
    debug!(sheet = %sheets[pick].name, "selected sheet");

    let target = resolve_sheet_target(&sheets[pick], &relationships, pick);
    let sheet_xml = read_entry(&mut archive, &target)?;
    let grid = parse_sheet_xml(&sheet_xml, &shared)?;
    grid_to_table(grid)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    read_optional_entry(archive, name)?
        .ok_or_else(|| Error::SourceFormat(format!("workbook part missing: {name}")))
}

fn read_optional_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Error::SourceFormat(format!("cannot read {name}: {e}"))),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|e| Error::SourceFormat(format!("cannot read {name}: {e}")))?;
    Ok(Some(buf))
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::SourceFormat(format!("workbook XML parse error: {e}"))
}

fn parse_workbook_sheets(xml: &[u8]) -> Result<Vec<SheetDescriptor>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                let mut sheet_id = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(xml_err)?;
                    match attr.key.as_ref() {
                        b"name" => name = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        b"sheetId" => {
                            sheet_id = attr
                                .unescape_value()
                                .map_err(xml_err)?
                                .parse::<u32>()
                                .ok();
                        }
                        b"r:id" => {
                            rel_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        }
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    sheets.push(SheetDescriptor {
                        name,
                        rel_id,
                        sheet_id,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut map = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                let mut rel_type = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(xml_err)?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                        b"Target" => {
                            target = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        }
                        b"Type" => {
                            rel_type = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target), Some(rel_type)) = (id, target, rel_type) {
                    if rel_type.contains("worksheet") {
                        map.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(map)
}

fn resolve_sheet_target(
    sheet: &SheetDescriptor,
    relationships: &HashMap<String, String>,
    index: usize,
) -> String {
    if let Some(rel_id) = &sheet.rel_id {
        if let Some(target) = relationships.get(rel_id) {
            return normalize_target(target);
        }
    }
    let guessed = sheet
        .sheet_id
        .map(|id| format!("xl/worksheets/sheet{id}.xml"))
        .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));
    normalize_target(&guessed)
}

fn normalize_target(target: &str) -> String {
    let trimmed = target.trim_start_matches('/');
    if trimmed.starts_with("xl/") {
        trimmed.to_string()
    } else {
        format!("xl/{trimmed}")
    }
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"si" => {
                current.clear();
                in_si = true;
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"t" && in_si => {
                let text = reader.read_text(e.name()).map_err(xml_err)?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"si" => {
                strings.push(current.clone());
                in_si = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CellKind {
    /// Numbers, formula strings, errors: the `<v>` text verbatim.
    Value,
    /// `t="s"`: `<v>` is an index into the shared strings part.
    Shared,
    /// `t="b"`: `<v>` is 0 or 1.
    Bool,
    /// `t="inlineStr"`: text lives in `<is><t>` runs.
    Inline,
}

struct PendingCell {
    col: usize,
    kind: CellKind,
    value: Option<String>,
}

fn parse_sheet_xml(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<Option<String>>>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut row: Vec<Option<String>> = Vec::new();
    let mut cell: Option<PendingCell> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"row" => {
                row = Vec::new();
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"row" => {
                rows.push(std::mem::take(&mut row));
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"row" => {
                rows.push(Vec::new());
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"c" => {
                cell = Some(read_cell_meta(&e, row.len())?);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"c" => {
                let meta = read_cell_meta(&e, row.len())?;
                set_cell(&mut row, meta.col, None);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"c" => {
                if let Some(meta) = cell.take() {
                    set_cell(&mut row, meta.col, meta.value);
                }
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"v" => {
                let text = reader.read_text(e.name()).map_err(xml_err)?.into_owned();
                if let Some(meta) = cell.as_mut() {
                    meta.value = Some(decode_value(&text, meta.kind, shared)?);
                }
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"t" => {
                // Inline string runs: <c t="inlineStr"><is><t>…</t></is></c>
                let text = reader.read_text(e.name()).map_err(xml_err)?.into_owned();
                if let Some(meta) = cell.as_mut() {
                    if meta.kind == CellKind::Inline {
                        meta.value.get_or_insert_with(String::new).push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::SourceFormat(format!("sheet XML parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

fn read_cell_meta(e: &BytesStart<'_>, fallback_col: usize) -> Result<PendingCell> {
    let mut col = fallback_col;
    let mut kind = CellKind::Value;
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        match attr.key.as_ref() {
            b"r" => {
                let cell_ref = attr.unescape_value().map_err(xml_err)?;
                col = column_index(&cell_ref).ok_or_else(|| {
                    Error::SourceFormat(format!("invalid cell address '{cell_ref}'"))
                })?;
            }
            b"t" => {
                kind = match attr.unescape_value().map_err(xml_err)?.as_ref() {
                    "s" => CellKind::Shared,
                    "b" => CellKind::Bool,
                    "inlineStr" => CellKind::Inline,
                    _ => CellKind::Value,
                };
            }
            _ => {}
        }
    }
    Ok(PendingCell {
        col,
        kind,
        value: None,
    })
}

fn decode_value(text: &str, kind: CellKind, shared: &[String]) -> Result<String> {
    match kind {
        CellKind::Shared => {
            let idx: usize = text.trim().parse().map_err(|_| {
                Error::SourceFormat(format!("shared string index '{text}' is not a number"))
            })?;
            shared.get(idx).cloned().ok_or_else(|| {
                Error::SourceFormat(format!("shared string index {idx} out of bounds"))
            })
        }
        CellKind::Bool => {
            let value = if text.trim() == "1" { "TRUE" } else { "FALSE" };
            Ok(value.to_string())
        }
        CellKind::Value | CellKind::Inline => Ok(text.to_string()),
    }
}

/// "B3" → 1. Column letters only; the row digits are ignored.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut col: usize = 0;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        seen = true;
        col = col * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    if seen {
        Some(col - 1)
    } else {
        None
    }
}

fn set_cell(row: &mut Vec<Option<String>>, col: usize, value: Option<String>) {
    while row.len() < col {
        row.push(None);
    }
    if col == row.len() {
        row.push(value);
    } else {
        row[col] = value;
    }
}

/// First sheet row becomes the column headers (stringified, trimmed);
/// the rest become data cells, padded so every column has one cell per
/// row.
fn grid_to_table(rows: Vec<Vec<Option<String>>>) -> Result<RawTable> {
    if rows.is_empty() {
        return Err(Error::SourceFormat("selected sheet has no rows".into()));
    }
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let header = &rows[0];

    let mut columns: Vec<RawColumn> = (0..width)
        .map(|i| RawColumn {
            name: header
                .get(i)
                .and_then(|c| c.as_deref())
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            cells: Vec::with_capacity(rows.len().saturating_sub(1)),
        })
        .collect();

    for row in &rows[1..] {
        for (i, column) in columns.iter_mut().enumerate() {
            column.cells.push(row.get(i).cloned().flatten());
        }
    }

    Ok(RawTable { columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use anyhow::Result;
    use std::io::Write;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    use zip::write::FileOptions;
    use zip::CompressionMethod;

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,longform::source=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn col_letter(i: usize) -> char {
        (b'A' + i as u8) as char
    }

    /// Rows of inline-string cells; `None` leaves the cell out entirely
    /// (a truly blank cell, as Excel writes them).
    fn sheet_xml(rows: &[&[Option<&str>]]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet><sheetData>"#,
        );
        for (r, cells) in rows.iter().enumerate() {
            xml.push_str(&format!("<row r=\"{}\">", r + 1));
            for (c, cell) in cells.iter().enumerate() {
                if let Some(text) = cell {
                    xml.push_str(&format!(
                        "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                        col_letter(c),
                        r + 1,
                        text
                    ));
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships>
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
</Relationships>"#;

    fn workbook_xml(sheet_names: &[&str]) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><workbook><sheets>"#);
        for (i, name) in sheet_names.iter().enumerate() {
            xml.push_str(&format!(
                "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
                name,
                i + 1,
                i + 1
            ));
        }
        xml.push_str("</sheets></workbook>");
        xml
    }

    fn build_xlsx(parts: &[(&str, &str)]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, content) in parts {
                let options: FileOptions<'_, ()> =
                    FileOptions::default().compression_method(CompressionMethod::Stored);
                zip.start_file(*name, options)?;
                zip.write_all(content.as_bytes())?;
            }
            zip.finish()?;
        }
        Ok(buf)
    }

    fn simple_workbook(sheet: &str) -> Result<Vec<u8>> {
        build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Sheet1"])),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", sheet),
        ])
    }

    #[test]
    fn parses_headers_and_cells() -> Result<()> {
        init_test_logging();
        let sheet = sheet_xml(&[
            &[Some("Topic"), Some("Sub"), Some("Prompt"), Some(" Alice ")],
            &[Some("Ops"), Some("Recon"), Some("How?"), Some("fine")],
            &[None, None, None, Some("still fine")],
        ]);
        let table = parse_workbook(&simple_workbook(&sheet)?)?;

        // Header names are stringified and trimmed.
        assert_eq!(table.headers(), vec!["Topic", "Sub", "Prompt", "Alice"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.columns[0].cells[0], Some("Ops".to_string()));
        assert_eq!(table.columns[0].cells[1], None);
        assert_eq!(table.columns[3].cells[1], Some("still fine".to_string()));
        Ok(())
    }

    #[test]
    fn prefers_the_interview_sheet_when_present() -> Result<()> {
        let other = sheet_xml(&[&[Some("X")], &[Some("wrong sheet")]]);
        let interview = sheet_xml(&[
            &[Some("Topic"), Some("Sub"), Some("Prompt"), Some("Alice")],
            &[Some("Ops"), Some("Recon"), Some("How?"), Some("right sheet")],
        ]);
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Summary", "interview 221013"])),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", &other),
            ("xl/worksheets/sheet2.xml", &interview),
        ])?;

        let table = parse_workbook(&bytes)?;
        assert_eq!(table.columns[3].cells[0], Some("right sheet".to_string()));
        Ok(())
    }

    #[test]
    fn falls_back_to_the_first_sheet() -> Result<()> {
        let first = sheet_xml(&[&[Some("OnlyHeader")], &[Some("first sheet wins")]]);
        let second = sheet_xml(&[&[Some("Other")], &[Some("not this one")]]);
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Alpha", "Beta"])),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", &first),
            ("xl/worksheets/sheet2.xml", &second),
        ])?;

        let table = parse_workbook(&bytes)?;
        assert_eq!(table.headers(), vec!["OnlyHeader"]);
        assert_eq!(table.columns[0].cells[0], Some("first sheet wins".to_string()));
        Ok(())
    }

    #[test]
    fn missing_rels_falls_back_to_sheet_id_path() -> Result<()> {
        let sheet = sheet_xml(&[&[Some("H")], &[Some("found via guess")]]);
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Sheet1"])),
            ("xl/worksheets/sheet1.xml", &sheet),
        ])?;
        let table = parse_workbook(&bytes)?;
        assert_eq!(table.columns[0].cells[0], Some("found via guess".to_string()));
        Ok(())
    }

    #[test]
    fn decodes_shared_strings_numbers_and_booleans() -> Result<()> {
        let shared = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst><si><t>Topic</t></si><si><t>from the pool</t></si></sst>"#;
        let sheet = r#"<?xml version="1.0" encoding="UTF-8"?><worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c></row>
<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>42</v></c><c r="C2" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Sheet1"])),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ])?;

        let table = parse_workbook(&bytes)?;
        assert_eq!(table.headers(), vec!["Topic", "", ""]);
        assert_eq!(table.columns[0].cells[0], Some("from the pool".to_string()));
        assert_eq!(table.columns[1].cells[0], Some("42".to_string()));
        assert_eq!(table.columns[2].cells[0], Some("TRUE".to_string()));
        Ok(())
    }

    #[test]
    fn shared_string_index_out_of_bounds_is_reported() -> Result<()> {
        let shared = r#"<sst><si><t>only one</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>5</v></c></row></sheetData></worksheet>"#;
        let bytes = build_xlsx(&[
            ("xl/workbook.xml", &workbook_xml(&["Sheet1"])),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ])?;
        match parse_workbook(&bytes) {
            Err(Error::SourceFormat(msg)) => assert!(msg.contains("out of bounds")),
            other => panic!("expected source format error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_a_source_format_error() {
        match parse_workbook(b"definitely not a zip") {
            Err(Error::SourceFormat(msg)) => assert!(msg.contains("xlsx")),
            other => panic!("expected source format error, got {other:?}"),
        }
    }

    #[test]
    fn zip_without_workbook_part_is_a_source_format_error() -> Result<()> {
        let bytes = build_xlsx(&[("readme.txt", "hello")])?;
        match parse_workbook(&bytes) {
            Err(Error::SourceFormat(msg)) => assert!(msg.contains("workbook part missing")),
            other => panic!("expected source format error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn column_index_parses_references() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("B3"), Some(1));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("7"), None);
    }

    #[test]
    fn end_to_end_workbook_normalizes_to_the_reference_shape() -> Result<()> {
        init_test_logging();
        // Row 2 has no label cells at all and an empty-string cell for
        // Alice; fill-down supplies the labels, the blank is dropped.
        let sheet = sheet_xml(&[
            &[Some("Topic"), Some("Sub"), Some("Prompt"), Some("Alice"), Some("Bob")],
            &[Some("Ops"), Some("Recon"), Some("How?"), Some("fine"), Some("no issue")],
            &[None, None, None, Some(""), Some("need more access")],
        ]);
        let table = parse_workbook(&simple_workbook(&sheet)?)?;
        let records = normalize(&table)?;

        assert_eq!(records.len(), 3);
        let speakers: Vec<&str> = records.iter().map(|r| r.speaker.as_str()).collect();
        assert_eq!(speakers, vec!["Alice", "Bob", "Bob"]);
        assert!(records.iter().all(|r| r.topic == "Ops" && r.prompt == "How?"));
        assert_eq!(records[2].utterance, "need more access");
        Ok(())
    }
}
