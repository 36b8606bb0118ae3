//! OOXML (DOCX/PPTX/XLSX) text extraction via `quick-xml` event parsing
//! directly over the zip members, rather than a full document-object
//! model (§4.2).

use std::io::Read;

const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut out = Vec::new();
    entry.by_ref().take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out).ok()?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return None;
    }
    Some(out)
}

/// DOCX: body paragraphs in document order, plus tables serialized
/// row-wise with `|` separators (§4.2). Best-effort: any malformed
/// member yields an empty string rather than propagating an error.
pub fn extract_docx(bytes: &[u8]) -> String {
    extract_docx_inner(bytes).unwrap_or_default()
}

fn extract_docx_inner(bytes: &[u8]) -> Option<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).ok()?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    Some(extract_docx_body(&xml))
}

/// Walks the body, emitting paragraph text line-by-line and table rows
/// joined with `|`. Tracks nesting depth of `w:tbl`/`w:tr`/`w:tc` via a
/// simple stack since quick-xml's event stream is flat.
fn extract_docx_body(xml: &[u8]) -> String {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut in_table = false;
    let mut row_cells: Vec<String> = Vec::new();
    let mut cur_cell = String::new();
    let mut para_text = String::new();
    let mut in_cell = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        let text = te.unescape().unwrap_or_default();
                        if in_cell {
                            cur_cell.push_str(&text);
                        } else {
                            para_text.push_str(&text);
                        }
                    }
                }
                b"tbl" => in_table = true,
                b"tr" => row_cells.clear(),
                b"tc" => {
                    in_cell = true;
                    cur_cell.clear();
                }
                b"p" if !in_table => para_text.clear(),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"tc" => {
                    in_cell = false;
                    row_cells.push(std::mem::take(&mut cur_cell));
                }
                b"tr" => {
                    if !row_cells.is_empty() {
                        out.push_str(&row_cells.join(" | "));
                        out.push('\n');
                    }
                }
                b"tbl" => in_table = false,
                b"p" if !in_table => {
                    if !para_text.is_empty() {
                        out.push_str(&para_text);
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

/// PPTX: per-slide text with a `Slide N` header line, slides in numeric
/// order (§4.2).
pub fn extract_pptx(bytes: &[u8]) -> String {
    extract_pptx_inner(bytes).unwrap_or_default()
}

fn extract_pptx_inner(bytes: &[u8]) -> Option<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).ok()?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for (idx, name) in slide_names.iter().enumerate() {
        let xml = match read_zip_entry_bounded(&mut archive, name) {
            Some(x) => x,
            None => continue,
        };
        let text = extract_a_t_elements(&xml);
        out.push_str(&format!("Slide {}\n", idx + 1));
        out.push_str(&text);
        out.push_str("\n\n");
    }
    Some(out)
}

fn extract_a_t_elements(xml: &[u8]) -> String {
    use quick_xml::events::Event;
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                    out.push(' ');
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

/// XLSX: per-sheet CSV-ized rows, sheets in workbook order (§4.2).
pub fn extract_xlsx(bytes: &[u8]) -> String {
    extract_xlsx_inner(bytes).unwrap_or_default()
}

fn extract_xlsx_inner(bytes: &[u8]) -> Option<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).ok()?;
    let shared_strings = read_shared_strings(&mut archive).unwrap_or_default();
    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = match read_zip_entry_bounded(&mut archive, &name) {
            Some(x) => x,
            None => continue,
        };
        out.push_str(&extract_xlsx_sheet_csv(&xml, &shared_strings));
        out.push('\n');
    }
    Some(out)
}

fn read_shared_strings(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Option<Vec<String>> {
    use quick_xml::events::Event;
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut cur = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"si" => {
                in_si = true;
                cur.clear();
            }
            Ok(Event::Text(te)) if in_si => {
                cur.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"si" => {
                in_si = false;
                strings.push(std::mem::take(&mut cur));
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    Some(strings)
}

/// Each `<row>` becomes one CSV line; cells are emitted in document
/// order with empty gaps for skipped columns collapsed (column
/// alignment is not reconstructed — only row/cell order is preserved).
fn extract_xlsx_sheet_csv(xml: &[u8], shared_strings: &[String]) -> String {
    use quick_xml::events::Event;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut out = String::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared = false;
    let mut cell_count = 0usize;
    let mut v_text = String::new();

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row_cells.clear(),
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => {
                    in_v = true;
                    v_text.clear();
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_v => {
                v_text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => {
                    in_v = false;
                    let resolved = if cell_is_shared {
                        v_text
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default()
                    } else {
                        v_text.clone()
                    };
                    row_cells.push(resolved);
                    cell_count += 1;
                }
                b"row" => {
                    out.push_str(&row_cells.join(","));
                    out.push('\n');
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}
