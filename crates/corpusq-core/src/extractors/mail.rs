//! Mail extraction (§4.2): EML via a MIME parser with recursive
//! attachment extraction, MSG via a best-effort binary text scan (no
//! OLE/CFB parser is pulled in — see the module-level note below).

use super::extract_bytes;

/// Builds the normalized header block the chunker expects to see
/// prepended to the body (§4.3 "the normalized header block is
/// prepended to the body before chunking").
fn header_block(subject: &str, from: &str, to: &str, date: &str) -> String {
    format!("Subject: {subject}\nFrom: {from}\nTo: {to}\nDate: {date}\n\n")
}

/// EML: parses with `mail-parser`, recursing into attachments whose
/// filename extension is itself extractable (§4.2 "EML identical [to
/// MSG] plus recursive attachment extraction where supported").
pub fn extract_eml(bytes: &[u8]) -> String {
    let message = match mail_parser::MessageParser::default().parse(bytes) {
        Some(m) => m,
        None => return String::new(),
    };

    let subject = message.subject().unwrap_or_default();
    let from = message
        .from()
        .and_then(|a| a.first())
        .map(|a| a.address().unwrap_or_default().to_string())
        .unwrap_or_default();
    let to = message
        .to()
        .and_then(|a| a.first())
        .map(|a| a.address().unwrap_or_default().to_string())
        .unwrap_or_default();
    let date = message
        .date()
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();

    let body = message
        .body_text(0)
        .map(|b| b.to_string())
        .unwrap_or_default();

    let mut out = header_block(subject, &from, &to, &date);
    out.push_str(&body);

    for attachment in message.attachments() {
        let name = attachment.attachment_name().unwrap_or_default();
        let contents = attachment.contents();
        if contents.is_empty() {
            continue;
        }
        let inner_text = extract_bytes(contents, name);
        if !inner_text.is_empty() {
            out.push_str("\n\n---\nAttachment: ");
            out.push_str(name);
            out.push('\n');
            out.push_str(&inner_text);
        }
    }

    out
}

/// MSG: Outlook's compound-binary format stores most string properties
/// as UTF-16LE runs inside unnamed OLE streams. Rather than pull in a
/// CFB/OLE parser for this one format, this scans the raw bytes for
/// printable UTF-16LE runs and reassembles a best-effort body — no
/// structured `Subject`/`From`/`To` split, since that requires walking
/// the compound file's directory entries by property tag. Returns
/// empty on a file with no recognizable text runs.
pub fn extract_msg(bytes: &[u8]) -> String {
    let runs = utf16le_text_runs(bytes, 4);
    if runs.is_empty() {
        return String::new();
    }
    runs.join("\n")
}

fn utf16le_text_runs(bytes: &[u8], min_chars: usize) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<u16> = Vec::new();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        let unit = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let is_printable = (0x20..0x7F).contains(&unit) || unit == 0x09;
        if is_printable {
            current.push(unit);
        } else if !current.is_empty() {
            if current.len() >= min_chars {
                if let Ok(s) = String::from_utf16(&current) {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        runs.push(trimmed.to_string());
                    }
                }
            }
            current.clear();
        }
        i += 2;
    }
    if current.len() >= min_chars {
        if let Ok(s) = String::from_utf16(&current) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                runs.push(trimmed.to_string());
            }
        }
    }
    runs
}
