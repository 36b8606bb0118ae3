//! PDF extraction (§4.2): per-page text in reading order, via the
//! content-stream walker in [`crate::processing::lopdf_parser`].

use crate::processing::lopdf_parser::LoPdfParser;

pub fn extract_pdf(bytes: &[u8]) -> String {
    match LoPdfParser::parse_bytes(bytes) {
        Ok(doc) => doc.full_text(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_pdf_yields_empty_string() {
        assert_eq!(extract_pdf(b"not a pdf"), "");
    }
}
