//! DOCX/DOCM text extraction.
//!
//! Unpacks the zip container and walks `word/document.xml` directly: body
//! paragraphs and tables are interleaved in document order, runs inside a
//! paragraph are concatenated, table rows render as pipe-delimited lines.
//! The VBA payload of a DOCM (`word/vbaProject.bin`) is never opened.

use crate::{ExtractError, Result};
use std::io::{Cursor, Read};

pub(crate) fn extract_docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::failed(format!("not a zip container: {e}")))?;
    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::failed(format!("missing word/document.xml: {e}")))?;
    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::failed(format!("reading word/document.xml: {e}")))?;
    Ok(walk_document_xml(&xml))
}

/// Streaming walk of the WordprocessingML body. Hand-rolled: the subset of
/// tags we care about is tiny and fixed, and document order must be kept.
fn walk_document_xml(xml: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_cell = false;

    let bytes = xml.as_bytes();
    let mut pos = 0usize;
    while let Some(open_rel) = xml[pos..].find('<') {
        let open = pos + open_rel;
        let Some(close_rel) = xml[open..].find('>') else {
            break;
        };
        let close = open + close_rel;
        let tag_body = &xml[open + 1..close];
        let self_closing = tag_body.ends_with('/');
        let (closing, name) = match tag_body.strip_prefix('/') {
            Some(rest) => (true, tag_name(rest)),
            None => (false, tag_name(tag_body)),
        };

        match (closing, name) {
            (false, "w:t") if !self_closing => {
                // Run text is everything up to the next tag.
                let text_start = close + 1;
                let text_end = xml[text_start..]
                    .find('<')
                    .map(|i| text_start + i)
                    .unwrap_or(bytes.len());
                let run = decode_entities(&xml[text_start..text_end]);
                if in_cell {
                    cell.push_str(&run);
                } else {
                    para.push_str(&run);
                }
                pos = text_end;
                continue;
            }
            (false, "w:br") | (false, "w:cr") => {
                if in_cell {
                    cell.push(' ');
                } else {
                    para.push('\n');
                }
            }
            (false, "w:tab") => {
                if in_cell {
                    cell.push(' ');
                } else {
                    para.push(' ');
                }
            }
            (true, "w:p") => {
                if in_cell {
                    // Paragraphs inside a table cell collapse into the
                    // cell text.
                    if !cell.is_empty() && !cell.ends_with(' ') {
                        cell.push(' ');
                    }
                } else {
                    blocks.push(std::mem::take(&mut para));
                }
            }
            (false, "w:tc") => {
                in_cell = true;
                cell.clear();
            }
            (true, "w:tc") => {
                row.push(cell.trim().to_string());
                in_cell = false;
            }
            (true, "w:tr") => {
                blocks.push(row.join(" | "));
                row.clear();
            }
            _ => {}
        }
        pos = close + 1;
    }

    blocks.join("\n")
}

/// Tag name without attributes or the self-closing slash.
fn tag_name(tag_body: &str) -> &str {
    tag_body
        .split([' ', '\t', '\n', '/'])
        .next()
        .unwrap_or(tag_body)
}

/// Decode the XML builtin entities plus numeric character references.
fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            out.push_str(rest);
            return out;
        };
        let entity = &rest[1..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let decoded = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32);
                match decoded {
                    Some(c) => out.push(c),
                    // Unknown entity: keep it verbatim rather than drop text.
                    None => out.push_str(&rest[..=semi]),
                }
            }
        }
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            write!(
                writer,
                r#"<?xml version="1.0"?><w:document><w:body>{body_xml}</w:body></w:document>"#
            )
            .unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_paragraph_runs_are_concatenated() {
        let body = "<w:p><w:r><w:t>5. Price: US$ </w:t></w:r><w:r><w:t>335/MT</w:t></w:r></w:p>";
        let text = extract_docx_text(&docx_with_body(body)).unwrap();
        assert_eq!(text, "5. Price: US$ 335/MT");
    }

    #[test]
    fn test_table_rows_render_pipe_delimited() {
        let body = concat!(
            "<w:p><w:r><w:t>Specs:</w:t></w:r></w:p>",
            "<w:tbl>",
            "<w:tr><w:tc><w:p><w:r><w:t>Purity</w:t></w:r></w:p></w:tc>",
            "<w:tc><w:p><w:r><w:t>99.5%</w:t></w:r></w:p></w:tc></w:tr>",
            "<w:tr><w:tc><w:p><w:r><w:t>Water</w:t></w:r></w:p></w:tc>",
            "<w:tc><w:p><w:r><w:t>0.5% max</w:t></w:r></w:p></w:tc></w:tr>",
            "</w:tbl>",
            "<w:p><w:r><w:t>After table</w:t></w:r></w:p>",
        );
        let text = extract_docx_text(&docx_with_body(body)).unwrap();
        assert_eq!(
            text,
            "Specs:\nPurity | 99.5%\nWater | 0.5% max\nAfter table"
        );
    }

    #[test]
    fn test_breaks_and_tabs_inside_paragraph() {
        let body = "<w:p><w:r><w:t>line one</w:t><w:br/><w:t>line</w:t><w:tab/><w:t>two</w:t></w:r></w:p>";
        let text = extract_docx_text(&docx_with_body(body)).unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn test_entities_are_decoded() {
        let body = "<w:p><w:r><w:t>Smith &amp; Co &lt;FOB&gt; &#8220;quoted&#8221;</w:t></w:r></w:p>";
        let text = extract_docx_text(&docx_with_body(body)).unwrap();
        assert_eq!(text, "Smith & Co <FOB> \u{201c}quoted\u{201d}");
    }

    #[test]
    fn test_not_a_zip_is_extract_failed() {
        let err = extract_docx_text(b"plainly not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::ExtractFailed { .. }));
    }

    #[test]
    fn test_zip_without_document_xml_is_extract_failed() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("word/other.xml", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }
        let err = extract_docx_text(&buf.into_inner()).unwrap_err();
        assert!(matches!(err, ExtractError::ExtractFailed { .. }));
    }
}
