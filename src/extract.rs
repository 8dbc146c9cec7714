//! Multi-format text extraction for raw documents.
//!
//! Connectors supply bytes + a MIME type; this module returns ordered
//! [`TextBlock`]s with page/section metadata so the chunker can respect
//! structural breaks. Extraction of native formats is a pure function of
//! the input bytes; raster images are delegated to the configured
//! [`OcrEngine`].

use std::io::Read;

use ragline_core::error::{PipelineError, Result};
use ragline_core::models::TextBlock;

use crate::ocr::OcrEngine;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_HTML: &str = "text/html";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_TIFF: &str = "image/tiff";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Line width used when rendering HTML to text. Wrapping is harmless:
/// the chunker re-tokenizes on whitespace.
const HTML_RENDER_WIDTH: usize = 120;

/// Extract ordered text blocks from raw document bytes.
///
/// Fails with [`PipelineError::UnsupportedFormat`] for unrecognized MIME
/// types and [`PipelineError::CorruptInput`] when the bytes cannot be
/// decoded as the claimed format.
pub async fn parse(
    bytes: &[u8],
    mime_type: &str,
    ocr: &dyn OcrEngine,
) -> Result<Vec<TextBlock>> {
    match mime_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_HTML => extract_html(bytes),
        MIME_MARKDOWN => extract_markdown(bytes),
        MIME_TEXT => {
            let text = decode_utf8(bytes, MIME_TEXT)?;
            Ok(paragraph_blocks(&text, None, None))
        }
        MIME_PNG | MIME_JPEG | MIME_TIFF => {
            let text = ocr.recognize(bytes, mime_type).await?;
            Ok(paragraph_blocks(&text, None, None))
        }
        other => Err(PipelineError::UnsupportedFormat {
            mime_type: other.to_string(),
        }),
    }
}

fn decode_utf8(bytes: &[u8], mime_type: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| PipelineError::CorruptInput {
        mime_type: mime_type.to_string(),
        detail: e.to_string(),
    })
}

/// Split plain text into paragraph blocks on blank lines.
fn paragraph_blocks(text: &str, page: Option<u32>, section: Option<&str>) -> Vec<TextBlock> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| TextBlock {
            text: p.to_string(),
            page,
            section: section.map(|s| s.to_string()),
        })
        .collect()
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<TextBlock>> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| PipelineError::CorruptInput {
            mime_type: MIME_PDF.to_string(),
            detail: e.to_string(),
        })?;

    // pdf-extract separates pages with form feeds when the document has
    // more than one.
    let mut blocks = Vec::new();
    for (i, page_text) in text.split('\u{c}').enumerate() {
        blocks.extend(paragraph_blocks(page_text, Some(i as u32 + 1), None));
    }
    Ok(blocks)
}

fn extract_html(bytes: &[u8]) -> Result<Vec<TextBlock>> {
    let text = html2text::from_read(bytes, HTML_RENDER_WIDTH);
    Ok(paragraph_blocks(&text, None, None))
}

/// Markdown keeps its paragraph structure; `#` headings open a section
/// recorded on every following block.
fn extract_markdown(bytes: &[u8]) -> Result<Vec<TextBlock>> {
    let text = decode_utf8(bytes, MIME_MARKDOWN)?;
    let mut blocks = Vec::new();
    let mut section: Option<String> = None;

    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(heading) = trimmed.lines().next().filter(|l| l.starts_with('#')) {
            section = Some(heading.trim_start_matches('#').trim().to_string());
        }
        blocks.push(TextBlock {
            text: trimmed.to_string(),
            page: None,
            section: section.clone(),
        });
    }
    Ok(blocks)
}

fn ooxml_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::CorruptInput {
        mime_type: MIME_DOCX.to_string(),
        detail: e.to_string(),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<TextBlock>> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;

    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(ooxml_err)?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(ooxml_err)?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ooxml_err("word/document.xml exceeds size limit"));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ooxml_err("word/document.xml not found"));
    }

    extract_docx_paragraphs(&doc_xml)
}

/// Walk `w:p` paragraph elements, collecting their `w:t` runs; each
/// paragraph becomes one block.
fn extract_docx_paragraphs(xml: &[u8]) -> Result<Vec<TextBlock>> {
    let mut blocks = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut paragraph = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        paragraph.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    let trimmed = paragraph.trim();
                    if !trimmed.is_empty() {
                        blocks.push(TextBlock::new(trimmed));
                    }
                    paragraph.clear();
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    // Flush text that never saw a closing w:p.
    let trimmed = paragraph.trim();
    if !trimmed.is_empty() {
        blocks.push(TextBlock::new(trimmed));
    }
    Ok(blocks)
}
