//! Last-resort DOCX to PDF rendering: paragraph text laid out as plain lines.
//!
//! Used only when no office suite is available. Styling, images and page
//! layout of the source document are dropped.

use std::path::Path;

use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

// US Letter, in points.
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 40.0;
const FONT_SIZE: f32 = 10.0;
const LINE_HEIGHT: f32 = 12.0;
const MAX_LINE_CHARS: usize = 100;

pub fn render_docx_file(source: &Path, target: &Path) -> Result<()> {
    let is_docx = source
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("docx"))
        .unwrap_or(false);
    if !is_docx {
        anyhow::bail!("only .docx files are supported, legacy .doc needs an office suite");
    }

    let bytes = std::fs::read(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let paragraphs = docx_paragraphs(&bytes)?;

    let lines: Vec<String> = paragraphs
        .iter()
        .flat_map(|p| wrap_line(p, MAX_LINE_CHARS))
        .collect();

    let pdf = render_lines(&lines)?;
    std::fs::write(target, pdf).with_context(|| format!("Failed to write {}", target.display()))
}

/// Paragraph texts in document order. Table rows become one line each.
pub fn docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>> {
    let doc = docx_rs::read_docx(bytes).map_err(|e| anyhow::anyhow!("Failed to read DOCX: {e}"))?;

    let mut out = Vec::new();
    for child in doc.document.children.iter() {
        match child {
            docx_rs::DocumentChild::Paragraph(p) => out.push(paragraph_text(p)),
            docx_rs::DocumentChild::Table(table) => {
                for row in &table.rows {
                    let docx_rs::TableChild::TableRow(tr) = row;
                    let mut cells = Vec::new();
                    for cell in &tr.cells {
                        let docx_rs::TableRowChild::TableCell(tc) = cell;
                        for content in &tc.children {
                            if let docx_rs::TableCellContent::Paragraph(p) = content {
                                cells.push(paragraph_text(p));
                            }
                        }
                    }
                    out.push(cells.join("    "));
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn paragraph_text(p: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &p.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for rc in &run.children {
                match rc {
                    docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                    docx_rs::RunChild::Tab(_) => text.push_str("    "),
                    _ => {}
                }
            }
        }
    }
    text
}

/// Greedy word wrap. Words longer than `width` are hard-split.
/// An empty paragraph yields one empty line so vertical spacing survives.
pub fn wrap_line(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn lines_per_page() -> usize {
    ((PAGE_HEIGHT - 2.0 * MARGIN) / LINE_HEIGHT) as usize
}

/// Lays out `lines` top to bottom in Helvetica, breaking pages as needed.
pub fn render_lines(lines: &[String]) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let blank = [String::new()];
    let lines = if lines.is_empty() { &blank[..] } else { lines };

    let mut kids: Vec<Object> = Vec::new();
    for page_lines in lines.chunks(lines_per_page()) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
            Operation::new("TL", vec![LINE_HEIGHT.into()]),
            Operation::new("Td", vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()]),
        ];
        for line in page_lines {
            operations.push(Operation::new("Tj", vec![Object::string_literal(latin1(line))]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("Failed to encode page content")?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    let media_box: Vec<Object> = vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()];
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count,
        "Resources" => resources_id,
        "MediaBox" => media_box,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buf = Vec::new();
    doc.save_to(&mut buf).context("Failed to serialize PDF")?;
    Ok(buf)
}

/// The standard Helvetica font only covers Latin-1; anything else prints as `?`.
fn latin1(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            _ if c.is_whitespace() => b' ',
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn docx_with(paragraphs: &[&str]) -> Vec<u8> {
        let mut docx = docx_rs::Docx::new();
        for text in paragraphs {
            docx = docx.add_paragraph(
                docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*text)),
            );
        }
        let mut cursor = Cursor::new(Vec::new());
        docx.build().pack(&mut cursor).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_wrap_line() {
        assert_eq!(wrap_line("", 10), vec![String::new()]);
        assert_eq!(wrap_line("hello world", 20), vec!["hello world"]);
        assert_eq!(wrap_line("hello big world", 9), vec!["hello big", "world"]);
        assert_eq!(wrap_line("abcdefghijkl", 5), vec!["abcde", "fghij", "kl"]);
    }

    #[test]
    fn test_latin1_replaces_unsupported_chars() {
        assert_eq!(latin1("café"), b"caf\xe9".to_vec());
        assert_eq!(latin1("a\u{4e2d}b\tc"), b"a?b c".to_vec());
    }

    #[test]
    fn test_render_lines_paginates() {
        let lines: Vec<String> = (0..lines_per_page() + 1).map(|i| format!("line {i}")).collect();
        let pdf = render_lines(&lines).unwrap();

        assert!(pdf.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_render_empty_document_has_one_page() {
        let pdf = render_lines(&[]).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_docx_paragraphs() {
        let bytes = docx_with(&["First paragraph", "", "Third one"]);
        let paragraphs = docx_paragraphs(&bytes).unwrap();
        assert_eq!(paragraphs, vec!["First paragraph", "", "Third one"]);
    }

    #[test]
    fn test_render_docx_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("letter.docx");
        let target = dir.path().join("letter.pdf");
        std::fs::write(&source, docx_with(&["Dear reader,", "Kind regards"])).unwrap();

        render_docx_file(&source, &target).unwrap();

        let pdf = std::fs::read(&target).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_rejects_legacy_doc_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("old.doc");
        std::fs::write(&doc, b"\xd0\xcf\x11\xe0").unwrap();
        assert!(render_docx_file(&doc, &dir.path().join("old.pdf")).is_err());

        let garbage = dir.path().join("fake.docx");
        std::fs::write(&garbage, b"not a zip").unwrap();
        assert!(render_docx_file(&garbage, &dir.path().join("fake.pdf")).is_err());
    }
}
