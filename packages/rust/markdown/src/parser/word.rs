use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use lawledger_shared::{LawLedgerError, Result};

use super::Extracted;
use crate::patterns::{
    CLOSING_PAREN, COUNTRY_TITLE, DESCRIPTION_START, TOC_ANYWHERE, is_structural_start,
};

pub(crate) const TABLE_START: &str = "<!-- TABLE -->";
pub(crate) const TABLE_END: &str = "<!-- TABLE END -->";

/// A top-level block of a WORD document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    /// Rows of cell texts.
    Table(Vec<Vec<String>>),
}

pub(super) fn parse_file(path: &Path, title_hint: &str) -> Result<Extracted> {
    let blocks = read_blocks(path)?;
    Ok(assemble(&blocks, title_hint))
}

pub(super) fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    let file = File::open(path).map_err(|e| LawLedgerError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| LawLedgerError::parse(format!("{}: not a WORD archive: {e}", path.display())))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| LawLedgerError::parse(format!("{}: missing document part: {e}", path.display())))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| LawLedgerError::io(path, e))?;
    blocks_from_xml(&xml)
}

/// Walk `w:body` in document order. Text boxes and nested tables are not
/// part of the enclosing block's text.
pub(crate) fn blocks_from_xml(xml: &str) -> Result<Vec<Block>> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();

    let mut in_body = false;
    let mut in_text = false;
    let mut para_depth = 0usize;
    let mut table_depth = 0usize;
    let mut para = String::new();
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| LawLedgerError::parse(format!("document.xml: {e}")))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"body" => in_body = true,
                b"tbl" if in_body => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                b"p" if in_body => {
                    para_depth += 1;
                    if para_depth == 1 {
                        para.clear();
                    }
                }
                b"t" if para_depth == 1 => in_text = true,
                _ => {}
            },
            Event::Empty(e) if para_depth == 1 => match e.local_name().as_ref() {
                b"tab" => para.push('\t'),
                b"br" | b"cr" => para.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| LawLedgerError::parse(format!("document.xml: {e}")))?;
                para.push_str(&text);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if para_depth > 0 => {
                    para_depth -= 1;
                    if para_depth == 0 {
                        let text = std::mem::take(&mut para);
                        match table_depth {
                            0 => blocks.push(Block::Paragraph(text)),
                            1 => cell.push(text.trim().to_string()),
                            _ => {}
                        }
                    }
                }
                b"tc" if table_depth == 1 => row.push(cell.join("\n").trim().to_string()),
                b"tr" if table_depth == 1 => table.push(std::mem::take(&mut row)),
                b"tbl" if table_depth > 0 => {
                    if table_depth == 1 {
                        blocks.push(Block::Table(std::mem::take(&mut table)));
                    }
                    table_depth -= 1;
                }
                b"body" => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(blocks)
}

/// Turn blocks into title, description and body.
///
/// A paragraph opening with a parenthesized date starts the description,
/// which runs until a paragraph closes the parenthesis, mentions a table of
/// contents or starts a structural section. The leading country-prefixed
/// title line is only dropped when it is the very first block.
pub(crate) fn assemble(blocks: &[Block], title_hint: &str) -> Extracted {
    let mut body: Vec<String> = Vec::new();
    let mut description: Vec<String> = Vec::new();
    let mut in_description = false;

    for (idx, block) in blocks.iter().enumerate() {
        match block {
            Block::Table(rows) => {
                body.push(TABLE_START.to_string());
                if let Some((header, rest)) = rows.split_first() {
                    body.push(table_row(header));
                    body.push(format!("|{}|", vec!["-----"; header.len()].join("|")));
                    body.extend(rest.iter().map(|r| table_row(r)));
                }
                body.push(TABLE_END.to_string());
            }
            Block::Paragraph(raw) => {
                let text = raw.trim();
                if text.is_empty() {
                    continue;
                }

                if DESCRIPTION_START.is_match(text) {
                    in_description = true;
                }

                if in_description {
                    description.push(text.to_string());
                } else if idx > 0 || !COUNTRY_TITLE.is_match(text) {
                    body.push(text.to_string());
                }

                if in_description
                    && (CLOSING_PAREN.is_match(text)
                        || TOC_ANYWHERE.is_match(text)
                        || is_structural_start(text))
                {
                    in_description = false;
                }
            }
        }
    }

    Extracted {
        title: title_hint.to_string(),
        description: description.join("\n").trim().to_string(),
        body,
    }
}

fn table_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}
