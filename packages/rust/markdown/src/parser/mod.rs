//! Source document parsers.
//!
//! A parser is chosen by file extension ([`DocumentKind::from_path`]) and
//! turns a downloaded file into an [`Extracted`] triple of title,
//! description and body lines. Parsing never fails outward: any error is
//! logged and yields an empty [`Extracted`].

mod html;
mod word;

use std::path::Path;

use tracing::{debug, error, instrument};

use lawledger_shared::Result;

pub use word::Block;

/// Extensions the transform stage looks for, in lookup order.
pub const SOURCE_EXTENSIONS: &[&str] = &["docx", "doc", "html", "htm"];

/// Parser capability selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Html,
    Word,
}

impl DocumentKind {
    /// Look up the parser for an extension (without the dot, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Some(Self::Html),
            "docx" | "doc" => Some(Self::Word),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Word => "WORD",
        }
    }
}

/// Text pulled out of a source document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    /// Promulgation/amendment history, possibly multi-line.
    pub description: String,
    pub body: Vec<String>,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty() && self.body.is_empty()
    }
}

/// Parse `path` with the parser of `kind`, falling back to empty output on
/// any failure.
#[instrument(skip_all, fields(path = %path.display(), kind = kind.as_str()))]
pub fn parse(kind: DocumentKind, path: &Path, title_hint: &str) -> Extracted {
    let result = match kind {
        DocumentKind::Html => html::parse_file(path, title_hint),
        DocumentKind::Word => word::parse_file(path, title_hint),
    };
    match result {
        Ok(extracted) => {
            debug!(
                body_lines = extracted.body.len(),
                has_description = !extracted.description.is_empty(),
                "document parsed"
            );
            extracted
        }
        Err(e) => {
            error!(error = %e, "failed to parse document");
            Extracted::default()
        }
    }
}

/// Parse by extension; `None` when the extension has no parser.
pub fn parse_path(path: &Path, title_hint: &str) -> Option<Extracted> {
    DocumentKind::from_path(path).map(|kind| parse(kind, path, title_hint))
}

/// Parse HTML markup held in memory.
pub fn parse_html(markup: &str, title_hint: &str) -> Extracted {
    html::parse_markup(markup, title_hint)
}

/// Assemble already-extracted WORD blocks.
pub fn parse_word_blocks(blocks: &[Block], title_hint: &str) -> Extracted {
    word::assemble(blocks, title_hint)
}

/// Read the block sequence of a `.docx` file.
pub fn read_word_blocks(path: &Path) -> Result<Vec<Block>> {
    word::read_blocks(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(DocumentKind::from_extension("DOCX"), Some(DocumentKind::Word));
        assert_eq!(DocumentKind::from_extension("doc"), Some(DocumentKind::Word));
        assert_eq!(DocumentKind::from_extension("htm"), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::from_extension("pdf"), None);
        assert_eq!(
            DocumentKind::from_path(Path::new("laws/宪法/宪法.html")),
            Some(DocumentKind::Html)
        );
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn missing_file_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.docx");
        assert!(parse(DocumentKind::Word, &missing, "标题").is_empty());
        assert!(parse(DocumentKind::Html, &dir.path().join("nope.html"), "标题").is_empty());
    }

    #[test]
    fn corrupt_word_file_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.docx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert_eq!(parse(DocumentKind::Word, &path, "标题"), Extracted::default());
    }
}
