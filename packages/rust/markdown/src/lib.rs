//! Law document parsing and markdown formatting.
//!
//! - [`parser`]: HTML and WORD extraction into title, description and body
//! - [`formatter`]: table-of-contents filtering, heading levels and the
//!   description bullet list

pub mod formatter;
pub mod parser;
mod patterns;

pub use formatter::{INFO_END, format_markdown, render};
pub use parser::{
    Block, DocumentKind, Extracted, SOURCE_EXTENSIONS, parse, parse_html, parse_path,
    parse_word_blocks, read_word_blocks,
};

/// Parse and format in one step; `None` when nothing usable was extracted.
pub fn convert(extracted: &Extracted) -> Option<String> {
    if extracted.title.is_empty() {
        return None;
    }
    let blocks = format_markdown(&extracted.title, &extracted.description, &extracted.body);
    (!blocks.is_empty()).then(|| render(&blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_fixture_end_to_end() {
        let extracted = parse_html(include_str!("../fixtures/law.html"), "");
        let markdown = convert(&extracted).unwrap();
        assert!(markdown.starts_with("# 中华人民共和国测试法\n\n- 2020年1月1日"));
        assert!(markdown.contains(INFO_END));
        assert!(markdown.contains("#### 第一章 总则\n\n###### 第一条\n\n为了测试，制定本法。"));
        assert!(!markdown.contains("目录"));
        assert_eq!(markdown.matches("#### 第一章 总则").count(), 1);
    }

    #[test]
    fn untitled_extraction_is_not_converted() {
        assert!(convert(&Extracted::default()).is_none());
    }
}
