//! Structural patterns shared by the parsers and the formatter.

use std::sync::LazyLock;

use regex::Regex;

/// Character class of a Chinese or Arabic ordinal.
pub(crate) const NUMBER: &str = r"[一二三四五六七八九十零百千万\d]";

/// Section-start patterns that can open an indentation level, in heading
/// order. `{N}` stands for [`NUMBER`].
const INDENT_TEMPLATES: &[&str] = &[
    r"^序言",
    r"^第{N}+编",
    r"^第{N}+分编",
    r"^第{N}+章",
    r"^第{N}+节",
    r"^([一二三四五六七八九十零百千万]+、.{1,15})[^。；：]$",
];

const ARTICLE_TEMPLATE: &str = r"^第{N}+条";

fn expand(template: &str, number: &str) -> String {
    template.replace("{N}", number)
}

fn compile(source: &str) -> Regex {
    Regex::new(source).expect("valid regex")
}

/// Indentation patterns with the generic ordinal class.
pub(crate) static INDENT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INDENT_TEMPLATES
        .iter()
        .map(|t| compile(&expand(t, NUMBER)))
        .collect()
});

/// The same patterns pinned to the first ordinal (`第一章`, ...), index-aligned
/// with [`INDENT`].
pub(crate) static INDENT_FIRST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INDENT_TEMPLATES
        .iter()
        .map(|t| compile(&expand(t, "一")))
        .collect()
});

/// Every structural line start: indentation levels plus articles.
pub(crate) static LINE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INDENT_TEMPLATES
        .iter()
        .chain(std::iter::once(&ARTICLE_TEMPLATE))
        .map(|t| compile(&expand(t, NUMBER)))
        .collect()
});

/// First-of-kind structural start (excluding sections), used to close a
/// table of contents when no explicit pattern was established.
pub(crate) static LINE_START: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives: Vec<String> = INDENT_TEMPLATES
        .iter()
        .chain(std::iter::once(&ARTICLE_TEMPLATE))
        .filter(|t| !t.contains('节'))
        .map(|t| format!("({})", expand(t, "一")))
        .collect();
    compile(&format!("^({})", alternatives.join("|")))
});

pub(crate) static TOC: LazyLock<Regex> = LazyLock::new(|| compile(r"^目.*录"));
pub(crate) static TOC_ANYWHERE: LazyLock<Regex> = LazyLock::new(|| compile(r"目.*录"));
pub(crate) static ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"^公\s*告"));
pub(crate) const INTERPRETATION_MARKER: &str = "法释";

/// Leading article/chapter marker with any trailing whitespace.
pub(crate) static MARKER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(r"^(第{NUMBER}{{1,6}}[条章节篇](?:之{NUMBER}{{1,2}})*)\s*"))
});

/// Heading prefix per structural level, first match wins.
pub(crate) static HEADINGS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (compile(r"^序言"), "#### "),
        (compile(&expand(r"^第{N}+编", NUMBER)), "## "),
        (compile(&expand(r"^第{N}+分编", NUMBER)), "### "),
        (compile(&expand(r"^第{N}+章", NUMBER)), "#### "),
        (compile(&expand(r"^第{N}+节", NUMBER)), "##### "),
        (compile(&expand(ARTICLE_TEMPLATE, NUMBER)), "###### "),
    ]
});

/// Index of the article entry in [`HEADINGS`].
pub(crate) const ARTICLE_HEADING: usize = 5;

pub(crate) static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));
pub(crate) static DATE: LazyLock<Regex> = LazyLock::new(|| compile(r"\d{4}年\d{1,2}月\d{1,2}日"));
/// Parenthesized date that opens a WORD description block.
pub(crate) static DESCRIPTION_START: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[（(]\d{4}年\d{1,2}月\d{1,2}日"));
pub(crate) static CLOSING_PAREN: LazyLock<Regex> = LazyLock::new(|| compile(r"[）)]$"));
pub(crate) static COUNTRY_TITLE: LazyLock<Regex> = LazyLock::new(|| compile(r"^中华人民共和国"));

/// Whether `line` starts any structural section.
pub(crate) fn is_structural_start(line: &str) -> bool {
    LINE.iter().any(|re| re.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_start_matches_first_of_kind_only() {
        assert!(LINE_START.is_match("第一章 总则"));
        assert!(LINE_START.is_match("第一条 为了"));
        assert!(LINE_START.is_match("序言"));
        assert!(!LINE_START.is_match("第二章 附则"));
        assert!(!LINE_START.is_match("第一节 一般规定"));
    }

    #[test]
    fn indent_first_is_aligned_with_indent() {
        let idx = INDENT.iter().position(|re| re.is_match("第三章 责任")).unwrap();
        assert!(INDENT_FIRST[idx].is_match("第一章 总则"));
        assert!(!INDENT_FIRST[idx].is_match("第三章 责任"));
    }

    #[test]
    fn part_does_not_match_sub_part() {
        assert!(!HEADINGS[1].0.is_match("第一分编 通则"));
        assert!(HEADINGS[2].0.is_match("第一分编 通则"));
    }

    #[test]
    fn structural_starts() {
        assert!(is_structural_start("第十二条 本法自公布之日起施行。"));
        assert!(is_structural_start("一、总体要求"));
        assert!(!is_structural_start("一、本条所称的国家机关是指依法设立的机构。"));
        assert!(!is_structural_start("为了规范管理，制定本法。"));
    }
}
