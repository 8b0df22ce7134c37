use std::path::Path;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::warn;

use lawledger_shared::{LawLedgerError, Result};

use super::Extracted;
use crate::patterns::COUNTRY_TITLE;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static CONTENT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.law-content").expect("valid selector"));
static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));

pub(super) fn parse_file(path: &Path, title_hint: &str) -> Result<Extracted> {
    let bytes = std::fs::read(path).map_err(|e| LawLedgerError::io(path, e))?;
    let markup = match String::from_utf8(bytes) {
        Ok(markup) => markup,
        Err(e) => {
            warn!(path = %path.display(), "HTML is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    Ok(parse_markup(&markup, title_hint))
}

/// Prefer the `div.law-content` container; otherwise every `<p>`.
pub(super) fn parse_markup(markup: &str, title_hint: &str) -> Extracted {
    let doc = Html::parse_document(markup);

    let mut title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_hint.trim().to_string());

    let paragraphs: Vec<String> = match doc.select(&CONTENT_SEL).next() {
        Some(container) => container
            .select(&PARAGRAPH_SEL)
            .map(|p| paragraph_text(&p))
            .collect(),
        None => doc.select(&PARAGRAPH_SEL).map(|p| paragraph_text(&p)).collect(),
    };

    // Paragraphs that only repeat a piece of the title are dropped.
    let mut lines: Vec<String> = paragraphs
        .into_iter()
        .filter(|text| !text.is_empty())
        .filter(|text| title.is_empty() || !(title.starts_with(text.as_str()) || title.ends_with(text.as_str())))
        .collect();

    if title.is_empty() && lines.first().is_some_and(|l| COUNTRY_TITLE.is_match(l)) {
        title = lines.remove(0);
    }

    let mut lines = lines.into_iter();
    let description = lines.next().unwrap_or_default();
    Extracted {
        title,
        description,
        body: lines.collect(),
    }
}

fn paragraph_text(p: &scraper::ElementRef) -> String {
    p.text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../fixtures/law.html");

    #[test]
    fn container_paragraphs_are_preferred() {
        let extracted = parse_markup(FIXTURE, "提示标题");
        assert_eq!(extracted.title, "中华人民共和国测试法");
        assert_eq!(extracted.description, "（2020年1月1日第十三届全国人民代表大会常务委员会第十五次会议通过）");
        assert_eq!(extracted.body[0], "目录");
        assert!(extracted.body.iter().all(|l| !l.contains("页脚")));
        assert!(extracted.body.iter().any(|l| l.starts_with("第一条") && l.ends_with("制定本法。")));
        assert_eq!(extracted.body.len(), 8);
    }

    #[test]
    fn title_fragments_are_dropped() {
        let markup = "<html><head><title>中华人民共和国某某法</title></head><body>\
            <p>中华人民共和国某某法</p><p>某某法</p><p>（2021年3月1日通过）</p><p>第一条 内容</p></body></html>";
        let extracted = parse_markup(markup, "");
        assert_eq!(extracted.description, "（2021年3月1日通过）");
        assert_eq!(extracted.body, vec!["第一条 内容"]);
    }

    #[test]
    fn leading_country_line_is_promoted_when_no_title() {
        let markup = "<body><p>中华人民共和国某某条例</p><p>（2021年3月1日通过）</p><p>第一条\u{a0}内容</p></body>";
        let extracted = parse_markup(markup, "");
        assert_eq!(extracted.title, "中华人民共和国某某条例");
        assert_eq!(extracted.body, vec!["第一条 内容"]);
    }

    #[test]
    fn hint_is_used_without_title_element() {
        let extracted = parse_markup("<p>正文第一段</p><p>正文第二段</p>", "提示标题");
        assert_eq!(extracted.title, "提示标题");
        assert_eq!(extracted.description, "正文第一段");
    }
}
