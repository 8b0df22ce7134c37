//! Markdown rendering of extracted law text.
//!
//! The body passes through a small state machine that drops tables of
//! contents and announcement preambles, then each surviving line is mapped
//! to a heading level by its structural marker. Output is a list of blocks
//! joined with one blank line by [`render`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::patterns::{
    ANNOUNCEMENT, ARTICLE_HEADING, DATE, HEADINGS, INDENT, INDENT_FIRST, INTERPRETATION_MARKER,
    LINE_START, MARKER_PREFIX, TOC, WHITESPACE,
};

/// Separates the title/description header from the body.
pub const INFO_END: &str = "<!-- INFO END -->";

/// Lines after this index can no longer open an announcement block.
const ANNOUNCEMENT_WINDOW: usize = 40;

// ---------------------------------------------------------------------------
// Body filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    InMenu,
}

/// How a table of contents ends.
#[derive(Debug, Default)]
struct MenuExit {
    /// The first menu entry, verbatim.
    first_entry: Option<String>,
    /// First-of-kind pattern matching the first menu entry.
    pattern: Option<usize>,
}

impl MenuExit {
    fn closes(&self, line: &str) -> bool {
        if self.first_entry.as_deref() == Some(line) {
            return true;
        }
        match self.pattern {
            Some(idx) => INDENT_FIRST[idx].is_match(line),
            None => LINE_START.is_match(line),
        }
    }
}

fn collapse_whitespace(line: &str) -> String {
    WHITESPACE.replace_all(&line.replace('\u{3000}', " "), " ").into_owned()
}

/// Normalize a leading `第…条/章/节/篇` marker to exactly one trailing space.
fn normalize_marker(line: &str) -> String {
    let line = line.trim();
    match MARKER_PREFIX.captures(line) {
        Some(caps) => {
            let whole = &caps[0];
            let rest = &line[whole.len()..];
            format!("{} {rest}", whole.trim()).trim_end().to_string()
        }
        None => line.to_string(),
    }
}

/// Drop table-of-contents and announcement lines; normalize the rest.
pub(crate) fn filter_content(lines: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut state = State::Normal;
    let mut menu_line: Option<usize> = None;
    let mut exit = MenuExit::default();
    let mut skip = false;

    for (i, raw) in lines.iter().enumerate() {
        let line = collapse_whitespace(raw);

        // The line right after the TOC marker fixes the exit pattern.
        if menu_line.is_some_and(|m| i == m + 1) {
            exit = MenuExit {
                pattern: INDENT.iter().position(|re| re.is_match(&line)),
                first_entry: Some(line),
            };
            continue;
        }

        if TOC.is_match(&line) {
            state = State::InMenu;
            menu_line = Some(i);
            continue;
        }

        if state == State::InMenu && exit.closes(&line) {
            state = State::Normal;
        }

        if i < ANNOUNCEMENT_WINDOW && ANNOUNCEMENT.is_match(&line) {
            skip = true;
        }

        if state == State::Normal && !skip {
            let normalized = normalize_marker(&line);
            if !normalized.is_empty() {
                out.push(normalized);
            }
        }

        if skip && line.starts_with(INTERPRETATION_MARKER) {
            skip = false;
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

static SPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \x{3000}]+").expect("valid regex"));

/// Split `text` before every offset in `starts`.
fn split_before(text: &str, starts: impl Iterator<Item = usize>) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for start in starts {
        if start > last {
            parts.push(&text[last..start]);
            last = start;
        }
    }
    parts.push(&text[last..]);
    parts
}

/// Turn the promulgation history into bullet lines.
pub(crate) fn filter_description(description: &str) -> Vec<String> {
    let mut desc = description.trim();
    if desc.is_empty() {
        return Vec::new();
    }

    let wrapped = (desc.starts_with('（') || desc.starts_with('('))
        && (desc.ends_with('）') || desc.ends_with(')'));
    if wrapped {
        let mut chars = desc.chars();
        chars.next();
        chars.next_back();
        desc = chars.as_str().trim();
    }

    let desc = SPACE_RUNS
        .replace_all(desc, " ")
        .replace('(', "（")
        .replace(')', "）");
    let desc = desc.trim();

    let mut bullets = Vec::new();
    for part in split_before(desc, DATE.find_iter(desc).map(|m| m.start())) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.starts_with("根据") {
            bullets.push(format!("- {part}"));
        } else if DATE.find(part).is_some_and(|m| m.start() == 0) {
            for sub in split_before(part, part.match_indices("根据").map(|(i, _)| i)) {
                let sub = sub.trim();
                if !sub.is_empty() {
                    bullets.push(format!("- {}", sub.replace("起施行", "施行")));
                }
            }
        } else {
            bullets.push(format!("- {part}"));
        }
    }

    bullets.retain(|b| b != "- 根据");
    bullets
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

fn to_full_width_parens(text: &str) -> String {
    text.replace('(', "（").replace(')', "）")
}

/// Prefix a structural line with its heading level. Articles put their
/// inline text in a separate paragraph.
fn heading_line(line: &str) -> String {
    for (idx, (re, prefix)) in HEADINGS.iter().enumerate() {
        let Some(m) = re.find(line) else {
            continue;
        };
        if idx != ARTICLE_HEADING {
            return format!("{prefix}{line}");
        }
        let marker = m.as_str().trim();
        let rest = line[m.end()..].trim();
        return if rest.is_empty() {
            format!("{prefix}{marker}")
        } else {
            format!("{prefix}{marker}\n\n{rest}")
        };
    }
    line.to_string()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Format a document into markdown blocks.
///
/// Returns an empty list only when both description and body are empty
/// after filtering.
pub fn format_markdown(title: &str, description: &str, body: &[String]) -> Vec<String> {
    let desc = filter_description(description);
    let content = filter_content(body);

    if desc.is_empty() && content.is_empty() {
        warn!(title, "nothing left after filtering");
        return Vec::new();
    }

    let clean_title = to_full_width_parens(title).trim().to_string();
    let title_lower = clean_title.to_lowercase();

    let header = std::iter::once(format!("# {clean_title}"))
        .chain(desc.iter().cloned())
        .chain(std::iter::once(INFO_END.to_string()));
    let lines = content
        .iter()
        .filter(|line| line.trim().to_lowercase() != title_lower)
        .map(|line| heading_line(&to_full_width_parens(line)));

    let output: Vec<String> = header.chain(lines).filter(|l| !l.trim().is_empty()).collect();

    if output.len() < 2 {
        warn!(title, "markdown output is minimal");
        return std::iter::once(format!("# {clean_title}"))
            .chain(desc)
            .chain(std::iter::once(INFO_END.to_string()))
            .collect();
    }
    output
}

/// Join formatted blocks into the final document text.
pub fn render(blocks: &[String]) -> String {
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_of_contents_is_skipped() {
        let body = lines(&[
            "目　　录",
            "第一章　总则",
            "第二章　附则",
            "第一章　总则",
            "第一条　为了测试，制定本法。",
            "第二章　附则",
            "第二条 本法自公布之日起施行。",
        ]);
        let out = filter_content(&body);
        assert_eq!(
            out,
            lines(&[
                "第一章 总则",
                "第一条 为了测试，制定本法。",
                "第二章 附则",
                "第二条 本法自公布之日起施行。",
            ])
        );
    }

    #[test]
    fn menu_without_indent_pattern_closes_on_line_start() {
        let body = lines(&["目录", "说明", "附件", "第一条 内容"]);
        assert_eq!(filter_content(&body), lines(&["第一条 内容"]));
    }

    #[test]
    fn announcement_is_skipped_until_interpretation_number() {
        let body = lines(&[
            "最高人民法院",
            "公 告",
            "《关于审理案件的解释》已于2020年通过，现予公布。",
            "法释〔2020〕1号",
            "第一条 内容",
        ]);
        assert_eq!(
            filter_content(&body),
            lines(&["最高人民法院", "第一条 内容"])
        );
    }

    #[test]
    fn markers_get_single_space() {
        assert_eq!(normalize_marker("第十条之一  内容"), "第十条之一 内容");
        assert_eq!(normalize_marker("第三章"), "第三章");
        assert_eq!(normalize_marker("第五条内容"), "第五条 内容");
        assert_eq!(normalize_marker("普通段落"), "普通段落");
    }

    #[test]
    fn description_bullets() {
        let desc = "（2020年1月1日第十三届全国人民代表大会常务委员会第十五次会议通过　\
                    根据2021年4月29日第十三届全国人民代表大会常务委员会第二十八次会议\
                    《关于修改〈测试法〉的决定》修正 2021年6月1日起施行）";
        let bullets = filter_description(desc);
        assert_eq!(
            bullets,
            lines(&[
                "- 2020年1月1日第十三届全国人民代表大会常务委员会第十五次会议通过",
                "- 2021年4月29日第十三届全国人民代表大会常务委员会第二十八次会议《关于修改〈测试法〉的决定》修正",
                "- 2021年6月1日施行",
            ])
        );
    }

    #[test]
    fn leading_according_to_segment_is_its_own_bullet() {
        let bullets = filter_description("根据宪法，制定本法 (2020年1月1日起施行)");
        assert_eq!(
            bullets,
            lines(&["- 根据宪法，制定本法 （", "- 2020年1月1日施行）"])
        );
    }

    #[test]
    fn headings_by_level() {
        assert_eq!(heading_line("序言"), "#### 序言");
        assert_eq!(heading_line("第一编 总则"), "## 第一编 总则");
        assert_eq!(heading_line("第一分编 通则"), "### 第一分编 通则");
        assert_eq!(heading_line("第二章 分则"), "#### 第二章 分则");
        assert_eq!(heading_line("第三节 一般规定"), "##### 第三节 一般规定");
        assert_eq!(heading_line("第十条 内容。"), "###### 第十条\n\n内容。");
        assert_eq!(heading_line("第十条"), "###### 第十条");
        assert_eq!(heading_line("普通段落"), "普通段落");
    }

    #[test]
    fn full_document() {
        let body = lines(&["中华人民共和国测试法", "第一章 总则", "第一条 为了(测试)。"]);
        let out = format_markdown("中华人民共和国测试法", "（2020年1月1日通过）", &body);
        assert_eq!(
            render(&out),
            "# 中华人民共和国测试法\n\n- 2020年1月1日通过\n\n<!-- INFO END -->\n\n\
             #### 第一章 总则\n\n###### 第一条\n\n为了（测试）。"
        );
    }

    #[test]
    fn formatting_is_deterministic() {
        let body = lines(&["目录", "第一章 总则", "第一章 总则", "第一条 甲", "第二条 乙"]);
        let first = render(&format_markdown("测试", "（2020年1月1日通过）", &body));
        let second = render(&format_markdown("测试", "（2020年1月1日通过）", &body));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_inputs_give_empty_output() {
        assert!(format_markdown("标题", "", &[]).is_empty());
        assert!(format_markdown("标题", "  ", &lines(&["目录"])).is_empty());
    }

    #[test]
    fn title_only_with_description() {
        let out = format_markdown("标题", "（2020年1月1日通过）", &[]);
        assert_eq!(out, lines(&["# 标题", "- 2020年1月1日通过", INFO_END]));
    }
}
