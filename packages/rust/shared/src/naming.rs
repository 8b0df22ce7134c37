//! Filesystem-safe names for titles, folders and identifiers.

use std::sync::LazyLock;

use regex::Regex;

/// Characters that cannot appear in a path component.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|]"#).expect("valid regex"));

/// Byte ceiling for generated file stems.
pub const MAX_NAME_BYTES: usize = 180;

/// Replace `/ \ : * ? " < > |` with `_` and trim surrounding whitespace.
pub fn sanitize_component(value: &str) -> String {
    UNSAFE_CHARS.replace_all(value, "_").trim().to_string()
}

/// ASCII-only variant of a title: anything outside `[A-Za-z0-9 _-]` becomes `_`.
pub fn ascii_name(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches(|c| c == '_' || c == ' ').to_string()
}

/// Truncate to at most `max_bytes` on a char boundary, then trim ` ._-`.
pub fn truncate_bytes(value: &str, max_bytes: usize) -> String {
    let mut end = value.len().min(max_bytes);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end]
        .trim_matches(|c| matches!(c, ' ' | '.' | '_' | '-'))
        .to_string()
}

/// Candidate file stems for a document, in preference order, deduplicated.
pub fn candidate_stems(title: &str, id: &str) -> Vec<String> {
    let mut stems: Vec<String> = Vec::with_capacity(3);
    for raw in [sanitize_component(title), ascii_name(title), sanitize_component(id)] {
        let stem = truncate_bytes(&raw, MAX_NAME_BYTES);
        if !stem.is_empty() && !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_component(" a/b\\c:d*e?f\"g<h>i|j "), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_component("中华人民共和国宪法"), "中华人民共和国宪法");
    }

    #[test]
    fn ascii_name_replaces_non_ascii() {
        assert_eq!(ascii_name("中华 Law-2024"), "Law-2024");
        assert_eq!(ascii_name("中华人民共和国"), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let title = "法".repeat(100);
        let truncated = truncate_bytes(&title, MAX_NAME_BYTES);
        assert_eq!(truncated.len(), 180);
        assert!(truncated.chars().all(|c| c == '法'));

        let odd = format!("a{}", "法".repeat(100));
        let truncated = truncate_bytes(&odd, MAX_NAME_BYTES);
        assert!(truncated.len() <= MAX_NAME_BYTES);
        assert_eq!(truncated.len(), 178);
    }

    #[test]
    fn candidate_stems_order_and_dedup() {
        let stems = candidate_stems("刑法（2020修正）", "abc123");
        assert_eq!(stems, vec!["刑法（2020修正）".to_string(), "2020".into(), "abc123".into()]);

        let stems = candidate_stems("abc123", "abc123");
        assert_eq!(stems, vec!["abc123".to_string()]);
    }
}
