//! Output directory classification.
//!
//! A record's directory is its category folder plus an optional subtype
//! folder chosen by the first matching [`Rule`], plus a jurisdiction folder
//! for local regulations.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use lawledger_shared::{Category, DocumentRecord, SUBTYPE_FOLDERS, sanitize_component, subtype_folder};

/// Inputs the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub category: Category,
    pub subtype: Option<u32>,
    pub api_type: Option<&'a str>,
    pub office: Option<&'a str>,
}

impl<'a> Placement<'a> {
    pub fn of(category: Category, record: &'a DocumentRecord) -> Self {
        Self {
            category,
            subtype: record.subtype,
            api_type: record.doc_type.as_deref().filter(|t| !t.trim().is_empty()),
            office: record.office.as_deref().filter(|o| !o.trim().is_empty()),
        }
    }
}

/// What a rule decided below the category folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Subtype folder, `None` for the category folder itself.
    pub subfolder: Option<String>,
    /// Whether a jurisdiction folder may be appended.
    pub jurisdiction: bool,
}

/// A classification rule; `None` passes to the next rule.
pub type Rule = fn(&Placement<'_>) -> Option<RuleMatch>;

/// Rules in precedence order.
pub const RULES: &[(&str, Rule)] = &[
    ("subtype-code", by_subtype_code),
    ("category-label", by_category_label),
    ("fuzzy-type", by_fuzzy_type),
];

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A known subtype code names the folder directly. Only local-regulation
/// folders get a jurisdiction level.
pub fn by_subtype_code(p: &Placement<'_>) -> Option<RuleMatch> {
    let folder = subtype_folder(p.subtype?)?;
    Some(RuleMatch {
        subfolder: strip_category(folder, p.category),
        jurisdiction: folder.contains("地方"),
    })
}

/// A type string equal to the category label needs no subfolder.
pub fn by_category_label(p: &Placement<'_>) -> Option<RuleMatch> {
    let api_type = p.api_type?.trim();
    (api_type == p.category.label() || api_type == p.category.table()).then_some(RuleMatch {
        subfolder: None,
        jurisdiction: true,
    })
}

/// Containment match of the type string against subtype folder names;
/// an unmatched type string is used as the folder itself.
pub fn by_fuzzy_type(p: &Placement<'_>) -> Option<RuleMatch> {
    let api_type = p.api_type?.trim();
    let folder = match_subtype_folder(api_type).unwrap_or(api_type);
    Some(RuleMatch {
        subfolder: strip_category(folder, p.category),
        jurisdiction: true,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn match_subtype_folder(api_type: &str) -> Option<&'static str> {
    if api_type.is_empty() {
        return None;
    }
    let api_lower = api_type.to_lowercase();
    SUBTYPE_FOLDERS.iter().map(|(_, name)| *name).find(|name| {
        let name_lower = name.to_lowercase();
        let tail = name_lower.rsplit('_').next().unwrap_or(&name_lower);
        name_lower.contains(&api_lower) || api_lower.ends_with(tail)
    })
}

/// Folders that repeat the category label collapse into the category folder;
/// a `{label}_` prefix is dropped.
fn strip_category(folder: &str, category: Category) -> Option<String> {
    let label = category.label();
    if folder == label || folder.ends_with(&format!("_{label}")) {
        return None;
    }
    let rest = folder.strip_prefix(&format!("{label}_")).unwrap_or(folder);
    let sanitized = sanitize_component(rest);
    (!sanitized.is_empty() && sanitized != label).then_some(sanitized)
}

static JURISDICTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)人民代表大会").expect("valid regex"));

/// Governing body preceding `人民代表大会`, without a trailing `常务委员会`.
pub fn jurisdiction(office: &str) -> Option<String> {
    let caps = JURISDICTION.captures(office.trim())?;
    let name = caps[1].trim();
    let name = name.strip_suffix("常务委员会").unwrap_or(name).trim();
    let name = sanitize_component(name);
    (!name.is_empty()).then_some(name)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Resolve the directory for `placement` under `root`, with the name of the
/// rule that decided it (`category-root` when none matched).
pub fn classify_placement(root: &Path, placement: &Placement<'_>) -> (PathBuf, &'static str) {
    let mut dir = placement.category.dir(root);
    let (name, decided) = RULES
        .iter()
        .find_map(|(name, rule)| rule(placement).map(|m| (*name, m)))
        .unwrap_or((
            "category-root",
            RuleMatch {
                subfolder: None,
                jurisdiction: true,
            },
        ));

    if let Some(sub) = decided.subfolder {
        dir.push(sub);
    }
    if placement.category.has_jurisdictions() && decided.jurisdiction {
        if let Some(region) = placement.office.and_then(jurisdiction) {
            dir.push(region);
        }
    }
    (dir, name)
}

/// Directory a record of `category` belongs in.
pub fn classify(root: &Path, category: Category, record: &DocumentRecord) -> PathBuf {
    classify_placement(root, &Placement::of(category, record)).0
}
