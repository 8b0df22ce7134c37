//! Core domain types: the category taxonomy and the document record.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Top-level document category. Each one owns a ledger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Category {
    Constitution,
    Law,
    AdministrativeRegulation,
    SupervisoryRegulation,
    JudicialInterpretation,
    LocalRegulation,
    LawStatute,
    LawInterpretation,
    LawDecision,
    AmendmentDecision,
}

impl Category {
    /// All categories in id order.
    pub const ALL: [Category; 10] = [
        Category::Constitution,
        Category::Law,
        Category::AdministrativeRegulation,
        Category::SupervisoryRegulation,
        Category::JudicialInterpretation,
        Category::LocalRegulation,
        Category::LawStatute,
        Category::LawInterpretation,
        Category::LawDecision,
        Category::AmendmentDecision,
    ];

    /// Categories that own a directory directly under the output root.
    /// These are the ones crawled and reorganized as a whole.
    pub const PRIMARY: [Category; 6] = [
        Category::Constitution,
        Category::Law,
        Category::AdministrativeRegulation,
        Category::SupervisoryRegulation,
        Category::JudicialInterpretation,
        Category::LocalRegulation,
    ];

    pub fn id(self) -> u8 {
        match self {
            Category::Constitution => 1,
            Category::Law => 2,
            Category::AdministrativeRegulation => 3,
            Category::SupervisoryRegulation => 4,
            Category::JudicialInterpretation => 5,
            Category::LocalRegulation => 6,
            Category::LawStatute => 7,
            Category::LawInterpretation => 8,
            Category::LawDecision => 9,
            Category::AmendmentDecision => 10,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    /// Ledger table name, also the remote type code.
    pub fn table(self) -> &'static str {
        match self {
            Category::Constitution => "xffl",
            Category::Law => "flfg",
            Category::AdministrativeRegulation => "xzfg",
            Category::SupervisoryRegulation => "jcfg",
            Category::JudicialInterpretation => "sfjs",
            Category::LocalRegulation => "dfxfg",
            Category::LawStatute => "flfg_fl",
            Category::LawInterpretation => "flfg_fljs",
            Category::LawDecision => "flfg_fljswd",
            Category::AmendmentDecision => "flfg_xgfzdd",
        }
    }

    /// Human label, used as the category folder name.
    pub fn label(self) -> &'static str {
        match self {
            Category::Constitution => "宪法",
            Category::Law | Category::LawStatute => "法律",
            Category::AdministrativeRegulation => "行政法规",
            Category::SupervisoryRegulation => "监察法规",
            Category::JudicialInterpretation => "司法解释",
            Category::LocalRegulation => "地方性法规",
            Category::LawInterpretation => "法律解释",
            Category::LawDecision => "有关法律问题和重大问题的决定",
            Category::AmendmentDecision => "修改、废止的决定",
        }
    }

    /// Subtype codes sent as the listing filter for this category.
    pub fn subtype_codes(self) -> &'static [u32] {
        match self {
            Category::Constitution => &[100],
            Category::Law => &[110, 120, 130, 140, 150, 160, 170, 180, 190, 195, 200],
            Category::AdministrativeRegulation => &[210, 215],
            Category::SupervisoryRegulation => &[220],
            Category::JudicialInterpretation => &[320, 330, 340, 350],
            Category::LocalRegulation => &[230, 260, 270, 290, 295, 300, 305, 310],
            Category::LawStatute => &[110, 120, 130, 140, 150, 160, 170],
            Category::LawInterpretation => &[180],
            Category::LawDecision => &[190],
            Category::AmendmentDecision => &[200],
        }
    }

    /// Law sub-categories nest under the law folder on disk.
    pub fn parent(self) -> Option<Category> {
        match self {
            Category::LawInterpretation | Category::LawDecision | Category::AmendmentDecision => {
                Some(Category::Law)
            }
            _ => None,
        }
    }

    /// Directory holding this category's documents.
    pub fn dir(self, root: &Path) -> PathBuf {
        match self.parent() {
            Some(parent) => parent.dir(root).join(self.label()),
            None => root.join(self.label()),
        }
    }

    /// Jurisdiction subfolders only apply to local regulations.
    pub fn has_jurisdictions(self) -> bool {
        self == Category::LocalRegulation
    }

    /// Resolve a remote type string (label, legacy alias or table code).
    pub fn from_api_type(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let by_alias = match value {
            "宪法" => Some(Category::Constitution),
            "法律" => Some(Category::LawStatute),
            "法律解释" => Some(Category::LawInterpretation),
            "有关法律问题和重大问题的决定" => Some(Category::LawDecision),
            "修改、废止的决定" => Some(Category::AmendmentDecision),
            "行政法规" => Some(Category::AdministrativeRegulation),
            "监察法规" => Some(Category::SupervisoryRegulation),
            "司法解释" => Some(Category::JudicialInterpretation),
            "地方性法规" | "地方法规" => Some(Category::LocalRegulation),
            _ => None,
        };
        by_alias
            .or_else(|| Self::ALL.into_iter().find(|c| c.table() == value))
            .or_else(|| {
                let lower = value.to_lowercase();
                Self::ALL
                    .into_iter()
                    .find(|c| c.label().to_lowercase() == lower || c.table() == lower)
            })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

impl From<Category> for u8 {
    fn from(c: Category) -> u8 {
        c.id()
    }
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(id: u8) -> std::result::Result<Self, Self::Error> {
        Category::from_id(id).ok_or_else(|| format!("unknown category id {id}"))
    }
}

// ---------------------------------------------------------------------------
// Subtypes
// ---------------------------------------------------------------------------

/// Subtype code → folder name.
pub const SUBTYPE_FOLDERS: &[(u32, &str)] = &[
    (100, "宪法"),
    (110, "法律_宪法相关法"),
    (120, "法律_民法商法"),
    (130, "法律_行政法"),
    (140, "法律_经济法"),
    (150, "法律_社会法"),
    (160, "法律_刑法"),
    (170, "法律_诉讼非诉讼程序法"),
    (180, "法律解释"),
    (190, "法律_法律问题决定"),
    (195, "法律_修正案"),
    (200, "法律_修改废止决定"),
    (210, "行政法规_行政法规"),
    (215, "行政法规_修改废止决定"),
    (220, "监察法规"),
    (230, "地方法规_地方性法规"),
    (260, "地方法规_自治条例"),
    (270, "地方法规_单行条例"),
    (290, "地方法规_经济特区法规"),
    (295, "地方法规_浦东新区法规"),
    (300, "地方法规_海南自由贸易港法规"),
    (305, "地方法规_法规性决定"),
    (310, "地方法规_修改废止决定"),
    (320, "司法解释_高法司法解释"),
    (330, "司法解释_高检司法解释"),
    (340, "司法解释_联合发布司法解释"),
    (350, "司法解释_修改废止决定"),
];

/// Folder name for a subtype code.
pub fn subtype_folder(code: u32) -> Option<&'static str> {
    SUBTYPE_FOLDERS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

// ---------------------------------------------------------------------------
// Document record
// ---------------------------------------------------------------------------

/// Which remote response shape produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// `result.data` listing shape.
    #[default]
    Old,
    /// `rows` listing shape, carrying `bbbs` identifiers.
    New,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Old => "old",
            Provenance::New => "new",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("new") {
            Provenance::New
        } else {
            Provenance::Old
        }
    }
}

/// One discoverable document, as stored in a category table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Primary key within the category table.
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    /// Issuing office, free text.
    pub office: Option<String>,
    /// Remote type string.
    pub doc_type: Option<String>,
    /// Finer classification code, when the remote provides it.
    pub subtype: Option<u32>,
    pub status: Option<i64>,
    pub publish: Option<String>,
    pub expiry: Option<String>,
    pub fetched: bool,
    pub transformed: bool,
    /// Alternate identifier (`bbbs`) used by the newer API.
    pub alt_id: Option<String>,
    pub provenance: Provenance,
}

impl DocumentRecord {
    /// Resolve the record's category from its remote type string.
    pub fn category(&self) -> Option<Category> {
        self.doc_type.as_deref().and_then(Category::from_api_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_ids_roundtrip() {
        for category in Category::ALL {
            assert_eq!(Category::from_id(category.id()), Some(category));
        }
        assert_eq!(Category::from_id(0), None);
        assert_eq!(Category::from_id(11), None);
    }

    #[test]
    fn api_type_resolution() {
        assert_eq!(Category::from_api_type("法律"), Some(Category::LawStatute));
        assert_eq!(Category::from_api_type("地方法规"), Some(Category::LocalRegulation));
        assert_eq!(Category::from_api_type("sfjs"), Some(Category::JudicialInterpretation));
        assert_eq!(Category::from_api_type(" 监察法规 "), Some(Category::SupervisoryRegulation));
        assert_eq!(Category::from_api_type("部门规章"), None);
        assert_eq!(Category::from_api_type(""), None);
    }

    #[test]
    fn law_children_nest_under_law_folder() {
        let root = Path::new("/data");
        assert_eq!(
            Category::LawInterpretation.dir(root),
            PathBuf::from("/data/法律/法律解释")
        );
        assert_eq!(Category::LawStatute.dir(root), PathBuf::from("/data/法律"));
        assert_eq!(Category::LocalRegulation.dir(root), PathBuf::from("/data/地方性法规"));
    }

    #[test]
    fn every_subtype_code_has_a_folder() {
        for category in Category::ALL {
            for code in category.subtype_codes() {
                assert!(subtype_folder(*code).is_some(), "missing folder for {code}");
            }
        }
    }

    #[test]
    fn provenance_parsing_defaults_to_old() {
        assert_eq!(Provenance::parse("new"), Provenance::New);
        assert_eq!(Provenance::parse("old"), Provenance::Old);
        assert_eq!(Provenance::parse(""), Provenance::Old);
    }
}
