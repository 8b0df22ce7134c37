//! Classification of one listing page against the known identifiers.

use lawledger_shared::{Category, DocumentRecord};
use lawledger_storage::KnownIdentifiers;

/// A page split into known, new and invalid items.
#[derive(Debug, Default)]
pub struct PagePartition {
    /// New items with their resolved category.
    pub new: Vec<(Category, DocumentRecord)>,
    pub existing: usize,
    /// Missing id or unrecognized category.
    pub invalid: usize,
}

/// Partition `items`, registering every new item in `known` so later pages
/// (and duplicates within this page) see it as existing.
pub fn partition_page(
    items: Vec<DocumentRecord>,
    known: &mut KnownIdentifiers,
    title_check: bool,
) -> PagePartition {
    let mut partition = PagePartition::default();

    for item in items {
        if item.id.is_empty() {
            partition.invalid += 1;
            continue;
        }

        let id_known = known.contains_id(&item.id)
            || item.alt_id.as_deref().is_some_and(|alt| known.contains_id(alt));
        let title_known = title_check && !item.title.is_empty() && known.contains_title(&item.title);
        if id_known || title_known {
            partition.existing += 1;
            continue;
        }

        let Some(category) = item.category() else {
            partition.invalid += 1;
            continue;
        };

        known.ids.insert(item.id.clone());
        if let Some(alt) = &item.alt_id {
            known.ids.insert(alt.clone());
        }
        if title_check && !item.title.is_empty() {
            known.titles.insert(item.title.clone());
        }
        partition.new.push((category, item));
    }

    partition
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, alt: Option<&str>, title: &str, doc_type: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.into(),
            alt_id: alt.map(String::from),
            title: title.into(),
            doc_type: Some(doc_type.into()),
            ..Default::default()
        }
    }

    #[test]
    fn splits_known_new_and_invalid() {
        let mut known = KnownIdentifiers::default();
        known.ids.insert("old".into());
        known.titles.insert("旧法".into());

        let page = vec![
            item("old", None, "甲", "法律"),
            item("x1", None, "旧法", "法律"),
            item("x2", None, "新法", "法律"),
            item("", None, "无编号", "法律"),
            item("x3", None, "部门规章", "部门规章"),
        ];
        let partition = partition_page(page, &mut known, true);
        assert_eq!(partition.existing, 2);
        assert_eq!(partition.invalid, 2);
        assert_eq!(partition.new.len(), 1);
        assert_eq!(partition.new[0].0, Category::LawStatute);
        assert!(known.contains_id("x2"));
    }

    #[test]
    fn alternate_id_match_is_existing() {
        let mut known = KnownIdentifiers::default();
        known.ids.insert("bbbs-1".into());

        let page = vec![item("different-primary", Some("bbbs-1"), "甲", "法律")];
        let partition = partition_page(page, &mut known, false);
        assert_eq!(partition.existing, 1);
        assert!(partition.new.is_empty());
    }

    #[test]
    fn title_match_ignored_without_title_check() {
        let mut known = KnownIdentifiers::default();
        known.titles.insert("旧法".into());

        let partition = partition_page(vec![item("x1", None, "旧法", "宪法")], &mut known, false);
        assert_eq!(partition.new.len(), 1);
        assert_eq!(partition.new[0].0, Category::Constitution);
    }

    #[test]
    fn duplicate_within_page_counted_once() {
        let mut known = KnownIdentifiers::default();
        let page = vec![
            item("x1", None, "甲", "行政法规"),
            item("x1", None, "甲", "行政法规"),
        ];
        let partition = partition_page(page, &mut known, true);
        assert_eq!(partition.new.len(), 1);
        assert_eq!(partition.existing, 1);
    }
}
