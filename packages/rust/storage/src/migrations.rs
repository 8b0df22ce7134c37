//! SQL migration definitions for the ledger database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements. Category tables share one
//! column layout, so their DDL is generated per table.

use lawledger_shared::Category;

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: String,
}

/// Columns every category table must carry, with their DDL type.
/// Used both for creation and for repairing tables written by older builds.
pub(crate) const DOCUMENT_COLUMNS: &[(&str, &str)] = &[
    ("id", "TEXT PRIMARY KEY NOT NULL"),
    ("title", "TEXT NOT NULL"),
    ("url", "TEXT"),
    ("office", "TEXT"),
    ("type", "TEXT"),
    ("status", "INTEGER"),
    ("publish", "TEXT"),
    ("expiry", "TEXT"),
    ("fetched", "INTEGER NOT NULL DEFAULT 0"),
    ("transformed", "INTEGER NOT NULL DEFAULT 0"),
    ("alt_id", "TEXT"),
    ("provenance", "TEXT NOT NULL DEFAULT 'old'"),
    ("subtype", "INTEGER"),
];

/// Column DDL for `ALTER TABLE ADD COLUMN`: SQLite cannot add a primary key
/// or a NOT NULL column without a default.
pub(crate) fn addable_column_ddl(name: &str) -> Option<&'static str> {
    match name {
        "id" | "title" => None,
        "fetched" | "transformed" => Some("INTEGER NOT NULL DEFAULT 0"),
        "provenance" => Some("TEXT NOT NULL DEFAULT 'old'"),
        "status" | "subtype" => Some("INTEGER"),
        _ => Some("TEXT"),
    }
}

/// Backfill source for a column added to a table from the older layout
/// (`saved`, `parsed`, `bbbs_id`, `source_api`): `(legacy column, expression)`.
pub(crate) fn legacy_backfill(name: &str) -> Option<(&'static str, &'static str)> {
    match name {
        "fetched" => Some(("saved", "COALESCE(\"saved\", 0)")),
        "transformed" => Some(("parsed", "COALESCE(\"parsed\", 0)")),
        "alt_id" => Some(("bbbs_id", "\"bbbs_id\"")),
        "provenance" => Some(("source_api", "COALESCE(\"source_api\", 'old')")),
        _ => None,
    }
}

fn create_document_table(category: Category) -> String {
    let columns: Vec<String> = DOCUMENT_COLUMNS
        .iter()
        .map(|(name, ddl)| format!("    \"{name}\" {ddl}"))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n{}\n);\n",
        category.table(),
        columns.join(",\n")
    )
}

fn create_document_indexes(category: Category) -> String {
    let table = category.table();
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_progress ON \"{table}\"(fetched, transformed);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_alt_id ON \"{table}\"(alt_id);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_title ON \"{table}\"(title);\n"
    )
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    let mut initial = String::from(
        r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Key-value metadata
CREATE TABLE IF NOT EXISTS info (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    key   TEXT UNIQUE NOT NULL,
    value TEXT
);

"#,
    );
    for category in Category::ALL {
        initial.push_str(&create_document_table(category));
        initial.push_str(&format!(
            "INSERT OR IGNORE INTO info (key, value) VALUES ('category_{}', '{}');\n",
            category.id(),
            category.label()
        ));
    }
    initial.push_str("INSERT OR IGNORE INTO info (key, value) VALUES ('init_complete', '1');\n");
    initial.push_str("INSERT INTO schema_migrations (version) VALUES (1);\n");

    let mut indexes = String::new();
    for category in Category::ALL {
        indexes.push_str(&create_document_indexes(category));
    }
    indexes.push_str("INSERT INTO schema_migrations (version) VALUES (2);\n");

    vec![
        Migration {
            version: 1,
            description: "Initial schema: info metadata and one document table per category",
            sql: initial,
        },
        Migration {
            version: 2,
            description: "Progress, alt_id and title indexes on document tables",
            sql: indexes,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_ascending() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn initial_schema_covers_every_category() {
        let sql = &all_migrations()[0].sql;
        for category in Category::ALL {
            assert!(sql.contains(&format!("\"{}\"", category.table())));
        }
        assert!(sql.contains("\"alt_id\" TEXT"));
    }

    #[test]
    fn primary_key_is_never_added_later() {
        assert_eq!(addable_column_ddl("id"), None);
        assert_eq!(addable_column_ddl("subtype"), Some("INTEGER"));
    }

    #[test]
    fn legacy_columns_backfill_progress_and_ids() {
        assert_eq!(legacy_backfill("fetched").map(|(c, _)| c), Some("saved"));
        assert_eq!(legacy_backfill("transformed").map(|(c, _)| c), Some("parsed"));
        assert_eq!(legacy_backfill("alt_id").map(|(c, _)| c), Some("bbbs_id"));
        assert_eq!(legacy_backfill("provenance").map(|(c, _)| c), Some("source_api"));
        assert_eq!(legacy_backfill("subtype"), None);
    }
}
