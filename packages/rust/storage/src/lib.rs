//! Persistent progress ledger on embedded libSQL.
//!
//! The [`Ledger`] owns one table per [`Category`] holding every discovered
//! [`DocumentRecord`] together with its `fetched` / `transformed` flags, plus a
//! key-value `info` table for schema metadata.
//!
//! **Access rules:**
//! - Writes go through a single async write lock, one transaction at a time.
//! - Reads run on the shared connection without taking the lock.
//! - `transformed = 1` never coexists with `fetched = 0`.

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use lawledger_shared::{Category, DocumentRecord, LawLedgerError, Provenance, Result};
use libsql::{Connection, Database, Row, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Schema version label written by [`Ledger::migrate`].
pub const SCHEMA_VERSION_LABEL: &str = "3.0";

const SELECT_COLUMNS: &str = "id, title, url, office, type, status, publish, expiry, \
                              fetched, transformed, alt_id, provenance, subtype";

fn storage_err(e: libsql::Error) -> LawLedgerError {
    LawLedgerError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Row selection for [`Ledger::records`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Every row.
    All,
    /// Rows with a non-empty title.
    Titled,
    /// `fetched = 0`.
    PendingDownload,
    /// `fetched = 1 AND transformed = 0`.
    PendingTransform,
    /// `fetched = 1`.
    Fetched,
}

impl RecordFilter {
    fn where_clause(self) -> &'static str {
        match self {
            RecordFilter::All => "1 = 1",
            RecordFilter::Titled => "title IS NOT NULL AND title != ''",
            RecordFilter::PendingDownload => "fetched = 0",
            RecordFilter::PendingTransform => "fetched = 1 AND transformed = 0",
            RecordFilter::Fetched => "fetched = 1",
        }
    }
}

/// Identifiers already present in the ledger, across every category table.
#[derive(Debug, Default, Clone)]
pub struct KnownIdentifiers {
    /// Primary and alternate identifiers.
    pub ids: HashSet<String>,
    /// Titles, only loaded when title matching is requested.
    pub titles: HashSet<String>,
}

impl KnownIdentifiers {
    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.titles.contains(title)
    }
}

/// Per-category progress counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCounts {
    pub total: u64,
    pub fetched: u64,
    pub transformed: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Primary ledger handle wrapping a libSQL database.
pub struct Ledger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
    readonly: bool,
}

impl Ledger {
    /// Open or create a ledger at `path` in read-write mode, initializing the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LawLedgerError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let ledger = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: false,
        };
        ledger.apply_pragmas().await;
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Open an existing ledger in read-only mode (status reporting).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LawLedgerError::Storage(format!(
                "ledger not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: true,
        })
    }

    async fn apply_pragmas(&self) {
        for pragma in [
            "PRAGMA journal_mode = WAL",
            "PRAGMA synchronous = NORMAL",
            "PRAGMA busy_timeout = 5000",
        ] {
            // journal_mode answers with a row; drain it and ignore failures
            // on filesystems that cannot host a WAL.
            match self.conn.query(pragma, params![]).await {
                Ok(mut rows) => while let Ok(Some(_)) = rows.next().await {},
                Err(e) => warn!(pragma, error = %e, "pragma rejected"),
            }
        }
    }

    /// Idempotent schema creation: repair legacy tables, then apply pending migrations.
    pub async fn initialize(&self) -> Result<()> {
        self.check_writable()?;
        self.repair_columns().await?;
        self.run_migrations().await
    }

    /// Bring an existing ledger up to date and stamp the schema metadata.
    pub async fn migrate(&self) -> Result<u32> {
        self.check_writable()?;
        let added = self.repair_columns().await?;
        self.run_migrations().await?;
        self.set_meta("schema_version", SCHEMA_VERSION_LABEL).await?;
        self.set_meta("last_schema_update", &Utc::now().to_rfc3339())
            .await?;
        let mapping: Vec<String> = Category::ALL
            .iter()
            .map(|c| format!("{}:{}", c.id(), c.table()))
            .collect();
        self.set_meta("category_mapping", &mapping.join(",")).await?;
        info!(columns_added = added, "schema migration complete");
        Ok(added)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                let _guard = self.write_lock.lock().await;
                self.conn
                    .execute_batch(&migration.sql)
                    .await
                    .map_err(|e| {
                        LawLedgerError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Add any document column missing from an existing category table,
    /// carrying values over from the older column layout where present.
    async fn repair_columns(&self) -> Result<u32> {
        let mut added = 0;
        for category in Category::ALL {
            let table = category.table();
            let existing = self.table_columns(table).await?;
            if existing.is_empty() {
                continue;
            }
            let mut backfilled = false;
            for (name, _) in migrations::DOCUMENT_COLUMNS {
                if existing.contains(*name) {
                    continue;
                }
                let Some(ddl) = migrations::addable_column_ddl(name) else {
                    warn!(table = category.table(), column = name, "cannot add key column");
                    continue;
                };
                let legacy = migrations::legacy_backfill(name)
                    .filter(|(column, _)| existing.contains(*column));

                let _guard = self.write_lock.lock().await;
                let tx = self.conn.transaction().await.map_err(storage_err)?;
                tx.execute(
                    &format!("ALTER TABLE \"{table}\" ADD COLUMN \"{name}\" {ddl}"),
                    params![],
                )
                .await
                .map_err(storage_err)?;
                if let Some((column, expr)) = legacy {
                    let copied = tx
                        .execute(
                            &format!("UPDATE \"{table}\" SET \"{name}\" = {expr}"),
                            params![],
                        )
                        .await
                        .map_err(storage_err)?;
                    info!(table, column = name, from = column, rows = copied, "backfilled legacy column");
                    backfilled = true;
                }
                tx.commit().await.map_err(storage_err)?;
                info!(table, column = name, "added missing column");
                added += 1;
            }
            if backfilled {
                let _guard = self.write_lock.lock().await;
                let repaired = self
                    .conn
                    .execute(
                        &format!(
                            "UPDATE \"{table}\" SET fetched = 1 WHERE transformed = 1 AND fetched = 0"
                        ),
                        params![],
                    )
                    .await
                    .map_err(storage_err)?;
                if repaired > 0 {
                    warn!(table, rows = repaired, "legacy rows transformed but not fetched");
                }
            }
        }
        Ok(added)
    }

    async fn table_columns(&self, table: &str) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(&format!("PRAGMA table_info(\"{table}\")"), params![])
            .await
            .map_err(storage_err)?;
        let mut columns = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(name) = row.get::<String>(1) {
                columns.insert(name);
            }
        }
        Ok(columns)
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LawLedgerError::Storage(
                "ledger is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO info (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM info WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<String>(0).ok()),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Record writes
    // -----------------------------------------------------------------------

    /// Insert new records or refresh metadata of existing ones, keyed by id.
    ///
    /// Progress flags of rows that already exist are left as they are.
    /// Returns the number of rows written.
    pub async fn upsert_records(
        &self,
        category: Category,
        records: &[DocumentRecord],
    ) -> Result<usize> {
        self.check_writable()?;
        if records.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "INSERT INTO \"{}\" (id, title, url, office, type, status, publish, expiry,
                                 fetched, transformed, alt_id, provenance, subtype)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                office = excluded.office,
                type = excluded.type,
                status = excluded.status,
                publish = excluded.publish,
                expiry = excluded.expiry,
                alt_id = COALESCE(excluded.alt_id, alt_id),
                provenance = excluded.provenance,
                subtype = COALESCE(excluded.subtype, subtype)",
            category.table()
        );

        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let mut written = 0;
        for record in records {
            if record.id.is_empty() {
                continue;
            }
            let fetched = i64::from(record.fetched || record.transformed);
            tx.execute(
                &sql,
                params![
                    record.id.as_str(),
                    record.title.as_str(),
                    record.url.as_deref(),
                    record.office.as_deref(),
                    record.doc_type.as_deref(),
                    record.status,
                    record.publish.as_deref(),
                    record.expiry.as_deref(),
                    fetched,
                    i64::from(record.transformed),
                    record.alt_id.as_deref(),
                    record.provenance.as_str(),
                    record.subtype.map(i64::from),
                ],
            )
            .await
            .map_err(storage_err)?;
            written += 1;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(category = %category, written, "upserted records");
        Ok(written)
    }

    /// Flip `fetched = 1` for the given ids in one transaction.
    pub async fn mark_fetched(&self, category: Category, ids: &[String]) -> Result<u64> {
        let sql = format!("UPDATE \"{}\" SET fetched = 1 WHERE id = ?1", category.table());
        self.update_each(&sql, ids).await
    }

    /// Flip `transformed = 1` (and `fetched = 1`) for the given ids in one transaction.
    pub async fn mark_transformed(&self, category: Category, ids: &[String]) -> Result<u64> {
        let sql = format!(
            "UPDATE \"{}\" SET fetched = 1, transformed = 1 WHERE id = ?1",
            category.table()
        );
        self.update_each(&sql, ids).await
    }

    /// Set both flags to the observed presence of each row's output.
    ///
    /// Only rows whose flags differ from the observation are touched.
    pub async fn apply_presence(
        &self,
        category: Category,
        observations: &[(String, bool)],
    ) -> Result<u64> {
        self.check_writable()?;
        if observations.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE \"{}\" SET fetched = ?1, transformed = ?1
             WHERE id = ?2 AND (fetched != ?1 OR transformed != ?1)",
            category.table()
        );
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let mut changed = 0;
        for (id, present) in observations {
            changed += tx
                .execute(&sql, params![i64::from(*present), id.as_str()])
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(changed)
    }

    /// Clear progress flags.
    ///
    /// `ids = None` targets every fetched row of the category. With
    /// `keep_transformed`, rows that are already transformed keep both flags,
    /// and only fetched-but-untransformed rows are reset.
    pub async fn reset_flags(
        &self,
        category: Category,
        ids: Option<&[String]>,
        keep_transformed: bool,
    ) -> Result<u64> {
        self.check_writable()?;
        let table = category.table();
        let scope = if keep_transformed {
            "fetched = 1 AND transformed = 0"
        } else {
            "(fetched = 1 OR transformed = 1)"
        };
        match ids {
            None => {
                let _guard = self.write_lock.lock().await;
                self.conn
                    .execute(
                        &format!(
                            "UPDATE \"{table}\" SET fetched = 0, transformed = 0 WHERE {scope}"
                        ),
                        params![],
                    )
                    .await
                    .map_err(storage_err)
            }
            Some(ids) => {
                let sql = format!(
                    "UPDATE \"{table}\" SET fetched = 0, transformed = 0 WHERE id = ?1 AND {scope}"
                );
                self.update_each(&sql, ids).await
            }
        }
    }

    /// Run a single-id UPDATE for each id inside one write transaction.
    async fn update_each(&self, sql: &str, ids: &[String]) -> Result<u64> {
        self.check_writable()?;
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let mut changed = 0;
        for id in ids {
            changed += tx
                .execute(sql, params![id.as_str()])
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Record reads
    // -----------------------------------------------------------------------

    pub async fn get_record(&self, category: Category, id: &str) -> Result<Option<DocumentRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM \"{}\" WHERE id = ?1",
                    category.table()
                ),
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Rows of `category` matching `filter`, oldest insertion first.
    pub async fn records(
        &self,
        category: Category,
        filter: RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentRecord>> {
        let limit_clause = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM \"{}\" WHERE {} ORDER BY rowid{limit_clause}",
                    category.table(),
                    filter.where_clause()
                ),
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Load every primary and alternate id (and optionally every title) across all tables.
    pub async fn known_identifiers(&self, include_titles: bool) -> Result<KnownIdentifiers> {
        let mut known = KnownIdentifiers::default();
        for category in Category::ALL {
            let mut rows = self
                .conn
                .query(
                    &format!("SELECT id, alt_id, title FROM \"{}\"", category.table()),
                    params![],
                )
                .await
                .map_err(storage_err)?;
            while let Some(row) = rows.next().await.map_err(storage_err)? {
                if let Ok(id) = row.get::<String>(0) {
                    known.ids.insert(id);
                }
                if let Ok(alt) = row.get::<String>(1) {
                    if !alt.is_empty() {
                        known.ids.insert(alt);
                    }
                }
                if include_titles {
                    if let Ok(title) = row.get::<String>(2) {
                        if !title.is_empty() {
                            known.titles.insert(title);
                        }
                    }
                }
            }
        }
        debug!(
            ids = known.ids.len(),
            titles = known.titles.len(),
            "loaded known identifiers"
        );
        Ok(known)
    }

    pub async fn counts(&self, category: Category) -> Result<LedgerCounts> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(fetched), 0), COALESCE(SUM(transformed), 0)
                     FROM \"{}\"",
                    category.table()
                ),
                params![],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(LedgerCounts {
                total: row.get::<i64>(0).unwrap_or(0) as u64,
                fetched: row.get::<i64>(1).unwrap_or(0) as u64,
                transformed: row.get::<i64>(2).unwrap_or(0) as u64,
            }),
            None => Ok(LedgerCounts::default()),
        }
    }

    /// Rows violating `transformed ⇒ fetched`. Always zero for ledgers written by this crate.
    pub async fn invariant_violations(&self, category: Category) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT COUNT(*) FROM \"{}\" WHERE transformed = 1 AND fetched = 0",
                    category.table()
                ),
                params![],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            None => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_record(row: &Row) -> Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        title: row.get::<String>(1).unwrap_or_default(),
        url: row.get::<String>(2).ok(),
        office: row.get::<String>(3).ok(),
        doc_type: row.get::<String>(4).ok(),
        status: row.get::<i64>(5).ok(),
        publish: row.get::<String>(6).ok(),
        expiry: row.get::<String>(7).ok(),
        fetched: row.get::<i64>(8).unwrap_or(0) != 0,
        transformed: row.get::<i64>(9).unwrap_or(0) != 0,
        alt_id: row.get::<String>(10).ok().filter(|s| !s.is_empty()),
        provenance: row
            .get::<String>(11)
            .map(|p| Provenance::parse(&p))
            .unwrap_or_default(),
        subtype: row.get::<i64>(12).ok().and_then(|v| u32::try_from(v).ok()),
    })
}
