//! libSQL storage layer for guideline knowledge and published style guides.
//!
//! The [`Storage`] struct wraps a local libSQL database holding baseline and
//! legal guideline records (read during a run) and the append-only
//! `published_style_guides` table (written once per run).
//!
//! **Access rules:**
//! - Pipeline runs and imports: read-write via [`Storage::open`]
//! - Inspection tooling: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::Deserialize;
use styleguide_shared::{
    GuidelineRecord, GuidelineScope, PublishedGuideRow, RecordId, Result, ScopeKey,
    StyleGuideDocument, StyleGuideError,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Guideline records read from a seed file (`[[baseline]]` / `[[legal]]`).
///
/// Omitted or `"ALL"` scope values are wildcards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuidelineSeed {
    #[serde(default)]
    pub baseline: Vec<BaselineSeed>,
    #[serde(default)]
    pub legal: Vec<LegalSeed>,
}

/// One `[[baseline]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineSeed {
    pub category: Option<String>,
    pub product_type: Option<String>,
    pub text: String,
}

/// One `[[legal]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct LegalSeed {
    pub domain: Option<String>,
    pub text: String,
}

fn storage_err(e: impl std::fmt::Display) -> StyleGuideError {
    StyleGuideError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StyleGuideError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Release the handle by dropping the connection and database.
    pub async fn close(self) {
        tracing::debug!(readonly = self.readonly, "closing storage");
        drop(self.conn);
        drop(self.db);
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        StyleGuideError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
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
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(StyleGuideError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Guideline writes
    // -----------------------------------------------------------------------

    /// Insert a baseline or legal record into its table.
    pub async fn insert_guideline(&self, record: &GuidelineRecord) -> Result<()> {
        self.check_writable()?;
        write_guideline(&self.conn, record).await
    }

    /// Insert a baseline record stamped with the current time.
    pub async fn insert_baseline(
        &self,
        category: ScopeKey,
        product_type: ScopeKey,
        text: &str,
    ) -> Result<()> {
        self.insert_guideline(&GuidelineRecord::baseline(category, product_type, text))
            .await
    }

    /// Insert a legal record stamped with the current time.
    pub async fn insert_legal(&self, domain: ScopeKey, text: &str) -> Result<()> {
        self.insert_guideline(&GuidelineRecord::legal(domain, text))
            .await
    }

    /// Insert every record of a seed file in one transaction. Returns
    /// `(baseline, legal)` counts.
    ///
    /// Every entry is validated before the first write, so a rejected seed
    /// leaves the store untouched.
    pub async fn import_guidelines(&self, seed: &GuidelineSeed) -> Result<(usize, usize)> {
        self.check_writable()?;
        if let Some(i) = seed.baseline.iter().position(|e| e.text.trim().is_empty()) {
            return Err(StyleGuideError::validation(format!(
                "baseline seed entry {} has empty text",
                i + 1
            )));
        }
        if let Some(i) = seed.legal.iter().position(|e| e.text.trim().is_empty()) {
            return Err(StyleGuideError::validation(format!(
                "legal seed entry {} has empty text",
                i + 1
            )));
        }

        let records = seed
            .baseline
            .iter()
            .map(|e| {
                GuidelineRecord::baseline(
                    ScopeKey::from_column(e.category.as_deref()),
                    ScopeKey::from_column(e.product_type.as_deref()),
                    &e.text,
                )
            })
            .chain(
                seed.legal
                    .iter()
                    .map(|e| GuidelineRecord::legal(ScopeKey::from_column(e.domain.as_deref()), &e.text)),
            );

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for record in records {
            write_guideline(&tx, &record).await?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::info!(
            baseline = seed.baseline.len(),
            legal = seed.legal.len(),
            "imported guidelines"
        );
        Ok((seed.baseline.len(), seed.legal.len()))
    }

    // -----------------------------------------------------------------------
    // Guideline reads
    // -----------------------------------------------------------------------

    /// Fetch the newest baseline record stored at exactly this scope.
    ///
    /// A wildcard key matches only wildcard rows; no fallback happens here.
    pub async fn fetch_baseline(
        &self,
        category: &ScopeKey,
        product_type: &ScopeKey,
    ) -> Result<Option<GuidelineRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT category, product_type, guidelines_text, created_at, updated_at
                 FROM baseline_guidelines
                 WHERE ((?1 IS NULL AND (category IS NULL OR category = '' OR UPPER(category) = 'ALL')) OR category = ?1)
                   AND ((?2 IS NULL AND (product_type IS NULL OR product_type = '' OR UPPER(product_type) = 'ALL')) OR product_type = ?2)
                 ORDER BY updated_at DESC, id DESC
                 LIMIT 1",
                params![category.as_exact(), product_type.as_exact()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let category: Option<String> = row.get::<String>(0).ok();
                let product_type: Option<String> = row.get::<String>(1).ok();
                Ok(Some(GuidelineRecord {
                    scope: GuidelineScope::Baseline {
                        category: ScopeKey::from_column(category.as_deref()),
                        product_type: ScopeKey::from_column(product_type.as_deref()),
                    },
                    text: row.get::<String>(2).map_err(storage_err)?,
                    created_at: parse_timestamp(&row, 3)?,
                    updated_at: parse_timestamp(&row, 4)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Fetch the newest legal record stored at exactly this domain scope.
    pub async fn fetch_legal(&self, domain: &ScopeKey) -> Result<Option<GuidelineRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT domain, legal_text, created_at, updated_at
                 FROM legal_guidelines
                 WHERE ((?1 IS NULL AND (domain IS NULL OR domain = '' OR UPPER(domain) = 'ALL')) OR domain = ?1)
                 ORDER BY updated_at DESC, id DESC
                 LIMIT 1",
                params![domain.as_exact()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let domain: Option<String> = row.get::<String>(0).ok();
                Ok(Some(GuidelineRecord {
                    scope: GuidelineScope::Legal {
                        domain: ScopeKey::from_column(domain.as_deref()),
                    },
                    text: row.get::<String>(1).map_err(storage_err)?,
                    created_at: parse_timestamp(&row, 2)?,
                    updated_at: parse_timestamp(&row, 3)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Published style guides
    // -----------------------------------------------------------------------

    /// Append one row per field of `document`. Returns the document's record id.
    pub async fn persist_document(&self, document: &StyleGuideDocument) -> Result<RecordId> {
        self.check_writable()?;
        let record_id = document.id.to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for field in document.ordered_fields() {
            let notes = serde_json::to_string(&field.review_notes).map_err(storage_err)?;
            tx.execute(
                "INSERT INTO published_style_guides
                 (record_id, category, product_type, field_name, guide_text, unresolved, review_notes_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record_id.as_str(),
                    document.category.as_str(),
                    document.product_type.as_str(),
                    field.field.as_str(),
                    field.text.as_str(),
                    i64::from(field.unresolved),
                    notes.as_str(),
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::info!(
            %record_id,
            category = %document.category,
            product_type = %document.product_type,
            fields = document.fields.len(),
            "persisted style guide"
        );
        Ok(document.id)
    }

    /// List published rows, newest first, optionally filtered by scope.
    pub async fn list_published(
        &self,
        category: Option<&str>,
        product_type: Option<&str>,
    ) -> Result<Vec<PublishedGuideRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_id, category, product_type, field_name, guide_text, unresolved,
                        review_notes_json, created_at, updated_at
                 FROM published_style_guides
                 WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR product_type = ?2)
                 ORDER BY created_at DESC, id ASC",
                params![category, product_type],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_published(&row)?);
        }
        Ok(results)
    }

    /// All rows belonging to one published document, in insertion order.
    pub async fn document_fields(&self, record_id: &RecordId) -> Result<Vec<PublishedGuideRow>> {
        let id = record_id.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT record_id, category, product_type, field_name, guide_text, unresolved,
                        review_notes_json, created_at, updated_at
                 FROM published_style_guides
                 WHERE record_id = ?1
                 ORDER BY id ASC",
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_published(&row)?);
        }
        Ok(results)
    }
}

/// Parse an RFC 3339 column into a UTC timestamp.
fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row.get(idx).map_err(storage_err)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StyleGuideError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`PublishedGuideRow`].
fn row_to_published(row: &libsql::Row) -> Result<PublishedGuideRow> {
    let notes_json: String = row.get(6).map_err(storage_err)?;
    Ok(PublishedGuideRow {
        record_id: row.get::<String>(0).map_err(storage_err)?,
        category: row.get::<String>(1).map_err(storage_err)?,
        product_type: row.get::<String>(2).map_err(storage_err)?,
        field_name: row.get::<String>(3).map_err(storage_err)?,
        guide_text: row.get::<String>(4).map_err(storage_err)?,
        unresolved: row.get::<i64>(5).map_err(storage_err)? != 0,
        review_notes: serde_json::from_str(&notes_json)
            .map_err(|e| StyleGuideError::Storage(format!("invalid review notes: {e}")))?,
        created_at: parse_timestamp(row, 7)?,
        updated_at: parse_timestamp(row, 8)?,
    })
}

async fn write_guideline(conn: &Connection, record: &GuidelineRecord) -> Result<()> {
    let created = record.created_at.to_rfc3339();
    let updated = record.updated_at.to_rfc3339();
    match &record.scope {
        GuidelineScope::Baseline {
            category,
            product_type,
        } => {
            conn.execute(
                "INSERT INTO baseline_guidelines (category, product_type, guidelines_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    category.as_exact(),
                    product_type.as_exact(),
                    record.text.as_str(),
                    created.as_str(),
                    updated.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        GuidelineScope::Legal { domain } => {
            conn.execute(
                "INSERT INTO legal_guidelines (domain, legal_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    domain.as_exact(),
                    record.text.as_str(),
                    created.as_str(),
                    updated.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        }
    }
    Ok(())
}
