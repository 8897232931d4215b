//! SQL migration definitions for the style guide database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: baseline/legal guidelines, published_style_guides",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Baseline style rules. NULL or 'ALL' in a scope column means wildcard.
CREATE TABLE IF NOT EXISTS baseline_guidelines (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    category        TEXT,
    product_type    TEXT,
    guidelines_text TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_baseline_scope ON baseline_guidelines(category, product_type);

-- Legal / brand constraints keyed by domain.
CREATE TABLE IF NOT EXISTS legal_guidelines (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    domain      TEXT,
    legal_text  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_legal_domain ON legal_guidelines(domain);

-- Published guides: one row per field per run.
CREATE TABLE IF NOT EXISTS published_style_guides (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id         TEXT NOT NULL,
    category          TEXT NOT NULL,
    product_type      TEXT NOT NULL,
    field_name        TEXT NOT NULL,
    guide_text        TEXT NOT NULL,
    unresolved        INTEGER NOT NULL DEFAULT 0,
    review_notes_json TEXT NOT NULL DEFAULT '[]',
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    UNIQUE(record_id, field_name)
);

CREATE INDEX IF NOT EXISTS idx_published_scope ON published_style_guides(category, product_type);
CREATE INDEX IF NOT EXISTS idx_published_record ON published_style_guides(record_id);

CREATE TRIGGER IF NOT EXISTS published_no_update BEFORE UPDATE ON published_style_guides BEGIN
    SELECT RAISE(ABORT, 'published_style_guides is append-only');
END;

CREATE TRIGGER IF NOT EXISTS published_no_delete BEFORE DELETE ON published_style_guides BEGIN
    SELECT RAISE(ABORT, 'published_style_guides is append-only');
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
