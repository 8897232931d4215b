//! Core domain types for guideline knowledge and published style guides.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields requested when a run does not name any.
pub const DEFAULT_FIELDS: [&str; 3] = ["title", "shortDesc", "longDesc"];

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one published document (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new time-sortable record identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Guideline scope
// ---------------------------------------------------------------------------

/// One component of a guideline scope: a concrete value or the wildcard.
///
/// Stored rows use either SQL `NULL` or the literal `ALL` for the wildcard;
/// both map to [`ScopeKey::Wildcard`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKey {
    Exact(String),
    Wildcard,
}

impl ScopeKey {
    /// Literal stored for wildcard rows written by this crate.
    pub const WILDCARD_LITERAL: &'static str = "ALL";

    /// Interpret an optional stored column value.
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            None => Self::Wildcard,
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case(Self::WILDCARD_LITERAL) => {
                Self::Wildcard
            }
            Some(v) => Self::Exact(v.to_string()),
        }
    }

    /// The concrete value, or `None` for the wildcard.
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            Self::Exact(v) => Some(v),
            Self::Wildcard => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Wildcard => write!(f, "*"),
        }
    }
}

/// Where a guideline applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuidelineScope {
    /// Baseline rules keyed by category and product type.
    Baseline {
        category: ScopeKey,
        product_type: ScopeKey,
    },
    /// Legal rules keyed by domain.
    Legal { domain: ScopeKey },
}

/// Kind of guideline text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidelineKind {
    Baseline,
    Legal,
}

impl GuidelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Legal => "legal",
        }
    }
}

// ---------------------------------------------------------------------------
// GuidelineRecord
// ---------------------------------------------------------------------------

/// A stored guideline. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineRecord {
    /// Scope the text applies to.
    pub scope: GuidelineScope,
    /// Free-text guidance.
    pub text: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated upstream.
    pub updated_at: DateTime<Utc>,
}

impl GuidelineRecord {
    pub fn kind(&self) -> GuidelineKind {
        match self.scope {
            GuidelineScope::Baseline { .. } => GuidelineKind::Baseline,
            GuidelineScope::Legal { .. } => GuidelineKind::Legal,
        }
    }

    /// Build a baseline record stamped with the current time.
    pub fn baseline(category: ScopeKey, product_type: ScopeKey, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scope: GuidelineScope::Baseline {
                category,
                product_type,
            },
            text: text.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a legal record stamped with the current time.
    pub fn legal(domain: ScopeKey, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            scope: GuidelineScope::Legal { domain },
            text: text.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Published documents
// ---------------------------------------------------------------------------

/// The finished output for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalFieldResult {
    /// Field name (e.g. `title`).
    pub field: String,
    /// Approved (or best available) guide text.
    pub text: String,
    /// Reviewer and refinement notes collected along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
    /// Set when the review ceiling was reached without approval.
    #[serde(default)]
    pub unresolved: bool,
    /// Number of times the field went back to drafting.
    #[serde(default)]
    pub revision_count: u32,
}

/// A complete style guide for one (category, product type) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleGuideDocument {
    /// Identifier of the published record.
    pub id: RecordId,
    pub category: String,
    pub product_type: String,
    /// Field names in the order schema inference declared them.
    pub schema: Vec<String>,
    /// One result per declared field.
    pub fields: BTreeMap<String, FinalFieldResult>,
    pub created_at: DateTime<Utc>,
}

impl StyleGuideDocument {
    /// Results in schema order.
    pub fn ordered_fields(&self) -> impl Iterator<Item = &FinalFieldResult> {
        self.schema.iter().filter_map(|name| self.fields.get(name))
    }

    /// Names of fields flagged with unresolved compliance notes.
    pub fn unresolved_fields(&self) -> Vec<&str> {
        self.ordered_fields()
            .filter(|f| f.unresolved)
            .map(|f| f.field.as_str())
            .collect()
    }
}

/// One persisted row of `published_style_guides`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedGuideRow {
    pub record_id: String,
    pub category: String,
    pub product_type: String,
    pub field_name: String,
    pub guide_text: String,
    pub unresolved: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_roundtrip() {
        let id = RecordId::new();
        let s = id.to_string();
        let parsed: RecordId = s.parse().expect("parse RecordId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn scope_key_column_mapping() {
        assert_eq!(ScopeKey::from_column(None), ScopeKey::Wildcard);
        assert_eq!(ScopeKey::from_column(Some("ALL")), ScopeKey::Wildcard);
        assert_eq!(ScopeKey::from_column(Some("all")), ScopeKey::Wildcard);
        assert_eq!(
            ScopeKey::from_column(Some("Fashion")),
            ScopeKey::Exact("Fashion".into())
        );
        assert_eq!(ScopeKey::Wildcard.as_exact(), None);
    }

    #[test]
    fn record_kind_follows_scope() {
        let baseline = GuidelineRecord::baseline(
            ScopeKey::Exact("Fashion".into()),
            ScopeKey::Wildcard,
            "Use title case.",
        );
        assert_eq!(baseline.kind(), GuidelineKind::Baseline);

        let legal = GuidelineRecord::legal(ScopeKey::Wildcard, "No guarantees.");
        assert_eq!(legal.kind(), GuidelineKind::Legal);
    }

    #[test]
    fn document_orders_fields_by_schema() {
        let mut fields = BTreeMap::new();
        for (name, unresolved) in [("title", false), ("longDesc", true), ("shortDesc", false)] {
            fields.insert(
                name.to_string(),
                FinalFieldResult {
                    field: name.into(),
                    text: format!("{name} guide"),
                    review_notes: vec![],
                    unresolved,
                    revision_count: 0,
                },
            );
        }
        let doc = StyleGuideDocument {
            id: RecordId::new(),
            category: "Fashion".into(),
            product_type: "Women's Dress".into(),
            schema: vec!["title".into(), "shortDesc".into(), "longDesc".into()],
            fields,
            created_at: Utc::now(),
        };

        let order: Vec<_> = doc.ordered_fields().map(|f| f.field.as_str()).collect();
        assert_eq!(order, ["title", "shortDesc", "longDesc"]);
        assert_eq!(doc.unresolved_fields(), ["longDesc"]);

        let json = serde_json::to_string(&doc).expect("serialize");
        let parsed: StyleGuideDocument = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, doc);
    }
}
