//! Guideline lookup with scope fallback.
//!
//! Baseline rules fall back exact → category wildcard → global. Legal rules
//! are keyed by domain (the category) and fall back to the wildcard. An empty
//! result at every level is empty guidance, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use styleguide_shared::{GuidelineKind, GuidelineRecord, GuidelineScope, Result, ScopeKey, StyleGuideError};
use styleguide_storage::Storage;

/// Read access to stored guidelines. Each call matches one exact scope.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn fetch_baseline(
        &self,
        category: &ScopeKey,
        product_type: &ScopeKey,
    ) -> Result<Option<GuidelineRecord>>;

    async fn fetch_legal(&self, domain: &ScopeKey) -> Result<Option<GuidelineRecord>>;
}

#[async_trait]
impl KnowledgeStore for Storage {
    async fn fetch_baseline(
        &self,
        category: &ScopeKey,
        product_type: &ScopeKey,
    ) -> Result<Option<GuidelineRecord>> {
        Storage::fetch_baseline(self, category, product_type).await
    }

    async fn fetch_legal(&self, domain: &ScopeKey) -> Result<Option<GuidelineRecord>> {
        Storage::fetch_legal(self, domain).await
    }
}

/// Guidelines held in memory. The newest `updated_at` wins within a scope,
/// later insertions breaking ties.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKnowledge {
    records: Vec<GuidelineRecord>,
}

impl InMemoryKnowledge {
    pub fn insert(&mut self, record: GuidelineRecord) {
        self.records.push(record);
    }

    pub fn add_baseline(&mut self, category: ScopeKey, product_type: ScopeKey, text: &str) {
        self.insert(GuidelineRecord::baseline(category, product_type, text));
    }

    pub fn add_legal(&mut self, domain: ScopeKey, text: &str) {
        self.insert(GuidelineRecord::legal(domain, text));
    }

    fn newest(&self, scope: &GuidelineScope) -> Option<GuidelineRecord> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| &r.scope == scope)
            .max_by_key(|(i, r)| (r.updated_at, *i))
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledge {
    async fn fetch_baseline(
        &self,
        category: &ScopeKey,
        product_type: &ScopeKey,
    ) -> Result<Option<GuidelineRecord>> {
        Ok(self.newest(&GuidelineScope::Baseline {
            category: category.clone(),
            product_type: product_type.clone(),
        }))
    }

    async fn fetch_legal(&self, domain: &ScopeKey) -> Result<Option<GuidelineRecord>> {
        Ok(self.newest(&GuidelineScope::Legal {
            domain: domain.clone(),
        }))
    }
}

/// Which rung of the fallback ladder produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    /// Both scope components matched (or the domain, for legal rules).
    Exact,
    /// Category matched with a wildcard product type.
    CategoryWildcard,
    /// Wildcard on every component.
    Global,
}

impl MatchLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CategoryWildcard => "category_wildcard",
            Self::Global => "global",
        }
    }
}

/// Resolved guidance text for one kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guidance {
    pub kind: GuidelineKind,
    /// Empty when nothing matched.
    pub text: String,
    pub matched: Option<MatchLevel>,
}

impl Guidance {
    fn empty(kind: GuidelineKind) -> Self {
        Self {
            kind,
            text: String::new(),
            matched: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_none()
    }
}

/// Baseline and legal guidance for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceBundle {
    pub baseline: Guidance,
    pub legal: Guidance,
}

/// Looks up guidance through a [`KnowledgeStore`] with scope fallback.
#[derive(Clone)]
pub struct KnowledgeResolver {
    store: Arc<dyn KnowledgeStore>,
    timeout: Duration,
}

impl KnowledgeResolver {
    pub fn new(store: Arc<dyn KnowledgeStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Resolve one kind of guidance. The whole ladder runs under the
    /// knowledge timeout.
    #[instrument(skip_all, fields(%category, %product_type, kind = kind.as_str()))]
    pub async fn resolve(
        &self,
        category: &str,
        product_type: &str,
        kind: GuidelineKind,
    ) -> Result<Guidance> {
        let lookup = self.walk_ladder(category, product_type, kind);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(StyleGuideError::Timeout {
                operation: format!("{} knowledge lookup", kind.as_str()),
                after: self.timeout,
            }),
        }
    }

    /// Resolve baseline and legal guidance.
    pub async fn resolve_bundle(&self, category: &str, product_type: &str) -> Result<GuidanceBundle> {
        let baseline = self
            .resolve(category, product_type, GuidelineKind::Baseline)
            .await?;
        let legal = self
            .resolve(category, product_type, GuidelineKind::Legal)
            .await?;
        Ok(GuidanceBundle { baseline, legal })
    }

    async fn walk_ladder(
        &self,
        category: &str,
        product_type: &str,
        kind: GuidelineKind,
    ) -> Result<Guidance> {
        let category_key = ScopeKey::from_column(Some(category));
        let product_key = ScopeKey::from_column(Some(product_type));

        match kind {
            GuidelineKind::Baseline => {
                let ladder = [
                    (category_key.clone(), product_key, MatchLevel::Exact),
                    (category_key, ScopeKey::Wildcard, MatchLevel::CategoryWildcard),
                    (ScopeKey::Wildcard, ScopeKey::Wildcard, MatchLevel::Global),
                ];
                for (cat, pt, level) in &ladder {
                    if let Some(record) = self.store.fetch_baseline(cat, pt).await? {
                        debug!(level = level.as_str(), "baseline guidance matched");
                        return Ok(Guidance {
                            kind,
                            text: record.text,
                            matched: Some(*level),
                        });
                    }
                }
            }
            GuidelineKind::Legal => {
                let ladder = [
                    (category_key, MatchLevel::Exact),
                    (ScopeKey::Wildcard, MatchLevel::Global),
                ];
                for (domain, level) in &ladder {
                    if let Some(record) = self.store.fetch_legal(domain).await? {
                        debug!(level = level.as_str(), "legal guidance matched");
                        return Ok(Guidance {
                            kind,
                            text: record.text,
                            matched: Some(*level),
                        });
                    }
                }
            }
        }

        debug!("no guidance matched at any level");
        Ok(Guidance::empty(kind))
    }
}
