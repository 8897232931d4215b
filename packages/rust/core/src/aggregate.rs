//! Collect field results into a document and hand it to a sink.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use styleguide_shared::{FinalFieldResult, RecordId, Result, StyleGuideDocument, StyleGuideError};
use styleguide_storage::Storage;

/// Durable destination for finished documents. Writes are append-only.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn persist(&self, document: &StyleGuideDocument) -> Result<RecordId>;
}

#[async_trait]
impl DocumentSink for Storage {
    async fn persist(&self, document: &StyleGuideDocument) -> Result<RecordId> {
        self.persist_document(document).await
    }
}

/// Build the document for one run.
///
/// Fails with [`StyleGuideError::IncompleteDocument`] if any declared field
/// has no result. Flagged results count as present. Results for undeclared
/// fields are dropped.
pub fn aggregate(
    category: &str,
    product_type: &str,
    declared: &[String],
    results: Vec<FinalFieldResult>,
) -> Result<StyleGuideDocument> {
    let mut fields: BTreeMap<String, FinalFieldResult> = BTreeMap::new();
    for result in results {
        if !declared.contains(&result.field) {
            warn!(field = %result.field, "dropping result for undeclared field");
            continue;
        }
        fields.insert(result.field.clone(), result);
    }

    let missing: Vec<String> = declared
        .iter()
        .filter(|f| !fields.contains_key(f.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StyleGuideError::IncompleteDocument { missing });
    }

    Ok(StyleGuideDocument {
        id: RecordId::new(),
        category: category.to_string(),
        product_type: product_type.to_string(),
        schema: declared.to_vec(),
        fields,
        created_at: Utc::now(),
    })
}
