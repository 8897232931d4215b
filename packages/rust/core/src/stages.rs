//! The standard stage contracts and the payload keys they exchange.

use serde_json::Value;

use crate::contract::{OutputField, StageContract};
use crate::executor::StageResult;

/// Payload keys shared across stages.
pub mod keys {
    // Run seeds
    pub const CATEGORY: &str = "category";
    pub const PRODUCT_TYPE: &str = "product_type";
    pub const FIELDS_NEEDED: &str = "fields_needed";
    pub const BASELINE_GUIDELINES: &str = "baseline_guidelines";
    pub const LEGAL_GUIDELINES: &str = "legal_guidelines";

    // Prefix outputs
    pub const BASELINE_RULES_SUMMARY: &str = "baseline_rules_summary";
    pub const LEGAL_GUIDELINES_SUMMARY: &str = "legal_guidelines_summary";
    pub const CATEGORY_INSIGHTS: &str = "category_insights";
    pub const PRODUCT_TYPE_ANALYSIS: &str = "product_type_analysis";
    pub const FIELD_GUIDELINES: &str = "field_guidelines";
    pub const FINAL_SCHEMA: &str = "final_schema";
    pub const FIELDS: &str = "fields";

    // Field subflow
    pub const FIELD: &str = "field";
    pub const PRIOR_DRAFT: &str = "prior_draft";
    pub const REVIEW_FEEDBACK: &str = "review_feedback";
    pub const DRAFT_STYLE_GUIDE: &str = "draft_style_guide";
    pub const REVIEW_NOTES: &str = "review_notes";
    pub const VERDICT: &str = "verdict";
    pub const LEGAL_ISSUES_FOUND: &str = "legal_issues_found";
    pub const LEGALLY_REVIEWED_GUIDE: &str = "legally_reviewed_guide";
    pub const FINAL_STYLE_GUIDE: &str = "final_style_guide";
    pub const NOTES: &str = "notes";
}

/// Keys available before any stage runs.
pub const SEED_KEYS: [&str; 5] = [
    keys::CATEGORY,
    keys::PRODUCT_TYPE,
    keys::FIELDS_NEEDED,
    keys::BASELINE_GUIDELINES,
    keys::LEGAL_GUIDELINES,
];

/// Keys the revise loop supplies to subflow stages itself.
pub const LOOP_KEYS: [&str; 5] = [
    keys::FIELD,
    keys::PRIOR_DRAFT,
    keys::REVIEW_FEEDBACK,
    keys::DRAFT_STYLE_GUIDE,
    keys::REVIEW_NOTES,
];

pub const KNOWLEDGE_RETRIEVAL: &str = "knowledge_retrieval";
pub const DOMAIN_BREAKDOWN: &str = "domain_breakdown";
pub const PRODUCT_TYPE_ANALYSIS: &str = "product_type_analysis";
pub const SCHEMA_INFERENCE: &str = "schema_inference";
pub const CONSTRUCTION: &str = "construction";
pub const LEGAL_REVIEW: &str = "legal_review";
pub const FINAL_REFINEMENT: &str = "final_refinement";

pub fn knowledge_retrieval() -> StageContract {
    StageContract::new(
        KNOWLEDGE_RETRIEVAL,
        "Summarize the baseline style rules and legal constraints that apply to this category and product type.",
    )
    .requires([
        keys::CATEGORY,
        keys::PRODUCT_TYPE,
        keys::BASELINE_GUIDELINES,
        keys::LEGAL_GUIDELINES,
    ])
    .produces(OutputField::text(keys::BASELINE_RULES_SUMMARY))
    .produces(OutputField::text(keys::LEGAL_GUIDELINES_SUMMARY))
}

pub fn domain_breakdown() -> StageContract {
    StageContract::new(
        DOMAIN_BREAKDOWN,
        "List the insights about the category that product copy must reflect.",
    )
    .requires([keys::CATEGORY, keys::BASELINE_RULES_SUMMARY])
    .accepts([keys::LEGAL_GUIDELINES_SUMMARY])
    .produces(OutputField::list(keys::CATEGORY_INSIGHTS))
}

pub fn product_type_analysis() -> StageContract {
    StageContract::new(
        PRODUCT_TYPE_ANALYSIS,
        "Analyze the product type and give per-field guidelines for its listing copy.",
    )
    .requires([keys::PRODUCT_TYPE, keys::CATEGORY_INSIGHTS])
    .accepts([keys::FIELDS_NEEDED, keys::BASELINE_RULES_SUMMARY])
    .produces(OutputField::text(keys::PRODUCT_TYPE_ANALYSIS))
    .produces(OutputField::list(keys::FIELD_GUIDELINES))
}

pub fn schema_inference() -> StageContract {
    StageContract::new(
        SCHEMA_INFERENCE,
        "Decide the output schema: which copy fields need a style guide.",
    )
    .requires([keys::PRODUCT_TYPE_ANALYSIS, keys::FIELD_GUIDELINES])
    .accepts([keys::FIELDS_NEEDED])
    .produces(OutputField::text(keys::FINAL_SCHEMA))
    .produces(OutputField::list(keys::FIELDS).non_empty())
}

pub fn construction() -> StageContract {
    StageContract::new(
        CONSTRUCTION,
        "Write the style guide for one field. When a prior draft and review feedback are given, revise the draft to address the feedback.",
    )
    .requires([
        keys::FIELD,
        keys::CATEGORY,
        keys::PRODUCT_TYPE,
        keys::BASELINE_RULES_SUMMARY,
        keys::LEGAL_GUIDELINES_SUMMARY,
        keys::PRODUCT_TYPE_ANALYSIS,
        keys::FINAL_SCHEMA,
    ])
    .accepts([
        keys::FIELD_GUIDELINES,
        keys::CATEGORY_INSIGHTS,
        keys::PRIOR_DRAFT,
        keys::REVIEW_FEEDBACK,
    ])
    .produces(OutputField::text(keys::DRAFT_STYLE_GUIDE))
}

pub fn legal_review() -> StageContract {
    StageContract::new(
        LEGAL_REVIEW,
        "Review the draft against the legal guidelines. Reply with verdict \"approved\" or \"needs_revision\" and list every issue found.",
    )
    .requires([
        keys::FIELD,
        keys::DRAFT_STYLE_GUIDE,
        keys::LEGAL_GUIDELINES_SUMMARY,
    ])
    .accepts([keys::CATEGORY, keys::PRODUCT_TYPE])
    .produces(OutputField::text(keys::VERDICT).optional())
    .produces(OutputField::list(keys::LEGAL_ISSUES_FOUND))
    .produces(OutputField::text(keys::LEGALLY_REVIEWED_GUIDE).optional())
}

pub fn final_refinement() -> StageContract {
    StageContract::new(
        FINAL_REFINEMENT,
        "Polish the reviewed draft into the final style guide without changing its meaning.",
    )
    .requires([keys::FIELD, keys::DRAFT_STYLE_GUIDE])
    .accepts([keys::REVIEW_NOTES, keys::FINAL_SCHEMA])
    .produces(OutputField::text(keys::FINAL_STYLE_GUIDE))
    .produces(OutputField::list(keys::NOTES).optional())
}

/// Field names declared by a schema inference result.
///
/// Items may be strings or objects carrying `field` or `name`. Blank names
/// are skipped, duplicates removed, first-seen order kept.
pub fn declared_fields(result: &StageResult) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for item in result.list(keys::FIELDS) {
        let name = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj
                .get("field")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str),
            _ => None,
        };
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        if !fields.iter().any(|f| f == name) {
            fields.push(name.to_string());
        }
    }
    fields
}

/// Render list items as plain strings for notes.
pub fn list_as_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Payload;
    use serde_json::json;
    use std::time::Duration;

    fn schema_result(fields: Value) -> StageResult {
        let mut output = Payload::new();
        output.insert(keys::FIELDS.into(), fields);
        StageResult {
            stage: SCHEMA_INFERENCE.into(),
            output,
            raw: String::new(),
            success: true,
            reason: None,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn declared_fields_accepts_strings_and_objects() {
        let result = schema_result(json!([
            "title",
            {"field": "shortDesc", "type": "text"},
            {"name": "longDesc"},
            " title ",
            "",
            42
        ]));
        assert_eq!(declared_fields(&result), ["title", "shortDesc", "longDesc"]);
    }

    #[test]
    fn list_items_become_note_strings() {
        let notes = list_as_strings(&[json!("  competitor name  "), json!(null), json!({"issue": "x"})]);
        assert_eq!(notes, ["competitor name", r#"{"issue":"x"}"#]);
    }

    #[test]
    fn legal_review_verdict_is_optional() {
        let out = legal_review()
            .parse_output(r#"{"legal_issues_found": []}"#)
            .expect("verdict may be omitted");
        assert!(!out.contains_key(keys::VERDICT));
    }
}
