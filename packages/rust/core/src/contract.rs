//! Stage contracts: declared inputs and the output schema a response must
//! satisfy.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::capability::Payload;

/// Shape of one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    List,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::List => "list",
        }
    }
}

/// One named field of a stage's output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Lists only: reject an empty array.
    pub non_empty: bool,
}

impl OutputField {
    /// A required text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
            required: true,
            non_empty: false,
        }
    }

    /// A required list field (may be empty unless [`Self::non_empty`]).
    pub fn list(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::List,
            required: true,
            non_empty: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    fn check(&self, value: Option<&Value>) -> Result<Option<Value>, String> {
        let value = match value {
            None | Some(Value::Null) if self.required => {
                return Err(format!("missing output field '{}'", self.name));
            }
            None | Some(Value::Null) => return Ok(None),
            Some(v) => v,
        };

        match (self.kind, value) {
            (FieldKind::Text, Value::String(s)) => {
                if self.required && s.trim().is_empty() {
                    return Err(format!("output field '{}' is empty", self.name));
                }
                Ok(Some(value.clone()))
            }
            (FieldKind::List, Value::Array(items)) => {
                if self.non_empty && items.is_empty() {
                    return Err(format!("output field '{}' must not be empty", self.name));
                }
                Ok(Some(value.clone()))
            }
            (kind, other) => Err(format!(
                "output field '{}' should be {}, got {}",
                self.name,
                kind.as_str(),
                json_type(other)
            )),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Static description of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContract {
    name: String,
    description: String,
    required_inputs: Vec<String>,
    optional_inputs: Vec<String>,
    outputs: Vec<OutputField>,
}

impl StageContract {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_inputs: Vec::new(),
            optional_inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add required input keys.
    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Add optional input keys, forwarded when present.
    pub fn accepts<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_inputs.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn produces(mut self, field: OutputField) -> Self {
        self.outputs.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn required_inputs(&self) -> &[String] {
        &self.required_inputs
    }

    pub fn optional_inputs(&self) -> &[String] {
        &self.optional_inputs
    }

    pub fn outputs(&self) -> &[OutputField] {
        &self.outputs
    }

    pub fn output_keys(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|f| f.name.as_str())
    }

    /// Required keys absent from `input`.
    pub fn missing_inputs(&self, input: &Payload) -> Vec<&str> {
        self.required_inputs
            .iter()
            .filter(|k| !input.contains_key(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// The slice of `input` this stage is allowed to see.
    pub fn select_inputs(&self, input: &Payload) -> Payload {
        self.required_inputs
            .iter()
            .chain(self.optional_inputs.iter())
            .filter_map(|k| input.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Parse raw response text against the output schema.
    ///
    /// Returns the validated fields (non-schema keys dropped) or a reason.
    pub fn parse_output(&self, raw: &str) -> Result<Payload, String> {
        let json = extract_json(raw).ok_or_else(|| "no JSON object in response".to_string())?;
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("invalid JSON in response: {e}"))?;
        let Value::Object(object) = value else {
            return Err(format!("response is a JSON {}, not an object", json_type(&value)));
        };

        let mut output = Payload::new();
        for field in &self.outputs {
            if let Some(v) = field.check(object.get(&field.name))? {
                output.insert(field.name.clone(), v);
            }
        }
        Ok(output)
    }
}

/// Locate the JSON object inside a model response.
///
/// The first fenced ```` ```json ```` block that parses wins; otherwise the
/// outermost `{...}` span.
pub fn extract_json(raw: &str) -> Option<&str> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex")
    });

    let fenced = FENCE_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|block| serde_json::from_str::<Value>(block).is_ok());
    if fenced.is_some() {
        return fenced;
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_contract() -> StageContract {
        StageContract::new("schema_inference", "Infer the output schema")
            .requires(["product_type_analysis"])
            .accepts(["fields_needed"])
            .produces(OutputField::text("final_schema"))
            .produces(OutputField::list("fields").non_empty())
            .produces(OutputField::list("notes").optional())
    }

    #[test]
    fn extract_takes_first_valid_fenced_block() {
        let raw = "```json\n{\"a\": 1}\n```\nor alternatively\n```json\n{\"a\": 2}\n```";
        assert_eq!(extract_json(raw), Some("{\"a\": 1}"));

        let raw = "```json\n{broken}\n```\n```json\n{\"nested\": {\"b\": 2}}\n```";
        assert_eq!(extract_json(raw), Some("{\"nested\": {\"b\": 2}}"));
    }

    #[test]
    fn extract_prefers_fenced_block() {
        let raw = "Here you go {not this}\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(extract_json(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_falls_back_to_outer_braces() {
        let raw = "Sure! {\"a\": {\"b\": 2}} hope that helps";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 2}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn parse_validates_and_drops_extra_keys() {
        let raw = r#"{"final_schema": "title, shortDesc", "fields": ["title"], "chatter": "x"}"#;
        let out = schema_contract().parse_output(raw).expect("valid output");
        assert_eq!(out.len(), 2);
        assert_eq!(out["fields"], json!(["title"]));
        assert!(!out.contains_key("chatter"));
        assert!(!out.contains_key("notes"));
    }

    #[test]
    fn parse_rejects_missing_required_field() {
        let err = schema_contract()
            .parse_output(r#"{"fields": ["title"]}"#)
            .unwrap_err();
        assert_eq!(err, "missing output field 'final_schema'");
    }

    #[test]
    fn parse_rejects_empty_non_empty_list() {
        let err = schema_contract()
            .parse_output(r#"{"final_schema": "s", "fields": []}"#)
            .unwrap_err();
        assert!(err.contains("must not be empty"));
    }

    #[test]
    fn parse_rejects_kind_mismatch() {
        let err = schema_contract()
            .parse_output(r#"{"final_schema": "s", "fields": "title"}"#)
            .unwrap_err();
        assert_eq!(err, "output field 'fields' should be list, got string");
    }

    #[test]
    fn parse_rejects_non_object_and_garbage() {
        assert!(schema_contract().parse_output("[1, 2]").is_err());
        assert!(schema_contract().parse_output("{oops").is_err());
        assert!(schema_contract().parse_output("").is_err());
    }

    #[test]
    fn optional_null_is_treated_as_absent() {
        let raw = r#"{"final_schema": "s", "fields": ["title"], "notes": null}"#;
        let out = schema_contract().parse_output(raw).expect("valid output");
        assert!(!out.contains_key("notes"));
    }

    #[test]
    fn input_selection_and_missing_keys() {
        let contract = schema_contract();
        let mut input = Payload::new();
        input.insert("category".into(), json!("Fashion"));
        assert_eq!(contract.missing_inputs(&input), ["product_type_analysis"]);

        input.insert("product_type_analysis".into(), json!("analysis"));
        input.insert("fields_needed".into(), json!(["title"]));
        let selected = contract.select_inputs(&input);
        assert_eq!(selected.len(), 2);
        assert!(!selected.contains_key("category"));
        assert!(contract.missing_inputs(&input).is_empty());
    }
}
