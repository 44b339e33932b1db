//! Tool-call parameter validation and normalization.

use crate::graph::MemoryType;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("missing required parameter: {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Raw, user/LLM-supplied `create_memory` tool-call parameters.
#[derive(Debug, Clone, Default)]
pub struct CreateMemoryParams {
    pub subject: String,
    pub memory_type: String,
    pub topic: String,
    pub object: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub importance: Option<f64>,
}

/// Extracted and normalized parameters, ready for `Builder::build_memory`.
#[derive(Debug, Clone)]
pub struct ExtractedMemory {
    pub subject: String,
    pub memory_type: MemoryType,
    pub topic: String,
    pub object: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Validates tool-call parameters and normalizes memory_type, importance,
/// and attribute keys (special-casing time, place, reason, manner).
#[derive(Debug, Clone, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_from_tool_params(&self, params: CreateMemoryParams) -> Result<ExtractedMemory> {
        let subject = clean_text(&params.subject);
        if subject.is_empty() {
            return Err(ExtractError::MissingField("subject"));
        }
        if params.memory_type.trim().is_empty() {
            return Err(ExtractError::MissingField("memory_type"));
        }
        let topic = clean_text(&params.topic);
        if topic.is_empty() {
            return Err(ExtractError::MissingField("topic"));
        }

        let memory_type = MemoryType::normalize(&params.memory_type);
        let object = params.object.as_deref().map(clean_text).filter(|s| !s.is_empty());
        let attributes = process_attributes(&params.attributes);
        let importance = parse_importance(params.importance);

        Ok(ExtractedMemory {
            subject,
            memory_type,
            topic,
            object,
            attributes,
            importance,
            timestamp: Utc::now(),
        })
    }

    /// Validates `link_memories` params against the tool's schema.
    pub fn extract_link_params(
        &self,
        source_description: &str,
        target_description: &str,
        relation_type: &str,
        importance: Option<f64>,
    ) -> Result<(String, String, String, f32)> {
        let source = clean_text(source_description);
        let target = clean_text(target_description);
        let relation = clean_text(relation_type);
        if source.is_empty() {
            return Err(ExtractError::MissingField("source_memory_description"));
        }
        if target.is_empty() {
            return Err(ExtractError::MissingField("target_memory_description"));
        }
        if relation.is_empty() {
            return Err(ExtractError::MissingField("relation_type"));
        }
        Ok((source, target, relation, parse_importance(importance.or(Some(0.6)))))
    }
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_importance(value: Option<f64>) -> f32 {
    value.map(|v| v.clamp(0.0, 1.0) as f32).unwrap_or(0.5)
}

/// Special-cases time/place/reason/manner attribute keys (Chinese and
/// English spellings), normalizing them to a canonical key.
fn process_attributes(attrs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in attrs {
        let canonical = canonical_attribute_key(key.trim());
        out.insert(canonical, clean_text(value));
    }
    out
}

fn canonical_attribute_key(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "时间" | "time" | "when" => "时间".to_string(),
        "地点" | "place" | "where" | "位置" => "地点".to_string(),
        "原因" | "reason" | "why" | "因为" => "原因".to_string(),
        "方式" | "how" | "manner" => "方式".to_string(),
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_required_fields() {
        let extractor = Extractor::new();
        let params = CreateMemoryParams {
            subject: "".to_string(),
            memory_type: "FACT".to_string(),
            topic: "lives_in".to_string(),
            ..Default::default()
        };
        assert!(extractor.extract_from_tool_params(params).is_err());
    }

    #[test]
    fn normalizes_chinese_memory_type_and_clamps_importance() {
        let extractor = Extractor::new();
        let params = CreateMemoryParams {
            subject: "Alice".to_string(),
            memory_type: "事实".to_string(),
            topic: "lives_in".to_string(),
            importance: Some(5.0),
            ..Default::default()
        };
        let extracted = extractor.extract_from_tool_params(params).unwrap();
        assert_eq!(extracted.memory_type, MemoryType::Fact);
        assert_eq!(extracted.importance, 1.0);
    }

    #[test]
    fn special_cases_time_and_place_attribute_keys() {
        let mut attrs = BTreeMap::new();
        attrs.insert("when".to_string(), "today".to_string());
        attrs.insert("where".to_string(), "  home  ".to_string());
        let out = process_attributes(&attrs);
        assert_eq!(out.get("时间").unwrap(), "today");
        assert_eq!(out.get("地点").unwrap(), "home");
    }

    #[test]
    fn missing_importance_defaults_to_half() {
        assert_eq!(parse_importance(None), 0.5);
    }
}
