//! The graph extractor (spec §4.7): per-`TextUnit` LLM extraction of raw
//! entity/relationship records, merged across the corpus. Generalizes the
//! teacher's `LLMEnrichmentResult`/`prepare_llm_request` strict
//! `ResponseFormat::JsonSchema` idiom from per-document to per-`TextUnit`.
use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use common::graph::normalize_title;
use common::llm::{ChatModel, ChatParams};
use common::model::{Entity, Relationship, TextUnit};
use common::prompts;
use common::table::Table;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Deserialize, Default)]
struct RawEntity {
    title: String,
    #[serde(rename = "type")]
    entity_type: String,
    description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawRelationship {
    source: String,
    target: String,
    description: String,
    #[serde(default = "default_weight")]
    weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionMetrics {
    pub llm_calls: u32,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    /// Text units whose extraction call or JSON parse failed; recorded and
    /// skipped rather than aborting the workflow (spec §4.7/§7 `ParseFailed`).
    pub failed_chunks: u32,
}

pub struct ExtractionOutput {
    pub entities: Table<Entity>,
    pub relationships: Table<Relationship>,
    /// Raw (unsummarized) description lists per row id, consumed by the
    /// description summarizer (spec §4.8) before it overwrites `description`
    /// with a single merged string.
    pub entity_descriptions: HashMap<String, Vec<String>>,
    pub relationship_descriptions: HashMap<String, Vec<String>>,
    pub metrics: ExtractionMetrics,
}

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "type": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["title", "type", "description"]
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": {"type": "string"},
                        "target": {"type": "string"},
                        "description": {"type": "string"},
                        "weight": {"type": "number"}
                    },
                    "required": ["source", "target", "description"]
                }
            }
        },
        "required": ["entities", "relationships"]
    })
}

#[instrument(skip_all, fields(text_unit_id = %text_unit.id))]
async fn extract_one(
    chat_model: &dyn ChatModel,
    entity_types: &[String],
    prompt_template: &str,
    text_unit: &TextUnit,
) -> Result<RawExtraction, AppError> {
    let types_joined = entity_types.join(", ");
    let mut vars = HashMap::new();
    vars.insert("input_text", text_unit.text.as_str());
    vars.insert("entity_types", types_joined.as_str());
    let prompt = prompts::render(prompt_template, &vars);
    let params = ChatParams {
        temperature: Some(0.0),
        json_schema: Some(("graph_extraction".to_string(), extraction_schema())),
    };
    let response = chat_model.chat(&prompt, &[], &params).await?;
    serde_json::from_str(&response.content).map_err(|e| AppError::ParseFailed {
        row: text_unit.id.clone(),
        reason: e.to_string(),
    })
}

/// Extract and merge entities/relationships over every text unit. Fails with
/// `ExtractionFailed` only if the corpus-wide merged entity table ends up
/// empty while the input was non-empty; individual chunk failures are
/// counted and skipped.
pub async fn extract_graph(
    text_units: &Table<TextUnit>,
    chat_model: Arc<dyn ChatModel>,
    entity_types: &[String],
    prompt_template: &str,
    concurrency: usize,
) -> Result<ExtractionOutput, AppError> {
    let results: Vec<(String, Result<RawExtraction, AppError>)> = stream::iter(text_units.rows())
        .map(|text_unit| {
            let chat_model = Arc::clone(&chat_model);
            let prompt_template = prompt_template.to_string();
            let entity_types = entity_types.to_vec();
            let text_unit_id = text_unit.id.clone();
            async move {
                let outcome = extract_one(chat_model.as_ref(), &entity_types, &prompt_template, text_unit).await;
                (text_unit_id, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut metrics = ExtractionMetrics::default();
    let mut entity_groups: HashMap<(String, String), EntityAccum> = HashMap::new();
    let mut relationship_groups: HashMap<(String, String), RelationshipAccum> = HashMap::new();

    for (text_unit_id, outcome) in results {
        metrics.llm_calls += 1;
        let extraction = match outcome {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(text_unit_id, error = %err, "graph extraction failed for text unit, skipping");
                metrics.failed_chunks += 1;
                continue;
            }
        };

        for raw in extraction.entities {
            let title = normalize_title(&raw.title);
            let key = (title.clone(), raw.entity_type.clone());
            let accum = entity_groups.entry(key).or_insert_with(|| EntityAccum {
                title,
                entity_type: raw.entity_type.clone(),
                descriptions: Vec::new(),
                text_unit_ids: Vec::new(),
            });
            accum.descriptions.push(raw.description);
            accum.text_unit_ids.push(text_unit_id.clone());
        }

        for raw in extraction.relationships {
            let source = normalize_title(&raw.source);
            let target = normalize_title(&raw.target);
            let key = (source.clone(), target.clone());
            let accum = relationship_groups.entry(key).or_insert_with(|| RelationshipAccum {
                source,
                target,
                descriptions: Vec::new(),
                text_unit_ids: Vec::new(),
                weight: 0.0,
            });
            accum.descriptions.push(raw.description);
            accum.text_unit_ids.push(text_unit_id.clone());
            accum.weight += raw.weight;
        }
    }

    let mut entities = Table::new(Vec::new());
    let mut entity_descriptions = HashMap::new();
    let mut next_entity_hrid: u64 = 0;
    for (_, accum) in entity_groups {
        let mut entity = Entity::new(accum.title, accum.entity_type, next_entity_hrid);
        next_entity_hrid += 1;
        entity.description = accum.descriptions.join("; ");
        entity.frequency = accum.text_unit_ids.len() as u32;
        entity.text_unit_ids = accum.text_unit_ids;
        entity_descriptions.insert(entity.id.clone(), accum.descriptions);
        entities.push(entity);
    }

    if entities.is_empty() && !text_units.is_empty() {
        return Err(AppError::ExtractionFailed(
            "no entities were extracted from a non-empty text unit corpus".to_string(),
        ));
    }

    let degree: HashMap<String, u32> = {
        let mut degree: HashMap<String, u32> = HashMap::new();
        for accum in relationship_groups.values() {
            *degree.entry(accum.source.clone()).or_insert(0) += 1;
            *degree.entry(accum.target.clone()).or_insert(0) += 1;
        }
        degree
    };

    let mut relationships = Table::new(Vec::new());
    let mut relationship_descriptions = HashMap::new();
    let mut next_relationship_hrid: u64 = 0;
    for (_, accum) in relationship_groups {
        let mut relationship = Relationship::new(accum.source.clone(), accum.target.clone(), next_relationship_hrid);
        next_relationship_hrid += 1;
        relationship.description = accum.descriptions.join("; ");
        relationship.weight = accum.weight;
        relationship.text_unit_ids = accum.text_unit_ids;
        relationship.combined_degree =
            degree.get(&accum.source).copied().unwrap_or(0) + degree.get(&accum.target).copied().unwrap_or(0);
        relationship_descriptions.insert(relationship.id.clone(), accum.descriptions);
        relationships.push(relationship);
    }

    let mut entities_with_degree = Table::new(Vec::new());
    for mut entity in entities.into_rows() {
        entity.degree = degree.get(&entity.title).copied().unwrap_or(0);
        entities_with_degree.push(entity);
    }

    entities_with_degree.sort_by_id();
    relationships.sort_by_id();

    Ok(ExtractionOutput {
        entities: entities_with_degree,
        relationships,
        entity_descriptions,
        relationship_descriptions,
        metrics,
    })
}

struct EntityAccum {
    title: String,
    entity_type: String,
    descriptions: Vec<String>,
    text_unit_ids: Vec<String>,
}

struct RelationshipAccum {
    source: String,
    target: String,
    descriptions: Vec<String>,
    text_unit_ids: Vec<String>,
    weight: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::MockChatModel;

    fn text_unit(text: &str, hrid: u64) -> TextUnit {
        TextUnit::new(text.to_string(), 10, vec!["doc1".to_string()], hrid)
    }

    #[tokio::test]
    async fn merges_duplicate_entities_across_text_units() {
        let response = serde_json::json!({
            "entities": [{"title": "Acme", "type": "organization", "description": "maker of X"}],
            "relationships": []
        })
        .to_string();
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(response));
        let text_units = Table::new(vec![text_unit("chunk one", 0), text_unit("chunk two", 1)]);
        let output = extract_graph(&text_units, chat_model, &["organization".to_string()], "{input_text}", 4)
            .await
            .unwrap();
        assert_eq!(output.entities.len(), 1);
        let entity = &output.entities.rows()[0];
        assert_eq!(entity.title, "ACME");
        assert_eq!(entity.frequency, 2);
        assert_eq!(entity.text_unit_ids.len(), 2);
    }

    #[tokio::test]
    async fn empty_corpus_wide_extraction_is_fatal() {
        let response = serde_json::json!({"entities": [], "relationships": []}).to_string();
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(response));
        let text_units = Table::new(vec![text_unit("chunk one", 0)]);
        let err = extract_graph(&text_units, chat_model, &[], "{input_text}", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn unparseable_chunks_are_skipped_and_counted() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed("not json".to_string()));
        let text_units = Table::new(vec![text_unit("chunk one", 0)]);
        let err = extract_graph(&text_units, chat_model, &[], "{input_text}", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }
}
