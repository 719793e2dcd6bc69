//! The description summarizer (spec §4.8): merges a multi-valued description
//! list into one string via the chat model, cached so re-running over
//! unchanged inputs is a no-op call (the embedding-cache-check idiom in the
//! teacher's `DefaultPipelineServices`).
use std::collections::HashMap;
use std::sync::Arc;

use common::cache::PipelineCache;
use common::error::AppError;
use common::llm::{ChatModel, ChatParams};
use common::model::{Entity, Relationship};
use common::table::Table;
use futures::stream::{self, StreamExt};
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizationMetrics {
    pub llm_calls: u32,
    pub cache_hits: u32,
}

fn summarization_prompt(descriptions: &[String], max_length: usize) -> String {
    format!(
        "Summarize the following descriptions of the same entity into one coherent description of at most {max_length} tokens:\n{}",
        descriptions.join("\n")
    )
}

#[instrument(skip_all)]
async fn summarize_one(
    chat_model: &dyn ChatModel,
    cache: &dyn PipelineCache,
    descriptions: &[String],
    max_length: usize,
) -> Result<(String, bool), AppError> {
    let prompt = summarization_prompt(descriptions, max_length);
    let cache_key = common::cache::llm_cache_key("summarization", &max_length.to_string(), &prompt);
    if let Some(cached) = cache.get(&cache_key).await? {
        let text = String::from_utf8(cached).map_err(|e| AppError::Internal(e.to_string()))?;
        return Ok((text, true));
    }
    let params = ChatParams {
        temperature: Some(0.0),
        json_schema: None,
    };
    let response = chat_model.chat(&prompt, &[], &params).await?;
    cache.set(&cache_key, response.content.clone().into_bytes()).await?;
    Ok((response.content, false))
}

/// Summarize every entity/relationship description list with ≥2 entries in
/// place. Lists with a single entry are left as the raw description
/// `extract_graph` already joined.
pub async fn summarize_descriptions(
    entities: &mut Table<Entity>,
    relationships: &mut Table<Relationship>,
    entity_descriptions: &HashMap<String, Vec<String>>,
    relationship_descriptions: &HashMap<String, Vec<String>>,
    chat_model: Arc<dyn ChatModel>,
    cache: Arc<dyn PipelineCache>,
    max_length: usize,
    concurrency: usize,
) -> Result<SummarizationMetrics, AppError> {
    let mut metrics = SummarizationMetrics::default();

    let entity_ids_to_summarize: Vec<String> = entity_descriptions
        .iter()
        .filter(|(_, descriptions)| descriptions.len() >= 2)
        .map(|(id, _)| id.clone())
        .collect();
    let entity_summaries: Vec<(String, Result<(String, bool), AppError>)> = stream::iter(entity_ids_to_summarize)
        .map(|id| {
            let chat_model = Arc::clone(&chat_model);
            let cache = Arc::clone(&cache);
            let descriptions = entity_descriptions[&id].clone();
            async move {
                let outcome = summarize_one(chat_model.as_ref(), cache.as_ref(), &descriptions, max_length).await;
                (id, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut entity_summary_map = HashMap::new();
    for (id, outcome) in entity_summaries {
        let (summary, cache_hit) = outcome?;
        metrics.llm_calls += 1;
        if cache_hit {
            metrics.cache_hits += 1;
        }
        entity_summary_map.insert(id, summary);
    }

    let mut updated_entities = Table::new(Vec::new());
    for mut entity in std::mem::replace(entities, Table::new(Vec::new())).into_rows() {
        if let Some(summary) = entity_summary_map.remove(&entity.id) {
            entity.description = summary;
        }
        updated_entities.push(entity);
    }
    *entities = updated_entities;

    let relationship_ids_to_summarize: Vec<String> = relationship_descriptions
        .iter()
        .filter(|(_, descriptions)| descriptions.len() >= 2)
        .map(|(id, _)| id.clone())
        .collect();
    let relationship_summaries: Vec<(String, Result<(String, bool), AppError>)> =
        stream::iter(relationship_ids_to_summarize)
            .map(|id| {
                let chat_model = Arc::clone(&chat_model);
                let cache = Arc::clone(&cache);
                let descriptions = relationship_descriptions[&id].clone();
                async move {
                    let outcome =
                        summarize_one(chat_model.as_ref(), cache.as_ref(), &descriptions, max_length).await;
                    (id, outcome)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let mut relationship_summary_map = HashMap::new();
    for (id, outcome) in relationship_summaries {
        let (summary, cache_hit) = outcome?;
        metrics.llm_calls += 1;
        if cache_hit {
            metrics.cache_hits += 1;
        }
        relationship_summary_map.insert(id, summary);
    }

    let mut updated_relationships = Table::new(Vec::new());
    for mut relationship in std::mem::replace(relationships, Table::new(Vec::new())).into_rows() {
        if let Some(summary) = relationship_summary_map.remove(&relationship.id) {
            relationship.description = summary;
        }
        updated_relationships.push(relationship);
    }
    *relationships = updated_relationships;

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cache::MemoryCache;
    use common::llm::mock::MockChatModel;

    #[tokio::test]
    async fn merges_multi_valued_descriptions() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed("maker of X; based in Y".to_string()));
        let cache: Arc<dyn PipelineCache> = Arc::new(MemoryCache::new());

        let mut entity = Entity::new("ACME".to_string(), "organization".to_string(), 0);
        entity.description = "maker of X; based in Y".to_string();
        let mut entities = Table::new(vec![entity.clone()]);
        let mut relationships: Table<Relationship> = Table::new(Vec::new());

        let mut entity_descriptions = HashMap::new();
        entity_descriptions.insert(
            entity.id.clone(),
            vec!["maker of X".to_string(), "based in Y".to_string()],
        );

        let metrics = summarize_descriptions(
            &mut entities,
            &mut relationships,
            &entity_descriptions,
            &HashMap::new(),
            chat_model,
            cache,
            200,
            4,
        )
        .await
        .unwrap();

        assert_eq!(metrics.llm_calls, 1);
        assert_eq!(entities.rows()[0].description, "maker of X; based in Y");
    }

    #[tokio::test]
    async fn single_description_is_left_untouched() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed("unused".to_string()));
        let cache: Arc<dyn PipelineCache> = Arc::new(MemoryCache::new());

        let mut entity = Entity::new("ACME".to_string(), "organization".to_string(), 0);
        entity.description = "only one description".to_string();
        let mut entities = Table::new(vec![entity.clone()]);
        let mut relationships: Table<Relationship> = Table::new(Vec::new());

        let mut entity_descriptions = HashMap::new();
        entity_descriptions.insert(entity.id.clone(), vec!["only one description".to_string()]);

        let metrics = summarize_descriptions(
            &mut entities,
            &mut relationships,
            &entity_descriptions,
            &HashMap::new(),
            chat_model,
            cache,
            200,
            4,
        )
        .await
        .unwrap();

        assert_eq!(metrics.llm_calls, 0);
        assert_eq!(entities.rows()[0].description, "only one description");
    }

    #[tokio::test]
    async fn repeated_call_hits_cache() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed("merged".to_string()));
        let cache: Arc<dyn PipelineCache> = Arc::new(MemoryCache::new());

        let entity = Entity::new("ACME".to_string(), "organization".to_string(), 0);
        let mut entity_descriptions = HashMap::new();
        entity_descriptions.insert(entity.id.clone(), vec!["a".to_string(), "b".to_string()]);

        let mut entities = Table::new(vec![entity.clone()]);
        let mut relationships: Table<Relationship> = Table::new(Vec::new());
        let first = summarize_descriptions(
            &mut entities,
            &mut relationships,
            &entity_descriptions,
            &HashMap::new(),
            Arc::clone(&chat_model),
            Arc::clone(&cache),
            200,
            4,
        )
        .await
        .unwrap();
        assert_eq!(first.cache_hits, 0);

        let mut entities2 = Table::new(vec![entity]);
        let second = summarize_descriptions(
            &mut entities2,
            &mut Table::new(Vec::new()),
            &entity_descriptions,
            &HashMap::new(),
            chat_model,
            cache,
            200,
            4,
        )
        .await
        .unwrap();
        assert_eq!(second.cache_hits, 1);
    }
}
