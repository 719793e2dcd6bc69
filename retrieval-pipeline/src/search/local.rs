//! Local search (spec §4.14): entity-anchored retrieval. Generalizes the
//! teacher's `InitialStrategyDriver` stage chain
//! (Embed→CollectCandidates→GraphExpansion→ChunkAttach→Rerank→AssembleEntities,
//! `pipeline/strategies.rs`/`pipeline/stages/mod.rs`) onto the new
//! `Entity`/`Relationship`/`TextUnit`/`CommunityReport` tables and the
//! `BaseVectorStore`/`ChatModel` traits, in place of `KnowledgeEntity`/SurrealDB.
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use common::config::SearchConfig;
use common::error::AppError;
use common::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};
use common::model::{Community, CommunityReport, Entity, Relationship, TextUnit};
use common::search::{OnContext, ResponseStream, SearchContext, SearchMetrics, SearchResult};
use common::table::Table;
use common::vector_store::BaseVectorStore;
use tracing::instrument;

use crate::graph::find_related_entities;
use crate::scoring::{fuse_scores, merge_scored_by_id, min_max_normalize, sort_by_fused_desc, FusionWeights, Scored};
use crate::search::{pack_budget, section_budgets};

/// Everything local search reads from a run's output, borrowed for one query.
pub struct LocalSearchInput<'a> {
    pub entities: &'a Table<Entity>,
    pub relationships: &'a Table<Relationship>,
    pub text_units: &'a Table<TextUnit>,
    pub communities: &'a Table<Community>,
    pub community_reports: &'a Table<CommunityReport>,
}

struct AssembledContext {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    text_units: Vec<TextUnit>,
    reports: Vec<CommunityReport>,
}

/// Map query → candidate entities via the entity vector store, oversampled
/// by `entity_oversample_factor`, excluding `exclude` and unioned with the
/// explicit `include` ids (spec §4.14 local search). Each candidate carries
/// its min-max-normalized vector similarity as a fusable score.
async fn collect_candidate_entities(
    entities: &Table<Entity>,
    query: &str,
    entity_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    config: &SearchConfig,
    exclude: &HashSet<String>,
    include: &[String],
) -> Result<Vec<Scored<Entity>>, AppError> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let oversampled_k = ((config.top_k_entities as f32) * config.entity_oversample_factor).ceil() as usize;
    let hits = entity_vector_store.similarity_search_by_text(query, embedding_model, oversampled_k.max(1)).await?;

    let entity_by_id: HashMap<&str, &Entity> = entities.rows().iter().map(|e| (e.id.as_str(), e)).collect();

    let raw_scores: Vec<f32> = hits.iter().map(|hit| hit.score).collect();
    let normalized = min_max_normalize(&raw_scores);

    let mut seen: HashSet<String> = HashSet::new();
    let mut selected: Vec<Scored<Entity>> = Vec::new();
    for (hit, score) in hits.into_iter().zip(normalized) {
        if exclude.contains(&hit.document.id) {
            continue;
        }
        if let Some(entity) = entity_by_id.get(hit.document.id.as_str()) {
            if seen.insert(entity.id.clone()) {
                selected.push(Scored::new((*entity).clone()).with_vector_score(score));
            }
        }
        if selected.len() >= config.top_k_entities {
            break;
        }
    }

    for id in include {
        if let Some(entity) = entity_by_id.get(id.as_str()) {
            if seen.insert(entity.id.clone()) {
                selected.push(Scored::new((*entity).clone()).with_vector_score(1.0));
            }
        }
    }

    Ok(selected)
}

/// Expand the candidate set via the relationship graph, ranked by entity
/// `degree` (spec §4.14 "ranked by entity rank"). Each neighbor carries its
/// min-max-normalized degree as a fusable graph score.
fn expand_via_graph(
    entities: &Table<Entity>,
    relationships: &Table<Relationship>,
    seeds: &[Entity],
    limit_per_seed: usize,
) -> Vec<Scored<Entity>> {
    let mut seen: HashSet<String> = seeds.iter().map(|e| e.id.clone()).collect();
    let mut expanded: Vec<Entity> = Vec::new();
    for seed in seeds {
        for neighbor in find_related_entities(relationships, entities, &seed.title, limit_per_seed) {
            if seen.insert(neighbor.id.clone()) {
                expanded.push(neighbor);
            }
        }
    }
    expanded.sort_by(|a, b| b.degree.cmp(&a.degree));

    let raw_scores: Vec<f32> = expanded.iter().map(|e| e.degree as f32).collect();
    let normalized = min_max_normalize(&raw_scores);
    expanded
        .into_iter()
        .zip(normalized)
        .map(|(entity, score)| Scored::new(entity).with_graph_score(score))
        .collect()
}

/// Assemble entities | relationships | text units | community summaries,
/// each capped by `top_k_*` (spec §4.14).
fn assemble_context(input: &LocalSearchInput<'_>, entities: Vec<Entity>, config: &SearchConfig) -> AssembledContext {
    let titles: HashSet<String> = entities.iter().map(|e| e.title.clone()).collect();
    let entity_ids: HashSet<String> = entities.iter().map(|e| e.id.clone()).collect();

    let mut relationships: Vec<Relationship> = input
        .relationships
        .rows()
        .iter()
        .filter(|r| titles.contains(&r.source) && titles.contains(&r.target))
        .cloned()
        .collect();
    relationships.sort_by(|a, b| b.combined_degree.cmp(&a.combined_degree));
    relationships.truncate(config.top_k_relationships);

    let mut text_unit_ids: Vec<String> = Vec::new();
    let mut seen_tu: HashSet<String> = HashSet::new();
    for entity in &entities {
        for id in &entity.text_unit_ids {
            if seen_tu.insert(id.clone()) {
                text_unit_ids.push(id.clone());
            }
        }
    }
    let text_unit_by_id: HashMap<&str, &TextUnit> = input.text_units.rows().iter().map(|t| (t.id.as_str(), t)).collect();
    let text_units: Vec<TextUnit> =
        text_unit_ids.into_iter().filter_map(|id| text_unit_by_id.get(id.as_str()).map(|t| (*t).clone())).take(config.top_k_text_units).collect();

    let mut reports: Vec<CommunityReport> = input
        .communities
        .rows()
        .iter()
        .filter(|c| c.entity_ids.iter().any(|id| entity_ids.contains(id)))
        .filter_map(|c| input.community_reports.rows().iter().find(|r| r.community == c.community).cloned())
        .collect();
    reports.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(Ordering::Equal));
    reports.dedup_by(|a, b| a.id == b.id);
    reports.truncate(config.top_k_communities);

    AssembledContext { entities, relationships, text_units, reports }
}

fn render_context(assembled: &AssembledContext, config: &SearchConfig) -> SearchContext {
    let budgets = section_budgets(config);

    let entity_lines: Vec<String> =
        assembled.entities.iter().map(|e| format!("Entity: {} ({}) — {}", e.title, e.entity_type, e.description)).collect();
    let relationship_lines: Vec<String> = assembled
        .relationships
        .iter()
        .map(|r| format!("Relationship: {} -> {} — {}", r.source, r.target, r.description))
        .collect();
    let text_unit_lines: Vec<String> = assembled.text_units.iter().map(|t| format!("Source: {}", t.text)).collect();
    let report_lines: Vec<String> = assembled.reports.iter().map(|r| format!("Community '{}': {}", r.title, r.summary)).collect();

    let mut context_chunks = Vec::new();
    context_chunks.extend(pack_budget(&entity_lines, budgets.entities));
    context_chunks.extend(pack_budget(&relationship_lines, budgets.relationships));
    context_chunks.extend(pack_budget(&text_unit_lines, budgets.text_units));
    context_chunks.extend(pack_budget(&report_lines, budgets.communities));

    let context_records = serde_json::json!({
        "entities": assembled.entities,
        "relationships": assembled.relationships,
        "text_units": assembled.text_units,
        "community_reports": assembled.reports,
    });

    SearchContext { context_chunks, context_records }
}

fn build_prompt(query: &str, context: &SearchContext) -> String {
    format!(
        "Answer the question using only the context below.\n\nContext:\n{}\n\nQuestion:\n{}",
        context.context_chunks.join("\n"),
        query
    )
}

async fn build_context(
    input: &LocalSearchInput<'_>,
    query: &str,
    entity_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    config: &SearchConfig,
    exclude: &HashSet<String>,
    include: &[String],
) -> Result<SearchContext, AppError> {
    let seeds = collect_candidate_entities(input.entities, query, entity_vector_store, embedding_model, config, exclude, include).await?;
    let seed_entities: Vec<Entity> = seeds.iter().map(|s| s.item.clone()).collect();
    let expanded = expand_via_graph(input.entities, input.relationships, &seed_entities, 5);

    let mut by_id: HashMap<String, Scored<Entity>> = HashMap::new();
    merge_scored_by_id(&mut by_id, seeds);
    merge_scored_by_id(&mut by_id, expanded);

    let weights = FusionWeights::default();
    let mut fused: Vec<Scored<Entity>> = by_id
        .into_values()
        .map(|mut scored| {
            scored.fused = fuse_scores(&scored.scores, weights);
            scored
        })
        .collect();
    sort_by_fused_desc(&mut fused);
    fused.truncate(config.top_k_entities);
    let merged: Vec<Entity> = fused.into_iter().map(|s| s.item).collect();

    let assembled = assemble_context(input, merged, config);
    Ok(render_context(&assembled, config))
}

/// Local search (spec §4.14): run the full pipeline and return the final
/// answer plus the context that grounded it.
#[instrument(skip_all)]
pub async fn search(
    query: &str,
    history: &[ChatMessage],
    input: &LocalSearchInput<'_>,
    entity_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    chat_model: &dyn ChatModel,
    config: &SearchConfig,
    exclude: &HashSet<String>,
    include: &[String],
) -> Result<SearchResult, AppError> {
    let start = Instant::now();
    let context = build_context(input, query, entity_vector_store, embedding_model, config, exclude, include).await?;
    let prompt = build_prompt(query, &context);
    let response = chat_model.chat(&prompt, history, &ChatParams { temperature: Some(0.2), json_schema: None }).await?;

    Ok(SearchResult {
        response: response.content,
        context,
        completion_time_secs: start.elapsed().as_secs_f64(),
        metrics: SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens },
    })
}

/// Streaming variant: invokes `on_context` exactly once, as soon as context
/// assembly finishes, then returns a stream of response deltas (spec §4.14).
#[instrument(skip_all)]
pub async fn search_stream(
    query: &str,
    history: &[ChatMessage],
    input: &LocalSearchInput<'_>,
    entity_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    chat_model: &dyn ChatModel,
    config: &SearchConfig,
    exclude: &HashSet<String>,
    include: &[String],
    on_context: OnContext,
) -> Result<ResponseStream, AppError> {
    let context = build_context(input, query, entity_vector_store, embedding_model, config, exclude, include).await?;
    let prompt = build_prompt(query, &context);
    on_context(context);
    chat_model.chat_stream(&prompt, history, &ChatParams { temperature: Some(0.2), json_schema: None }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::{MockChatModel, MockEmbeddingModel};
    use common::vector_store::hnsw::HnswVectorStore;
    use common::vector_store::VectorDocument;

    fn entity(title: &str, description: &str) -> Entity {
        let mut e = Entity::new(title.to_string(), "organization".to_string(), 0);
        e.description = description.to_string();
        e
    }

    #[tokio::test]
    async fn search_assembles_context_from_the_nearest_entity() {
        let acme = entity("ACME", "maker of widgets");
        let entities = Table::new(vec![acme.clone()]);
        let relationships: Table<Relationship> = Table::new(Vec::new());
        let text_units: Table<TextUnit> = Table::new(Vec::new());
        let communities: Table<Community> = Table::new(Vec::new());
        let community_reports: Table<CommunityReport> = Table::new(Vec::new());

        let store = HnswVectorStore::new(8);
        let embedding_model = MockEmbeddingModel::new(8);
        store
            .load_documents(
                vec![VectorDocument { id: acme.id.clone(), text: Some(acme.description.clone()), vector: vec![0.0; 8], attributes: serde_json::json!({}) }],
                true,
            )
            .await
            .unwrap();

        let input = LocalSearchInput { entities: &entities, relationships: &relationships, text_units: &text_units, communities: &communities, community_reports: &community_reports };
        let chat_model = MockChatModel::fixed("ACME makes widgets.".to_string());
        let config = SearchConfig::default();

        let result = search(
            "who makes widgets?",
            &[],
            &input,
            &store,
            &embedding_model,
            &chat_model,
            &config,
            &HashSet::new(),
            &[],
        )
        .await
        .unwrap();

        assert_eq!(result.response, "ACME makes widgets.");
        assert_eq!(result.metrics.llm_calls, 1);
        assert!(result.context.context_chunks.iter().any(|line| line.contains("ACME")));
    }

    #[tokio::test]
    async fn excluded_entity_is_never_selected() {
        let acme = entity("ACME", "maker of widgets");
        let entities = Table::new(vec![acme.clone()]);
        let relationships: Table<Relationship> = Table::new(Vec::new());
        let text_units: Table<TextUnit> = Table::new(Vec::new());
        let communities: Table<Community> = Table::new(Vec::new());
        let community_reports: Table<CommunityReport> = Table::new(Vec::new());

        let store = HnswVectorStore::new(8);
        let embedding_model = MockEmbeddingModel::new(8);
        store
            .load_documents(
                vec![VectorDocument { id: acme.id.clone(), text: Some(acme.description.clone()), vector: vec![0.0; 8], attributes: serde_json::json!({}) }],
                true,
            )
            .await
            .unwrap();

        let input = LocalSearchInput { entities: &entities, relationships: &relationships, text_units: &text_units, communities: &communities, community_reports: &community_reports };
        let chat_model = MockChatModel::fixed("no context".to_string());
        let config = SearchConfig::default();
        let mut exclude = HashSet::new();
        exclude.insert(acme.id.clone());

        let result = search("who makes widgets?", &[], &input, &store, &embedding_model, &chat_model, &config, &exclude, &[]).await.unwrap();
        assert!(!result.context.context_chunks.iter().any(|line| line.contains("ACME")));
    }
}
