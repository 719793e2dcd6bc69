//! Drift search (spec §4.14): expand the query into follow-ups, run local
//! search per follow-up, reduce. The one place this crate depends on
//! `retrieval-pipeline` — everything upstream of the per-follow-up local
//! search call is new, since the teacher had no query-expansion stage to
//! generalize.
use std::collections::HashSet;
use std::time::Instant;

use common::config::DriftSearchConfig;
use common::error::AppError;
use common::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};
use common::search::{SearchContext, SearchMetrics, SearchResult};
use common::vector_store::BaseVectorStore;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use retrieval_pipeline::search::local::{search as local_search, LocalSearchInput};

#[derive(Debug, Deserialize)]
struct PrimerOutput {
    followups: Vec<String>,
}

fn primer_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "followups": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["followups"]
    })
}

/// Expand `query` into `drift_k_followups × primer_folds` sub-queries, one
/// chat call per fold (spec §4.14 "primer expands the query... over
/// `primer_folds` folds").
async fn run_primer(query: &str, chat_model: &dyn ChatModel, config: &DriftSearchConfig) -> Result<(Vec<String>, SearchMetrics), AppError> {
    let prompt = format!(
        "Propose {} distinct follow-up questions that would help answer the question below in more depth.\n\nQuestion: {query}",
        config.drift_k_followups
    );
    let params = ChatParams { temperature: Some(0.5), json_schema: Some(("drift_primer".to_string(), primer_schema())) };

    let mut followups = Vec::new();
    let mut metrics = SearchMetrics::default();
    for _ in 0..config.primer_folds.max(1) {
        let response = chat_model.chat(&prompt, &[], &params).await?;
        let parsed: PrimerOutput = serde_json::from_str(&response.content)
            .map_err(|e| AppError::ParseFailed { row: "drift_primer".to_string(), reason: e.to_string() })?;
        followups.extend(parsed.followups);
        metrics.add(SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens });
    }
    Ok((followups, metrics))
}

/// Drift search (spec §4.14): primer → per-follow-up local search → reduce.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub async fn search<'a>(
    query: &str,
    history: &[ChatMessage],
    local_input: &LocalSearchInput<'a>,
    entity_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    chat_model: &dyn ChatModel,
    search_config: &common::config::SearchConfig,
    drift_config: &DriftSearchConfig,
    cancellation: &CancellationToken,
) -> Result<SearchResult, AppError> {
    let start = Instant::now();
    let (followups, mut metrics) = run_primer(query, chat_model, drift_config).await?;

    let exclude = HashSet::new();
    let sub_results = stream::iter(followups.iter().enumerate())
        .map(|(index, followup)| async move {
            let result = local_search(followup, &[], local_input, entity_vector_store, embedding_model, chat_model, search_config, &exclude, &[]).await;
            (index, result)
        })
        .buffer_unordered(drift_config.concurrency.max(1));

    let mut sub_results = Box::pin(sub_results);
    let mut sub_answers: Vec<(usize, String, String)> = Vec::new();
    while let Some((index, outcome)) = sub_results.next().await {
        if cancellation.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let result = outcome?;
        metrics.add(result.metrics);
        sub_answers.push((index, followups[index].clone(), result.response));
    }
    sub_answers.sort_by_key(|(index, _, _)| *index);
    sub_answers.truncate(drift_config.n_depth.max(1));
    let sub_answers: Vec<(String, String)> = sub_answers.into_iter().map(|(_, q, a)| (q, a)).collect();

    let context_chunks: Vec<String> = sub_answers.iter().map(|(q, a)| format!("Follow-up: {q}\nAnswer: {a}")).collect();
    let context = SearchContext {
        context_chunks: context_chunks.clone(),
        context_records: serde_json::json!({ "followups": sub_answers }),
    };

    let reduce_prompt = format!(
        "Combine the follow-up answers below into one final answer to the original question.\n\nOriginal question: {query}\n\n{}",
        context_chunks.join("\n\n")
    );
    let response = chat_model.chat(&reduce_prompt, history, &ChatParams { temperature: Some(0.2), json_schema: None }).await?;
    metrics.add(SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens });

    Ok(SearchResult { response: response.content, context, completion_time_secs: start.elapsed().as_secs_f64(), metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::{MockChatModel, MockEmbeddingModel};
    use common::model::{Community, CommunityReport, Entity, Relationship, TextUnit};
    use common::table::Table;
    use common::vector_store::hnsw::HnswVectorStore;
    use common::vector_store::VectorDocument;

    #[tokio::test]
    async fn search_runs_local_per_followup_and_reduces() {
        let acme = Entity::new("ACME".to_string(), "organization".to_string(), 0);
        let entities = Table::new(vec![acme.clone()]);
        let relationships: Table<Relationship> = Table::new(Vec::new());
        let text_units: Table<TextUnit> = Table::new(Vec::new());
        let communities: Table<Community> = Table::new(Vec::new());
        let community_reports: Table<CommunityReport> = Table::new(Vec::new());
        let local_input = LocalSearchInput { entities: &entities, relationships: &relationships, text_units: &text_units, communities: &communities, community_reports: &community_reports };

        let store = HnswVectorStore::new(8);
        let embedding_model = MockEmbeddingModel::new(8);
        store
            .load_documents(vec![VectorDocument { id: acme.id.clone(), text: Some("ACME".to_string()), vector: vec![0.0; 8], attributes: serde_json::json!({}) }], true)
            .await
            .unwrap();

        let chat_model = MockChatModel::with_responder(|prompt| {
            if prompt.contains("Propose") {
                json!({"followups": ["who supplies ACME?"]}).to_string()
            } else if prompt.contains("Combine") {
                "Final combined answer.".to_string()
            } else {
                "ACME is a widget maker.".to_string()
            }
        });

        let search_config = common::config::SearchConfig::default();
        let drift_config = DriftSearchConfig { primer_folds: 1, drift_k_followups: 1, n_depth: 3, concurrency: 2 };
        let cancellation = CancellationToken::new();

        let result = search(
            "tell me about ACME",
            &[],
            &local_input,
            &store,
            &embedding_model,
            &chat_model,
            &search_config,
            &drift_config,
            &cancellation,
        )
        .await
        .unwrap();

        assert_eq!(result.response, "Final combined answer.");
        assert!(result.metrics.llm_calls >= 3);
    }
}
