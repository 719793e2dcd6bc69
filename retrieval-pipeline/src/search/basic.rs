//! Basic search (spec §4.14): text-unit similarity search straight into an
//! answer prompt, with no graph expansion or community context. Generalizes
//! the teacher's chunk-only `RevisedStrategyDriver` lineage
//! (`pipeline/strategies.rs`) onto the `TextUnit` table and the
//! `BaseVectorStore`/`ChatModel` traits.
use std::collections::HashMap;
use std::time::Instant;

use common::config::SearchConfig;
use common::error::AppError;
use common::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};
use common::model::TextUnit;
use common::search::{OnContext, ResponseStream, SearchContext, SearchMetrics, SearchResult};
use common::table::Table;
use common::vector_store::BaseVectorStore;
use tracing::instrument;

use crate::search::pack_budget;

fn build_context(text_units: &Table<TextUnit>, hits: Vec<common::vector_store::SearchHit>) -> SearchContext {
    let text_unit_by_id: HashMap<&str, &TextUnit> = text_units.rows().iter().map(|t| (t.id.as_str(), t)).collect();
    let matched: Vec<&TextUnit> = hits.iter().filter_map(|hit| text_unit_by_id.get(hit.document.id.as_str()).copied()).collect();

    let lines: Vec<String> = matched.iter().map(|t| format!("Source: {}", t.text)).collect();
    let context_chunks = pack_budget(&lines, usize::MAX);
    let context_records = serde_json::json!({ "text_units": matched });
    SearchContext { context_chunks, context_records }
}

fn build_prompt(query: &str, context: &SearchContext) -> String {
    format!("Answer the question using only the context below.\n\nContext:\n{}\n\nQuestion:\n{}", context.context_chunks.join("\n"), query)
}

/// Basic search (spec §4.14): top-k text units by vector similarity, then
/// one answer call.
#[instrument(skip_all)]
pub async fn search(
    query: &str,
    history: &[ChatMessage],
    text_units: &Table<TextUnit>,
    text_unit_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    chat_model: &dyn ChatModel,
    config: &SearchConfig,
) -> Result<SearchResult, AppError> {
    let start = Instant::now();
    let hits = text_unit_vector_store.similarity_search_by_text(query, embedding_model, config.top_k_text_units).await?;
    let context = build_context(text_units, hits);
    let prompt = build_prompt(query, &context);
    let response = chat_model.chat(&prompt, history, &ChatParams { temperature: Some(0.2), json_schema: None }).await?;

    Ok(SearchResult {
        response: response.content,
        context,
        completion_time_secs: start.elapsed().as_secs_f64(),
        metrics: SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens },
    })
}

/// Streaming variant: `on_context` fires once, before the response stream
/// starts (spec §4.14).
#[instrument(skip_all)]
pub async fn search_stream(
    query: &str,
    history: &[ChatMessage],
    text_units: &Table<TextUnit>,
    text_unit_vector_store: &dyn BaseVectorStore,
    embedding_model: &dyn EmbeddingModel,
    chat_model: &dyn ChatModel,
    config: &SearchConfig,
    on_context: OnContext,
) -> Result<ResponseStream, AppError> {
    let hits = text_unit_vector_store.similarity_search_by_text(query, embedding_model, config.top_k_text_units).await?;
    let context = build_context(text_units, hits);
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

    fn text_unit(text: &str) -> TextUnit {
        TextUnit::new(text.to_string(), 10, Vec::new(), 0)
    }

    #[tokio::test]
    async fn search_answers_from_the_nearest_text_unit() {
        let unit = text_unit("ACME makes widgets in Springfield.");
        let text_units = Table::new(vec![unit.clone()]);

        let store = HnswVectorStore::new(8);
        let embedding_model = MockEmbeddingModel::new(8);
        store
            .load_documents(vec![VectorDocument { id: unit.id.clone(), text: Some(unit.text.clone()), vector: vec![0.0; 8], attributes: serde_json::json!({}) }], true)
            .await
            .unwrap();

        let chat_model = MockChatModel::fixed("Springfield.".to_string());
        let config = SearchConfig::default();

        let result = search("where are widgets made?", &[], &text_units, &store, &embedding_model, &chat_model, &config).await.unwrap();
        assert_eq!(result.response, "Springfield.");
        assert_eq!(result.metrics.llm_calls, 1);
        assert!(result.context.context_chunks.iter().any(|line| line.contains("Springfield")));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_context() {
        let text_units: Table<TextUnit> = Table::new(Vec::new());
        let store = HnswVectorStore::new(8);
        let embedding_model = MockEmbeddingModel::new(8);
        let chat_model = MockChatModel::fixed("I don't know.".to_string());
        let config = SearchConfig::default();

        let result = search("anything?", &[], &text_units, &store, &embedding_model, &chat_model, &config).await.unwrap();
        assert!(result.context.context_chunks.is_empty());
    }
}
