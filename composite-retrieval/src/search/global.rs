//! Global search (spec §4.14): map/reduce over every community report.
//! New in this crate — the teacher's hybrid entity+chunk fusion pipeline
//! (`pipeline/stages/mod.rs`, now removed) had no map/reduce stage to
//! generalize, so this follows `indexing-pipeline::reporting`'s pattern of
//! "batch, call the model per batch, synthesize over the batch outputs"
//! instead, with `rand_chacha` for the same "stable, seeded shuffle"
//! requirement C9's clustering seed already solves for community detection.
use std::collections::HashMap;
use std::time::Instant;

use common::config::GlobalSearchConfig;
use common::error::AppError;
use common::llm::{ChatMessage, ChatModel, ChatParams};
use common::model::CommunityReport;
use common::search::{SearchContext, SearchMetrics, SearchResult};
use common::table::Table;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use retrieval_pipeline::search::pack_budget;

#[derive(Debug, Deserialize)]
struct KeyPoint {
    description: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct MapOutput {
    points: Vec<KeyPoint>,
}

fn map_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "points": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": "string"},
                        "score": {"type": "number", "minimum": 0, "maximum": 100}
                    },
                    "required": ["description", "score"]
                }
            }
        },
        "required": ["points"]
    })
}

fn batch_reports(mut reports: Vec<CommunityReport>, config: &GlobalSearchConfig) -> Vec<Vec<CommunityReport>> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_state);
    reports.shuffle(&mut rng);
    reports.chunks(config.batch_size.max(1)).map(<[CommunityReport]>::to_vec).collect()
}

async fn map_batch(
    query: &str,
    batch: &[CommunityReport],
    chat_model: &dyn ChatModel,
    config: &GlobalSearchConfig,
) -> Result<(Vec<KeyPoint>, SearchMetrics), AppError> {
    let lines: Vec<String> = batch.iter().map(|r| format!("Community '{}': {}", r.title, r.summary)).collect();
    let packed = pack_budget(&lines, config.max_tokens_per_batch);
    let prompt = format!(
        "Using only the community summaries below, list the key points relevant to the question, each with an importance score from 0 to 100.\n\nQuestion: {query}\n\nCommunity summaries:\n{}",
        packed.join("\n")
    );
    let params = ChatParams { temperature: Some(0.0), json_schema: Some(("global_search_map".to_string(), map_schema())) };
    let response = chat_model.chat(&prompt, &[], &params).await?;
    let parsed: MapOutput = serde_json::from_str(&response.content)
        .map_err(|e| AppError::ParseFailed { row: "global_search_map".to_string(), reason: e.to_string() })?;
    let metrics = SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens };
    Ok((parsed.points, metrics))
}

fn normalize_points(mut points: Vec<KeyPoint>, normalize: bool) -> Vec<KeyPoint> {
    if normalize && !points.is_empty() {
        let raw: Vec<f32> = points.iter().map(|p| p.score).collect();
        let normalized = retrieval_pipeline::scoring::min_max_normalize(&raw);
        for (point, score) in points.iter_mut().zip(normalized) {
            point.score = score * 100.0;
        }
    }
    points.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    points
}

/// Global search (spec §4.14): batch every community report, map each batch
/// to scored key points, reduce the pooled points into a final answer.
#[instrument(skip_all)]
pub async fn search(
    query: &str,
    history: &[ChatMessage],
    reports: &Table<CommunityReport>,
    level: Option<u32>,
    chat_model: &dyn ChatModel,
    config: &GlobalSearchConfig,
    cancellation: &CancellationToken,
) -> Result<SearchResult, AppError> {
    let start = Instant::now();
    let selected: Vec<CommunityReport> =
        reports.rows().iter().filter(|r| level.map_or(true, |l| r.level == l)).cloned().collect();
    let batches = batch_reports(selected, config);

    let mut metrics = SearchMetrics::default();
    let mut all_points: Vec<KeyPoint> = Vec::new();

    let mut map_results = stream::iter(batches.iter())
        .map(|batch| map_batch(query, batch, chat_model, config))
        .buffer_unordered(8);

    while let Some(outcome) = map_results.next().await {
        if cancellation.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let (points, batch_metrics) = outcome?;
        all_points.extend(points);
        metrics.add(batch_metrics);
    }

    let ranked_points = normalize_points(all_points, config.normalize_weights);
    let point_lines: Vec<String> = ranked_points.iter().map(|p| format!("({:.1}) {}", p.score, p.description)).collect();
    let context_chunks = pack_budget(&point_lines, config.max_tokens_per_batch);
    let context = SearchContext {
        context_chunks: context_chunks.clone(),
        context_records: serde_json::json!({ "community_reports": reports.rows() }),
    };

    let reduce_prompt =
        format!("Synthesize a final answer to the question from the ranked key points below.\n\nQuestion: {query}\n\nKey points:\n{}", context_chunks.join("\n"));
    let response = chat_model.chat(&reduce_prompt, history, &ChatParams { temperature: Some(0.2), json_schema: None }).await?;
    metrics.add(SearchMetrics { llm_calls: 1, prompt_tokens: response.metrics.prompt_tokens, output_tokens: response.metrics.output_tokens });

    Ok(SearchResult { response: response.content, context, completion_time_secs: start.elapsed().as_secs_f64(), metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::MockChatModel;

    fn report(community: i64, title: &str, summary: &str) -> CommunityReport {
        CommunityReport {
            id: format!("report-{community}"),
            human_readable_id: community as u64,
            community,
            level: 0,
            parent: -1,
            children: Vec::new(),
            title: title.to_string(),
            summary: summary.to_string(),
            full_content: summary.to_string(),
            rank: 1.0,
            rating_explanation: String::new(),
            findings: Vec::new(),
            full_content_json: String::new(),
            period: chrono::Utc::now(),
            size: 1,
            full_content_embedding: None,
        }
    }

    #[tokio::test]
    async fn search_maps_every_batch_and_reduces_once() {
        let reports = Table::new(vec![
            report(0, "Alpha", "Alpha makes widgets."),
            report(1, "Beta", "Beta supplies steel to Alpha."),
        ]);
        let chat_model = MockChatModel::with_responder(|prompt| {
            if prompt.contains("Synthesize") {
                "Alpha and Beta form a supply chain.".to_string()
            } else {
                json!({"points": [{"description": "a point", "score": 80.0}]}).to_string()
            }
        });
        let config = GlobalSearchConfig { batch_size: 1, ..GlobalSearchConfig::default() };
        let cancellation = CancellationToken::new();

        let result = search("how are Alpha and Beta related?", &[], &reports, None, &chat_model, &config, &cancellation).await.unwrap();
        assert_eq!(result.response, "Alpha and Beta form a supply chain.");
        assert_eq!(result.metrics.llm_calls, 3);
    }

    #[tokio::test]
    async fn search_respects_level_filter() {
        let mut deep = report(2, "Gamma", "Gamma detail.");
        deep.level = 1;
        let reports = Table::new(vec![report(0, "Alpha", "Alpha summary."), deep]);
        let chat_model = MockChatModel::with_responder(|prompt| {
            if prompt.contains("Synthesize") { "done".to_string() } else { json!({"points": []}).to_string() }
        });
        let config = GlobalSearchConfig { batch_size: 10, ..GlobalSearchConfig::default() };
        let cancellation = CancellationToken::new();

        let result = search("summary?", &[], &reports, Some(0), &chat_model, &config, &cancellation).await.unwrap();
        assert_eq!(result.metrics.llm_calls, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_reduce() {
        let reports = Table::new(vec![report(0, "Alpha", "Alpha summary.")]);
        let chat_model = MockChatModel::fixed(json!({"points": []}).to_string());
        let config = GlobalSearchConfig::default();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = search("anything?", &[], &reports, None, &chat_model, &config, &cancellation).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
