//! The dynamic community selector (spec §4.13): a breadth-first walk of the
//! community tree, starting at level 0, that keeps only the communities an
//! LLM rates relevant to the query, backfilling deeper levels when nothing
//! at the current one qualifies. Grounded on this crate's own
//! instrumented-async-fn stage idiom and on `composite-retrieval`'s
//! `FuturesUnordered` parallel neighbor expansion for the per-community
//! `num_repeats`-vote rating fan-out (`futures::future::join_all`, averaged
//! and rounded to the nearest integer per the "Rate" glossary entry).
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use common::config::SelectionConfig;
use common::error::AppError;
use common::model::{Community, CommunityReport};
use common::llm::{ChatModel, ChatParams};
use common::table::Table;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct RawRating {
    rating: u8,
}

fn rating_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {"rating": {"type": "integer", "minimum": 0, "maximum": 5}},
        "required": ["rating"]
    })
}

/// The selector's output: the reports judged relevant, plus accounting and
/// the raw per-community ratings (spec §4.13 step 4).
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub reports: Vec<CommunityReport>,
    pub llm_calls: u32,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    pub ratings: HashMap<String, u8>,
}

async fn rate_once(chat_model: &dyn ChatModel, query: &str, context: &str) -> Result<RawRating, AppError> {
    let prompt = format!(
        "On a scale of 0 to 5, how relevant is the following community summary to the question below?\n\nQuestion: {query}\n\nCommunity summary:\n{context}"
    );
    let params = ChatParams { temperature: Some(0.0), json_schema: Some(("community_rating".to_string(), rating_schema())) };
    let response = chat_model.chat(&prompt, &[], &params).await?;
    serde_json::from_str(&response.content).map_err(|e| AppError::ParseFailed { row: "rating".to_string(), reason: e.to_string() })
}

/// `num_repeats` independent votes, averaged and rounded to the nearest
/// integer (spec §4.13 step 2, §GLOSSARY "Rate" is `[0, 5]`).
#[instrument(skip_all, fields(community = community.id))]
async fn rate_community(
    chat_model: Arc<dyn ChatModel>,
    query: &str,
    community: &CommunityReport,
    tuning: &SelectionConfig,
) -> (u8, u32) {
    let context = if tuning.use_summary { community.summary.clone() } else { community.full_content.clone() };
    let votes = stream::iter(0..tuning.num_repeats.max(1))
        .map(|_| {
            let chat_model = Arc::clone(&chat_model);
            let query = query.to_string();
            let context = context.clone();
            async move { rate_once(chat_model.as_ref(), &query, &context).await }
        })
        .buffer_unordered(tuning.num_repeats.max(1) as usize)
        .collect::<Vec<_>>()
        .await;

    let mut calls = 0u32;
    let mut sum = 0u32;
    let mut count = 0u32;
    for outcome in votes {
        calls += 1;
        if let Ok(raw) = outcome {
            sum += u32::from(raw.rating);
            count += 1;
        }
    }
    let average = if count == 0 { 0 } else { (sum as f32 / count as f32).round() as u8 };
    (average, calls)
}

/// Breadth-first walk of the community tree, rating each visited community
/// against `query` and keeping the ones that clear `rate_threshold` (spec §4.13).
pub async fn select_communities(
    query: &str,
    reports: &Table<CommunityReport>,
    communities: &Table<Community>,
    chat_model: Arc<dyn ChatModel>,
    tuning: &SelectionConfig,
) -> SelectionOutcome {
    let community_by_cluster_id: HashMap<i64, &Community> = communities.rows().iter().map(|c| (c.community, c)).collect();
    let report_by_cluster_id: HashMap<i64, &CommunityReport> = reports.rows().iter().map(|r| (r.community, r)).collect();

    let mut levels_present: Vec<u32> = communities.rows().iter().map(|c| c.level).collect();
    levels_present.sort_unstable();
    levels_present.dedup();

    let mut level_groups: HashMap<u32, Vec<i64>> = HashMap::new();
    for community in communities.rows() {
        level_groups.entry(community.level).or_default().push(community.community);
    }

    let mut level_cursor = 0usize;
    let mut queue: VecDeque<i64> = VecDeque::new();
    if let Some(ids) = level_groups.get(&0) {
        queue.extend(ids.iter().filter(|id| report_by_cluster_id.contains_key(id)));
    }

    let mut relevant: HashSet<i64> = HashSet::new();
    let mut ratings: HashMap<String, u8> = HashMap::new();
    let mut outcome = SelectionOutcome::default();

    loop {
        if queue.is_empty() {
            if !relevant.is_empty() {
                break;
            }
            level_cursor += 1;
            let Some(&next_level) = levels_present.get(level_cursor) else { break };
            if next_level > tuning.max_level {
                break;
            }
            if let Some(ids) = level_groups.get(&next_level) {
                queue.extend(ids.iter().filter(|id| report_by_cluster_id.contains_key(id)));
            }
            continue;
        }

        let batch: Vec<i64> = queue.drain(..).collect();
        let rated: Vec<(i64, u8)> = stream::iter(batch)
            .map(|cluster_id| {
                let chat_model = Arc::clone(&chat_model);
                let report = report_by_cluster_id.get(&cluster_id).copied();
                async move {
                    match report {
                        Some(report) => {
                            let (rating, calls) = rate_community(chat_model, query, report, tuning).await;
                            (cluster_id, rating, calls)
                        }
                        None => (cluster_id, 0, 0),
                    }
                }
            })
            .buffer_unordered(tuning.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|(cluster_id, rating, calls)| {
                outcome.llm_calls += calls;
                (cluster_id, rating)
            })
            .collect();

        for (cluster_id, rating) in rated {
            if let Some(report) = report_by_cluster_id.get(&cluster_id) {
                ratings.insert(report.id.clone(), rating);
            }
            if rating < tuning.rate_threshold {
                continue;
            }
            relevant.insert(cluster_id);

            if let Some(community) = community_by_cluster_id.get(&cluster_id) {
                for child in &community.children {
                    if report_by_cluster_id.contains_key(child) {
                        queue.push_back(*child);
                    }
                }
                if !tuning.keep_parent && community.parent != -1 {
                    relevant.remove(&community.parent);
                }
            }
        }
    }

    outcome.reports = relevant.into_iter().filter_map(|id| report_by_cluster_id.get(&id).map(|r| (*r).clone())).collect();
    outcome.reports.sort_by(|a, b| a.id.cmp(&b.id));
    outcome.ratings = ratings;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::MockChatModel;

    fn community(cluster_id: i64, level: u32, parent: i64, children: Vec<i64>) -> Community {
        let mut c = Community::new(cluster_id, level, parent, cluster_id as u64);
        c.children = children;
        c
    }

    fn report(cluster_id: i64, level: u32, parent: i64) -> CommunityReport {
        CommunityReport {
            id: format!("report-{cluster_id}"),
            human_readable_id: cluster_id as u64,
            community: cluster_id,
            level,
            parent,
            children: Vec::new(),
            title: format!("Community {cluster_id}"),
            summary: "summary".to_string(),
            full_content: format!("Community {cluster_id} content"),
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
    async fn relevant_root_expands_to_its_children() {
        let communities = Table::new(vec![community(0, 0, -1, vec![1]), community(1, 1, 0, vec![])]);
        let reports = Table::new(vec![report(0, 0, -1), report(1, 1, 0)]);
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(json!({"rating": 5}).to_string()));
        let tuning = SelectionConfig { keep_parent: true, ..SelectionConfig::default() };
        let outcome = select_communities("who is involved?", &reports, &communities, chat_model, &tuning).await;
        let ids: HashSet<i64> = outcome.reports.iter().map(|r| r.community).collect();
        assert_eq!(ids, [0, 1].into_iter().collect());
    }

    #[tokio::test]
    async fn child_wins_over_parent_when_keep_parent_is_false() {
        let communities = Table::new(vec![community(0, 0, -1, vec![1]), community(1, 1, 0, vec![])]);
        let reports = Table::new(vec![report(0, 0, -1), report(1, 1, 0)]);
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(json!({"rating": 5}).to_string()));
        let tuning = SelectionConfig { keep_parent: false, ..SelectionConfig::default() };
        let outcome = select_communities("who is involved?", &reports, &communities, chat_model, &tuning).await;
        let ids: HashSet<i64> = outcome.reports.iter().map(|r| r.community).collect();
        assert_eq!(ids, [1].into_iter().collect());
    }

    #[tokio::test]
    async fn backfills_deeper_level_when_nothing_relevant_at_root() {
        let communities = Table::new(vec![community(0, 0, -1, vec![1]), community(1, 1, 0, vec![])]);
        let reports = Table::new(vec![report(0, 0, -1), report(1, 1, 0)]);
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::with_responder(|prompt| {
            if prompt.contains("Community 0") { json!({"rating": 0}).to_string() } else { json!({"rating": 5}).to_string() }
        }));
        let tuning = SelectionConfig { max_level: 2, ..SelectionConfig::default() };
        let outcome = select_communities("anything?", &reports, &communities, chat_model, &tuning).await;
        let ids: HashSet<i64> = outcome.reports.iter().map(|r| r.community).collect();
        assert_eq!(ids, [1].into_iter().collect());
    }

    #[tokio::test]
    async fn below_threshold_rating_excludes_everything() {
        let communities = Table::new(vec![community(0, 0, -1, vec![])]);
        let reports = Table::new(vec![report(0, 0, -1)]);
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(json!({"rating": 1}).to_string()));
        let tuning = SelectionConfig { rate_threshold: 3, max_level: 0, ..SelectionConfig::default() };
        let outcome = select_communities("irrelevant", &reports, &communities, chat_model, &tuning).await;
        assert!(outcome.reports.is_empty());
    }
}
