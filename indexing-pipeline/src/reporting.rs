//! The community reporter (spec §4.10): per-community LLM report
//! generation, processed level-by-level so child reports exist before a
//! parent needs them. Grounded on the same `ResponseFormat::JsonSchema`
//! idiom as the graph extractor (C7), with a greedy token-budget context
//! packer in the style of the chunker's `ChunkCapacity`/overlap validation.
use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use common::model::{Community, CommunityReport, Entity, Finding, Relationship};
use common::llm::{ChatModel, ChatParams};
use common::table::Table;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use crate::tokenizer;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportingMetrics {
    pub llm_calls: u32,
    pub parse_failures: u32,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    summary: String,
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    title: String,
    summary: String,
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default = "default_rating")]
    rating: f32,
    #[serde(default)]
    rating_explanation: String,
}

fn default_rating() -> f32 {
    1.0
}

fn report_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "summary": {"type": "string"},
            "rating": {"type": "number"},
            "rating_explanation": {"type": "string"},
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "summary": {"type": "string"},
                        "explanation": {"type": "string"}
                    },
                    "required": ["summary", "explanation"]
                }
            }
        },
        "required": ["title", "summary", "rating", "rating_explanation", "findings"]
    })
}

/// Greedily pack `lines` into a context string, stopping before the next
/// line would push the running token count past `max_input_length`.
fn pack_context(lines: &[String], max_input_length: usize) -> Result<String, AppError> {
    let mut packed = String::new();
    let mut tokens_so_far = 0usize;
    for line in lines {
        let line_tokens = tokenizer::count_tokens(line)? as usize;
        if tokens_so_far + line_tokens > max_input_length && !packed.is_empty() {
            break;
        }
        packed.push_str(line);
        packed.push('\n');
        tokens_so_far += line_tokens;
    }
    Ok(packed)
}

fn build_context_lines(
    community: &Community,
    entities: &HashMap<&str, &Entity>,
    relationships: &HashMap<&str, &Relationship>,
    child_reports: &HashMap<i64, CommunityReport>,
) -> Vec<String> {
    let mut lines = Vec::new();
    for id in &community.entity_ids {
        if let Some(entity) = entities.get(id.as_str()) {
            lines.push(format!("Entity: {} ({}) — {}", entity.title, entity.entity_type, entity.description));
        }
    }
    for id in &community.relationship_ids {
        if let Some(relationship) = relationships.get(id.as_str()) {
            lines.push(format!(
                "Relationship: {} -> {} — {}",
                relationship.source, relationship.target, relationship.description
            ));
        }
    }
    for child_id in &community.children {
        if let Some(report) = child_reports.get(child_id) {
            lines.push(format!("Sub-community '{}': {}", report.title, report.summary));
        }
    }
    lines
}

#[instrument(skip_all, fields(community = community.community))]
async fn generate_one(
    chat_model: &dyn ChatModel,
    community: &Community,
    context: &str,
) -> Result<(RawReport, String), AppError> {
    let prompt = format!(
        "Write a community report given the following context.\n\n{context}"
    );
    let params = ChatParams {
        temperature: Some(0.0),
        json_schema: Some(("community_report".to_string(), report_schema())),
    };
    let response = chat_model.chat(&prompt, &[], &params).await?;
    let raw: RawReport = serde_json::from_str(&response.content).map_err(|e| AppError::ParseFailed {
        row: community.id.clone(),
        reason: e.to_string(),
    })?;
    Ok((raw, response.content))
}

/// Generate a `CommunityReport` for every community, deepest level first so
/// that by the time a parent is processed every child already has a report.
pub async fn generate_reports(
    communities: &Table<Community>,
    entities: &Table<Entity>,
    relationships: &Table<Relationship>,
    chat_model: Arc<dyn ChatModel>,
    max_input_length: usize,
    concurrency: usize,
) -> Result<(Table<CommunityReport>, ReportingMetrics), AppError> {
    let entity_by_id: HashMap<&str, &Entity> = entities.rows().iter().map(|e| (e.id.as_str(), e)).collect();
    let relationship_by_id: HashMap<&str, &Relationship> =
        relationships.rows().iter().map(|r| (r.id.as_str(), r)).collect();

    let mut levels: Vec<u32> = communities.rows().iter().map(|c| c.level).collect();
    levels.sort_unstable();
    levels.dedup();
    levels.reverse(); // deepest (highest level number) first

    let mut metrics = ReportingMetrics::default();
    let mut reports_by_community: HashMap<i64, CommunityReport> = HashMap::new();
    let mut next_hrid: u64 = 0;

    for level in levels {
        let level_communities: Vec<&Community> =
            communities.rows().iter().filter(|c| c.level == level).collect();

        let context_by_id: HashMap<i64, String> = level_communities
            .iter()
            .map(|community| {
                let lines = build_context_lines(community, &entity_by_id, &relationship_by_id, &reports_by_community);
                (community.community, lines)
            })
            .map(|(id, lines)| (id, pack_context(&lines, max_input_length)))
            .map(|(id, packed)| (id, packed.unwrap_or_default()))
            .collect();

        let outcomes: Vec<(i64, Result<(RawReport, String), AppError>)> = stream::iter(level_communities)
            .map(|community| {
                let chat_model = Arc::clone(&chat_model);
                let context = context_by_id.get(&community.community).cloned().unwrap_or_default();
                let community = community.clone();
                async move {
                    let outcome = generate_one(chat_model.as_ref(), &community, &context).await;
                    (community.community, outcome)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (community_id, outcome) in outcomes {
            metrics.llm_calls += 1;
            let community = communities
                .rows()
                .iter()
                .find(|c| c.community == community_id)
                .expect("community looked up by id present in this level's batch");

            let report = match outcome {
                Ok((raw, raw_content)) => CommunityReport {
                    id: community.id.clone(),
                    human_readable_id: next_hrid,
                    community: community.community,
                    level: community.level,
                    parent: community.parent,
                    children: community.children.clone(),
                    title: raw.title,
                    summary: raw.summary.clone(),
                    full_content: raw.summary,
                    rank: raw.rating,
                    rating_explanation: raw.rating_explanation,
                    findings: raw
                        .findings
                        .into_iter()
                        .map(|f| Finding {
                            summary: f.summary,
                            explanation: f.explanation,
                        })
                        .collect(),
                    full_content_json: raw_content,
                    period: community.period,
                    size: community.size,
                    full_content_embedding: None,
                },
                Err(err) => {
                    warn!(community = community_id, error = %err, "community report generation failed, using default rank");
                    metrics.parse_failures += 1;
                    CommunityReport {
                        id: community.id.clone(),
                        human_readable_id: next_hrid,
                        community: community.community,
                        level: community.level,
                        parent: community.parent,
                        children: community.children.clone(),
                        title: community.title.clone(),
                        summary: String::new(),
                        full_content: String::new(),
                        rank: 1.0,
                        rating_explanation: String::new(),
                        findings: Vec::new(),
                        full_content_json: String::new(),
                        period: community.period,
                        size: community.size,
                        full_content_embedding: None,
                    }
                }
            };
            next_hrid += 1;
            reports_by_community.insert(community_id, report);
        }
    }

    let mut reports = Table::new(reports_by_community.into_values().collect());
    reports.sort_by_id();
    Ok((reports, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::MockChatModel;

    fn community(community_id: i64, level: u32, parent: i64, entity_ids: Vec<String>) -> Community {
        let mut c = Community::new(community_id, level, parent, community_id as u64);
        c.entity_ids = entity_ids;
        c.size = c.entity_ids.len() as u32;
        c
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_default_rank() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed("not json".to_string()));
        let communities = Table::new(vec![community(0, 0, -1, vec![])]);
        let entities: Table<Entity> = Table::new(Vec::new());
        let relationships: Table<Relationship> = Table::new(Vec::new());
        let (reports, metrics) = generate_reports(&communities, &entities, &relationships, chat_model, 1000, 4)
            .await
            .unwrap();
        assert_eq!(metrics.parse_failures, 1);
        assert_eq!(reports.rows()[0].rank, 1.0);
    }

    #[tokio::test]
    async fn successful_report_carries_findings_and_rank() {
        let response = serde_json::json!({
            "title": "Acme cluster",
            "summary": "a cluster about Acme",
            "rating": 4.5,
            "rating_explanation": "central to the graph",
            "findings": [{"summary": "Acme leads", "explanation": "high degree"}]
        })
        .to_string();
        let chat_model: Arc<dyn ChatModel> = Arc::new(MockChatModel::fixed(response));
        let communities = Table::new(vec![community(0, 0, -1, vec!["e1".to_string()])]);
        let mut entity = Entity::new("ACME".to_string(), "organization".to_string(), 0);
        entity.id = "e1".to_string();
        let entities = Table::new(vec![entity]);
        let relationships: Table<Relationship> = Table::new(Vec::new());
        let (reports, metrics) = generate_reports(&communities, &entities, &relationships, chat_model, 1000, 4)
            .await
            .unwrap();
        assert_eq!(metrics.parse_failures, 0);
        assert_eq!(reports.rows()[0].title, "Acme cluster");
        assert_eq!(reports.rows()[0].findings.len(), 1);
    }
}
