//! The pipeline runner (spec §4.12): an ordered list of workflows driven
//! sequentially over a `PipelineRunContext`, each timed and checkpointed to
//! storage. Generalizes the teacher's fixed five-stage `state_machine!`
//! ingestion machine (`pipeline/state.rs`, `pipeline/mod.rs::drive_pipeline`)
//! into a runner over a plain `Vec<Workflow>` — control flow that used to be
//! baked into state-machine transitions is now just "the next item in the
//! list", so the state-machine crate is no longer needed here.
pub mod context;
pub mod incremental;

use std::sync::Arc;
use std::time::Instant;

use common::config::PipelineConfig;
use common::error::AppError;
use common::model::Document;
use common::table::Table;
use futures::future::BoxFuture;
use regex::Regex;
use tracing::{info, instrument};

pub use context::{PipelineRunContext, RunContextState, RunStats, WorkflowStats};

use crate::{chunking, clustering, embedding, extraction, reporting, summarization};

/// One named pipeline stage. `run` takes the config and a mutable run
/// context and returns whether the stage succeeded.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    pub run: Arc<dyn Fn(&PipelineConfig, &mut PipelineRunContext) -> BoxFuture<'_, Result<(), AppError>> + Send + Sync>,
}

impl Workflow {
    fn new<F>(name: &str, run: F) -> Self
    where
        F: for<'a> Fn(&'a PipelineConfig, &'a mut PipelineRunContext) -> BoxFuture<'a, Result<(), AppError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            run: Arc::new(run),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct PipelineRunResult {
    pub name: String,
    pub state: WorkflowState,
    pub errors: Vec<String>,
}

fn workflow_chunk() -> Workflow {
    Workflow::new("create_base_text_units", |config, ctx| {
        Box::pin(async move {
            let output = chunking::chunk_documents(ctx.documents.rows(), &config.chunks)?;
            ctx.text_units = output.text_units;
            let mut docs = std::mem::replace(&mut ctx.documents, Table::new(Vec::new())).into_rows();
            for doc in &mut docs {
                if let Some(ids) = output.document_text_unit_ids.get(&doc.id) {
                    doc.text_unit_ids = ids.clone();
                }
            }
            ctx.documents = Table::new(docs);
            Ok(())
        })
    })
}

fn workflow_extract_graph() -> Workflow {
    Workflow::new("extract_graph", |config, ctx| {
        Box::pin(async move {
            let concurrency = resolve_concurrency(config.extraction.concurrency, ctx.text_units.len());
            let output = extraction::extract_graph(
                &ctx.text_units,
                Arc::clone(&ctx.chat_model),
                &config.extraction.entity_types,
                &config.extraction.prompt,
                concurrency,
            )
            .await?;
            ctx.entities = output.entities;
            ctx.relationships = output.relationships;
            ctx.entity_descriptions = output.entity_descriptions;
            ctx.relationship_descriptions = output.relationship_descriptions;
            info!(
                entities = ctx.entities.len(),
                relationships = ctx.relationships.len(),
                failed_chunks = output.metrics.failed_chunks,
                "graph extracted"
            );
            Ok(())
        })
    })
}

fn workflow_summarize_descriptions() -> Workflow {
    Workflow::new("summarize_descriptions", |config, ctx| {
        Box::pin(async move {
            summarization::summarize_descriptions(
                &mut ctx.entities,
                &mut ctx.relationships,
                &ctx.entity_descriptions,
                &ctx.relationship_descriptions,
                Arc::clone(&ctx.chat_model),
                Arc::clone(&ctx.cache),
                config.summarization.max_length,
                config.summarization.concurrency,
            )
            .await?;
            Ok(())
        })
    })
}

fn workflow_cluster_communities() -> Workflow {
    Workflow::new("create_communities", |config, ctx| {
        Box::pin(async move {
            ctx.communities = clustering::cluster_entities(
                &ctx.entities,
                &ctx.relationships,
                config.reporting.max_cluster_size,
                config.reporting.use_lcc,
                config.reporting.clustering_seed,
            );
            Ok(())
        })
    })
}

fn workflow_generate_reports() -> Workflow {
    Workflow::new("create_community_reports", |config, ctx| {
        Box::pin(async move {
            let (reports, metrics) = reporting::generate_reports(
                &ctx.communities,
                &ctx.entities,
                &ctx.relationships,
                Arc::clone(&ctx.chat_model),
                config.reporting.max_input_length,
                config.models.concurrent_requests,
            )
            .await?;
            ctx.community_reports = reports;
            info!(parse_failures = metrics.parse_failures, "community reports generated");
            Ok(())
        })
    })
}

/// Build the embed items for one `KNOWN_EMBEDDING_FIELDS` entry.
fn embed_items_for_field(field: &str, ctx: &PipelineRunContext) -> Vec<embedding::EmbedItem> {
    match field {
        "entity.description" => ctx
            .entities
            .rows()
            .iter()
            .map(|e| embedding::EmbedItem {
                id: e.id.clone(),
                text: e.description.clone(),
                attributes: serde_json::json!({"title": e.title}),
            })
            .collect(),
        "relationship.description" => ctx
            .relationships
            .rows()
            .iter()
            .map(|r| embedding::EmbedItem {
                id: r.id.clone(),
                text: r.description.clone(),
                attributes: serde_json::json!({"source": r.source, "target": r.target}),
            })
            .collect(),
        "community.full_content" => ctx
            .community_reports
            .rows()
            .iter()
            .map(|c| embedding::EmbedItem {
                id: c.id.clone(),
                text: c.full_content.clone(),
                attributes: serde_json::json!({"title": c.title}),
            })
            .collect(),
        "text_unit.text" => ctx
            .text_units
            .rows()
            .iter()
            .map(|t| embedding::EmbedItem {
                id: t.id.clone(),
                text: t.text.clone(),
                attributes: serde_json::json!({}),
            })
            .collect(),
        other => unreachable!("KNOWN_EMBEDDING_FIELDS is a closed set, got '{other}'"),
    }
}

/// Embed every `KNOWN_EMBEDDING_FIELDS` collection into its own vector store
/// (spec §4.5/§4.11/§4.12): entity descriptions, relationship descriptions,
/// community full contents, and text unit text all get embedded, not just
/// entities — a field with no configured store is skipped.
fn workflow_generate_embeddings() -> Workflow {
    Workflow::new("generate_text_embeddings", |config, ctx| {
        Box::pin(async move {
            for field in common::vector_store::KNOWN_EMBEDDING_FIELDS {
                let Some(vector_store) = ctx.vector_store(field).cloned() else {
                    continue;
                };
                let items = embed_items_for_field(field, ctx);
                embedding::embed_items(
                    &items,
                    Arc::clone(&ctx.embedding_model),
                    vector_store,
                    config.embedding.batch_size,
                    config.embedding.batch_max_tokens,
                    config.embedding.concurrency,
                )
                .await?;
            }
            Ok(())
        })
    })
}

/// The standard ingestion run: chunk, extract, summarize, cluster, report,
/// embed — in that order (spec §4.12).
pub fn default_workflows() -> Vec<Workflow> {
    vec![
        workflow_chunk(),
        workflow_extract_graph(),
        workflow_summarize_descriptions(),
        workflow_cluster_communities(),
        workflow_generate_reports(),
        workflow_generate_embeddings(),
    ]
}

/// `-1` resolves to `fallback` (spec §4.7's `max_retries=-1` resolution rule,
/// reused here for `extraction.concurrency`).
fn resolve_concurrency(configured: i32, fallback: usize) -> usize {
    if configured < 0 {
        fallback.max(1)
    } else {
        configured as usize
    }
}

/// Drive `workflows` in order over `ctx`, timing each one, persisting
/// `context.json`/`stats.json` after every step, and stopping at the first
/// failure (spec §4.12).
#[instrument(skip_all)]
pub async fn drive(
    config: &PipelineConfig,
    ctx: &mut PipelineRunContext,
    workflows: &[Workflow],
) -> Vec<PipelineRunResult> {
    let names: Vec<String> = workflows.iter().map(|w| w.name.clone()).collect();
    ctx.callbacks.pipeline_start(&names);

    let run_start = Instant::now();
    let mut results = Vec::new();
    for workflow in workflows {
        ctx.callbacks.workflow_start(&workflow.name);
        let start = Instant::now();
        let outcome = (workflow.run)(config, ctx).await;
        let elapsed = start.elapsed().as_secs_f64();
        ctx.stats.workflows.insert(workflow.name.clone(), WorkflowStats { overall_secs: elapsed });

        let result = match outcome {
            Ok(()) => {
                ctx.callbacks.workflow_end(&workflow.name);
                PipelineRunResult {
                    name: workflow.name.clone(),
                    state: WorkflowState::Success,
                    errors: Vec::new(),
                }
            }
            Err(err) => {
                ctx.callbacks.error(err.to_string(), Some(workflow.name.clone()), None, None);
                let result = PipelineRunResult {
                    name: workflow.name.clone(),
                    state: WorkflowState::Error,
                    errors: vec![err.to_string()],
                };
                ctx.state.last_completed_workflow = results.last().map(|r: &PipelineRunResult| r.name.clone());
                results.push(result);
                if let Err(persist_err) = ctx.persist().await {
                    ctx.callbacks.error(persist_err.to_string(), Some("persist".to_string()), None, None);
                }
                let final_results: Vec<String> = results.iter().map(|r| format!("{}: {:?}", r.name, r.state)).collect();
                ctx.callbacks.pipeline_end(&final_results);
                return results;
            }
        };

        ctx.state.last_completed_workflow = Some(workflow.name.clone());
        ctx.stats.num_documents = ctx.documents.len();
        ctx.stats.total_runtime_secs = run_start.elapsed().as_secs_f64();
        if let Err(persist_err) = ctx.persist().await {
            ctx.callbacks.error(persist_err.to_string(), Some("persist".to_string()), None, None);
        }
        results.push(result);
    }

    let final_results: Vec<String> = results.iter().map(|r| format!("{}: {:?}", r.name, r.state)).collect();
    ctx.callbacks.pipeline_end(&final_results);
    results
}

/// Load every file under `base_dir` matching `file_pattern` (a glob,
/// translated to a regex: `*` -> `.*`) as one `Document` each.
pub async fn load_input_documents(
    storage: &Arc<dyn common::storage::PipelineStorage>,
    file_pattern: &str,
) -> Result<Table<Document>, AppError> {
    let regex_pattern = format!("^{}$", regex::escape(file_pattern).replace("\\*", ".*"));
    let pattern = Regex::new(&regex_pattern).map_err(|e| AppError::Config(e.to_string()))?;
    let keys = storage.find(&pattern, None, None).await?;

    let mut documents = Vec::new();
    for (idx, key) in keys.into_iter().enumerate() {
        let Some(bytes) = storage.get(&key).await? else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        documents.push(Document::new(key, "text".to_string(), text, idx as u64));
    }
    Ok(Table::new(documents))
}
