//! Pipeline run state (spec §4.12): the live tables plus the capability
//! handles every workflow needs, and the `context.json`/`stats.json`
//! persistence that makes a crash-stopped run resumable. Generalizes
//! `PipelineContext<'a>`'s field list from the teacher's five-stage
//! ingestion machine onto the new capability traits.
use std::collections::HashMap;
use std::sync::Arc;

use common::cache::PipelineCache;
use common::callbacks::CallbackManager;
use common::error::AppError;
use common::llm::{ChatModel, EmbeddingModel};
use common::model::{Community, CommunityReport, Document, Entity, Relationship, TextUnit};
use common::storage::PipelineStorage;
use common::table::Table;
use common::vector_store::BaseVectorStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub overall_secs: f64,
}

/// `stats.json` (spec §6): `{total_runtime, num_documents, input_load_time, workflows:{name:{overall}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runtime_secs: f64,
    pub num_documents: usize,
    pub input_load_time_secs: f64,
    pub workflows: HashMap<String, WorkflowStats>,
}

/// Arbitrary carry-over state (spec §6 "`context.json` carries arbitrary
/// JSON state"); the runner only ever needs to know which workflow it last
/// completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContextState {
    pub last_completed_workflow: Option<String>,
}

/// Everything a workflow needs: the live tables it reads/writes and the
/// capability handles from C1-C5. Not `Clone` — workflows borrow it
/// `&mut` one at a time, matching §5's "workflows execute sequentially".
pub struct PipelineRunContext {
    pub documents: Table<Document>,
    pub text_units: Table<TextUnit>,
    pub entities: Table<Entity>,
    pub relationships: Table<Relationship>,
    pub communities: Table<Community>,
    pub community_reports: Table<CommunityReport>,
    /// Raw, unsummarized description lists keyed by entity/relationship id,
    /// populated by the extractor (C7) and consumed by the summarizer (C8).
    pub entity_descriptions: HashMap<String, Vec<String>>,
    pub relationship_descriptions: HashMap<String, Vec<String>>,

    pub stats: RunStats,
    pub state: RunContextState,

    pub storage: Arc<dyn PipelineStorage>,
    pub cache: Arc<dyn PipelineCache>,
    pub callbacks: Arc<CallbackManager>,
    pub chat_model: Arc<dyn ChatModel>,
    pub embedding_model: Arc<dyn EmbeddingModel>,
    /// One vector store per entry of `common::vector_store::KNOWN_EMBEDDING_FIELDS`,
    /// keyed by the field name itself (e.g. `"entity.description"`).
    pub vector_stores: HashMap<String, Arc<dyn BaseVectorStore>>,
}

impl PipelineRunContext {
    pub fn new(
        storage: Arc<dyn PipelineStorage>,
        cache: Arc<dyn PipelineCache>,
        callbacks: Arc<CallbackManager>,
        chat_model: Arc<dyn ChatModel>,
        embedding_model: Arc<dyn EmbeddingModel>,
        vector_stores: HashMap<String, Arc<dyn BaseVectorStore>>,
    ) -> Self {
        Self {
            documents: Table::new(Vec::new()),
            text_units: Table::new(Vec::new()),
            entities: Table::new(Vec::new()),
            relationships: Table::new(Vec::new()),
            communities: Table::new(Vec::new()),
            community_reports: Table::new(Vec::new()),
            entity_descriptions: HashMap::new(),
            relationship_descriptions: HashMap::new(),
            stats: RunStats::default(),
            state: RunContextState::default(),
            storage,
            cache,
            callbacks,
            chat_model,
            embedding_model,
            vector_stores,
        }
    }

    /// The vector store for a single `KNOWN_EMBEDDING_FIELDS` entry, if one
    /// was provided for this run.
    pub fn vector_store(&self, field_name: &str) -> Option<&Arc<dyn BaseVectorStore>> {
        self.vector_stores.get(field_name)
    }

    /// Persist every live table plus `context.json`/`stats.json` to
    /// storage. Called after every workflow so a crash leaves a resumable
    /// snapshot (spec §4.12 step 3).
    pub async fn persist(&self) -> Result<(), AppError> {
        self.storage.set("documents.jsonl", self.documents.to_json_lines()?.into_bytes()).await?;
        self.storage.set("text_units.jsonl", self.text_units.to_json_lines()?.into_bytes()).await?;
        self.storage.set("entities.jsonl", self.entities.to_json_lines()?.into_bytes()).await?;
        self.storage
            .set("relationships.jsonl", self.relationships.to_json_lines()?.into_bytes())
            .await?;
        self.storage
            .set("communities.jsonl", self.communities.to_json_lines()?.into_bytes())
            .await?;
        self.storage
            .set("community_reports.jsonl", self.community_reports.to_json_lines()?.into_bytes())
            .await?;
        self.storage
            .set("context.json", serde_json::to_vec(&self.state)?)
            .await?;
        self.storage.set("stats.json", serde_json::to_vec(&self.stats)?).await?;
        Ok(())
    }

    /// Load every table plus `context.json`/`stats.json` from a prior run,
    /// if present. Missing tables are left empty rather than erroring, so a
    /// fresh output directory loads as an empty run.
    pub async fn load_prior(&mut self) -> Result<(), AppError> {
        if let Some(bytes) = self.storage.get("documents.jsonl").await? {
            self.documents = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("text_units.jsonl").await? {
            self.text_units = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("entities.jsonl").await? {
            self.entities = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("relationships.jsonl").await? {
            self.relationships = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("communities.jsonl").await? {
            self.communities = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("community_reports.jsonl").await? {
            self.community_reports = Table::from_json_lines(&String::from_utf8_lossy(&bytes))?;
        }
        if let Some(bytes) = self.storage.get("context.json").await? {
            self.state = serde_json::from_slice(&bytes)?;
        }
        if let Some(bytes) = self.storage.get("stats.json").await? {
            self.stats = serde_json::from_slice(&bytes)?;
        }
        Ok(())
    }
}
