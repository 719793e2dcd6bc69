//! The config record shape described in spec §6. Loading it from YAML/env is
//! out of scope (spec §1); this module only gives the core a typed record to
//! consume, following the teacher's flat-struct-with-`Default`-impl idiom
//! (`indexing-pipeline/src/pipeline/config.rs::IngestionTuning`,
//! `retrieval-pipeline/src/pipeline/config.rs::RetrievalTuning`).
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_chat_model: String,
    pub default_embedding_model: String,
    pub tokens_per_minute: u32,
    pub requests_per_minute: u32,
    pub concurrent_requests: usize,
    /// `-1` means "dynamic": resolved by the caller to its expected call count.
    pub max_retries: i32,
    pub max_retry_wait_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_chat_model: "default_chat".to_string(),
            default_embedding_model: "default_embedding".to_string(),
            tokens_per_minute: 150_000,
            requests_per_minute: 500,
            concurrent_requests: 8,
            max_retries: 10,
            max_retry_wait_secs: 60,
            request_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub base_dir: String,
    pub file_pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            base_dir: "input".to_string(),
            file_pattern: "*.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategyKind {
    Tokens,
    Sentences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunksConfig {
    pub strategy: ChunkStrategyKind,
    pub size: usize,
    pub overlap: usize,
    pub group_by_columns: Vec<String>,
    pub chunk_size_includes_metadata: bool,
}

impl Default for ChunksConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategyKind::Tokens,
            size: 1200,
            overlap: 100,
            group_by_columns: vec!["id".to_string()],
            chunk_size_includes_metadata: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub base_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub base_dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: "cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub max_input_length: usize,
    pub max_cluster_size: usize,
    pub clustering_seed: Option<u64>,
    pub use_lcc: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            max_input_length: 16_000,
            max_cluster_size: 10,
            clustering_seed: Some(0xDEAD_BEEF),
            use_lcc: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub collection_prefix: String,
    pub vector_dimensions: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            collection_prefix: "default".to_string(),
            vector_dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub batch_size: usize,
    pub batch_max_tokens: usize,
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            batch_max_tokens: 8_191,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub entity_types: Vec<String>,
    pub prompt: String,
    /// `-1` resolves to `text_units.len()` (spec §4.7).
    pub concurrency: i32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            entity_types: vec![
                "organization".to_string(),
                "person".to_string(),
                "geo".to_string(),
                "event".to_string(),
            ],
            prompt: "Identify entities of types {entity_types} and the relationships between them in the following text:\n\n{input_text}".to_string(),
            concurrency: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    pub max_length: usize,
    pub concurrency: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            max_length: 500,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub rate_threshold: u8,
    pub num_repeats: u8,
    pub keep_parent: bool,
    pub max_level: u32,
    pub concurrency: usize,
    pub use_summary: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            rate_threshold: 3,
            num_repeats: 1,
            keep_parent: false,
            max_level: 2,
            concurrency: 8,
            use_summary: false,
        }
    }
}

/// Tuning for the local/basic search orchestrators (spec §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k_entities: usize,
    pub top_k_relationships: usize,
    pub top_k_text_units: usize,
    pub top_k_communities: usize,
    pub max_tokens: usize,
    pub text_unit_prop: f32,
    pub community_prop: f32,
    /// Candidate entities are pulled from the vector store at this multiple
    /// of `top_k_entities` before exclude-list filtering (spec §4.14 "oversample by 2x").
    pub entity_oversample_factor: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k_entities: 10,
            top_k_relationships: 10,
            top_k_text_units: 10,
            top_k_communities: 4,
            max_tokens: 8_000,
            text_unit_prop: 0.5,
            community_prop: 0.25,
            entity_oversample_factor: 2.0,
        }
    }
}

/// Tuning for the global-search map/reduce orchestrator (spec §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSearchConfig {
    /// Community reports per map batch.
    pub batch_size: usize,
    /// Token budget per map batch, shared with the packer used everywhere
    /// else context gets assembled (spec §4.14 "token-bounded").
    pub max_tokens_per_batch: usize,
    /// Seeds the shuffle that randomizes report order within a batch, for
    /// reproducible runs (spec §4.14 "stable `random_state`").
    pub random_state: u64,
    pub normalize_weights: bool,
}

impl Default for GlobalSearchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_tokens_per_batch: 8_000,
            random_state: 0xDEAD_BEEF,
            normalize_weights: true,
        }
    }
}

/// Tuning for the drift-search primer/local/reduce orchestrator (spec §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSearchConfig {
    /// Sub-queries the primer expands into, per fold.
    pub drift_k_followups: usize,
    /// Independent primer expansions, each producing `drift_k_followups`
    /// sub-queries.
    pub primer_folds: usize,
    /// How many of the sub-answers the reduce step is told to synthesize
    /// over (spec §4.14 "reduces the sub-answers at `n_depth`").
    pub n_depth: usize,
    pub concurrency: usize,
}

impl Default for DriftSearchConfig {
    fn default() -> Self {
        Self {
            drift_k_followups: 3,
            primer_folds: 2,
            n_depth: 3,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub models: ModelsConfig,
    pub input: InputConfig,
    pub chunks: ChunksConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub extraction: ExtractionConfig,
    pub summarization: SummarizationConfig,
    pub reporting: ReportingConfig,
    pub vector_store: VectorStoreConfig,
    pub embedding: EmbeddingConfig,
    pub selection: SelectionConfig,
    pub search: SearchConfig,
    pub global_search: GlobalSearchConfig,
    pub drift_search: DriftSearchConfig,
}
