//! The columnar row types that flow between pipeline stages (spec §3).
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use uuid::Uuid;

/// A source document, immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub human_readable_id: u64,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub text: String,
    pub text_unit_ids: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    /// Ids are a stable hash of the content plus title, so re-ingesting the same
    /// document twice is idempotent (spec §9 "stable ids").
    pub fn new(title: String, doc_type: String, text: String, human_readable_id: u64) -> Self {
        let id = Self::content_id(&title, &text);
        Self {
            id,
            human_readable_id,
            title,
            doc_type,
            text,
            text_unit_ids: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn content_id(title: &str, text: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A bounded chunk of source text, the granular retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextUnit {
    pub id: String,
    pub human_readable_id: u64,
    pub text: String,
    pub n_tokens: u32,
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub relationship_ids: Vec<String>,
    #[serde(default)]
    pub covariate_ids: Vec<String>,
}

impl TextUnit {
    pub fn new(text: String, n_tokens: u32, document_ids: Vec<String>, human_readable_id: u64) -> Self {
        let id = Self::content_id(&text);
        Self {
            id,
            human_readable_id,
            text,
            n_tokens,
            document_ids,
            entity_ids: Vec::new(),
            relationship_ids: Vec::new(),
            covariate_ids: Vec::new(),
        }
    }

    pub fn content_id(text: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A node in the entity-relationship graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub human_readable_id: u64,
    /// Normalized (uppercase, trimmed, HTML-unescaped) name. Unique in the table.
    pub title: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub text_unit_ids: Vec<String>,
    pub frequency: u32,
    pub degree: u32,
    pub x: Option<f32>,
    pub y: Option<f32>,
}

impl Entity {
    pub fn new(title: String, entity_type: String, human_readable_id: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            human_readable_id,
            title,
            entity_type,
            description: String::new(),
            text_unit_ids: Vec::new(),
            frequency: 0,
            degree: 0,
            x: None,
            y: None,
        }
    }
}

/// An edge in the entity-relationship graph, between two Entity titles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub human_readable_id: u64,
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f32,
    pub combined_degree: u32,
    pub text_unit_ids: Vec<String>,
}

impl Relationship {
    pub fn new(source: String, target: String, human_readable_id: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            human_readable_id,
            source,
            target,
            description: String::new(),
            weight: 0.0,
            combined_degree: 0,
            text_unit_ids: Vec::new(),
        }
    }
}

/// One cluster in the hierarchical decomposition of the entity graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Community {
    pub id: String,
    pub human_readable_id: u64,
    /// The integer cluster id assigned by the clusterer.
    pub community: i64,
    pub level: u32,
    /// `-1` for roots.
    pub parent: i64,
    pub children: Vec<i64>,
    pub title: String,
    pub entity_ids: Vec<String>,
    pub relationship_ids: Vec<String>,
    pub text_unit_ids: Vec<String>,
    pub period: DateTime<Utc>,
    pub size: u32,
}

impl Community {
    pub fn new(community: i64, level: u32, parent: i64, human_readable_id: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            human_readable_id,
            community,
            level,
            parent,
            children: Vec::new(),
            title: format!("Community {community}"),
            entity_ids: Vec::new(),
            relationship_ids: Vec::new(),
            text_unit_ids: Vec::new(),
            period: Utc::now(),
            size: 0,
        }
    }
}

/// One finding in a community report: a claim plus its supporting explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub summary: String,
    pub explanation: String,
}

/// An LLM-generated summary of a community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityReport {
    pub id: String,
    pub human_readable_id: u64,
    pub community: i64,
    pub level: u32,
    pub parent: i64,
    pub children: Vec<i64>,
    pub title: String,
    pub summary: String,
    pub full_content: String,
    pub rank: f32,
    pub rating_explanation: String,
    pub findings: Vec<Finding>,
    pub full_content_json: String,
    pub period: DateTime<Utc>,
    pub size: u32,
    pub full_content_embedding: Option<Vec<f64>>,
}

/// An optional auxiliary claim attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Covariate {
    pub id: String,
    pub human_readable_id: u64,
    pub subject_id: String,
    pub subject_type: String,
    pub covariate_type: String,
    pub text_unit_ids: Vec<String>,
    pub attributes: HashMap<String, serde_json::Value>,
}
