//! The chunker (spec §4.6): splits each source document into token-bounded
//! `TextUnit`s. Grounded on the teacher's `pipeline/services.rs::prepare_chunks`,
//! which drives `text_splitter::TextSplitter` sized by the same cached
//! `bert-base-cased` tokenizer used here.
use std::collections::BTreeMap;

use common::config::{ChunkStrategyKind, ChunksConfig};
use common::error::AppError;
use common::model::{Document, TextUnit};
use common::table::Table;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
use unicode_segmentation::UnicodeSegmentation;

use crate::tokenizer;

/// The chunker's output: the produced text units plus, for each source
/// document, the ids of the chunks it contributed to (so the caller can
/// stamp `Document.text_unit_ids` back without the chunker owning `Table<Document>`).
pub struct ChunkOutput {
    pub text_units: Table<TextUnit>,
    pub document_text_unit_ids: BTreeMap<String, Vec<String>>,
}

/// Resolve the grouping key for a document given the configured columns.
/// `"id"` resolves to the document id itself; any other column name is
/// looked up in `metadata` (missing values fall back to the empty string so
/// documents without that field still form a group of their own).
fn group_key(doc: &Document, columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| {
            if col == "id" {
                doc.id.clone()
            } else {
                doc.metadata
                    .get(col)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn metadata_header(doc: &Document) -> String {
    let mut keys: Vec<&String> = doc.metadata.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{k}: {}", doc.metadata[k]))
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_tokens(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    let tok = tokenizer::tokenizer()?;
    let capacity = ChunkCapacity::new(size);
    let config = ChunkConfig::new(capacity)
        .with_overlap(overlap)
        .map_err(|e| AppError::Config(format!("invalid chunk overlap: {e}")))?
        .with_sizer(tok);
    let splitter = TextSplitter::new(config);
    Ok(splitter.chunks(text).map(str::to_string).collect())
}

fn split_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split `documents` into text units per `cfg`. Documents that share a
/// `group_by_columns` key have their text concatenated (in input order)
/// before splitting, so a chunk can legitimately straddle two source
/// documents when they are grouped together.
pub fn chunk_documents(documents: &[Document], cfg: &ChunksConfig) -> Result<ChunkOutput, AppError> {
    let mut groups: Vec<(String, Vec<&Document>)> = Vec::new();
    let mut group_index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for doc in documents {
        let key = group_key(doc, &cfg.group_by_columns);
        match group_index.get(&key) {
            Some(&idx) => groups[idx].1.push(doc),
            None => {
                group_index.insert(key.clone(), groups.len());
                groups.push((key, vec![doc]));
            }
        }
    }

    let mut text_units = Table::new(Vec::new());
    let mut document_text_unit_ids: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut next_human_readable_id: u64 = 0;

    for (_, docs) in groups {
        let header = if cfg.chunk_size_includes_metadata {
            metadata_header(docs[0])
        } else {
            String::new()
        };
        let header_tokens = if header.is_empty() {
            0
        } else {
            tokenizer::count_tokens(&header)? as usize
        };
        if header_tokens >= cfg.size {
            return Err(AppError::Config(format!(
                "document metadata alone ({header_tokens} tokens) meets or exceeds the configured chunk size ({})",
                cfg.size
            )));
        }
        let budget = cfg.size - header_tokens;

        let combined_text = docs
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let raw_chunks = match cfg.strategy {
            ChunkStrategyKind::Tokens => split_tokens(&combined_text, budget, cfg.overlap)?,
            ChunkStrategyKind::Sentences => split_sentences(&combined_text),
        };

        let document_ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();

        for raw in raw_chunks {
            let text = if header.is_empty() {
                raw
            } else {
                format!("{header}\n\n{raw}")
            };
            let n_tokens = tokenizer::count_tokens(&text)?;
            let unit = TextUnit::new(text, n_tokens, document_ids.clone(), next_human_readable_id);
            next_human_readable_id += 1;
            for doc_id in &document_ids {
                document_text_unit_ids
                    .entry(doc_id.clone())
                    .or_default()
                    .push(unit.id.clone());
            }
            text_units.push(unit);
        }
    }

    Ok(ChunkOutput {
        text_units,
        document_text_unit_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn doc(title: &str, text: &str) -> Document {
        Document::new(title.to_string(), "text".to_string(), text.to_string(), 0)
    }

    #[test]
    fn tokens_strategy_respects_configured_size() {
        let cfg = ChunksConfig {
            strategy: ChunkStrategyKind::Tokens,
            size: 20,
            overlap: 0,
            group_by_columns: vec!["id".to_string()],
            chunk_size_includes_metadata: false,
        };
        let long_text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let documents = vec![doc("doc", &long_text)];
        let output = chunk_documents(&documents, &cfg).unwrap();
        assert!(output.text_units.len() > 1);
        for unit in output.text_units.rows() {
            assert!(unit.n_tokens <= cfg.size as u32);
        }
    }

    #[test]
    fn sentences_strategy_splits_on_sentence_boundaries() {
        let cfg = ChunksConfig {
            strategy: ChunkStrategyKind::Sentences,
            size: 1200,
            overlap: 0,
            group_by_columns: vec!["id".to_string()],
            chunk_size_includes_metadata: false,
        };
        let documents = vec![doc("doc", "First sentence. Second sentence. Third one.")];
        let output = chunk_documents(&documents, &cfg).unwrap();
        assert_eq!(output.text_units.len(), 3);
    }

    #[test]
    fn stamps_document_text_unit_ids() {
        let cfg = ChunksConfig::default();
        let documents = vec![doc("a", "Short text."), doc("b", "Another short text.")];
        let output = chunk_documents(&documents, &cfg).unwrap();
        assert_eq!(output.document_text_unit_ids.len(), 2);
        for doc in &documents {
            assert!(!output.document_text_unit_ids[&doc.id].is_empty());
        }
    }

    #[test]
    fn oversized_metadata_header_is_a_config_error() {
        let cfg = ChunksConfig {
            strategy: ChunkStrategyKind::Tokens,
            size: 2,
            overlap: 0,
            group_by_columns: vec!["id".to_string()],
            chunk_size_includes_metadata: true,
        };
        let mut d = doc("doc", "hello world");
        let mut metadata = HashMap::new();
        metadata.insert(
            "source".to_string(),
            serde_json::Value::String("a fairly long metadata value that eats the whole budget".to_string()),
        );
        d.metadata = metadata;
        let err = chunk_documents(&[d], &cfg).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
