//! The embedder (spec §4.11): token-bounded snippet splitting, greedy
//! batch bin-packing by count and token budget, bounded-parallel embedding
//! calls, and multi-snippet mean+L2-normalize reconstitution. Generalizes
//! the teacher's `truncate_for_embedding` + single-string embed idiom into
//! the full batching algorithm this section describes.
use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use common::llm::EmbeddingModel;
use common::vector_store::{BaseVectorStore, VectorDocument};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::instrument;

use crate::tokenizer;

#[derive(Debug, Clone)]
pub struct EmbedItem {
    pub id: String,
    pub text: String,
    pub attributes: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingMetrics {
    pub api_calls: u32,
    pub items_embedded: u32,
    pub items_skipped: u32,
}

struct Snippet {
    item_idx: usize,
    text: String,
    tokens: usize,
}

fn split_into_snippets(items: &[EmbedItem], batch_max_tokens: usize) -> Result<Vec<Snippet>, AppError> {
    let mut snippets = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        if item.text.trim().is_empty() {
            continue;
        }
        let total_tokens = tokenizer::count_tokens(&item.text)? as usize;
        if total_tokens <= batch_max_tokens {
            snippets.push(Snippet {
                item_idx: idx,
                text: item.text.clone(),
                tokens: total_tokens,
            });
            continue;
        }
        let ids = tokenizer::encode_ids(&item.text)?;
        for chunk in ids.chunks(batch_max_tokens.max(1)) {
            let text = tokenizer::decode(chunk)?;
            snippets.push(Snippet {
                item_idx,
                text,
                tokens: chunk.len(),
            });
        }
    }
    Ok(snippets)
}

/// Greedily pack snippet indices into batches where both the item count and
/// the summed token count stay within budget.
fn pack_batches(snippets: &[Snippet], batch_size: usize, batch_max_tokens: usize) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;

    for (i, snippet) in snippets.iter().enumerate() {
        let would_exceed_count = current.len() + 1 > batch_size.max(1);
        let would_exceed_tokens = !current.is_empty() && current_tokens + snippet.tokens > batch_max_tokens;
        if !current.is_empty() && (would_exceed_count || would_exceed_tokens) {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(i);
        current_tokens += snippet.tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn mean_normalize(vectors: &[Vec<f64>]) -> Vec<f64> {
    let dims = vectors[0].len();
    let mut mean = vec![0.0f64; dims];
    for vector in vectors {
        for (m, v) in mean.iter_mut().zip(vector.iter()) {
            *m += v;
        }
    }
    let n = vectors.len() as f64;
    for m in mean.iter_mut() {
        *m /= n;
    }
    let norm = mean.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for m in mean.iter_mut() {
            *m /= norm;
        }
    }
    mean
}

#[instrument(skip_all, fields(batch_size = batch.len()))]
async fn embed_one_batch(
    embedding_model: &dyn EmbeddingModel,
    batch: &[String],
) -> Result<Vec<Vec<f64>>, AppError> {
    embedding_model.embed_batch(batch).await
}

/// Embed `items` into `collection` on `vector_store`. Vector-store upsert is
/// chunked by `batch_size` with `overwrite=true` only on the first chunk, so
/// subsequent chunks append rather than clear the collection (spec §4.11).
pub async fn embed_items(
    items: &[EmbedItem],
    embedding_model: Arc<dyn EmbeddingModel>,
    vector_store: Arc<dyn BaseVectorStore>,
    batch_size: usize,
    batch_max_tokens: usize,
    concurrency: usize,
) -> Result<EmbeddingMetrics, AppError> {
    let mut metrics = EmbeddingMetrics::default();
    let snippets = split_into_snippets(items, batch_max_tokens)?;
    if snippets.is_empty() {
        metrics.items_skipped = items.len() as u32;
        return Ok(metrics);
    }

    let batches = pack_batches(&snippets, batch_size, batch_max_tokens);
    let batch_results: Vec<Result<Vec<Vec<f64>>, AppError>> = stream::iter(batches.iter())
        .map(|batch_indices| {
            let embedding_model = Arc::clone(&embedding_model);
            let texts: Vec<String> = batch_indices.iter().map(|&i| snippets[i].text.clone()).collect();
            async move { embed_one_batch(embedding_model.as_ref(), &texts).await }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut item_vectors: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
    for (batch_indices, result) in batches.iter().zip(batch_results) {
        metrics.api_calls += 1;
        let vectors = result?;
        for (&snippet_idx, vector) in batch_indices.iter().zip(vectors) {
            let item_idx = snippets[snippet_idx].item_idx;
            item_vectors.entry(item_idx).or_default().push(vector);
        }
    }

    let mut docs = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(vectors) = item_vectors.get(&idx) else {
            metrics.items_skipped += 1;
            continue;
        };
        let combined = if vectors.len() == 1 {
            vectors[0].clone()
        } else {
            mean_normalize(vectors)
        };
        docs.push(VectorDocument {
            id: item.id.clone(),
            text: Some(item.text.clone()),
            vector: combined.iter().map(|v| *v as f32).collect(),
            attributes: item.attributes.clone(),
        });
        metrics.items_embedded += 1;
    }

    for (i, chunk) in docs.chunks(batch_size.max(1)).enumerate() {
        vector_store.load_documents(chunk.to_vec(), i == 0).await?;
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::mock::MockEmbeddingModel;
    use common::vector_store::hnsw::HnswVectorStore;

    #[tokio::test]
    async fn batches_respect_both_count_and_token_caps() {
        let long_text = "word ".repeat(1000);
        let items: Vec<EmbedItem> = (0..10)
            .map(|i| EmbedItem {
                id: format!("item-{i}"),
                text: long_text.clone(),
                attributes: Value::Null,
            })
            .collect();
        let snippets = split_into_snippets(&items, 3000).unwrap();
        let batches = pack_batches(&snippets, 4, 3000);
        for batch in &batches {
            assert!(batch.len() <= 4);
            let total: usize = batch.iter().map(|&i| snippets[i].tokens).sum();
            assert!(total <= 3000);
        }
    }

    #[tokio::test]
    async fn embeds_and_upserts_items() {
        let embedding_model: Arc<dyn EmbeddingModel> = Arc::new(MockEmbeddingModel::new(8));
        let vector_store: Arc<dyn BaseVectorStore> = Arc::new(HnswVectorStore::new(8));
        let items = vec![
            EmbedItem {
                id: "a".to_string(),
                text: "hello world".to_string(),
                attributes: Value::Null,
            },
            EmbedItem {
                id: "b".to_string(),
                text: "goodbye world".to_string(),
                attributes: Value::Null,
            },
        ];
        let metrics = embed_items(&items, embedding_model, vector_store, 16, 8191, 4)
            .await
            .unwrap();
        assert_eq!(metrics.items_embedded, 2);
        assert_eq!(metrics.items_skipped, 0);
    }

    #[tokio::test]
    async fn empty_text_items_are_skipped() {
        let embedding_model: Arc<dyn EmbeddingModel> = Arc::new(MockEmbeddingModel::new(8));
        let vector_store: Arc<dyn BaseVectorStore> = Arc::new(HnswVectorStore::new(8));
        let items = vec![EmbedItem {
            id: "a".to_string(),
            text: "   ".to_string(),
            attributes: Value::Null,
        }];
        let metrics = embed_items(&items, embedding_model, vector_store, 16, 8191, 4)
            .await
            .unwrap();
        assert_eq!(metrics.items_embedded, 0);
        assert_eq!(metrics.items_skipped, 1);
    }
}
