//! Incremental re-indexing (spec §4.12): new-document delta, snapshot of the
//! prior output, a full run over just the delta, then a merge back into the
//! live output with deterministic community-id reassignment (spec §9).
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use common::error::AppError;
use common::model::{Community, Document};
use common::storage::PipelineStorage;
use common::table::Table;
use tracing::{info, warn};

/// Documents in `incoming` whose id is not already present in `prior`.
pub fn compute_delta(prior: &Table<Document>, incoming: &Table<Document>) -> Table<Document> {
    let mut delta = Vec::new();
    for doc in incoming.rows() {
        if prior.find_by_id(&doc.id).is_none() {
            delta.push(doc.clone());
        }
    }
    Table::new(delta)
}

/// Copy every key under `storage` into `storage.child("previous").child(timestamp)`.
/// `PipelineStorage` has no native "copy tree" op, so this is a `find` + `get`/`set` loop
/// (spec §4.12).
pub async fn snapshot_previous(storage: &Arc<dyn PipelineStorage>, timestamp: &str) -> Result<(), AppError> {
    let everything = regex::Regex::new(".*").map_err(|e| AppError::Internal(e.to_string()))?;
    let keys = storage.find(&everything, None, None).await?;
    let snapshot = storage.child("previous").child(timestamp);
    for key in keys {
        if let Some(bytes) = storage.get(&key).await? {
            snapshot.set(&key, bytes).await?;
        }
    }
    Ok(())
}

/// A sorted, hashed digest of a community's `entity_ids` set — the key
/// communities are matched on across a merge (spec §9).
fn entity_digest(entity_ids: &[String]) -> String {
    let set: BTreeSet<&String> = entity_ids.iter().collect();
    let joined = set.into_iter().cloned().collect::<Vec<_>>().join("\u{0}");
    blake3::hash(joined.as_bytes()).to_hex().to_string()
}

/// Merge a delta community table into a prior one, keyed by `entity_ids`
/// digest rather than by `id`: a prior community whose digest reappears
/// unchanged keeps its `id`/`human_readable_id`; a prior community with no
/// surviving entities is dropped; everything else in the merged set gets a
/// fresh id via `next_hrid`.
pub fn merge_communities(
    prior: &Table<Community>,
    merged_graph_communities: Table<Community>,
    surviving_entity_ids: &HashSet<String>,
    next_hrid_start: u64,
) -> Table<Community> {
    let prior_by_digest: HashMap<String, &Community> = prior
        .rows()
        .iter()
        .map(|c| (entity_digest(&c.entity_ids), c))
        .collect();

    let mut next_hrid = next_hrid_start;
    let mut out = Vec::new();
    for mut community in merged_graph_communities.into_rows() {
        if community.entity_ids.is_empty() {
            continue;
        }
        let still_present = community
            .entity_ids
            .iter()
            .any(|id| surviving_entity_ids.contains(id));
        if !still_present {
            continue;
        }

        let digest = entity_digest(&community.entity_ids);
        if let Some(prior_match) = prior_by_digest.get(&digest) {
            community.id = prior_match.id.clone();
            community.human_readable_id = prior_match.human_readable_id;
        } else {
            community.human_readable_id = next_hrid;
            next_hrid += 1;
        }
        out.push(community);
    }

    let mut table = Table::new(out);
    table.sort_by_id();
    table
}

/// `compute_delta` returning zero rows is not an error: log and let the
/// caller exit 0 without mutating anything (spec §4.12, S5).
pub fn warn_if_empty_delta(delta: &Table<Document>) -> bool {
    if delta.is_empty() {
        warn!("no new documents");
        true
    } else {
        info!(new_documents = delta.len(), "computed incremental delta");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str) -> Document {
        Document::new(title.to_string(), "text".to_string(), format!("body of {title}"), 0)
    }

    #[test]
    fn delta_excludes_documents_already_present() {
        let a = doc("A");
        let b = doc("B");
        let prior = Table::new(vec![a.clone()]);
        let incoming = Table::new(vec![a, b.clone()]);
        let delta = compute_delta(&prior, &incoming);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.rows()[0].id, b.id);
    }

    #[test]
    fn empty_delta_is_flagged() {
        let prior = Table::new(vec![doc("A")]);
        let incoming = Table::new(vec![doc("A")]);
        let delta = compute_delta(&prior, &incoming);
        assert!(warn_if_empty_delta(&delta));
    }

    #[test]
    fn unchanged_community_keeps_its_id() {
        let mut prior_community = Community::new(0, 0, -1, 5);
        prior_community.entity_ids = vec!["e1".to_string(), "e2".to_string()];
        let prior = Table::new(vec![prior_community.clone()]);

        let mut merged_community = Community::new(99, 0, -1, 0);
        merged_community.entity_ids = vec!["e2".to_string(), "e1".to_string()];
        let merged = Table::new(vec![merged_community]);

        let surviving: HashSet<String> = ["e1".to_string(), "e2".to_string()].into_iter().collect();
        let result = merge_communities(&prior, merged, &surviving, 10);
        assert_eq!(result.rows()[0].id, prior_community.id);
        assert_eq!(result.rows()[0].human_readable_id, 5);
    }

    #[test]
    fn community_with_no_surviving_entities_is_dropped() {
        let mut prior_community = Community::new(0, 0, -1, 5);
        prior_community.entity_ids = vec!["e1".to_string()];
        let prior = Table::new(vec![prior_community]);

        let mut merged_community = Community::new(1, 0, -1, 0);
        merged_community.entity_ids = vec!["e1".to_string()];
        let merged = Table::new(vec![merged_community]);

        let surviving: HashSet<String> = HashSet::new();
        let result = merge_communities(&prior, merged, &surviving, 10);
        assert!(result.is_empty());
    }

    #[test]
    fn new_community_gets_a_fresh_human_readable_id() {
        let prior: Table<Community> = Table::new(Vec::new());
        let mut merged_community = Community::new(0, 0, -1, 0);
        merged_community.entity_ids = vec!["e1".to_string()];
        let merged = Table::new(vec![merged_community]);
        let surviving: HashSet<String> = ["e1".to_string()].into_iter().collect();
        let result = merge_communities(&prior, merged, &surviving, 42);
        assert_eq!(result.rows()[0].human_readable_id, 42);
    }
}
