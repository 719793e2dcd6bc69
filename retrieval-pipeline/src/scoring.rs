//! Generic score fusion (spec §4.14 local search: combine vector, graph, and
//! rerank signals before assembling context). Generalizes the teacher's
//! `Scored<T>`/`FusionWeights` off `StoredObject` onto `common::table::HasId`,
//! which every row type in this workspace already implements.
use std::cmp::Ordering;

use common::table::HasId;
use serde::{Deserialize, Serialize};

/// Subscores gathered from different retrieval signals for one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub vector: Option<f32>,
    pub graph: Option<f32>,
    pub rerank: Option<f32>,
}

/// An item plus its accumulated retrieval scores and the fused value.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub scores: Scores,
    pub fused: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T) -> Self {
        Self { item, scores: Scores::default(), fused: 0.0 }
    }

    pub const fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self
    }

    pub const fn with_graph_score(mut self, score: f32) -> Self {
        self.scores.graph = Some(score);
        self
    }

    pub const fn with_rerank_score(mut self, score: f32) -> Self {
        self.scores.rerank = Some(score);
        self
    }
}

/// Weights used for linear score fusion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f32,
    pub graph: f32,
    pub rerank: f32,
    pub multi_bonus: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { vector: 0.6, graph: 0.2, rerank: 0.2, multi_bonus: 0.3 }
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| if score.is_finite() { clamp_unit((score - min) / (max - min)) } else { 0.0 })
        .collect()
}

/// Linear fusion of the three signals, with a multiplicative boost when
/// vector and rerank agree (the "golden hit" case).
pub fn fuse_scores(scores: &Scores, weights: FusionWeights) -> f32 {
    let vector = scores.vector.unwrap_or(0.0);
    let graph = scores.graph.unwrap_or(0.0);
    let rerank = scores.rerank.unwrap_or(0.0);

    let mut fused = graph.mul_add(weights.graph, vector.mul_add(weights.vector, rerank * weights.rerank));

    let signals_present =
        scores.vector.iter().chain(scores.graph.iter()).chain(scores.rerank.iter()).count();
    if signals_present >= 2 {
        if scores.vector.is_some() && scores.rerank.is_some() {
            fused *= 1.0 + weights.multi_bonus;
        } else {
            fused += weights.multi_bonus;
        }
    }

    clamp_unit(fused)
}

/// Merge incoming scored items into `target`, keyed by id: a repeated id
/// updates whichever subscores are present rather than overwriting the item.
pub fn merge_scored_by_id<T>(target: &mut std::collections::HashMap<String, Scored<T>>, incoming: Vec<Scored<T>>)
where
    T: HasId + Clone,
{
    for scored in incoming {
        let id = scored.item.id().to_string();
        target
            .entry(id)
            .and_modify(|existing| {
                if let Some(score) = scored.scores.vector {
                    existing.scores.vector = Some(score);
                }
                if let Some(score) = scored.scores.graph {
                    existing.scores.graph = Some(score);
                }
                if let Some(score) = scored.scores.rerank {
                    existing.scores.rerank = Some(score);
                }
            })
            .or_insert_with(|| Scored { item: scored.item.clone(), scores: scored.scores, fused: scored.fused });
    }
}

pub fn sort_by_fused_desc<T>(items: &mut [Scored<T>])
where
    T: HasId,
{
    items.sort_by(|a, b| b.fused.partial_cmp(&a.fused).unwrap_or(Ordering::Equal).then_with(|| a.item.id().cmp(b.item.id())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_normalize_maps_to_unit_range() {
        let normalized = min_max_normalize(&[1.0, 2.0, 3.0]);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn min_max_normalize_constant_input_is_all_ones() {
        assert_eq!(min_max_normalize(&[5.0, 5.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn fuse_scores_boosts_when_vector_and_rerank_agree() {
        let weights = FusionWeights::default();
        let both = Scores { vector: Some(0.8), rerank: Some(0.8), graph: None };
        let vector_only = Scores { vector: Some(0.8), rerank: None, graph: None };
        assert!(fuse_scores(&both, weights) > fuse_scores(&vector_only, weights));
    }

    #[test]
    fn sort_by_fused_desc_breaks_ties_by_id() {
        use common::model::Entity;
        let mut a = Scored::new(Entity::new("A".to_string(), "organization".to_string(), 0));
        let mut b = Scored::new(Entity::new("B".to_string(), "organization".to_string(), 1));
        a.fused = 0.5;
        b.fused = 0.5;
        a.item.id = "aaa".to_string();
        b.item.id = "bbb".to_string();
        let mut items = vec![b.clone(), a.clone()];
        sort_by_fused_desc(&mut items);
        assert_eq!(items[0].item.id, "aaa");
    }
}
