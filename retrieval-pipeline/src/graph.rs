//! Relationship-graph expansion (spec §4.14 local search: "expand to related
//! entities via relationship graph ranked by entity rank"). Generalizes the
//! teacher's `find_entities_by_relationship_by_id` off SurrealQL edge queries
//! onto the in-memory `Relationship` table — edges here are keyed by entity
//! `title`, not an opaque id, since that's how `Relationship.source`/`target`
//! are stored (spec §3).
use std::collections::{HashMap, HashSet};

use common::model::{Entity, Relationship};
use common::table::Table;

/// Entities connected to `title` by any relationship, nearest by
/// `combined_degree` first, deduplicated, excluding `title` itself.
pub fn find_related_entities(relationships: &Table<Relationship>, entities: &Table<Entity>, title: &str, limit: usize) -> Vec<Entity> {
    let mut matched: Vec<&Relationship> =
        relationships.rows().iter().filter(|r| r.source == title || r.target == title).collect();
    matched.sort_by(|a, b| b.combined_degree.cmp(&a.combined_degree));

    let mut neighbor_titles: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for rel in matched {
        let neighbor = if rel.source == title { &rel.target } else { &rel.source };
        if neighbor != title && seen.insert(neighbor.clone()) {
            neighbor_titles.push(neighbor.clone());
        }
    }

    if limit > 0 && neighbor_titles.len() > limit {
        neighbor_titles.truncate(limit);
    }

    let entity_by_title: HashMap<&str, &Entity> = entities.rows().iter().map(|e| (e.title.as_str(), e)).collect();
    neighbor_titles.into_iter().filter_map(|t| entity_by_title.get(t.as_str()).map(|e| (*e).clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(title: &str) -> Entity {
        Entity::new(title.to_string(), "organization".to_string(), 0)
    }

    fn relationship(source: &str, target: &str, combined_degree: u32) -> Relationship {
        let mut r = Relationship::new(source.to_string(), target.to_string(), 0);
        r.combined_degree = combined_degree;
        r
    }

    #[test]
    fn finds_neighbors_in_both_directions() {
        let entities = Table::new(vec![entity("A"), entity("B"), entity("C")]);
        let relationships = Table::new(vec![relationship("A", "B", 2), relationship("C", "A", 1)]);
        let mut neighbors: Vec<String> = find_related_entities(&relationships, &entities, "A", 10).into_iter().map(|e| e.title).collect();
        neighbors.sort();
        assert_eq!(neighbors, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn ranks_by_combined_degree_and_respects_limit() {
        let entities = Table::new(vec![entity("A"), entity("B"), entity("C")]);
        let relationships = Table::new(vec![relationship("A", "B", 1), relationship("A", "C", 5)]);
        let neighbors = find_related_entities(&relationships, &entities, "A", 1);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].title, "C");
    }

    #[test]
    fn unrelated_entity_has_no_neighbors() {
        let entities = Table::new(vec![entity("A"), entity("B")]);
        let relationships: Table<Relationship> = Table::new(Vec::new());
        assert!(find_related_entities(&relationships, &entities, "A", 10).is_empty());
    }
}
