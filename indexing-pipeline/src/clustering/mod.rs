//! The clusterer (spec §4.9): builds the entity graph, stabilizes it, and
//! runs hierarchical Leiden over it, then assembles the result into
//! `Community` rows.
pub mod graph;
pub mod leiden;

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Utc;
use common::graph::normalize_title;
use common::model::{Community, Entity, Relationship};
use common::table::Table;

pub use graph::EntityGraph;
pub use leiden::ClusterRow;

/// Build the stabilized entity graph, optionally restrict to its largest
/// connected component, and cluster it into a `Community` table.
pub fn cluster_entities(
    entities: &Table<Entity>,
    relationships: &Table<Relationship>,
    max_cluster_size: usize,
    use_lcc: bool,
    seed: Option<u64>,
) -> Table<Community> {
    let built = graph::build_graph(relationships.rows());
    let stabilized = graph::stabilize(&built);
    let working = if use_lcc {
        graph::largest_connected_component(&stabilized)
    } else {
        stabilized
    };

    let rows = leiden::hierarchical_leiden(&working, max_cluster_size.max(1), seed);
    assemble_communities(&rows, entities, relationships)
}

fn assemble_communities(
    rows: &[ClusterRow],
    entities: &Table<Entity>,
    relationships: &Table<Relationship>,
) -> Table<Community> {
    let entity_by_title: HashMap<&str, &Entity> =
        entities.rows().iter().map(|e| (e.title.as_str(), e)).collect();

    let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        if row.parent != -1 {
            children_of.entry(row.parent).or_default().push(row.cluster_id);
        }
    }

    let mut communities = Table::new(Vec::new());
    let mut next_hrid: u64 = 0;
    for row in rows {
        let member_titles: HashSet<String> = row.members.iter().map(|t| normalize_title(t)).collect();

        let mut entity_ids: Vec<String> = Vec::new();
        let mut text_unit_ids: BTreeSet<String> = BTreeSet::new();
        for title in &member_titles {
            if let Some(entity) = entity_by_title.get(title.as_str()) {
                entity_ids.push(entity.id.clone());
                text_unit_ids.extend(entity.text_unit_ids.iter().cloned());
            }
        }
        entity_ids.sort();

        let mut relationship_ids: Vec<String> = Vec::new();
        for relationship in relationships.rows() {
            let source = normalize_title(&relationship.source);
            let target = normalize_title(&relationship.target);
            if member_titles.contains(&source) && member_titles.contains(&target) {
                relationship_ids.push(relationship.id.clone());
                text_unit_ids.extend(relationship.text_unit_ids.iter().cloned());
            }
        }
        relationship_ids.sort();

        let mut community = Community::new(row.cluster_id, row.level, row.parent, next_hrid);
        next_hrid += 1;
        community.children = children_of.get(&row.cluster_id).cloned().unwrap_or_default();
        community.size = entity_ids.len() as u32;
        community.entity_ids = entity_ids;
        community.relationship_ids = relationship_ids;
        community.text_unit_ids = text_unit_ids.into_iter().collect();
        community.period = Utc::now();
        communities.push(community);
    }

    communities.sort_by_id();
    communities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(title: &str) -> Entity {
        let mut e = Entity::new(title.to_string(), "organization".to_string(), 0);
        e.text_unit_ids = vec![format!("tu-{title}")];
        e
    }

    fn rel(source: &str, target: &str) -> Relationship {
        let mut r = Relationship::new(source.to_string(), target.to_string(), 0);
        r.text_unit_ids = vec![format!("tu-{source}-{target}")];
        r
    }

    #[test]
    fn clusters_cover_every_entity_and_hierarchy_is_a_forest() {
        let entities = Table::new(vec![entity("A"), entity("B"), entity("C"), entity("D")]);
        let relationships = Table::new(vec![rel("A", "B"), rel("B", "C"), rel("C", "D"), rel("D", "A")]);
        let communities = cluster_entities(&entities, &relationships, 2, false, Some(42));

        assert!(!communities.is_empty());
        for community in communities.rows() {
            assert_eq!(community.parent == -1, community.level == 0);
            assert_eq!(community.size as usize, community.entity_ids.len());
        }

        let all_entity_ids: HashSet<&String> = communities
            .rows()
            .iter()
            .filter(|c| c.level == 0)
            .flat_map(|c| c.entity_ids.iter())
            .collect();
        assert_eq!(all_entity_ids.len(), 4);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let entities = Table::new(vec![entity("A"), entity("B"), entity("C")]);
        let relationships = Table::new(vec![rel("A", "B"), rel("B", "C")]);
        let first = cluster_entities(&entities, &relationships, 10, false, Some(7));
        let second = cluster_entities(&entities, &relationships, 10, false, Some(7));
        let ids_of = |t: &Table<Community>| -> Vec<(i64, u32, i64)> {
            t.rows().iter().map(|c| (c.community, c.level, c.parent)).collect()
        };
        assert_eq!(ids_of(&first), ids_of(&second));
    }
}
