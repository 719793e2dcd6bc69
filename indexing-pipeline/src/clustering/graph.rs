//! Graph construction and stabilization for the clusterer (spec §4.9).
//! `stabilize` is an idiomatic port of `normalize_node_names`/`_stabilize_graph`
//! from the reference implementation this system was derived from
//! (`original_source/graphrag/src/index/utils/stable_lcc.rs`).
use std::collections::HashMap;

use common::graph::normalize_title;
use common::model::Relationship;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

/// An undirected, weighted entity graph: nodes are normalized entity titles,
/// edges carry the summed relationship weight.
pub type EntityGraph = UnGraph<String, f32>;

/// Build the graph from the relationship table. Self-loops are dropped and
/// duplicate edges between the same pair are merged by summing weight (spec
/// §9 "Cycles in the graph").
pub fn build_graph(relationships: &[Relationship]) -> EntityGraph {
    let mut graph = EntityGraph::default();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

    let mut node_index = |graph: &mut EntityGraph, index_of: &mut HashMap<String, NodeIndex>, title: &str| {
        *index_of
            .entry(title.to_string())
            .or_insert_with(|| graph.add_node(title.to_string()))
    };

    let mut pair_weight: HashMap<(NodeIndex, NodeIndex), f32> = HashMap::new();
    for relationship in relationships {
        let source = normalize_title(&relationship.source);
        let target = normalize_title(&relationship.target);
        if source == target {
            node_index(&mut graph, &mut index_of, &source);
            continue;
        }
        let a = node_index(&mut graph, &mut index_of, &source);
        let b = node_index(&mut graph, &mut index_of, &target);
        let key = if a.index() < b.index() { (a, b) } else { (b, a) };
        *pair_weight.entry(key).or_insert(0.0) += relationship.weight;
    }

    for ((a, b), weight) in pair_weight {
        graph.add_edge(a, b, weight);
    }

    graph
}

/// Rebuild `graph` with nodes sorted by (normalized) name and edges sorted by
/// `(min(u,v), max(u,v))`, so clustering input is independent of insertion
/// order.
pub fn stabilize(graph: &EntityGraph) -> EntityGraph {
    let mut nodes: Vec<String> = graph.node_weights().cloned().collect();
    nodes.sort();

    let mut stable = EntityGraph::default();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();
    for name in &nodes {
        index_of.insert(name.clone(), stable.add_node(name.clone()));
    }

    let mut edges: Vec<(String, String, f32)> = graph
        .edge_references()
        .map(|edge| {
            let a = graph[edge.source()].clone();
            let b = graph[edge.target()].clone();
            let (u, v) = if a <= b { (a, b) } else { (b, a) };
            (u, v, *edge.weight())
        })
        .collect();
    edges.sort_by(|a, b| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));

    for (u, v, weight) in edges {
        stable.add_edge(index_of[&u], index_of[&v], weight);
    }
    stable
}

/// Restrict `graph` to its largest connected component, preserving node
/// identity (titles) but reindexing.
pub fn largest_connected_component(graph: &EntityGraph) -> EntityGraph {
    let components = petgraph::algo::kosaraju_scc(graph);
    let largest = components
        .into_iter()
        .max_by_key(|component| component.len())
        .unwrap_or_default();
    let keep: std::collections::HashSet<NodeIndex> = largest.into_iter().collect();

    let mut induced = EntityGraph::default();
    let mut index_of: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    for node in graph.node_indices() {
        if keep.contains(&node) {
            index_of.insert(node, induced.add_node(graph[node].clone()));
        }
    }
    for edge in graph.edge_references() {
        if let (Some(&a), Some(&b)) = (index_of.get(&edge.source()), index_of.get(&edge.target())) {
            induced.add_edge(a, b, *edge.weight());
        }
    }
    induced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(source: &str, target: &str, weight: f32) -> Relationship {
        let mut r = Relationship::new(source.to_string(), target.to_string(), 0);
        r.weight = weight;
        r
    }

    #[test]
    fn duplicate_edges_are_merged_by_summed_weight() {
        let graph = build_graph(&[rel("a", "b", 1.0), rel("b", "a", 2.0)]);
        assert_eq!(graph.edge_count(), 1);
        let edge = graph.edge_references().next().unwrap();
        assert_eq!(*edge.weight(), 3.0);
    }

    #[test]
    fn self_loops_are_dropped() {
        let graph = build_graph(&[rel("a", "a", 1.0), rel("a", "b", 1.0)]);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn stabilize_is_order_independent() {
        let g1 = build_graph(&[rel("b", "c", 1.0), rel("a", "b", 1.0)]);
        let g2 = build_graph(&[rel("a", "b", 1.0), rel("b", "c", 1.0)]);
        let s1 = stabilize(&g1);
        let s2 = stabilize(&g2);
        let names1: Vec<_> = s1.node_weights().collect();
        let names2: Vec<_> = s2.node_weights().collect();
        assert_eq!(names1, names2);
    }

    #[test]
    fn largest_connected_component_drops_isolated_nodes() {
        let graph = build_graph(&[rel("a", "b", 1.0), rel("c", "d", 1.0), rel("d", "e", 1.0)]);
        let lcc = largest_connected_component(&graph);
        assert_eq!(lcc.node_count(), 3);
    }
}
