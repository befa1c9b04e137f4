use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::detector::{Relationship, RelationshipKind};

/// File-level dependency graph of one analysis run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipGraph {
    nodes: BTreeSet<String>,
    /// source -> sorted, de-duplicated targets
    adjacency: BTreeMap<String, Vec<String>>,
    /// target -> sorted, de-duplicated sources
    reverse_adjacency: BTreeMap<String, Vec<String>>,
    /// Kept relationships, in detection order
    relationships: Vec<Relationship>,
    /// Relationships whose endpoints were not analyzed
    dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub relationships: usize,
    pub dropped_relationships: usize,
    pub isolated_nodes: usize,
    pub cyclic_groups: usize,
}

impl RelationshipGraph {
    pub fn build(relationships: Vec<Relationship>, analyzed_files: &[String]) -> Self {
        let nodes: BTreeSet<String> = analyzed_files.iter().cloned().collect();
        let mut adjacency: BTreeMap<String, Vec<String>> =
            nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        let mut reverse_adjacency = adjacency.clone();

        let total = relationships.len();
        let kept: Vec<Relationship> = relationships
            .into_iter()
            .filter(|r| nodes.contains(&r.source) && nodes.contains(&r.target))
            .collect();
        let dropped = total - kept.len();
        if dropped > 0 {
            debug!("Dropped {} relationships with endpoints outside the analyzed set", dropped);
        }

        for relationship in &kept {
            if let Some(targets) = adjacency.get_mut(&relationship.source) {
                targets.push(relationship.target.clone());
            }
            if let Some(sources) = reverse_adjacency.get_mut(&relationship.target) {
                sources.push(relationship.source.clone());
            }
        }
        for list in adjacency.values_mut().chain(reverse_adjacency.values_mut()) {
            list.sort();
            list.dedup();
        }

        Self {
            nodes,
            adjacency,
            reverse_adjacency,
            relationships: kept,
            dropped,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.nodes.contains(file)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn dropped_relationships(&self) -> usize {
        self.dropped
    }

    /// Files `file` points at, sorted by path
    pub fn targets(&self, file: &str) -> &[String] {
        self.adjacency.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Files pointing at `file`, sorted by path
    pub fn sources(&self, file: &str) -> &[String] {
        self.reverse_adjacency.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn out_degree(&self, file: &str) -> usize {
        self.targets(file).len()
    }

    pub fn in_degree(&self, file: &str) -> usize {
        self.sources(file).len()
    }

    /// Every relationship from `source` to `target`, in detection order
    pub fn relationships_between(&self, source: &str, target: &str) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.source == source && r.target == target)
            .collect()
    }

    /// Relationships leaving `source`, optionally restricted to one kind
    pub fn outgoing(&self, source: &str, kind: Option<RelationshipKind>) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.source == source && kind.map_or(true, |k| r.kind == k))
            .collect()
    }

    /// Kind of the first relationship detected between the pair
    pub fn first_kind(&self, source: &str, target: &str) -> Option<RelationshipKind> {
        self.relationships
            .iter()
            .find(|r| r.source == source && r.target == target)
            .map(|r| r.kind)
    }

    /// Fewest-edges path between two files; sorted adjacency keeps it deterministic
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut previous: BTreeMap<&str, &str> = BTreeMap::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for next in self.targets(current) {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                previous.insert(next.as_str(), current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&prior) = previous.get(cursor) {
                        path.push(prior.to_string());
                        cursor = prior;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.as_str());
            }
        }

        None
    }

    /// Groups of files that reach each other (strongly connected, more than one file)
    pub fn cycles(&self) -> Vec<Vec<String>> {
        // Kosaraju: finish order on the graph, then components on the reverse graph
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        for node in &self.nodes {
            if visited.contains(node.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(node.as_str(), 0)];
            visited.insert(node.as_str());
            while let Some((current, index)) = stack.pop() {
                let targets = self.targets(current);
                if index < targets.len() {
                    stack.push((current, index + 1));
                    let next = targets[index].as_str();
                    if visited.insert(next) {
                        stack.push((next, 0));
                    }
                } else {
                    order.push(current);
                }
            }
        }

        let mut assigned = BTreeSet::new();
        let mut groups = Vec::new();
        for &root in order.iter().rev() {
            if !assigned.insert(root) {
                continue;
            }
            let mut group = vec![root.to_string()];
            let mut stack = vec![root];
            while let Some(current) = stack.pop() {
                for source in self.sources(current) {
                    if assigned.insert(source.as_str()) {
                        group.push(source.clone());
                        stack.push(source.as_str());
                    }
                }
            }
            if group.len() > 1 {
                group.sort();
                groups.push(group);
            }
        }

        groups.sort();
        groups
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            edges: self.adjacency.values().map(Vec::len).sum(),
            relationships: self.relationships.len(),
            dropped_relationships: self.dropped,
            isolated_nodes: self
                .nodes
                .iter()
                .filter(|n| self.in_degree(n) == 0 && self.out_degree(n) == 0)
                .count(),
            cyclic_groups: self.cycles().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::relationships::detector::RelationshipDetail;

    fn rel(source: &str, target: &str, kind: RelationshipKind) -> Relationship {
        Relationship {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            detail: RelationshipDetail::default(),
        }
    }

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_dangling_relationships_are_dropped() {
        let graph = RelationshipGraph::build(
            vec![
                rel("a.py", "b.py", RelationshipKind::Imports),
                rel("a.py", "missing.py", RelationshipKind::Calls),
                rel("ghost.py", "b.py", RelationshipKind::Uses),
            ],
            &files(&["a.py", "b.py", "c.py"]),
        );

        assert_eq!(graph.dropped_relationships(), 2);
        assert_eq!(graph.targets("a.py"), &["b.py".to_string()]);
        for relationship in graph.relationships() {
            assert!(graph.contains(&relationship.source));
            assert!(graph.contains(&relationship.target));
        }

        let stats = graph.stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.isolated_nodes, 1);
    }

    #[test]
    fn test_adjacency_is_sorted_and_deduplicated() {
        let graph = RelationshipGraph::build(
            vec![
                rel("hub.rs", "z.rs", RelationshipKind::Calls),
                rel("hub.rs", "a.rs", RelationshipKind::Imports),
                rel("hub.rs", "z.rs", RelationshipKind::Imports),
            ],
            &files(&["hub.rs", "a.rs", "z.rs"]),
        );

        assert_eq!(graph.targets("hub.rs"), &["a.rs".to_string(), "z.rs".to_string()]);
        assert_eq!(graph.out_degree("hub.rs"), 2);
        assert_eq!(graph.in_degree("z.rs"), 1);
        assert_eq!(graph.first_kind("hub.rs", "z.rs"), Some(RelationshipKind::Calls));
        assert_eq!(graph.relationships_between("hub.rs", "z.rs").len(), 2);
    }

    #[test]
    fn test_shortest_path_and_cycles() {
        let graph = RelationshipGraph::build(
            vec![
                rel("a", "b", RelationshipKind::Calls),
                rel("b", "c", RelationshipKind::Calls),
                rel("a", "d", RelationshipKind::Calls),
                rel("d", "c", RelationshipKind::Calls),
                rel("c", "a", RelationshipKind::Uses),
            ],
            &files(&["a", "b", "c", "d", "e"]),
        );

        assert_eq!(graph.shortest_path("a", "c"), Some(files(&["a", "b", "c"])));
        assert_eq!(graph.shortest_path("c", "d"), Some(files(&["c", "a", "d"])));
        assert_eq!(graph.shortest_path("e", "a"), None);
        assert_eq!(graph.shortest_path("a", "nowhere"), None);
        assert_eq!(graph.cycles(), vec![files(&["a", "b", "c", "d"])]);
    }
}
