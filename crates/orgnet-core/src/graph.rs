//! Dense, index-addressed view of one organization's communication graph.
//!
//! Stages load persons and edges from the store once and run every traversal
//! against this view, so no algorithm depends on the storage backend.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::models::{CommunicationEdge, Person};

/// Directed weighted adjacency plus its undirected projection.
///
/// Node `i` corresponds to `persons[i]` in the slice the graph was built from,
/// so input order is preserved for stable ranking.
#[derive(Debug, Default)]
pub struct OrgGraph {
    pub ids: Vec<String>,
    pub index: HashMap<String, usize>,
    pub departments: Vec<Option<String>>,
    /// `(target, message_count)` per source, sorted by target.
    pub outgoing: Vec<Vec<(usize, f64)>>,
    /// `(source, message_count)` per target, sorted by source.
    pub incoming: Vec<Vec<(usize, f64)>>,
    /// `(neighbor, combined weight of both directions)`, sorted by neighbor.
    pub undirected: Vec<Vec<(usize, f64)>>,
    pub sent: Vec<f64>,
    pub received: Vec<f64>,
    pub recent: Vec<f64>,
    edge_count: usize,
}

impl OrgGraph {
    pub fn from_parts(persons: &[Person], edges: &[CommunicationEdge]) -> Self {
        let n = persons.len();
        let ids: Vec<String> = persons.iter().map(|p| p.email.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let departments = persons.iter().map(|p| p.department.clone()).collect();

        let mut directed: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
        let mut skipped = 0usize;
        for edge in edges {
            let (Some(&s), Some(&t)) = (index.get(&edge.source), index.get(&edge.target)) else {
                skipped += 1;
                continue;
            };
            if s == t || edge.message_count <= 0 {
                skipped += 1;
                continue;
            }
            let entry = directed.entry((s, t)).or_insert((0.0, 0.0));
            entry.0 += edge.message_count as f64;
            entry.1 += edge.recent_count.max(0) as f64;
        }
        if skipped > 0 {
            warn!(skipped, "ignored edges with unknown endpoints, self-loops or zero weight");
        }

        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        let mut sent = vec![0.0; n];
        let mut received = vec![0.0; n];
        let mut recent = vec![0.0; n];
        let mut pairs: BTreeMap<(usize, usize), f64> = BTreeMap::new();

        for (&(s, t), &(weight, recent_weight)) in &directed {
            outgoing[s].push((t, weight));
            incoming[t].push((s, weight));
            sent[s] += weight;
            received[t] += weight;
            recent[s] += recent_weight;
            recent[t] += recent_weight;
            *pairs.entry((s.min(t), s.max(t))).or_insert(0.0) += weight;
        }
        for list in incoming.iter_mut() {
            list.sort_by_key(|(src, _)| *src);
        }

        let mut undirected = vec![Vec::new(); n];
        for (&(a, b), &weight) in &pairs {
            undirected[a].push((b, weight));
            undirected[b].push((a, weight));
        }
        for list in undirected.iter_mut() {
            list.sort_by_key(|(nbr, _)| *nbr);
        }

        Self {
            ids,
            index,
            departments,
            outgoing,
            incoming,
            undirected,
            sent,
            received,
            recent,
            edge_count: directed.len(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Number of distinct directed edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn neighbors(&self, idx: usize) -> &[(usize, f64)] {
        &self.undirected[idx]
    }

    /// Distinct undirected neighbors.
    pub fn degree(&self, idx: usize) -> usize {
        self.undirected[idx].len()
    }

    pub fn is_isolated(&self, idx: usize) -> bool {
        self.undirected[idx].is_empty()
    }

    /// Directed density: edges over `n * (n - 1)` possible edges.
    pub fn density(&self) -> f64 {
        let n = self.node_count() as f64;
        if n < 2.0 {
            return 0.0;
        }
        self.edge_count as f64 / (n * (n - 1.0))
    }

    /// Mean number of distinct undirected neighbors.
    pub fn average_degree(&self) -> f64 {
        let n = self.node_count();
        if n == 0 {
            return 0.0;
        }
        let total: usize = (0..n).map(|i| self.degree(i)).sum();
        total as f64 / n as f64
    }

    /// Sum of undirected edge weights (each pair counted once).
    pub fn total_weight(&self) -> f64 {
        self.undirected
            .iter()
            .flat_map(|list| list.iter().map(|(_, w)| *w))
            .sum::<f64>()
            / 2.0
    }

    /// Weighted undirected degree.
    pub fn strength(&self, idx: usize) -> f64 {
        self.undirected[idx].iter().map(|(_, w)| *w).sum()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{edge, person};
    use super::*;

    #[test]
    fn builds_directed_and_undirected_views() {
        let persons = vec![person("a", None), person("b", None), person("c", None)];
        let edges = vec![edge("a", "b", 10), edge("b", "a", 8), edge("a", "c", 1)];
        let graph = OrgGraph::from_parts(&persons, &edges);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.neighbors(0), &[(1, 18.0), (2, 1.0)]);
        assert_eq!(graph.sent[0], 11.0);
        assert_eq!(graph.received[0], 8.0);
        assert!((graph.density() - 0.5).abs() < 1e-12);
        assert!((graph.total_weight() - 19.0).abs() < 1e-12);
    }

    #[test]
    fn drops_self_loops_and_unknown_endpoints() {
        let persons = vec![person("a", None), person("b", None)];
        let edges = vec![edge("a", "a", 4), edge("a", "zed", 3), edge("a", "b", 2)];
        let graph = OrgGraph::from_parts(&persons, &edges);
        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.is_isolated(1));
    }

    #[test]
    fn empty_graph_has_zero_density() {
        let graph = OrgGraph::from_parts(&[], &[]);
        assert_eq!(graph.density(), 0.0);
        assert_eq!(graph.average_degree(), 0.0);
    }
}
