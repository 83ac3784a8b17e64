//! Composite influence scoring, ranking and organization-level distribution
//! statistics.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::KEY_INFLUENCER_COUNT;
use crate::errors::OrgNetResult;
use crate::graph::OrgGraph;
use crate::models::{Person, ScoreFields};
use crate::store::GraphStore;

pub const NETWORK_WEIGHT: f64 = 0.30;
pub const VOLUME_WEIGHT: f64 = 0.20;
pub const RESPONSE_WEIGHT: f64 = 0.15;
pub const BRIDGING_WEIGHT: f64 = 0.20;
pub const TEMPORAL_WEIGHT: f64 = 0.15;

/// Reciprocity ratios above this cap count the same.
const RESPONSE_RATIO_CAP: f64 = 2.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluenceComponents {
    pub network: f64,
    pub volume: f64,
    pub response: f64,
    pub bridging: f64,
    pub temporal: f64,
}

impl InfluenceComponents {
    pub fn composite(&self) -> f64 {
        NETWORK_WEIGHT * self.network
            + VOLUME_WEIGHT * self.volume
            + RESPONSE_WEIGHT * self.response
            + BRIDGING_WEIGHT * self.bridging
            + TEMPORAL_WEIGHT * self.temporal
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluenceEntry {
    pub email: String,
    pub department: Option<String>,
    pub score: f64,
    pub components: InfluenceComponents,
    pub rank: i64,
    pub percentile: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentCount {
    pub department: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluenceSummary {
    pub scored_count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub max: f64,
    pub top_decile_departments: Vec<DepartmentCount>,
    pub top_influencers: Vec<String>,
}

/// Divide by the organization maximum with the denominator floored at 1.
fn normalized(value: f64, max: f64) -> f64 {
    value / max.max(1.0)
}

fn max_of(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::max)
}

/// Score every graph node. `persons[i]` must be node `i` of `graph` and carry
/// the centrality written by the centrality stage.
pub fn score_components(persons: &[Person], graph: &OrgGraph) -> Vec<InfluenceComponents> {
    let n = graph.node_count();
    let max_sent = max_of(graph.sent.iter().copied());
    let max_received = max_of(graph.received.iter().copied());
    let max_contacts = max_of((0..n).map(|i| graph.degree(i) as f64));
    let max_recent = max_of(graph.recent.iter().copied());

    (0..n)
        .map(|i| {
            let person = &persons[i];
            let network = if graph.is_isolated(i) {
                0.0
            } else {
                0.3 * person.degree_centrality
                    + 0.3 * person.betweenness_centrality
                    + 0.4 * person.pagerank
            };
            let volume = 0.3 * normalized(graph.sent[i], max_sent)
                + 0.3 * normalized(graph.received[i], max_received)
                + 0.4 * normalized(graph.degree(i) as f64, max_contacts);
            let ratio = graph.received[i] / graph.sent[i].max(1.0);
            let response = ratio.min(RESPONSE_RATIO_CAP) / RESPONSE_RATIO_CAP;
            let bridging = bridging_fraction(graph, i);
            let temporal = normalized(graph.recent[i], max_recent);
            InfluenceComponents {
                network,
                volume,
                response,
                bridging,
                temporal,
            }
        })
        .collect()
}

/// Fraction of a node's neighbors that sit in a different known department.
pub fn bridging_fraction(graph: &OrgGraph, idx: usize) -> f64 {
    let Some(own) = graph.departments[idx].as_deref() else {
        return 0.0;
    };
    let neighbors = graph.neighbors(idx);
    if neighbors.is_empty() {
        return 0.0;
    }
    let cross = neighbors
        .iter()
        .filter(|(nbr, _)| matches!(graph.departments[*nbr].as_deref(), Some(d) if d != own))
        .count();
    cross as f64 / neighbors.len() as f64
}

/// Sort descending by score and assign 1-based rank and percentile. The sort
/// is stable, so equal scores keep their input order.
pub fn rank_entries(mut entries: Vec<InfluenceEntry>) -> Vec<InfluenceEntry> {
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    let total = entries.len() as f64;
    for (i, entry) in entries.iter_mut().enumerate() {
        let rank = i as i64 + 1;
        entry.rank = rank;
        entry.percentile = (total - rank as f64 + 1.0) / total * 100.0;
    }
    entries
}

pub fn compute_influence(persons: &[Person], graph: &OrgGraph) -> Vec<InfluenceEntry> {
    let components = score_components(persons, graph);
    let entries = persons
        .iter()
        .zip(components)
        .map(|(person, components)| InfluenceEntry {
            email: person.email.clone(),
            department: person.department.clone(),
            score: components.composite(),
            components,
            rank: 0,
            percentile: 0.0,
        })
        .collect();
    rank_entries(entries)
}

/// Distribution statistics over ranked entries (highest score first).
pub fn summarize(ranked: &[InfluenceEntry]) -> InfluenceSummary {
    let n = ranked.len();
    let scores: Vec<f64> = ranked.iter().map(|e| e.score).collect();
    let mean = if n == 0 {
        0.0
    } else {
        scores.iter().sum::<f64>() / n as f64
    };
    let median = match n {
        0 => 0.0,
        _ if n % 2 == 1 => scores[n / 2],
        _ => (scores[n / 2 - 1] + scores[n / 2]) / 2.0,
    };
    let std_dev = if n == 0 {
        0.0
    } else {
        (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64).sqrt()
    };

    let decile = n.div_ceil(10);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in ranked.iter().take(decile) {
        if let Some(dept) = entry.department.as_deref() {
            *counts.entry(dept).or_insert(0) += 1;
        }
    }
    let mut top_decile_departments: Vec<DepartmentCount> = counts
        .into_iter()
        .map(|(department, count)| DepartmentCount {
            department: department.to_string(),
            count,
        })
        .collect();
    top_decile_departments.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.department.cmp(&b.department))
    });

    InfluenceSummary {
        scored_count: n,
        mean,
        median,
        std_dev,
        max: scores.first().copied().unwrap_or(0.0),
        top_decile_departments,
        top_influencers: ranked
            .iter()
            .filter(|e| e.score > 0.0)
            .take(KEY_INFLUENCER_COUNT)
            .map(|e| e.email.clone())
            .collect(),
    }
}

/// Score, rank and persist influence for every person in the organization.
pub fn score_influence(
    graph_store: &dyn GraphStore,
    organization_id: &str,
) -> OrgNetResult<(InfluenceSummary, Vec<InfluenceEntry>)> {
    let started = Instant::now();
    let persons = graph_store.get_persons(organization_id)?;
    let edges = graph_store.get_edges(organization_id)?;
    let graph = OrgGraph::from_parts(&persons, &edges);
    let ranked = compute_influence(&persons, &graph);

    let updates: Vec<(String, ScoreFields)> = ranked
        .iter()
        .map(|e| {
            (
                e.email.clone(),
                ScoreFields::Influence {
                    score: e.score,
                    rank: e.rank,
                    percentile: e.percentile,
                    response: e.components.response,
                    bridging: e.components.bridging,
                },
            )
        })
        .collect();
    graph_store.write_scores_batch(organization_id, &updates)?;

    let summary = summarize(&ranked);
    info!(
        organization_id,
        scored = summary.scored_count,
        mean = summary.mean,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "influence scored"
    );
    Ok((summary, ranked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::centrality::{compute_centrality, CentralityConfig};
    use crate::graph::test_support::{edge, person};

    fn entry(email: &str, score: f64) -> InfluenceEntry {
        InfluenceEntry {
            email: email.to_string(),
            department: None,
            score,
            components: InfluenceComponents::default(),
            rank: 0,
            percentile: 0.0,
        }
    }

    /// Copy computed centrality onto persons the way the store would.
    fn with_centrality(mut persons: Vec<Person>, graph: &OrgGraph) -> Vec<Person> {
        let result = compute_centrality(graph, &CentralityConfig::default());
        for (p, s) in persons.iter_mut().zip(result.scores) {
            p.degree_centrality = s.degree;
            p.betweenness_centrality = s.betweenness;
            p.closeness_centrality = s.closeness;
            p.pagerank = s.pagerank;
        }
        persons
    }

    #[test]
    fn weights_sum_to_one() {
        let total =
            NETWORK_WEIGHT + VOLUME_WEIGHT + RESPONSE_WEIGHT + BRIDGING_WEIGHT + TEMPORAL_WEIGHT;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_input_order() {
        let ranked = rank_entries(vec![
            entry("first", 0.5),
            entry("top", 0.9),
            entry("second", 0.5),
            entry("third", 0.5),
        ]);
        let order: Vec<&str> = ranked.iter().map(|e| e.email.as_str()).collect();
        assert_eq!(order, vec!["top", "first", "second", "third"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].percentile, 100.0);
        assert_eq!(ranked[3].percentile, 25.0);
    }

    #[test]
    fn zero_edge_graph_scores_zero() {
        let persons = vec![person("a", Some("Eng")), person("b", Some("Ops"))];
        let graph = OrgGraph::from_parts(&persons, &[]);
        let ranked = compute_influence(&persons, &graph);
        assert!(ranked.iter().all(|e| e.score == 0.0));
        assert_eq!(ranked[0].email, "a");
    }

    #[test]
    fn three_person_example_leaves_isolated_node_at_zero() {
        let persons = vec![person("a", None), person("b", None), person("c", None)];
        // a -> c was suppressed by the threshold and never reached the store.
        let edges = vec![edge("a", "b", 10), edge("b", "a", 8)];
        let graph = OrgGraph::from_parts(&persons, &edges);
        let persons = with_centrality(persons, &graph);
        let ranked = compute_influence(&persons, &graph);

        let score_of = |id: &str| ranked.iter().find(|e| e.email == id).unwrap().score;
        assert!(score_of("a") > 0.0);
        assert!(score_of("b") > 0.0);
        assert_eq!(score_of("c"), 0.0);
        assert_eq!(ranked[2].email, "c");
    }

    #[test]
    fn response_ratio_is_capped() {
        let persons = vec![person("talker", None), person("listener", None)];
        let edges = vec![edge("talker", "listener", 9), edge("listener", "talker", 1)];
        let graph = OrgGraph::from_parts(&persons, &edges);
        let components = score_components(&persons, &graph);
        assert!((components[0].response - (1.0 / 9.0) / 2.0).abs() < 1e-12);
        assert_eq!(components[1].response, 1.0);
    }

    #[test]
    fn bridging_counts_cross_department_neighbors() {
        let persons = vec![
            person("a", Some("Eng")),
            person("b", Some("Eng")),
            person("c", Some("Sales")),
            person("d", None),
        ];
        let edges = vec![edge("a", "b", 2), edge("a", "c", 2), edge("a", "d", 2)];
        let graph = OrgGraph::from_parts(&persons, &edges);
        assert!((bridging_fraction(&graph, 0) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(bridging_fraction(&graph, 3), 0.0);
    }

    #[test]
    fn summary_statistics_and_top_decile() {
        let mut entries: Vec<InfluenceEntry> = (0..20)
            .map(|i| entry(&format!("p{i}"), i as f64 / 20.0))
            .collect();
        entries[19].department = Some("Eng".into());
        entries[18].department = Some("Eng".into());
        let ranked = rank_entries(entries);
        let summary = summarize(&ranked);

        assert_eq!(summary.scored_count, 20);
        assert!((summary.mean - 0.475).abs() < 1e-12);
        assert!((summary.median - 0.475).abs() < 1e-12);
        assert_eq!(summary.max, 0.95);
        assert_eq!(
            summary.top_decile_departments,
            vec![DepartmentCount {
                department: "Eng".into(),
                count: 2
            }]
        );
        assert_eq!(summary.top_influencers, vec!["p19", "p18", "p17"]);
    }
}
