//! Modularity-driven community detection over the undirected projection.
//!
//! Local moving (the first Louvain phase) from singleton communities, bounded
//! by an iteration cap, followed by a pass that folds undersized communities
//! into their most strongly connected neighbor or marks them isolated.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AnalysisOptions;
use crate::errors::OrgNetResult;
use crate::graph::OrgGraph;
use crate::models::ScoreFields;
use crate::store::GraphStore;

const GAIN_EPSILON: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq)]
pub struct CommunityConfig {
    pub min_size: usize,
    pub max_iterations: usize,
    pub merge_small: bool,
}

impl CommunityConfig {
    pub fn from_options(options: &AnalysisOptions) -> Self {
        Self {
            min_size: options.min_community_size.max(1),
            max_iterations: options.community_iterations(),
            merge_small: options.merge_small_communities,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySummary {
    pub modularity: f64,
    pub community_count: usize,
    pub average_size: f64,
    pub largest_size: usize,
    pub isolated_count: usize,
    pub iterations: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    /// Dense community id per node; `None` for isolated nodes.
    pub labels: Vec<Option<usize>>,
    pub iterations: usize,
}

/// Louvain local moving. Returns a raw (non-dense) label per node and the
/// number of sweeps performed. Zero-degree nodes keep their singleton label.
pub fn local_moving(graph: &OrgGraph, max_iterations: usize) -> (Vec<usize>, usize) {
    let n = graph.node_count();
    let mut community: Vec<usize> = (0..n).collect();
    let two_m = 2.0 * graph.total_weight();
    if two_m <= 0.0 {
        return (community, 0);
    }
    let strength: Vec<f64> = (0..n).map(|i| graph.strength(i)).collect();
    let mut total: Vec<f64> = strength.clone();

    let mut sweeps = 0;
    while sweeps < max_iterations {
        sweeps += 1;
        let mut moved = 0usize;
        for node in 0..n {
            if graph.is_isolated(node) {
                continue;
            }
            let k = strength[node];
            let current = community[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(nbr, w) in graph.neighbors(node) {
                *links.entry(community[nbr]).or_insert(0.0) += w;
            }

            total[current] -= k;
            let gain = |c: usize, k_in: f64| k_in - total[c] * k / two_m;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&candidate, &k_in) in &links {
                let g = gain(candidate, k_in);
                if g > best_gain + GAIN_EPSILON {
                    best = candidate;
                    best_gain = g;
                }
            }
            total[best] += k;
            if best != current {
                community[node] = best;
                moved += 1;
            }
        }
        debug!(sweep = sweeps, moved, "community local moving sweep");
        if moved == 0 {
            break;
        }
    }
    (community, sweeps)
}

/// Fold undersized communities into the neighbor community they share the
/// most weight with, or drop them to isolated when `merge_small` is off or
/// no neighbor exists. Zero-degree nodes are always isolated.
fn settle_small_communities(
    graph: &OrgGraph,
    raw: &[usize],
    config: &CommunityConfig,
) -> Vec<Option<usize>> {
    let n = graph.node_count();
    let mut labels: Vec<Option<usize>> = (0..n)
        .map(|i| (!graph.is_isolated(i)).then_some(raw[i]))
        .collect();

    let sizes = |labels: &[Option<usize>]| {
        let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
        for label in labels.iter().flatten() {
            *sizes.entry(*label).or_insert(0) += 1;
        }
        sizes
    };

    if config.merge_small {
        let mut small: Vec<(usize, usize)> = sizes(&labels)
            .into_iter()
            .filter(|(_, size)| *size < config.min_size)
            .map(|(label, size)| (size, label))
            .collect();
        small.sort();

        for (_, label) in small {
            let current = sizes(&labels);
            match current.get(&label) {
                Some(&size) if size < config.min_size => {}
                _ => continue,
            }
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for node in (0..n).filter(|&i| labels[i] == Some(label)) {
                for &(nbr, w) in graph.neighbors(node) {
                    if let Some(other) = labels[nbr].filter(|&c| c != label) {
                        *links.entry(other).or_insert(0.0) += w;
                    }
                }
            }
            let target = links
                .into_iter()
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(c, _)| c);
            if let Some(target) = target {
                for slot in labels.iter_mut().filter(|l| **l == Some(label)) {
                    *slot = Some(target);
                }
            }
        }
    }

    let final_sizes = sizes(&labels);
    for slot in labels.iter_mut() {
        if let Some(label) = *slot {
            if final_sizes.get(&label).copied().unwrap_or(0) < config.min_size {
                *slot = None;
            }
        }
    }

    // Renumber densely in order of first member.
    let mut dense: HashMap<usize, usize> = HashMap::new();
    labels
        .into_iter()
        .map(|label| {
            label.map(|raw| {
                let next = dense.len();
                *dense.entry(raw).or_insert(next)
            })
        })
        .collect()
}

pub fn detect_communities(graph: &OrgGraph, config: &CommunityConfig) -> Partition {
    let (raw, iterations) = local_moving(graph, config.max_iterations);
    Partition {
        labels: settle_small_communities(graph, &raw, config),
        iterations,
    }
}

/// Newman modularity of a labelling on the weighted undirected projection.
/// Unlabelled nodes count as singleton communities. Zero when there are no
/// edges.
pub fn modularity(graph: &OrgGraph, labels: &[Option<usize>]) -> f64 {
    let m = graph.total_weight();
    if m <= 0.0 {
        return 0.0;
    }

    #[derive(PartialEq, Eq, Hash)]
    enum Group {
        Label(usize),
        Alone(usize),
    }
    let group = |i: usize| match labels[i] {
        Some(label) => Group::Label(label),
        None => Group::Alone(i),
    };

    // (internal weight, total strength) per group
    let mut groups: HashMap<Group, (f64, f64)> = HashMap::new();
    for i in 0..graph.node_count() {
        let entry = groups.entry(group(i)).or_insert((0.0, 0.0));
        entry.1 += graph.strength(i);
        for &(nbr, w) in graph.neighbors(i) {
            if nbr > i && group(nbr) == group(i) {
                entry.0 += w;
            }
        }
    }

    groups
        .values()
        .map(|(internal, degree)| internal / m - (degree / (2.0 * m)).powi(2))
        .sum()
}

pub fn summarize(graph: &OrgGraph, partition: &Partition) -> CommunitySummary {
    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for label in partition.labels.iter().flatten() {
        *sizes.entry(*label).or_insert(0) += 1;
    }
    let assigned: usize = sizes.values().sum();
    let community_count = sizes.len();
    CommunitySummary {
        modularity: modularity(graph, &partition.labels),
        community_count,
        average_size: if community_count == 0 {
            0.0
        } else {
            assigned as f64 / community_count as f64
        },
        largest_size: sizes.values().copied().max().unwrap_or(0),
        isolated_count: partition.labels.len() - assigned,
        iterations: partition.iterations,
    }
}

/// Partition the organization and persist each person's community id.
pub fn detect_and_store(
    graph_store: &dyn GraphStore,
    organization_id: &str,
    options: &AnalysisOptions,
) -> OrgNetResult<CommunitySummary> {
    let started = Instant::now();
    let persons = graph_store.get_persons(organization_id)?;
    let edges = graph_store.get_edges(organization_id)?;
    let graph = OrgGraph::from_parts(&persons, &edges);
    let partition = detect_communities(&graph, &CommunityConfig::from_options(options));

    let updates: Vec<(String, ScoreFields)> = graph
        .ids
        .iter()
        .zip(&partition.labels)
        .map(|(email, label)| {
            (
                email.clone(),
                ScoreFields::Community {
                    community_id: label.map(|l| l as i64),
                },
            )
        })
        .collect();
    graph_store.write_scores_batch(organization_id, &updates)?;

    let summary = summarize(&graph, &partition);
    info!(
        organization_id,
        communities = summary.community_count,
        modularity = summary.modularity,
        isolated = summary.isolated_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "communities detected"
    );
    Ok(summary)
}
