//! Degree, betweenness, closeness and PageRank centrality over the built
//! graph. All four scores are normalized to `[0, 1]`.
//!
//! Betweenness and closeness use the undirected, unweighted projection; one
//! Brandes pass per source yields both. Sources are processed on a Rayon pool
//! since each pass is independent. PageRank runs on the directed graph
//! weighted by message count.

use std::collections::VecDeque;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AnalysisOptions, PAGERANK_DAMPING, PAGERANK_TOLERANCE};
use crate::errors::OrgNetResult;
use crate::graph::OrgGraph;
use crate::models::ScoreFields;
use crate::store::GraphStore;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralityScores {
    pub degree: f64,
    pub betweenness: f64,
    pub closeness: f64,
    pub pagerank: f64,
}

#[derive(Clone, Debug)]
pub struct CentralityConfig {
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Scale closeness by the reachable fraction of the graph so that nodes
    /// in small components score lower.
    pub penalize_disconnected: bool,
    pub workers: usize,
}

impl Default for CentralityConfig {
    fn default() -> Self {
        Self {
            damping: PAGERANK_DAMPING,
            max_iterations: crate::config::DEFAULT_PAGERANK_MAX_ITERATIONS,
            tolerance: PAGERANK_TOLERANCE,
            penalize_disconnected: false,
            workers: 1,
        }
    }
}

impl CentralityConfig {
    pub fn from_options(options: &AnalysisOptions) -> Self {
        Self {
            damping: PAGERANK_DAMPING,
            max_iterations: options.pagerank_iterations(),
            tolerance: PAGERANK_TOLERANCE,
            penalize_disconnected: options.closeness_penalize_disconnected,
            workers: options.worker_count(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CentralityResult {
    /// One entry per graph node, in node order.
    pub scores: Vec<CentralityScores>,
    pub pagerank_iterations: usize,
    pub pagerank_converged: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralitySummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub average_degree: f64,
    pub average_betweenness: f64,
    pub average_closeness: f64,
    pub average_pagerank: f64,
    pub pagerank_iterations: usize,
    pub pagerank_converged: bool,
    pub most_central: Option<String>,
}

pub fn degree_centrality(graph: &OrgGraph) -> Vec<f64> {
    let n = graph.node_count();
    if n < 2 {
        return vec![0.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n).map(|i| graph.degree(i) as f64 / denom).collect()
}

/// Per-source accumulator shared by the betweenness/closeness fold.
struct PathTotals {
    betweenness: Vec<f64>,
    closeness: Vec<f64>,
}

impl PathTotals {
    fn zeros(n: usize) -> Self {
        Self {
            betweenness: vec![0.0; n],
            closeness: vec![0.0; n],
        }
    }

    fn merge(mut self, other: PathTotals) -> Self {
        for (a, b) in self.betweenness.iter_mut().zip(other.betweenness) {
            *a += b;
        }
        for (a, b) in self.closeness.iter_mut().zip(other.closeness) {
            *a += b;
        }
        self
    }
}

/// One Brandes pass from `source`: adds dependency scores into
/// `totals.betweenness` and writes the source's closeness.
fn accumulate_source(graph: &OrgGraph, source: usize, penalize: bool, totals: &mut PathTotals) {
    let n = graph.node_count();
    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![usize::MAX; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut queue = VecDeque::new();

    sigma[source] = 1.0;
    dist[source] = 0;
    queue.push_back(source);

    while let Some(v) = queue.pop_front() {
        order.push(v);
        for &(w, _) in graph.neighbors(v) {
            if dist[w] == usize::MAX {
                dist[w] = dist[v] + 1;
                queue.push_back(w);
            }
            if dist[w] == dist[v] + 1 {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }

    let mut delta = vec![0.0f64; n];
    for &w in order.iter().rev() {
        for &v in &preds[w] {
            delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
        }
        if w != source {
            totals.betweenness[w] += delta[w];
        }
    }

    let reachable = order.len() - 1;
    if reachable > 0 {
        let distance_sum: usize = order.iter().map(|&v| dist[v]).sum();
        let mut closeness = reachable as f64 / distance_sum as f64;
        if penalize && n > 1 {
            closeness *= reachable as f64 / (n - 1) as f64;
        }
        totals.closeness[source] = closeness;
    }
}

fn path_totals_sequential(graph: &OrgGraph, penalize: bool) -> PathTotals {
    let mut totals = PathTotals::zeros(graph.node_count());
    for source in 0..graph.node_count() {
        accumulate_source(graph, source, penalize, &mut totals);
    }
    totals
}

fn path_totals_parallel(graph: &OrgGraph, penalize: bool) -> PathTotals {
    let n = graph.node_count();
    (0..n)
        .into_par_iter()
        .fold(
            || PathTotals::zeros(n),
            |mut totals, source| {
                accumulate_source(graph, source, penalize, &mut totals);
                totals
            },
        )
        .reduce(|| PathTotals::zeros(n), PathTotals::merge)
}

/// Normalized betweenness and closeness, computed together.
pub fn betweenness_and_closeness(
    graph: &OrgGraph,
    penalize_disconnected: bool,
    workers: usize,
) -> (Vec<f64>, Vec<f64>) {
    let n = graph.node_count();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let totals = if workers <= 1 {
        path_totals_sequential(graph, penalize_disconnected)
    } else {
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| path_totals_parallel(graph, penalize_disconnected)),
            // Fallback to sequential
            Err(_) => path_totals_sequential(graph, penalize_disconnected),
        }
    };

    // Ordered (s, t) pairs: each undirected pair is counted twice, which the
    // (n-1)(n-2) denominator already accounts for.
    let betweenness = if n > 2 {
        let denom = ((n - 1) * (n - 2)) as f64;
        totals.betweenness.iter().map(|b| (b / denom).min(1.0)).collect()
    } else {
        vec![0.0; n]
    };
    (betweenness, totals.closeness)
}

/// Weighted PageRank with uniform redistribution of dangling mass.
/// Returns raw scores (summing to 1), the iteration count, and whether the
/// L1 delta fell below `tolerance` before the cap.
pub fn pagerank(
    graph: &OrgGraph,
    damping: f64,
    max_iterations: usize,
    tolerance: f64,
) -> (Vec<f64>, usize, bool) {
    let n = graph.node_count();
    if n == 0 {
        return (Vec::new(), 0, true);
    }
    let node_count = n as f64;
    let out_weight: Vec<f64> = graph
        .outgoing
        .iter()
        .map(|targets| targets.iter().map(|(_, w)| *w).sum())
        .collect();

    let mut scores = vec![1.0 / node_count; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        let dangling_mass: f64 = (0..n)
            .filter(|&i| out_weight[i] <= 0.0)
            .map(|i| scores[i])
            .sum();
        let base = (1.0 - damping) / node_count + damping * dangling_mass / node_count;
        let mut next_scores = vec![base; n];

        for (source, targets) in graph.outgoing.iter().enumerate() {
            if out_weight[source] <= 0.0 {
                continue;
            }
            let mass = damping * scores[source] / out_weight[source];
            for &(target, weight) in targets {
                next_scores[target] += mass * weight;
            }
        }

        let delta: f64 = scores
            .iter()
            .zip(&next_scores)
            .map(|(a, b)| (a - b).abs())
            .sum();
        scores = next_scores;
        if delta < tolerance {
            converged = true;
            break;
        }
    }
    debug!(iterations, converged, "pagerank finished");
    (scores, iterations, converged)
}

/// Divide by the maximum so the top node scores 1.
fn normalize_by_max(values: &mut [f64]) {
    let max = values.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}

/// Compute all four centralities. A graph without edges scores 0 everywhere,
/// and nodes without any qualifying edge score 0 on every measure.
pub fn compute_centrality(graph: &OrgGraph, config: &CentralityConfig) -> CentralityResult {
    let n = graph.node_count();
    if graph.edge_count() == 0 {
        return CentralityResult {
            scores: vec![CentralityScores::default(); n],
            pagerank_iterations: 0,
            pagerank_converged: true,
        };
    }

    let degree = degree_centrality(graph);
    let (betweenness, closeness) =
        betweenness_and_closeness(graph, config.penalize_disconnected, config.workers);
    let (mut ranks, iterations, converged) =
        pagerank(graph, config.damping, config.max_iterations, config.tolerance);
    for (i, rank) in ranks.iter_mut().enumerate() {
        if graph.is_isolated(i) {
            *rank = 0.0;
        }
    }
    normalize_by_max(&mut ranks);

    let scores = (0..n)
        .map(|i| CentralityScores {
            degree: degree[i],
            betweenness: betweenness[i],
            closeness: closeness[i],
            pagerank: ranks[i],
        })
        .collect();
    CentralityResult {
        scores,
        pagerank_iterations: iterations,
        pagerank_converged: converged,
    }
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        values.sum::<f64>() / count as f64
    }
}

/// Load the organization's graph, compute centrality, and write the four
/// centrality fields back in one batch.
pub fn calculate_centrality(
    graph_store: &dyn GraphStore,
    organization_id: &str,
    options: &AnalysisOptions,
) -> OrgNetResult<CentralitySummary> {
    let started = Instant::now();
    let persons = graph_store.get_persons(organization_id)?;
    let edges = graph_store.get_edges(organization_id)?;
    let graph = OrgGraph::from_parts(&persons, &edges);
    let result = compute_centrality(&graph, &CentralityConfig::from_options(options));

    let updates: Vec<(String, ScoreFields)> = graph
        .ids
        .iter()
        .zip(&result.scores)
        .map(|(id, s)| {
            (
                id.clone(),
                ScoreFields::Centrality {
                    degree: s.degree,
                    betweenness: s.betweenness,
                    closeness: s.closeness,
                    pagerank: s.pagerank,
                },
            )
        })
        .collect();
    graph_store.write_scores_batch(organization_id, &updates)?;

    let n = result.scores.len();
    let most_central = result
        .scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.pagerank > 0.0)
        .max_by(|a, b| a.1.pagerank.total_cmp(&b.1.pagerank).then(b.0.cmp(&a.0)))
        .map(|(i, _)| graph.ids[i].clone());

    let summary = CentralitySummary {
        node_count: n,
        edge_count: graph.edge_count(),
        average_degree: mean(result.scores.iter().map(|s| s.degree), n),
        average_betweenness: mean(result.scores.iter().map(|s| s.betweenness), n),
        average_closeness: mean(result.scores.iter().map(|s| s.closeness), n),
        average_pagerank: mean(result.scores.iter().map(|s| s.pagerank), n),
        pagerank_iterations: result.pagerank_iterations,
        pagerank_converged: result.pagerank_converged,
        most_central,
    };
    info!(
        organization_id,
        nodes = n,
        iterations = summary.pagerank_iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "centrality computed"
    );
    Ok(summary)
}
