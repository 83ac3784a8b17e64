//! Network Builder: aggregates raw communication events into persons and
//! thresholded, directed edges for one organization.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{AnalysisOptions, RECENT_ACTIVITY_DAYS};
use crate::errors::OrgNetResult;
use crate::graph::OrgGraph;
use crate::models::{normalize_identity, CommunicationEdge, CommunicationEvent, TimeWindow};
use crate::store::{EventSource, GraphStore};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub average_degree: f64,
    pub persons_created: usize,
    pub events_considered: usize,
    pub edges_suppressed: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Result of folding events into edges.
#[derive(Debug, Default)]
pub struct EdgeAggregation {
    pub edges: Vec<CommunicationEdge>,
    /// Every identity that appeared in a qualifying event, sorted.
    pub identities: Vec<String>,
    pub events_considered: usize,
    /// Candidate edges dropped for falling below the threshold.
    pub suppressed: usize,
}

/// Fold events into per-pair edges. Events outside `window` and self-messages
/// are ignored; pairs with fewer than `min_communications` messages are
/// suppressed. Output order is deterministic (sorted by source, target).
pub fn aggregate_edges(
    events: &[CommunicationEvent],
    window: &TimeWindow,
    min_communications: i64,
) -> EdgeAggregation {
    let recent_start = window
        .end
        .checked_sub_signed(Duration::days(RECENT_ACTIVITY_DAYS))
        .unwrap_or(window.start);
    let mut pairs: BTreeMap<(String, String), (i64, i64, DateTime<Utc>)> = BTreeMap::new();
    let mut identities: BTreeSet<String> = BTreeSet::new();
    let mut considered = 0usize;

    for event in events {
        if !window.contains(event.occurred_at) {
            continue;
        }
        let sender = normalize_identity(&event.sender);
        let recipient = normalize_identity(&event.recipient);
        if sender.is_empty() || recipient.is_empty() || sender == recipient {
            continue;
        }
        considered += 1;
        identities.insert(sender.clone());
        identities.insert(recipient.clone());

        let entry = pairs
            .entry((sender, recipient))
            .or_insert((0, 0, event.occurred_at));
        entry.0 += 1;
        if event.occurred_at >= recent_start {
            entry.1 += 1;
        }
        if event.occurred_at > entry.2 {
            entry.2 = event.occurred_at;
        }
    }

    let mut suppressed = 0usize;
    let mut edges = Vec::with_capacity(pairs.len());
    for ((source, target), (count, recent, last)) in pairs {
        if count < min_communications {
            suppressed += 1;
            continue;
        }
        edges.push(CommunicationEdge {
            source,
            target,
            message_count: count,
            recent_count: recent,
            last_interaction_at: last,
        });
    }

    EdgeAggregation {
        edges,
        identities: identities.into_iter().collect(),
        events_considered: considered,
        suppressed,
    }
}

/// Materialize the organization's graph for the configured window.
///
/// Rerunning with the same inputs converges to the same edge weights: the
/// edge set is replaced wholesale rather than incremented.
pub fn build_network(
    graph_store: &dyn GraphStore,
    event_source: &dyn EventSource,
    organization_id: &str,
    options: &AnalysisOptions,
    now: DateTime<Utc>,
) -> OrgNetResult<NetworkSummary> {
    let started = Instant::now();
    let window = options.network_window(now)?;
    let events = event_source.get_events(organization_id, &window)?;
    let aggregation = aggregate_edges(&events, &window, options.min_communications());

    let persons_created = graph_store.ensure_persons(organization_id, &aggregation.identities)?;
    graph_store.replace_edges(organization_id, &aggregation.edges)?;

    let persons = graph_store.get_persons(organization_id)?;
    let graph = OrgGraph::from_parts(&persons, &aggregation.edges);

    let summary = NetworkSummary {
        node_count: graph.node_count(),
        edge_count: graph.edge_count(),
        density: graph.density(),
        average_degree: graph.average_degree(),
        persons_created,
        events_considered: aggregation.events_considered,
        edges_suppressed: aggregation.suppressed,
        window_start: window.start,
        window_end: window.end,
    };
    info!(
        organization_id,
        nodes = summary.node_count,
        edges = summary.edge_count,
        suppressed = summary.edges_suppressed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "network built"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::database::test_support::temp_db;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn messages(sender: &str, recipient: &str, count: usize, day: u32) -> Vec<CommunicationEvent> {
        (0..count)
            .map(|i| CommunicationEvent {
                sender: sender.to_string(),
                recipient: recipient.to_string(),
                occurred_at: at(day, (9 + i % 8) as u32),
                channel: "email".to_string(),
            })
            .collect()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(at(1, 0), at(31, 0))
    }

    #[test]
    fn threshold_suppresses_stray_messages() {
        let mut events = messages("a", "b", 10, 2);
        events.extend(messages("b", "a", 8, 3));
        events.extend(messages("a", "c", 1, 4));

        let agg = aggregate_edges(&events, &window(), 2);
        assert_eq!(agg.edges.len(), 2);
        assert_eq!(agg.suppressed, 1);
        assert_eq!(agg.identities, vec!["a", "b", "c"]);
        assert_eq!(agg.edges[0].source, "a");
        assert_eq!(agg.edges[0].message_count, 10);
        assert_eq!(agg.edges[1].message_count, 8);
    }

    #[test]
    fn events_outside_window_and_self_messages_are_ignored() {
        let mut events = messages("a", "b", 3, 2);
        events.extend(messages("a", "a", 5, 2));
        events.push(CommunicationEvent {
            sender: "a".into(),
            recipient: "b".into(),
            occurred_at: Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
            channel: "email".into(),
        });
        let agg = aggregate_edges(&events, &window(), 1);
        assert_eq!(agg.events_considered, 3);
        assert_eq!(agg.edges.len(), 1);
        assert_eq!(agg.edges[0].message_count, 3);
        assert_eq!(agg.edges[0].last_interaction_at, at(2, 11));
    }

    #[test]
    fn recent_count_only_covers_trailing_window() {
        let long_window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            at(31, 0),
        );
        let mut events = messages("a", "b", 2, 20);
        events.push(CommunicationEvent {
            sender: "a".into(),
            recipient: "b".into(),
            occurred_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
            channel: "email".into(),
        });
        let agg = aggregate_edges(&events, &long_window, 1);
        assert_eq!(agg.edges[0].message_count, 3);
        assert_eq!(agg.edges[0].recent_count, 2);
    }

    #[test]
    fn build_network_is_idempotent() {
        let (_dir, db) = temp_db();
        let mut events = messages("a@x.io", "b@x.io", 10, 2);
        events.extend(messages("b@x.io", "a@x.io", 8, 3));
        events.extend(messages("a@x.io", "c@x.io", 1, 4));
        db.record_events("acme", &events).unwrap();

        let opts = AnalysisOptions {
            window_start: Some(at(1, 0)),
            window_end: Some(at(31, 0)),
            ..Default::default()
        };
        let first = build_network(&db, &db, "acme", &opts, at(31, 0)).unwrap();
        let edges_after_first = db.get_edges("acme").unwrap();
        let second = build_network(&db, &db, "acme", &opts, at(31, 0)).unwrap();

        assert_eq!(first.node_count, 3);
        assert_eq!(first.edge_count, 2);
        assert_eq!(first.persons_created, 3);
        assert_eq!(second.persons_created, 0);
        assert_eq!(second.edge_count, 2);
        assert_eq!(db.get_edges("acme").unwrap(), edges_after_first);
        assert!((first.density - 2.0 / 6.0).abs() < 1e-12);
    }
}
