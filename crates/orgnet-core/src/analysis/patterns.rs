//! Organization-wide communication health over a rolling lookback window.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{
    AnalysisOptions, AFTER_HOURS_CONCERN_RATIO, COLLABORATION_CONCERN_SCORE, SILO_CONCERN_RISK,
};
use crate::errors::OrgNetResult;
use crate::models::{normalize_identity, CommunicationEvent, TimeWindow};
use crate::store::{EventSource, GraphStore};

const HEALTHY_COLLABORATION_SCORE: f64 = 0.5;
const CRITICAL_AFTER_HOURS_RATIO: f64 = 0.6;
const CRITICAL_SILO_RISK: f64 = 0.8;
const MAX_AFFECTED_PEOPLE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationHealth {
    Healthy,
    Neutral,
    Concerning,
}

impl CommunicationHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationHealth::Healthy => "healthy",
            CommunicationHealth::Neutral => "neutral",
            CommunicationHealth::Concerning => "concerning",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAlert {
    pub kind: String,
    pub level: AlertLevel,
    pub message: String,
    pub affected_people: Vec<String>,
    pub recommendation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSummary {
    pub lookback_days: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub events_considered: usize,
    pub after_hours_ratio: f64,
    pub silo_risk: f64,
    pub reciprocity: f64,
    pub collaboration_score: f64,
    pub health: CommunicationHealth,
    pub alerts: Vec<PatternAlert>,
}

/// Health label from concern points: one each for heavy after-hours load,
/// high silo risk and weak collaboration.
pub fn health_label(after_hours: f64, silo: f64, collaboration: f64) -> CommunicationHealth {
    let points = [
        after_hours > AFTER_HOURS_CONCERN_RATIO,
        silo > SILO_CONCERN_RISK,
        collaboration < COLLABORATION_CONCERN_SCORE,
    ]
    .iter()
    .filter(|hit| **hit)
    .count();
    match points {
        0 if collaboration >= HEALTHY_COLLABORATION_SCORE => CommunicationHealth::Healthy,
        0 | 1 => CommunicationHealth::Neutral,
        _ => CommunicationHealth::Concerning,
    }
}

fn is_after_hours(at: DateTime<Utc>, start_hour: u32, end_hour: u32) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
        || at.hour() < start_hour
        || at.hour() >= end_hour
}

#[derive(Default)]
struct PersonActivity {
    sent: usize,
    after_hours: usize,
    intra: usize,
    cross: usize,
}

/// Compute trend metrics and alerts from raw events. `departments` maps
/// normalized identities to their department.
pub fn analyze_events(
    events: &[CommunicationEvent],
    departments: &HashMap<String, Option<String>>,
    window: &TimeWindow,
    options: &AnalysisOptions,
) -> PatternSummary {
    let mut considered = 0usize;
    let mut after_hours = 0usize;
    let mut intra = 0usize;
    let mut classified = 0usize;
    let mut directed: BTreeSet<(String, String)> = BTreeSet::new();
    let mut activity: BTreeMap<String, PersonActivity> = BTreeMap::new();

    for event in events.iter().filter(|e| window.contains(e.occurred_at)) {
        let sender = normalize_identity(&event.sender);
        let recipient = normalize_identity(&event.recipient);
        if sender.is_empty() || recipient.is_empty() || sender == recipient {
            continue;
        }
        considered += 1;
        let late = is_after_hours(
            event.occurred_at,
            options.business_hours_start,
            options.business_hours_end,
        );
        let entry = activity.entry(sender.clone()).or_default();
        entry.sent += 1;
        if late {
            after_hours += 1;
            entry.after_hours += 1;
        }

        let dept_of = |id: &str| departments.get(id).and_then(|d| d.as_deref());
        if let (Some(a), Some(b)) = (dept_of(&sender), dept_of(&recipient)) {
            classified += 1;
            if a == b {
                intra += 1;
                entry.intra += 1;
            } else {
                entry.cross += 1;
            }
        }
        directed.insert((sender, recipient));
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let after_hours_ratio = ratio(after_hours, considered);
    let silo_risk = ratio(intra, classified);

    let mut unordered: BTreeMap<(String, String), bool> = BTreeMap::new();
    let mut reciprocated_people: BTreeSet<String> = BTreeSet::new();
    for (s, t) in &directed {
        let reciprocal = directed.contains(&(t.clone(), s.clone()));
        if reciprocal {
            reciprocated_people.insert(s.clone());
        }
        let key = if s < t {
            (s.clone(), t.clone())
        } else {
            (t.clone(), s.clone())
        };
        unordered.insert(key, reciprocal);
    }
    let reciprocity = ratio(
        unordered.values().filter(|r| **r).count(),
        unordered.len(),
    );
    let collaboration_score = if considered == 0 {
        0.0
    } else {
        0.5 * reciprocity + 0.5 * (1.0 - silo_risk)
    };
    let health = if considered == 0 {
        CommunicationHealth::Neutral
    } else {
        health_label(after_hours_ratio, silo_risk, collaboration_score)
    };

    let mut alerts = Vec::new();
    if considered == 0 {
        alerts.push(PatternAlert {
            kind: "no_activity".to_string(),
            level: AlertLevel::Info,
            message: format!(
                "No communication recorded in the last {} days",
                options.pattern_lookback_days()
            ),
            affected_people: Vec::new(),
            recommendation: "Verify that communication data is being ingested".to_string(),
        });
    }

    if after_hours_ratio > AFTER_HOURS_CONCERN_RATIO {
        let mut affected: Vec<(&String, f64)> = activity
            .iter()
            .map(|(id, a)| (id, ratio(a.after_hours, a.sent)))
            .filter(|(_, r)| *r > AFTER_HOURS_CONCERN_RATIO)
            .collect();
        affected.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        alerts.push(PatternAlert {
            kind: "after_hours".to_string(),
            level: if after_hours_ratio > CRITICAL_AFTER_HOURS_RATIO {
                AlertLevel::Critical
            } else {
                AlertLevel::Warning
            },
            message: format!(
                "{:.0}% of messages were sent outside business hours",
                after_hours_ratio * 100.0
            ),
            affected_people: affected
                .into_iter()
                .take(MAX_AFFECTED_PEOPLE)
                .map(|(id, _)| id.clone())
                .collect(),
            recommendation: "Review workload distribution and set expectations for \
                             after-hours availability"
                .to_string(),
        });
    }

    if silo_risk > SILO_CONCERN_RISK {
        alerts.push(PatternAlert {
            kind: "silo".to_string(),
            level: if silo_risk > CRITICAL_SILO_RISK {
                AlertLevel::Critical
            } else {
                AlertLevel::Warning
            },
            message: format!(
                "{:.0}% of messages stay within a single department",
                silo_risk * 100.0
            ),
            affected_people: activity
                .iter()
                .filter(|(_, a)| a.intra > 0 && a.cross == 0)
                .take(MAX_AFFECTED_PEOPLE)
                .map(|(id, _)| id.clone())
                .collect(),
            recommendation: "Create cross-department forums and shared projects".to_string(),
        });
    }

    if considered > 0 && collaboration_score < COLLABORATION_CONCERN_SCORE {
        alerts.push(PatternAlert {
            kind: "low_collaboration".to_string(),
            level: AlertLevel::Warning,
            message: format!("Collaboration score is {collaboration_score:.2}"),
            affected_people: activity
                .keys()
                .filter(|id| !reciprocated_people.contains(*id))
                .take(MAX_AFFECTED_PEOPLE)
                .cloned()
                .collect(),
            recommendation: "Encourage two-way communication and regular check-ins".to_string(),
        });
    }

    PatternSummary {
        lookback_days: options.pattern_lookback_days(),
        window_start: window.start,
        window_end: window.end,
        events_considered: considered,
        after_hours_ratio,
        silo_risk,
        reciprocity,
        collaboration_score,
        health,
        alerts,
    }
}

pub fn analyze_patterns(
    graph_store: &dyn GraphStore,
    event_source: &dyn EventSource,
    organization_id: &str,
    options: &AnalysisOptions,
    now: DateTime<Utc>,
) -> OrgNetResult<PatternSummary> {
    let started = Instant::now();
    let window = options.pattern_window(now)?;
    let events = event_source.get_events(organization_id, &window)?;
    let departments: HashMap<String, Option<String>> = graph_store
        .get_persons(organization_id)?
        .into_iter()
        .map(|p| (p.email, p.department))
        .collect();

    let summary = analyze_events(&events, &departments, &window, options);
    info!(
        organization_id,
        events = summary.events_considered,
        health = summary.health.as_str(),
        alerts = summary.alerts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "communication patterns analyzed"
    );
    Ok(summary)
}
