//! Hidden influencer classification and key-person risk analysis.
//!
//! Reads the scores written by the centrality, influence and hierarchy
//! stages; persons missing a signal are judged on the signals they have.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{clamp_unit, AnalysisOptions};
use crate::errors::OrgNetResult;
use crate::models::{Person, ScoreFields, Severity};
use crate::store::GraphStore;

/// Relative betweenness at which a person is a dependency for information
/// flow.
pub const KEY_PERSON_BETWEENNESS: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenInfluenceType {
    CrossFunctionalBroker,
    InformationBottleneck,
    HighResponsivenessWithoutAuthority,
    InformalLeader,
}

impl HiddenInfluenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HiddenInfluenceType::CrossFunctionalBroker => "cross_functional_broker",
            HiddenInfluenceType::InformationBottleneck => "information_bottleneck",
            HiddenInfluenceType::HighResponsivenessWithoutAuthority => {
                "high_responsiveness_without_authority"
            }
            HiddenInfluenceType::InformalLeader => "informal_leader",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HiddenInfluenceType::CrossFunctionalBroker => "cross-functional broker",
            HiddenInfluenceType::InformationBottleneck => "information bottleneck",
            HiddenInfluenceType::HighResponsivenessWithoutAuthority => {
                "highly responsive without formal authority"
            }
            HiddenInfluenceType::InformalLeader => "informal leader",
        }
    }

    fn recommendation(&self) -> &'static str {
        match self {
            HiddenInfluenceType::CrossFunctionalBroker => {
                "Involve cross-functional brokers in planning and formalize their liaison role"
            }
            HiddenInfluenceType::InformationBottleneck => {
                "Add redundant communication paths around information bottlenecks"
            }
            HiddenInfluenceType::HighResponsivenessWithoutAuthority => {
                "Recognize highly responsive contributors and protect them from overload"
            }
            HiddenInfluenceType::InformalLeader => {
                "Consider informal leaders for growth opportunities and formal leadership roles"
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(key_persons: usize, score: f64) -> Self {
        if key_persons == 0 {
            RiskLevel::None
        } else if score < 1.0 {
            RiskLevel::Low
        } else if score < 2.0 {
            RiskLevel::Medium
        } else if score < 3.5 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Insight severity for reportable risk levels (medium and above).
    pub fn severity(&self) -> Option<Severity> {
        match self {
            RiskLevel::Medium => Some(Severity::Medium),
            RiskLevel::High => Some(Severity::High),
            RiskLevel::Critical => Some(Severity::Critical),
            RiskLevel::None | RiskLevel::Low => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenInfluencer {
    pub email: String,
    pub influence_type: HiddenInfluenceType,
    pub confidence: f64,
    pub relative_betweenness: f64,
    pub bridging: f64,
    pub formal_level: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenInfluenceSummary {
    pub classified_count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub key_persons: Vec<String>,
    pub recommendations: Vec<String>,
    pub influencers: Vec<HiddenInfluencer>,
}

struct Signals {
    betweenness: f64,
    degree: f64,
    bridging: f64,
    response: f64,
    percentile: f64,
    formal_level: Option<i64>,
    gap: Option<i64>,
}

/// Candidate classifications with their confidence, in tie-break order.
fn candidates(s: &Signals) -> Vec<(HiddenInfluenceType, f64)> {
    let mut out = Vec::new();
    let non_executive = s.formal_level.map_or(true, |level| level >= 3);
    if s.bridging >= 0.5 && s.betweenness >= 0.5 && non_executive {
        out.push((
            HiddenInfluenceType::CrossFunctionalBroker,
            0.5 * s.bridging + 0.5 * s.betweenness,
        ));
    }
    if s.betweenness >= 0.7 && s.degree <= 0.5 {
        out.push((
            HiddenInfluenceType::InformationBottleneck,
            0.6 * s.betweenness + 0.4 * (1.0 - s.degree),
        ));
    }
    if s.response >= 0.7 && s.percentile >= 0.75 && s.formal_level.is_some_and(|l| l >= 4) {
        out.push((
            HiddenInfluenceType::HighResponsivenessWithoutAuthority,
            0.5 * s.response + 0.5 * s.percentile,
        ));
    }
    if let Some(gap) = s.gap.filter(|g| *g >= 2) {
        if s.percentile >= 0.8 {
            out.push((
                HiddenInfluenceType::InformalLeader,
                0.5 * (gap as f64 / 4.0).min(1.0) + 0.5 * s.percentile,
            ));
        }
    }
    out
}

/// Classify persons and aggregate key-person risk.
pub fn classify(persons: &[Person], min_confidence: f64) -> HiddenInfluenceSummary {
    let max_betweenness = persons
        .iter()
        .map(|p| p.betweenness_centrality)
        .fold(0.0, f64::max);

    let mut influencers = Vec::new();
    for person in persons {
        if person.influence_score.is_none() && person.degree_centrality == 0.0 {
            continue;
        }
        let signals = Signals {
            betweenness: if max_betweenness > 0.0 {
                person.betweenness_centrality / max_betweenness
            } else {
                0.0
            },
            degree: person.degree_centrality,
            bridging: person.bridging_score,
            response: person.response_score,
            percentile: person.influence_percentile.unwrap_or(0.0) / 100.0,
            formal_level: person.formal_level,
            gap: person.hierarchy_gap,
        };
        let best = candidates(&signals)
            .into_iter()
            .map(|(kind, conf)| (kind, clamp_unit(conf)))
            .fold(None, |best: Option<(HiddenInfluenceType, f64)>, cand| match best {
                Some(b) if b.1 >= cand.1 => Some(b),
                _ => Some(cand),
            });
        if let Some((influence_type, confidence)) = best {
            if confidence >= min_confidence {
                influencers.push(HiddenInfluencer {
                    email: person.email.clone(),
                    influence_type,
                    confidence,
                    relative_betweenness: signals.betweenness,
                    bridging: signals.bridging,
                    formal_level: signals.formal_level,
                });
            }
        }
    }

    let key: Vec<&HiddenInfluencer> = influencers
        .iter()
        .filter(|h| h.relative_betweenness >= KEY_PERSON_BETWEENNESS)
        .collect();
    let risk_score: f64 = key.iter().map(|h| h.confidence).sum();
    let risk_level = RiskLevel::from_score(key.len(), risk_score);

    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut kinds: Vec<HiddenInfluenceType> = Vec::new();
    for h in &influencers {
        *by_type.entry(h.influence_type.as_str().to_string()).or_insert(0) += 1;
        if !kinds.contains(&h.influence_type) {
            kinds.push(h.influence_type);
        }
    }
    kinds.sort();
    let mut recommendations: Vec<String> =
        kinds.iter().map(|k| k.recommendation().to_string()).collect();
    if risk_level >= RiskLevel::Medium {
        recommendations.push(format!(
            "Reduce dependency on {} key people through cross-training and documented handoffs",
            key.len()
        ));
    }

    HiddenInfluenceSummary {
        classified_count: influencers.len(),
        by_type,
        risk_level,
        risk_score,
        key_persons: key.iter().map(|h| h.email.clone()).collect(),
        recommendations,
        influencers,
    }
}

/// Whether the hierarchy columns on stored persons belong to this run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HierarchyLevels {
    Current,
    /// The hierarchy stage failed this run; stored levels are from an
    /// earlier run and must not drive classification.
    Stale,
}

/// Drop formal level and gap so only network signals remain.
fn without_hierarchy(persons: &[Person]) -> Vec<Person> {
    persons
        .iter()
        .cloned()
        .map(|p| Person {
            formal_level: None,
            influence_level: None,
            hierarchy_gap: None,
            ..p
        })
        .collect()
}

pub fn detect_and_store(
    graph_store: &dyn GraphStore,
    organization_id: &str,
    options: &AnalysisOptions,
    levels: HierarchyLevels,
) -> OrgNetResult<HiddenInfluenceSummary> {
    let started = Instant::now();
    let mut persons = graph_store.get_persons(organization_id)?;
    if levels == HierarchyLevels::Stale {
        persons = without_hierarchy(&persons);
    }
    let summary = classify(&persons, clamp_unit(options.min_confidence));

    // Every person is written so stale classifications are cleared.
    let updates: Vec<(String, ScoreFields)> = persons
        .iter()
        .map(|p| {
            let found = summary.influencers.iter().find(|h| h.email == p.email);
            (
                p.email.clone(),
                ScoreFields::HiddenInfluence {
                    influence_type: found.map(|h| h.influence_type.as_str().to_string()),
                    confidence: found.map(|h| h.confidence),
                },
            )
        })
        .collect();
    graph_store.write_scores_batch(organization_id, &updates)?;

    info!(
        organization_id,
        classified = summary.classified_count,
        risk = summary.risk_level.as_str(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "hidden influencers detected"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::person;

    fn scored(email: &str) -> Person {
        Person {
            influence_score: Some(0.3),
            influence_percentile: Some(40.0),
            degree_centrality: 0.3,
            betweenness_centrality: 0.05,
            response_score: 0.4,
            bridging_score: 0.1,
            formal_level: Some(5),
            hierarchy_gap: Some(0),
            ..person(email, None)
        }
    }

    fn broker() -> Person {
        Person {
            betweenness_centrality: 0.9,
            bridging_score: 0.8,
            degree_centrality: 0.6,
            formal_level: Some(4),
            ..scored("broker")
        }
    }

    fn responder() -> Person {
        Person {
            response_score: 0.9,
            influence_percentile: Some(90.0),
            betweenness_centrality: 0.1,
            ..scored("responder")
        }
    }

    #[test]
    fn picks_highest_confidence_type() {
        let summary = classify(&[broker(), responder(), scored("plain")], 0.5);
        assert_eq!(summary.classified_count, 2);

        let b = &summary.influencers[0];
        assert_eq!(b.email, "broker");
        assert_eq!(b.influence_type, HiddenInfluenceType::CrossFunctionalBroker);
        assert!((b.confidence - 0.9).abs() < 1e-12);

        let r = &summary.influencers[1];
        assert_eq!(
            r.influence_type,
            HiddenInfluenceType::HighResponsivenessWithoutAuthority
        );
        assert!((r.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn min_confidence_filters_weak_signals() {
        let summary = classify(&[broker(), responder()], 0.95);
        assert_eq!(summary.classified_count, 0);
        assert_eq!(summary.risk_level, RiskLevel::None);
        assert!(summary.recommendations.is_empty());
    }

    #[test]
    fn risk_grows_with_key_person_dependencies() {
        let single = classify(&[broker(), responder()], 0.5);
        assert_eq!(single.key_persons, vec!["broker"]);
        assert_eq!(single.risk_level, RiskLevel::Low);
        assert_eq!(single.risk_level.severity(), None);

        let brokers: Vec<Person> = (0..3)
            .map(|i| Person {
                email: format!("broker{i}"),
                ..broker()
            })
            .collect();
        let summary = classify(&brokers, 0.5);
        assert_eq!(summary.key_persons.len(), 3);
        assert_eq!(summary.risk_level, RiskLevel::High);
        assert_eq!(summary.risk_level.severity(), Some(Severity::High));
        assert_eq!(summary.by_type.get("cross_functional_broker"), Some(&3));
        assert_eq!(summary.recommendations.len(), 2);
    }

    #[test]
    fn senior_leaders_are_not_brokers() {
        let leader = Person {
            formal_level: Some(1),
            degree_centrality: 0.9,
            ..broker()
        };
        let summary = classify(&[leader], 0.5);
        assert_eq!(summary.classified_count, 0);
    }

    #[test]
    fn stale_levels_do_not_drive_classification() {
        let leader = Person {
            influence_percentile: Some(90.0),
            formal_level: Some(5),
            hierarchy_gap: Some(4),
            ..scored("leader")
        };
        let persons = vec![responder(), leader];

        let current = classify(&persons, 0.5);
        let kinds: Vec<HiddenInfluenceType> =
            current.influencers.iter().map(|h| h.influence_type).collect();
        assert!(kinds.contains(&HiddenInfluenceType::HighResponsivenessWithoutAuthority));
        assert!(kinds.contains(&HiddenInfluenceType::InformalLeader));

        // Without levels the responder falls back to a network-only type.
        let stale = classify(&without_hierarchy(&persons), 0.5);
        let kinds: Vec<HiddenInfluenceType> =
            stale.influencers.iter().map(|h| h.influence_type).collect();
        assert_eq!(kinds, vec![HiddenInfluenceType::InformationBottleneck]);
        assert!(stale.influencers.iter().all(|h| h.formal_level.is_none()));
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0, 0.0), RiskLevel::None);
        assert_eq!(RiskLevel::from_score(1, 0.8), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(2, 1.6), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(4, 3.6), RiskLevel::Critical);
    }
}
