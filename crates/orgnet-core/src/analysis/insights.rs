//! Converts stage summaries into insight drafts and persists them under the
//! time-windowed dedup rule.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::config::{
    AFTER_HOURS_CONCERN_RATIO, INSIGHT_DEDUP_WINDOW_DAYS, ISOLATED_NODE_THRESHOLD,
    KEY_INFLUENCER_COUNT, LOW_ALIGNMENT_THRESHOLD, LOW_MODULARITY_THRESHOLD,
    SHADOW_LEADER_THRESHOLD, SILO_CONCERN_RISK, SPARSE_DENSITY_THRESHOLD, SPARSE_MIN_PERSONS,
};
use crate::errors::OrgNetResult;
use crate::models::{EntityType, Insight, InsightCategory, Severity};
use crate::store::InsightStore;

use super::community::CommunitySummary;
use super::hidden::HiddenInfluenceSummary;
use super::hierarchy::HierarchySummary;
use super::influence::InfluenceEntry;
use super::network::NetworkSummary;
use super::patterns::{AlertLevel, CommunicationHealth, PatternSummary};

/// An insight before it is bound to an organization and a timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct InsightDraft {
    pub insight_type: String,
    pub category: InsightCategory,
    pub severity: Severity,
    pub entity_type: EntityType,
    /// `None` means the organization itself.
    pub entity_id: Option<String>,
    pub score: f64,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub recommended_actions: Vec<String>,
}

impl InsightDraft {
    fn organization(
        insight_type: &str,
        category: InsightCategory,
        severity: Severity,
        score: f64,
        title: String,
        description: String,
    ) -> Self {
        Self {
            insight_type: insight_type.to_string(),
            category,
            severity,
            entity_type: EntityType::Organization,
            entity_id: None,
            score,
            title,
            description,
            metadata: json!({}),
            recommended_actions: Vec::new(),
        }
    }

    fn person(
        insight_type: &str,
        category: InsightCategory,
        severity: Severity,
        email: &str,
        score: f64,
        title: String,
        description: String,
    ) -> Self {
        Self {
            entity_type: EntityType::Person,
            entity_id: Some(email.to_string()),
            ..Self::organization(insight_type, category, severity, score, title, description)
        }
    }

    fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn with_actions(mut self, actions: &[&str]) -> Self {
        self.recommended_actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn into_insight(self, organization_id: &str, now: DateTime<Utc>) -> Insight {
        Insight {
            id: None,
            organization_id: organization_id.to_string(),
            entity_id: self
                .entity_id
                .unwrap_or_else(|| organization_id.to_string()),
            insight_type: self.insight_type,
            category: self.category,
            severity: self.severity,
            entity_type: self.entity_type,
            score: self.score,
            title: self.title,
            description: self.description,
            metadata: self.metadata,
            recommended_actions: self.recommended_actions,
            triggered_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitOutcome {
    Inserted(i64),
    Updated(i64),
}

/// Store an insight, updating the existing one in place when the same
/// (organization, type, entity) triggered within the dedup window.
pub fn emit_insight(
    store: &dyn InsightStore,
    organization_id: &str,
    draft: InsightDraft,
    now: DateTime<Utc>,
) -> OrgNetResult<EmitOutcome> {
    let insight = draft.into_insight(organization_id, now);
    let existing = store.find_recent_insight(
        organization_id,
        &insight.insight_type,
        &insight.entity_id,
        INSIGHT_DEDUP_WINDOW_DAYS,
        now,
    )?;
    match existing.and_then(|found| found.id) {
        Some(id) => {
            store.update_insight(id, &insight)?;
            debug!(id, insight_type = %insight.insight_type, "insight refreshed");
            Ok(EmitOutcome::Updated(id))
        }
        None => {
            let id = store.insert_insight(&insight)?;
            debug!(id, insight_type = %insight.insight_type, "insight created");
            Ok(EmitOutcome::Inserted(id))
        }
    }
}

pub fn network_insights(summary: &NetworkSummary) -> Vec<InsightDraft> {
    let mut out = Vec::new();
    if summary.node_count >= SPARSE_MIN_PERSONS && summary.density < SPARSE_DENSITY_THRESHOLD {
        out.push(
            InsightDraft::organization(
                "sparse_network",
                InsightCategory::Network,
                Severity::Low,
                summary.density,
                "Sparse communication network".to_string(),
                format!(
                    "Only {:.1}% of possible communication links are active across {} people",
                    summary.density * 100.0,
                    summary.node_count
                ),
            )
            .with_metadata(json!({
                "density": summary.density,
                "nodeCount": summary.node_count,
                "edgeCount": summary.edge_count,
            }))
            .with_actions(&["Introduce regular cross-team touchpoints"]),
        );
    }
    out
}

/// Top influencers from entries ranked highest first.
pub fn influence_insights(ranked: &[InfluenceEntry]) -> Vec<InsightDraft> {
    ranked
        .iter()
        .filter(|e| e.score > 0.0)
        .take(KEY_INFLUENCER_COUNT)
        .map(|e| {
            InsightDraft::person(
                "key_influencer",
                InsightCategory::Influence,
                Severity::Low,
                &e.email,
                e.score,
                format!("{} is a key influencer", e.email),
                format!(
                    "Ranked #{} by composite influence ({:.0}th percentile)",
                    e.rank, e.percentile
                ),
            )
            .with_metadata(json!({
                "rank": e.rank,
                "percentile": e.percentile,
                "components": e.components,
            }))
        })
        .collect()
}

pub fn community_insights(summary: &CommunitySummary) -> Vec<InsightDraft> {
    let mut out = Vec::new();
    if summary.community_count > 0 && summary.modularity < LOW_MODULARITY_THRESHOLD {
        out.push(
            InsightDraft::organization(
                "low_modularity",
                InsightCategory::Community,
                Severity::Medium,
                summary.modularity,
                "Weak community structure".to_string(),
                format!(
                    "Modularity of {:.2} suggests teams lack distinct working groups",
                    summary.modularity
                ),
            )
            .with_metadata(json!({
                "modularity": summary.modularity,
                "communityCount": summary.community_count,
            }))
            .with_actions(&["Clarify team boundaries and ownership"]),
        );
    }
    if summary.isolated_count > ISOLATED_NODE_THRESHOLD {
        let severity = if summary.isolated_count > 2 * ISOLATED_NODE_THRESHOLD {
            Severity::High
        } else {
            Severity::Medium
        };
        out.push(
            InsightDraft::organization(
                "isolated_individuals",
                InsightCategory::Community,
                severity,
                summary.isolated_count as f64,
                format!("{} people are isolated", summary.isolated_count),
                "These people have no qualifying communication links to any community"
                    .to_string(),
            )
            .with_metadata(json!({ "isolatedCount": summary.isolated_count }))
            .with_actions(&["Check in with isolated team members and pair them with peers"]),
        );
    }
    out
}

pub fn hierarchy_insights(summary: &HierarchySummary) -> Vec<InsightDraft> {
    let mut out = Vec::new();
    if summary.alignment_score < LOW_ALIGNMENT_THRESHOLD {
        out.push(
            InsightDraft::organization(
                "low_hierarchy_alignment",
                InsightCategory::Hierarchy,
                Severity::Medium,
                summary.alignment_score,
                "Formal and informal hierarchy diverge".to_string(),
                format!(
                    "Only {:.0}% of people hold influence consistent with their formal level",
                    summary.alignment_score * 100.0
                ),
            )
            .with_metadata(json!({
                "alignmentScore": summary.alignment_score,
                "comparedCount": summary.compared_count,
            })),
        );
    }
    if summary.shadow_leader_count > SHADOW_LEADER_THRESHOLD {
        let severity = if summary.shadow_leader_count > 2 * SHADOW_LEADER_THRESHOLD {
            Severity::High
        } else {
            Severity::Medium
        };
        out.push(
            InsightDraft::organization(
                "shadow_leaders",
                InsightCategory::Hierarchy,
                severity,
                summary.shadow_leader_count as f64,
                format!("{} shadow leaders identified", summary.shadow_leader_count),
                "People whose influence far exceeds their formal position".to_string(),
            )
            .with_metadata(json!({ "shadowLeaders": summary.shadow_leaders }))
            .with_actions(&["Review role scope and recognition for shadow leaders"]),
        );
    }
    out
}

pub fn hidden_insights(summary: &HiddenInfluenceSummary) -> Vec<InsightDraft> {
    let mut out: Vec<InsightDraft> = summary
        .influencers
        .iter()
        .map(|h| {
            let severity = if h.confidence >= 0.85 {
                Severity::High
            } else if h.confidence >= 0.7 {
                Severity::Medium
            } else {
                Severity::Low
            };
            InsightDraft::person(
                "hidden_influencer",
                InsightCategory::HiddenInfluence,
                severity,
                &h.email,
                h.confidence,
                format!("{} acts as a {}", h.email, h.influence_type.label()),
                format!(
                    "Classified as {} with {:.0}% confidence",
                    h.influence_type.label(),
                    h.confidence * 100.0
                ),
            )
            .with_metadata(json!({
                "influenceType": h.influence_type.as_str(),
                "relativeBetweenness": h.relative_betweenness,
                "bridging": h.bridging,
                "formalLevel": h.formal_level,
            }))
        })
        .collect();

    if let Some(severity) = summary.risk_level.severity() {
        let mut draft = InsightDraft::organization(
            "key_person_risk",
            InsightCategory::HiddenInfluence,
            severity,
            summary.risk_score,
            format!("Key person risk is {}", summary.risk_level.as_str()),
            format!(
                "Information flow depends on {} people",
                summary.key_persons.len()
            ),
        )
        .with_metadata(json!({
            "riskLevel": summary.risk_level.as_str(),
            "keyPersons": summary.key_persons,
        }));
        draft.recommended_actions = summary.recommendations.clone();
        out.push(draft);
    }
    out
}

pub fn pattern_insights(summary: &PatternSummary) -> Vec<InsightDraft> {
    let mut out = Vec::new();
    if summary.health == CommunicationHealth::Concerning {
        let escalated = summary.after_hours_ratio > AFTER_HOURS_CONCERN_RATIO
            && summary.silo_risk > SILO_CONCERN_RISK;
        out.push(
            InsightDraft::organization(
                "communication_health_concern",
                InsightCategory::Patterns,
                if escalated {
                    Severity::High
                } else {
                    Severity::Medium
                },
                1.0 - summary.collaboration_score,
                "Communication health is concerning".to_string(),
                format!(
                    "After-hours ratio {:.2}, silo risk {:.2}, collaboration {:.2}",
                    summary.after_hours_ratio, summary.silo_risk, summary.collaboration_score
                ),
            )
            .with_metadata(json!({
                "afterHoursRatio": summary.after_hours_ratio,
                "siloRisk": summary.silo_risk,
                "collaborationScore": summary.collaboration_score,
            }))
            .with_actions(&[
                "Rebalance after-hours workload",
                "Open cross-department communication channels",
            ]),
        );
    }
    for alert in &summary.alerts {
        let severity = match alert.level {
            AlertLevel::Info => continue,
            AlertLevel::Warning => Severity::Medium,
            AlertLevel::Critical => Severity::High,
        };
        let mut draft = InsightDraft::organization(
            &format!("communication_alert_{}", alert.kind),
            InsightCategory::Patterns,
            severity,
            alert.affected_people.len() as f64,
            alert.message.clone(),
            alert.message.clone(),
        )
        .with_metadata(json!({ "affectedPeople": alert.affected_people }));
        draft.recommended_actions = vec![alert.recommendation.clone()];
        out.push(draft);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::database::test_support::temp_db;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn pattern_summary(after_hours: f64, silo: f64, collaboration: f64) -> PatternSummary {
        PatternSummary {
            lookback_days: 30,
            window_start: now() - Duration::days(30),
            window_end: now(),
            events_considered: 100,
            after_hours_ratio: after_hours,
            silo_risk: silo,
            reciprocity: 0.5,
            collaboration_score: collaboration,
            health: crate::analysis::patterns::health_label(after_hours, silo, collaboration),
            alerts: Vec::new(),
        }
    }

    #[test]
    fn concerning_after_hours_and_silo_escalates_to_high() {
        let drafts = pattern_insights(&pattern_summary(0.6, 0.7, 0.25));
        let concern = drafts
            .iter()
            .find(|d| d.insight_type == "communication_health_concern")
            .unwrap();
        assert_eq!(concern.severity, Severity::High);
        assert_eq!(concern.entity_type, EntityType::Organization);
        assert_eq!(concern.metadata["afterHoursRatio"], json!(0.6));
        assert_eq!(concern.metadata["siloRisk"], json!(0.7));
        assert_eq!(concern.metadata["collaborationScore"], json!(0.25));
    }

    #[test]
    fn concerning_without_both_signals_is_medium() {
        let drafts = pattern_insights(&pattern_summary(0.1, 0.7, 0.2));
        assert_eq!(drafts[0].severity, Severity::Medium);
        assert!(pattern_insights(&pattern_summary(0.1, 0.2, 0.7)).is_empty());
    }

    #[test]
    fn low_modularity_needs_communities() {
        let mut summary = CommunitySummary {
            modularity: 0.0,
            community_count: 0,
            average_size: 0.0,
            largest_size: 0,
            isolated_count: 12,
            iterations: 0,
        };
        let drafts = community_insights(&summary);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].insight_type, "isolated_individuals");
        assert_eq!(drafts[0].severity, Severity::High);

        summary.community_count = 2;
        summary.modularity = 0.2;
        summary.isolated_count = 0;
        let drafts = community_insights(&summary);
        assert_eq!(drafts[0].insight_type, "low_modularity");
    }

    #[test]
    fn emitting_twice_within_window_updates_in_place() {
        let (_dir, db) = temp_db();
        let first = pattern_insights(&pattern_summary(0.1, 0.7, 0.2)).remove(0);
        let second = pattern_insights(&pattern_summary(0.6, 0.7, 0.25)).remove(0);

        let a = emit_insight(&db, "acme", first, now()).unwrap();
        let b = emit_insight(&db, "acme", second, now() + Duration::days(2)).unwrap();
        let EmitOutcome::Inserted(id) = a else {
            panic!("expected insert, got {a:?}");
        };
        assert_eq!(b, EmitOutcome::Updated(id));

        let stored = db.list_insights("acme").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].severity, Severity::High);
        assert_eq!(stored[0].metadata["afterHoursRatio"], json!(0.6));
        assert_eq!(stored[0].triggered_at, now());
        assert_eq!(stored[0].entity_id, "acme");
    }

    #[test]
    fn emitting_after_window_creates_new_insight() {
        let (_dir, db) = temp_db();
        let draft = pattern_insights(&pattern_summary(0.6, 0.7, 0.25)).remove(0);
        emit_insight(&db, "acme", draft.clone(), now()).unwrap();
        let later = emit_insight(&db, "acme", draft, now() + Duration::days(8)).unwrap();
        assert!(matches!(later, EmitOutcome::Inserted(_)));
        assert_eq!(db.list_insights("acme").unwrap().len(), 2);
    }
}
