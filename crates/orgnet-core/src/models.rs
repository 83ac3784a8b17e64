//! Shared typed models used across the analysis stages and the store layer.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisOptions;
use crate::errors::{OrgNetError, OrgNetResult};

// ---------------------------------------------------------------------------
// Analysis stages
// ---------------------------------------------------------------------------

/// One stage of an analysis run. Declaration order is execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisType {
    Network,
    Centrality,
    Influence,
    Community,
    Hierarchy,
    HiddenInfluencers,
    Patterns,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 7] = [
        AnalysisType::Network,
        AnalysisType::Centrality,
        AnalysisType::Influence,
        AnalysisType::Community,
        AnalysisType::Hierarchy,
        AnalysisType::HiddenInfluencers,
        AnalysisType::Patterns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Network => "network",
            AnalysisType::Centrality => "centrality",
            AnalysisType::Influence => "influence",
            AnalysisType::Community => "community",
            AnalysisType::Hierarchy => "hierarchy",
            AnalysisType::HiddenInfluencers => "hidden-influencers",
            AnalysisType::Patterns => "patterns",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value.trim())
    }

    /// Expand a requested list (which may contain `full`) into the fixed
    /// execution order, without duplicates.
    pub fn resolve(requested: &[String]) -> OrgNetResult<Vec<AnalysisType>> {
        if requested.is_empty() {
            return Err(OrgNetError::Config(
                "analysisTypes must name at least one stage".to_string(),
            ));
        }
        let mut selected = [false; 7];
        for raw in requested {
            if raw.trim() == "full" {
                selected = [true; 7];
                continue;
            }
            let kind = Self::parse(raw).ok_or_else(|| {
                OrgNetError::Config(format!("unknown analysis type: {raw:?}"))
            })?;
            selected[kind as usize] = true;
        }
        Ok(Self::ALL
            .iter()
            .copied()
            .filter(|kind| selected[*kind as usize])
            .collect())
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job dispatch contract consumed from the external queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub organization_id: String,
    pub analysis_types: Vec<String>,
    #[serde(default)]
    pub options: AnalysisOptions,
}

// ---------------------------------------------------------------------------
// People and communication
// ---------------------------------------------------------------------------

/// A communicating identity within one organization, plus the attributes the
/// engine derives for it. Derived fields are overwritten on every run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub organization_id: String,
    pub email: String,
    pub display_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub manager_email: Option<String>,

    pub degree_centrality: f64,
    pub betweenness_centrality: f64,
    pub closeness_centrality: f64,
    pub pagerank: f64,

    pub influence_score: Option<f64>,
    pub influence_rank: Option<i64>,
    pub influence_percentile: Option<f64>,
    pub response_score: f64,
    pub bridging_score: f64,

    pub community_id: Option<i64>,

    pub formal_level: Option<i64>,
    pub influence_level: Option<i64>,
    pub hierarchy_gap: Option<i64>,

    pub hidden_influence_type: Option<String>,
    pub hidden_influence_confidence: Option<f64>,
}

impl Person {
    pub fn new(organization_id: &str, email: &str) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            email: email.to_string(),
            display_name: default_display_name(email),
            ..Default::default()
        }
    }
}

/// Directory data supplied from outside the engine (HR feed, profile sync).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonProfile {
    pub email: String,
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub manager_email: Option<String>,
}

/// Local part of an address, used as the display name for identities the
/// directory does not know about.
pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Normalized identity key: trimmed and lowercased.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// One raw sender → recipient communication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationEvent {
    pub sender: String,
    pub recipient: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "email".to_string()
}

/// A message as ingested from a source system; one sender, any number of
/// recipients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl OutboundMessage {
    /// One event per recipient.
    pub fn into_events(self) -> Vec<CommunicationEvent> {
        let OutboundMessage {
            sender,
            recipients,
            occurred_at,
            channel,
        } = self;
        recipients
            .into_iter()
            .map(|recipient| CommunicationEvent {
                sender: sender.clone(),
                recipient,
                occurred_at,
                channel: channel.clone(),
            })
            .collect()
    }
}

/// Directed, weighted relationship between two persons in one window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationEdge {
    pub source: String,
    pub target: String,
    pub message_count: i64,
    /// Messages inside the recent-activity window ending at the window end.
    pub recent_count: i64,
    pub last_interaction_at: DateTime<Utc>,
}

/// Half-open time range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `days` ending at `end`. Fails when the start falls outside
    /// the representable date range.
    pub fn trailing(end: DateTime<Utc>, days: i64) -> OrgNetResult<Self> {
        let start = Duration::try_days(days.max(0))
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| {
                OrgNetError::Config(format!("a {days}-day window ending at {end} is out of range"))
            })?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

// ---------------------------------------------------------------------------
// Score write-backs
// ---------------------------------------------------------------------------

/// Field group written back by exactly one stage. Each variant touches only
/// its own columns so an interrupted run never mixes stages on one row.
#[derive(Clone, Debug, PartialEq)]
pub enum ScoreFields {
    Centrality {
        degree: f64,
        betweenness: f64,
        closeness: f64,
        pagerank: f64,
    },
    Influence {
        score: f64,
        rank: i64,
        percentile: f64,
        response: f64,
        bridging: f64,
    },
    Community {
        community_id: Option<i64>,
    },
    Hierarchy {
        formal_level: i64,
        influence_level: Option<i64>,
        gap: Option<i64>,
    },
    HiddenInfluence {
        influence_type: Option<String>,
        confidence: Option<f64>,
    },
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Network,
    Influence,
    Community,
    Hierarchy,
    HiddenInfluence,
    Patterns,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::Network => "network",
            InsightCategory::Influence => "influence",
            InsightCategory::Community => "community",
            InsightCategory::Hierarchy => "hierarchy",
            InsightCategory::HiddenInfluence => "hidden_influence",
            InsightCategory::Patterns => "patterns",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "network" => Some(InsightCategory::Network),
            "influence" => Some(InsightCategory::Influence),
            "community" => Some(InsightCategory::Community),
            "hierarchy" => Some(InsightCategory::Hierarchy),
            "hidden_influence" => Some(InsightCategory::HiddenInfluence),
            "patterns" => Some(InsightCategory::Patterns),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Organization,
    Person,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Organization => "organization",
            EntityType::Person => "person",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "organization" => Some(EntityType::Organization),
            "person" => Some(EntityType::Person),
            _ => None,
        }
    }
}

/// A finding emitted by a stage. `id` is `None` until the store assigns one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: Option<i64>,
    pub organization_id: String,
    pub insight_type: String,
    pub category: InsightCategory,
    pub severity: Severity,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub score: f64,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub recommended_actions: Vec<String>,
    pub triggered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompletedWithPartialFailures,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithPartialFailures => "completed_with_partial_failures",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "completed_with_partial_failures" => Some(JobStatus::CompletedWithPartialFailures),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithPartialFailures | JobStatus::Failed
        )
    }
}

/// External record of one analysis run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    pub id: String,
    pub organization_id: String,
    pub analysis_types: Vec<AnalysisType>,
    pub status: JobStatus,
    pub progress: f64,
    pub result_summary: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub insight_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_recipient_message_expands_per_recipient() {
        let message: OutboundMessage = serde_json::from_str(
            r#"{"sender": "a@x.io", "recipients": ["b@x.io", "c@x.io"],
                "occurredAt": "2024-05-02T10:00:00Z"}"#,
        )
        .unwrap();
        let events = message.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].recipient, "c@x.io");
        assert_eq!(events[0].channel, "email");
    }

    #[test]
    fn full_expands_in_fixed_order() {
        let kinds = AnalysisType::resolve(&["full".to_string()]).unwrap();
        assert_eq!(kinds, AnalysisType::ALL.to_vec());
    }

    #[test]
    fn requested_subset_is_reordered_and_deduplicated() {
        let requested = vec![
            "patterns".to_string(),
            "network".to_string(),
            "hidden-influencers".to_string(),
            "network".to_string(),
        ];
        let kinds = AnalysisType::resolve(&requested).unwrap();
        assert_eq!(
            kinds,
            vec![
                AnalysisType::Network,
                AnalysisType::HiddenInfluencers,
                AnalysisType::Patterns
            ]
        );
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = AnalysisType::resolve(&["approvals".to_string()]).unwrap_err();
        assert!(matches!(err, OrgNetError::Config(_)));
        let err = AnalysisType::resolve(&[]).unwrap_err();
        assert!(matches!(err, OrgNetError::Config(_)));
    }

    #[test]
    fn payload_deserializes_with_default_options() {
        let payload: JobPayload = serde_json::from_str(
            r#"{"organizationId": "acme", "analysisTypes": ["full"]}"#,
        )
        .unwrap();
        assert_eq!(payload.organization_id, "acme");
        assert_eq!(payload.options, AnalysisOptions::default());
    }

    #[test]
    fn enum_string_forms_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::CompletedWithPartialFailures,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn trailing_window_is_half_open() {
        let end = Utc::now();
        let window = TimeWindow::trailing(end, 7).unwrap();
        assert!(window.contains(end - Duration::days(7)));
        assert!(!window.contains(end));
    }

    #[test]
    fn trailing_window_out_of_range_is_an_error() {
        let end = Utc::now();
        assert!(matches!(
            TimeWindow::trailing(end, i64::MAX),
            Err(OrgNetError::Config(_))
        ));
        assert!(matches!(
            TimeWindow::trailing(DateTime::<Utc>::MIN_UTC, 1),
            Err(OrgNetError::Config(_))
        ));
    }
}
