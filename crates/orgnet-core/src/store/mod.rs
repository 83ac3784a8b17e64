//! Store contracts consumed by the engine, and the SQLite adapter that
//! implements them.
//!
//! The orchestrator only ever sees these traits, so tests and hosts can swap
//! in their own backends. Every call is scoped by organization id.

pub mod database;
pub mod schema;

use chrono::{DateTime, Utc};

use crate::errors::OrgNetResult;
use crate::models::{
    AnalysisJob, CommunicationEdge, CommunicationEvent, Insight, JobStatus, Person,
    PersonProfile, ScoreFields, TimeWindow,
};

/// Persons, edges, and score write-backs.
pub trait GraphStore: Send + Sync {
    /// Cheap reachability check run before any stage.
    fn health_check(&self) -> OrgNetResult<()>;

    /// All persons in input order (stable across calls).
    fn get_persons(&self, organization_id: &str) -> OrgNetResult<Vec<Person>>;

    fn get_edges(&self, organization_id: &str) -> OrgNetResult<Vec<CommunicationEdge>>;

    /// Insert or refresh directory data for one person.
    fn upsert_person(&self, organization_id: &str, profile: &PersonProfile) -> OrgNetResult<()>;

    /// Create persons that do not exist yet; existing rows are untouched.
    /// Returns how many were created.
    fn ensure_persons(&self, organization_id: &str, emails: &[String]) -> OrgNetResult<usize>;

    fn upsert_edge(&self, organization_id: &str, edge: &CommunicationEdge) -> OrgNetResult<()>;

    /// Replace the organization's edge set in one transaction: listed edges
    /// are upserted with their exact weights, all others are removed.
    fn replace_edges(&self, organization_id: &str, edges: &[CommunicationEdge])
        -> OrgNetResult<()>;

    fn write_scores(
        &self,
        organization_id: &str,
        email: &str,
        fields: &ScoreFields,
    ) -> OrgNetResult<()>;

    /// Transactional bulk variant of [`GraphStore::write_scores`].
    fn write_scores_batch(
        &self,
        organization_id: &str,
        updates: &[(String, ScoreFields)],
    ) -> OrgNetResult<()>;
}

/// Raw communication history.
pub trait EventSource: Send + Sync {
    fn get_events(
        &self,
        organization_id: &str,
        window: &TimeWindow,
    ) -> OrgNetResult<Vec<CommunicationEvent>>;
}

/// Insight persistence with the lookups the dedup policy needs.
pub trait InsightStore: Send + Sync {
    /// Most recent insight for `(organization, type, entity)` triggered at or
    /// after `now - within_days`.
    fn find_recent_insight(
        &self,
        organization_id: &str,
        insight_type: &str,
        entity_id: &str,
        within_days: i64,
        now: DateTime<Utc>,
    ) -> OrgNetResult<Option<Insight>>;

    /// Returns the new insight id.
    fn insert_insight(&self, insight: &Insight) -> OrgNetResult<i64>;

    /// Overwrite severity, score, title, description, metadata, actions and
    /// `updated_at` of an existing insight.
    fn update_insight(&self, id: i64, insight: &Insight) -> OrgNetResult<()>;

    fn list_insights(&self, organization_id: &str) -> OrgNetResult<Vec<Insight>>;
}

/// External analysis job records.
pub trait JobStore: Send + Sync {
    fn create_job_record(&self, job: &AnalysisJob) -> OrgNetResult<()>;

    fn update_job_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: f64,
    ) -> OrgNetResult<()>;

    fn update_job_record(
        &self,
        job_id: &str,
        status: JobStatus,
        result_summary: &serde_json::Value,
        duration_ms: i64,
        insight_count: i64,
    ) -> OrgNetResult<()>;

    fn get_job_record(&self, job_id: &str) -> OrgNetResult<Option<AnalysisJob>>;
}
