//! Analysis orchestration: runs the requested stages in fixed order, isolates
//! per-stage failures, emits deduplicated insights and finalizes the job
//! record.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{OrgNetError, OrgNetResult};
use crate::models::{AnalysisJob, AnalysisType, JobPayload, JobStatus};
use crate::store::{EventSource, GraphStore, InsightStore, JobStore};

use super::centrality::{calculate_centrality, CentralitySummary};
use super::community::{self, CommunitySummary};
use super::hidden::{self, HiddenInfluenceSummary, HierarchyLevels};
use super::hierarchy::{compare_and_store, HierarchySummary};
use super::influence::{score_influence, InfluenceEntry, InfluenceSummary};
use super::insights::{self, emit_insight, InsightDraft};
use super::locks::RunLocks;
use super::network::{build_network, NetworkSummary};
use super::patterns::{analyze_patterns, PatternSummary};

/// Tagged result of one stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(OrgNetError),
}

impl<T> StageOutcome<T> {
    fn from_result(result: OrgNetResult<T>) -> Self {
        match result {
            Ok(value) => StageOutcome::Completed(value),
            Err(err) => StageOutcome::Failed(err),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub status: StageStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consolidated result of one run. A stage that failed or was not requested
/// leaves its summary absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRunResult {
    pub job_id: String,
    pub organization_id: String,
    pub status: JobStatus,
    pub analysis_types: Vec<AnalysisType>,
    pub network: Option<NetworkSummary>,
    pub centrality: Option<CentralitySummary>,
    pub influence: Option<InfluenceSummary>,
    pub community: Option<CommunitySummary>,
    pub hierarchy: Option<HierarchySummary>,
    pub hidden_influencers: Option<HiddenInfluenceSummary>,
    pub patterns: Option<PatternSummary>,
    pub stages: IndexMap<String, StageReport>,
    pub alerts_generated: usize,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AnalysisRunResult {
    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, r)| r.status == StageStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Runs analysis jobs against injected store handles.
pub struct Orchestrator<'a> {
    graph_store: &'a dyn GraphStore,
    event_source: &'a dyn EventSource,
    insight_store: &'a dyn InsightStore,
    job_store: &'a dyn JobStore,
    locks: Arc<RunLocks>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        graph_store: &'a dyn GraphStore,
        event_source: &'a dyn EventSource,
        insight_store: &'a dyn InsightStore,
        job_store: &'a dyn JobStore,
        locks: Arc<RunLocks>,
    ) -> Self {
        Self {
            graph_store,
            event_source,
            insight_store,
            job_store,
            locks,
        }
    }

    /// Execute one job payload.
    ///
    /// Configuration errors and a held run lock are returned before any job
    /// record exists. An unreachable graph store marks the job `failed` and
    /// is returned as an error. Everything after that produces a result.
    pub fn run(&self, payload: &JobPayload) -> OrgNetResult<AnalysisRunResult> {
        let started = Instant::now();
        let organization_id = payload.organization_id.trim();
        if organization_id.is_empty() {
            return Err(OrgNetError::Config(
                "organizationId must not be empty".to_string(),
            ));
        }
        let options = payload.options.clone().with_env_overrides();
        options.validate()?;
        let requested = AnalysisType::resolve(&payload.analysis_types)?;
        let now = options.reference_time();
        options.check_windows(now)?;
        let _guard = self.locks.acquire(organization_id)?;

        let job = AnalysisJob {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            analysis_types: requested.clone(),
            status: JobStatus::Pending,
            progress: 0.0,
            result_summary: None,
            duration_ms: None,
            insight_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.job_store.create_job_record(&job)?;

        if let Err(err) = self.graph_store.health_check() {
            warn!(organization_id, job_id = %job.id, error = %err, "graph store unreachable");
            let summary = serde_json::json!({ "error": err.to_string() });
            let elapsed = started.elapsed().as_millis() as i64;
            if let Err(record_err) =
                self.job_store
                    .update_job_record(&job.id, JobStatus::Failed, &summary, elapsed, 0)
            {
                warn!(job_id = %job.id, error = %record_err, "could not mark job failed");
            }
            return Err(err);
        }

        info!(
            organization_id,
            job_id = %job.id,
            stages = requested.len(),
            "analysis run started"
        );
        self.report_progress(&job.id, JobStatus::Running, 0.0);

        let mut result = AnalysisRunResult {
            job_id: job.id.clone(),
            organization_id: organization_id.to_string(),
            status: JobStatus::Running,
            analysis_types: requested.clone(),
            network: None,
            centrality: None,
            influence: None,
            community: None,
            hierarchy: None,
            hidden_influencers: None,
            patterns: None,
            stages: IndexMap::new(),
            alerts_generated: 0,
            completed_at: now,
            duration_ms: 0,
        };
        let mut ranked: Vec<InfluenceEntry> = Vec::new();

        for (done, kind) in requested.iter().enumerate() {
            let stage_started = Instant::now();
            let failure = match kind {
                AnalysisType::Network => self.record(
                    build_network(
                        self.graph_store,
                        self.event_source,
                        organization_id,
                        &options,
                        now,
                    ),
                    &mut result.network,
                ),
                AnalysisType::Centrality => self.record(
                    calculate_centrality(self.graph_store, organization_id, &options),
                    &mut result.centrality,
                ),
                AnalysisType::Influence => {
                    let outcome = score_influence(self.graph_store, organization_id).map(
                        |(summary, entries)| {
                            ranked = entries;
                            summary
                        },
                    );
                    self.record(outcome, &mut result.influence)
                }
                AnalysisType::Community => self.record(
                    community::detect_and_store(self.graph_store, organization_id, &options),
                    &mut result.community,
                ),
                AnalysisType::Hierarchy => self.record(
                    compare_and_store(self.graph_store, organization_id, &options),
                    &mut result.hierarchy,
                ),
                AnalysisType::HiddenInfluencers => {
                    let levels = if requested.contains(&AnalysisType::Hierarchy)
                        && result.hierarchy.is_none()
                    {
                        HierarchyLevels::Stale
                    } else {
                        HierarchyLevels::Current
                    };
                    self.record(
                        hidden::detect_and_store(
                            self.graph_store,
                            organization_id,
                            &options,
                            levels,
                        ),
                        &mut result.hidden_influencers,
                    )
                }
                AnalysisType::Patterns => self.record(
                    analyze_patterns(
                        self.graph_store,
                        self.event_source,
                        organization_id,
                        &options,
                        now,
                    ),
                    &mut result.patterns,
                ),
            };
            let elapsed_ms = stage_started.elapsed().as_millis() as u64;
            if let Some(err) = &failure {
                warn!(
                    organization_id,
                    stage = kind.as_str(),
                    error = %err,
                    "analysis stage failed"
                );
            }
            result.stages.insert(
                kind.as_str().to_string(),
                StageReport {
                    status: if failure.is_some() {
                        StageStatus::Failed
                    } else {
                        StageStatus::Completed
                    },
                    elapsed_ms,
                    error: failure.map(|e| e.to_string()),
                },
            );
            let progress = (done + 1) as f64 / requested.len() as f64;
            self.report_progress(&job.id, JobStatus::Running, progress);
        }

        result.alerts_generated = self.emit_insights(organization_id, &result, &ranked, now);
        result.status = if result.failed_stages().is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithPartialFailures
        };
        result.completed_at = Utc::now();
        result.duration_ms = started.elapsed().as_millis() as i64;

        let summary = serde_json::to_value(&result)?;
        self.job_store.update_job_record(
            &job.id,
            result.status,
            &summary,
            result.duration_ms,
            result.alerts_generated as i64,
        )?;

        info!(
            organization_id,
            job_id = %job.id,
            status = result.status.as_str(),
            alerts = result.alerts_generated,
            duration_ms = result.duration_ms,
            "analysis run finished"
        );
        Ok(result)
    }

    /// Store a stage's summary, returning its error if it failed.
    fn record<T>(&self, outcome: OrgNetResult<T>, slot: &mut Option<T>) -> Option<OrgNetError> {
        match StageOutcome::from_result(outcome) {
            StageOutcome::Completed(value) => {
                *slot = Some(value);
                None
            }
            StageOutcome::Failed(err) => Some(err),
        }
    }

    fn report_progress(&self, job_id: &str, status: JobStatus, progress: f64) {
        if let Err(err) = self.job_store.update_job_progress(job_id, status, progress) {
            warn!(job_id, error = %err, "could not update job progress");
        }
    }

    fn emit_insights(
        &self,
        organization_id: &str,
        result: &AnalysisRunResult,
        ranked: &[InfluenceEntry],
        now: DateTime<Utc>,
    ) -> usize {
        let mut drafts: Vec<InsightDraft> = Vec::new();
        if let Some(s) = &result.network {
            drafts.extend(insights::network_insights(s));
        }
        if result.influence.is_some() {
            drafts.extend(insights::influence_insights(ranked));
        }
        if let Some(s) = &result.community {
            drafts.extend(insights::community_insights(s));
        }
        if let Some(s) = &result.hierarchy {
            drafts.extend(insights::hierarchy_insights(s));
        }
        if let Some(s) = &result.hidden_influencers {
            drafts.extend(insights::hidden_insights(s));
        }
        if let Some(s) = &result.patterns {
            drafts.extend(insights::pattern_insights(s));
        }

        let mut emitted = 0usize;
        for draft in drafts {
            let insight_type = draft.insight_type.clone();
            match emit_insight(self.insight_store, organization_id, draft, now) {
                Ok(_) => emitted += 1,
                Err(err) => warn!(
                    organization_id,
                    insight_type = %insight_type,
                    error = %err,
                    "could not store insight"
                ),
            }
        }
        emitted
    }
}
