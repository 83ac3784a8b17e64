//! SQLite storage layer.
//!
//! Each public method opens its own connection so that callers never manage
//! connection lifetime, and the handle stays `Send + Sync` for the
//! orchestrator. Timestamps are stored as fixed-width RFC 3339 text so that
//! lexical comparison in SQL matches chronological order.

use std::path::PathBuf;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::{OrgNetError, OrgNetResult};
use crate::models::{
    default_display_name, normalize_identity, AnalysisJob, AnalysisType, CommunicationEdge,
    CommunicationEvent, EntityType, Insight, InsightCategory, JobStatus, Person, PersonProfile,
    ScoreFields, Severity, TimeWindow,
};
use crate::store::{schema, EventSource, GraphStore, InsightStore, JobStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

pub(crate) fn ts_to_sql(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(OrgNetError::Database(message)),
    )
}

fn json_from_sql<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const PERSON_COLUMNS: &str = "organization_id, email, display_name, department, job_title, \
     manager_email, degree_centrality, betweenness_centrality, closeness_centrality, pagerank, \
     influence_score, influence_rank, influence_percentile, response_score, bridging_score, \
     community_id, formal_level, influence_level, hierarchy_gap, hidden_influence_type, \
     hidden_influence_confidence";

fn person_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        organization_id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        department: row.get(3)?,
        job_title: row.get(4)?,
        manager_email: row.get(5)?,
        degree_centrality: row.get(6)?,
        betweenness_centrality: row.get(7)?,
        closeness_centrality: row.get(8)?,
        pagerank: row.get(9)?,
        influence_score: row.get(10)?,
        influence_rank: row.get(11)?,
        influence_percentile: row.get(12)?,
        response_score: row.get(13)?,
        bridging_score: row.get(14)?,
        community_id: row.get(15)?,
        formal_level: row.get(16)?,
        influence_level: row.get(17)?,
        hierarchy_gap: row.get(18)?,
        hidden_influence_type: row.get(19)?,
        hidden_influence_confidence: row.get(20)?,
    })
}

const INSIGHT_COLUMNS: &str = "id, organization_id, insight_type, category, severity, \
     entity_type, entity_id, score, title, description, metadata_json, \
     recommended_actions_json, triggered_at, updated_at";

fn insight_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Insight> {
    let category: String = row.get(3)?;
    let severity: String = row.get(4)?;
    let entity_type: String = row.get(5)?;
    let metadata: String = row.get(10)?;
    let actions: String = row.get(11)?;
    let triggered_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;
    Ok(Insight {
        id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        insight_type: row.get(2)?,
        category: InsightCategory::parse(&category)
            .ok_or_else(|| conversion_error(3, format!("unknown insight category {category}")))?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| conversion_error(4, format!("unknown severity {severity}")))?,
        entity_type: EntityType::parse(&entity_type)
            .ok_or_else(|| conversion_error(5, format!("unknown entity type {entity_type}")))?,
        entity_id: row.get(6)?,
        score: row.get(7)?,
        title: row.get(8)?,
        description: row.get(9)?,
        metadata: json_from_sql(10, &metadata)?,
        recommended_actions: json_from_sql(11, &actions)?,
        triggered_at: ts_from_sql(12, &triggered_at)?,
        updated_at: ts_from_sql(13, &updated_at)?,
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisJob> {
    let types: String = row.get(2)?;
    let status: String = row.get(3)?;
    let summary: Option<String> = row.get(5)?;
    let created_at: String = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    Ok(AnalysisJob {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        analysis_types: json_from_sql::<Vec<AnalysisType>>(2, &types)?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| conversion_error(3, format!("unknown job status {status}")))?,
        progress: row.get(4)?,
        result_summary: summary
            .map(|raw| json_from_sql::<serde_json::Value>(5, &raw))
            .transpose()?,
        duration_ms: row.get(6)?,
        insight_count: row.get(7)?,
        created_at: ts_from_sql(8, &created_at)?,
        completed_at: completed_at.map(|raw| ts_from_sql(9, &raw)).transpose()?,
    })
}

/// Apply one stage's field group to a person row; returns rows changed.
fn apply_score_fields(
    conn: &Connection,
    organization_id: &str,
    email: &str,
    fields: &ScoreFields,
) -> rusqlite::Result<usize> {
    match fields {
        ScoreFields::Centrality {
            degree,
            betweenness,
            closeness,
            pagerank,
        } => conn.execute(
            "UPDATE persons SET degree_centrality = ?1, betweenness_centrality = ?2, \
             closeness_centrality = ?3, pagerank = ?4, updated_at = CURRENT_TIMESTAMP \
             WHERE organization_id = ?5 AND email = ?6;",
            params![degree, betweenness, closeness, pagerank, organization_id, email],
        ),
        ScoreFields::Influence {
            score,
            rank,
            percentile,
            response,
            bridging,
        } => conn.execute(
            "UPDATE persons SET influence_score = ?1, influence_rank = ?2, \
             influence_percentile = ?3, response_score = ?4, bridging_score = ?5, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE organization_id = ?6 AND email = ?7;",
            params![score, rank, percentile, response, bridging, organization_id, email],
        ),
        ScoreFields::Community { community_id } => conn.execute(
            "UPDATE persons SET community_id = ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE organization_id = ?2 AND email = ?3;",
            params![community_id, organization_id, email],
        ),
        ScoreFields::Hierarchy {
            formal_level,
            influence_level,
            gap,
        } => conn.execute(
            "UPDATE persons SET formal_level = ?1, influence_level = ?2, hierarchy_gap = ?3, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE organization_id = ?4 AND email = ?5;",
            params![formal_level, influence_level, gap, organization_id, email],
        ),
        ScoreFields::HiddenInfluence {
            influence_type,
            confidence,
        } => conn.execute(
            "UPDATE persons SET hidden_influence_type = ?1, hidden_influence_confidence = ?2, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE organization_id = ?3 AND email = ?4;",
            params![influence_type, confidence, organization_id, email],
        ),
    }
}

fn insert_edge(
    conn: &Connection,
    organization_id: &str,
    edge: &CommunicationEdge,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO communication_edges ( \
             organization_id, source_email, target_email, message_count, recent_count, \
             last_interaction_at \
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(organization_id, source_email, target_email) DO UPDATE SET \
             message_count = excluded.message_count, \
             recent_count = excluded.recent_count, \
             last_interaction_at = excluded.last_interaction_at;",
        params![
            organization_id,
            edge.source,
            edge.target,
            edge.message_count,
            edge.recent_count,
            ts_to_sql(edge.last_interaction_at),
        ],
    )
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed implementation of every store contract the engine consumes.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create a new `Database`.  The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn new(db_path: impl Into<PathBuf>) -> OrgNetResult<Self> {
        let db_path: PathBuf = db_path.into();
        let expanded = expand_tilde(&db_path.to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn connect(&self) -> OrgNetResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Initialise the database schema (WAL mode, tables, indexes) and run
    /// pending migrations.
    pub fn init_schema(&self) -> OrgNetResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    /// Append raw communication events. Identities are normalized and
    /// self-messages dropped; returns the number of rows stored.
    pub fn record_events(
        &self,
        organization_id: &str,
        events: &[CommunicationEvent],
    ) -> OrgNetResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut stored = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO communication_events \
                     (organization_id, sender, recipient, occurred_at, channel) \
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for event in events {
                let sender = normalize_identity(&event.sender);
                let recipient = normalize_identity(&event.recipient);
                if sender.is_empty() || recipient.is_empty() || sender == recipient {
                    continue;
                }
                stmt.execute(params![
                    organization_id,
                    sender,
                    recipient,
                    ts_to_sql(event.occurred_at),
                    event.channel,
                ])?;
                stored += 1;
            }
        }
        tx.commit()?;
        debug!(organization_id, stored, "recorded communication events");
        Ok(stored)
    }
}

impl GraphStore for Database {
    fn health_check(&self) -> OrgNetResult<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1;", [], |_| Ok(()))?;
        Ok(())
    }

    fn get_persons(&self, organization_id: &str) -> OrgNetResult<Vec<Person>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PERSON_COLUMNS} FROM persons WHERE organization_id = ?1 \
             ORDER BY rowid;"
        ))?;
        let persons = stmt
            .query_map(params![organization_id], person_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(persons)
    }

    fn get_edges(&self, organization_id: &str) -> OrgNetResult<Vec<CommunicationEdge>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT source_email, target_email, message_count, recent_count, \
                    last_interaction_at \
             FROM communication_edges WHERE organization_id = ?1 \
             ORDER BY source_email, target_email;",
        )?;
        let edges = stmt
            .query_map(params![organization_id], |row| {
                let last: String = row.get(4)?;
                Ok(CommunicationEdge {
                    source: row.get(0)?,
                    target: row.get(1)?,
                    message_count: row.get(2)?,
                    recent_count: row.get(3)?,
                    last_interaction_at: ts_from_sql(4, &last)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    fn upsert_person(&self, organization_id: &str, profile: &PersonProfile) -> OrgNetResult<()> {
        let email = normalize_identity(&profile.email);
        if email.is_empty() {
            return Err(OrgNetError::Database("person email must not be empty".into()));
        }
        let display_name = profile
            .display_name
            .clone()
            .unwrap_or_else(|| default_display_name(&email));
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO persons \
                 (organization_id, email, display_name, department, job_title, manager_email) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(organization_id, email) DO UPDATE SET \
                 display_name = CASE WHEN ?7 IS NULL THEN persons.display_name \
                                     ELSE excluded.display_name END, \
                 department = COALESCE(excluded.department, persons.department), \
                 job_title = COALESCE(excluded.job_title, persons.job_title), \
                 manager_email = COALESCE(excluded.manager_email, persons.manager_email), \
                 updated_at = CURRENT_TIMESTAMP;",
            params![
                organization_id,
                email,
                display_name,
                profile.department,
                profile.job_title,
                profile.manager_email.as_deref().map(normalize_identity),
                profile.display_name,
            ],
        )?;
        Ok(())
    }

    fn ensure_persons(&self, organization_id: &str, emails: &[String]) -> OrgNetResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut created = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO persons (organization_id, email, display_name) \
                 VALUES (?1, ?2, ?3);",
            )?;
            for email in emails {
                created += stmt.execute(params![organization_id, email, default_display_name(email)])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    fn upsert_edge(&self, organization_id: &str, edge: &CommunicationEdge) -> OrgNetResult<()> {
        if edge.source == edge.target {
            return Err(OrgNetError::Database(format!(
                "self-edge rejected for {}",
                edge.source
            )));
        }
        let conn = self.connect()?;
        insert_edge(&conn, organization_id, edge)?;
        Ok(())
    }

    fn replace_edges(
        &self,
        organization_id: &str,
        edges: &[CommunicationEdge],
    ) -> OrgNetResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM communication_edges WHERE organization_id = ?1;",
            params![organization_id],
        )?;
        for edge in edges {
            if edge.source == edge.target {
                continue;
            }
            insert_edge(&tx, organization_id, edge)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_scores(
        &self,
        organization_id: &str,
        email: &str,
        fields: &ScoreFields,
    ) -> OrgNetResult<()> {
        let conn = self.connect()?;
        let changed = apply_score_fields(&conn, organization_id, email, fields)?;
        if changed == 0 {
            return Err(OrgNetError::Database(format!(
                "no person {email} in organization {organization_id}"
            )));
        }
        Ok(())
    }

    fn write_scores_batch(
        &self,
        organization_id: &str,
        updates: &[(String, ScoreFields)],
    ) -> OrgNetResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for (email, fields) in updates {
            apply_score_fields(&tx, organization_id, email, fields)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl EventSource for Database {
    fn get_events(
        &self,
        organization_id: &str,
        window: &TimeWindow,
    ) -> OrgNetResult<Vec<CommunicationEvent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT sender, recipient, occurred_at, channel FROM communication_events \
             WHERE organization_id = ?1 AND occurred_at >= ?2 AND occurred_at < ?3 \
             ORDER BY occurred_at, id;",
        )?;
        let events = stmt
            .query_map(
                params![organization_id, ts_to_sql(window.start), ts_to_sql(window.end)],
                |row| {
                    let occurred: String = row.get(2)?;
                    Ok(CommunicationEvent {
                        sender: row.get(0)?,
                        recipient: row.get(1)?,
                        occurred_at: ts_from_sql(2, &occurred)?,
                        channel: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

impl InsightStore for Database {
    fn find_recent_insight(
        &self,
        organization_id: &str,
        insight_type: &str,
        entity_id: &str,
        within_days: i64,
        now: DateTime<Utc>,
    ) -> OrgNetResult<Option<Insight>> {
        let cutoff = Duration::try_days(within_days)
            .and_then(|span| now.checked_sub_signed(span))
            .map(ts_to_sql)
            .ok_or_else(|| {
                OrgNetError::Config(format!("dedup window of {within_days} days is out of range"))
            })?;
        let conn = self.connect()?;
        let insight = conn
            .query_row(
                &format!(
                    "SELECT {INSIGHT_COLUMNS} FROM insights \
                     WHERE organization_id = ?1 AND insight_type = ?2 AND entity_id = ?3 \
                     AND triggered_at >= ?4 \
                     ORDER BY triggered_at DESC, id DESC LIMIT 1;"
                ),
                params![organization_id, insight_type, entity_id, cutoff],
                insight_from_row,
            )
            .optional()?;
        Ok(insight)
    }

    fn insert_insight(&self, insight: &Insight) -> OrgNetResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO insights ( \
                 organization_id, insight_type, category, severity, entity_type, entity_id, \
                 score, title, description, metadata_json, recommended_actions_json, \
                 triggered_at, updated_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                insight.organization_id,
                insight.insight_type,
                insight.category.as_str(),
                insight.severity.as_str(),
                insight.entity_type.as_str(),
                insight.entity_id,
                insight.score,
                insight.title,
                insight.description,
                serde_json::to_string(&insight.metadata)?,
                serde_json::to_string(&insight.recommended_actions)?,
                ts_to_sql(insight.triggered_at),
                ts_to_sql(insight.updated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_insight(&self, id: i64, insight: &Insight) -> OrgNetResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE insights SET severity = ?1, score = ?2, title = ?3, description = ?4, \
                 metadata_json = ?5, recommended_actions_json = ?6, updated_at = ?7 \
             WHERE id = ?8;",
            params![
                insight.severity.as_str(),
                insight.score,
                insight.title,
                insight.description,
                serde_json::to_string(&insight.metadata)?,
                serde_json::to_string(&insight.recommended_actions)?,
                ts_to_sql(insight.updated_at),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(OrgNetError::Database(format!("no insight with id {id}")));
        }
        Ok(())
    }

    fn list_insights(&self, organization_id: &str) -> OrgNetResult<Vec<Insight>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights WHERE organization_id = ?1 ORDER BY id;"
        ))?;
        let insights = stmt
            .query_map(params![organization_id], insight_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(insights)
    }
}

impl JobStore for Database {
    fn create_job_record(&self, job: &AnalysisJob) -> OrgNetResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO analysis_jobs ( \
                 id, organization_id, analysis_types_json, status, progress, \
                 insight_count, created_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                job.id,
                job.organization_id,
                serde_json::to_string(&job.analysis_types)?,
                job.status.as_str(),
                job.progress,
                job.insight_count,
                ts_to_sql(job.created_at),
            ],
        )?;
        Ok(())
    }

    fn update_job_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: f64,
    ) -> OrgNetResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE analysis_jobs SET status = ?1, progress = ?2 WHERE id = ?3;",
            params![status.as_str(), progress, job_id],
        )?;
        Ok(())
    }

    fn update_job_record(
        &self,
        job_id: &str,
        status: JobStatus,
        result_summary: &serde_json::Value,
        duration_ms: i64,
        insight_count: i64,
    ) -> OrgNetResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE analysis_jobs SET status = ?1, progress = 1.0, result_summary_json = ?2, \
                 duration_ms = ?3, insight_count = ?4, completed_at = ?5 \
             WHERE id = ?6;",
            params![
                status.as_str(),
                serde_json::to_string(result_summary)?,
                duration_ms,
                insight_count,
                ts_to_sql(Utc::now()),
                job_id,
            ],
        )?;
        if changed == 0 {
            return Err(OrgNetError::Database(format!("no job record {job_id}")));
        }
        Ok(())
    }

    fn get_job_record(&self, job_id: &str) -> OrgNetResult<Option<AnalysisJob>> {
        let conn = self.connect()?;
        let job = conn
            .query_row(
                "SELECT id, organization_id, analysis_types_json, status, progress, \
                        result_summary_json, duration_ms, insight_count, created_at, \
                        completed_at \
                 FROM analysis_jobs WHERE id = ?1;",
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::Database;

    /// On-disk database in a temp dir with the schema applied. Keep the
    /// `TempDir` alive for as long as the database is used.
    pub fn temp_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("orgnet.db")).unwrap();
        db.init_schema().unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::test_support::temp_db;
    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn insight(score: f64, severity: Severity, triggered_at: DateTime<Utc>) -> Insight {
        Insight {
            id: None,
            organization_id: "acme".into(),
            insight_type: "low_modularity".into(),
            category: InsightCategory::Community,
            severity,
            entity_type: EntityType::Organization,
            entity_id: "acme".into(),
            score,
            title: "Low modularity".into(),
            description: "Communities are weakly separated".into(),
            metadata: serde_json::json!({"modularity": score}),
            recommended_actions: vec!["Review team boundaries".into()],
            triggered_at,
            updated_at: triggered_at,
        }
    }

    #[test]
    fn record_events_normalizes_and_drops_self_messages() {
        let (_dir, db) = temp_db();
        let events = vec![
            CommunicationEvent {
                sender: " Alice@Acme.com ".into(),
                recipient: "bob@acme.com".into(),
                occurred_at: at(1, 9),
                channel: "email".into(),
            },
            CommunicationEvent {
                sender: "bob@acme.com".into(),
                recipient: "BOB@acme.com".into(),
                occurred_at: at(1, 10),
                channel: "chat".into(),
            },
        ];
        assert_eq!(db.record_events("acme", &events).unwrap(), 1);

        let window = TimeWindow::new(at(1, 0), at(2, 0));
        let stored = db.get_events("acme", &window).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, "alice@acme.com");
        assert!(db.get_events("other", &window).unwrap().is_empty());
    }

    #[test]
    fn upsert_person_keeps_existing_directory_fields() {
        let (_dir, db) = temp_db();
        db.upsert_person(
            "acme",
            &PersonProfile {
                email: "carol@acme.com".into(),
                display_name: Some("Carol".into()),
                department: Some("Sales".into()),
                job_title: None,
                manager_email: Some("Dana@acme.com".into()),
            },
        )
        .unwrap();
        db.upsert_person(
            "acme",
            &PersonProfile {
                email: "carol@acme.com".into(),
                job_title: Some("AE".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let persons = db.get_persons("acme").unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].display_name, "Carol");
        assert_eq!(persons[0].department.as_deref(), Some("Sales"));
        assert_eq!(persons[0].job_title.as_deref(), Some("AE"));
        assert_eq!(persons[0].manager_email.as_deref(), Some("dana@acme.com"));
    }

    #[test]
    fn replace_edges_is_idempotent() {
        let (_dir, db) = temp_db();
        db.ensure_persons("acme", &["a".into(), "b".into()]).unwrap();
        let edge = CommunicationEdge {
            source: "a".into(),
            target: "b".into(),
            message_count: 7,
            recent_count: 2,
            last_interaction_at: at(3, 12),
        };
        db.replace_edges("acme", std::slice::from_ref(&edge)).unwrap();
        db.replace_edges("acme", std::slice::from_ref(&edge)).unwrap();
        assert_eq!(db.get_edges("acme").unwrap(), vec![edge]);

        db.replace_edges("acme", &[]).unwrap();
        assert!(db.get_edges("acme").unwrap().is_empty());
    }

    #[test]
    fn upsert_edge_overwrites_weight() {
        let (_dir, db) = temp_db();
        let mut edge = CommunicationEdge {
            source: "a".into(),
            target: "b".into(),
            message_count: 3,
            recent_count: 3,
            last_interaction_at: at(3, 12),
        };
        db.upsert_edge("acme", &edge).unwrap();
        edge.message_count = 5;
        db.upsert_edge("acme", &edge).unwrap();
        assert_eq!(db.get_edges("acme").unwrap()[0].message_count, 5);

        edge.target = "a".into();
        assert!(db.upsert_edge("acme", &edge).is_err());
    }

    #[test]
    fn score_writes_touch_only_their_fields() {
        let (_dir, db) = temp_db();
        assert_eq!(db.ensure_persons("acme", &["a".into()]).unwrap(), 1);
        assert_eq!(db.ensure_persons("acme", &["a".into()]).unwrap(), 0);

        db.write_scores(
            "acme",
            "a",
            &ScoreFields::Centrality {
                degree: 0.5,
                betweenness: 0.25,
                closeness: 1.0,
                pagerank: 0.75,
            },
        )
        .unwrap();
        db.write_scores_batch(
            "acme",
            &[("a".to_string(), ScoreFields::Community { community_id: Some(2) })],
        )
        .unwrap();

        let person = &db.get_persons("acme").unwrap()[0];
        assert_eq!(person.degree_centrality, 0.5);
        assert_eq!(person.pagerank, 0.75);
        assert_eq!(person.community_id, Some(2));
        assert_eq!(person.influence_score, None);

        let missing = db.write_scores(
            "acme",
            "nobody",
            &ScoreFields::Community { community_id: None },
        );
        assert!(missing.is_err());
    }

    #[test]
    fn insight_lookup_respects_window() {
        let (_dir, db) = temp_db();
        let first = insight(0.2, Severity::Medium, at(1, 0));
        let id = db.insert_insight(&first).unwrap();

        let found = db
            .find_recent_insight("acme", "low_modularity", "acme", 7, at(5, 0))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(id));
        assert_eq!(found.metadata["modularity"], 0.2);

        let stale = db
            .find_recent_insight("acme", "low_modularity", "acme", 7, at(20, 0))
            .unwrap();
        assert!(stale.is_none());

        let mut second = insight(0.1, Severity::High, at(5, 0));
        second.updated_at = at(5, 0);
        db.update_insight(id, &second).unwrap();
        let stored = db.list_insights("acme").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].severity, Severity::High);
        assert_eq!(stored[0].triggered_at, at(1, 0));
        assert_eq!(stored[0].updated_at, at(5, 0));
    }

    #[test]
    fn job_record_lifecycle() {
        let (_dir, db) = temp_db();
        let job = AnalysisJob {
            id: "job-1".into(),
            organization_id: "acme".into(),
            analysis_types: vec![AnalysisType::Network, AnalysisType::Patterns],
            status: JobStatus::Pending,
            progress: 0.0,
            result_summary: None,
            duration_ms: None,
            insight_count: 0,
            created_at: at(1, 0),
            completed_at: None,
        };
        db.create_job_record(&job).unwrap();
        db.update_job_progress("job-1", JobStatus::Running, 0.5).unwrap();
        assert_eq!(
            db.get_job_record("job-1").unwrap().unwrap().status,
            JobStatus::Running
        );

        db.update_job_record(
            "job-1",
            JobStatus::Completed,
            &serde_json::json!({"alertsGenerated": 2}),
            120,
            2,
        )
        .unwrap();
        let stored = db.get_job_record("job-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 1.0);
        assert_eq!(stored.duration_ms, Some(120));
        assert_eq!(stored.analysis_types, job.analysis_types);
        assert!(stored.completed_at.is_some());
        assert!(db.get_job_record("missing").unwrap().is_none());
    }
}
