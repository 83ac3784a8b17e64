//! SQLite schema DDL and migration framework.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::errors::OrgNetResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

type MigrationStep = fn(&Connection) -> OrgNetResult<()>;

/// `MIGRATIONS[i]` moves the store from version `i` to `i + 1`.
const MIGRATIONS: [MigrationStep; SCHEMA_VERSION as usize] = [baseline];

/// Core DDL statements: 7 CREATE TABLE + 7 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (7) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS persons (
        organization_id TEXT NOT NULL,
        email TEXT NOT NULL,
        display_name TEXT NOT NULL,
        department TEXT,
        job_title TEXT,
        manager_email TEXT,
        degree_centrality REAL NOT NULL DEFAULT 0.0,
        betweenness_centrality REAL NOT NULL DEFAULT 0.0,
        closeness_centrality REAL NOT NULL DEFAULT 0.0,
        pagerank REAL NOT NULL DEFAULT 0.0,
        influence_score REAL,
        influence_rank INTEGER,
        influence_percentile REAL,
        response_score REAL NOT NULL DEFAULT 0.0,
        bridging_score REAL NOT NULL DEFAULT 0.0,
        community_id INTEGER,
        formal_level INTEGER,
        influence_level INTEGER,
        hierarchy_gap INTEGER,
        hidden_influence_type TEXT,
        hidden_influence_confidence REAL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(organization_id, email)
    );",
    "CREATE TABLE IF NOT EXISTS communication_edges (
        organization_id TEXT NOT NULL,
        source_email TEXT NOT NULL,
        target_email TEXT NOT NULL,
        message_count INTEGER NOT NULL,
        recent_count INTEGER NOT NULL DEFAULT 0,
        last_interaction_at TEXT NOT NULL,
        PRIMARY KEY(organization_id, source_email, target_email),
        CHECK(source_email <> target_email)
    );",
    "CREATE TABLE IF NOT EXISTS communication_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id TEXT NOT NULL,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        occurred_at TEXT NOT NULL,
        channel TEXT NOT NULL DEFAULT 'email'
    );",
    "CREATE TABLE IF NOT EXISTS insights (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id TEXT NOT NULL,
        insight_type TEXT NOT NULL,
        category TEXT NOT NULL,
        severity TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        score REAL NOT NULL DEFAULT 0.0,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        recommended_actions_json TEXT NOT NULL DEFAULT '[]',
        triggered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS analysis_jobs (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        analysis_types_json TEXT NOT NULL,
        status TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0.0,
        result_summary_json TEXT,
        duration_ms INTEGER,
        insight_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        completed_at TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (7) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_persons_department ON persons(organization_id, department);",
    "CREATE INDEX IF NOT EXISTS idx_persons_manager ON persons(organization_id, manager_email);",
    "CREATE INDEX IF NOT EXISTS idx_persons_influence ON persons(organization_id, influence_rank);",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON communication_edges(organization_id, target_email);",
    "CREATE INDEX IF NOT EXISTS idx_events_org_time ON communication_events(organization_id, occurred_at);",
    "CREATE INDEX IF NOT EXISTS idx_insights_dedup ON insights(organization_id, insight_type, entity_id, triggered_at);",
    "CREATE INDEX IF NOT EXISTS idx_jobs_org_created ON analysis_jobs(organization_id, created_at);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Bring the store from its recorded version up to [`SCHEMA_VERSION`].
/// Each step runs inside its own savepoint; a failing step is rolled back,
/// logged to `migration_history` and returned.
pub fn migrate_schema(conn: &Connection) -> OrgNetResult<()> {
    let from = get_schema_version(conn)?.max(0);
    for version in from..SCHEMA_VERSION {
        let step = MIGRATIONS[version as usize];
        apply_step(conn, version, version + 1, step)?;
    }
    Ok(())
}

fn apply_step(conn: &Connection, from: i32, to: i32, step: MigrationStep) -> OrgNetResult<()> {
    conn.execute_batch("SAVEPOINT orgnet_migration;")?;
    let outcome = step(conn)
        .and_then(|()| set_schema_version(conn, to))
        .and_then(|()| record_step(conn, from, to, "success", None));
    match outcome {
        Ok(()) => {
            conn.execute_batch("RELEASE SAVEPOINT orgnet_migration;")?;
            info!(from, to, "schema migrated");
            Ok(())
        }
        Err(err) => {
            conn.execute_batch(
                "ROLLBACK TO SAVEPOINT orgnet_migration; RELEASE SAVEPOINT orgnet_migration;",
            )?;
            warn!(from, to, error = %err, "schema migration failed");
            record_step(conn, from, to, "failed", Some(&err.to_string()))?;
            Err(err)
        }
    }
}

/// Version recorded in `store_meta`, 0 for a store that has never been
/// migrated.
pub fn get_schema_version(conn: &Connection) -> OrgNetResult<i32> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'schema_version';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> OrgNetResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![version.to_string()],
    )?;
    Ok(())
}

fn record_step(
    conn: &Connection,
    from: i32,
    to: i32,
    status: &str,
    error: Option<&str>,
) -> OrgNetResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        params![from, to, status, error],
    )?;
    Ok(())
}

/// v0 -> v1: the DDL above is the baseline.
fn baseline(_conn: &Connection) -> OrgNetResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrgNetError;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    fn history(conn: &Connection, status: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM migration_history WHERE status = ?1;",
            params![status],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn schema_statement_counts() {
        // 7 tables + 7 indexes
        assert_eq!(SCHEMA_STATEMENTS.len(), 14);
    }

    #[test]
    fn fresh_store_reaches_current_version_once() {
        let conn = fresh();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(history(&conn, "success"), SCHEMA_VERSION as i64);
    }

    #[test]
    fn failing_step_rolls_back_and_is_recorded() {
        fn broken(conn: &Connection) -> OrgNetResult<()> {
            conn.execute_batch("CREATE TABLE scratch (id INTEGER);")?;
            Err(OrgNetError::Database("step exploded".into()))
        }

        let conn = fresh();
        migrate_schema(&conn).unwrap();
        let err = apply_step(&conn, SCHEMA_VERSION, SCHEMA_VERSION + 1, broken).unwrap_err();
        assert!(matches!(err, OrgNetError::Database(_)));

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let scratch: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scratch, 0);
        assert_eq!(history(&conn, "failed"), 1);
    }
}
