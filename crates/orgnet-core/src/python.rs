//! PyO3 bindings. Payloads and results cross the boundary as JSON strings.

use std::sync::{Arc, OnceLock};

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

use crate::analysis::{Orchestrator, RunLocks};
use crate::config;
use crate::models::{JobPayload, OutboundMessage};
use crate::store::database::Database;

/// Run locks shared by every call made through this extension module.
fn process_locks() -> Arc<RunLocks> {
    static LOCKS: OnceLock<Arc<RunLocks>> = OnceLock::new();
    Arc::clone(LOCKS.get_or_init(RunLocks::new))
}

fn open_database(db_path: &str) -> PyResult<Database> {
    let db = Database::new(db_path)?;
    db.init_schema()?;
    Ok(db)
}

/// Execute one analysis job and return the run result as JSON.
#[pyfunction]
pub fn run_analysis(py: Python<'_>, db_path: &str, payload_json: &str) -> PyResult<String> {
    let payload: JobPayload = serde_json::from_str(payload_json)
        .map_err(crate::errors::OrgNetError::from)?;
    let db = open_database(db_path)?;
    let locks = process_locks();
    let result = py.allow_threads(|| {
        Orchestrator::new(&db, &db, &db, &db, locks).run(&payload)
    })?;
    Ok(serde_json::to_string(&result).map_err(crate::errors::OrgNetError::from)?)
}

/// Ingest a JSON array of messages (`sender`, `recipients`, `occurredAt`,
/// optional `channel`). Returns the number of stored events.
#[pyfunction]
pub fn record_events(db_path: &str, organization_id: &str, events_json: &str) -> PyResult<usize> {
    let messages: Vec<OutboundMessage> = serde_json::from_str(events_json)
        .map_err(crate::errors::OrgNetError::from)?;
    let events: Vec<_> = messages
        .into_iter()
        .flat_map(OutboundMessage::into_events)
        .collect();
    let db = open_database(db_path)?;
    Ok(db.record_events(organization_id, &events)?)
}

pub(crate) fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("PAGERANK_DAMPING", config::PAGERANK_DAMPING)?;
    m.add("INSIGHT_DEDUP_WINDOW_DAYS", config::INSIGHT_DEDUP_WINDOW_DAYS)?;
    m.add("DEFAULT_MIN_COMMUNICATIONS", config::DEFAULT_MIN_COMMUNICATIONS)?;
    m.add_function(wrap_pyfunction!(run_analysis, m)?)?;
    m.add_function(wrap_pyfunction!(record_events, m)?)?;
    Ok(())
}
