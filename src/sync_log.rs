//! Sync log records: the auditable history of sync runs.
//!
//! Every orchestrator invocation creates exactly one log record and is its
//! sole writer. The record moves pending → running, then to completed or
//! failed, and is never touched again. A completed run may still carry
//! per-record errors: partial success is success, and the caller can tell
//! "synced with N issues" apart from "sync failed".

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{DatabaseID, Error};

// ============================================================================
// MODELS
// ============================================================================

/// The lifecycle states of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The log record exists but the run has not started fetching.
    Pending,
    /// The run is fetching and reconciling.
    Running,
    /// The run finished; counters are final. The error list may still be
    /// non-empty.
    Completed,
    /// The run hit an unrecoverable error; counters are not trusted.
    Failed,
}

impl SyncStatus {
    /// The name used in the database and over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Parse a status from its name. Returns `None` for unrecognised names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(SyncStatus::Pending),
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// One sync run's record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncLog {
    /// The ID of the sync log.
    pub id: DatabaseID,
    /// The user the run belonged to.
    pub user_id: DatabaseID,
    /// The connection the run synced.
    pub connection_id: DatabaseID,
    /// Where the run is in its lifecycle.
    pub status: SyncStatus,
    /// When the run was created.
    pub started_at: OffsetDateTime,
    /// When the run finished, for completed and failed runs.
    pub completed_at: Option<OffsetDateTime>,
    /// How many canonical transactions the run created.
    pub transactions_added: i64,
    /// How many canonical transactions the run refreshed.
    pub transactions_updated: i64,
    /// Per-record errors for completed runs; the run error for failed runs.
    pub errors: Vec<String>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the sync log table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_sync_log_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                connection_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                transactions_added INTEGER NOT NULL DEFAULT 0,
                transactions_updated INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]'
                )",
        (),
    )?;

    Ok(())
}

/// Open a new sync log in the pending state.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an unexpected
/// SQL error.
pub fn create_sync_log(
    user_id: DatabaseID,
    connection_id: DatabaseID,
    connection: &Connection,
) -> Result<SyncLog, Error> {
    let log = connection
        .prepare(
            "INSERT INTO sync_log (user_id, connection_id, status, started_at)
             VALUES (?1, ?2, 'pending', ?3)
             RETURNING id, user_id, connection_id, status, started_at, completed_at,
                 transactions_added, transactions_updated, errors",
        )?
        .query_row(
            (user_id, connection_id, OffsetDateTime::now_utc()),
            map_sync_log_row,
        )?;

    Ok(log)
}

/// Move a pending sync log to running.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the log does not exist or is not pending,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn mark_sync_log_running(id: DatabaseID, connection: &Connection) -> Result<SyncLog, Error> {
    let log = connection
        .prepare(
            "UPDATE sync_log
             SET status = 'running'
             WHERE id = ?1 AND status = 'pending'
             RETURNING id, user_id, connection_id, status, started_at, completed_at,
                 transactions_added, transactions_updated, errors",
        )?
        .query_row([id], map_sync_log_row)?;

    Ok(log)
}

/// Finish a running sync log with its final counters and per-record errors.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the log does not exist or is not running,
/// - [Error::JSONSerializationError] if the error list cannot be serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn complete_sync_log(
    id: DatabaseID,
    transactions_added: usize,
    transactions_updated: usize,
    errors: &[String],
    connection: &Connection,
) -> Result<SyncLog, Error> {
    let errors = serde_json::to_string(errors)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    let log = connection
        .prepare(
            "UPDATE sync_log
             SET status = 'completed', completed_at = ?2, transactions_added = ?3,
                 transactions_updated = ?4, errors = ?5
             WHERE id = ?1 AND status = 'running'
             RETURNING id, user_id, connection_id, status, started_at, completed_at,
                 transactions_added, transactions_updated, errors",
        )?
        .query_row(
            (
                id,
                OffsetDateTime::now_utc(),
                transactions_added as i64,
                transactions_updated as i64,
                errors,
            ),
            map_sync_log_row,
        )?;

    Ok(log)
}

/// Fail a sync log with the run-level error message.
///
/// Pending logs can fail too: a run that dies before its fetch starts must
/// not be left stuck.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the log does not exist or already finished,
/// - [Error::JSONSerializationError] if the error cannot be serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn fail_sync_log(
    id: DatabaseID,
    message: &str,
    connection: &Connection,
) -> Result<SyncLog, Error> {
    let errors = serde_json::to_string(&[message])
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    let log = connection
        .prepare(
            "UPDATE sync_log
             SET status = 'failed', completed_at = ?2, errors = ?3
             WHERE id = ?1 AND status IN ('pending', 'running')
             RETURNING id, user_id, connection_id, status, started_at, completed_at,
                 transactions_added, transactions_updated, errors",
        )?
        .query_row((id, OffsetDateTime::now_utc(), errors), map_sync_log_row)?;

    Ok(log)
}

/// Retrieve a user's most recent sync logs, newest first.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is a SQL error.
pub fn recent_sync_logs(
    user_id: DatabaseID,
    limit: u64,
    connection: &Connection,
) -> Result<Vec<SyncLog>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, connection_id, status, started_at, completed_at,
                 transactions_added, transactions_updated, errors
             FROM sync_log
             WHERE user_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2",
        )?
        .query_map((user_id, limit as i64), map_sync_log_row)?
        .map(|log_result| log_result.map_err(Error::SqlError))
        .collect()
}

fn map_sync_log_row(row: &Row) -> Result<SyncLog, rusqlite::Error> {
    let status: String = row.get(3)?;
    let status = SyncStatus::from_name(&status).unwrap_or(SyncStatus::Failed);

    let errors: String = row.get(8)?;
    let errors = serde_json::from_str(&errors).unwrap_or_default();

    Ok(SyncLog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connection_id: row.get(2)?,
        status,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        transactions_added: row.get(6)?,
        transactions_updated: row.get(7)?,
        errors,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod sync_log_tests {
    use rusqlite::Connection;

    use crate::Error;

    use super::{
        SyncStatus, complete_sync_log, create_sync_log, create_sync_log_table, fail_sync_log,
        mark_sync_log_running, recent_sync_logs,
    };

    fn init_db() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_sync_log_table(&connection).expect("Could not create sync log table");

        connection
    }

    #[test]
    fn log_walks_pending_running_completed() {
        let db = init_db();

        let log = create_sync_log(1, 1, &db).expect("Could not create log");
        assert_eq!(log.status, SyncStatus::Pending);
        assert_eq!(log.completed_at, None);

        let log = mark_sync_log_running(log.id, &db).expect("Could not mark running");
        assert_eq!(log.status, SyncStatus::Running);

        let errors = vec!["tx_3: record is missing a provider transaction id".to_owned()];
        let log = complete_sync_log(log.id, 4, 2, &errors, &db).expect("Could not complete");

        assert_eq!(log.status, SyncStatus::Completed);
        assert_eq!(log.transactions_added, 4);
        assert_eq!(log.transactions_updated, 2);
        assert_eq!(log.errors, errors, "a completed run keeps its error list");
        assert!(log.completed_at.is_some());
    }

    #[test]
    fn failed_run_captures_the_error_message() {
        let db = init_db();
        let log = create_sync_log(1, 1, &db).unwrap();
        mark_sync_log_running(log.id, &db).unwrap();

        let log = fail_sync_log(log.id, "provider request timed out", &db).unwrap();

        assert_eq!(log.status, SyncStatus::Failed);
        assert_eq!(log.errors, vec!["provider request timed out".to_owned()]);
        assert!(log.completed_at.is_some());
    }

    #[test]
    fn pending_run_can_fail_directly() {
        let db = init_db();
        let log = create_sync_log(1, 1, &db).unwrap();

        let log = fail_sync_log(log.id, "store outage", &db).unwrap();

        assert_eq!(log.status, SyncStatus::Failed);
    }

    #[test]
    fn finished_logs_cannot_transition_again() {
        let db = init_db();
        let log = create_sync_log(1, 1, &db).unwrap();
        mark_sync_log_running(log.id, &db).unwrap();
        complete_sync_log(log.id, 0, 0, &[], &db).unwrap();

        assert_eq!(
            fail_sync_log(log.id, "too late", &db),
            Err(Error::NotFound),
            "a completed log must not fail afterwards"
        );
        assert_eq!(mark_sync_log_running(log.id, &db), Err(Error::NotFound));
    }

    #[test]
    fn recent_logs_are_newest_first_and_scoped() {
        let db = init_db();
        let first = create_sync_log(1, 1, &db).unwrap();
        let second = create_sync_log(1, 2, &db).unwrap();
        create_sync_log(2, 3, &db).unwrap();

        let got = recent_sync_logs(1, 10, &db).expect("Could not list logs");

        let got_ids: Vec<_> = got.iter().map(|log| log.id).collect();
        assert_eq!(got_ids, vec![second.id, first.id]);
    }
}
