//! The sync orchestrator.
//!
//! One call to [run_sync] is one sync run: open a sync log, fetch the
//! provider transaction window, reconcile it into the canonical store,
//! propagate the new transactions into rewards and budgets, and close the
//! log with the run's counters. The orchestrator is the only writer of sync
//! logs and of the connection's `last_sync` stamp, which only moves after a
//! completed run.
//!
//! At most one sync may be in flight per connection. Reconciliation is
//! idempotent, so a failed or timed-out run is safe to retry in full; the
//! transactions it already committed simply reconcile as updates.

use std::{
    collections::{HashMap, HashSet},
    ops::RangeInclusive,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::{
    DatabaseID, Error,
    connection::{get_connection, list_connections, update_last_sync},
    propagate::{expire_due_bonuses, propagate_transactions},
    provider::ProviderError,
    reconcile::reconcile_batch,
    state::SyncState,
    sync_log::{complete_sync_log, create_sync_log, fail_sync_log, mark_sync_log_running},
};

/// How many days back a sync reaches when the caller gives no date range.
const DEFAULT_SYNC_WINDOW_DAYS: i64 = 30;

// ============================================================================
// MODELS
// ============================================================================

/// What one sync run did, returned to the caller and recorded on the sync
/// log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// The sync log recording this run.
    pub sync_log_id: DatabaseID,
    /// How many canonical transactions the run created.
    pub added: usize,
    /// How many canonical transactions the run refreshed.
    pub updated: usize,
    /// Per-record errors. A run with errors still completed; compare with a
    /// failed run, which returns an [Error] instead of a summary.
    pub errors: Vec<String>,
}

// ============================================================================
// IN-FLIGHT GUARD
// ============================================================================

/// Tracks which connections currently have a sync in flight.
///
/// Two concurrent runs over the same connection would race the reconciler's
/// read-then-write and double-count rewards, so the guard refuses the
/// second run instead of queueing it.
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    in_flight: Arc<Mutex<HashSet<DatabaseID>>>,
}

impl SyncGuard {
    /// Create a guard with no syncs in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the connection for a sync run, or report that one is already
    /// in flight.
    fn try_acquire(&self, connection_id: DatabaseID) -> Result<SyncPermit, Error> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        if !in_flight.insert(connection_id) {
            return Err(Error::SyncInFlight);
        }

        Ok(SyncPermit {
            connection_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Releases the connection's in-flight claim when dropped, whether the run
/// finished or bailed early.
struct SyncPermit {
    connection_id: DatabaseID,
    in_flight: Arc<Mutex<HashSet<DatabaseID>>>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.connection_id);
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Run one sync for one connection.
///
/// With no `date_range`, the run covers the last 30 days through today.
///
/// # Errors
/// This function will return a:
/// - [Error::SyncInFlight] if the connection already has a sync running,
/// - [Error::NotFound] if the connection does not exist or belongs to
///   another user,
/// - [Error::Provider] if the fetch failed or timed out (the sync log is
///   marked failed with the classified error),
/// - or a store error if reconciliation results could not be persisted.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the
/// same thread.
pub async fn run_sync(
    state: &SyncState,
    user_id: DatabaseID,
    connection_id: DatabaseID,
    date_range: Option<RangeInclusive<Date>>,
) -> Result<SyncSummary, Error> {
    let _permit = state.sync_guard.try_acquire(connection_id)?;

    let today = OffsetDateTime::now_utc().date();
    let (start_date, end_date) = match date_range {
        Some(range) => (*range.start(), *range.end()),
        None => (
            today
                .checked_sub(Duration::days(DEFAULT_SYNC_WINDOW_DAYS))
                .unwrap_or(today),
            today,
        ),
    };

    let (provider_connection, log) = {
        let connection = state
            .db_connection
            .lock()
            .expect("Could not acquire database lock");
        let provider_connection = get_connection(connection_id, user_id, &connection)?;
        let log = create_sync_log(user_id, connection_id, &connection)?;
        mark_sync_log_running(log.id, &connection)?;

        (provider_connection, log)
    };

    tracing::info!(
        "sync run {} started for connection {connection_id} ({} to {end_date})",
        log.id,
        start_date
    );

    let fetch = state
        .provider
        .fetch_transactions(&provider_connection.access_token, start_date, end_date);
    let records = match tokio::time::timeout(state.provider_timeout, fetch).await {
        Ok(Ok(records)) => records,
        Ok(Err(provider_error)) => {
            return Err(fail_run(state, log.id, Error::Provider(provider_error)));
        }
        Err(_elapsed) => {
            return Err(fail_run(state, log.id, Error::Provider(ProviderError::Timeout)));
        }
    };

    let summary = {
        let connection = state
            .db_connection
            .lock()
            .expect("Could not acquire database lock");

        // Expire overdue bonuses before applying new spend, so a run with no
        // qualifying transactions still notices a passed deadline.
        if let Err(error) = expire_due_bonuses(user_id, today, &connection) {
            drop(connection);
            return Err(fail_run(state, log.id, error));
        }

        let outcome = reconcile_batch(user_id, connection_id, &records, &connection);

        if let Err(error) = propagate_transactions(user_id, &outcome.added, today, &connection) {
            drop(connection);
            return Err(fail_run(state, log.id, error));
        }

        let errors = outcome.error_messages();
        complete_sync_log(
            log.id,
            outcome.added.len(),
            outcome.updated.len(),
            &errors,
            &connection,
        )?;
        update_last_sync(connection_id, user_id, OffsetDateTime::now_utc(), &connection)?;

        SyncSummary {
            sync_log_id: log.id,
            added: outcome.added.len(),
            updated: outcome.updated.len(),
            errors,
        }
    };

    tracing::info!(
        "sync run {} completed: {} added, {} updated, {} errors",
        log.id,
        summary.added,
        summary.updated,
        summary.errors.len()
    );

    Ok(summary)
}

/// Run a sync for every one of the user's connections, sequentially.
///
/// Each connection gets its own sync log and its own outcome; one failing
/// connection does not stop the others.
///
/// # Errors
/// This function will return a store error if the user's connections could
/// not be listed. Per-connection failures are reported in the returned map.
pub async fn run_sync_all(
    state: &SyncState,
    user_id: DatabaseID,
) -> Result<HashMap<DatabaseID, Result<SyncSummary, Error>>, Error> {
    let connections = {
        let connection = state
            .db_connection
            .lock()
            .expect("Could not acquire database lock");
        list_connections(user_id, &connection)?
    };

    let mut results = HashMap::new();

    for provider_connection in connections {
        let result = run_sync(state, user_id, provider_connection.id, None).await;

        if let Err(error) = &result {
            tracing::error!(
                "sync failed for connection {}: {error}",
                provider_connection.id
            );
        }

        results.insert(provider_connection.id, result);
    }

    Ok(results)
}

/// Mark the run's sync log failed and hand the run error back.
///
/// If even the log write fails, the original error still wins; the log
/// failure is only logged.
fn fail_run(state: &SyncState, sync_log_id: DatabaseID, error: Error) -> Error {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(_) => {
            tracing::error!("could not acquire database lock to fail sync log {sync_log_id}");
            return error;
        }
    };

    if let Err(log_error) = fail_sync_log(sync_log_id, &error.to_string(), &connection) {
        tracing::error!("could not mark sync log {sync_log_id} as failed: {log_error}");
    }

    error
}

// ============================================================================
// TESTS
// ============================================================================
