//! The sync API: route handlers and router assembly.
//!
//! The service speaks JSON. Identity is handled upstream (an auth proxy or
//! session middleware); by the time a request reaches these handlers the
//! authenticated user id is in the `x-user-id` header and is trusted as-is.

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Date;

use crate::{
    AppState, DatabaseID, Error, endpoints,
    connection::get_connection,
    state::{SyncHistoryState, SyncState},
    sync::{SyncSummary, run_sync, run_sync_all},
    sync_log::{SyncLog, recent_sync_logs},
};

/// The header upstream middleware uses to pass the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// How many sync logs the history endpoint returns by default.
const DEFAULT_HISTORY_LIMIT: u64 = 20;

/// Return a router with all the service's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::SYNC_CONNECTION, post(sync_connection_endpoint))
        .route(endpoints::SYNC_ALL, post(sync_all_endpoint))
        .route(endpoints::SYNC_HISTORY, get(sync_history_endpoint))
        .route(
            endpoints::CONNECTION_ACCOUNTS,
            get(connection_accounts_endpoint),
        )
        .with_state(state)
}

// ============================================================================
// EXTRACTORS
// ============================================================================

/// The authenticated user id supplied by upstream middleware.
pub struct AuthenticatedUser(pub DatabaseID);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        match user_id {
            Some(user_id) => Ok(AuthenticatedUser(user_id)),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing or invalid x-user-id header" })),
            )
                .into_response()),
        }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// An explicit date window for a sync run.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    /// The first day to fetch (inclusive).
    pub start_date: Date,
    /// The last day to fetch (inclusive).
    pub end_date: Date,
}

/// A route handler that runs one sync for one connection.
///
/// Responds 200 with the run summary, 409 while a sync is already in
/// flight, and 502 when the provider fetch failed.
pub async fn sync_connection_endpoint(
    State(state): State<SyncState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(connection_id): Path<DatabaseID>,
    body: Option<Json<SyncRequest>>,
) -> Response {
    let date_range = body.map(|Json(request)| request.start_date..=request.end_date);

    match run_sync(&state, user_id, connection_id, date_range).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// One connection's outcome in a [sync_all_endpoint] response.
#[derive(Debug, Serialize)]
pub struct ConnectionSyncOutcome {
    /// "completed" or "failed".
    pub status: &'static str,
    /// The run summary for completed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SyncSummary>,
    /// The run error for failed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A route handler that runs a sync for every one of the user's
/// connections and reports each outcome separately.
pub async fn sync_all_endpoint(
    State(state): State<SyncState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let results = match run_sync_all(&state, user_id).await {
        Ok(results) => results,
        Err(error) => return error.into_response(),
    };

    let outcomes: std::collections::HashMap<DatabaseID, ConnectionSyncOutcome> = results
        .into_iter()
        .map(|(connection_id, result)| {
            let outcome = match result {
                Ok(summary) => ConnectionSyncOutcome {
                    status: "completed",
                    summary: Some(summary),
                    error: None,
                },
                Err(error) => ConnectionSyncOutcome {
                    status: "failed",
                    summary: None,
                    error: Some(error.to_string()),
                },
            };

            (connection_id, outcome)
        })
        .collect();

    (StatusCode::OK, Json(outcomes)).into_response()
}

/// A route handler that lists a connection's accounts at the provider.
///
/// The UI calls this when the user sets up account mappings, to show which
/// provider accounts exist before linking them to cards.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the
/// same thread.
pub async fn connection_accounts_endpoint(
    State(state): State<SyncState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(connection_id): Path<DatabaseID>,
) -> Response {
    let provider_connection = {
        let connection = state
            .db_connection
            .lock()
            .expect("Could not acquire database lock");

        match get_connection(connection_id, user_id, &connection) {
            Ok(provider_connection) => provider_connection,
            Err(error) => return error.into_response(),
        }
    };

    let fetch = state.provider.fetch_accounts(&provider_connection.access_token);
    match tokio::time::timeout(state.provider_timeout, fetch).await {
        Ok(Ok(accounts)) => (StatusCode::OK, Json(accounts)).into_response(),
        Ok(Err(provider_error)) => Error::Provider(provider_error).into_response(),
        Err(_elapsed) => {
            Error::Provider(crate::provider::ProviderError::Timeout).into_response()
        }
    }
}

/// Controls how much history [sync_history_endpoint] returns.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// The maximum number of sync logs to return.
    pub limit: Option<u64>,
}

/// A route handler that returns the user's recent sync runs, newest first.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the
/// same thread.
pub async fn sync_history_endpoint(
    State(state): State<SyncHistoryState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let connection = state
        .db_connection
        .lock()
        .expect("Could not acquire database lock");

    match recent_sync_logs(user_id, limit, &connection) {
        Ok(logs) => (StatusCode::OK, Json::<Vec<SyncLog>>(logs)).into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
