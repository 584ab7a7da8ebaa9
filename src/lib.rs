//! Pocketbook is a personal-finance tracker. This crate implements its
//! transaction synchronization and reward processing pipeline: it pulls
//! transactions from an external account-aggregation provider, reconciles
//! them into a canonical store without duplication, maps provider
//! categories onto internal ones, tracks credit-card rewards and sign-up
//! bonus progress, accumulates spending into budgets, and records an
//! auditable sync history.
//!
//! The library exposes a small JSON API for triggering syncs and reading
//! history; everything else (auth, the CRUD surface, the UI) lives
//! elsewhere and is trusted to hand in an authenticated user id.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

pub mod account_mapping;
pub mod budget;
pub mod card;
pub mod category;
pub mod connection;
pub mod db;
mod endpoints;
pub mod propagate;
pub mod provider;
pub mod reconcile;
pub mod reward;
mod routes;
mod state;
pub mod sync;
pub mod sync_log;
pub mod transaction;

pub use routes::build_router;
pub use state::{AppState, DEFAULT_PROVIDER_TIMEOUT};
pub use sync::{SyncSummary, run_sync, run_sync_all};

use crate::provider::ProviderError;

/// Alias of the type used for database IDs.
pub type DatabaseID = i64;

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down
/// gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the sync pipeline.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the
    /// parameters (e.g., ID) are correct and that the resource has been
    /// created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A canonical transaction with this provider id already exists for the
    /// user.
    ///
    /// The reconciler treats this as a signal to take the update path; it
    /// should not escape a reconciliation pass.
    #[error("a transaction with this provider id already exists")]
    DuplicateProviderTransaction,

    /// The provider account already has an active mapping.
    ///
    /// The existing mapping must be deactivated before a new one can be
    /// created.
    #[error("the provider account already has an active mapping")]
    DuplicateAccountMapping,

    /// A sync is already in flight for this connection.
    ///
    /// Concurrent syncs on one connection would double-count rewards and
    /// budget spend, so the second caller is refused rather than queued.
    #[error("a sync is already running for this connection")]
    SyncInFlight,

    /// The provider fetch failed or timed out. The whole run fails and may
    /// be retried later; reconciliation is idempotent.
    #[error("{0}")]
    Provider(ProviderError),

    /// An error occurred while serializing a struct as JSON.
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067
                    && desc.contains("provider_transaction_id") =>
            {
                Error::DuplicateProviderTransaction
            }
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("account_mapping") =>
            {
                Error::DuplicateAccountMapping
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<ProviderError> for Error {
    fn from(value: ProviderError) -> Self {
        Error::Provider(value)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Error::SyncInFlight => (StatusCode::CONFLICT, self.to_string()),
            Error::DuplicateAccountMapping => (StatusCode::CONFLICT, self.to_string()),
            Error::Provider(provider_error) => {
                (StatusCode::BAD_GATEWAY, provider_error.to_string())
            }
            // Any errors that are not handled above are not intended to be
            // shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an unexpected error occurred".to_owned(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::provider::ProviderError;

    use super::Error;

    #[test]
    fn sql_no_rows_maps_to_not_found() {
        let got = Error::from(rusqlite::Error::QueryReturnedNoRows);

        assert_eq!(got, Error::NotFound);
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let response = Error::Provider(ProviderError::RateLimited).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn sync_in_flight_maps_to_conflict() {
        let response = Error::SyncInFlight.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
