//! Implements the structs that hold the state of the sync service.
//!
//! Everything the pipeline needs is constructed explicitly and handed in:
//! the database connection, the provider client, and the in-flight sync
//! guard. Tests build isolated instances per test case with an in-memory
//! database and a fake provider.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::extract::FromRef;
use rusqlite::Connection;

use crate::{provider::ProviderClient, sync::SyncGuard};

/// How long a provider fetch may take before the run is failed with a
/// timeout, unless overridden at startup.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// The state of the sync service.
#[derive(Clone)]
pub struct AppState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The client for the account-aggregation provider.
    pub provider: Arc<dyn ProviderClient>,
    /// Tracks which connections have a sync in flight.
    pub sync_guard: SyncGuard,
    /// How long a provider fetch may take before the run is failed.
    pub provider_timeout: Duration,
}

impl AppState {
    /// Create a new [AppState] with the default provider timeout.
    pub fn new(db_connection: Arc<Mutex<Connection>>, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            db_connection,
            provider,
            sync_guard: SyncGuard::new(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// The state needed to run syncs.
#[derive(Clone)]
pub struct SyncState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The client for the account-aggregation provider.
    pub provider: Arc<dyn ProviderClient>,
    /// Tracks which connections have a sync in flight.
    pub sync_guard: SyncGuard,
    /// How long a provider fetch may take before the run is failed.
    pub provider_timeout: Duration,
}

impl FromRef<AppState> for SyncState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            provider: state.provider.clone(),
            sync_guard: state.sync_guard.clone(),
            provider_timeout: state.provider_timeout,
        }
    }
}

/// The state needed to read sync history.
#[derive(Clone)]
pub struct SyncHistoryState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for SyncHistoryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}
