//! Provider connections: a user's link to one institution at the
//! aggregation provider.
//!
//! A connection owns the access token used to fetch data and remembers when
//! it last completed a sync. The orchestrator only advances `last_sync`
//! after a run completes; failed runs leave it untouched.

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{DatabaseID, Error};

// ============================================================================
// MODELS
// ============================================================================

/// A user's link to one institution at the aggregation provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConnection {
    /// The ID of the connection.
    pub id: DatabaseID,
    /// The user who owns the connection.
    pub user_id: DatabaseID,
    /// The institution's display name.
    pub institution: String,
    /// The provider access token for this connection.
    ///
    /// Never serialized into API responses.
    #[serde(skip_serializing)]
    pub access_token: String,
    /// When the last successful sync completed, if any.
    pub last_sync: Option<OffsetDateTime>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the provider connection table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_connection_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS provider_connection (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                institution TEXT NOT NULL,
                access_token TEXT NOT NULL,
                last_sync TEXT
                )",
        (),
    )?;

    Ok(())
}

/// Create a new provider connection for a user.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an unexpected
/// SQL error.
pub fn create_connection(
    user_id: DatabaseID,
    institution: &str,
    access_token: &str,
    connection: &Connection,
) -> Result<ProviderConnection, Error> {
    let provider_connection = connection
        .prepare(
            "INSERT INTO provider_connection (user_id, institution, access_token)
             VALUES (?1, ?2, ?3)
             RETURNING id, user_id, institution, access_token, last_sync",
        )?
        .query_row((user_id, institution, access_token), map_connection_row)?;

    Ok(provider_connection)
}

/// Retrieve a provider connection by its `id`, scoped to `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the connection does not exist or belongs to
///   another user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_connection(
    id: DatabaseID,
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<ProviderConnection, Error> {
    let provider_connection = connection
        .prepare(
            "SELECT id, user_id, institution, access_token, last_sync
             FROM provider_connection
             WHERE id = ?1 AND user_id = ?2",
        )?
        .query_row((id, user_id), map_connection_row)?;

    Ok(provider_connection)
}

/// Retrieve all of a user's provider connections.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is a SQL error.
pub fn list_connections(
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<Vec<ProviderConnection>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, institution, access_token, last_sync
             FROM provider_connection
             WHERE user_id = ?1
             ORDER BY id",
        )?
        .query_map([user_id], map_connection_row)?
        .map(|row_result| row_result.map_err(Error::SqlError))
        .collect()
}

/// Record that a sync run completed for the connection.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the connection does not exist or belongs to
///   another user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_last_sync(
    id: DatabaseID,
    user_id: DatabaseID,
    last_sync: OffsetDateTime,
    connection: &Connection,
) -> Result<ProviderConnection, Error> {
    let provider_connection = connection
        .prepare(
            "UPDATE provider_connection
             SET last_sync = ?3
             WHERE id = ?1 AND user_id = ?2
             RETURNING id, user_id, institution, access_token, last_sync",
        )?
        .query_row((id, user_id, last_sync), map_connection_row)?;

    Ok(provider_connection)
}

fn map_connection_row(row: &Row) -> Result<ProviderConnection, rusqlite::Error> {
    Ok(ProviderConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        institution: row.get(2)?,
        access_token: row.get(3)?,
        last_sync: row.get(4)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
