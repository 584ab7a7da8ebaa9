//! Account mappings: user-maintained links from provider accounts to
//! internal credit cards.
//!
//! A mapping decides whether transactions on a provider account flow into
//! reward and bonus processing. Accounts with no active mapping, or a
//! mapping with no card, are plain bank accounts. Mappings are deactivated
//! on unmap and never deleted, so at most one *active* mapping exists per
//! `(user_id, provider_account_id)` pair.

use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{DatabaseID, Error};

// ============================================================================
// MODELS
// ============================================================================

/// A link between a provider account and an internal credit card.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountMapping {
    /// The ID of the mapping.
    pub id: DatabaseID,
    /// The user who owns the mapping.
    pub user_id: DatabaseID,
    /// The provider's identifier for the account.
    pub provider_account_id: String,
    /// The internal credit card the account maps to, or `None` for a plain
    /// bank account the user mapped explicitly.
    pub credit_card_id: Option<DatabaseID>,
    /// Whether the mapping is in effect. Unmapping clears this flag instead
    /// of deleting the row.
    pub active: bool,
    /// When the mapping was created.
    pub created_at: OffsetDateTime,
}

/// How transactions on a provider account should be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    /// A plain bank account: transactions flow into budgets only.
    Bank,
    /// A credit card: transactions additionally flow into reward and bonus
    /// processing for the given card.
    Credit {
        /// The internal credit card the account maps to.
        credit_card_id: DatabaseID,
    },
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the account mapping table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_account_mapping_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account_mapping (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                provider_account_id TEXT NOT NULL,
                credit_card_id INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
                )",
        (),
    )?;

    // Only one active mapping may exist per provider account; deactivated
    // rows are history and do not collide.
    connection.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_account_mapping_active
         ON account_mapping (user_id, provider_account_id) WHERE active = 1",
        (),
    )?;

    Ok(())
}

/// Create an active mapping from a provider account to a credit card.
///
/// Pass `None` for `credit_card_id` to pin the account as a plain bank
/// account.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateAccountMapping] if the provider account already has an
///   active mapping,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_account_mapping(
    user_id: DatabaseID,
    provider_account_id: &str,
    credit_card_id: Option<DatabaseID>,
    connection: &Connection,
) -> Result<AccountMapping, Error> {
    let mapping = connection
        .prepare(
            "INSERT INTO account_mapping (user_id, provider_account_id, credit_card_id, active,
                 created_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             RETURNING id, user_id, provider_account_id, credit_card_id, active, created_at",
        )?
        .query_row(
            (
                user_id,
                provider_account_id,
                credit_card_id,
                OffsetDateTime::now_utc(),
            ),
            map_mapping_row,
        )?;

    Ok(mapping)
}

/// Deactivate the active mapping for a provider account.
///
/// The row is kept for history; only the `active` flag changes.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the account has no active mapping,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn deactivate_account_mapping(
    user_id: DatabaseID,
    provider_account_id: &str,
    connection: &Connection,
) -> Result<AccountMapping, Error> {
    let mapping = connection
        .prepare(
            "UPDATE account_mapping
             SET active = 0
             WHERE user_id = ?1 AND provider_account_id = ?2 AND active = 1
             RETURNING id, user_id, provider_account_id, credit_card_id, active, created_at",
        )?
        .query_row((user_id, provider_account_id), map_mapping_row)?;

    Ok(mapping)
}

/// Retrieve the active mapping for a provider account.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the account has no active mapping,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_active_mapping(
    user_id: DatabaseID,
    provider_account_id: &str,
    connection: &Connection,
) -> Result<AccountMapping, Error> {
    let mapping = connection
        .prepare(
            "SELECT id, user_id, provider_account_id, credit_card_id, active, created_at
             FROM account_mapping
             WHERE user_id = ?1 AND provider_account_id = ?2 AND active = 1",
        )?
        .query_row((user_id, provider_account_id), map_mapping_row)?;

    Ok(mapping)
}

/// Decide how transactions on a provider account should be processed.
///
/// Accounts with no active mapping resolve to [AccountType::Bank]. Lookup
/// failures are logged and also resolve to [AccountType::Bank] so that a
/// mapping problem can never block reconciliation; the account simply skips
/// reward processing for the run.
pub fn resolve_account_type(
    user_id: DatabaseID,
    provider_account_id: &str,
    connection: &Connection,
) -> AccountType {
    match get_active_mapping(user_id, provider_account_id, connection) {
        Ok(AccountMapping {
            credit_card_id: Some(credit_card_id),
            ..
        }) => AccountType::Credit { credit_card_id },
        Ok(_) => AccountType::Bank,
        Err(Error::NotFound) => AccountType::Bank,
        Err(error) => {
            tracing::warn!(
                "account type lookup failed for provider account {provider_account_id}, \
                 treating as bank: {error}"
            );
            AccountType::Bank
        }
    }
}

fn map_mapping_row(row: &Row) -> Result<AccountMapping, rusqlite::Error> {
    Ok(AccountMapping {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_account_id: row.get(2)?,
        credit_card_id: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod account_mapping_tests {
    use rusqlite::Connection;

    use crate::Error;

    use super::{
        AccountType, create_account_mapping, create_account_mapping_table,
        deactivate_account_mapping, resolve_account_type,
    };

    fn init_db() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_account_mapping_table(&connection).expect("Could not create mapping table");

        connection
    }

    #[test]
    fn unmapped_account_resolves_to_bank() {
        let db = init_db();

        assert_eq!(resolve_account_type(1, "a1", &db), AccountType::Bank);
    }

    #[test]
    fn mapped_account_resolves_to_credit() {
        let db = init_db();
        create_account_mapping(1, "a1", Some(7), &db).expect("Could not create mapping");

        assert_eq!(
            resolve_account_type(1, "a1", &db),
            AccountType::Credit { credit_card_id: 7 }
        );
    }

    #[test]
    fn mapping_without_card_resolves_to_bank() {
        let db = init_db();
        create_account_mapping(1, "a1", None, &db).unwrap();

        assert_eq!(resolve_account_type(1, "a1", &db), AccountType::Bank);
    }

    #[test]
    fn mappings_are_scoped_per_user() {
        let db = init_db();
        create_account_mapping(1, "a1", Some(7), &db).unwrap();

        assert_eq!(resolve_account_type(2, "a1", &db), AccountType::Bank);
    }

    #[test]
    fn second_active_mapping_is_rejected() {
        let db = init_db();
        create_account_mapping(1, "a1", Some(7), &db).unwrap();

        let got = create_account_mapping(1, "a1", Some(8), &db);

        assert_eq!(got, Err(Error::DuplicateAccountMapping));
    }

    #[test]
    fn deactivated_mapping_resolves_to_bank_and_can_be_replaced() {
        let db = init_db();
        create_account_mapping(1, "a1", Some(7), &db).unwrap();

        let deactivated = deactivate_account_mapping(1, "a1", &db).expect("Could not unmap");
        assert!(!deactivated.active);
        assert_eq!(resolve_account_type(1, "a1", &db), AccountType::Bank);

        // The old row is history, so a fresh mapping is allowed.
        create_account_mapping(1, "a1", Some(8), &db)
            .expect("A deactivated mapping must not block a new one");
        assert_eq!(
            resolve_account_type(1, "a1", &db),
            AccountType::Credit { credit_card_id: 8 }
        );
    }

    #[test]
    fn deactivating_unmapped_account_returns_not_found() {
        let db = init_db();

        let got = deactivate_account_mapping(1, "a1", &db);

        assert_eq!(got, Err(Error::NotFound));
    }
}
