//! The canonical transaction store.
//!
//! A canonical transaction is the deduplicated internal representation of a
//! provider transaction. Exactly one row exists per
//! `(user_id, provider_transaction_id)` pair; the UNIQUE index enforces the
//! invariant. The provider id is immutable once written. Later syncs may
//! change the mutable provider-sourced fields (amount, description,
//! merchant, pending, location), which happens when a pending transaction
//! clears. Transactions referenced by rewards or budgets are never removed,
//! only flagged with `is_deleted`.

use std::ops::RangeInclusive;

use rusqlite::{Connection, Row, params_from_iter, types::Value};
use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::{DatabaseID, Error, category::Category};

// ============================================================================
// MODELS
// ============================================================================

/// An expense or income event on one of the user's linked accounts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: DatabaseID,
    /// The user who owns the transaction.
    pub user_id: DatabaseID,
    /// The provider connection the transaction was synced through.
    pub connection_id: DatabaseID,
    /// The provider's stable identifier. Immutable once written.
    pub provider_transaction_id: String,
    /// The provider's identifier for the owning account.
    pub provider_account_id: String,
    /// The transaction amount. Positive values are money leaving the
    /// account; the sign is fixed at ingestion and never flipped.
    pub amount: f64,
    /// When the transaction happened.
    pub date: Date,
    /// The provider's description of the transaction.
    pub description: String,
    /// The cleaned-up merchant name, when the provider supplied one.
    pub merchant: Option<String>,
    /// The provider's own category taxonomy, kept for re-mapping.
    pub provider_categories: Vec<String>,
    /// The internal category assigned at ingestion (user-editable later).
    pub category: Category,
    /// Whether the transaction has not yet settled.
    pub pending: bool,
    /// A display string for where the transaction took place.
    pub location: Option<String>,
    /// Free-form user notes.
    pub notes: Option<String>,
    /// Whether the user has hidden the transaction from budgets and rewards.
    pub is_hidden: bool,
    /// Whether the transaction has been logically deleted.
    pub is_deleted: bool,
    /// When the row was last written.
    pub updated_at: OffsetDateTime,
}

/// The fields needed to create a canonical transaction from a provider
/// record. IDs and flags are filled in by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// The user who owns the transaction.
    pub user_id: DatabaseID,
    /// The provider connection the transaction was synced through.
    pub connection_id: DatabaseID,
    /// The provider's stable identifier for the transaction.
    pub provider_transaction_id: String,
    /// The provider's identifier for the owning account.
    pub provider_account_id: String,
    /// The transaction amount, positive for money leaving the account.
    pub amount: f64,
    /// When the transaction happened.
    pub date: Date,
    /// The provider's description of the transaction.
    pub description: String,
    /// The cleaned-up merchant name, if any.
    pub merchant: Option<String>,
    /// The provider's category taxonomy.
    pub provider_categories: Vec<String>,
    /// The internal category assigned by the category mapper.
    pub category: Category,
    /// Whether the transaction has not yet settled.
    pub pending: bool,
    /// A display string for where the transaction took place.
    pub location: Option<String>,
}

/// The provider-sourced fields that may change across syncs while the
/// provider id stays stable, e.g. when a pending transaction clears.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUpdate {
    /// The latest transaction amount.
    pub amount: f64,
    /// The latest description.
    pub description: String,
    /// The latest merchant name, if any.
    pub merchant: Option<String>,
    /// Whether the transaction is still pending.
    pub pending: bool,
    /// The latest location string, if any.
    pub location: Option<String>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const TRANSACTION_COLUMNS: &str = "id, user_id, connection_id, provider_transaction_id, \
     provider_account_id, amount, date, description, merchant, provider_categories, category, \
     pending, location, notes, is_hidden, is_deleted, updated_at";

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                connection_id INTEGER NOT NULL,
                provider_transaction_id TEXT NOT NULL,
                provider_account_id TEXT NOT NULL,
                amount REAL NOT NULL,
                date TEXT NOT NULL,
                description TEXT NOT NULL,
                merchant TEXT,
                provider_categories TEXT NOT NULL,
                category TEXT NOT NULL,
                pending INTEGER NOT NULL,
                location TEXT,
                notes TEXT,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, provider_transaction_id)
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    Ok(())
}

/// Create a new canonical transaction in the database.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateProviderTransaction] if a transaction with the same
///   provider id already exists for the user,
/// - [Error::JSONSerializationError] if the provider category list cannot
///   be serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    new_transaction: NewTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let provider_categories = serde_json::to_string(&new_transaction.provider_categories)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    let transaction = connection
        .prepare(&format!(
            "INSERT INTO \"transaction\" (user_id, connection_id, provider_transaction_id,
                 provider_account_id, amount, date, description, merchant, provider_categories,
                 category, pending, location, notes, is_hidden, is_deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, 0, 0, ?13)
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            (
                new_transaction.user_id,
                new_transaction.connection_id,
                &new_transaction.provider_transaction_id,
                &new_transaction.provider_account_id,
                new_transaction.amount,
                new_transaction.date,
                &new_transaction.description,
                &new_transaction.merchant,
                provider_categories,
                new_transaction.category.as_str(),
                new_transaction.pending,
                &new_transaction.location,
                OffsetDateTime::now_utc(),
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Retrieve a transaction by its provider id, scoped to `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if no transaction with that provider id exists for
///   the user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_transaction_by_provider_id(
    user_id: DatabaseID,
    provider_transaction_id: &str,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE user_id = ?1 AND provider_transaction_id = ?2"
        ))?
        .query_row((user_id, provider_transaction_id), map_transaction_row)?;

    Ok(transaction)
}

/// Apply the latest provider state to an existing transaction.
///
/// Only the mutable provider-sourced fields and `updated_at` change; the
/// provider id, category, visibility flags and notes are left alone.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to the user's transaction,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction_from_provider(
    id: DatabaseID,
    user_id: DatabaseID,
    update: &ProviderUpdate,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "UPDATE \"transaction\"
             SET amount = ?3, description = ?4, merchant = ?5, pending = ?6, location = ?7,
                 updated_at = ?8
             WHERE id = ?1 AND user_id = ?2
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            (
                id,
                user_id,
                update.amount,
                &update.description,
                &update.merchant,
                update.pending,
                &update.location,
                OffsetDateTime::now_utc(),
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Logically delete a transaction.
///
/// The row stays behind so reward and budget history keeps its reference.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to the user's transaction,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn mark_transaction_deleted(
    id: DatabaseID,
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "UPDATE \"transaction\"
             SET is_deleted = 1, updated_at = ?3
             WHERE id = ?1 AND user_id = ?2
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row((id, user_id, OffsetDateTime::now_utc()), map_transaction_row)?;

    Ok(transaction)
}

/// Defines how transactions should be fetched from [query_transactions].
#[derive(Debug, Default)]
pub struct TransactionQuery {
    /// Include transactions within `date_range` (inclusive).
    pub date_range: Option<RangeInclusive<Date>>,
    /// Include transactions the user has hidden.
    pub include_hidden: bool,
    /// Include logically deleted transactions.
    pub include_deleted: bool,
    /// Selects up to the first N (`limit`) transactions.
    pub limit: Option<u64>,
}

/// Query for a user's transactions in the database.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is a SQL error.
pub fn query_transactions(
    user_id: DatabaseID,
    filter: TransactionQuery,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut query_string_parts = vec![format!(
        "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\""
    )];
    let mut where_clause_parts = vec!["user_id = ?1".to_string()];
    let mut query_parameters = vec![Value::Integer(user_id)];

    if let Some(date_range) = filter.date_range {
        where_clause_parts.push(format!(
            "date BETWEEN ?{} AND ?{}",
            query_parameters.len() + 1,
            query_parameters.len() + 2,
        ));
        query_parameters.push(Value::Text(date_range.start().to_string()));
        query_parameters.push(Value::Text(date_range.end().to_string()));
    }

    if !filter.include_hidden {
        where_clause_parts.push("is_hidden = 0".to_string());
    }

    if !filter.include_deleted {
        where_clause_parts.push("is_deleted = 0".to_string());
    }

    query_string_parts.push(String::from("WHERE ") + &where_clause_parts.join(" AND "));
    query_string_parts.push("ORDER BY date DESC".to_string());

    if let Some(limit) = filter.limit {
        query_string_parts.push(format!("LIMIT {limit}"));
    }

    let query_string = query_string_parts.join(" ");
    let params = params_from_iter(query_parameters.iter());

    connection
        .prepare(&query_string)?
        .query_map(params, map_transaction_row)?
        .map(|transaction_result| transaction_result.map_err(Error::SqlError))
        .collect()
}

/// Get the total number of live (not deleted) transactions for a user.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is some SQL error.
pub fn count_transactions(user_id: DatabaseID, connection: &Connection) -> Result<usize, Error> {
    connection
        .query_row(
            "SELECT COUNT(id) FROM \"transaction\" WHERE user_id = ?1 AND is_deleted = 0",
            [user_id],
            |row| row.get::<_, i64>(0).map(|count| count as usize),
        )
        .map_err(|error| error.into())
}

/// Map a database row to a [Transaction].
fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let provider_categories: String = row.get(9)?;
    let provider_categories = serde_json::from_str(&provider_categories).unwrap_or_default();

    let category: String = row.get(10)?;
    let category = Category::from_name(&category).unwrap_or(Category::Other);

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connection_id: row.get(2)?,
        provider_transaction_id: row.get(3)?,
        provider_account_id: row.get(4)?,
        amount: row.get(5)?,
        date: row.get(6)?,
        description: row.get(7)?,
        merchant: row.get(8)?,
        provider_categories,
        category,
        pending: row.get(11)?,
        location: row.get(12)?,
        notes: row.get(13)?,
        is_hidden: row.get(14)?,
        is_deleted: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod transaction_store_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{Error, category::Category};

    use super::{
        NewTransaction, ProviderUpdate, TransactionQuery, count_transactions, create_transaction,
        create_transaction_table, get_transaction_by_provider_id, mark_transaction_deleted,
        query_transactions, update_transaction_from_provider,
    };

    fn init_db() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_transaction_table(&connection).expect("Could not create transaction table");

        connection
    }

    fn sample_transaction(provider_transaction_id: &str) -> NewTransaction {
        NewTransaction {
            user_id: 1,
            connection_id: 1,
            provider_transaction_id: provider_transaction_id.to_owned(),
            provider_account_id: "a1".to_owned(),
            amount: 42.50,
            date: date!(2025 - 06 - 01),
            description: "LOBSTER SEAFOOD CO".to_owned(),
            merchant: Some("Lobster Seafood Co".to_owned()),
            provider_categories: vec!["Food and Drink".to_owned()],
            category: Category::Dining,
            pending: true,
            location: None,
        }
    }

    #[test]
    fn create_and_get_by_provider_id() {
        let db = init_db();

        let created =
            create_transaction(sample_transaction("tx_1"), &db).expect("Could not create");
        let got = get_transaction_by_provider_id(1, "tx_1", &db).expect("Could not get");

        assert_eq!(created, got);
        assert_eq!(got.category, Category::Dining);
        assert!(!got.is_hidden);
        assert!(!got.is_deleted);
    }

    #[test]
    fn duplicate_provider_id_is_rejected() {
        let db = init_db();
        create_transaction(sample_transaction("tx_1"), &db).unwrap();

        let got = create_transaction(sample_transaction("tx_1"), &db);

        assert_eq!(got, Err(Error::DuplicateProviderTransaction));
    }

    #[test]
    fn same_provider_id_is_allowed_for_different_users() {
        let db = init_db();
        create_transaction(sample_transaction("tx_1"), &db).unwrap();

        let mut other_user = sample_transaction("tx_1");
        other_user.user_id = 2;

        create_transaction(other_user, &db)
            .expect("The uniqueness constraint should be scoped per user");
    }

    #[test]
    fn update_from_provider_only_touches_mutable_fields() {
        let db = init_db();
        let created = create_transaction(sample_transaction("tx_1"), &db).unwrap();

        let got = update_transaction_from_provider(
            created.id,
            1,
            &ProviderUpdate {
                amount: 43.00,
                description: "LOBSTER SEAFOOD CO WELLINGTON".to_owned(),
                merchant: created.merchant.clone(),
                pending: false,
                location: Some("Wellington".to_owned()),
            },
            &db,
        )
        .expect("Could not update");

        assert_eq!(got.amount, 43.00);
        assert!(!got.pending);
        assert_eq!(got.location.as_deref(), Some("Wellington"));
        // Identity and classification are untouched.
        assert_eq!(got.id, created.id);
        assert_eq!(got.provider_transaction_id, created.provider_transaction_id);
        assert_eq!(got.category, created.category);
        assert_eq!(got.provider_categories, created.provider_categories);
    }

    #[test]
    fn update_missing_transaction_returns_not_found() {
        let db = init_db();

        let got = update_transaction_from_provider(
            999,
            1,
            &ProviderUpdate {
                amount: 1.0,
                description: "".to_owned(),
                merchant: None,
                pending: false,
                location: None,
            },
            &db,
        );

        assert_eq!(got, Err(Error::NotFound));
    }

    #[test]
    fn deleted_transactions_are_excluded_from_queries_but_kept() {
        let db = init_db();
        let created = create_transaction(sample_transaction("tx_1"), &db).unwrap();

        mark_transaction_deleted(created.id, 1, &db).expect("Could not delete");

        let visible = query_transactions(1, TransactionQuery::default(), &db).unwrap();
        assert!(visible.is_empty(), "want no visible transactions");
        assert_eq!(count_transactions(1, &db), Ok(0));

        // The row survives for reward/budget references.
        let kept = get_transaction_by_provider_id(1, "tx_1", &db).unwrap();
        assert!(kept.is_deleted);
    }

    #[test]
    fn query_filters_by_date_range() {
        let db = init_db();
        create_transaction(sample_transaction("tx_1"), &db).unwrap();
        let mut later = sample_transaction("tx_2");
        later.date = date!(2025 - 07 - 15);
        create_transaction(later, &db).unwrap();

        let got = query_transactions(
            1,
            TransactionQuery {
                date_range: Some(date!(2025 - 07 - 01)..=date!(2025 - 07 - 31)),
                ..Default::default()
            },
            &db,
        )
        .unwrap();

        assert_eq!(got.len(), 1, "want 1 transaction, got {}", got.len());
        assert_eq!(got[0].provider_transaction_id, "tx_2");
    }

    #[test]
    fn zero_amount_is_valid() {
        let db = init_db();
        let mut zero = sample_transaction("tx_0");
        zero.amount = 0.0;

        let got = create_transaction(zero, &db).expect("Zero amounts must be accepted");

        assert_eq!(got.amount, 0.0);
    }
}
