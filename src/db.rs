//! Database initialization.

use rusqlite::Connection;

use crate::{
    Error, account_mapping::create_account_mapping_table, budget::create_budget_table,
    card::create_credit_card_table, connection::create_connection_table,
    sync_log::create_sync_log_table, transaction::create_transaction_table,
};

/// Create all of the application's tables if they do not exist yet.
///
/// Table creation runs inside a single exclusive transaction so a partially
/// initialized database is never left behind.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let sql_transaction = rusqlite::Transaction::new_unchecked(
        connection,
        rusqlite::TransactionBehavior::Exclusive,
    )?;

    create_connection_table(&sql_transaction)?;
    create_transaction_table(&sql_transaction)?;
    create_account_mapping_table(&sql_transaction)?;
    create_credit_card_table(&sql_transaction)?;
    create_budget_table(&sql_transaction)?;
    create_sync_log_table(&sql_transaction)?;

    sql_transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn initialize_creates_all_tables() {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");

        initialize(&connection).expect("Could not initialize database");

        let table_count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN
                     ('provider_connection', 'transaction', 'account_mapping', 'credit_card',
                      'budget', 'sync_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(table_count, 6, "want all 6 tables, got {table_count}");
    }

    #[test]
    fn initialize_is_safe_to_run_twice() {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");

        initialize(&connection).expect("First initialize failed");
        initialize(&connection).expect("Second initialize failed");
    }
}
