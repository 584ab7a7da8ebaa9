//! Budgets: per-category spending limits over a date period.
//!
//! `spent` is a derived value accumulated incrementally by the propagator
//! as transactions are reconciled, not recomputed from scratch. Overlapping
//! budgets for the same category are allowed and all accumulate
//! independently.

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::Date;

use crate::{DatabaseID, Error, category::Category};

// ============================================================================
// MODELS
// ============================================================================

/// A spending limit for one category over one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Budget {
    /// The ID of the budget.
    pub id: DatabaseID,
    /// The user who owns the budget.
    pub user_id: DatabaseID,
    /// The category the budget tracks.
    pub category: Category,
    /// The amount budgeted for the period.
    pub amount: f64,
    /// The spend accumulated against the budget so far.
    pub spent: f64,
    /// The first day of the budget period.
    pub period_start: Date,
    /// The last day of the budget period (inclusive).
    pub period_end: Date,
}

/// The fields needed to create a budget.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBudget {
    /// The user who owns the budget.
    pub user_id: DatabaseID,
    /// The category the budget tracks.
    pub category: Category,
    /// The amount budgeted for the period.
    pub amount: f64,
    /// The first day of the budget period.
    pub period_start: Date,
    /// The last day of the budget period (inclusive).
    pub period_end: Date,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the budget table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_budget_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                amount REAL NOT NULL,
                spent REAL NOT NULL DEFAULT 0,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// Create a new budget with zero accumulated spend.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an unexpected
/// SQL error.
pub fn create_budget(new_budget: NewBudget, connection: &Connection) -> Result<Budget, Error> {
    let budget = connection
        .prepare(
            "INSERT INTO budget (user_id, category, amount, spent, period_start, period_end)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)
             RETURNING id, user_id, category, amount, spent, period_start, period_end",
        )?
        .query_row(
            (
                new_budget.user_id,
                new_budget.category.as_str(),
                new_budget.amount,
                new_budget.period_start,
                new_budget.period_end,
            ),
            map_budget_row,
        )?;

    Ok(budget)
}

/// Retrieve a budget by its `id`, scoped to `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the budget does not exist or belongs to another
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_budget(
    id: DatabaseID,
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<Budget, Error> {
    let budget = connection
        .prepare(
            "SELECT id, user_id, category, amount, spent, period_start, period_end
             FROM budget
             WHERE id = ?1 AND user_id = ?2",
        )?
        .query_row((id, user_id), map_budget_row)?;

    Ok(budget)
}

/// Find the user's budgets whose category matches and whose period contains
/// `date`.
///
/// Budget lists are small, so this is the linear scan the matching contract
/// allows; overlapping periods all match.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is a SQL error.
pub fn budgets_matching(
    user_id: DatabaseID,
    category: Category,
    date: Date,
    connection: &Connection,
) -> Result<Vec<Budget>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, category, amount, spent, period_start, period_end
             FROM budget
             WHERE user_id = ?1 AND category = ?2 AND period_start <= ?3 AND period_end >= ?3
             ORDER BY id",
        )?
        .query_map((user_id, category.as_str(), date), map_budget_row)?
        .map(|budget_result| budget_result.map_err(Error::SqlError))
        .collect()
}

/// Accumulate spend against a budget.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the budget does not exist or belongs to another
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn add_budget_spent(
    id: DatabaseID,
    user_id: DatabaseID,
    amount: f64,
    connection: &Connection,
) -> Result<Budget, Error> {
    let budget = connection
        .prepare(
            "UPDATE budget
             SET spent = spent + ?3
             WHERE id = ?1 AND user_id = ?2
             RETURNING id, user_id, category, amount, spent, period_start, period_end",
        )?
        .query_row((id, user_id, amount), map_budget_row)?;

    Ok(budget)
}

fn map_budget_row(row: &Row) -> Result<Budget, rusqlite::Error> {
    let category: String = row.get(2)?;
    let category = Category::from_name(&category).unwrap_or(Category::Other);

    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category,
        amount: row.get(3)?,
        spent: row.get(4)?,
        period_start: row.get(5)?,
        period_end: row.get(6)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod budget_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::category::Category;

    use super::{
        NewBudget, add_budget_spent, budgets_matching, create_budget, create_budget_table,
        get_budget,
    };

    fn init_db() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_budget_table(&connection).expect("Could not create budget table");

        connection
    }

    fn june_budget(category: Category, amount: f64) -> NewBudget {
        NewBudget {
            user_id: 1,
            category,
            amount,
            period_start: date!(2025 - 06 - 01),
            period_end: date!(2025 - 06 - 30),
        }
    }

    #[test]
    fn accumulation_adds_exactly_n_times_a() {
        let db = init_db();
        let budget = create_budget(june_budget(Category::Dining, 500.0), &db).unwrap();

        for _ in 0..4 {
            add_budget_spent(budget.id, 1, 12.5, &db).expect("Could not add spend");
        }

        let got = get_budget(budget.id, 1, &db).unwrap();
        assert_eq!(got.spent, 50.0, "want 4 * 12.50 = 50.00, got {}", got.spent);
    }

    #[test]
    fn matching_filters_by_category_and_period() {
        let db = init_db();
        let dining = create_budget(june_budget(Category::Dining, 500.0), &db).unwrap();
        create_budget(june_budget(Category::Travel, 1000.0), &db).unwrap();

        let in_period = budgets_matching(1, Category::Dining, date!(2025 - 06 - 15), &db).unwrap();
        assert_eq!(vec![dining], in_period);

        let out_of_period =
            budgets_matching(1, Category::Dining, date!(2025 - 07 - 01), &db).unwrap();
        assert!(out_of_period.is_empty());
    }

    #[test]
    fn period_bounds_are_inclusive() {
        let db = init_db();
        create_budget(june_budget(Category::Dining, 500.0), &db).unwrap();

        for date in [date!(2025 - 06 - 01), date!(2025 - 06 - 30)] {
            let got = budgets_matching(1, Category::Dining, date, &db).unwrap();
            assert_eq!(got.len(), 1, "want a match on {date}");
        }
    }

    #[test]
    fn overlapping_budgets_all_match() {
        let db = init_db();
        create_budget(june_budget(Category::Dining, 500.0), &db).unwrap();
        create_budget(
            NewBudget {
                user_id: 1,
                category: Category::Dining,
                amount: 2000.0,
                period_start: date!(2025 - 01 - 01),
                period_end: date!(2025 - 12 - 31),
            },
            &db,
        )
        .unwrap();

        let got = budgets_matching(1, Category::Dining, date!(2025 - 06 - 15), &db).unwrap();

        assert_eq!(got.len(), 2, "overlapping budgets must both match");
    }

    #[test]
    fn budgets_are_scoped_per_user() {
        let db = init_db();
        create_budget(june_budget(Category::Dining, 500.0), &db).unwrap();

        let got = budgets_matching(2, Category::Dining, date!(2025 - 06 - 15), &db).unwrap();

        assert!(got.is_empty());
    }
}
