//! Credit cards, their reward configuration, and the embedded sign-up
//! bonus record.
//!
//! A card earns rewards at a default rate, overridden per category by its
//! reward table. The optional sign-up bonus tracks spend toward a
//! threshold; its state transitions live in [crate::reward]. The reward
//! table and bonus are stored as JSON columns on the card row — they are
//! always read and written with the card, never queried into.

use std::collections::HashMap;

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{DatabaseID, Error, category::Category};

// ============================================================================
// MODELS
// ============================================================================

/// How a card pays out rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// A percentage of spend returned as cash.
    Cashback,
    /// Points earned per dollar of spend.
    Points,
    /// Airline miles earned per dollar of spend.
    Miles,
}

impl RewardType {
    /// The name used in the database and over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Cashback => "cashback",
            RewardType::Points => "points",
            RewardType::Miles => "miles",
        }
    }

    /// Parse a reward type from its name. Returns `None` for unrecognised
    /// names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cashback" => Some(RewardType::Cashback),
            "points" => Some(RewardType::Points),
            "miles" => Some(RewardType::Miles),
            _ => None,
        }
    }
}

/// A per-category override in a card's reward table.
///
/// For [RewardType::Cashback] the rate is a percentage (3 means 3%). For
/// points and miles the rate is units earned per dollar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryReward {
    /// How this category pays out.
    pub reward_type: RewardType,
    /// The category's earn rate.
    pub rate: f64,
}

/// The progress states of a sign-up bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusStatus {
    /// No qualifying spend yet.
    NotStarted,
    /// Some qualifying spend, threshold not reached.
    InProgress,
    /// The spend threshold was reached before the end date.
    Completed,
    /// The issuer has paid the bonus out. Set by explicit user action only.
    PaidOut,
    /// The end date passed before the threshold was reached.
    Expired,
}

impl BonusStatus {
    /// Whether the bonus can still accumulate spend. Completed bonuses are
    /// terminal: progress never regresses, even if a transaction is later
    /// voided.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BonusStatus::Completed | BonusStatus::PaidOut | BonusStatus::Expired
        )
    }
}

/// A spend-based sign-up bonus embedded in a card record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCardBonus {
    /// The qualifying spend needed to earn the bonus.
    pub spending_required: f64,
    /// The qualifying spend accumulated so far. Never decreases.
    pub current_spending: f64,
    /// Restricts qualifying spend to one category, or `None` for any.
    pub category: Option<Category>,
    /// Qualifying spend broken down by category.
    #[serde(default)]
    pub spending_by_category: HashMap<Category, f64>,
    /// Where the bonus is in its lifecycle.
    pub status: BonusStatus,
    /// When the bonus window opened.
    pub start_date: Date,
    /// The last day spend can qualify, or `None` for no deadline.
    pub end_date: Option<Date>,
    /// The date the threshold was crossed, stamped once on completion.
    pub date_completed: Option<Date>,
    /// Whether the sync pipeline tracks this bonus automatically.
    pub auto_tracking: bool,
}

impl CreditCardBonus {
    /// Create a bonus that has not started tracking yet.
    pub fn new(spending_required: f64, start_date: Date, end_date: Option<Date>) -> Self {
        Self {
            spending_required,
            current_spending: 0.0,
            category: None,
            spending_by_category: HashMap::new(),
            status: BonusStatus::NotStarted,
            start_date,
            end_date,
            date_completed: None,
            auto_tracking: true,
        }
    }
}

/// A credit card and its reward configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditCard {
    /// The ID of the card.
    pub id: DatabaseID,
    /// The user who owns the card.
    pub user_id: DatabaseID,
    /// The card's display name.
    pub name: String,
    /// How the card pays out when no category override matches.
    pub reward_type: RewardType,
    /// The default earn rate as a plain fraction (0.01 = 1% / 1 unit per
    /// dollar), unlike the per-category rates in `category_rewards`.
    pub reward_rate: f64,
    /// Per-category overrides of the default rate.
    pub category_rewards: HashMap<Category, CategoryReward>,
    /// Total rewards earned, in the card's reward units.
    pub rewards_balance: f64,
    /// The sign-up bonus being tracked, if any.
    pub bonus: Option<CreditCardBonus>,
}

/// The fields needed to create a credit card.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCreditCard {
    /// The user who owns the card.
    pub user_id: DatabaseID,
    /// The card's display name.
    pub name: String,
    /// How the card pays out by default.
    pub reward_type: RewardType,
    /// The default earn rate as a plain fraction.
    pub reward_rate: f64,
    /// Per-category overrides of the default rate.
    pub category_rewards: HashMap<Category, CategoryReward>,
    /// The sign-up bonus to track, if any.
    pub bonus: Option<CreditCardBonus>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the credit card table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_credit_card_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS credit_card (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                reward_type TEXT NOT NULL,
                reward_rate REAL NOT NULL,
                category_rewards TEXT NOT NULL,
                rewards_balance REAL NOT NULL DEFAULT 0,
                bonus TEXT
                )",
        (),
    )?;

    Ok(())
}

/// Create a new credit card.
///
/// # Errors
/// This function will return a:
/// - [Error::JSONSerializationError] if the reward table or bonus cannot be
///   serialized,
/// - or [Error::SqlError] if there is an unexpected SQL error.
pub fn create_credit_card(
    new_card: NewCreditCard,
    connection: &Connection,
) -> Result<CreditCard, Error> {
    let category_rewards = to_json(&new_card.category_rewards)?;
    let bonus = new_card.bonus.as_ref().map(to_json).transpose()?;

    let card = connection
        .prepare(
            "INSERT INTO credit_card (user_id, name, reward_type, reward_rate, category_rewards,
                 rewards_balance, bonus)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             RETURNING id, user_id, name, reward_type, reward_rate, category_rewards,
                 rewards_balance, bonus",
        )?
        .query_row(
            (
                new_card.user_id,
                &new_card.name,
                new_card.reward_type.as_str(),
                new_card.reward_rate,
                category_rewards,
                bonus,
            ),
            map_card_row,
        )?;

    Ok(card)
}

/// Retrieve a credit card by its `id`, scoped to `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the card does not exist or belongs to another
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_credit_card(
    id: DatabaseID,
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<CreditCard, Error> {
    let card = connection
        .prepare(
            "SELECT id, user_id, name, reward_type, reward_rate, category_rewards,
                 rewards_balance, bonus
             FROM credit_card
             WHERE id = ?1 AND user_id = ?2",
        )?
        .query_row((id, user_id), map_card_row)?;

    Ok(card)
}

/// Retrieve all of a user's credit cards.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is a SQL error.
pub fn list_credit_cards(
    user_id: DatabaseID,
    connection: &Connection,
) -> Result<Vec<CreditCard>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, reward_type, reward_rate, category_rewards,
                 rewards_balance, bonus
             FROM credit_card
             WHERE user_id = ?1
             ORDER BY id",
        )?
        .query_map([user_id], map_card_row)?
        .map(|card_result| card_result.map_err(Error::SqlError))
        .collect()
}

/// Persist a card's accumulated reward state: the rewards balance and the
/// bonus record. The reward configuration itself is user-edited elsewhere
/// and is not written here.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the card does not exist or belongs to another
///   user,
/// - [Error::JSONSerializationError] if the bonus cannot be serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_card_reward_state(
    card: &CreditCard,
    connection: &Connection,
) -> Result<CreditCard, Error> {
    let bonus = card.bonus.as_ref().map(to_json).transpose()?;

    let card = connection
        .prepare(
            "UPDATE credit_card
             SET rewards_balance = ?3, bonus = ?4
             WHERE id = ?1 AND user_id = ?2
             RETURNING id, user_id, name, reward_type, reward_rate, category_rewards,
                 rewards_balance, bonus",
        )?
        .query_row((card.id, card.user_id, card.rewards_balance, bonus), map_card_row)?;

    Ok(card)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|error| Error::JSONSerializationError(error.to_string()))
}

fn map_card_row(row: &Row) -> Result<CreditCard, rusqlite::Error> {
    let reward_type: String = row.get(3)?;
    let reward_type = RewardType::from_name(&reward_type).unwrap_or(RewardType::Cashback);

    let category_rewards: String = row.get(5)?;
    let category_rewards = serde_json::from_str(&category_rewards).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(error))
    })?;

    let bonus: Option<String> = row.get(7)?;
    let bonus = match bonus {
        Some(bonus) => Some(serde_json::from_str(&bonus).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })?),
        None => None,
    };

    Ok(CreditCard {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        reward_type,
        reward_rate: row.get(4)?,
        category_rewards,
        rewards_balance: row.get(6)?,
        bonus,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod credit_card_store_tests {
    use std::collections::HashMap;

    use rusqlite::Connection;
    use time::macros::date;

    use crate::{Error, category::Category};

    use super::{
        BonusStatus, CategoryReward, CreditCardBonus, NewCreditCard, RewardType,
        create_credit_card, create_credit_card_table, get_credit_card, update_card_reward_state,
    };

    fn init_db() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_credit_card_table(&connection).expect("Could not create credit card table");

        connection
    }

    fn sample_card() -> NewCreditCard {
        let mut category_rewards = HashMap::new();
        category_rewards.insert(
            Category::Dining,
            CategoryReward {
                reward_type: RewardType::Cashback,
                rate: 3.0,
            },
        );

        NewCreditCard {
            user_id: 1,
            name: "Sapphire".to_owned(),
            reward_type: RewardType::Points,
            reward_rate: 0.01,
            category_rewards,
            bonus: Some(CreditCardBonus::new(
                4000.0,
                date!(2025 - 01 - 01),
                Some(date!(2025 - 04 - 01)),
            )),
        }
    }

    #[test]
    fn card_round_trips_through_json_columns() {
        let db = init_db();

        let created = create_credit_card(sample_card(), &db).expect("Could not create card");
        let got = get_credit_card(created.id, 1, &db).expect("Could not get card");

        assert_eq!(created, got);
        assert_eq!(got.rewards_balance, 0.0);
        assert_eq!(
            got.category_rewards.get(&Category::Dining),
            Some(&CategoryReward {
                reward_type: RewardType::Cashback,
                rate: 3.0
            })
        );
        let bonus = got.bonus.expect("want a bonus");
        assert_eq!(bonus.status, BonusStatus::NotStarted);
        assert_eq!(bonus.spending_required, 4000.0);
    }

    #[test]
    fn cards_are_scoped_per_user() {
        let db = init_db();
        let created = create_credit_card(sample_card(), &db).unwrap();

        assert_eq!(get_credit_card(created.id, 2, &db), Err(Error::NotFound));
    }

    #[test]
    fn update_reward_state_persists_balance_and_bonus() {
        let db = init_db();
        let mut card = create_credit_card(sample_card(), &db).unwrap();

        card.rewards_balance = 125.50;
        let bonus = card.bonus.as_mut().unwrap();
        bonus.current_spending = 1500.0;
        bonus.status = BonusStatus::InProgress;
        bonus
            .spending_by_category
            .insert(Category::Dining, 1500.0);

        update_card_reward_state(&card, &db).expect("Could not update reward state");
        let got = get_credit_card(card.id, 1, &db).unwrap();

        assert_eq!(got.rewards_balance, 125.50);
        let got_bonus = got.bonus.expect("want a bonus");
        assert_eq!(got_bonus.status, BonusStatus::InProgress);
        assert_eq!(got_bonus.current_spending, 1500.0);
        assert_eq!(
            got_bonus.spending_by_category.get(&Category::Dining),
            Some(&1500.0)
        );
    }
}
