//! Propagates reconciled transactions into card rewards and budgets.
//!
//! The propagator runs after reconciliation over the transactions that run
//! *added*. Updated transactions are deliberately excluded: re-deriving
//! reward deltas from raw amounts on every update would double-count on
//! replay, so a transaction earns rewards and consumes budget exactly once,
//! when it first appears.
//!
//! Ownership discipline: this module is the only writer of card reward
//! state and budget spend. It never writes transactions or sync logs.

use rusqlite::Connection;
use time::Date;

use crate::{
    DatabaseID, Error,
    account_mapping::{AccountType, resolve_account_type},
    budget::{add_budget_spent, budgets_matching},
    card::{BonusStatus, get_credit_card, list_credit_cards, update_card_reward_state},
    reward::{apply_bonus_spend, calculate_reward, expire_bonus_if_due},
    transaction::Transaction,
};

/// What one propagation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagationSummary {
    /// How many transactions earned a reward on a card.
    pub rewards_applied: usize,
    /// How many budget rows accumulated spend.
    pub budgets_updated: usize,
    /// How many bonuses reached [BonusStatus::Completed] this pass.
    pub bonuses_completed: usize,
}

/// Apply newly reconciled transactions to card rewards and budgets.
///
/// For each transaction: the account mapping decides whether it flows into
/// reward processing; positive amounts additionally accumulate into every
/// matching budget. Hidden and logically deleted transactions are skipped.
///
/// Mapping and card lookup misses degrade to skipping reward processing for
/// that transaction. Storage write failures propagate to the caller — the
/// orchestrator treats them as run-level failures.
///
/// # Errors
/// This function will return an [Error::SqlError] (or other store error) if
/// persisting a card or budget update fails.
pub fn propagate_transactions(
    user_id: DatabaseID,
    transactions: &[Transaction],
    today: Date,
    connection: &Connection,
) -> Result<PropagationSummary, Error> {
    let mut summary = PropagationSummary::default();

    for transaction in transactions {
        if transaction.is_hidden || transaction.is_deleted {
            continue;
        }

        if let AccountType::Credit { credit_card_id } =
            resolve_account_type(user_id, &transaction.provider_account_id, connection)
        {
            apply_card_reward(user_id, credit_card_id, transaction, today, &mut summary, connection)?;
        }

        if transaction.amount > 0.0 {
            for budget in budgets_matching(user_id, transaction.category, transaction.date, connection)? {
                add_budget_spent(budget.id, user_id, transaction.amount, connection)?;
                summary.budgets_updated += 1;
            }
        }
    }

    Ok(summary)
}

/// Expire any of the user's bonuses whose end date has passed.
///
/// Runs once per sync run so a bonus cannot sit past its deadline just
/// because no qualifying transactions arrived. Cards without a bonus, or
/// with a terminal one, are untouched and not rewritten.
///
/// Returns how many bonuses expired.
///
/// # Errors
/// This function will return a store error if the user's cards could not be
/// read or an expired bonus could not be persisted.
pub fn expire_due_bonuses(
    user_id: DatabaseID,
    today: Date,
    connection: &Connection,
) -> Result<usize, Error> {
    let mut expired = 0;

    for mut card in list_credit_cards(user_id, connection)? {
        let Some(bonus) = card.bonus.as_mut() else {
            continue;
        };

        if expire_bonus_if_due(bonus, today) {
            tracing::info!("sign-up bonus on card {} expired", card.id);
            update_card_reward_state(&card, connection)?;
            expired += 1;
        }
    }

    Ok(expired)
}

fn apply_card_reward(
    user_id: DatabaseID,
    credit_card_id: DatabaseID,
    transaction: &Transaction,
    today: Date,
    summary: &mut PropagationSummary,
    connection: &Connection,
) -> Result<(), Error> {
    let mut card = match get_credit_card(credit_card_id, user_id, connection) {
        Ok(card) => card,
        Err(Error::NotFound) => {
            // The mapping points at a card that no longer exists. Treat the
            // account as a plain bank account for this run.
            tracing::warn!(
                "account mapping for provider account {} references missing card {credit_card_id}",
                transaction.provider_account_id
            );
            return Ok(());
        }
        Err(error) => return Err(error),
    };

    let reward = calculate_reward(transaction, &card);
    card.rewards_balance += reward.amount;

    if let Some(bonus) = card.bonus.as_mut() {
        expire_bonus_if_due(bonus, today);

        let was_completed = bonus.status == BonusStatus::Completed;
        apply_bonus_spend(bonus, transaction);
        if !was_completed && bonus.status == BonusStatus::Completed {
            summary.bonuses_completed += 1;
            tracing::info!(
                "sign-up bonus completed on card {credit_card_id} with spending {}",
                bonus.current_spending
            );
        }
    }

    update_card_reward_state(&card, connection)?;
    summary.rewards_applied += 1;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
