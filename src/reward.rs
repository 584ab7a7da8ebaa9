//! Reward calculation and sign-up bonus progress.
//!
//! Both pieces here are pure functions over their inputs: they never touch
//! storage and never fail. The propagator decides when to call them and
//! persists whatever they produce. Unexpected input degrades to the safest
//! outcome (zero reward, no state transition) instead of aborting a sync
//! run.

use time::Date;

use crate::{
    card::{BonusStatus, CreditCard, CreditCardBonus, RewardType},
    transaction::Transaction,
};

// ============================================================================
// REWARD CALCULATOR
// ============================================================================

/// The reward earned by one transaction on one card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward {
    /// The amount earned, in the units of `reward_type`.
    pub amount: f64,
    /// The units the reward is paid in.
    pub reward_type: RewardType,
}

/// Calculate the reward a transaction earns on a card.
///
/// A category override in the card's reward table wins over the default
/// rate. Cashback overrides interpret the rate as a percentage; points and
/// miles overrides interpret it as units per dollar. The default
/// `reward_rate` is a plain fraction in the card's overall reward type.
///
/// Only money leaving the account earns rewards: refunds and income
/// (non-positive amounts) earn zero. The calculation is deterministic and
/// never mutates the card; the propagator applies the result.
pub fn calculate_reward(transaction: &Transaction, card: &CreditCard) -> Reward {
    if transaction.amount <= 0.0 {
        return Reward {
            amount: 0.0,
            reward_type: card.reward_type,
        };
    }

    match card.category_rewards.get(&transaction.category) {
        Some(category_reward) => {
            let amount = match category_reward.reward_type {
                RewardType::Cashback => transaction.amount * (category_reward.rate / 100.0),
                RewardType::Points | RewardType::Miles => {
                    transaction.amount * category_reward.rate
                }
            };

            Reward {
                amount,
                reward_type: category_reward.reward_type,
            }
        }
        None => Reward {
            amount: transaction.amount * card.reward_rate,
            reward_type: card.reward_type,
        },
    }
}

// ============================================================================
// BONUS STATE MACHINE
// ============================================================================

/// Expire a bonus whose end date has passed.
///
/// Expiry is checked on each sync run rather than by a background timer, so
/// a bonus can sit past its end date until the next run notices. Terminal
/// bonuses (completed, paid out, already expired) are left alone: reaching
/// the threshold before the deadline always sticks.
///
/// Returns whether the bonus transitioned.
pub fn expire_bonus_if_due(bonus: &mut CreditCardBonus, today: Date) -> bool {
    if bonus.status.is_terminal() {
        return false;
    }

    match bonus.end_date {
        Some(end_date) if today > end_date => {
            bonus.status = BonusStatus::Expired;
            true
        }
        _ => false,
    }
}

/// Apply one transaction's spend to a bonus.
///
/// A transaction qualifies when auto-tracking is on, the bonus is not
/// terminal, the amount is positive, and the bonus either has no category
/// filter or the filter matches the transaction's category. Qualifying
/// spend accumulates into `current_spending` and the per-category
/// breakdown; the first qualifying spend moves the bonus out of
/// [BonusStatus::NotStarted], and crossing the threshold completes it and
/// stamps `date_completed` with the transaction date.
///
/// Progress is monotonic: spend only ever accumulates and a completed bonus
/// never reverts, even if the transaction is later voided.
///
/// Returns whether the bonus changed.
pub fn apply_bonus_spend(bonus: &mut CreditCardBonus, transaction: &Transaction) -> bool {
    if !bonus.auto_tracking || bonus.status.is_terminal() {
        return false;
    }

    if transaction.amount <= 0.0 {
        return false;
    }

    if let Some(required_category) = bonus.category
        && required_category != transaction.category
    {
        return false;
    }

    bonus.current_spending += transaction.amount;
    *bonus
        .spending_by_category
        .entry(transaction.category)
        .or_insert(0.0) += transaction.amount;

    if bonus.current_spending >= bonus.spending_required {
        bonus.status = BonusStatus::Completed;
        bonus.date_completed = Some(transaction.date);
    } else if bonus.status == BonusStatus::NotStarted {
        bonus.status = BonusStatus::InProgress;
    }

    true
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod reward_calculator_tests {
    use std::collections::HashMap;

    use time::{OffsetDateTime, macros::date};

    use crate::{
        card::{CategoryReward, CreditCard, RewardType},
        category::Category,
        transaction::Transaction,
    };

    use super::calculate_reward;

    fn transaction(amount: f64, category: Category) -> Transaction {
        Transaction {
            id: 1,
            user_id: 1,
            connection_id: 1,
            provider_transaction_id: "tx_1".to_owned(),
            provider_account_id: "a1".to_owned(),
            amount,
            date: date!(2025 - 06 - 01),
            description: "CAFE".to_owned(),
            merchant: None,
            provider_categories: vec![],
            category,
            pending: false,
            location: None,
            notes: None,
            is_hidden: false,
            is_deleted: false,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn card(
        reward_type: RewardType,
        reward_rate: f64,
        category_rewards: HashMap<Category, CategoryReward>,
    ) -> CreditCard {
        CreditCard {
            id: 7,
            user_id: 1,
            name: "Test Card".to_owned(),
            reward_type,
            reward_rate,
            category_rewards,
            rewards_balance: 0.0,
            bonus: None,
        }
    }

    #[test]
    fn category_cashback_override_is_a_percentage() {
        let mut overrides = HashMap::new();
        overrides.insert(
            Category::Dining,
            CategoryReward {
                reward_type: RewardType::Cashback,
                rate: 3.0,
            },
        );
        let card = card(RewardType::Points, 0.01, overrides);

        let got = calculate_reward(&transaction(100.0, Category::Dining), &card);

        assert_eq!(got.amount, 3.0, "want $3.00 cashback, got {}", got.amount);
        assert_eq!(got.reward_type, RewardType::Cashback);
    }

    #[test]
    fn points_override_is_units_per_dollar() {
        let mut overrides = HashMap::new();
        overrides.insert(
            Category::Travel,
            CategoryReward {
                reward_type: RewardType::Points,
                rate: 2.0,
            },
        );
        let card = card(RewardType::Points, 0.01, overrides);

        let got = calculate_reward(&transaction(100.0, Category::Travel), &card);

        assert_eq!(got.amount, 200.0, "want 200 points, got {}", got.amount);
        assert_eq!(got.reward_type, RewardType::Points);
    }

    #[test]
    fn default_rate_is_a_plain_fraction() {
        let card = card(RewardType::Cashback, 0.01, HashMap::new());

        let got = calculate_reward(&transaction(100.0, Category::Groceries), &card);

        assert_eq!(got.amount, 1.0, "want $1.00 at 1%, got {}", got.amount);
        assert_eq!(got.reward_type, RewardType::Cashback);
    }

    #[test]
    fn calculation_is_deterministic() {
        let card = card(RewardType::Cashback, 0.015, HashMap::new());
        let transaction = transaction(250.0, Category::Shopping);

        let first = calculate_reward(&transaction, &card);
        let second = calculate_reward(&transaction, &card);

        assert_eq!(first, second);
    }

    #[test]
    fn refunds_and_income_earn_nothing() {
        let card = card(RewardType::Cashback, 0.02, HashMap::new());

        assert_eq!(
            calculate_reward(&transaction(-50.0, Category::Shopping), &card).amount,
            0.0
        );
        assert_eq!(
            calculate_reward(&transaction(0.0, Category::Shopping), &card).amount,
            0.0
        );
    }
}

#[cfg(test)]
mod bonus_state_machine_tests {
    use time::{OffsetDateTime, macros::date};

    use crate::{
        card::{BonusStatus, CreditCardBonus},
        category::Category,
        transaction::Transaction,
    };

    use super::{apply_bonus_spend, expire_bonus_if_due};

    fn spend(amount: f64, category: Category) -> Transaction {
        Transaction {
            id: 1,
            user_id: 1,
            connection_id: 1,
            provider_transaction_id: "tx_1".to_owned(),
            provider_account_id: "a1".to_owned(),
            amount,
            date: date!(2025 - 02 - 10),
            description: "SPEND".to_owned(),
            merchant: None,
            provider_categories: vec![],
            category,
            pending: false,
            location: None,
            notes: None,
            is_hidden: false,
            is_deleted: false,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn bonus(spending_required: f64) -> CreditCardBonus {
        CreditCardBonus::new(
            spending_required,
            date!(2025 - 01 - 01),
            Some(date!(2025 - 04 - 01)),
        )
    }

    #[test]
    fn bonus_walks_not_started_to_completed() {
        let mut bonus = bonus(4000.0);

        assert!(apply_bonus_spend(&mut bonus, &spend(1500.0, Category::Dining)));
        assert_eq!(bonus.current_spending, 1500.0);
        assert_eq!(bonus.status, BonusStatus::InProgress);
        assert_eq!(bonus.date_completed, None);

        assert!(apply_bonus_spend(&mut bonus, &spend(1500.0, Category::Travel)));
        assert_eq!(bonus.current_spending, 3000.0);
        assert_eq!(bonus.status, BonusStatus::InProgress);

        assert!(apply_bonus_spend(&mut bonus, &spend(1200.0, Category::Shopping)));
        assert_eq!(bonus.current_spending, 4200.0);
        assert_eq!(bonus.status, BonusStatus::Completed);
        assert_eq!(
            bonus.date_completed,
            Some(date!(2025 - 02 - 10)),
            "date_completed must be stamped on the completing transaction"
        );
    }

    #[test]
    fn completed_bonus_never_regresses() {
        let mut bonus = bonus(1000.0);
        apply_bonus_spend(&mut bonus, &spend(1000.0, Category::Dining));
        assert_eq!(bonus.status, BonusStatus::Completed);
        let completed_spending = bonus.current_spending;

        let changed = apply_bonus_spend(&mut bonus, &spend(500.0, Category::Dining));

        assert!(!changed, "a terminal bonus must ignore further spend");
        assert_eq!(bonus.status, BonusStatus::Completed);
        assert_eq!(bonus.current_spending, completed_spending);
    }

    #[test]
    fn spending_never_decreases() {
        let mut bonus = bonus(10_000.0);
        let mut previous = 0.0;

        for amount in [100.0, 2500.0, 0.0, -300.0, 42.0] {
            apply_bonus_spend(&mut bonus, &spend(amount, Category::Dining));
            assert!(
                bonus.current_spending >= previous,
                "spending went backwards: {} -> {}",
                previous,
                bonus.current_spending
            );
            previous = bonus.current_spending;
        }

        assert_eq!(bonus.current_spending, 2642.0);
    }

    #[test]
    fn category_filter_excludes_other_spend() {
        let mut bonus = bonus(4000.0);
        bonus.category = Some(Category::Dining);

        let changed = apply_bonus_spend(&mut bonus, &spend(1500.0, Category::Travel));

        assert!(!changed);
        assert_eq!(bonus.current_spending, 0.0);
        assert_eq!(bonus.status, BonusStatus::NotStarted);
    }

    #[test]
    fn spend_breakdown_tracks_categories() {
        let mut bonus = bonus(10_000.0);

        apply_bonus_spend(&mut bonus, &spend(100.0, Category::Dining));
        apply_bonus_spend(&mut bonus, &spend(250.0, Category::Dining));
        apply_bonus_spend(&mut bonus, &spend(40.0, Category::Travel));

        assert_eq!(bonus.spending_by_category.get(&Category::Dining), Some(&350.0));
        assert_eq!(bonus.spending_by_category.get(&Category::Travel), Some(&40.0));
    }

    #[test]
    fn auto_tracking_off_means_no_progress() {
        let mut bonus = bonus(4000.0);
        bonus.auto_tracking = false;

        assert!(!apply_bonus_spend(&mut bonus, &spend(1500.0, Category::Dining)));
        assert_eq!(bonus.status, BonusStatus::NotStarted);
    }

    #[test]
    fn bonus_expires_after_end_date() {
        let mut bonus = bonus(4000.0);
        apply_bonus_spend(&mut bonus, &spend(100.0, Category::Dining));

        assert!(expire_bonus_if_due(&mut bonus, date!(2025 - 04 - 02)));
        assert_eq!(bonus.status, BonusStatus::Expired);

        // Expired is terminal: no more accumulation.
        assert!(!apply_bonus_spend(&mut bonus, &spend(5000.0, Category::Dining)));
        assert_eq!(bonus.current_spending, 100.0);
    }

    #[test]
    fn expiry_leaves_completed_bonus_alone() {
        let mut bonus = bonus(100.0);
        apply_bonus_spend(&mut bonus, &spend(100.0, Category::Dining));
        assert_eq!(bonus.status, BonusStatus::Completed);

        assert!(!expire_bonus_if_due(&mut bonus, date!(2025 - 04 - 02)));
        assert_eq!(bonus.status, BonusStatus::Completed);
    }

    #[test]
    fn expiry_is_not_due_on_the_end_date_itself() {
        let mut bonus = bonus(4000.0);

        assert!(!expire_bonus_if_due(&mut bonus, date!(2025 - 04 - 01)));
        assert_eq!(bonus.status, BonusStatus::NotStarted);
    }

    #[test]
    fn paid_out_is_terminal() {
        let mut bonus = bonus(100.0);
        bonus.status = BonusStatus::PaidOut;

        assert!(!apply_bonus_spend(&mut bonus, &spend(500.0, Category::Dining)));
        assert!(!expire_bonus_if_due(&mut bonus, date!(2026 - 01 - 01)));
        assert_eq!(bonus.status, BonusStatus::PaidOut);
    }
}
