//! Reconciles provider transaction batches into the canonical store.
//!
//! Reconciliation is an upsert: records the store has never seen are
//! inserted (with the category mapper applied), records it has seen are
//! updated in place from the latest provider state. The outcome is a
//! three-way partition of the batch. A record that fails validation or a
//! store write is captured in the `errors` partition and the loop moves on;
//! one bad record never aborts the batch.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::{
    DatabaseID, Error,
    category::map_provider_categories,
    provider::ProviderTransaction,
    transaction::{
        NewTransaction, ProviderUpdate, Transaction, create_transaction,
        get_transaction_by_provider_id, update_transaction_from_provider,
    },
};

// ============================================================================
// MODELS
// ============================================================================

/// A per-record reconciliation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    /// The provider id of the record that failed, if it had one.
    pub provider_transaction_id: String,
    /// What went wrong.
    pub message: String,
}

impl RecordError {
    /// Render the error the way it is stored on a sync log.
    pub fn to_log_message(&self) -> String {
        if self.provider_transaction_id.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.provider_transaction_id, self.message)
        }
    }
}

/// The three-way partition produced by [reconcile_batch].
#[derive(Debug, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Transactions created by this batch.
    pub added: Vec<Transaction>,
    /// Previously known transactions refreshed from provider state.
    pub updated: Vec<Transaction>,
    /// Records that could not be applied.
    pub errors: Vec<RecordError>,
}

impl ReconcileOutcome {
    /// The per-record errors formatted for the sync log.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(RecordError::to_log_message).collect()
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Merge a batch of provider records into the canonical transaction store.
///
/// After this call the store holds exactly one transaction per provider id
/// in the batch, reflecting the latest provider state. Records are applied
/// in batch order; if the same provider id appears twice, the later record
/// wins and the batch still produces a single canonical row.
pub fn reconcile_batch(
    user_id: DatabaseID,
    connection_id: DatabaseID,
    records: &[ProviderTransaction],
    connection: &Connection,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    // Maps provider ids inserted by this batch to their index in `added`, so
    // an in-batch duplicate refreshes the added entry instead of being
    // double-counted as an update.
    let mut added_index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let provider_transaction_id = record.transaction_id.trim();

        if provider_transaction_id.is_empty() {
            outcome.errors.push(RecordError {
                provider_transaction_id: String::new(),
                message: "record is missing a provider transaction id".to_owned(),
            });
            continue;
        }

        match get_transaction_by_provider_id(user_id, provider_transaction_id, connection) {
            Ok(existing) => {
                match update_transaction_from_provider(
                    existing.id,
                    user_id,
                    &provider_update(record),
                    connection,
                ) {
                    Ok(updated) => {
                        if let Some(&index) = added_index.get(provider_transaction_id) {
                            outcome.added[index] = updated;
                        } else {
                            outcome.updated.push(updated);
                        }
                    }
                    Err(error) => outcome.errors.push(RecordError {
                        provider_transaction_id: provider_transaction_id.to_owned(),
                        message: error.to_string(),
                    }),
                }
            }
            Err(Error::NotFound) => {
                match create_transaction(
                    new_transaction(user_id, connection_id, provider_transaction_id, record),
                    connection,
                ) {
                    Ok(created) => {
                        added_index
                            .insert(provider_transaction_id.to_owned(), outcome.added.len());
                        outcome.added.push(created);
                    }
                    Err(error) => outcome.errors.push(RecordError {
                        provider_transaction_id: provider_transaction_id.to_owned(),
                        message: error.to_string(),
                    }),
                }
            }
            Err(error) => outcome.errors.push(RecordError {
                provider_transaction_id: provider_transaction_id.to_owned(),
                message: error.to_string(),
            }),
        }
    }

    if !outcome.errors.is_empty() {
        tracing::warn!(
            "reconciliation applied {} records with {} errors",
            outcome.added.len() + outcome.updated.len(),
            outcome.errors.len()
        );
    }

    outcome
}

fn new_transaction(
    user_id: DatabaseID,
    connection_id: DatabaseID,
    provider_transaction_id: &str,
    record: &ProviderTransaction,
) -> NewTransaction {
    let category_match = map_provider_categories(&record.category);

    NewTransaction {
        user_id,
        connection_id,
        provider_transaction_id: provider_transaction_id.to_owned(),
        provider_account_id: record.account_id.clone(),
        amount: record.amount,
        date: record.date,
        description: record.name.clone(),
        merchant: record.merchant_name.clone(),
        provider_categories: record.category.clone(),
        category: category_match.category,
        pending: record.pending,
        location: record.location.clone(),
    }
}

fn provider_update(record: &ProviderTransaction) -> ProviderUpdate {
    ProviderUpdate {
        amount: record.amount,
        description: record.name.clone(),
        merchant: record.merchant_name.clone(),
        pending: record.pending,
        location: record.location.clone(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
