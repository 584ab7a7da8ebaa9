//! The client for the external account-aggregation provider.
//!
//! The provider is a black box that hands back transaction and account data
//! for a linked bank connection. This module defines the data contract
//! (field names and types, not a specific serialization), the
//! [ProviderClient] trait that the sync orchestrator depends on, and the
//! reqwest-backed implementation used in production. Tests inject their own
//! [ProviderClient] implementations instead of standing up an HTTP server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use time::Date;

// ============================================================================
// MODELS
// ============================================================================

/// A transaction as reported by the aggregation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    /// The provider's stable identifier for this transaction.
    pub transaction_id: String,
    /// The provider's identifier for the account the transaction belongs to.
    pub account_id: String,
    /// The transaction amount. Positive values are money leaving the
    /// account; negative values are refunds or income.
    pub amount: f64,
    /// The date the transaction occurred.
    pub date: Date,
    /// The provider's description of the transaction.
    pub name: String,
    /// The cleaned-up merchant name, when the provider could derive one.
    #[serde(default)]
    pub merchant_name: Option<String>,
    /// The provider's category taxonomy, most general first.
    #[serde(default)]
    pub category: Vec<String>,
    /// Whether the transaction has not yet settled.
    #[serde(default)]
    pub pending: bool,
    /// A display string for where the transaction took place.
    #[serde(default)]
    pub location: Option<String>,
}

/// An account as reported by the aggregation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    /// The provider's stable identifier for this account.
    pub account_id: String,
    /// The account's display name.
    pub name: String,
    /// The provider's account type string, e.g. "depository" or "credit".
    #[serde(rename = "type")]
    pub account_type: String,
    /// The current balance, when the provider reports one.
    #[serde(default)]
    pub balance: Option<f64>,
}

/// The errors that can come out of a provider call.
///
/// All variants are string-backed so the classification survives into sync
/// log records and API responses.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The provider did not answer within the configured deadline.
    #[error("provider request timed out")]
    Timeout,

    /// The provider rejected the connection's credentials. The connection
    /// needs to be re-linked by the user; retrying will not help.
    #[error("provider rejected the access token: {0}")]
    Auth(String),

    /// The provider asked us to back off.
    #[error("provider rate limit exceeded")]
    RateLimited,

    /// The request failed in transport or with an unexpected status.
    #[error("provider request failed: {0}")]
    Http(String),

    /// The response body did not match the documented contract.
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// Fetches transaction and account data from the aggregation provider.
///
/// The sync orchestrator only talks to the provider through this trait so
/// tests can swap in a scripted fake.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch the transactions for a connection within the given date window
    /// (inclusive on both ends).
    async fn fetch_transactions(
        &self,
        access_token: &str,
        start_date: Date,
        end_date: Date,
    ) -> Result<Vec<ProviderTransaction>, ProviderError>;

    /// Fetch the accounts linked to a connection.
    async fn fetch_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProviderAccount>, ProviderError>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

/// The reqwest-backed [ProviderClient] used in production.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    base_url: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct TransactionsRequest<'a> {
    access_token: &'a str,
    start_date: Date,
    end_date: Date,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: Vec<ProviderTransaction>,
}

#[derive(Serialize)]
struct AccountsRequest<'a> {
    access_token: &'a str,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<ProviderAccount>,
}

impl HttpProviderClient {
    /// Create a client for the provider API at `base_url`.
    ///
    /// `timeout` bounds each individual request; the orchestrator applies
    /// its own run-level deadline on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ProviderError::Http(error.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http_client,
        })
    }

    async fn post_json<Request: Serialize, Response: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &Request,
    ) -> Result<Response, ProviderError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let response = response.error_for_status().map_err(classify_request_error)?;

        response
            .json()
            .await
            .map_err(|error| ProviderError::Decode(error.to_string()))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_transactions(
        &self,
        access_token: &str,
        start_date: Date,
        end_date: Date,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        tracing::debug!("fetching provider transactions from {start_date} to {end_date}");

        let response: TransactionsResponse = self
            .post_json(
                "/transactions/get",
                &TransactionsRequest {
                    access_token,
                    start_date,
                    end_date,
                },
            )
            .await?;

        Ok(response.transactions)
    }

    async fn fetch_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProviderAccount>, ProviderError> {
        let response: AccountsResponse = self
            .post_json("/accounts/get", &AccountsRequest { access_token })
            .await?;

        Ok(response.accounts)
    }
}

fn classify_request_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        return ProviderError::Timeout;
    }

    match error.status() {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            ProviderError::Auth(error.to_string())
        }
        Some(StatusCode::TOO_MANY_REQUESTS) => ProviderError::RateLimited,
        _ => ProviderError::Http(error.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
