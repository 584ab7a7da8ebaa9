//! The API endpoint URIs.

/// The route to run a sync for one provider connection.
pub const SYNC_CONNECTION: &str = "/api/connections/{connection_id}/sync";
/// The route to run a sync for every one of the user's connections.
pub const SYNC_ALL: &str = "/api/sync";
/// The route to read recent sync history.
pub const SYNC_HISTORY: &str = "/api/sync/history";
/// The route to list a connection's accounts at the provider, used when
/// setting up account mappings.
pub const CONNECTION_ACCOUNTS: &str = "/api/connections/{connection_id}/accounts";
